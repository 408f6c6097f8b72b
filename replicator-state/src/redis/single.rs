use std::time::Duration;

use redis::{aio::MultiplexedConnection, AsyncCommands, Client, Script};
use replicator_core::{config::RedisConfig, state::ScalingState};
use snafu::{OptionExt, ResultExt};
use tracing::{info, instrument};

use crate::{
    redis::{
        acquire_lock_script, lock_key, release_lock_script, renew_lock_script, state_key,
        CreateClientSnafu, DeserializeFromJsonSnafu, ExecuteLockScriptSnafu, ExtractRedisHostSnafu,
        InvalidLockScriptResponseSnafu, ReadFromRedisSnafu, SerializeToJsonSnafu, WriteToRedisSnafu,
    },
    StateStore,
};

pub struct RedisStateStore {
    connection: MultiplexedConnection,
    root: String,

    acquire_lock_script: Script,
    renew_lock_script: Script,
    release_lock_script: Script,
}

impl RedisStateStore {
    pub async fn new(config: &RedisConfig) -> Result<Self, super::Error> {
        let redis_host = config.endpoint.host_str().context(ExtractRedisHostSnafu {
            endpoint: config.endpoint.clone(),
        })?;
        info!(redis_host, root = config.root, "Using redis state store");

        let client = Client::open(config.endpoint.as_str()).context(CreateClientSnafu)?;
        let connection = client
            .get_multiplexed_async_connection()
            .await
            .context(CreateClientSnafu)?;

        Ok(Self {
            connection,
            root: config.root.clone(),
            acquire_lock_script: acquire_lock_script(),
            renew_lock_script: renew_lock_script(),
            release_lock_script: release_lock_script(),
        })
    }

    fn connection(&self) -> MultiplexedConnection {
        self.connection.clone()
    }
}

impl StateStore for RedisStateStore {
    #[instrument(skip(self))]
    async fn read_state(&self, state_path: &str) -> Result<Option<ScalingState>, crate::Error> {
        let key = state_key(&self.root, state_path);
        let value: Option<String> = self.connection().get(key).await.context(ReadFromRedisSnafu)?;

        Ok(match value {
            Some(value) => Some(serde_json::from_str(&value).context(DeserializeFromJsonSnafu)?),
            None => None,
        })
    }

    #[instrument(skip(self, state))]
    async fn persist_state(&self, state: &ScalingState) -> Result<(), crate::Error> {
        let key = state_key(&self.root, &state.state_path);
        let value = serde_json::to_string(state).context(SerializeToJsonSnafu)?;

        self.connection()
            .set::<_, _, ()>(key, value)
            .await
            .context(WriteToRedisSnafu)?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn acquire_lock(&self, lock: &str, holder: &str, ttl: Duration) -> Result<bool, crate::Error> {
        let key = lock_key(&self.root, lock);
        let response: u64 = self
            .acquire_lock_script
            .key(key)
            .arg(holder)
            .arg(ttl.as_millis() as u64)
            .invoke_async(&mut self.connection())
            .await
            .context(ExecuteLockScriptSnafu)?;

        match response {
            0 => Ok(false),
            1 => Ok(true),
            _ => InvalidLockScriptResponseSnafu { response }.fail()?,
        }
    }

    #[instrument(skip(self))]
    async fn renew_lock(&self, lock: &str, holder: &str, ttl: Duration) -> Result<bool, crate::Error> {
        let key = lock_key(&self.root, lock);
        let response: u64 = self
            .renew_lock_script
            .key(key)
            .arg(holder)
            .arg(ttl.as_millis() as u64)
            .invoke_async(&mut self.connection())
            .await
            .context(ExecuteLockScriptSnafu)?;

        match response {
            0 => Ok(false),
            1 => Ok(true),
            _ => InvalidLockScriptResponseSnafu { response }.fail()?,
        }
    }

    #[instrument(skip(self))]
    async fn release_lock(&self, lock: &str, holder: &str) -> Result<(), crate::Error> {
        let key = lock_key(&self.root, lock);
        let _: u64 = self
            .release_lock_script
            .key(key)
            .arg(holder)
            .invoke_async(&mut self.connection())
            .await
            .context(ExecuteLockScriptSnafu)?;

        Ok(())
    }
}
