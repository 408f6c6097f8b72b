//! Works against a single Redis instance or a Redis-protocol-compatible service reachable through
//! one multiplexed connection. Plain `SET`/`GET` are enough for state blobs, but the leader lock
//! needs atomic "renew/release only if I'm still the holder" semantics, which a bare `GET` + `SET`
//! pair cannot give under concurrent replicas. Lua scripts sidestep the `WATCH`/`MULTI` pitfalls
//! documented in [this Stackoverflow answer](https://stackoverflow.com/a/68783183): the first
//! `EXEC` would unwatch all keys, so a second transaction on the same connection goes through
//! without its watch-guard.

use ::redis::{RedisError, Script};
use snafu::Snafu;
use url::Url;

pub use single::RedisStateStore;

mod single;

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(display("Failed to extract redis host from endpoint {endpoint}"))]
    ExtractRedisHost { endpoint: Url },

    #[snafu(display("Failed to create redis client"))]
    CreateClient { source: RedisError },

    #[snafu(display("Failed to serialize state to JSON"))]
    SerializeToJson { source: serde_json::Error },

    #[snafu(display("Failed to deserialize state from JSON"))]
    DeserializeFromJson { source: serde_json::Error },

    #[snafu(display("Failed to write to redis"))]
    WriteToRedis { source: RedisError },

    #[snafu(display("Failed to read from redis"))]
    ReadFromRedis { source: RedisError },

    #[snafu(display("Failed to execute lock script"))]
    ExecuteLockScript { source: RedisError },

    #[snafu(display("Invalid response from lock script. Expected either 0 or 1"))]
    InvalidLockScriptResponse { response: u64 },
}

fn acquire_lock_script() -> Script {
    Script::new(
        r"
        local current = redis.call('GET', KEYS[1]);
        if current == false or current == ARGV[1] then
            redis.call('SET', KEYS[1], ARGV[1], 'PX', ARGV[2]);
            return 1;
        end;
        return 0;
        ",
    )
}

fn renew_lock_script() -> Script {
    Script::new(
        r"
        local current = redis.call('GET', KEYS[1]);
        if current == ARGV[1] then
            redis.call('SET', KEYS[1], ARGV[1], 'PX', ARGV[2]);
            return 1;
        end;
        return 0;
        ",
    )
}

fn release_lock_script() -> Script {
    Script::new(
        r"
        local current = redis.call('GET', KEYS[1]);
        if current == ARGV[1] then
            redis.call('DEL', KEYS[1]);
        end;
        return 1;
        ",
    )
}

fn state_key(root: &str, state_path: &str) -> String {
    format!("{root}/{state_path}")
}

fn lock_key(root: &str, lock_key: &str) -> String {
    format!("{root}/locks/{lock_key}")
}
