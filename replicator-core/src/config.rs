use std::{fs::File, path::PathBuf, time::Duration};

use serde::Deserialize;
use snafu::{ResultExt, Snafu};
use url::Url;

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(display("Failed to read configuration file at {config_file:?}"))]
    ReadConfigFile {
        source: std::io::Error,
        config_file: PathBuf,
    },

    #[snafu(display("Failed to parse configuration file at {config_file:?}"))]
    ParseConfigFile {
        source: serde_yaml::Error,
        config_file: PathBuf,
    },
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct Config {
    pub replicator: ReplicatorConfig,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct ReplicatorConfig {
    pub orchestrator: OrchestratorConfig,
    pub state_store: StateStoreConfig,
    pub notifier: NotifierConfig,

    pub cluster_scaling: ClusterScalingConfig,
    pub job_scaling: JobScalingConfig,

    pub leader_election: LeaderElectionConfig,

    #[serde(default)]
    pub ports: PortsConfig,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct OrchestratorConfig {
    pub address: Url,
    pub token: Option<String>,
    #[serde(default = "default_true")]
    pub allow_stale: bool,
    /// Environment variable that carries this replica's own allocation id, used for the
    /// protected-node reverse lookup (§4.6). Defaults to `NOMAD_ALLOC_ID` per §6.
    #[serde(default = "default_alloc_id_env_var")]
    pub alloc_id_env_var: String,
}

fn default_alloc_id_env_var() -> String {
    "NOMAD_ALLOC_ID".to_string()
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub enum StateStoreConfig {
    InMemory {},
    Redis(RedisConfig),
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct RedisConfig {
    pub endpoint: Url,
    /// Prefix under which every `ScalingState` blob and the leader lock key are namespaced,
    /// `<root>` in the state-path layout from §6.
    #[serde(default = "default_state_root")]
    pub root: String,
}

fn default_state_root() -> String {
    "replicator".to_string()
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub enum NotifierConfig {
    Log {},
    Webhook(WebhookConfig),
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct WebhookConfig {
    pub url: Url,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct ClusterScalingConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(with = "humantime_serde", default = "default_cluster_scaling_interval")]
    pub interval: Duration,

    #[serde(default = "default_scaling_concurrency")]
    pub scaling_concurrency: usize,

    pub provider: ScalingProviderConfig,
}

fn default_cluster_scaling_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_scaling_concurrency() -> usize {
    4
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub enum ScalingProviderConfig {
    Http(HttpProviderConfig),
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct HttpProviderConfig {
    pub address: Url,
    pub token: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct JobScalingConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(with = "humantime_serde", default = "default_job_scaling_interval")]
    pub interval: Duration,
}

fn default_job_scaling_interval() -> Duration {
    Duration::from_secs(10)
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct LeaderElectionConfig {
    #[serde(with = "humantime_serde", default = "default_election_interval")]
    pub election_interval: Duration,

    #[serde(with = "humantime_serde", default = "default_lease_ttl")]
    pub lease_ttl: Duration,

    #[serde(default = "default_lock_key")]
    pub lock_key: String,
}

fn default_election_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_lease_ttl() -> Duration {
    Duration::from_secs(15)
}

fn default_lock_key() -> String {
    "leader".to_string()
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct PortsConfig {
    #[serde(default = "PortsConfig::default_rpc_port")]
    pub rpc: u16,
    #[serde(default = "PortsConfig::default_metrics_port")]
    pub metrics: u16,
}

impl PortsConfig {
    fn default_rpc_port() -> u16 {
        4646
    }

    fn default_metrics_port() -> u16 {
        9090
    }
}

impl Default for PortsConfig {
    fn default() -> Self {
        Self {
            rpc: Self::default_rpc_port(),
            metrics: Self::default_metrics_port(),
        }
    }
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Mirrors the teacher's use of a sync [`File`] read: [`serde_yaml::from_reader`] has no
    /// async variant, and the config is only ever read once at startup (and again on SIGHUP).
    pub fn read_from_file(config_file: &PathBuf) -> Result<Self, Error> {
        let config_file_content =
            File::open(config_file).context(ReadConfigFileSnafu { config_file })?;

        serde_yaml::from_reader(config_file_content).context(ParseConfigFileSnafu { config_file })
    }
}
