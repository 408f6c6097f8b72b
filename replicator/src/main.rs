use std::{io::Write, path::Path, sync::Arc};

use clap::Parser;
use main_error::MainError;
use replicator_core::{
    config::{self, Config, NotifierConfig, ReplicatorConfig, ScalingProviderConfig, StateStoreConfig},
    state::ScalingState,
};
use replicator_state::{in_memory::InMemoryStateStore, redis::RedisStateStore, StateStore, StateStoreImplementation};
use snafu::{ensure, OptionExt, ResultExt, Snafu};
use tokio::{sync::Notify, task::JoinHandle};
use tracing::{error, info, instrument, warn};

use crate::{
    args::{Args, Command},
    cluster::ClusterEngine,
    http_server::{start_http_server, AppState},
    job::JobEngine,
    leader::LeaderCandidate,
    metrics::Metrics,
    notifier::{LogNotifier, NotifierImplementation, WebhookNotifier},
    orchestrator::{http::HttpOrchestrator, OrchestratorImplementation},
    provider::{http::HttpScalingProvider, ScalingProviderImplementation},
    registry::{JobPolicyRegistry, NodeRegistry},
};

mod args;
mod cluster;
mod error_formatting;
mod http_server;
mod job;
mod leader;
mod metrics;
mod notifier;
mod orchestrator;
mod provider;
mod registry;
mod tracing;
mod watcher;

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(display("Failed to set up tracing"))]
    SetUpTracing { source: tracing::Error },

    #[snafu(display("Failed to register metrics"))]
    RegisterMetrics { source: metrics::Error },

    #[snafu(display("Failed to read configuration"))]
    ReadConfig { source: config::Error },

    #[snafu(display("Failed to create redis state store"))]
    CreateRedisStateStore { source: replicator_state::redis::Error },

    #[snafu(display("Failed to start HTTP server"))]
    StartHttpServer { source: http_server::Error },

    #[snafu(display("No state object exists at {state_path:?}"))]
    NoStateAtPath { state_path: String },

    #[snafu(display("Failed to read state at {state_path:?}"))]
    ReadState { source: replicator_state::Error, state_path: String },

    #[snafu(display("Failed to persist state at {state_path:?}"))]
    PersistState { source: replicator_state::Error, state_path: String },

    #[snafu(display("Target file {path:?} already exists"))]
    InitTargetExists { path: String },

    #[snafu(display("Failed to write example metadata file {path:?}"))]
    WriteInitFile { source: std::io::Error, path: String },

    #[snafu(display("Failed to read confirmation from stdin"))]
    ReadConfirmation { source: std::io::Error },

    Aborted,
}

#[tokio::main]
async fn main() -> Result<(), MainError> {
    let args = Args::parse();

    match args.command {
        Command::Agent { config_file } => run_agent(config_file).await?,
        Command::Failsafe { state_path, enable, disable, force, config_file } => {
            run_failsafe(config_file, state_path, enable, disable, force).await?
        }
        Command::Init { job_scaling, cluster_scaling } => run_init(job_scaling, cluster_scaling)?,
    }

    Ok(())
}

async fn run_agent(config_file: std::path::PathBuf) -> Result<(), Error> {
    tracing::init().context(SetUpTracingSnafu)?;
    let metrics = Arc::new(Metrics::new().context(RegisterMetricsSnafu)?);

    let config = Config::read_from_file(&config_file).context(ReadConfigSnafu)?;
    let replicator_config = config.replicator;

    let state_store = Arc::new(match &replicator_config.state_store {
        StateStoreConfig::InMemory {} => StateStoreImplementation::InMemory(InMemoryStateStore::default()),
        StateStoreConfig::Redis(redis_config) => {
            StateStoreImplementation::Redis(RedisStateStore::new(redis_config).await.context(CreateRedisStateStoreSnafu)?)
        }
    });

    let node_registry = Arc::new(NodeRegistry::default());
    let job_registry = Arc::new(JobPolicyRegistry::default());

    let shutdown = Arc::new(Notify::new());

    let leader = Arc::new(LeaderCandidate::new(
        Arc::clone(&state_store),
        replicator_config.leader_election.lock_key.clone(),
        replicator_config.leader_election.lease_ttl,
    ));

    let app_state = Arc::new(AppState {
        leader: Arc::clone(&leader),
        node_registry: Arc::clone(&node_registry),
        job_registry: Arc::clone(&job_registry),
        state_store: Arc::clone(&state_store),
        metrics: Arc::clone(&metrics),
    });

    let mut http_server = tokio::spawn(start_http_server(
        replicator_config.ports.rpc,
        replicator_config.ports.metrics,
        Arc::clone(&app_state),
        Arc::clone(&shutdown),
    ));

    let mut tasks = spawn_runner(&replicator_config, &state_store, &leader, &node_registry, &job_registry, &metrics, &shutdown);

    loop {
        tokio::select! {
            result = &mut http_server => {
                for task in tasks {
                    task.abort();
                }
                return result.expect("HTTP server task panicked").context(StartHttpServerSnafu);
            }
            signal = wait_for_signal() => match signal {
                SignalOutcome::Shutdown => {
                    info!("Shutdown signal received");
                    shutdown.notify_waiters();
                    break;
                }
                SignalOutcome::Reload => {
                    info!("SIGHUP received, reloading configuration and restarting the runner");
                    for task in tasks.drain(..) {
                        task.abort();
                    }
                    match Config::read_from_file(&config_file) {
                        Ok(reloaded) => {
                            tasks = spawn_runner(&reloaded.replicator, &state_store, &leader, &node_registry, &job_registry, &metrics, &shutdown);
                        }
                        Err(error) => error!(%error, "Failed to reload configuration, runner is stopped until the next SIGHUP"),
                    }
                }
            },
        }
    }

    leader.shutdown().await;
    for task in tasks {
        task.abort();
    }
    http_server.await.expect("HTTP server task panicked").context(StartHttpServerSnafu)?;

    Ok(())
}

/// Spawns the config-driven watchers and scaling engines (§4, §5): the node/job watchers, the
/// leader election loop, and the cluster/job engine ticks, if their resource type is enabled.
/// Returns the handles so a SIGHUP reload can abort and respawn this set without touching the
/// HTTP server or the leader's own lock state.
#[allow(clippy::too_many_arguments)]
fn spawn_runner(
    config: &ReplicatorConfig,
    state_store: &Arc<StateStoreImplementation>,
    leader: &Arc<LeaderCandidate>,
    node_registry: &Arc<NodeRegistry>,
    job_registry: &Arc<JobPolicyRegistry>,
    metrics: &Arc<Metrics>,
    shutdown: &Arc<Notify>,
) -> Vec<JoinHandle<()>> {
    let orchestrator = Arc::new(OrchestratorImplementation::Http(HttpOrchestrator::new(&config.orchestrator)));

    let notifier = Arc::new(match &config.notifier {
        NotifierConfig::Log {} => NotifierImplementation::Log(LogNotifier),
        NotifierConfig::Webhook(webhook_config) => NotifierImplementation::Webhook(WebhookNotifier::new(webhook_config.url.clone())),
    });

    let scaling_provider = match &config.cluster_scaling.provider {
        ScalingProviderConfig::Http(http_config) => Arc::new(ScalingProviderImplementation::Http(HttpScalingProvider::new(http_config))),
    };

    let mut tasks = Vec::new();

    tasks.push(tokio::spawn(watcher::run_node_watcher(Arc::clone(&orchestrator), Arc::clone(node_registry), Arc::clone(shutdown))));
    tasks.push(tokio::spawn(watcher::run_job_watcher(Arc::clone(&orchestrator), Arc::clone(job_registry), Arc::clone(shutdown))));

    tasks.push(tokio::spawn({
        let leader = Arc::clone(leader);
        let shutdown = Arc::clone(shutdown);
        let election_interval = config.leader_election.election_interval;
        async move {
            let mut interval = tokio::time::interval(election_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = interval.tick() => leader.run_election().await,
                    _ = shutdown.notified() => return,
                }
            }
        }
    }));

    if config.cluster_scaling.enabled {
        let engine = Arc::new(ClusterEngine::new(
            Arc::clone(&orchestrator),
            Arc::clone(&scaling_provider),
            Arc::clone(state_store),
            Arc::clone(&notifier),
            Arc::clone(node_registry),
            Arc::clone(job_registry),
            Arc::clone(metrics),
            config.cluster_scaling.scaling_concurrency,
            config.orchestrator.alloc_id_env_var.clone(),
        ));
        let leader = Arc::clone(leader);
        let shutdown = Arc::clone(shutdown);
        let interval_duration = config.cluster_scaling.interval;
        tasks.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(interval_duration);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if leader.is_leader() {
                            engine.tick().await;
                        }
                    }
                    _ = shutdown.notified() => return,
                }
            }
        }));
    }

    if config.job_scaling.enabled {
        let engine = Arc::new(JobEngine::new(
            Arc::clone(&orchestrator),
            Arc::clone(state_store),
            Arc::clone(&notifier),
            Arc::clone(job_registry),
            Arc::clone(metrics),
        ));
        let leader = Arc::clone(leader);
        let shutdown = Arc::clone(shutdown);
        let interval_duration = config.job_scaling.interval;
        tasks.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(interval_duration);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if leader.is_leader() {
                            engine.tick().await;
                        }
                    }
                    _ = shutdown.notified() => return,
                }
            }
        }));
    }

    tasks
}

#[instrument(skip(config_file))]
async fn run_failsafe(config_file: std::path::PathBuf, state_path: String, enable: bool, disable: bool, force: bool) -> Result<(), Error> {
    ensure!(enable != disable, AbortedSnafu);

    let config = Config::read_from_file(&config_file).context(ReadConfigSnafu)?;
    let state_store: StateStoreImplementation = match &config.replicator.state_store {
        StateStoreConfig::InMemory {} => StateStoreImplementation::InMemory(InMemoryStateStore::default()),
        StateStoreConfig::Redis(redis_config) => {
            StateStoreImplementation::Redis(RedisStateStore::new(redis_config).await.context(CreateRedisStateStoreSnafu)?)
        }
    };

    let mut state: ScalingState = state_store
        .read_state(&state_path)
        .await
        .context(ReadStateSnafu { state_path: state_path.clone() })?
        .context(NoStateAtPathSnafu { state_path: state_path.clone() })?;

    if !force {
        print!("{} failsafe mode for {state_path:?}. Continue? [y/N] ", if enable { "Enable" } else { "Disable" });
        std::io::stdout().flush().ok();
        let mut answer = String::new();
        std::io::stdin().read_line(&mut answer).context(ReadConfirmationSnafu)?;
        ensure!(answer.trim().eq_ignore_ascii_case("y"), AbortedSnafu);
    }

    state.failsafe_mode = enable;
    state.failsafe_admin = true;

    state_store.persist_state(&state).await.context(PersistStateSnafu { state_path: state_path.clone() })?;
    info!(%state_path, enabled = enable, "Failsafe mode updated");
    Ok(())
}

fn run_init(job_scaling: bool, cluster_scaling: bool) -> Result<(), Error> {
    if cluster_scaling {
        write_init_file(
            "replicator-cluster-scaling.example",
            "replicator_worker_pool=web\nreplicator_region=us-east-1\nreplicator_provider=aws\n\
             replicator_min=2\nreplicator_max=10\nreplicator_cooldown=300\nreplicator_node_fault_tolerance=1\n\
             replicator_retry_threshold=3\nreplicator_scaling_threshold=3\n",
        )?;
    }
    if job_scaling {
        write_init_file(
            "replicator-job-scaling.example",
            "replicator_enabled=true\nreplicator_min=1\nreplicator_max=5\nreplicator_cooldown=300\n\
             replicator_retry_threshold=3\nreplicator_scaleout_cpu=80\nreplicator_scaleout_mem=80\n\
             replicator_scalein_cpu=20\nreplicator_scalein_mem=20\n",
        )?;
    }
    Ok(())
}

fn write_init_file(path: &str, content: &str) -> Result<(), Error> {
    ensure!(!Path::new(path).exists(), InitTargetExistsSnafu { path });
    std::fs::write(path, content).context(WriteInitFileSnafu { path })?;
    info!(path, "Wrote example metadata file");
    Ok(())
}

enum SignalOutcome {
    Shutdown,
    Reload,
}

#[cfg(unix)]
async fn wait_for_signal() -> SignalOutcome {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    let mut sigquit = signal(SignalKind::quit()).expect("failed to install SIGQUIT handler");
    let mut sighup = signal(SignalKind::hangup()).expect("failed to install SIGHUP handler");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => SignalOutcome::Shutdown,
        _ = sigterm.recv() => SignalOutcome::Shutdown,
        _ = sigquit.recv() => SignalOutcome::Shutdown,
        _ = sighup.recv() => SignalOutcome::Reload,
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> SignalOutcome {
    tokio::signal::ctrl_c().await.ok();
    SignalOutcome::Shutdown
}
