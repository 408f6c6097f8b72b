use prometheus::{IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry};
use snafu::{ResultExt, Snafu};

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(display("Failed to register {metric} metric"))]
    RegisterMetric {
        source: prometheus::Error,
        metric: &'static str,
    },
}

pub struct Metrics {
    pub registry: Registry,

    pub is_leader: IntGauge,
    pub scaling_decisions_total: IntCounterVec,
    pub failsafe_trips_total: IntCounterVec,
    pub failsafe_active: IntGaugeVec,
    pub watcher_errors_total: IntCounterVec,
}

impl Metrics {
    pub fn new() -> Result<Self, Error> {
        let registry = Registry::new();

        let is_leader = IntGauge::new("replicator_is_leader", "Whether this replica currently holds the leader lease")
            .context(RegisterMetricSnafu { metric: "replicator_is_leader" })?;
        registry
            .register(Box::new(is_leader.clone()))
            .context(RegisterMetricSnafu { metric: "replicator_is_leader" })?;

        let scaling_decisions_total = IntCounterVec::new(
            Opts::new("replicator_scaling_decisions_total", "Scaling decisions executed, by resource and direction"),
            &["resource_type", "resource", "direction"],
        )
        .context(RegisterMetricSnafu { metric: "replicator_scaling_decisions_total" })?;
        registry
            .register(Box::new(scaling_decisions_total.clone()))
            .context(RegisterMetricSnafu { metric: "replicator_scaling_decisions_total" })?;

        let failsafe_trips_total = IntCounterVec::new(
            Opts::new("replicator_failsafe_trips_total", "Number of times the failsafe circuit breaker tripped"),
            &["resource_type", "resource"],
        )
        .context(RegisterMetricSnafu { metric: "replicator_failsafe_trips_total" })?;
        registry
            .register(Box::new(failsafe_trips_total.clone()))
            .context(RegisterMetricSnafu { metric: "replicator_failsafe_trips_total" })?;

        let failsafe_active = IntGaugeVec::new(
            Opts::new("replicator_failsafe_active", "Whether the failsafe circuit breaker is currently tripped"),
            &["resource_type", "resource"],
        )
        .context(RegisterMetricSnafu { metric: "replicator_failsafe_active" })?;
        registry
            .register(Box::new(failsafe_active.clone()))
            .context(RegisterMetricSnafu { metric: "replicator_failsafe_active" })?;

        let watcher_errors_total = IntCounterVec::new(
            Opts::new("replicator_watcher_errors_total", "Transient watcher errors, by watcher"),
            &["watcher"],
        )
        .context(RegisterMetricSnafu { metric: "replicator_watcher_errors_total" })?;
        registry
            .register(Box::new(watcher_errors_total.clone()))
            .context(RegisterMetricSnafu { metric: "replicator_watcher_errors_total" })?;

        Ok(Self {
            registry,
            is_leader,
            scaling_decisions_total,
            failsafe_trips_total,
            failsafe_active,
            watcher_errors_total,
        })
    }
}
