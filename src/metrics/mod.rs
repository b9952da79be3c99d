use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry};
use std::time::Duration;

// ============================================================================
// Metrics Module - Prometheus metrics for the control plane
// ============================================================================
//
// Covers:
// - Bootstrap step outcomes and durations
// - Readiness waits (outcome, attempts, duration)
// - Service reconciliation outcomes
// - Detected container-runtime mode
//
// Exposed on /metrics by the traffic listener once serving starts.
// ============================================================================

pub struct Metrics {
    registry: Registry,

    // Bootstrap
    pub bootstrap_steps_total: IntCounterVec,
    pub bootstrap_step_duration: HistogramVec,

    // Readiness
    pub health_waits_total: IntCounterVec,
    pub health_poll_attempts_total: IntCounterVec,
    pub health_wait_duration: HistogramVec,

    // Reconciliation
    pub reconcile_outcomes_total: IntCounterVec,

    // Runtime
    pub runtime_mode: IntGauge,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let bootstrap_steps_total = IntCounterVec::new(
            Opts::new("bootstrap_steps_total", "Bootstrap steps by outcome"),
            &["step", "policy", "status"],
        )?;
        registry.register(Box::new(bootstrap_steps_total.clone()))?;

        let bootstrap_step_duration = HistogramVec::new(
            HistogramOpts::new("bootstrap_step_duration_seconds", "Bootstrap step duration")
                .buckets(vec![0.01, 0.1, 0.5, 1.0, 5.0, 15.0, 30.0, 60.0, 180.0, 300.0]),
            &["step"],
        )?;
        registry.register(Box::new(bootstrap_step_duration.clone()))?;

        let health_waits_total = IntCounterVec::new(
            Opts::new("health_waits_total", "Readiness waits by outcome"),
            &["target", "result"],
        )?;
        registry.register(Box::new(health_waits_total.clone()))?;

        let health_poll_attempts_total = IntCounterVec::new(
            Opts::new("health_poll_attempts_total", "Readiness predicate invocations"),
            &["target"],
        )?;
        registry.register(Box::new(health_poll_attempts_total.clone()))?;

        let health_wait_duration = HistogramVec::new(
            HistogramOpts::new("health_wait_duration_seconds", "Time spent waiting for readiness")
                .buckets(vec![0.1, 1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0]),
            &["target"],
        )?;
        registry.register(Box::new(health_wait_duration.clone()))?;

        let reconcile_outcomes_total = IntCounterVec::new(
            Opts::new("reconcile_outcomes_total", "Service reconciliation outcomes"),
            &["service", "outcome"],
        )?;
        registry.register(Box::new(reconcile_outcomes_total.clone()))?;

        let runtime_mode = IntGauge::new(
            "runtime_mode",
            "Detected container runtime mode (0=Unknown, 1=Socket, 2=EmbeddedDaemon)",
        )?;
        registry.register(Box::new(runtime_mode.clone()))?;

        Ok(Self {
            registry,
            bootstrap_steps_total,
            bootstrap_step_duration,
            health_waits_total,
            health_poll_attempts_total,
            health_wait_duration,
            reconcile_outcomes_total,
            runtime_mode,
        })
    }

    /// Get the Prometheus registry for exposing metrics via HTTP
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_step(&self, step: &str, policy: &str, status: &str, duration: Duration) {
        self.bootstrap_steps_total
            .with_label_values(&[step, policy, status])
            .inc();
        self.bootstrap_step_duration
            .with_label_values(&[step])
            .observe(duration.as_secs_f64());
    }

    pub fn record_health_wait(&self, target: &str, success: bool, attempts: u32, elapsed: Duration) {
        let result = if success { "success" } else { "failure" };
        self.health_waits_total.with_label_values(&[target, result]).inc();
        self.health_poll_attempts_total
            .with_label_values(&[target])
            .inc_by(u64::from(attempts));
        self.health_wait_duration
            .with_label_values(&[target])
            .observe(elapsed.as_secs_f64());
    }

    pub fn record_reconcile(&self, service: &str, outcome: &str) {
        self.reconcile_outcomes_total
            .with_label_values(&[service, outcome])
            .inc();
    }

    pub fn set_runtime_mode(&self, code: i64) {
        self.runtime_mode.set(code);
    }
}
