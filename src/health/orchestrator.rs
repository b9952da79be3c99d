use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};

use super::ReadinessCheck;
use crate::metrics::Metrics;
use crate::utils::RetryConfig;

// ============================================================================
// Health Orchestrator - poll-with-backoff readiness engine
// ============================================================================
//
// Polls a readiness predicate until it reports ready, the attempt budget is
// spent, or the wall-clock timeout passes. The timeout is evaluated before
// each poll; an in-flight predicate is never interrupted.
//
// ============================================================================

const PROGRESS_LOG_EVERY: u32 = 5;

/// Readiness budget for one target
#[derive(Clone)]
pub struct HealthCheckSpec {
    pub target_name: String,
    /// Base of the exponential backoff between polls
    pub poll_interval: Duration,
    pub backoff_cap: Duration,
    pub overall_timeout: Duration,
    pub max_attempts: u32,
    pub check: Arc<dyn ReadinessCheck>,
}

impl HealthCheckSpec {
    pub fn new(target_name: impl Into<String>, check: Arc<dyn ReadinessCheck>) -> Self {
        Self {
            target_name: target_name.into(),
            poll_interval: Duration::from_secs(2),
            backoff_cap: Duration::from_secs(10),
            overall_timeout: Duration::from_secs(120),
            max_attempts: 60,
            check,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_backoff_cap(mut self, cap: Duration) -> Self {
        self.backoff_cap = cap;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.overall_timeout = timeout;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }
}

impl std::fmt::Debug for HealthCheckSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthCheckSpec")
            .field("target_name", &self.target_name)
            .field("poll_interval", &self.poll_interval)
            .field("backoff_cap", &self.backoff_cap)
            .field("overall_timeout", &self.overall_timeout)
            .field("max_attempts", &self.max_attempts)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub struct OrchestrationResult {
    pub success: bool,
    pub target_name: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub attempts: u32,
    pub elapsed: Duration,
    pub error: Option<String>,
}

#[derive(Clone, Default)]
pub struct HealthOrchestrator {
    metrics: Option<Arc<Metrics>>,
}

impl HealthOrchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Wait for one target to become healthy
    pub async fn wait_for_healthy(&self, spec: &HealthCheckSpec) -> OrchestrationResult {
        let started_at = Utc::now();
        let clock = Instant::now();
        let backoff = RetryConfig::readiness(spec.poll_interval, spec.backoff_cap);
        let mut attempts = 0u32;
        let mut last_error: Option<String> = None;

        tracing::info!(
            target_name = %spec.target_name,
            max_attempts = spec.max_attempts,
            timeout_ms = spec.overall_timeout.as_millis() as u64,
            "Waiting for target to become healthy"
        );

        while attempts < spec.max_attempts {
            let elapsed = clock.elapsed();
            if elapsed >= spec.overall_timeout {
                let reason = format!("Timeout after {}ms", spec.overall_timeout.as_millis());
                return self.finish(spec, started_at, clock, attempts, Some(reason));
            }

            attempts += 1;

            match spec.check.check().await {
                Ok(true) => {
                    tracing::info!(
                        target_name = %spec.target_name,
                        attempts = attempts,
                        elapsed_ms = clock.elapsed().as_millis() as u64,
                        "Target is healthy"
                    );
                    return self.finish(spec, started_at, clock, attempts, None);
                }
                Ok(false) => {
                    last_error = Some(format!(
                        "Service not yet healthy (attempt {}/{})",
                        attempts, spec.max_attempts
                    ));
                }
                Err(e) => {
                    tracing::debug!(
                        target_name = %spec.target_name,
                        attempt = attempts,
                        error = %e,
                        "Readiness check errored"
                    );
                    last_error = Some(e.to_string());
                }
            }

            if attempts % PROGRESS_LOG_EVERY == 0 {
                tracing::info!(
                    target_name = %spec.target_name,
                    attempt = attempts,
                    elapsed_ms = clock.elapsed().as_millis() as u64,
                    "Still waiting for target"
                );
            }

            if attempts < spec.max_attempts {
                let remaining = spec.overall_timeout.saturating_sub(clock.elapsed());
                sleep(backoff.delay_for(attempts).min(remaining)).await;
            }
        }

        let reason = last_error.unwrap_or_else(|| "Max retries exceeded".to_string());
        self.finish(spec, started_at, clock, attempts, Some(reason))
    }

    /// Wait for all targets concurrently. Siblings are never cancelled; one
    /// result per spec, in input order.
    pub async fn wait_for_multiple(&self, specs: &[HealthCheckSpec]) -> Vec<OrchestrationResult> {
        let results = join_all(specs.iter().map(|spec| self.wait_for_healthy(spec))).await;

        let failed: Vec<&str> = results
            .iter()
            .filter(|r| !r.success)
            .map(|r| r.target_name.as_str())
            .collect();
        if !failed.is_empty() {
            tracing::error!(
                failed = %failed.join(", "),
                count = failed.len(),
                "Targets failed to become healthy"
            );
        }

        results
    }

    /// Wait for targets in order, stopping at the first failure
    pub async fn wait_for_sequential(&self, specs: &[HealthCheckSpec]) -> Vec<OrchestrationResult> {
        let mut results = Vec::with_capacity(specs.len());

        for spec in specs {
            let result = self.wait_for_healthy(spec).await;
            let success = result.success;
            results.push(result);

            if !success {
                tracing::error!(
                    target_name = %spec.target_name,
                    "Target failed, aborting sequential startup"
                );
                break;
            }
        }

        results
    }

    fn finish(
        &self,
        spec: &HealthCheckSpec,
        started_at: DateTime<Utc>,
        clock: Instant,
        attempts: u32,
        error: Option<String>,
    ) -> OrchestrationResult {
        let elapsed = clock.elapsed();
        let success = error.is_none();

        if let Some(ref reason) = error {
            tracing::warn!(
                target_name = %spec.target_name,
                attempts = attempts,
                elapsed_ms = elapsed.as_millis() as u64,
                error = %reason,
                "Target did not become healthy"
            );
        }

        if let Some(ref metrics) = self.metrics {
            metrics.record_health_wait(&spec.target_name, success, attempts, elapsed);
        }

        OrchestrationResult {
            success,
            target_name: spec.target_name.clone(),
            started_at,
            ended_at: Utc::now(),
            attempts,
            elapsed,
            error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Ready after `ready_after` calls; `None` never becomes ready
    struct ScriptedCheck {
        calls: AtomicU32,
        ready_after: Option<u32>,
        fail_with_error: bool,
    }

    impl ScriptedCheck {
        fn ready_after(n: u32) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicU32::new(0),
                ready_after: Some(n),
                fail_with_error: false,
            })
        }

        fn never() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicU32::new(0),
                ready_after: None,
                fail_with_error: false,
            })
        }

        fn erroring() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicU32::new(0),
                ready_after: None,
                fail_with_error: true,
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ReadinessCheck for ScriptedCheck {
        async fn check(&self) -> anyhow::Result<bool> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail_with_error {
                anyhow::bail!("connection refused");
            }
            Ok(self.ready_after.map(|n| call >= n).unwrap_or(false))
        }
    }

    fn spec(name: &str, check: Arc<ScriptedCheck>) -> HealthCheckSpec {
        HealthCheckSpec::new(name, check)
            .with_poll_interval(Duration::from_millis(100))
            .with_backoff_cap(Duration::from_secs(1))
            .with_timeout(Duration::from_secs(60))
            .with_max_attempts(10)
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_on_first_ready_poll() {
        let check = ScriptedCheck::ready_after(3);
        let result = HealthOrchestrator::new()
            .wait_for_healthy(&spec("postgres", check.clone()))
            .await;

        assert!(result.success);
        assert_eq!(result.attempts, 3);
        assert_eq!(check.calls(), 3);
        assert!(result.error.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempts_exhausted() {
        let check = ScriptedCheck::never();
        let result = HealthOrchestrator::new()
            .wait_for_healthy(&spec("redis", check.clone()))
            .await;

        assert!(!result.success);
        assert_eq!(result.attempts, 10);
        assert_eq!(check.calls(), 10);
        assert_eq!(
            result.error.as_deref(),
            Some("Service not yet healthy (attempt 10/10)")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_fires_with_attempts_remaining() {
        let check = ScriptedCheck::never();
        let spec = spec("postgres", check.clone())
            .with_timeout(Duration::from_secs(3))
            .with_max_attempts(1_000);

        let result = HealthOrchestrator::new().wait_for_healthy(&spec).await;

        assert!(!result.success);
        assert!(result.attempts < 1_000);
        assert!(result.elapsed >= Duration::from_secs(3));
        assert_eq!(result.error.as_deref(), Some("Timeout after 3000ms"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_predicate_errors_are_recorded_not_propagated() {
        let check = ScriptedCheck::erroring();
        let result = HealthOrchestrator::new()
            .wait_for_healthy(&spec("redis", check.clone()).with_max_attempts(4))
            .await;

        assert!(!result.success);
        assert_eq!(result.attempts, 4);
        assert_eq!(result.error.as_deref(), Some("connection refused"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_attempts_never_polls() {
        let check = ScriptedCheck::ready_after(1);
        let result = HealthOrchestrator::new()
            .wait_for_healthy(&spec("noop", check.clone()).with_max_attempts(0))
            .await;

        assert!(!result.success);
        assert_eq!(result.attempts, 0);
        assert_eq!(check.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sequential_stops_at_first_failure() {
        let a = ScriptedCheck::ready_after(1);
        let b = ScriptedCheck::never();
        let c = ScriptedCheck::ready_after(1);

        let specs = vec![
            spec("a", a.clone()),
            spec("b", b.clone()).with_max_attempts(2),
            spec("c", c.clone()),
        ];

        let results = HealthOrchestrator::new().wait_for_sequential(&specs).await;

        assert_eq!(results.len(), 2);
        assert!(results[0].success);
        assert!(!results[1].success);
        assert_eq!(c.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_multiple_runs_all_to_completion() {
        let a = ScriptedCheck::never();
        let b = ScriptedCheck::ready_after(4);

        let specs = vec![
            spec("a", a.clone()).with_max_attempts(3),
            spec("b", b.clone()),
        ];

        let results = HealthOrchestrator::new().wait_for_multiple(&specs).await;

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].target_name, "a");
        assert!(!results[0].success);
        assert_eq!(a.calls(), 3);
        assert!(results[1].success);
        assert_eq!(b.calls(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_metrics_recorded_per_wait() {
        let metrics = Arc::new(Metrics::new().unwrap());
        let orchestrator = HealthOrchestrator::new().with_metrics(metrics.clone());

        orchestrator
            .wait_for_healthy(&spec("postgres", ScriptedCheck::ready_after(2)))
            .await;

        let count = metrics
            .health_waits_total
            .with_label_values(&["postgres", "success"])
            .get();
        assert_eq!(count, 1);
    }
}
