use futures_util::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use super::errors::BootstrapError;
use super::step::{
    BootstrapFailure, BootstrapReport, BootstrapStep, Phase, StepPolicy, StepRecord, StepStatus,
};
use crate::metrics::Metrics;

// ============================================================================
// Bootstrap Sequencer - generic runner for the startup graph
// ============================================================================
//
// 1. Validate: unique names, known dependencies, no cycles
// 2. Group steps into dependency levels
// 3. Run each level concurrently (bounded by max_parallel); every member
//    runs to completion before the level is judged
// 4. Any fail-fast failure ends the run after its level; later levels never
//    start. Best-effort failures are recorded only.
//
// Once a traffic-serving step has succeeded, later failures are reported as
// in-flight. A serving step that fails itself never exposed anything.
//
// ============================================================================

pub struct BootstrapSequencer {
    max_parallel: usize,
    metrics: Option<Arc<Metrics>>,
}

impl BootstrapSequencer {
    pub fn new(max_parallel: usize) -> Self {
        Self {
            max_parallel: max_parallel.max(1),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Dependency levels as indices into `steps`, each level in input order
    pub fn levels(steps: &[BootstrapStep]) -> Result<Vec<Vec<usize>>, BootstrapError> {
        let mut index: HashMap<&str, usize> = HashMap::with_capacity(steps.len());
        for (i, step) in steps.iter().enumerate() {
            if index.insert(step.name(), i).is_some() {
                return Err(BootstrapError::DuplicateStep(step.name().to_string()));
            }
        }

        let mut indegree = vec![0usize; steps.len()];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); steps.len()];
        for (i, step) in steps.iter().enumerate() {
            for dependency in step.dependencies() {
                let &d = index.get(dependency.as_str()).ok_or_else(|| {
                    BootstrapError::UnknownDependency {
                        step: step.name().to_string(),
                        dependency: dependency.clone(),
                    }
                })?;
                indegree[i] += 1;
                dependents[d].push(i);
            }
        }

        let mut levels = Vec::new();
        let mut placed = 0;
        let mut current: Vec<usize> = (0..steps.len()).filter(|&i| indegree[i] == 0).collect();

        while !current.is_empty() {
            placed += current.len();
            let mut next = Vec::new();
            for &i in &current {
                for &j in &dependents[i] {
                    indegree[j] -= 1;
                    if indegree[j] == 0 {
                        next.push(j);
                    }
                }
            }
            next.sort_unstable();
            levels.push(current);
            current = next;
        }

        if placed < steps.len() {
            let stuck = (0..steps.len())
                .filter(|&i| indegree[i] > 0)
                .map(|i| steps[i].name().to_string())
                .collect();
            return Err(BootstrapError::Cycle(stuck));
        }

        Ok(levels)
    }

    pub async fn run(&self, steps: Vec<BootstrapStep>) -> Result<BootstrapReport, BootstrapError> {
        let levels = Self::levels(&steps)?;
        let started = Instant::now();
        let mut slots: Vec<Option<BootstrapStep>> = steps.into_iter().map(Some).collect();
        let mut report = BootstrapReport::default();
        let mut serving = false;

        tracing::info!(
            steps = slots.len(),
            levels = levels.len(),
            max_parallel = self.max_parallel,
            "Starting bootstrap sequence"
        );

        for (depth, level) in levels.into_iter().enumerate() {
            let batch: Vec<BootstrapStep> = level.iter().filter_map(|&i| slots[i].take()).collect();

            tracing::debug!(
                level = depth,
                steps = %batch.iter().map(|s| s.name()).collect::<Vec<_>>().join(", "),
                "Running bootstrap level"
            );

            let mut outcomes: Vec<(usize, bool, StepRecord)> = stream::iter(batch.into_iter().enumerate())
                .map(|(position, step)| async move {
                    let serving_step = step.is_enabled() && step.is_serving();
                    let record = Self::execute(step).await;
                    let serves = serving_step && record.status == StepStatus::Succeeded;
                    (position, serves, record)
                })
                .buffer_unordered(self.max_parallel)
                .collect()
                .await;
            outcomes.sort_by_key(|(position, _, _)| *position);

            let serving_before = serving;
            for (_, serves, record) in outcomes {
                serving |= serves;

                if let Some(ref metrics) = self.metrics {
                    metrics.record_step(
                        &record.name,
                        record.policy.as_str(),
                        record.status.as_str(),
                        record.duration,
                    );
                }

                if report.failure.is_none() && record.policy == StepPolicy::FailFast {
                    if let StepStatus::Failed(ref reason) = record.status {
                        report.failure = Some(BootstrapFailure {
                            step: record.name.clone(),
                            reason: reason.clone(),
                            phase: if serving_before || serves {
                                Phase::InFlight
                            } else {
                                Phase::PreServe
                            },
                        });
                    }
                }

                report.records.push(record);
            }

            if let Some(ref failure) = report.failure {
                tracing::error!(
                    step = %failure.step,
                    phase = ?failure.phase,
                    error = %failure.reason,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Bootstrap aborted"
                );
                return Ok(report);
            }
        }

        tracing::info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Bootstrap sequence complete"
        );
        Ok(report)
    }

    async fn execute(step: BootstrapStep) -> StepRecord {
        let name = step.name().to_string();
        let policy = step.policy();

        if !step.is_enabled() {
            tracing::debug!(step = %name, "Step disabled for this deployment, skipping");
            return StepRecord {
                name,
                policy,
                status: StepStatus::Skipped,
                duration: Duration::ZERO,
            };
        }

        tracing::info!(step = %name, policy = policy.as_str(), "Running bootstrap step");
        let started = Instant::now();
        let result = (step.into_action())().await;
        let duration = started.elapsed();

        let status = match result {
            Ok(()) => {
                tracing::info!(step = %name, duration_ms = duration.as_millis() as u64, "✅ Step complete");
                StepStatus::Succeeded
            }
            Err(e) => {
                let reason = format!("{:#}", e);
                match policy {
                    StepPolicy::FailFast => {
                        tracing::error!(step = %name, error = %reason, "Fail-fast step failed")
                    }
                    StepPolicy::BestEffort => {
                        tracing::warn!(step = %name, error = %reason, "Best-effort step failed, continuing")
                    }
                }
                StepStatus::Failed(reason)
            }
        };

        StepRecord {
            name,
            policy,
            status,
            duration,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    type Journal = Arc<Mutex<Vec<String>>>;

    fn journal() -> Journal {
        Arc::new(Mutex::new(Vec::new()))
    }

    fn ok(journal: &Journal, name: &str) -> BootstrapStep {
        let journal = journal.clone();
        let entry = name.to_string();
        BootstrapStep::fail_fast(name, move || async move {
            journal.lock().unwrap().push(entry);
            Ok(())
        })
    }

    fn failing(journal: &Journal, name: &str, policy: StepPolicy) -> BootstrapStep {
        let journal = journal.clone();
        let entry = name.to_string();
        BootstrapStep::new(name, policy, move || async move {
            journal.lock().unwrap().push(entry);
            anyhow::bail!("boom")
        })
    }

    fn sleeping(journal: &Journal, name: &str, delay: Duration) -> BootstrapStep {
        let journal = journal.clone();
        let entry = name.to_string();
        BootstrapStep::fail_fast(name, move || async move {
            tokio::time::sleep(delay).await;
            journal.lock().unwrap().push(entry);
            Ok(())
        })
    }

    #[test]
    fn test_levels_follow_dependencies() {
        let j = journal();
        let steps = vec![
            ok(&j, "c").depends_on(["a", "b"]),
            ok(&j, "a"),
            ok(&j, "b").depends_on(["a"]),
            ok(&j, "d").depends_on(["a"]),
        ];

        let levels = BootstrapSequencer::levels(&steps).unwrap();
        assert_eq!(levels, vec![vec![1], vec![2, 3], vec![0]]);
    }

    #[test]
    fn test_rejects_duplicates_unknown_and_cycles() {
        let j = journal();

        let dup = vec![ok(&j, "a"), ok(&j, "a")];
        assert_eq!(
            BootstrapSequencer::levels(&dup),
            Err(BootstrapError::DuplicateStep("a".into()))
        );

        let unknown = vec![ok(&j, "a").depends_on(["ghost"])];
        assert!(matches!(
            BootstrapSequencer::levels(&unknown),
            Err(BootstrapError::UnknownDependency { .. })
        ));

        let cycle = vec![
            ok(&j, "root"),
            ok(&j, "a").depends_on(["root", "b"]),
            ok(&j, "b").depends_on(["a"]),
        ];
        assert_eq!(
            BootstrapSequencer::levels(&cycle),
            Err(BootstrapError::Cycle(vec!["a".into(), "b".into()]))
        );
    }

    #[tokio::test]
    async fn test_invalid_graph_runs_nothing() {
        let j = journal();
        let steps = vec![ok(&j, "a").depends_on(["b"]), ok(&j, "b").depends_on(["a"])];

        let result = BootstrapSequencer::new(3).run(steps).await;
        assert!(result.is_err());
        assert!(j.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_fail_fast_waits_for_siblings_then_stops() {
        let j = journal();
        let steps = vec![
            ok(&j, "root"),
            failing(&j, "datastore", StepPolicy::FailFast).depends_on(["root"]),
            sleeping(&j, "cache", Duration::from_secs(3)).depends_on(["root"]),
            ok(&j, "migrate").depends_on(["datastore", "cache"]),
        ];

        let report = BootstrapSequencer::new(3).run(steps).await.unwrap();

        let failure = report.failure.clone().unwrap();
        assert_eq!(failure.step, "datastore");
        assert_eq!(failure.phase, Phase::PreServe);
        assert_eq!(failure.reason, "boom");

        let ran = j.lock().unwrap().clone();
        assert!(ran.contains(&"cache".to_string()));
        assert!(!ran.contains(&"migrate".to_string()));
        assert!(report.record("migrate").is_none());
    }

    #[tokio::test]
    async fn test_best_effort_failure_is_isolated() {
        let j = journal();
        let steps = vec![
            failing(&j, "backup-crons", StepPolicy::BestEffort),
            ok(&j, "schedules"),
            ok(&j, "serve").depends_on(["backup-crons", "schedules"]),
        ];

        let report = BootstrapSequencer::new(3).run(steps).await.unwrap();

        assert!(report.is_success());
        assert!(report.ran("serve"));
        assert_eq!(
            report.record("backup-crons").unwrap().status,
            StepStatus::Failed("boom".into())
        );
    }

    #[tokio::test]
    async fn test_disabled_steps_are_skipped_but_satisfy_dependents() {
        let j = journal();
        let steps = vec![
            ok(&j, "network").when(false),
            ok(&j, "migrate").depends_on(["network"]),
        ];

        let report = BootstrapSequencer::new(3).run(steps).await.unwrap();

        assert!(report.is_success());
        assert_eq!(report.record("network").unwrap().status, StepStatus::Skipped);
        assert_eq!(*j.lock().unwrap(), vec!["migrate".to_string()]);
    }

    #[tokio::test]
    async fn test_failure_after_serving_is_in_flight() {
        let j = journal();
        let steps = vec![
            ok(&j, "serve").serves_traffic(),
            failing(&j, "worker", StepPolicy::FailFast).depends_on(["serve"]),
        ];

        let report = BootstrapSequencer::new(3).run(steps).await.unwrap();

        assert_eq!(report.failure.unwrap().phase, Phase::InFlight);
    }

    #[tokio::test]
    async fn test_failed_serving_step_is_pre_serve() {
        let j = journal();
        let steps = vec![
            ok(&j, "migrate"),
            failing(&j, "serve", StepPolicy::FailFast)
                .depends_on(["migrate"])
                .serves_traffic(),
            ok(&j, "worker").depends_on(["serve"]),
        ];

        let report = BootstrapSequencer::new(3).run(steps).await.unwrap();

        let failure = report.failure.unwrap();
        assert_eq!(failure.step, "serve");
        assert_eq!(failure.phase, Phase::PreServe);
        assert!(!j.lock().unwrap().contains(&"worker".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_parallelism_is_bounded() {
        let j = journal();
        let steps = (0..4)
            .map(|i| sleeping(&j, &format!("step-{}", i), Duration::from_secs(1)))
            .collect();

        let started = Instant::now();
        let report = BootstrapSequencer::new(2).run(steps).await.unwrap();

        assert!(report.is_success());
        assert_eq!(j.lock().unwrap().len(), 4);
        assert!(started.elapsed() >= Duration::from_secs(2));
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_step_metrics_recorded() {
        let metrics = Arc::new(Metrics::new().unwrap());
        let j = journal();
        let steps = vec![ok(&j, "a"), failing(&j, "b", StepPolicy::BestEffort)];

        BootstrapSequencer::new(3)
            .with_metrics(metrics.clone())
            .run(steps)
            .await
            .unwrap();

        assert_eq!(
            metrics
                .bootstrap_steps_total
                .with_label_values(&["b", "best-effort", "failed"])
                .get(),
            1
        );
    }
}
