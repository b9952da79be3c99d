use futures_util::future::BoxFuture;
use serde::Serialize;
use std::future::Future;
use std::time::Duration;

pub type StepFuture = BoxFuture<'static, anyhow::Result<()>>;
type StepAction = Box<dyn FnOnce() -> StepFuture + Send>;

/// What a step failure does to the rest of the run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum StepPolicy {
    /// Stop the run after the current level
    FailFast,
    /// Log, record, and carry on
    BestEffort,
}

impl StepPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepPolicy::FailFast => "fail-fast",
            StepPolicy::BestEffort => "best-effort",
        }
    }
}

/// One node of the startup graph.
///
/// A step is a descriptor plus a one-shot action; the sequencer owns
/// ordering. Disabled steps are recorded as skipped and still satisfy their
/// dependents.
pub struct BootstrapStep {
    name: String,
    policy: StepPolicy,
    depends_on: Vec<String>,
    enabled: bool,
    serves_traffic: bool,
    action: StepAction,
}

impl BootstrapStep {
    pub fn new<F, Fut>(name: impl Into<String>, policy: StepPolicy, action: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self {
            name: name.into(),
            policy,
            depends_on: Vec::new(),
            enabled: true,
            serves_traffic: false,
            action: Box::new(move || Box::pin(action())),
        }
    }

    pub fn fail_fast<F, Fut>(name: impl Into<String>, action: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self::new(name, StepPolicy::FailFast, action)
    }

    pub fn best_effort<F, Fut>(name: impl Into<String>, action: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self::new(name, StepPolicy::BestEffort, action)
    }

    pub fn depends_on<I, S>(mut self, steps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on.extend(steps.into_iter().map(Into::into));
        self
    }

    pub fn when(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Failures from this step onward happen with traffic exposed
    pub fn serves_traffic(mut self) -> Self {
        self.serves_traffic = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn policy(&self) -> StepPolicy {
        self.policy
    }

    pub fn dependencies(&self) -> &[String] {
        &self.depends_on
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn is_serving(&self) -> bool {
        self.serves_traffic
    }

    pub(crate) fn into_action(self) -> StepAction {
        self.action
    }
}

impl std::fmt::Debug for BootstrapStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BootstrapStep")
            .field("name", &self.name)
            .field("policy", &self.policy)
            .field("depends_on", &self.depends_on)
            .field("enabled", &self.enabled)
            .field("serves_traffic", &self.serves_traffic)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "lowercase")]
pub enum StepStatus {
    Succeeded,
    Failed(String),
    Skipped,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Succeeded => "succeeded",
            StepStatus::Failed(_) => "failed",
            StepStatus::Skipped => "skipped",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StepRecord {
    pub name: String,
    pub policy: StepPolicy,
    pub status: StepStatus,
    pub duration: Duration,
}

/// Whether anything had been exposed to traffic when a failure happened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    PreServe,
    InFlight,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BootstrapFailure {
    pub step: String,
    pub reason: String,
    pub phase: Phase,
}

impl std::fmt::Display for BootstrapFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "step '{}' failed: {}", self.step, self.reason)
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BootstrapReport {
    pub records: Vec<StepRecord>,
    pub failure: Option<BootstrapFailure>,
}

impl BootstrapReport {
    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }

    pub fn record(&self, step: &str) -> Option<&StepRecord> {
        self.records.iter().find(|r| r.name == step)
    }

    /// True when the step's action was actually invoked
    pub fn ran(&self, step: &str) -> bool {
        self.record(step)
            .map(|r| r.status != StepStatus::Skipped)
            .unwrap_or(false)
    }
}
