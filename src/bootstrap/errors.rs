use thiserror::Error;

/// The step graph itself is malformed; nothing has run
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BootstrapError {
    #[error("duplicate bootstrap step: {0}")]
    DuplicateStep(String),

    #[error("step '{step}' depends on unknown step '{dependency}'")]
    UnknownDependency { step: String, dependency: String },

    #[error("dependency cycle between steps: {}", .0.join(", "))]
    Cycle(Vec<String>),
}
