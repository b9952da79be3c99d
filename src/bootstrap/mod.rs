// ============================================================================
// Bootstrap Module
// ============================================================================
//
// - step/          - typed step descriptors, policies, run records
// - sequencer/     - validates the graph and runs it level by level
// - plan/          - the fixed startup graph of the control plane
// - collaborators/ - seams for migration, proxy, features, serving, worker
// - recovery/      - post-serve failure marker
//
// ============================================================================

mod collaborators;
mod errors;
pub mod plan;
mod recovery;
mod sequencer;
mod step;

use std::path::Path;

pub use collaborators::{
    BackgroundWorker, ProxyInstaller, RestartNotifier, SchemaMigrator, StartupFeature,
    TrafficListener,
};
pub use errors::BootstrapError;
pub use plan::{bootstrap_steps, AuxiliaryFeatures, StartupContext};
pub use recovery::write_recovery_marker;
pub use sequencer::BootstrapSequencer;
pub use step::{
    BootstrapFailure, BootstrapReport, BootstrapStep, Phase, StepFuture, StepPolicy, StepRecord,
    StepStatus,
};

/// Process exit code for a failed bootstrap. In-flight failures leave the
/// recovery marker behind first.
pub async fn exit_code_for(failure: &BootstrapFailure, recovery_marker: &Path) -> i32 {
    match failure.phase {
        Phase::PreServe => {
            tracing::error!(step = %failure.step, error = %failure.reason, "Bootstrap failed before serving, exiting");
        }
        Phase::InFlight => {
            tracing::error!(step = %failure.step, error = %failure.reason, "Fatal error after serving started");
            write_recovery_marker(recovery_marker).await;
        }
    }
    1
}
