use platform_controlplane::config::SupervisorSettings;
use platform_controlplane::supervisor::{forward_signals, CommandLauncher, Supervisor, SupervisorConfig};

#[tokio::main(flavor = "current_thread")]
async fn main() {
    platform_controlplane::init_tracing(false);

    let settings = match SupervisorSettings::from_env() {
        Ok(settings) => settings,
        Err(e) => {
            tracing::error!(error = %e, "❌ Invalid supervisor configuration");
            std::process::exit(1);
        }
    };

    tracing::info!(program = %settings.program, args = ?settings.args, "🚀 Starting supervisor");

    let launcher = CommandLauncher::new(settings.program, settings.args, settings.workdir);
    let supervisor = Supervisor::new(Box::new(launcher), SupervisorConfig::default());

    let _signals = match forward_signals(supervisor.handle()) {
        Ok(task) => task,
        Err(e) => {
            tracing::error!(error = %e, "❌ Cannot install signal handlers");
            std::process::exit(1);
        }
    };

    std::process::exit(supervisor.run().await);
}
