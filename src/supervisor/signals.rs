//! OS signal forwarding for the supervisor.
//!
//! Handlers do nothing but enqueue a command:
//! - **SIGHUP**  -> graceful restart of the child
//! - **SIGTERM** -> shutdown
//! - **SIGINT**  -> shutdown (Ctrl-C in a terminal)

use tokio::signal::unix::{signal, SignalKind};
use tokio::task::JoinHandle;

use super::SupervisorHandle;

pub fn forward_signals(handle: SupervisorHandle) -> std::io::Result<JoinHandle<()>> {
    let mut sighup = signal(SignalKind::hangup())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    Ok(tokio::spawn(async move {
        loop {
            tokio::select! {
                Some(()) = sighup.recv() => {
                    tracing::info!("SIGHUP received, restarting child");
                    handle.restart();
                }
                Some(()) = sigterm.recv() => {
                    tracing::info!("SIGTERM received, shutting down");
                    handle.shutdown();
                }
                Some(()) = sigint.recv() => {
                    tracing::info!("SIGINT received, shutting down");
                    handle.shutdown();
                }
                else => break,
            }
        }
    }))
}
