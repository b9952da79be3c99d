use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::path::PathBuf;
use tokio::process::Command;

use super::SupervisorError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildSignal {
    /// Ask the child to stop (SIGTERM)
    Terminate,
    /// Stop it now (SIGKILL)
    Kill,
}

/// A started child: its pid and a future resolving to its exit code
/// (`None` when killed by a signal or when the code is unknown)
pub struct SpawnedChild {
    pub pid: u32,
    pub exit: BoxFuture<'static, Option<i32>>,
}

/// How the supervisor starts and signals its child
pub trait ChildLauncher: Send {
    fn spawn(&mut self) -> Result<SpawnedChild, SupervisorError>;

    /// Signalling a child that already exited is not an error
    fn signal(&self, pid: u32, signal: ChildSignal) -> Result<(), SupervisorError>;
}

/// Runs a program as an OS process with inherited stdio
pub struct CommandLauncher {
    program: String,
    args: Vec<String>,
    workdir: Option<PathBuf>,
}

impl CommandLauncher {
    pub fn new(program: impl Into<String>, args: Vec<String>, workdir: Option<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args,
            workdir,
        }
    }
}

impl ChildLauncher for CommandLauncher {
    fn spawn(&mut self) -> Result<SpawnedChild, SupervisorError> {
        let mut command = Command::new(&self.program);
        command.args(&self.args);
        if let Some(ref dir) = self.workdir {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|source| SupervisorError::Spawn {
            program: self.program.clone(),
            source,
        })?;
        let pid = child.id().ok_or(SupervisorError::ExitedBeforeStart)?;

        let exit = async move {
            match child.wait().await {
                Ok(status) => status.code(),
                Err(e) => {
                    tracing::warn!(pid = pid, error = %e, "Failed to wait on child");
                    None
                }
            }
        }
        .boxed();

        Ok(SpawnedChild { pid, exit })
    }

    fn signal(&self, pid: u32, signal: ChildSignal) -> Result<(), SupervisorError> {
        let raw = i32::try_from(pid).map_err(|_| SupervisorError::InvalidPid(pid))?;
        let sig = match signal {
            ChildSignal::Terminate => Signal::SIGTERM,
            ChildSignal::Kill => Signal::SIGKILL,
        };

        match kill(Pid::from_raw(raw), sig) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(source) => Err(SupervisorError::Signal { pid, source }),
        }
    }
}
