use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use super::ClusterApi;

// ============================================================================
// Runtime Mode Detection
// ============================================================================
//
// Classifies how the control plane reaches the container runtime:
//
//   socket present + ping ok + list ok   -> Socket         (host control plane)
//   socket present + ping ok + list err  -> EmbeddedDaemon (isolated socket)
//   socket present + ping err            -> Unknown
//   no socket      + embedded ping ok    -> EmbeddedDaemon
//   no socket      + embedded ping err   -> Unknown
//
// Read-only; never fails.
//
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RuntimeMode {
    Socket,
    EmbeddedDaemon,
    Unknown,
}

impl RuntimeMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuntimeMode::Socket => "socket",
            RuntimeMode::EmbeddedDaemon => "embedded-daemon",
            RuntimeMode::Unknown => "unknown",
        }
    }

    /// Gauge encoding used by the `runtime_mode` metric
    pub fn code(&self) -> i64 {
        match self {
            RuntimeMode::Unknown => 0,
            RuntimeMode::Socket => 1,
            RuntimeMode::EmbeddedDaemon => 2,
        }
    }

    pub fn tuning(self) -> RuntimeTuning {
        RuntimeTuning {
            mode: self,
            // Embedded daemons need longer to settle after a service change
            startup_buffer: match self {
                RuntimeMode::EmbeddedDaemon => Duration::from_millis(1000),
                _ => Duration::from_millis(500),
            },
            max_parallel: match self {
                RuntimeMode::Socket => 5,
                _ => 3,
            },
        }
    }
}

impl std::fmt::Display for RuntimeMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Values derived from the runtime mode and consumed by the reconciler and
/// the bootstrap sequencer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeTuning {
    pub mode: RuntimeMode,
    pub startup_buffer: Duration,
    pub max_parallel: usize,
}

pub struct RuntimeModeDetector {
    socket_path: PathBuf,
    socket_api: Option<Arc<dyn ClusterApi>>,
    embedded_api: Option<Arc<dyn ClusterApi>>,
}

impl RuntimeModeDetector {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            socket_api: None,
            embedded_api: None,
        }
    }

    /// Client that talks through the well-known local socket
    pub fn with_socket_api(mut self, api: Arc<dyn ClusterApi>) -> Self {
        self.socket_api = Some(api);
        self
    }

    /// Client that talks to an embedded daemon directly
    pub fn with_embedded_api(mut self, api: Arc<dyn ClusterApi>) -> Self {
        self.embedded_api = Some(api);
        self
    }

    pub async fn detect(&self) -> RuntimeMode {
        if tokio::fs::try_exists(&self.socket_path).await.unwrap_or(false) {
            let Some(api) = &self.socket_api else {
                return RuntimeMode::Unknown;
            };

            if let Err(e) = api.ping().await {
                tracing::debug!(error = %e, socket = %self.socket_path.display(), "Socket present but ping failed");
                return RuntimeMode::Unknown;
            }

            return match api.list_containers(1).await {
                Ok(_) => RuntimeMode::Socket,
                Err(e) => {
                    tracing::debug!(error = %e, "Socket reachable but cannot enumerate containers");
                    RuntimeMode::EmbeddedDaemon
                }
            };
        }

        match &self.embedded_api {
            Some(api) => match api.ping().await {
                Ok(()) => RuntimeMode::EmbeddedDaemon,
                Err(e) => {
                    tracing::debug!(error = %e, "Embedded runtime did not answer ping");
                    RuntimeMode::Unknown
                }
            },
            None => RuntimeMode::Unknown,
        }
    }

    /// Detect and log the mode, returning the derived tuning
    pub async fn detect_tuning(&self) -> RuntimeTuning {
        let mode = self.detect().await;

        match mode {
            RuntimeMode::Socket => {
                tracing::info!(mode = %mode, "Using host container runtime socket")
            }
            RuntimeMode::EmbeddedDaemon => {
                tracing::info!(mode = %mode, "Using embedded container runtime")
            }
            RuntimeMode::Unknown => {
                tracing::warn!(mode = %mode, "Could not determine runtime mode, proceeding with defaults")
            }
        }

        mode.tuning()
    }
}
