use async_trait::async_trait;

// ============================================================================
// Collaborator seams
// ============================================================================
//
// The startup graph drives these; their internals live elsewhere
// (`platform`, `db`, `server`) or outside this crate entirely.
//
// ============================================================================

/// Applies pending schema migrations. Never retried automatically.
#[async_trait]
pub trait SchemaMigrator: Send + Sync {
    async fn run_migration(&self) -> anyhow::Result<()>;
}

/// Owns the reverse-proxy configuration files and service
#[async_trait]
pub trait ProxyInstaller: Send + Sync {
    /// Write the default configuration without clobbering operator edits
    async fn write_default_config(&self) -> anyhow::Result<()>;

    /// Realize the proxy service and wait for it to be ready
    async fn start(&self) -> anyhow::Result<()>;
}

/// An auxiliary feature started once per boot (schedules, crons, sweeps)
#[async_trait]
pub trait StartupFeature: Send + Sync {
    fn name(&self) -> &str;

    async fn init(&self) -> anyhow::Result<()>;
}

#[async_trait]
pub trait RestartNotifier: Send + Sync {
    async fn notify_restart(&self) -> anyhow::Result<()>;
}

/// Opens the listening socket. Returns once the socket is bound and the
/// server is running in the background.
#[async_trait]
pub trait TrafficListener: Send + Sync {
    async fn open(&self) -> anyhow::Result<()>;
}

/// Deployment worker. `start` fails only if the worker itself cannot run;
/// individual job failures stay inside it.
#[async_trait]
pub trait BackgroundWorker: Send + Sync {
    async fn start(&self) -> anyhow::Result<()>;
}
