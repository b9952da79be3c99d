use anyhow::Context;
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;

use crate::bootstrap::ProxyInstaller;
use crate::cluster::infra::{PROXY_DYNAMIC_DIR, PROXY_STATIC_CONFIG};
use crate::cluster::{InfraTarget, ServiceReconciler};

const DEFAULT_STATIC_CONFIG: &str = r#"global:
  sendAnonymousUsage: false
providers:
  swarm:
    exposedByDefault: false
    watch: true
  file:
    directory: /etc/platform/traefik/dynamic
    watch: true
entryPoints:
  web:
    address: ":80"
  websecure:
    address: ":443"
    http:
      tls:
        certResolver: letsencrypt
api:
  insecure: true
"#;

const DEFAULT_MIDDLEWARES: &str = r#"http:
  middlewares:
    redirect-to-https:
      redirectScheme:
        scheme: https
        permanent: true
"#;

const MIDDLEWARES_FILE: &str = "middlewares.yml";

/// Writes the reverse-proxy defaults and runs the proxy as a cluster service
pub struct TraefikInstaller {
    config_dir: PathBuf,
    reconciler: Arc<ServiceReconciler>,
    target: InfraTarget,
}

impl TraefikInstaller {
    pub fn new(config_dir: impl Into<PathBuf>, reconciler: Arc<ServiceReconciler>, target: InfraTarget) -> Self {
        Self {
            config_dir: config_dir.into(),
            reconciler,
            target,
        }
    }
}

/// Create `path` with `contents` unless it already exists. Returns whether
/// the file was written.
async fn write_if_absent(path: &Path, contents: &str) -> anyhow::Result<bool> {
    let file = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await;

    match file {
        Ok(mut file) => {
            file.write_all(contents.as_bytes())
                .await
                .with_context(|| format!("failed to write {}", path.display()))?;
            file.flush().await?;
            Ok(true)
        }
        Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(e).with_context(|| format!("failed to create {}", path.display())),
    }
}

#[async_trait]
impl ProxyInstaller for TraefikInstaller {
    async fn write_default_config(&self) -> anyhow::Result<()> {
        let dynamic_dir = self.config_dir.join(PROXY_DYNAMIC_DIR);
        tokio::fs::create_dir_all(&dynamic_dir)
            .await
            .with_context(|| format!("failed to create {}", dynamic_dir.display()))?;

        let files = [
            (self.config_dir.join(PROXY_STATIC_CONFIG), DEFAULT_STATIC_CONFIG),
            (dynamic_dir.join(MIDDLEWARES_FILE), DEFAULT_MIDDLEWARES),
        ];

        for (path, contents) in &files {
            if write_if_absent(path, contents).await? {
                tracing::info!(path = %path.display(), "Wrote default proxy configuration");
            } else {
                tracing::debug!(path = %path.display(), "Proxy configuration exists, leaving it");
            }
        }

        Ok(())
    }

    async fn start(&self) -> anyhow::Result<()> {
        let outcome = self.reconciler.ensure_healthy(&self.target).await?;
        tracing::info!(outcome = %outcome, "✅ Reverse proxy initialized");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::infra;
    use crate::cluster::testing::InMemoryCluster;
    use crate::cluster::ClusterApi;
    use crate::health::HealthOrchestrator;

    fn installer(dir: &Path, cluster: Arc<InMemoryCluster>) -> TraefikInstaller {
        let api: Arc<dyn ClusterApi> = cluster;
        let target = infra::proxy_target(api.clone(), dir, Path::new("/var/run/docker.sock"));
        let reconciler = Arc::new(ServiceReconciler::new(api, HealthOrchestrator::new()));
        TraefikInstaller::new(dir, reconciler, target)
    }

    #[tokio::test]
    async fn test_writes_defaults_once() {
        let dir = tempfile::tempdir().unwrap();
        let installer = installer(dir.path(), Arc::new(InMemoryCluster::new()));

        installer.write_default_config().await.unwrap();

        let static_path = dir.path().join(PROXY_STATIC_CONFIG);
        assert_eq!(std::fs::read_to_string(&static_path).unwrap(), DEFAULT_STATIC_CONFIG);
        assert!(dir.path().join(PROXY_DYNAMIC_DIR).join(MIDDLEWARES_FILE).exists());

        // Operator edits survive the next boot
        std::fs::write(&static_path, "edited: true\n").unwrap();
        installer.write_default_config().await.unwrap();
        assert_eq!(std::fs::read_to_string(&static_path).unwrap(), "edited: true\n");
    }

    #[tokio::test]
    async fn test_start_realizes_proxy_service() {
        let dir = tempfile::tempdir().unwrap();
        let cluster = Arc::new(InMemoryCluster::new());

        installer(dir.path(), cluster.clone()).start().await.unwrap();

        assert_eq!(cluster.version_of(infra::PROXY_SERVICE), Some(1));
    }
}
