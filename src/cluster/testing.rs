use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use super::{ClusterApi, ClusterError, ServiceInfo, ServiceSpec, TaskState, TaskSummary};

// ============================================================================
// In-memory ClusterApi for tests
// ============================================================================

#[derive(Default)]
pub(crate) struct InMemoryCluster {
    services: Mutex<HashMap<String, (ServiceInfo, ServiceSpec)>>,
    networks: Mutex<Vec<String>>,
    pub swarm_joined: Mutex<bool>,
    pub fail_pull: Mutex<bool>,
    pub fail_ping: Mutex<bool>,
    pub fail_list_containers: Mutex<bool>,
    /// Status returned by the next create, if any
    pub fail_create: Mutex<Option<u16>>,
    /// Number of upcoming updates rejected as out of sequence
    pub stale_updates: AtomicU32,
    /// A stale update removes the service instead of bumping its version
    pub vanish_on_stale: Mutex<bool>,
    /// The next update finds the service already removed
    pub vanish_before_update: Mutex<bool>,
    pub creates: AtomicU32,
    pub updates: AtomicU32,
    pub calls: AtomicU32,
    pub task_state: Mutex<Option<TaskState>>,
}

impl InMemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_service(self, spec: &ServiceSpec, version: u64) -> Self {
        self.services.lock().unwrap().insert(
            spec.name.clone(),
            (
                ServiceInfo {
                    id: format!("id-{}", spec.name),
                    version,
                },
                spec.clone(),
            ),
        );
        self
    }

    pub fn service_count(&self) -> usize {
        self.services.lock().unwrap().len()
    }

    pub fn version_of(&self, name: &str) -> Option<u64> {
        self.services
            .lock()
            .unwrap()
            .get(name)
            .map(|(info, _)| info.version)
    }

    pub fn networks(&self) -> Vec<String> {
        self.networks.lock().unwrap().clone()
    }

    fn touch(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ClusterApi for InMemoryCluster {
    async fn pull_image(&self, image: &str) -> Result<(), ClusterError> {
        self.touch();
        if *self.fail_pull.lock().unwrap() {
            return Err(ClusterError::api(404, format!("manifest for {} not found", image)));
        }
        Ok(())
    }

    async fn get_service(&self, name: &str) -> Result<Option<ServiceInfo>, ClusterError> {
        self.touch();
        // Snapshot before yielding so concurrent callers can both observe "absent"
        let found = self
            .services
            .lock()
            .unwrap()
            .get(name)
            .map(|(info, _)| info.clone());
        tokio::task::yield_now().await;
        Ok(found)
    }

    async fn update_service(
        &self,
        name: &str,
        version: u64,
        spec: &ServiceSpec,
    ) -> Result<(), ClusterError> {
        self.touch();
        if self
            .stale_updates
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            // Someone else bumped the version (or removed the service) in between
            let mut services = self.services.lock().unwrap();
            if *self.vanish_on_stale.lock().unwrap() {
                services.remove(name);
            } else if let Some((info, _)) = services.get_mut(name) {
                info.version += 1;
            }
            return Err(ClusterError::api(
                500,
                "rpc error: code = Unknown desc = update out of sequence",
            ));
        }

        let mut services = self.services.lock().unwrap();
        if std::mem::take(&mut *self.vanish_before_update.lock().unwrap()) {
            services.remove(name);
        }
        let (info, current) = services
            .get_mut(name)
            .ok_or_else(|| ClusterError::api(404, format!("service {} not found", name)))?;
        if info.version != version {
            return Err(ClusterError::api(
                500,
                "rpc error: code = Unknown desc = update out of sequence",
            ));
        }
        info.version += 1;
        *current = spec.clone();
        self.updates.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn create_service(&self, spec: &ServiceSpec) -> Result<(), ClusterError> {
        self.touch();
        if let Some(status) = self.fail_create.lock().unwrap().take() {
            return Err(ClusterError::api(status, "internal error"));
        }
        let mut services = self.services.lock().unwrap();
        if services.contains_key(&spec.name) {
            return Err(ClusterError::api(409, "name conflicts with an existing object"));
        }
        services.insert(
            spec.name.clone(),
            (
                ServiceInfo {
                    id: format!("id-{}", spec.name),
                    version: 1,
                },
                spec.clone(),
            ),
        );
        self.creates.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn list_tasks(&self, service: &str) -> Result<Vec<TaskSummary>, ClusterError> {
        self.touch();
        if !self.services.lock().unwrap().contains_key(service) {
            return Ok(Vec::new());
        }
        let state = self.task_state.lock().unwrap().unwrap_or(TaskState::Running);
        Ok(vec![TaskSummary {
            state,
            started_at: Some(Utc::now() - chrono::Duration::seconds(60)),
        }])
    }

    async fn ping(&self) -> Result<(), ClusterError> {
        self.touch();
        if *self.fail_ping.lock().unwrap() {
            return Err(ClusterError::Transport("connection refused".to_string()));
        }
        Ok(())
    }

    async fn list_containers(&self, _limit: usize) -> Result<usize, ClusterError> {
        self.touch();
        if *self.fail_list_containers.lock().unwrap() {
            return Err(ClusterError::api(403, "permission denied"));
        }
        Ok(1)
    }

    async fn ensure_network(&self, name: &str) -> Result<(), ClusterError> {
        self.touch();
        let mut networks = self.networks.lock().unwrap();
        if !networks.iter().any(|n| n == name) {
            networks.push(name.to_string());
        }
        Ok(())
    }

    async fn ensure_swarm(&self, _listen_addr: &str, _advertise_addr: &str) -> Result<(), ClusterError> {
        self.touch();
        *self.swarm_joined.lock().unwrap() = true;
        Ok(())
    }
}
