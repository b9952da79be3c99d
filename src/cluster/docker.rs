use async_trait::async_trait;
use bollard::errors::Error as BollardError;
use bollard::models::{
    EndpointPortConfig, EndpointPortConfigProtocolEnum, EndpointPortConfigPublishModeEnum,
    EndpointSpec, HealthConfig, Mount, MountTypeEnum, NetworkAttachmentConfig, NetworkCreateRequest,
    ServiceSpec as DockerServiceSpec, ServiceSpecMode, ServiceSpecModeReplicated, SwarmInitRequest,
    Task, TaskSpec, TaskSpecContainerSpec, TaskSpecPlacement, TaskState as DockerTaskState,
};
use bollard::query_parameters::{
    CreateImageOptions, InspectNetworkOptions, InspectServiceOptions, ListContainersOptions,
    ListTasksOptions, UpdateServiceOptions,
};
use bollard::Docker;
use chrono::{DateTime, Utc};
use futures_util::TryStreamExt;
use std::collections::HashMap;
use std::path::Path;

use super::{
    ClusterApi, ClusterError, PortProtocol, ServiceInfo, ServiceSpec, TaskState, TaskSummary,
};

// ============================================================================
// Docker Swarm Cluster Client
// ============================================================================
//
// `ClusterApi` over the Docker Engine API (bollard). Engine error responses
// keep their HTTP status so callers can tell a 409 conflict from a real
// failure.
//
// ============================================================================

const SOCKET_TIMEOUT_SECS: u64 = 120;

#[derive(Clone)]
pub struct DockerCluster {
    docker: Docker,
}

impl DockerCluster {
    /// Connect through a local unix socket
    pub fn connect_socket(path: &Path) -> anyhow::Result<Self> {
        let path = path
            .to_str()
            .ok_or_else(|| anyhow::anyhow!("Docker socket path is not valid UTF-8"))?;
        let docker = Docker::connect_with_socket(path, SOCKET_TIMEOUT_SECS, bollard::API_DEFAULT_VERSION)
            .map_err(|e| anyhow::anyhow!("Docker connection failed: {}", e))?;
        Ok(Self { docker })
    }

    /// Connect using `DOCKER_HOST` / platform defaults (embedded daemon)
    pub fn connect_local_defaults() -> anyhow::Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| anyhow::anyhow!("Docker connection failed: {}", e))?;
        Ok(Self { docker })
    }
}

fn map_err(err: BollardError) -> ClusterError {
    match err {
        BollardError::DockerResponseServerError { status_code, message } => {
            ClusterError::api(status_code, message)
        }
        other => ClusterError::Transport(other.to_string()),
    }
}

fn nanos(duration: std::time::Duration) -> i64 {
    i64::try_from(duration.as_nanos()).unwrap_or(i64::MAX)
}

/// Translate the declarative spec into the engine's service definition
fn to_docker_spec(spec: &ServiceSpec) -> DockerServiceSpec {
    let mounts = spec
        .mounts
        .iter()
        .map(|m| Mount {
            typ: Some(if m.bind {
                MountTypeEnum::BIND
            } else {
                MountTypeEnum::VOLUME
            }),
            source: Some(m.source.clone()),
            target: Some(m.target.clone()),
            ..Default::default()
        })
        .collect::<Vec<_>>();

    let health_check = spec.healthcheck.as_ref().map(|check| HealthConfig {
        test: Some(check.test.clone()),
        interval: Some(nanos(check.interval)),
        timeout: Some(nanos(check.timeout)),
        retries: Some(i64::from(check.retries)),
        start_period: Some(nanos(check.start_period)),
        ..Default::default()
    });

    let ports = spec
        .ports
        .iter()
        .map(|p| EndpointPortConfig {
            target_port: Some(i64::from(p.target)),
            published_port: Some(i64::from(p.published)),
            protocol: Some(match p.protocol {
                PortProtocol::Tcp => EndpointPortConfigProtocolEnum::TCP,
                PortProtocol::Udp => EndpointPortConfigProtocolEnum::UDP,
            }),
            publish_mode: Some(if p.host_mode {
                EndpointPortConfigPublishModeEnum::HOST
            } else {
                EndpointPortConfigPublishModeEnum::INGRESS
            }),
            ..Default::default()
        })
        .collect::<Vec<_>>();

    DockerServiceSpec {
        name: Some(spec.name.clone()),
        task_template: Some(TaskSpec {
            container_spec: Some(TaskSpecContainerSpec {
                image: Some(spec.image.clone()),
                env: (!spec.env.is_empty()).then(|| spec.env_pairs()),
                mounts: (!mounts.is_empty()).then_some(mounts),
                health_check,
                ..Default::default()
            }),
            networks: spec.network.as_ref().map(|network| {
                vec![NetworkAttachmentConfig {
                    target: Some(network.clone()),
                    ..Default::default()
                }]
            }),
            placement: (!spec.constraints.is_empty()).then(|| TaskSpecPlacement {
                constraints: Some(spec.constraints.clone()),
                ..Default::default()
            }),
            ..Default::default()
        }),
        mode: Some(ServiceSpecMode {
            replicated: Some(ServiceSpecModeReplicated {
                replicas: Some(i64::try_from(spec.replicas).unwrap_or(i64::MAX)),
            }),
            ..Default::default()
        }),
        endpoint_spec: (!ports.is_empty()).then(|| EndpointSpec {
            ports: Some(ports),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn to_task_state(state: Option<&DockerTaskState>) -> TaskState {
    match state {
        Some(DockerTaskState::RUNNING) => TaskState::Running,
        Some(DockerTaskState::NEW)
        | Some(DockerTaskState::PENDING)
        | Some(DockerTaskState::ASSIGNED)
        | Some(DockerTaskState::ACCEPTED)
        | Some(DockerTaskState::PREPARING)
        | Some(DockerTaskState::READY)
        | Some(DockerTaskState::STARTING) => TaskState::Pending,
        Some(DockerTaskState::FAILED) | Some(DockerTaskState::REJECTED) => TaskState::Failed,
        _ => TaskState::Other,
    }
}

fn tasks_of(service: &str) -> ListTasksOptions {
    let mut filters = HashMap::new();
    filters.insert("service".to_string(), vec![service.to_string()]);
    ListTasksOptions {
        filters: Some(filters),
    }
}

fn to_task_summary(task: &Task) -> TaskSummary {
    let status = task.status.as_ref();
    TaskSummary {
        state: to_task_state(status.and_then(|s| s.state.as_ref())),
        started_at: status
            .and_then(|s| s.timestamp.as_deref())
            .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
            .map(|ts| ts.with_timezone(&Utc)),
    }
}

#[async_trait]
impl ClusterApi for DockerCluster {
    async fn pull_image(&self, image: &str) -> Result<(), ClusterError> {
        tracing::debug!(image = %image, "Pulling image");

        let options = CreateImageOptions {
            from_image: Some(image.to_string()),
            ..Default::default()
        };

        self.docker
            .create_image(Some(options), None, None)
            .try_collect::<Vec<_>>()
            .await
            .map_err(map_err)?;

        Ok(())
    }

    async fn get_service(&self, name: &str) -> Result<Option<ServiceInfo>, ClusterError> {
        match self.docker.inspect_service(name, None::<InspectServiceOptions>).await {
            Ok(service) => Ok(Some(ServiceInfo {
                id: service.id.unwrap_or_default(),
                version: service
                    .version
                    .and_then(|v| v.index)
                    .unwrap_or_default(),
            })),
            Err(e) => {
                let err = map_err(e);
                if err.is_not_found() {
                    Ok(None)
                } else {
                    Err(err)
                }
            }
        }
    }

    async fn update_service(
        &self,
        name: &str,
        version: u64,
        spec: &ServiceSpec,
    ) -> Result<(), ClusterError> {
        let version = i32::try_from(version)
            .map_err(|_| ClusterError::Transport(format!("version token {} out of range", version)))?;
        let options = UpdateServiceOptions {
            version,
            ..Default::default()
        };

        self.docker
            .update_service(name, to_docker_spec(spec), options, None)
            .await
            .map_err(map_err)?;

        Ok(())
    }

    async fn create_service(&self, spec: &ServiceSpec) -> Result<(), ClusterError> {
        self.docker
            .create_service(to_docker_spec(spec), None)
            .await
            .map_err(map_err)?;

        Ok(())
    }

    async fn list_tasks(&self, service: &str) -> Result<Vec<TaskSummary>, ClusterError> {
        let tasks = self
            .docker
            .list_tasks(Some(tasks_of(service)))
            .await
            .map_err(map_err)?;

        Ok(tasks.iter().map(to_task_summary).collect())
    }

    async fn ping(&self) -> Result<(), ClusterError> {
        self.docker.ping().await.map_err(map_err)?;
        Ok(())
    }

    async fn list_containers(&self, limit: usize) -> Result<usize, ClusterError> {
        let options = ListContainersOptions {
            limit: Some(i32::try_from(limit).unwrap_or(i32::MAX)),
            ..Default::default()
        };

        let containers = self
            .docker
            .list_containers(Some(options))
            .await
            .map_err(map_err)?;

        Ok(containers.len())
    }

    async fn ensure_network(&self, name: &str) -> Result<(), ClusterError> {
        match self
            .docker
            .inspect_network(name, None::<InspectNetworkOptions>)
            .await
        {
            Ok(_) => {
                tracing::debug!(network = %name, "Network already exists");
                return Ok(());
            }
            Err(e) => {
                let err = map_err(e);
                if !err.is_not_found() {
                    return Err(err);
                }
            }
        }

        let request = NetworkCreateRequest {
            name: name.to_string(),
            driver: Some("overlay".to_string()),
            attachable: Some(true),
            ..Default::default()
        };

        match self.docker.create_network(request).await {
            Ok(_) => Ok(()),
            Err(e) => {
                let err = map_err(e);
                if err.is_conflict() {
                    Ok(())
                } else {
                    Err(err)
                }
            }
        }
    }

    async fn ensure_swarm(&self, listen_addr: &str, advertise_addr: &str) -> Result<(), ClusterError> {
        if self.docker.inspect_swarm().await.is_ok() {
            tracing::debug!("Node is already a swarm member");
            return Ok(());
        }

        let request = SwarmInitRequest {
            listen_addr: Some(listen_addr.to_string()),
            advertise_addr: Some(advertise_addr.to_string()),
            ..Default::default()
        };

        self.docker.init_swarm(request).await.map_err(map_err)?;
        Ok(())
    }
}
