use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

// ============================================================================
// Declarative Service Spec
// ============================================================================
//
// Desired state for one infrastructure dependency on the cluster. Built
// fresh for each bootstrap step and handed to the reconciler; the cluster
// client translates it into its own wire representation.
//
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceSpec {
    pub name: String,
    pub image: String,
    pub env: BTreeMap<String, String>,
    pub mounts: Vec<VolumeMount>,
    pub network: Option<String>,
    pub constraints: Vec<String>,
    pub replicas: u64,
    pub ports: Vec<PublishedPort>,
    pub healthcheck: Option<ContainerHealthcheck>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeMount {
    pub source: String,
    pub target: String,
    /// Host path instead of a named volume
    pub bind: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PortProtocol {
    Tcp,
    Udp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishedPort {
    pub target: u16,
    pub published: u16,
    pub protocol: PortProtocol,
    /// Publish on the host directly instead of through the routing mesh
    pub host_mode: bool,
}

/// Container-level health check embedded in the service definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerHealthcheck {
    pub test: Vec<String>,
    pub interval: Duration,
    pub timeout: Duration,
    pub retries: u32,
    pub start_period: Duration,
}

impl ServiceSpec {
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            env: BTreeMap::new(),
            mounts: Vec::new(),
            network: None,
            constraints: Vec::new(),
            replicas: 1,
            ports: Vec::new(),
            healthcheck: None,
        }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_volume(mut self, source: impl Into<String>, target: impl Into<String>) -> Self {
        self.mounts.push(VolumeMount {
            source: source.into(),
            target: target.into(),
            bind: false,
        });
        self
    }

    pub fn with_bind_mount(mut self, host_path: impl Into<String>, target: impl Into<String>) -> Self {
        self.mounts.push(VolumeMount {
            source: host_path.into(),
            target: target.into(),
            bind: true,
        });
        self
    }

    pub fn on_network(mut self, network: impl Into<String>) -> Self {
        self.network = Some(network.into());
        self
    }

    pub fn with_constraint(mut self, constraint: impl Into<String>) -> Self {
        self.constraints.push(constraint.into());
        self
    }

    pub fn with_replicas(mut self, replicas: u64) -> Self {
        self.replicas = replicas;
        self
    }

    /// Publish a TCP port in host mode
    pub fn publish_host_port(mut self, target: u16, published: u16) -> Self {
        self.ports.push(PublishedPort {
            target,
            published,
            protocol: PortProtocol::Tcp,
            host_mode: true,
        });
        self
    }

    pub fn with_healthcheck(mut self, healthcheck: ContainerHealthcheck) -> Self {
        self.healthcheck = Some(healthcheck);
        self
    }

    /// Environment rendered as `KEY=value` pairs
    pub fn env_pairs(&self) -> Vec<String> {
        self.env
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect()
    }
}
