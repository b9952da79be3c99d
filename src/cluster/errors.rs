use crate::utils::IsTransient;

// ============================================================================
// Cluster API Errors
// ============================================================================

const STATUS_CONFLICT: u16 = 409;
const STATUS_NOT_FOUND: u16 = 404;

#[derive(Debug, Clone, thiserror::Error)]
pub enum ClusterError {
    #[error("cluster API returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("cluster API unreachable: {0}")]
    Transport(String),
}

impl ClusterError {
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        ClusterError::Api {
            status,
            message: message.into(),
        }
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            ClusterError::Api { status, .. } => Some(*status),
            ClusterError::Transport(_) => None,
        }
    }

    /// Another actor already created the object
    pub fn is_conflict(&self) -> bool {
        self.status_code() == Some(STATUS_CONFLICT)
    }

    pub fn is_not_found(&self) -> bool {
        self.status_code() == Some(STATUS_NOT_FOUND)
    }

    /// The version token used for an update was stale
    pub fn is_stale_version(&self) -> bool {
        match self {
            ClusterError::Api { message, .. } => message.contains("out of sequence"),
            ClusterError::Transport(_) => false,
        }
    }
}

impl IsTransient for ClusterError {
    fn is_transient(&self) -> bool {
        self.is_stale_version()
    }
}

// ============================================================================
// Reconciliation Errors
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("failed to pull image {image}: {source}")]
    ImagePull {
        image: String,
        #[source]
        source: ClusterError,
    },

    #[error("failed to update service {service}: {source}")]
    Update {
        service: String,
        #[source]
        source: ClusterError,
    },

    #[error("failed to create service {service}: {source}")]
    Create {
        service: String,
        #[source]
        source: ClusterError,
    },

    #[error("failed to look up service {service}: {source}")]
    Lookup {
        service: String,
        #[source]
        source: ClusterError,
    },

    #[error("{label} failed to become healthy: {reason}")]
    Unhealthy { label: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_classification() {
        let err = ClusterError::api(409, "name conflicts with an existing object");
        assert!(err.is_conflict());
        assert!(!err.is_stale_version());
        assert!(!err.is_transient());
    }

    #[test]
    fn test_stale_version_is_transient() {
        let err = ClusterError::api(500, "rpc error: code = Unknown desc = update out of sequence");
        assert!(err.is_stale_version());
        assert!(err.is_transient());
        assert!(!err.is_conflict());
    }

    #[test]
    fn test_transport_error_has_no_status() {
        let err = ClusterError::Transport("connection refused".to_string());
        assert_eq!(err.status_code(), None);
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_unhealthy_message_format() {
        let err = ReconcileError::Unhealthy {
            label: "Postgres".to_string(),
            reason: "Timeout after 300000ms".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Postgres failed to become healthy: Timeout after 300000ms"
        );
    }
}
