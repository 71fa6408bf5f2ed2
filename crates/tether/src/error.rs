//! Error types for registration and lookup

use tether_consul::ConsulError;

/// Errors surfaced by the registrar, the directory and settings loading
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    /// A lookup found zero matching instances
    #[error("not found target service in service discovery: {0}")]
    NotFound(String),

    /// The agent rejected or could not be reached for a registration
    #[error("register with service discovery failed: {0}")]
    RegisterFailed(String),

    /// The agent rejected or could not be reached for a deregistration
    #[error("deregister from service discovery failed: {0}")]
    DeregisterFailed(String),

    #[error("service {0} is not registered")]
    NotRegistered(String),

    #[error("service {0} is already registered")]
    AlreadyRegistered(String),

    #[error("invalid service record: {0}")]
    InvalidRecord(String),

    /// Any other agent or network error from a query
    #[error("transport error: {0}")]
    Transport(#[from] ConsulError),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

impl DiscoveryError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, DiscoveryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DiscoveryError::NotFound("tag=v2".to_string());
        assert_eq!(
            err.to_string(),
            "not found target service in service discovery: tag=v2"
        );

        let err = DiscoveryError::NotRegistered("orders-1".to_string());
        assert_eq!(err.to_string(), "service orders-1 is not registered");
    }

    #[test]
    fn test_from_consul_error() {
        let err: DiscoveryError = ConsulError::RequestFailed {
            status: 500,
            body: "boom".to_string(),
        }
        .into();
        assert!(matches!(err, DiscoveryError::Transport(_)));
        assert!(!err.is_not_found());
    }
}
