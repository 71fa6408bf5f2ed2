// Error types for the Consul agent client

use reqwest::StatusCode;

/// Errors that can occur while talking to the discovery agent
#[derive(Debug, thiserror::Error)]
pub enum ConsulError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Request failed with status {status}: {body}")]
    RequestFailed { status: u16, body: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid agent address: {0}")]
    InvalidAddress(String),
}

impl ConsulError {
    /// Whether the agent answered 404 (unknown service or check)
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::RequestFailed { status, .. } if *status == StatusCode::NOT_FOUND.as_u16()
        )
    }
}

pub type Result<T> = std::result::Result<T, ConsulError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ConsulError::RequestFailed {
            status: 500,
            body: "agent unavailable".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Request failed with status 500: agent unavailable"
        );

        let err = ConsulError::InvalidAddress("::bad".to_string());
        assert_eq!(err.to_string(), "Invalid agent address: ::bad");
    }

    #[test]
    fn test_is_not_found() {
        let err = ConsulError::RequestFailed {
            status: 404,
            body: "Unknown check ID".to_string(),
        };
        assert!(err.is_not_found());

        let err = ConsulError::RequestFailed {
            status: 500,
            body: String::new(),
        };
        assert!(!err.is_not_found());
    }
}
