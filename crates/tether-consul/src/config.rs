// Configuration for ConsulClient

use serde::Deserialize;
use url::Url;

use crate::error::{ConsulError, Result};

/// Default agent address (Consul's HTTP API port)
pub const DEFAULT_AGENT_ADDRESS: &str = "127.0.0.1:8500";

/// Configuration for the agent HTTP client
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClientConfig {
    /// Agent address, either `host:port` or a full URL (e.g. "https://consul:8501")
    pub address: String,
    /// ACL token sent as `X-Consul-Token`
    pub token: Option<String>,
    /// Datacenter used for health queries (agent's own datacenter when unset)
    pub datacenter: Option<String>,
    /// Connection timeout in milliseconds (default: 5000)
    pub connect_timeout_ms: u64,
    /// Per-request timeout in milliseconds (default: 10000)
    pub read_timeout_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_AGENT_ADDRESS.to_string(),
            token: None,
            datacenter: None,
            connect_timeout_ms: 5000,
            read_timeout_ms: 10000,
        }
    }
}

impl ClientConfig {
    /// Create a new config for a single agent address
    pub fn new(address: &str) -> Self {
        Self {
            address: address.to_string(),
            ..Default::default()
        }
    }

    /// Set the ACL token
    pub fn with_token(mut self, token: &str) -> Self {
        self.token = Some(token.to_string());
        self
    }

    /// Set the datacenter
    pub fn with_datacenter(mut self, datacenter: &str) -> Self {
        self.datacenter = Some(datacenter.to_string());
        self
    }

    /// Set timeouts
    pub fn with_timeouts(mut self, connect_ms: u64, read_ms: u64) -> Self {
        self.connect_timeout_ms = connect_ms;
        self.read_timeout_ms = read_ms;
        self
    }

    /// Normalized base URL without trailing slash; `http` is assumed when no scheme is given.
    pub fn base_url(&self) -> Result<String> {
        let address = self.address.trim();
        if address.is_empty() {
            return Err(ConsulError::InvalidAddress("empty address".to_string()));
        }

        let candidate = if address.contains("://") {
            address.to_string()
        } else {
            format!("http://{}", address)
        };

        let url = Url::parse(&candidate)
            .map_err(|e| ConsulError::InvalidAddress(format!("{}: {}", address, e)))?;
        if url.host_str().is_none() {
            return Err(ConsulError::InvalidAddress(address.to_string()));
        }

        Ok(url.as_str().trim_end_matches('/').to_string())
    }
}
