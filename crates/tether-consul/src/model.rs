// Consul agent API data models, seen from the client side.
// Field names follow the agent's JSON casing.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Service registration request
/// PUT /v1/agent/service/register
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct AgentServiceRegistration {
    /// Service ID (the agent falls back to Name when absent)
    #[serde(rename = "ID", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Service name (required)
    #[serde(rename = "Name")]
    pub name: String,

    /// Service tags for filtering
    #[serde(rename = "Tags", default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,

    /// Service address (the agent uses its own address when absent)
    #[serde(rename = "Address", default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,

    /// Service port
    #[serde(rename = "Port", default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Service metadata key-value pairs
    #[serde(rename = "Meta", default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<HashMap<String, String>>,

    /// Single health check definition
    #[serde(rename = "Check", default, skip_serializing_if = "Option::is_none")]
    pub check: Option<AgentServiceCheck>,
}

impl AgentServiceRegistration {
    /// Get the effective service ID
    pub fn service_id(&self) -> &str {
        self.id.as_deref().unwrap_or(&self.name)
    }
}

/// Health check definition attached to a service registration
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct AgentServiceCheck {
    /// Check ID (the agent uses `service:<ID>` for the inline check when absent)
    #[serde(rename = "CheckID", default, skip_serializing_if = "Option::is_none")]
    pub check_id: Option<String>,

    /// Check name
    #[serde(rename = "Name", default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// TTL-based check duration (e.g., "30s")
    #[serde(rename = "TTL", default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<String>,

    /// HTTP endpoint for HTTP checks
    #[serde(rename = "HTTP", default, skip_serializing_if = "Option::is_none")]
    pub http: Option<String>,

    /// TCP address for TCP checks
    #[serde(rename = "TCP", default, skip_serializing_if = "Option::is_none")]
    pub tcp: Option<String>,

    /// Check interval (e.g., "10s")
    #[serde(rename = "Interval", default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<String>,

    /// Check timeout (e.g., "5s")
    #[serde(rename = "Timeout", default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,

    /// Deregister after critical for duration
    #[serde(
        rename = "DeregisterCriticalServiceAfter",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub deregister_critical_service_after: Option<String>,

    /// Notes for the check
    #[serde(rename = "Notes", default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,

    /// Initial status
    #[serde(rename = "Status", default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

/// Service weights for load balancing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Weights {
    #[serde(rename = "Passing", default = "default_weight")]
    pub passing: i32,

    #[serde(rename = "Warning", default = "default_weight")]
    pub warning: i32,
}

impl Default for Weights {
    fn default() -> Self {
        Self {
            passing: default_weight(),
            warning: default_weight(),
        }
    }
}

fn default_weight() -> i32 {
    1
}

/// Agent service representation
/// GET /v1/agent/services returns a map of ID to this type
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct AgentService {
    #[serde(rename = "ID", default)]
    pub id: String,

    #[serde(rename = "Service", default)]
    pub service: String,

    #[serde(rename = "Tags", default)]
    pub tags: Option<Vec<String>>,

    #[serde(rename = "Port", default)]
    pub port: u16,

    #[serde(rename = "Address", default)]
    pub address: String,

    #[serde(rename = "Meta", default)]
    pub meta: Option<HashMap<String, String>>,

    #[serde(rename = "Weights", default)]
    pub weights: Weights,

    #[serde(rename = "Datacenter", default, skip_serializing_if = "Option::is_none")]
    pub datacenter: Option<String>,

    #[serde(rename = "Namespace", default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl AgentService {
    /// Tags as a slice, empty when the agent sent none
    pub fn tags(&self) -> &[String] {
        self.tags.as_deref().unwrap_or_default()
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags().iter().any(|t| t == tag)
    }

    /// Address in `host:port` form
    pub fn host_port(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

/// Catalog node, as embedded in health responses
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Node {
    #[serde(rename = "ID", default)]
    pub id: String,

    #[serde(rename = "Node", default)]
    pub node: String,

    #[serde(rename = "Address", default)]
    pub address: String,

    #[serde(rename = "Datacenter", default)]
    pub datacenter: String,
}

/// Health check information in health responses
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct HealthCheck {
    #[serde(rename = "Node", default)]
    pub node: String,

    #[serde(rename = "CheckID", default)]
    pub check_id: String,

    #[serde(rename = "Name", default)]
    pub name: String,

    #[serde(rename = "Status", default)]
    pub status: String,

    #[serde(rename = "Output", default)]
    pub output: String,

    #[serde(rename = "ServiceID", default)]
    pub service_id: String,

    #[serde(rename = "ServiceName", default)]
    pub service_name: String,
}

/// Service health entry
/// GET /v1/health/service/:service returns a list of these
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ServiceEntry {
    #[serde(rename = "Node", default)]
    pub node: Node,

    #[serde(rename = "Service")]
    pub service: AgentService,

    #[serde(rename = "Checks", default)]
    pub checks: Vec<HealthCheck>,
}

/// TTL check status as understood by the agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CheckStatus {
    Passing,
    Warning,
    Critical,
}

impl CheckStatus {
    /// Convert from Consul status string
    pub fn from_consul_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "passing" => Self::Passing,
            "warning" => Self::Warning,
            _ => Self::Critical,
        }
    }

    /// Convert to Consul status string
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Passing => "passing",
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }

    /// Path segment of the legacy TTL update endpoint (`/v1/agent/check/<segment>/<id>`)
    pub fn endpoint(&self) -> &'static str {
        match self {
            Self::Passing => "pass",
            Self::Warning => "warn",
            Self::Critical => "fail",
        }
    }
}

impl std::fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Format a duration the way the agent parses it ("15s", "1500ms").
pub fn format_duration(duration: Duration) -> String {
    let millis = duration.as_millis();
    if millis % 1000 == 0 {
        format!("{}s", millis / 1000)
    } else {
        format!("{}ms", millis)
    }
}
