//! The discovery agent seam
//!
//! Everything above this crate talks to the agent through [`DiscoveryClient`], so the
//! registrar, heartbeat and directory can run against [`crate::ConsulClient`] in
//! production and an in-process fake in tests.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::Result;
use crate::model::{AgentService, AgentServiceRegistration, CheckStatus, ServiceEntry};

/// Operations the discovery agent must expose
#[async_trait]
pub trait DiscoveryClient: Send + Sync {
    /// Register (or re-register) a service instance with the local agent
    async fn register(&self, registration: &AgentServiceRegistration) -> Result<()>;

    /// Remove a service instance from the local agent
    async fn deregister(&self, service_id: &str) -> Result<()>;

    /// Set the status of a TTL check, resetting its countdown
    async fn update_ttl(&self, check_id: &str, status: CheckStatus, note: &str) -> Result<()>;

    /// All services registered with the local agent, keyed by service ID
    async fn services(&self) -> Result<HashMap<String, AgentService>>;

    /// Services matching an agent filter expression (e.g. `"v1" in Tags`)
    async fn services_with_filter(&self, filter: &str) -> Result<HashMap<String, AgentService>>;

    /// Instances of a service known to the catalog, optionally narrowed by tag
    async fn health_service(
        &self,
        service: &str,
        tag: &str,
        passing_only: bool,
    ) -> Result<Vec<ServiceEntry>>;
}
