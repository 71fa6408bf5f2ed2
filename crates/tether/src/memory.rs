//! In-memory discovery agent (for testing/development)
//!
//! Mimics the parts of the agent API Tether uses: registrations, TTL checks and the
//! two filter expression shapes the directory sends (`"<tag>" in Tags` and
//! `Service == "<name>"`). Every call is recorded, and failures can be injected per
//! operation.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tether_consul::error::Result;
use tether_consul::{
    AgentService, AgentServiceRegistration, CheckStatus, ConsulError, DiscoveryClient,
    HealthCheck, ServiceEntry, Weights,
};

/// A call received by the agent
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentCall {
    Register { service_id: String },
    Deregister { service_id: String },
    UpdateTtl { check_id: String, status: CheckStatus },
    Services,
    ServicesWithFilter { filter: String },
    HealthService { service: String, tag: String },
}

impl AgentCall {
    pub fn update_ttl(check_id: &str, status: CheckStatus) -> Self {
        Self::UpdateTtl {
            check_id: check_id.to_string(),
            status,
        }
    }
}

/// Operation to inject failures into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailOn {
    Register,
    Deregister,
    FailUpdate,
    PassUpdate,
    Query,
}

#[derive(Default)]
struct AgentState {
    services: RwLock<HashMap<String, AgentService>>,
    checks: RwLock<HashMap<String, (String, CheckStatus)>>,
    calls: Mutex<Vec<AgentCall>>,
    failures: Mutex<HashMap<FailOn, u32>>,
}

/// In-memory discovery agent
#[derive(Clone, Default)]
pub struct InMemoryAgent {
    state: Arc<AgentState>,
}

impl InMemoryAgent {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `times` calls of `operation` fail with a 500
    pub fn fail_next(&self, operation: FailOn, times: u32) {
        *self.state.failures.lock().entry(operation).or_default() += times;
    }

    /// Calls received so far, in order
    pub fn calls(&self) -> Vec<AgentCall> {
        self.state.calls.lock().clone()
    }

    pub fn clear_calls(&self) {
        self.state.calls.lock().clear();
    }

    pub fn service(&self, service_id: &str) -> Option<AgentService> {
        self.state.services.read().get(service_id).cloned()
    }

    /// Get count of registered services
    pub fn count(&self) -> usize {
        self.state.services.read().len()
    }

    pub fn check_status(&self, check_id: &str) -> Option<CheckStatus> {
        self.state
            .checks
            .read()
            .get(check_id)
            .map(|(_, status)| *status)
    }

    fn record(&self, call: AgentCall) {
        self.state.calls.lock().push(call);
    }

    fn injected_failure(&self, operation: FailOn) -> Result<()> {
        let mut failures = self.state.failures.lock();
        match failures.get_mut(&operation) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                Err(ConsulError::RequestFailed {
                    status: 500,
                    body: format!("injected {:?} failure", operation),
                })
            }
            _ => Ok(()),
        }
    }

    fn filtered(&self, filter: &str) -> Result<HashMap<String, AgentService>> {
        let predicate = parse_filter(filter).ok_or_else(|| ConsulError::RequestFailed {
            status: 400,
            body: format!("Failed to create boolean expression evaluator: {}", filter),
        })?;

        Ok(self
            .state
            .services
            .read()
            .iter()
            .filter(|(_, service)| predicate.matches(service))
            .map(|(id, service)| (id.clone(), service.clone()))
            .collect())
    }
}

#[async_trait]
impl DiscoveryClient for InMemoryAgent {
    async fn register(&self, registration: &AgentServiceRegistration) -> Result<()> {
        let service_id = registration.service_id().to_string();
        self.record(AgentCall::Register {
            service_id: service_id.clone(),
        });
        self.injected_failure(FailOn::Register)?;

        let service = AgentService {
            id: service_id.clone(),
            service: registration.name.clone(),
            tags: Some(registration.tags.clone().unwrap_or_default()),
            port: registration.port.unwrap_or_default(),
            address: registration.address.clone().unwrap_or_default(),
            meta: Some(registration.meta.clone().unwrap_or_default()),
            weights: Weights::default(),
            datacenter: None,
            namespace: None,
        };
        self.state
            .services
            .write()
            .insert(service_id.clone(), service);

        if let Some(check) = &registration.check
            && check.ttl.is_some()
        {
            let check_id = check
                .check_id
                .clone()
                .unwrap_or_else(|| format!("service:{}", service_id));
            // TTL checks start out critical until the first pass
            self.state
                .checks
                .write()
                .insert(check_id, (service_id, CheckStatus::Critical));
        }

        Ok(())
    }

    async fn deregister(&self, service_id: &str) -> Result<()> {
        self.record(AgentCall::Deregister {
            service_id: service_id.to_string(),
        });
        self.injected_failure(FailOn::Deregister)?;

        self.state
            .services
            .write()
            .remove(service_id)
            .ok_or_else(|| ConsulError::RequestFailed {
                status: 404,
                body: format!("Unknown service ID {:?}", service_id),
            })?;
        self.state
            .checks
            .write()
            .retain(|_, (owner, _)| owner.as_str() != service_id);

        Ok(())
    }

    async fn update_ttl(&self, check_id: &str, status: CheckStatus, _note: &str) -> Result<()> {
        self.record(AgentCall::update_ttl(check_id, status));
        match status {
            CheckStatus::Passing => self.injected_failure(FailOn::PassUpdate)?,
            CheckStatus::Critical => self.injected_failure(FailOn::FailUpdate)?,
            CheckStatus::Warning => {}
        }

        let mut checks = self.state.checks.write();
        let (_, current) = checks
            .get_mut(check_id)
            .ok_or_else(|| ConsulError::RequestFailed {
                status: 404,
                body: format!("Unknown check ID {:?}", check_id),
            })?;
        *current = status;

        Ok(())
    }

    async fn services(&self) -> Result<HashMap<String, AgentService>> {
        self.record(AgentCall::Services);
        self.injected_failure(FailOn::Query)?;

        Ok(self.state.services.read().clone())
    }

    async fn services_with_filter(&self, filter: &str) -> Result<HashMap<String, AgentService>> {
        self.record(AgentCall::ServicesWithFilter {
            filter: filter.to_string(),
        });
        self.injected_failure(FailOn::Query)?;

        self.filtered(filter)
    }

    async fn health_service(
        &self,
        service: &str,
        tag: &str,
        passing_only: bool,
    ) -> Result<Vec<ServiceEntry>> {
        self.record(AgentCall::HealthService {
            service: service.to_string(),
            tag: tag.to_string(),
        });
        self.injected_failure(FailOn::Query)?;

        let services = self.state.services.read();
        let checks = self.state.checks.read();

        let mut entries: Vec<ServiceEntry> = services
            .values()
            .filter(|s| s.service == service)
            .filter(|s| tag.is_empty() || s.has_tag(tag))
            .map(|s| {
                let checks: Vec<HealthCheck> = checks
                    .iter()
                    .filter(|(_, (owner, _))| *owner == s.id)
                    .map(|(check_id, (_, status))| HealthCheck {
                        check_id: check_id.clone(),
                        status: status.as_str().to_string(),
                        service_id: s.id.clone(),
                        service_name: s.service.clone(),
                        ..Default::default()
                    })
                    .collect();
                ServiceEntry {
                    service: s.clone(),
                    checks,
                    ..Default::default()
                }
            })
            .filter(|entry| {
                !passing_only
                    || entry
                        .checks
                        .iter()
                        .all(|c| CheckStatus::from_consul_str(&c.status) == CheckStatus::Passing)
            })
            .collect();

        entries.sort_by(|a, b| a.service.id.cmp(&b.service.id));
        Ok(entries)
    }
}

enum FilterPredicate {
    HasTag(String),
    ServiceIs(String),
}

impl FilterPredicate {
    fn matches(&self, service: &AgentService) -> bool {
        match self {
            Self::HasTag(tag) => service.has_tag(tag),
            Self::ServiceIs(name) => service.service == *name,
        }
    }
}

fn parse_filter(filter: &str) -> Option<FilterPredicate> {
    let filter = filter.trim();

    if let Some(value) = filter.strip_suffix(" in Tags") {
        return unquote(value.trim()).map(FilterPredicate::HasTag);
    }
    if let Some(value) = filter.strip_prefix("Service ==") {
        return unquote(value.trim()).map(FilterPredicate::ServiceIs);
    }
    None
}

fn unquote(value: &str) -> Option<String> {
    let inner = value.strip_prefix('"')?.strip_suffix('"')?;

    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            out.push(chars.next()?);
        } else {
            out.push(c);
        }
    }
    Some(out)
}
