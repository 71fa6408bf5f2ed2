//! Service instance records
//!
//! A [`ServiceRecord`] is built once by the caller, handed to a registrar, and never
//! changes afterwards.

use std::collections::HashMap;
use std::time::Duration;

use tether_consul::{AgentServiceCheck, AgentServiceRegistration, format_duration};

use crate::error::{DiscoveryError, Result};

/// Meta key under which the instance's gRPC port is published
pub const GRPC_PORT_META_KEY: &str = "grpc_port";

/// Shortest TTL accepted for a TTL check
pub const MIN_TTL: Duration = Duration::from_secs(1);

/// Health check mechanism attached to a registration
#[derive(Debug, Clone, PartialEq)]
pub enum CheckKind {
    /// The service must refresh the check within the TTL
    Ttl(Duration),
    /// The agent polls an HTTP endpoint
    Http {
        url: String,
        interval: Duration,
        timeout: Option<Duration>,
    },
    /// The agent opens a TCP connection
    Tcp { address: String, interval: Duration },
}

/// Health check descriptor
#[derive(Debug, Clone, PartialEq)]
pub struct CheckSpec {
    pub kind: CheckKind,
    /// Let the agent reap the instance after it has been critical this long
    pub deregister_critical_after: Option<Duration>,
    pub notes: Option<String>,
}

impl CheckSpec {
    pub fn ttl(ttl: Duration) -> Self {
        Self::from_kind(CheckKind::Ttl(ttl))
    }

    pub fn http(url: impl Into<String>, interval: Duration) -> Self {
        Self::from_kind(CheckKind::Http {
            url: url.into(),
            interval,
            timeout: None,
        })
    }

    pub fn tcp(address: impl Into<String>, interval: Duration) -> Self {
        Self::from_kind(CheckKind::Tcp {
            address: address.into(),
            interval,
        })
    }

    fn from_kind(kind: CheckKind) -> Self {
        Self {
            kind,
            deregister_critical_after: None,
            notes: None,
        }
    }

    /// Set the HTTP check timeout (ignored for other kinds)
    pub fn with_timeout(mut self, value: Duration) -> Self {
        if let CheckKind::Http { timeout, .. } = &mut self.kind {
            *timeout = Some(value);
        }
        self
    }

    pub fn with_deregister_critical_after(mut self, after: Duration) -> Self {
        self.deregister_critical_after = Some(after);
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn ttl_duration(&self) -> Option<Duration> {
        match self.kind {
            CheckKind::Ttl(ttl) => Some(ttl),
            _ => None,
        }
    }

    fn to_agent_check(&self) -> AgentServiceCheck {
        let mut check = AgentServiceCheck {
            deregister_critical_service_after: self.deregister_critical_after.map(format_duration),
            notes: self.notes.clone(),
            ..Default::default()
        };

        match &self.kind {
            CheckKind::Ttl(ttl) => check.ttl = Some(format_duration(*ttl)),
            CheckKind::Http {
                url,
                interval,
                timeout,
            } => {
                check.http = Some(url.clone());
                check.interval = Some(format_duration(*interval));
                check.timeout = timeout.map(format_duration);
            }
            CheckKind::Tcp { address, interval } => {
                check.tcp = Some(address.clone());
                check.interval = Some(format_duration(*interval));
            }
        }

        check
    }
}

/// Identity of one registered service instance
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceRecord {
    /// Unique instance ID
    pub id: String,
    /// Logical service name shared by all instances
    pub name: String,
    pub tags: Vec<String>,
    /// Address peers should dial
    pub address: String,
    /// HTTP port registered with the agent
    pub port: u16,
    /// Optional gRPC port, published as meta
    pub grpc_port: Option<u16>,
    pub meta: HashMap<String, String>,
    pub check: Option<CheckSpec>,
}

impl ServiceRecord {
    /// Create new service record
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        address: impl Into<String>,
        port: u16,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            tags: Vec::new(),
            address: address.into(),
            port,
            grpc_port: None,
            meta: HashMap::new(),
            check: None,
        }
    }

    /// Create a record whose ID is `<name>-<uuid>`
    pub fn with_generated_id(
        name: impl Into<String>,
        address: impl Into<String>,
        port: u16,
    ) -> Self {
        let name = name.into();
        let id = format!("{}-{}", name, uuid::Uuid::new_v4());
        Self::new(id, name, address, port)
    }

    /// Add a tag
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    /// Add metadata
    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.meta.insert(key.into(), value.into());
        self
    }

    pub fn with_grpc_port(mut self, port: u16) -> Self {
        self.grpc_port = Some(port);
        self
    }

    pub fn with_check(mut self, check: CheckSpec) -> Self {
        self.check = Some(check);
        self
    }

    /// Attach a TTL check
    pub fn with_ttl(self, ttl: Duration) -> Self {
        self.with_check(CheckSpec::ttl(ttl))
    }

    /// TTL of the attached check, if it is a TTL check
    pub fn ttl(&self) -> Option<Duration> {
        self.check.as_ref().and_then(CheckSpec::ttl_duration)
    }

    /// ID the agent assigns to the inline service check
    pub fn check_id(&self) -> String {
        format!("service:{}", self.id)
    }

    /// Address in `host:port` form
    pub fn host_port(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }

    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(DiscoveryError::InvalidRecord("service id is empty".to_string()));
        }
        if self.name.trim().is_empty() {
            return Err(DiscoveryError::InvalidRecord(format!(
                "service {} has no name",
                self.id
            )));
        }
        if let Some(ttl) = self.ttl() {
            check_ttl(&self.id, ttl)?;
        }
        Ok(())
    }

    /// Build the agent registration payload
    pub fn to_registration(&self) -> AgentServiceRegistration {
        let mut meta = self.meta.clone();
        if let Some(grpc_port) = self.grpc_port {
            meta.insert(GRPC_PORT_META_KEY.to_string(), grpc_port.to_string());
        }

        AgentServiceRegistration {
            id: Some(self.id.clone()),
            name: self.name.clone(),
            tags: (!self.tags.is_empty()).then(|| self.tags.clone()),
            address: (!self.address.is_empty()).then(|| self.address.clone()),
            port: Some(self.port),
            meta: (!meta.is_empty()).then_some(meta),
            check: self.check.as_ref().map(CheckSpec::to_agent_check),
        }
    }
}

/// Reject TTLs shorter than [`MIN_TTL`]
pub(crate) fn check_ttl(service_id: &str, ttl: Duration) -> Result<()> {
    if ttl < MIN_TTL {
        return Err(DiscoveryError::InvalidRecord(format!(
            "service {} has a TTL of {:?}, at least {:?} is required",
            service_id, ttl, MIN_TTL
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_record_builder() {
        let record = ServiceRecord::new("orders-1", "orders", "10.0.0.5", 8080)
            .with_tag("v1")
            .with_tags(["grpc", "eu"])
            .with_meta("version", "1.2.0")
            .with_grpc_port(9090)
            .with_ttl(Duration::from_secs(10));

        assert_eq!(record.tags, vec!["v1", "grpc", "eu"]);
        assert_eq!(record.ttl(), Some(Duration::from_secs(10)));
        assert_eq!(record.check_id(), "service:orders-1");
        assert_eq!(record.host_port(), "10.0.0.5:8080");
        assert!(record.validate().is_ok());
    }

    #[test]
    fn test_generated_id() {
        let a = ServiceRecord::with_generated_id("orders", "10.0.0.5", 8080);
        let b = ServiceRecord::with_generated_id("orders", "10.0.0.5", 8080);

        assert!(a.id.starts_with("orders-"));
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_to_registration_ttl() {
        let record = ServiceRecord::new("orders-1", "orders", "10.0.0.5", 8080)
            .with_tag("v1")
            .with_grpc_port(9090)
            .with_check(
                CheckSpec::ttl(Duration::from_secs(15))
                    .with_deregister_critical_after(Duration::from_secs(60)),
            );

        let reg = record.to_registration();
        assert_eq!(reg.id.as_deref(), Some("orders-1"));
        assert_eq!(reg.tags, Some(vec!["v1".to_string()]));
        assert_eq!(reg.port, Some(8080));
        assert_eq!(
            reg.meta.unwrap().get(GRPC_PORT_META_KEY).map(String::as_str),
            Some("9090")
        );

        let check = reg.check.unwrap();
        assert_eq!(check.ttl.as_deref(), Some("15s"));
        assert_eq!(check.deregister_critical_service_after.as_deref(), Some("60s"));
        assert!(check.http.is_none());
    }

    #[test]
    fn test_to_registration_http_check() {
        let record = ServiceRecord::new("web-1", "web", "", 80).with_check(
            CheckSpec::http("http://10.0.0.7/health", Duration::from_secs(10))
                .with_timeout(Duration::from_millis(1500)),
        );

        let reg = record.to_registration();
        assert!(reg.address.is_none());
        assert!(reg.tags.is_none());
        assert!(reg.meta.is_none());

        let check = reg.check.unwrap();
        assert_eq!(check.http.as_deref(), Some("http://10.0.0.7/health"));
        assert_eq!(check.interval.as_deref(), Some("10s"));
        assert_eq!(check.timeout.as_deref(), Some("1500ms"));
        assert!(check.ttl.is_none());
        assert_eq!(record.ttl(), None);
    }

    #[test]
    fn test_tcp_check_ignores_timeout() {
        let check = CheckSpec::tcp("10.0.0.7:5432", Duration::from_secs(5))
            .with_timeout(Duration::from_secs(1));

        let agent_check = check.to_agent_check();
        assert_eq!(agent_check.tcp.as_deref(), Some("10.0.0.7:5432"));
        assert!(agent_check.timeout.is_none());
    }

    #[test]
    fn test_validate_rejects_bad_records() {
        let record = ServiceRecord::new("", "orders", "10.0.0.5", 8080);
        assert!(matches!(
            record.validate(),
            Err(DiscoveryError::InvalidRecord(_))
        ));

        let record = ServiceRecord::new("orders-1", " ", "10.0.0.5", 8080);
        assert!(record.validate().is_err());

        let record =
            ServiceRecord::new("orders-1", "orders", "10.0.0.5", 8080).with_ttl(Duration::ZERO);
        assert!(record.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_sub_second_ttl() {
        for ttl in [Duration::from_nanos(1), Duration::from_millis(999)] {
            let record =
                ServiceRecord::new("orders-1", "orders", "10.0.0.5", 8080).with_ttl(ttl);
            assert!(matches!(
                record.validate(),
                Err(DiscoveryError::InvalidRecord(_))
            ));
        }

        let record = ServiceRecord::new("orders-1", "orders", "10.0.0.5", 8080)
            .with_ttl(Duration::from_millis(1500));
        assert!(record.validate().is_ok());
    }
}
