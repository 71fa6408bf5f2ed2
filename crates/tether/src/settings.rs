//! Typed settings loaded from an optional file plus `TETHER_*` environment variables
//!
//! Nested keys use a double underscore in the environment:
//! `TETHER_AGENT__ADDRESS=consul:8500`, `TETHER_SERVICE__TAGS=v1,eu`.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use config::{Config, Environment, File};
use serde::Deserialize;
use tether_consul::ClientConfig;

use crate::error::{DiscoveryError, Result};
use crate::heartbeat::{DEFAULT_MAX_PASS_ATTEMPTS, DEFAULT_RETRY_BACKOFF, HeartbeatConfig};
use crate::record::{CheckSpec, ServiceRecord};

pub const ENV_PREFIX: &str = "TETHER";

const DEFAULT_TTL_SECS: u64 = 10;

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub agent: ClientConfig,
    pub service: ServiceSettings,
    pub heartbeat: HeartbeatSettings,
}

/// The service instance to register
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServiceSettings {
    /// Instance ID; `<name>-<uuid>` when unset
    pub id: Option<String>,
    pub name: String,
    pub tags: Vec<String>,
    pub address: String,
    pub port: u16,
    pub grpc_port: Option<u16>,
    /// TTL of the service check; no check is registered when unset
    pub ttl_secs: Option<u64>,
    pub deregister_critical_after_secs: Option<u64>,
    pub meta: HashMap<String, String>,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            id: None,
            name: String::new(),
            tags: Vec::new(),
            address: String::new(),
            port: 0,
            grpc_port: None,
            ttl_secs: Some(DEFAULT_TTL_SECS),
            deregister_critical_after_secs: None,
            meta: HashMap::new(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct HeartbeatSettings {
    pub max_pass_attempts: u32,
    pub retry_backoff_ms: u64,
    pub redo_on_failure: bool,
}

impl Default for HeartbeatSettings {
    fn default() -> Self {
        Self {
            max_pass_attempts: DEFAULT_MAX_PASS_ATTEMPTS,
            retry_backoff_ms: DEFAULT_RETRY_BACKOFF.as_millis() as u64,
            redo_on_failure: true,
        }
    }
}

impl Settings {
    /// Load settings from `path` (required when given) and the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::from_sources(path, None)
    }

    /// Like [`load`](Self::load), reading environment variables from `env` instead of
    /// the process environment when it is given.
    pub fn from_sources(path: Option<&Path>, env: Option<HashMap<String, String>>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }

        let settings = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("service.tags")
                    .source(env),
            )
            .build()?
            .try_deserialize()?;

        Ok(settings)
    }

    /// The service record described by `service`
    pub fn service_record(&self) -> Result<ServiceRecord> {
        let service = &self.service;
        if service.name.trim().is_empty() {
            return Err(DiscoveryError::InvalidRecord(
                "service.name is not set".to_string(),
            ));
        }

        let name = service.name.clone();
        let address = service.address.clone();
        let mut record = match &service.id {
            Some(id) => ServiceRecord::new(id.clone(), name, address, service.port),
            None => ServiceRecord::with_generated_id(name, address, service.port),
        }
        .with_tags(service.tags.iter().cloned());

        for (key, value) in &service.meta {
            record = record.with_meta(key.clone(), value.clone());
        }
        if let Some(grpc_port) = service.grpc_port {
            record = record.with_grpc_port(grpc_port);
        }
        if let Some(ttl_secs) = service.ttl_secs {
            let mut check = CheckSpec::ttl(Duration::from_secs(ttl_secs));
            if let Some(after) = service.deregister_critical_after_secs {
                check = check.with_deregister_critical_after(Duration::from_secs(after));
            }
            record = record.with_check(check);
        }

        record.validate()?;
        Ok(record)
    }

    pub fn heartbeat_config(&self) -> HeartbeatConfig {
        HeartbeatConfig {
            max_pass_attempts: self.heartbeat.max_pass_attempts,
            retry_backoff: Duration::from_millis(self.heartbeat.retry_backoff_ms),
            redo_on_failure: self.heartbeat.redo_on_failure,
        }
    }
}
