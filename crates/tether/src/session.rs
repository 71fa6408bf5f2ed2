//! Tether - one agent connection shared by every registration and lookup

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tether_consul::{ClientConfig, ConsulClient, DiscoveryClient};
use tracing::{info, warn};

use crate::directory::ServiceDirectory;
use crate::error::{DiscoveryError, Result};
use crate::heartbeat::HeartbeatConfig;
use crate::record::ServiceRecord;
use crate::registrar::Registrar;

/// Registration session over one long-lived discovery client.
///
/// Registrars are keyed by service ID, so each ID has at most one registrar and
/// therefore at most one heartbeat.
pub struct Tether {
    client: Arc<dyn DiscoveryClient>,
    heartbeat_config: HeartbeatConfig,
    registrars: DashMap<String, Arc<Registrar>>,
}

impl Tether {
    pub fn new(client: Arc<dyn DiscoveryClient>) -> Self {
        Self {
            client,
            heartbeat_config: HeartbeatConfig::default(),
            registrars: DashMap::new(),
        }
    }

    /// Build a Consul client from `config` and wrap it in a session
    pub fn connect(config: ClientConfig) -> Result<Self> {
        let client = ConsulClient::new(config)?;
        Ok(Self::new(Arc::new(client)))
    }

    pub fn with_heartbeat_config(mut self, config: HeartbeatConfig) -> Self {
        self.heartbeat_config = config;
        self
    }

    pub fn client(&self) -> Arc<dyn DiscoveryClient> {
        self.client.clone()
    }

    /// A directory sharing this session's client
    pub fn directory(&self) -> ServiceDirectory {
        ServiceDirectory::new(self.client.clone())
    }

    /// Track a registrar for `record` and register it.
    ///
    /// A failed registration still leaves the registrar tracked (its heartbeat keeps
    /// running); the error is returned and also available from the registrar.
    pub async fn register(&self, record: ServiceRecord) -> Result<Arc<Registrar>> {
        let registrar = match self.registrars.entry(record.id.clone()) {
            Entry::Occupied(_) => return Err(DiscoveryError::AlreadyRegistered(record.id)),
            Entry::Vacant(slot) => {
                let registrar = Registrar::new(self.client.clone(), record)?
                    .with_heartbeat_config(self.heartbeat_config.clone());
                slot.insert(Arc::new(registrar)).clone()
            }
        };

        registrar.register().await?;
        Ok(registrar)
    }

    pub fn get(&self, service_id: &str) -> Option<Arc<Registrar>> {
        self.registrars.get(service_id).map(|r| r.value().clone())
    }

    /// Deregister and stop tracking `service_id`. On failure it stays tracked so the
    /// call can be retried.
    pub async fn deregister(&self, service_id: &str) -> Result<()> {
        let registrar = self
            .get(service_id)
            .ok_or_else(|| DiscoveryError::NotRegistered(service_id.to_string()))?;

        registrar.deregister().await?;
        self.registrars.remove(service_id);
        Ok(())
    }

    /// Stop the heartbeat of `service_id` and stop tracking it, leaving the agent as is
    pub async fn forget(&self, service_id: &str) -> Option<Arc<Registrar>> {
        let (_, registrar) = self.registrars.remove(service_id)?;
        registrar.stop_heartbeat().await;
        Some(registrar)
    }

    /// Deregister every tracked service. Failures are logged and the first one is
    /// returned after all services were attempted.
    pub async fn shutdown(&self) -> Result<()> {
        let registrars: Vec<Arc<Registrar>> =
            self.registrars.iter().map(|r| r.value().clone()).collect();
        info!("Deregistering {} service(s)", registrars.len());

        let results = futures::future::join_all(registrars.iter().map(|registrar| async move {
            // A tick in flight may still re-register, so check the state only once the
            // heartbeat is gone
            registrar.stop_heartbeat().await;
            let result = if registrar.state().is_registered() {
                registrar.deregister().await
            } else {
                Ok(())
            };
            (registrar.service_id().to_string(), result)
        }))
        .await;

        let mut first_error = None;
        for (service_id, result) in results {
            match result {
                Ok(()) => {
                    self.registrars.remove(&service_id);
                }
                Err(e) => {
                    warn!(service_id = %service_id, "Shutdown could not deregister service: {}", e);
                    first_error.get_or_insert(e);
                }
            }
        }

        first_error.map_or(Ok(()), Err)
    }

    pub fn len(&self) -> usize {
        self.registrars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registrars.is_empty()
    }
}
