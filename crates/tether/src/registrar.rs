//! Registrar - owns one service registration and its heartbeat
//!
//! Registration is best effort: a failed `register()` is logged, remembered and
//! returned, but the heartbeat still starts so the instance keeps trying to assert
//! liveness. When the heartbeat's redo later gets the record into the agent, the
//! state moves to `Registered`. `deregister()` stops the heartbeat before the
//! deregistration request goes out, so no tick can refresh a check the agent is
//! about to forget. `register()` and `deregister()` never overlap.

use std::sync::Arc;

use parking_lot::Mutex;
use tether_consul::DiscoveryClient;
use tokio::sync::broadcast;
use tracing::{error, info};

use crate::error::{DiscoveryError, Result};
use crate::heartbeat::{Heartbeat, HeartbeatConfig, HeartbeatEvent, HeartbeatHandle};
use crate::record::ServiceRecord;

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Registration lifecycle of one record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationState {
    Unregistered,
    Registered,
    RegisterFailed,
    DeregisterFailed,
}

impl RegistrationState {
    /// Whether the record reached the agent at some point and was not removed since
    pub fn is_registered(&self) -> bool {
        matches!(self, Self::Registered | Self::DeregisterFailed)
    }
}

#[derive(Debug)]
struct Status {
    state: RegistrationState,
    last_error: Option<String>,
}

/// Registers one service instance with the discovery agent
pub struct Registrar {
    client: Arc<dyn DiscoveryClient>,
    record: ServiceRecord,
    heartbeat_config: HeartbeatConfig,
    status: Arc<Mutex<Status>>,
    // Held for the whole of register/deregister/stop_heartbeat
    lifecycle: tokio::sync::Mutex<()>,
    heartbeat: tokio::sync::Mutex<Option<HeartbeatHandle>>,
    events: broadcast::Sender<HeartbeatEvent>,
}

impl std::fmt::Debug for Registrar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registrar")
            .field("record", &self.record)
            .finish_non_exhaustive()
    }
}

impl Registrar {
    /// Create a registrar for a validated record
    pub fn new(client: Arc<dyn DiscoveryClient>, record: ServiceRecord) -> Result<Self> {
        record.validate()?;

        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Ok(Self {
            client,
            record,
            heartbeat_config: HeartbeatConfig::default(),
            status: Arc::new(Mutex::new(Status {
                state: RegistrationState::Unregistered,
                last_error: None,
            })),
            lifecycle: tokio::sync::Mutex::new(()),
            heartbeat: tokio::sync::Mutex::new(None),
            events,
        })
    }

    pub fn with_heartbeat_config(mut self, config: HeartbeatConfig) -> Self {
        self.heartbeat_config = config;
        self
    }

    pub fn record(&self) -> &ServiceRecord {
        &self.record
    }

    pub fn service_id(&self) -> &str {
        &self.record.id
    }

    pub fn state(&self) -> RegistrationState {
        self.status.lock().state
    }

    /// Message of the most recent register/deregister failure
    pub fn last_error(&self) -> Option<String> {
        self.status.lock().last_error.clone()
    }

    /// Receive heartbeat status reports for this record
    pub fn subscribe(&self) -> broadcast::Receiver<HeartbeatEvent> {
        self.events.subscribe()
    }

    pub async fn heartbeat_running(&self) -> bool {
        self.heartbeat
            .lock()
            .await
            .as_ref()
            .is_some_and(HeartbeatHandle::is_running)
    }

    /// Register the record with the agent, then make sure its TTL heartbeat runs.
    pub async fn register(&self) -> Result<()> {
        let _lifecycle = self.lifecycle.lock().await;

        let registration = self.record.to_registration();
        let result = self.client.register(&registration).await;

        let outcome = match result {
            Ok(()) => {
                info!(service_id = %self.record.id, "Service discovery registration succeeded");
                self.set_status(RegistrationState::Registered, None);
                Ok(())
            }
            Err(e) => {
                error!(
                    service_id = %self.record.id,
                    "Service discovery registration failed: {}", e
                );
                let message = e.to_string();
                self.set_status(RegistrationState::RegisterFailed, Some(message.clone()));
                Err(DiscoveryError::RegisterFailed(message))
            }
        };

        self.ensure_heartbeat().await?;
        outcome
    }

    /// Stop the heartbeat, then remove the record from the agent.
    pub async fn deregister(&self) -> Result<()> {
        let _lifecycle = self.lifecycle.lock().await;

        if !self.state().is_registered() {
            return Err(DiscoveryError::NotRegistered(self.record.id.clone()));
        }

        self.halt_heartbeat().await;

        match self.client.deregister(&self.record.id).await {
            Ok(()) => {
                info!(service_id = %self.record.id, "Service deregistered from service discovery");
                self.set_status(RegistrationState::Unregistered, None);
                Ok(())
            }
            Err(e) => {
                error!(
                    service_id = %self.record.id,
                    "Service discovery deregistration failed: {}", e
                );
                let message = e.to_string();
                self.set_status(RegistrationState::DeregisterFailed, Some(message.clone()));
                Err(DiscoveryError::DeregisterFailed(message))
            }
        }
    }

    /// Stop the heartbeat without touching the agent
    pub async fn stop_heartbeat(&self) {
        let _lifecycle = self.lifecycle.lock().await;
        self.halt_heartbeat().await;
    }

    async fn halt_heartbeat(&self) {
        let handle = self.heartbeat.lock().await.take();
        if let Some(handle) = handle {
            handle.stop().await;
        }
    }

    async fn ensure_heartbeat(&self) -> Result<()> {
        if self.record.ttl().is_none() {
            return Ok(());
        }

        let mut slot = self.heartbeat.lock().await;
        if slot.as_ref().is_some_and(HeartbeatHandle::is_running) {
            return Ok(());
        }

        let status = self.status.clone();
        let heartbeat = Heartbeat::for_record(self.client.clone(), &self.record)?
            .with_config(self.heartbeat_config.clone())
            .with_events(self.events.clone())
            .on_reregistered(Arc::new(move || {
                status.lock().state = RegistrationState::Registered;
            }));
        *slot = Some(heartbeat.spawn());
        Ok(())
    }

    fn set_status(&self, state: RegistrationState, last_error: Option<String>) {
        let mut status = self.status.lock();
        status.state = state;
        if last_error.is_some() {
            status.last_error = last_error;
        }
    }
}
