//! TTL heartbeat loop
//!
//! Keeps a service's TTL check alive: every `TTL / 2` the loop sends a `fail`
//! update immediately followed by a `pass` update for `service:<ID>`. The fail/pass
//! pair forces the agent to reset the TTL countdown even when it treats repeated
//! `pass` calls as no-ops.
//!
//! Failures never end the loop. A failed `fail` update is logged; a failed `pass`
//! update is retried a bounded number of times, then reported as a
//! [`HeartbeatEvent::PassFailed`] and, when redo is enabled, the registration is
//! sent again so an agent that lost its state (e.g. after a restart) relearns the
//! instance.

use std::sync::Arc;
use std::time::Duration;

use tether_consul::{AgentServiceRegistration, CheckStatus, DiscoveryClient};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::error::{DiscoveryError, Result};
use crate::record::{ServiceRecord, check_ttl};

pub const DEFAULT_MAX_PASS_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(500);

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Called after redo put the service back into the agent
pub type ReregisterHook = Arc<dyn Fn() + Send + Sync>;

/// Retry and redo policy of the heartbeat loop
#[derive(Debug, Clone, PartialEq)]
pub struct HeartbeatConfig {
    /// Attempts per tick for the pass update (at least one is always made)
    pub max_pass_attempts: u32,
    /// Pause between pass attempts
    pub retry_backoff: Duration,
    /// Re-send the registration after a tick's pass attempts are exhausted
    pub redo_on_failure: bool,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            max_pass_attempts: DEFAULT_MAX_PASS_ATTEMPTS,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
            redo_on_failure: true,
        }
    }
}

/// Status reports published by a running heartbeat
#[derive(Debug, Clone, PartialEq)]
pub enum HeartbeatEvent {
    /// The TTL check was passed this tick
    Refreshed { service_id: String },
    /// The fail update of the fail/pass pair was rejected
    FailUpdateFailed { service_id: String, error: String },
    /// Every pass attempt of a tick failed
    PassFailed {
        service_id: String,
        attempts: u32,
        error: String,
    },
    Reregistered { service_id: String },
    ReregisterFailed { service_id: String, error: String },
}

/// A heartbeat bound to one service ID and TTL, not yet running
pub struct Heartbeat {
    client: Arc<dyn DiscoveryClient>,
    service_id: String,
    check_id: String,
    period: Duration,
    config: HeartbeatConfig,
    registration: Option<AgentServiceRegistration>,
    on_reregistered: Option<ReregisterHook>,
    events: broadcast::Sender<HeartbeatEvent>,
}

impl Heartbeat {
    /// Create a heartbeat for `service_id` whose check has the given TTL.
    ///
    /// The TTL must be at least [`MIN_TTL`](crate::record::MIN_TTL).
    pub fn new(
        client: Arc<dyn DiscoveryClient>,
        service_id: impl Into<String>,
        ttl: Duration,
    ) -> Result<Self> {
        let service_id = service_id.into();
        check_ttl(&service_id, ttl)?;

        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Ok(Self {
            client,
            check_id: format!("service:{}", service_id),
            service_id,
            period: ttl / 2,
            config: HeartbeatConfig::default(),
            registration: None,
            on_reregistered: None,
            events,
        })
    }

    /// Create a heartbeat for a record carrying a TTL check; the record's registration
    /// is kept for redo.
    pub fn for_record(
        client: Arc<dyn DiscoveryClient>,
        record: &ServiceRecord,
    ) -> Result<Self> {
        let ttl = record.ttl().ok_or_else(|| {
            DiscoveryError::InvalidRecord(format!("service {} has no TTL check", record.id))
        })?;

        let mut heartbeat = Self::new(client, record.id.clone(), ttl)?;
        heartbeat.registration = Some(record.to_registration());
        Ok(heartbeat)
    }

    pub fn with_config(mut self, config: HeartbeatConfig) -> Self {
        self.config = config;
        self
    }

    /// Publish events on an existing channel instead of the heartbeat's own
    pub fn with_events(mut self, events: broadcast::Sender<HeartbeatEvent>) -> Self {
        self.events = events;
        self
    }

    /// Run `hook` every time redo re-registers the service
    pub fn on_reregistered(mut self, hook: ReregisterHook) -> Self {
        self.on_reregistered = Some(hook);
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HeartbeatEvent> {
        self.events.subscribe()
    }

    /// Tick interval (half the TTL)
    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn check_id(&self) -> &str {
        &self.check_id
    }

    /// Start the loop on the current tokio runtime
    pub fn spawn(self) -> HeartbeatHandle {
        let (stop_tx, stop_rx) = watch::channel(false);
        let service_id = self.service_id.clone();
        let task = tokio::spawn(self.run(stop_rx));

        HeartbeatHandle {
            service_id,
            stop_tx,
            task: Some(task),
        }
    }

    async fn run(self, mut stop: watch::Receiver<bool>) {
        info!(
            service_id = %self.service_id,
            check_id = %self.check_id,
            "Heartbeat started with period {:?}",
            self.period
        );

        let mut ticker = tokio::time::interval_at(Instant::now() + self.period, self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.beat(&mut stop).await;
                }
                _ = stop.changed() => break,
            }

            if *stop.borrow() {
                break;
            }
        }

        info!(service_id = %self.service_id, "Heartbeat stopped");
    }

    /// One tick: fail, then pass with bounded retry
    async fn beat(&self, stop: &mut watch::Receiver<bool>) {
        if let Err(e) = self
            .client
            .update_ttl(&self.check_id, CheckStatus::Critical, "")
            .await
        {
            warn!(check_id = %self.check_id, "TTL fail update failed: {}", e);
            self.publish(HeartbeatEvent::FailUpdateFailed {
                service_id: self.service_id.clone(),
                error: e.to_string(),
            });
        }

        let attempts = self.config.max_pass_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            match self
                .client
                .update_ttl(&self.check_id, CheckStatus::Passing, "")
                .await
            {
                Ok(()) => {
                    debug!(check_id = %self.check_id, attempt, "TTL check refreshed");
                    self.publish(HeartbeatEvent::Refreshed {
                        service_id: self.service_id.clone(),
                    });
                    return;
                }
                Err(e) => {
                    warn!(check_id = %self.check_id, attempt, "TTL pass update failed: {}", e);
                    last_error = e.to_string();
                }
            }

            if attempt < attempts {
                tokio::select! {
                    _ = tokio::time::sleep(self.config.retry_backoff) => {}
                    _ = stop.changed() => return,
                }
            }
        }

        error!(
            service_id = %self.service_id,
            check_id = %self.check_id,
            "TTL pass update failed after {} attempts: {}",
            attempts,
            last_error
        );
        self.publish(HeartbeatEvent::PassFailed {
            service_id: self.service_id.clone(),
            attempts,
            error: last_error,
        });

        if self.config.redo_on_failure {
            self.redo().await;
        }
    }

    async fn redo(&self) {
        let Some(registration) = &self.registration else {
            return;
        };

        match self.client.register(registration).await {
            Ok(()) => {
                info!(
                    service_id = %self.service_id,
                    "Re-registered service after heartbeat failure"
                );
                if let Some(hook) = &self.on_reregistered {
                    hook();
                }
                self.publish(HeartbeatEvent::Reregistered {
                    service_id: self.service_id.clone(),
                });
            }
            Err(e) => {
                error!(service_id = %self.service_id, "Failed to re-register service: {}", e);
                self.publish(HeartbeatEvent::ReregisterFailed {
                    service_id: self.service_id.clone(),
                    error: e.to_string(),
                });
            }
        }
    }

    fn publish(&self, event: HeartbeatEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

/// Handle to a running heartbeat; dropping it stops the loop.
pub struct HeartbeatHandle {
    service_id: String,
    stop_tx: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl HeartbeatHandle {
    pub fn service_id(&self) -> &str {
        &self.service_id
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Signal the loop and wait for it to exit. A tick in progress completes its
    /// fail/pass pair first; pending retries are abandoned.
    pub async fn stop(mut self) {
        let _ = self.stop_tx.send(true);

        if let Some(task) = self.task.take()
            && let Err(e) = task.await
            && !e.is_cancelled()
        {
            error!(service_id = %self.service_id, "Heartbeat task panicked: {}", e);
        }
    }
}

impl Drop for HeartbeatHandle {
    fn drop(&mut self) {
        let _ = self.stop_tx.send(true);
    }
}
