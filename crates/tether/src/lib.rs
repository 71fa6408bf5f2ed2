//! tether - service registration, TTL heartbeat and peer lookup
//!
//! This crate provides:
//! - `Registrar`: registers one service instance and owns its TTL heartbeat
//! - `Heartbeat`: the cancellable loop that keeps a TTL check passing
//! - `ServiceDirectory`: address lookups by name, tag and ID
//! - `Tether`: a session sharing one agent client across registrars and lookups
//! - `Settings`: typed configuration from a file and `TETHER_*` environment variables
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use tether::{ServiceRecord, Tether};
//! use tether_consul::ClientConfig;
//!
//! let tether = Tether::connect(ClientConfig::new("127.0.0.1:8500"))?;
//! let record = ServiceRecord::new("orders-1", "orders", "10.0.0.5", 8080)
//!     .with_tag("v1")
//!     .with_ttl(Duration::from_secs(10));
//! tether.register(record).await?;
//!
//! let addr = tether.directory().first_by_tag("v1").await?;
//! tether.shutdown().await?;
//! ```

pub mod directory;
pub mod error;
pub mod heartbeat;
pub mod memory;
pub mod record;
pub mod registrar;
pub mod session;
pub mod settings;

pub use directory::ServiceDirectory;
pub use error::{DiscoveryError, Result};
pub use heartbeat::{Heartbeat, HeartbeatConfig, HeartbeatEvent, HeartbeatHandle};
pub use memory::InMemoryAgent;
pub use record::{CheckKind, CheckSpec, GRPC_PORT_META_KEY, ServiceRecord};
pub use registrar::{Registrar, RegistrationState};
pub use session::Tether;
pub use settings::Settings;
