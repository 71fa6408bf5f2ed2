//! tether-consul - Consul agent HTTP client
//!
//! This crate provides:
//! - `ConsulClient`, a typed client for the agent endpoints Tether needs
//!   (service registration, TTL check updates, service and health queries)
//! - The `DiscoveryClient` trait the rest of the workspace programs against
//! - Model types matching the agent's JSON

pub mod client;
pub mod config;
pub mod discovery;
pub mod error;
pub mod model;

pub use client::ConsulClient;
pub use config::ClientConfig;
pub use discovery::DiscoveryClient;
pub use error::ConsulError;
pub use model::*;
