//! HTTP client for the Consul agent API
//!
//! One `ConsulClient` is built per agent address and shared (it is cheap to clone);
//! every request carries the configured ACL token and is bounded by the configured
//! timeouts.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};
use url::Url;

use crate::config::ClientConfig;
use crate::discovery::DiscoveryClient;
use crate::error::{ConsulError, Result};
use crate::model::{AgentService, AgentServiceRegistration, CheckStatus, ServiceEntry};

const TOKEN_HEADER: &str = "X-Consul-Token";

/// Consul agent HTTP client
#[derive(Clone, Debug)]
pub struct ConsulClient {
    client: Client,
    base_url: Url,
    config: ClientConfig,
}

impl ConsulClient {
    /// Create a new client; fails only on an unusable address or TLS backend setup.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let base_url = Url::parse(&config.base_url()?)
            .map_err(|e| ConsulError::InvalidAddress(e.to_string()))?;

        let client = Client::builder()
            .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
            .timeout(Duration::from_millis(config.read_timeout_ms))
            .build()?;

        Ok(Self {
            client,
            base_url,
            config,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Base URL of the agent, e.g. `http://127.0.0.1:8500/`
    pub fn base_url(&self) -> &str {
        self.base_url.as_str()
    }

    /// Build an endpoint URL, percent-encoding each path segment
    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ConsulError::InvalidAddress(self.config.address.clone()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let builder = self.client.request(method, url);
        match &self.config.token {
            Some(token) if !token.is_empty() => builder.header(TOKEN_HEADER, token),
            _ => builder,
        }
    }

    /// Send a request whose response body is ignored
    async fn send_empty(&self, builder: RequestBuilder) -> Result<()> {
        let response = builder.send().await?;
        Self::check_status(response).await.map(|_| ())
    }

    /// Send a request and parse the JSON response body
    async fn send_json<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T> {
        let response = builder.send().await?;
        let response = Self::check_status(response).await?;
        let body = response.text().await?;
        Ok(serde_json::from_str(&body)?)
    }

    async fn check_status(response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        warn!("Agent request failed with status {}: {}", status, body.trim());
        Err(ConsulError::RequestFailed {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl DiscoveryClient for ConsulClient {
    async fn register(&self, registration: &AgentServiceRegistration) -> Result<()> {
        let url = self.endpoint(&["v1", "agent", "service", "register"])?;
        debug!(service_id = registration.service_id(), "Registering service with agent");

        self.send_empty(self.request(Method::PUT, url).json(registration))
            .await
    }

    async fn deregister(&self, service_id: &str) -> Result<()> {
        let url = self.endpoint(&["v1", "agent", "service", "deregister", service_id])?;
        debug!(service_id, "Deregistering service from agent");

        self.send_empty(self.request(Method::PUT, url)).await
    }

    async fn update_ttl(&self, check_id: &str, status: CheckStatus, note: &str) -> Result<()> {
        let url = self.endpoint(&["v1", "agent", "check", status.endpoint(), check_id])?;

        let mut builder = self.request(Method::PUT, url);
        if !note.is_empty() {
            builder = builder.query(&[("note", note)]);
        }
        self.send_empty(builder).await
    }

    async fn services(&self) -> Result<HashMap<String, AgentService>> {
        let url = self.endpoint(&["v1", "agent", "services"])?;
        self.send_json(self.request(Method::GET, url)).await
    }

    async fn services_with_filter(&self, filter: &str) -> Result<HashMap<String, AgentService>> {
        let url = self.endpoint(&["v1", "agent", "services"])?;
        self.send_json(self.request(Method::GET, url).query(&[("filter", filter)]))
            .await
    }

    async fn health_service(
        &self,
        service: &str,
        tag: &str,
        passing_only: bool,
    ) -> Result<Vec<ServiceEntry>> {
        let url = self.endpoint(&["v1", "health", "service", service])?;

        let mut query: Vec<(&str, &str)> = Vec::new();
        if !tag.is_empty() {
            query.push(("tag", tag));
        }
        if passing_only {
            query.push(("passing", "true"));
        }
        if let Some(dc) = self.config.datacenter.as_deref() {
            query.push(("dc", dc));
        }

        self.send_json(self.request(Method::GET, url).query(&query))
            .await
    }
}
