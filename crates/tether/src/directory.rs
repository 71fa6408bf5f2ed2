//! Service Directory - read-only peer lookups against the discovery agent
//!
//! Every lookup is one agent call through the shared client. The agent answers
//! with unordered maps; where a lookup returns a single "first" match, the instance
//! with the lowest ID wins.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use tether_consul::{AgentService, DiscoveryClient};
use tracing::debug;

use crate::error::{DiscoveryError, Result};

/// Lookups over the services known to the agent
#[derive(Clone)]
pub struct ServiceDirectory {
    client: Arc<dyn DiscoveryClient>,
}

impl ServiceDirectory {
    pub fn new(client: Arc<dyn DiscoveryClient>) -> Self {
        Self { client }
    }

    /// Resolve an instance of `name` carrying `tag`.
    ///
    /// Returns the instance's `host:port` and its ID. Instances are returned whether
    /// or not their checks pass.
    pub async fn resolve_by_name_and_tag(
        &self,
        name: &str,
        tag: &str,
    ) -> Result<(String, String)> {
        let entries = self.client.health_service(name, tag, false).await?;

        let entry = entries
            .into_iter()
            .min_by(|a, b| a.service.id.cmp(&b.service.id))
            .ok_or_else(|| DiscoveryError::NotFound(format!("name={} tag={}", name, tag)))?;

        debug!(service = name, tag, service_id = %entry.service.id, "Resolved service");
        Ok((entry.service.host_port(), entry.service.id))
    }

    /// All services registered with the agent, keyed by instance ID
    pub async fn list_all(&self) -> Result<HashMap<String, AgentService>> {
        Ok(self.client.services().await?)
    }

    /// `host:port` of an instance carrying `tag`
    pub async fn first_by_tag(&self, tag: &str) -> Result<String> {
        let services = self.client.services_with_filter(&tag_filter(tag)).await?;

        first(services.values())
            .map(AgentService::host_port)
            .ok_or_else(|| DiscoveryError::NotFound(format!("tag={}", tag)))
    }

    /// `host:port` of the instance with this ID
    pub async fn first_by_id(&self, id: &str) -> Result<String> {
        if id.is_empty() {
            return Err(DiscoveryError::NotFound("id is empty".to_string()));
        }

        let services = self.client.services().await?;
        services
            .get(id)
            .map(AgentService::host_port)
            .ok_or_else(|| DiscoveryError::NotFound(format!("id={}", id)))
    }

    /// `host:port` of every instance carrying `tag`; no match is an empty list.
    pub async fn list_by_tag(&self, tag: &str) -> Result<Vec<String>> {
        let services = self.client.services_with_filter(&tag_filter(tag)).await?;

        let mut matches: Vec<&AgentService> = services.values().collect();
        matches.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(matches.into_iter().map(AgentService::host_port).collect())
    }

    /// All instances registered under the service name `name`
    pub async fn list_by_name(&self, name: &str) -> Result<HashMap<String, AgentService>> {
        Ok(self.client.services_with_filter(&name_filter(name)).await?)
    }

    /// First instance sharing at least one tag with `tags`.
    ///
    /// Note this is an overlap match: an instance tagged only `b` satisfies
    /// `["a", "b"]`. Use [`first_with_all_tags`](Self::first_with_all_tags) when every
    /// tag must be present.
    pub async fn first_with_any_tag(&self, tags: &[String]) -> Result<(String, String)> {
        let wanted: BTreeSet<&str> = tags.iter().map(String::as_str).collect();
        let services = self.client.services().await?;

        let matches = services
            .values()
            .filter(|s| s.tags().iter().any(|t| wanted.contains(t.as_str())));

        first(matches)
            .map(|s| (s.host_port(), s.id.clone()))
            .ok_or_else(|| DiscoveryError::NotFound(format!("any of tags={:?}", tags)))
    }

    /// First instance carrying every tag in `tags`. An empty `tags` matches nothing.
    pub async fn first_with_all_tags(&self, tags: &[String]) -> Result<(String, String)> {
        if tags.is_empty() {
            return Err(DiscoveryError::NotFound("no tags given".to_string()));
        }

        let services = self.client.services().await?;

        let matches = services
            .values()
            .filter(|s| tags.iter().all(|t| s.has_tag(t)));

        first(matches)
            .map(|s| (s.host_port(), s.id.clone()))
            .ok_or_else(|| DiscoveryError::NotFound(format!("all of tags={:?}", tags)))
    }
}

fn first<'a>(services: impl Iterator<Item = &'a AgentService>) -> Option<&'a AgentService> {
    services.min_by(|a, b| a.id.cmp(&b.id))
}

/// Quote a value for an agent filter expression
fn quote(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for c in value.chars() {
        if c == '"' || c == '\\' {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}

fn tag_filter(tag: &str) -> String {
    format!("{} in Tags", quote(tag))
}

fn name_filter(name: &str) -> String {
    format!("Service == {}", quote(name))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::memory::{AgentCall, FailOn, InMemoryAgent};
    use crate::record::ServiceRecord;

    async fn seed(agent: &InMemoryAgent, records: &[ServiceRecord]) {
        for record in records {
            agent.register(&record.to_registration()).await.unwrap();
        }
    }

    fn tags(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    fn fleet() -> Vec<ServiceRecord> {
        vec![
            ServiceRecord::new("orders-1", "orders", "10.0.0.1", 8080).with_tags(["v1", "eu"]),
            ServiceRecord::new("orders-2", "orders", "10.0.0.2", 8080).with_tags(["v2", "eu"]),
            ServiceRecord::new("billing-1", "billing", "10.0.1.1", 9000)
                .with_tag("b")
                .with_ttl(Duration::from_secs(10)),
        ]
    }

    async fn directory() -> (InMemoryAgent, ServiceDirectory) {
        let agent = InMemoryAgent::new();
        seed(&agent, &fleet()).await;
        (agent.clone(), ServiceDirectory::new(Arc::new(agent)))
    }

    #[test]
    fn test_filter_expressions() {
        assert_eq!(tag_filter("v1"), r#""v1" in Tags"#);
        assert_eq!(name_filter("orders"), r#"Service == "orders""#);
        assert_eq!(quote(r#"a"b\c"#), r#""a\"b\\c""#);
    }

    #[tokio::test]
    async fn test_resolve_by_name_and_tag() {
        let (agent, directory) = directory().await;

        let (addr, id) = directory.resolve_by_name_and_tag("orders", "v2").await.unwrap();
        assert_eq!(addr, "10.0.0.2:8080");
        assert_eq!(id, "orders-2");

        // Critical instances are still returned
        let (addr, _) = directory.resolve_by_name_and_tag("billing", "").await.unwrap();
        assert_eq!(addr, "10.0.1.1:9000");

        let err = directory
            .resolve_by_name_and_tag("orders", "v9")
            .await
            .unwrap_err();
        assert!(err.is_not_found());

        assert!(agent.calls().contains(&AgentCall::HealthService {
            service: "orders".to_string(),
            tag: "v2".to_string(),
        }));
    }

    #[tokio::test]
    async fn test_list_all_and_by_name() {
        let (_, directory) = directory().await;

        assert_eq!(directory.list_all().await.unwrap().len(), 3);

        let orders = directory.list_by_name("orders").await.unwrap();
        let mut ids: Vec<_> = orders.keys().cloned().collect();
        ids.sort();
        assert_eq!(ids, vec!["orders-1", "orders-2"]);

        assert!(directory.list_by_name("ghost").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_first_and_list_by_tag() {
        let (_, directory) = directory().await;

        assert_eq!(directory.first_by_tag("eu").await.unwrap(), "10.0.0.1:8080");
        assert_eq!(
            directory.list_by_tag("eu").await.unwrap(),
            vec!["10.0.0.1:8080", "10.0.0.2:8080"]
        );

        assert!(directory.first_by_tag("us").await.unwrap_err().is_not_found());
        assert!(directory.list_by_tag("us").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_first_by_id() {
        let (_, directory) = directory().await;

        assert_eq!(directory.first_by_id("billing-1").await.unwrap(), "10.0.1.1:9000");
        assert!(directory.first_by_id("ghost").await.unwrap_err().is_not_found());
        assert!(directory.first_by_id("").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_any_tag_versus_all_tags() {
        let (_, directory) = directory().await;

        let (addr, id) = directory.first_with_any_tag(&tags(&["a", "b"])).await.unwrap();
        assert_eq!(addr, "10.0.1.1:9000");
        assert_eq!(id, "billing-1");

        let err = directory
            .first_with_all_tags(&tags(&["a", "b"]))
            .await
            .unwrap_err();
        assert!(err.is_not_found());

        let (_, id) = directory
            .first_with_all_tags(&tags(&["v2", "eu"]))
            .await
            .unwrap();
        assert_eq!(id, "orders-2");
    }

    #[tokio::test]
    async fn test_empty_tag_sets_match_nothing() {
        let (_, directory) = directory().await;

        assert!(directory.first_with_any_tag(&[]).await.unwrap_err().is_not_found());
        assert!(directory.first_with_all_tags(&[]).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_transport_errors_propagate() {
        let (agent, directory) = directory().await;
        agent.fail_next(FailOn::Query, 2);

        assert!(matches!(
            directory.list_by_tag("eu").await,
            Err(DiscoveryError::Transport(_))
        ));
        assert!(matches!(
            directory.first_by_id("orders-1").await,
            Err(DiscoveryError::Transport(_))
        ));
    }
}
