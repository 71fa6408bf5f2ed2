//! Registrar and directory over the HTTP client, against a mocked agent

use std::time::Duration;

use serde_json::json;
use tether::{DiscoveryError, RegistrationState, ServiceRecord, Tether};
use tether_consul::ClientConfig;
use wiremock::matchers::{body_partial_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn connect(server: &MockServer) -> Tether {
    Tether::connect(ClientConfig::new(&server.uri())).unwrap()
}

fn record() -> ServiceRecord {
    ServiceRecord::new("orders-1", "orders", "10.0.0.5", 8080)
        .with_tag("v1")
        .with_grpc_port(9090)
        .with_ttl(Duration::from_secs(60))
}

#[tokio::test]
async fn test_register_and_deregister_round_trip() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/v1/agent/service/register"))
        .and(body_partial_json(json!({
            "ID": "orders-1",
            "Name": "orders",
            "Tags": ["v1"],
            "Meta": {"grpc_port": "9090"},
            "Check": {"TTL": "60s"}
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/v1/agent/service/deregister/orders-1"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let tether = connect(&server);
    let registrar = tether.register(record()).await.unwrap();
    assert_eq!(registrar.state(), RegistrationState::Registered);

    tether.deregister("orders-1").await.unwrap();
    assert_eq!(registrar.state(), RegistrationState::Unregistered);
}

#[tokio::test]
async fn test_rejected_registration_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/v1/agent/service/register"))
        .respond_with(ResponseTemplate::new(500).set_body_string("rpc error: No cluster leader"))
        .mount(&server)
        .await;

    let tether = connect(&server);
    let err = tether.register(record()).await.unwrap_err();

    match err {
        DiscoveryError::RegisterFailed(message) => assert!(message.contains("No cluster leader")),
        other => panic!("unexpected error: {other}"),
    }
    let registrar = tether.get("orders-1").unwrap();
    assert_eq!(registrar.state(), RegistrationState::RegisterFailed);
    assert!(registrar.last_error().unwrap().contains("No cluster leader"));

    tether.forget("orders-1").await;
}

#[tokio::test]
async fn test_lookup_by_tag_uses_filter_expression() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/agent/services"))
        .and(query_param("filter", "\"v1\" in Tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "orders-1": {"ID": "orders-1", "Service": "orders", "Tags": ["v1"], "Address": "10.0.0.5", "Port": 8080},
            "orders-2": {"ID": "orders-2", "Service": "orders", "Tags": ["v1"], "Address": "10.0.0.6", "Port": 8080}
        })))
        .mount(&server)
        .await;

    let directory = connect(&server).directory();

    assert_eq!(directory.first_by_tag("v1").await.unwrap(), "10.0.0.5:8080");
    assert_eq!(
        directory.list_by_tag("v1").await.unwrap(),
        vec!["10.0.0.5:8080", "10.0.0.6:8080"]
    );
}

#[tokio::test]
async fn test_resolve_by_name_and_tag_over_health_endpoint() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/health/service/orders"))
        .and(query_param("tag", "v1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {
                "Node": {"Node": "node-a", "Address": "10.0.0.1"},
                "Service": {"ID": "orders-1", "Service": "orders", "Tags": ["v1"], "Address": "10.0.0.5", "Port": 8080},
                "Checks": []
            }
        ])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/health/service/billing"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let directory = connect(&server).directory();

    let (addr, id) = directory.resolve_by_name_and_tag("orders", "v1").await.unwrap();
    assert_eq!(addr, "10.0.0.5:8080");
    assert_eq!(id, "orders-1");

    let err = directory
        .resolve_by_name_and_tag("billing", "v1")
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_agent_error_surfaces_as_transport() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/agent/services"))
        .respond_with(ResponseTemplate::new(403).set_body_string("Permission denied"))
        .mount(&server)
        .await;

    let err = connect(&server).directory().list_all().await.unwrap_err();
    assert!(matches!(err, DiscoveryError::Transport(_)));
}
