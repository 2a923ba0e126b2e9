//! Integration tests for the HTTP/WebSocket gateway.
//!
//! These tests run a Server on an ephemeral port and talk to it with a
//! real HTTP client and a real WebSocket client.
//!
//! Tests CAN use `.unwrap()` and `.expect()` - this is allowed.

mod common;

use std::sync::Arc;

use flushcap_core::SensorRecord;
use flushcap_sensors::ManualSensor;
use flushcapd::hub::HubError;
use flushcapd::server::ServerError;
use reqwest::StatusCode;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite;

use common::{event, TestInstance};

#[tokio::test]
async fn test_home_page_renders_canonical_url() {
    let instance = TestInstance::spawn(Vec::new(), Vec::new()).await;

    let response = reqwest::get(instance.url("/")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers()["content-type"].to_str().unwrap().to_string();
    assert!(content_type.starts_with("text/html"));
    let body = response.text().await.unwrap();
    assert!(body.contains(&format!("ws://{}/changes", instance.addr)));

    instance.shutdown().await;
}

#[tokio::test]
async fn test_api_sensors_lists_records_in_order() {
    let sensors: Vec<Arc<dyn flushcap_core::Sensor>> = vec![
        Arc::new(ManualSensor::new("L", "unlocked")),
        Arc::new(ManualSensor::new("R", "locked")),
    ];
    let instance = TestInstance::spawn(sensors, Vec::new()).await;

    let response = reqwest::get(instance.url("/api/sensors")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let records: Vec<SensorRecord> = response.json().await.unwrap();
    assert_eq!(
        records,
        vec![
            SensorRecord::new("L", "unlocked"),
            SensorRecord::new("R", "locked"),
        ]
    );

    instance.shutdown().await;
}

#[tokio::test]
async fn test_changes_feed_replays_then_streams() {
    let sensor = Arc::new(ManualSensor::new("L", "unlocked"));
    let instance = TestInstance::spawn(vec![sensor.clone()], Vec::new()).await;

    let mut client = instance.connect_feed().await;
    assert_eq!(client.next_text().await.unwrap(), event("L", "unlocked"));

    sensor.set_state("locked").await.unwrap();
    assert_eq!(client.next_text().await.unwrap(), event("L", "locked"));

    instance.shutdown().await;
    // Terminating closes the feed
    assert_eq!(client.next_text().await, None);
}

#[tokio::test]
async fn test_requests_while_terminating_get_503() {
    let instance = TestInstance::spawn(Vec::new(), Vec::new()).await;

    // Terminate only the hub; the listener keeps accepting
    instance.hub.terminate().await.unwrap();

    for path in ["/", "/api/sensors"] {
        let response = reqwest::get(instance.url(path)).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE, "{path}");
        assert_eq!(response.text().await.unwrap(), "Server Terminating");
    }

    let err = connect_async(format!("ws://{}/changes", instance.addr))
        .await
        .unwrap_err();
    match err {
        tungstenite::Error::Http(response) => {
            assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE.as_u16());
        }
        other => panic!("unexpected error: {other}"),
    }

    // The hub is already terminated, so the server reports it
    let result = instance.server.terminate().await;
    assert!(matches!(result, Err(ServerError::Hub(HubError::Terminated))));
    instance.task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_terminate_twice_reports_terminated() {
    let instance = TestInstance::spawn(Vec::new(), Vec::new()).await;
    let server = Arc::clone(&instance.server);

    instance.shutdown().await;

    assert!(matches!(
        server.terminate().await,
        Err(ServerError::Hub(HubError::Terminated))
    ));
}

#[tokio::test]
async fn test_bind_failure_is_reported() {
    let taken = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let config = flushcapd::server::ServerConfig {
        listen: taken.local_addr().unwrap().to_string(),
        ..Default::default()
    };
    let server = flushcapd::server::Server::new(config, flushcapd::hub::spawn_hub());

    assert!(matches!(server.run().await, Err(ServerError::Bind { .. })));
}

#[tokio::test]
async fn test_register_sensors_after_terminate_is_a_clean_stop() {
    let hub = flushcapd::hub::spawn_hub();
    let server = flushcapd::server::Server::new(Default::default(), hub.clone());
    hub.terminate().await.unwrap();

    let sensors: Vec<Arc<dyn flushcap_core::Sensor>> =
        vec![Arc::new(ManualSensor::new("L", "unlocked"))];
    assert!(!server.register_sensors(&sensors).await.unwrap());
}

#[tokio::test]
async fn test_register_sensors_reports_duplicates() {
    let hub = flushcapd::hub::spawn_hub();
    let server = flushcapd::server::Server::new(Default::default(), hub.clone());

    let sensors: Vec<Arc<dyn flushcap_core::Sensor>> = vec![
        Arc::new(ManualSensor::new("L", "unlocked")),
        Arc::new(ManualSensor::new("R", "locked")),
    ];
    assert!(server.register_sensors(&sensors).await.unwrap());

    let again: Vec<Arc<dyn flushcap_core::Sensor>> =
        vec![Arc::new(ManualSensor::new("R", "unlocked"))];
    assert!(matches!(
        server.register_sensors(&again).await,
        Err(ServerError::Hub(HubError::AlreadyRegistered(name))) if name == "R"
    ));
    assert_eq!(hub.snapshot_sensors().await.unwrap().len(), 2);
}
