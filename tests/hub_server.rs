//! End-to-end tests of a hub served over WebSocket on a loopback port.

use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_util::sync::CancellationToken;
use weather_relay::aggregator::{HubConnector, Prober, WsConnector, WsProber};
use weather_relay::hub::{BroadcastHub, HubServer};
use weather_relay::simulation::IngestClient;
use weather_relay::store::{MeasurementStore, MemoryStore};
use weather_relay::wire::{Frame, HEALTH_PATH, INGEST_PATH, route_url};
use weather_relay::{DayPhase, Measurement};

struct TestHub {
    url: String,
    hub: Arc<BroadcastHub>,
    store: Arc<MemoryStore>,
    shutdown: CancellationToken,
}

impl Drop for TestHub {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn start_hub(name: &str) -> TestHub {
    let store = Arc::new(MemoryStore::new());
    let hub = Arc::new(BroadcastHub::new(name, store.clone(), 16));
    let server = HubServer::bind("127.0.0.1:0", hub.clone()).await.unwrap();
    let url = format!("ws://{}", server.local_addr().unwrap());
    let shutdown = server.shutdown_token();
    tokio::spawn(server.run());
    TestHub {
        url,
        hub,
        store,
        shutdown,
    }
}

fn reading(minute: u32, temperature: f64) -> Measurement {
    Measurement {
        timestamp: format!("2025-10-19 14:{:02}:00", minute),
        day_phase: DayPhase::Day,
        temperature,
        humidity: Some(45.0),
        pressure: 1013.2,
        is_raining: false,
    }
}

async fn eventually(mut check: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn test_ingest_persists_and_acknowledges() {
    let node = start_hub("WeatherNode-0").await;
    let client = IngestClient::new(node.url.clone(), "Simulator-0");

    let m = Measurement {
        timestamp: "2025-10-19 14:30:00".to_string(),
        day_phase: DayPhase::Day,
        temperature: 22.5,
        humidity: Some(45.0),
        pressure: 1013.2,
        is_raining: false,
    };
    let ack = client.publish(std::slice::from_ref(&m)).await.unwrap();

    assert!(ack.success, "{}", ack.message);
    assert_eq!(ack.count, 1);
    let rows = node.store.rows();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].measurement(), m);
    assert_eq!(rows[0].producer_id, "Simulator-0");
    assert_eq!(rows[0].node_name, "WeatherNode-0");
    assert!(rows[0].peer.is_some());
}

#[tokio::test]
async fn test_subscriber_receives_in_order() {
    let node = start_hub("n").await;
    let mut stream = WsConnector.subscribe(&node.url, "dash-A").await.unwrap();
    eventually(|| node.hub.subscriber_count() == 1).await;

    let (m1, m2) = (reading(0, 20.0), reading(1, 21.0));
    let client = IngestClient::new(node.url.clone(), "Simulator-1");
    let ack = client.publish(&[m1.clone(), m2.clone()]).await.unwrap();
    assert_eq!(ack.count, 2);

    assert_eq!(stream.next().await.unwrap().unwrap(), m1);
    assert_eq!(stream.next().await.unwrap().unwrap(), m2);
}

#[tokio::test]
async fn test_late_joiner_gets_last_measurement_first() {
    let node = start_hub("n").await;
    let client = IngestClient::new(node.url.clone(), "Simulator-1");
    client
        .publish(&[reading(0, 20.0), reading(1, 21.0)])
        .await
        .unwrap();

    let mut stream = WsConnector.subscribe(&node.url, "late").await.unwrap();
    assert_eq!(stream.next().await.unwrap().unwrap(), reading(1, 21.0));

    client.publish(&[reading(2, 22.0)]).await.unwrap();
    assert_eq!(stream.next().await.unwrap().unwrap(), reading(2, 22.0));
}

#[tokio::test]
async fn test_closing_subscriber_unregisters() {
    let node = start_hub("n").await;
    let stream = WsConnector.subscribe(&node.url, "short-lived").await.unwrap();
    eventually(|| node.hub.subscriber_count() == 1).await;

    drop(stream);
    eventually(|| node.hub.subscriber_count() == 0).await;
}

#[tokio::test]
async fn test_health_route() {
    let node = start_hub("WeatherNode-2").await;
    let (mut ws, _) = connect_async(route_url(&node.url, HEALTH_PATH).as_str())
        .await
        .unwrap();

    let message = ws.next().await.unwrap().unwrap();
    match Frame::from_message(&message).unwrap() {
        Some(Frame::Health(health)) => {
            assert!(health.status);
            assert!(health.message.contains("WeatherNode-2"));
        }
        other => panic!("unexpected frame: {:?}", other),
    }
}

#[tokio::test]
async fn test_unknown_route_is_rejected() {
    let node = start_hub("n").await;
    let err = connect_async(route_url(&node.url, "/metrics").as_str())
        .await
        .unwrap_err();
    match err {
        tungstenite::Error::Http(response) => assert_eq!(response.status().as_u16(), 404),
        other => panic!("unexpected error: {}", other),
    }
}

#[tokio::test]
async fn test_invalid_frame_fails_the_ingest_call() {
    let node = start_hub("n").await;
    let (mut ws, _) = connect_async(route_url(&node.url, INGEST_PATH).as_str())
        .await
        .unwrap();

    ws.send(Frame::Measurement(reading(0, 20.0)).to_message().unwrap())
        .await
        .unwrap();
    ws.send(Message::Text("not json".into())).await.unwrap();

    let message = ws.next().await.unwrap().unwrap();
    match Frame::from_message(&message).unwrap() {
        Some(Frame::Ack(ack)) => {
            assert!(!ack.success);
            assert_eq!(ack.count, 1);
        }
        other => panic!("unexpected frame: {:?}", other),
    }
    assert_eq!(node.store.count(None).await.unwrap(), 1);
}

#[tokio::test]
async fn test_close_without_end_keeps_received_measurements() {
    let node = start_hub("n").await;
    let (mut ws, _) = connect_async(route_url(&node.url, INGEST_PATH).as_str())
        .await
        .unwrap();
    ws.send(Frame::Measurement(reading(0, 20.0)).to_message().unwrap())
        .await
        .unwrap();
    ws.close(None).await.unwrap();

    eventually(|| node.store.rows().len() == 1).await;
    assert!(node.store.rows()[0].producer_id.starts_with("simulator-port-"));
}

#[tokio::test]
async fn test_probe_reports_running_hub() {
    let node = start_hub("n").await;
    let prober = WsProber::new(Duration::from_millis(100));
    assert!(prober.probe(&node.url, Duration::from_secs(2)).await);

    node.shutdown.cancel();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!prober.probe(&node.url, Duration::from_secs(2)).await);
}
