//! Client side of the hub's `/ingest` route.

use crate::error::{RelayError, Result};
use crate::measurement::Measurement;
use crate::wire::{Acknowledgement, Frame, INGEST_PATH, PRODUCER_HEADER, route_url, send_frame};
use futures_util::StreamExt;
use log::debug;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;

/// Streams measurements into one hub, one ingest call per batch.
#[derive(Debug, Clone)]
pub struct IngestClient {
    hub_url: String,
    simulator_id: String,
}

impl IngestClient {
    pub fn new(hub_url: impl Into<String>, simulator_id: impl Into<String>) -> Self {
        Self {
            hub_url: hub_url.into(),
            simulator_id: simulator_id.into(),
        }
    }

    pub fn simulator_id(&self) -> &str {
        &self.simulator_id
    }

    /// Open an ingest call, send every measurement followed by `end`, and
    /// wait for the hub's acknowledgement.
    pub async fn publish(&self, measurements: &[Measurement]) -> Result<Acknowledgement> {
        let url = route_url(&self.hub_url, INGEST_PATH);
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(RelayError::from_ws)?;
        let id = HeaderValue::from_str(&self.simulator_id)
            .map_err(|e| RelayError::Config(format!("invalid simulator id: {}", e)))?;
        request.headers_mut().insert(PRODUCER_HEADER, id);

        let (mut ws, _) = connect_async(request).await.map_err(RelayError::from_ws)?;

        for measurement in measurements {
            send_frame(&mut ws, &Frame::Measurement(measurement.clone())).await?;
        }
        send_frame(&mut ws, &Frame::End).await?;
        debug!(
            "[Sim {}] Sent {} measurement(s) to {}",
            self.simulator_id,
            measurements.len(),
            url
        );

        loop {
            let message = match ws.next().await {
                Some(Ok(message)) => message,
                Some(Err(e)) => return Err(RelayError::from_ws(e)),
                None => break,
            };
            if let Message::Close(_) = message {
                break;
            }
            match Frame::from_message(&message)? {
                Some(Frame::Ack(ack)) => {
                    let _ = ws.close(None).await;
                    return Ok(ack);
                }
                Some(other) => {
                    return Err(RelayError::Protocol(format!(
                        "expected acknowledgement, got {:?}",
                        other
                    )));
                }
                None => {}
            }
        }

        Err(RelayError::Protocol(
            "connection closed before acknowledgement".to_string(),
        ))
    }
}
