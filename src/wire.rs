//! Frames exchanged over the hub's WebSocket routes.
//!
//! Every message is a single JSON text frame tagged with `type`. The three
//! routes mirror the hub operations:
//!
//! - `/ingest`: producer sends `measurement`* then `end`, hub answers `ack`
//! - `/subscribe?client_id=..`: hub sends `measurement` until the client closes
//! - `/health`: hub sends one `health` frame

use crate::error::{RelayError, Result};
use crate::measurement::Measurement;
use futures_util::{Sink, SinkExt};
use serde::{Deserialize, Serialize};
use tokio_tungstenite::tungstenite::{self, Message};
use url::{Url, form_urlencoded};

pub const INGEST_PATH: &str = "/ingest";
pub const SUBSCRIBE_PATH: &str = "/subscribe";
pub const HEALTH_PATH: &str = "/health";

/// Handshake header carrying the producer identity on `/ingest`.
pub const PRODUCER_HEADER: &str = "simulator-id";

/// Result of one ingest call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Acknowledgement {
    pub success: bool,
    pub message: String,
    /// Measurements consumed from the stream, including ones whose
    /// persistence failed.
    pub count: u64,
    #[serde(default)]
    pub store_failures: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: bool,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    Measurement(Measurement),
    End,
    Ack(Acknowledgement),
    Health(HealthStatus),
}

impl Frame {
    pub fn to_message(&self) -> Result<Message> {
        let text = serde_json::to_string(self)?;
        Ok(Message::Text(text.into()))
    }

    /// Decode a data frame. Returns `Ok(None)` for control frames (ping,
    /// pong, close) which carry no payload for the caller.
    pub fn from_message(message: &Message) -> Result<Option<Frame>> {
        match message {
            Message::Text(text) => {
                let text_str: &str = text;
                serde_json::from_str(text_str)
                    .map(Some)
                    .map_err(|e| RelayError::Protocol(format!("invalid frame: {}", e)))
            }
            Message::Binary(_) => Err(RelayError::Protocol(
                "binary frames are not supported".to_string(),
            )),
            _ => Ok(None),
        }
    }
}

/// Encode and write one frame.
pub async fn send_frame<S>(sink: &mut S, frame: &Frame) -> Result<()>
where
    S: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    sink.send(frame.to_message()?)
        .await
        .map_err(RelayError::from_ws)
}

/// Join a hub base URL (`ws://host:port`) and a route.
pub fn route_url(base: &str, path: &str) -> String {
    format!("{}{}", base.trim_end_matches('/'), path)
}

/// Subscribe URL for a given client id.
pub fn subscribe_url(base: &str, client_id: &str) -> Result<Url> {
    let mut url = Url::parse(&route_url(base, SUBSCRIBE_PATH))
        .map_err(|e| RelayError::Config(format!("invalid hub url '{}': {}", base, e)))?;
    url.query_pairs_mut().append_pair("client_id", client_id);
    Ok(url)
}

/// Extract a query parameter from a request URI query string.
pub fn query_param(query: Option<&str>, key: &str) -> Option<String> {
    form_urlencoded::parse(query?.as_bytes())
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.into_owned())
        .filter(|v| !v.is_empty())
}
