//! Availability probe for a hub endpoint.

use crate::wire::subscribe_url;
use async_trait::async_trait;
use futures_util::StreamExt;
use log::debug;
use std::time::Duration;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

/// Bounded-time liveness check. Never fails: any error or timeout is
/// reported as `false`.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, endpoint: &str, timeout: Duration) -> bool;
}

/// Opens a throwaway subscription (`ping-<uuid>`) and looks for either a
/// first frame or an immediate failure.
#[derive(Debug, Clone)]
pub struct WsProber {
    settle: Duration,
}

impl WsProber {
    /// `settle` is how long to wait for the first frame once connected.
    /// Silence for that long counts as available.
    pub fn new(settle: Duration) -> Self {
        Self { settle }
    }
}

#[async_trait]
impl Prober for WsProber {
    async fn probe(&self, endpoint: &str, limit: Duration) -> bool {
        let url = match subscribe_url(endpoint, &format!("ping-{}", uuid::Uuid::new_v4())) {
            Ok(url) => url,
            Err(e) => {
                debug!("[Probe] {}: {}", endpoint, e);
                return false;
            }
        };

        let mut ws = match timeout(limit, connect_async(url.as_str())).await {
            Ok(Ok((ws, _))) => ws,
            Ok(Err(e)) => {
                debug!("[Probe] {} refused: {}", endpoint, e);
                return false;
            }
            Err(_) => {
                debug!("[Probe] {} timed out after {:?}", endpoint, limit);
                return false;
            }
        };

        let available = match timeout(self.settle.min(limit), ws.next()).await {
            Ok(Some(Ok(Message::Close(_)))) | Ok(None) => false,
            Ok(Some(Ok(_))) => true,
            Ok(Some(Err(e))) => {
                debug!("[Probe] {} failed after connect: {}", endpoint, e);
                false
            }
            Err(_) => true,
        };

        let _ = timeout(self.settle.min(limit), ws.close(None)).await;
        available
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unreachable_endpoint_is_unavailable() {
        // bind then drop to get a port nobody listens on
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let prober = WsProber::new(Duration::from_millis(50));
        let up = prober
            .probe(&format!("ws://{}", addr), Duration::from_secs(1))
            .await;
        assert!(!up);
    }
}
