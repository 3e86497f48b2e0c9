//! Opens subscription streams to hubs.

use crate::error::{RelayError, Result};
use crate::measurement::Measurement;
use crate::wire::{Frame, subscribe_url};
use async_trait::async_trait;
use futures_util::StreamExt;
use futures_util::stream::{self, BoxStream};
use log::debug;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

/// Source of live measurement streams.
///
/// The returned stream ends cleanly when the hub closes the subscription
/// and yields one error (then ends) on a transport or protocol failure.
#[async_trait]
pub trait HubConnector: Send + Sync {
    async fn subscribe(
        &self,
        endpoint: &str,
        client_id: &str,
    ) -> Result<BoxStream<'static, Result<Measurement>>>;
}

#[derive(Debug, Clone, Default)]
pub struct WsConnector;

#[async_trait]
impl HubConnector for WsConnector {
    async fn subscribe(
        &self,
        endpoint: &str,
        client_id: &str,
    ) -> Result<BoxStream<'static, Result<Measurement>>> {
        let url = subscribe_url(endpoint, client_id)?;
        let (ws, _) = connect_async(url.as_str())
            .await
            .map_err(RelayError::from_ws)?;
        debug!("[Connector] Subscribed to {} as {}", endpoint, client_id);

        let measurements = stream::unfold(Some(ws), |state| async move {
            let Some(mut ws) = state else {
                return None;
            };
            loop {
                let message = match ws.next().await {
                    None | Some(Ok(Message::Close(_))) => return None,
                    Some(Err(e)) => return Some((Err(RelayError::from_ws(e)), None)),
                    Some(Ok(message)) => message,
                };
                match Frame::from_message(&message) {
                    Ok(Some(Frame::Measurement(m))) => return Some((Ok(m), Some(ws))),
                    Ok(Some(other)) => {
                        let err = RelayError::Protocol(format!(
                            "unexpected frame on subscription: {:?}",
                            other
                        ));
                        return Some((Err(err), None));
                    }
                    Ok(None) => continue,
                    Err(e) => return Some((Err(e), None)),
                }
            }
        });

        Ok(measurements.boxed())
    }
}
