//! WebSocket front end of a hub.
//!
//! Routes are picked during the handshake: `/ingest`, `/subscribe` and
//! `/health`. Anything else is refused with 404 before the upgrade.

use super::producer::ProducerInfo;
use super::service::BroadcastHub;
use crate::error::{RelayError, Result};
use crate::measurement::Measurement;
use crate::wire::{
    self, Frame, HEALTH_PATH, INGEST_PATH, PRODUCER_HEADER, SUBSCRIBE_PATH, send_frame,
};
use futures_util::{SinkExt, Stream, StreamExt, stream};
use log::{debug, info, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{WebSocketStream, accept_hdr_async};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Route {
    Ingest { producer_header: Option<String> },
    Subscribe { client_id: Option<String> },
    Health,
}

fn route_for(request: &Request) -> Option<Route> {
    match request.uri().path() {
        INGEST_PATH => Some(Route::Ingest {
            producer_header: request
                .headers()
                .get(PRODUCER_HEADER)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
        }),
        SUBSCRIBE_PATH => Some(Route::Subscribe {
            client_id: wire::query_param(request.uri().query(), "client_id"),
        }),
        HEALTH_PATH => Some(Route::Health),
        _ => None,
    }
}

/// Listener serving one [`BroadcastHub`].
pub struct HubServer {
    hub: Arc<BroadcastHub>,
    listener: TcpListener,
    shutdown: CancellationToken,
}

impl HubServer {
    pub async fn bind(addr: &str, hub: Arc<BroadcastHub>) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            hub,
            listener,
            shutdown: CancellationToken::new(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Cancelling this token stops accepting and ends every open session.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub async fn run(self) -> Result<()> {
        info!(
            "[Hub {}] Listening on ws://{}",
            self.hub.node_name(),
            self.local_addr()?
        );

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let hub = self.hub.clone();
                        let shutdown = self.shutdown.child_token();
                        tokio::spawn(handle_connection(hub, stream, peer, shutdown));
                    }
                    Err(e) => {
                        warn!("[Hub {}] Accept failed: {}", self.hub.node_name(), e);
                    }
                },
            }
        }

        info!("[Hub {}] Listener stopped", self.hub.node_name());
        Ok(())
    }
}

async fn handle_connection(
    hub: Arc<BroadcastHub>,
    stream: TcpStream,
    peer: SocketAddr,
    shutdown: CancellationToken,
) {
    let mut route = None;
    let callback = |request: &Request, response: Response| {
        match route_for(request) {
            Some(r) => {
                route = Some(r);
                Ok(response)
            }
            None => {
                let mut refusal = ErrorResponse::new(Some(format!(
                    "unknown route {}",
                    request.uri().path()
                )));
                *refusal.status_mut() = StatusCode::NOT_FOUND;
                Err(refusal)
            }
        }
    };

    let ws = match accept_hdr_async(stream, callback).await {
        Ok(ws) => ws,
        Err(e) => {
            debug!("[Hub {}] Handshake with {} failed: {}", hub.node_name(), peer, e);
            return;
        }
    };

    match route {
        Some(Route::Ingest { producer_header }) => {
            let producer =
                ProducerInfo::resolve(producer_header.as_deref(), Some(&peer.to_string()));
            serve_ingest(&hub, ws, producer, shutdown).await;
        }
        Some(Route::Subscribe { client_id }) => {
            serve_subscribe(&hub, ws, client_id, shutdown).await;
        }
        Some(Route::Health) => serve_health(&hub, ws).await,
        None => {}
    }
}

/// Turn the read half of an ingest socket into a measurement stream that
/// ends on an `end` frame or a close, and yields one error on anything else.
fn measurement_stream<R>(read: R) -> impl Stream<Item = Result<Measurement>>
where
    R: Stream<Item = std::result::Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    stream::unfold(Some(read), |state| async move {
        let Some(mut read) = state else {
            return None;
        };
        loop {
            let message = match read.next().await {
                None => return None,
                Some(Err(e)) => return Some((Err(RelayError::from_ws(e)), None)),
                Some(Ok(Message::Close(_))) => return None,
                Some(Ok(message)) => message,
            };
            match Frame::from_message(&message) {
                Ok(Some(Frame::Measurement(m))) => return Some((Ok(m), Some(read))),
                Ok(Some(Frame::End)) => return None,
                Ok(Some(other)) => {
                    let err = RelayError::Protocol(format!(
                        "unexpected frame on ingest stream: {:?}",
                        other
                    ));
                    return Some((Err(err), None));
                }
                Ok(None) => continue,
                Err(e) => return Some((Err(e), None)),
            }
        }
    })
}

async fn serve_ingest(
    hub: &BroadcastHub,
    ws: WebSocketStream<TcpStream>,
    producer: ProducerInfo,
    shutdown: CancellationToken,
) {
    let (mut write, read) = ws.split();

    let ack = tokio::select! {
        _ = shutdown.cancelled() => return,
        ack = hub.ingest(measurement_stream(read), &producer) => ack,
    };

    // the producer may already be gone after a close without `end`
    if let Err(e) = send_frame(&mut write, &Frame::Ack(ack)).await {
        debug!(
            "[Hub {}] Could not deliver acknowledgement to {}: {}",
            hub.node_name(),
            producer.producer_id,
            e
        );
    }
    let _ = write.close().await;
}

async fn serve_subscribe(
    hub: &BroadcastHub,
    ws: WebSocketStream<TcpStream>,
    client_id: Option<String>,
    shutdown: CancellationToken,
) {
    let mut subscription = hub.subscribe(client_id.as_deref());
    let (mut write, mut read) = ws.split();

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            next = subscription.recv() => match next {
                Some(measurement) => {
                    if let Err(e) = send_frame(&mut write, &Frame::Measurement(measurement)).await {
                        warn!(
                            "[Hub {}] Write to subscriber {} failed: {}",
                            hub.node_name(),
                            subscription.client_id(),
                            e
                        );
                        break;
                    }
                }
                None => {
                    debug!(
                        "[Hub {}] Subscriber {} was dropped by the hub",
                        hub.node_name(),
                        subscription.client_id()
                    );
                    break;
                }
            },
            incoming = read.next() => match incoming {
                None | Some(Err(_)) | Some(Ok(Message::Close(_))) => break,
                Some(Ok(_)) => {}
            },
        }
    }

    info!(
        "[Hub {}] Subscription ended: {}",
        hub.node_name(),
        subscription.client_id()
    );
    drop(subscription);
    let _ = write.close().await;
}

async fn serve_health(hub: &BroadcastHub, ws: WebSocketStream<TcpStream>) {
    let (mut write, _read) = ws.split();
    if let Err(e) = send_frame(&mut write, &Frame::Health(hub.health())).await {
        debug!("[Hub {}] Health reply failed: {}", hub.node_name(), e);
    }
    let _ = write.close().await;
}
