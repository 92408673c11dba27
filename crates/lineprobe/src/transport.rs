//! Connection plumbing between a session and the host runtime.
//! - Transport: ordered text-frame channel pair owned by a session
//! - Connector: produces a fresh transport per worker spawn
//! - WebSocketConnector: inspector WebSocket (`node --inspect`)

use futures::future::BoxFuture;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, trace, warn};

use crate::error::{ProbeError, ProbeResult};

/// Ordered, bidirectional stream of protocol text frames.
#[derive(Debug)]
pub struct Transport {
    pub(crate) outbound: UnboundedSender<String>,
    pub(crate) inbound: UnboundedReceiver<String>,
}

impl Transport {
    #[must_use]
    pub fn new(outbound: UnboundedSender<String>, inbound: UnboundedReceiver<String>) -> Self {
        Self { outbound, inbound }
    }

    /// In-memory transport plus the host-side end of it.
    #[must_use]
    pub fn pair() -> (Self, TransportPeer) {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        (
            Self::new(out_tx, in_rx),
            TransportPeer {
                received: out_rx,
                sender: in_tx,
            },
        )
    }
}

/// Host-runtime side of an in-memory [`Transport`].
#[derive(Debug)]
pub struct TransportPeer {
    received: UnboundedReceiver<String>,
    sender: UnboundedSender<String>,
}

impl TransportPeer {
    /// Next frame written by the session, `None` once it hung up.
    pub async fn recv(&mut self) -> Option<String> {
        self.received.recv().await
    }

    /// Deliver a frame to the session. Returns false once it hung up.
    pub fn send(&self, frame: impl Into<String>) -> bool {
        self.sender.send(frame.into()).is_ok()
    }

    /// Split into raw channel halves.
    #[must_use]
    pub fn into_parts(self) -> (UnboundedReceiver<String>, UnboundedSender<String>) {
        (self.received, self.sender)
    }
}

/// Source of transports for probe workers.
pub trait Connector: Send + Sync + 'static {
    /// Open a new connection. Runs inside the worker's runtime.
    fn connect(&self) -> BoxFuture<'static, ProbeResult<Transport>>;
}

/// Connector for a V8 inspector WebSocket endpoint.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    url: String,
}

impl WebSocketConnector {
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Connector for WebSocketConnector {
    fn connect(&self) -> BoxFuture<'static, ProbeResult<Transport>> {
        let url = self.url.clone();
        Box::pin(async move { connect_websocket(&url).await })
    }
}

/// Open the inspector WebSocket and pump its frames on the current runtime.
pub async fn connect_websocket(url: &str) -> ProbeResult<Transport> {
    let (stream, _response) = tokio_tungstenite::connect_async(url)
        .await
        .map_err(|err| ProbeError::Transport(format!("{url}: {err}").into()))?;
    debug!(url, "inspector websocket connected");
    let (mut sink, mut source) = stream.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
    let (in_tx, in_rx) = mpsc::unbounded_channel::<String>();

    tokio::spawn(async move {
        while let Some(frame) = out_rx.recv().await {
            trace!(frame = %frame, "->");
            if let Err(err) = sink.send(Message::Text(frame.into())).await {
                warn!(%err, "inspector websocket write failed");
                break;
            }
        }
        let _ = sink.close().await;
    });

    tokio::spawn(async move {
        while let Some(message) = source.next().await {
            match message {
                Ok(Message::Text(text)) => {
                    trace!(frame = %text.as_str(), "<-");
                    if in_tx.send(text.as_str().to_owned()).is_err() {
                        break;
                    }
                }
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(err) => {
                    warn!(%err, "inspector websocket read failed");
                    break;
                }
            }
        }
        debug!("inspector websocket closed");
    });

    Ok(Transport::new(out_tx, in_rx))
}
