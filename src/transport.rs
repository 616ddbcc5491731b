//! Message-relay transport.
//!
//! The relay delivers every message that was sent but promises no ordering
//! across senders; the engine's state machine is built to tolerate that.
//! [`WsTransport`] is the production client for a websocket relay endpoint.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::message::SignalMessage;

/// Reliable message-delivery substrate used for signaling.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open the relay connection and return the locally assigned
    /// participant id. Called exactly once, before any other operation.
    async fn connect(&self) -> Result<String>;

    /// Queue a message for delivery.
    async fn send(&self, message: SignalMessage) -> Result<()>;

    /// Next inbound message, in arrival order. `None` once the connection
    /// is gone.
    async fn recv(&self) -> Option<SignalMessage>;

    /// Tear the connection down.
    async fn disconnect(&self);
}

const CHANNEL_CAPACITY: usize = 100;

/// Websocket relay client.
///
/// One task pumps queued messages onto the socket, another decodes inbound
/// frames into the receive channel. Dropping the outgoing sender (on
/// `disconnect`) ends the write pump, which closes the socket.
pub struct WsTransport {
    url: String,
    outgoing: Mutex<Option<mpsc::Sender<SignalMessage>>>,
    incoming: Mutex<Option<mpsc::Receiver<SignalMessage>>>,
}

impl WsTransport {
    pub fn new(url: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            url: url.into(),
            outgoing: Mutex::new(None),
            incoming: Mutex::new(None),
        })
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn connect(&self) -> Result<String> {
        let (ws_stream, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| Error::Transport(format!("relay connection failed: {e}")))?;
        let (mut write, mut read) = ws_stream.split();

        let (outgoing_tx, mut outgoing_rx) = mpsc::channel::<SignalMessage>(CHANNEL_CAPACITY);
        let (incoming_tx, incoming_rx) = mpsc::channel(CHANNEL_CAPACITY);

        tokio::spawn(async move {
            while let Some(msg) = outgoing_rx.recv().await {
                match serde_json::to_string(&msg) {
                    Ok(json) => {
                        if write.send(json.into()).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("dropping unencodable message: {e}"),
                }
            }
            let _ = write.close().await;
        });

        tokio::spawn(async move {
            while let Some(frame) = read.next().await {
                let frame = match frame {
                    Ok(frame) => frame,
                    Err(e) => {
                        debug!("relay read ended: {e}");
                        break;
                    }
                };
                match frame {
                    Message::Text(text) => match serde_json::from_str::<SignalMessage>(&text) {
                        Ok(signal) => {
                            if incoming_tx.send(signal).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!("ignoring malformed relay frame: {e}"),
                    },
                    Message::Close(_) => break,
                    _ => {}
                }
            }
        });

        *self.outgoing.lock().await = Some(outgoing_tx);
        *self.incoming.lock().await = Some(incoming_rx);

        // The relay trusts client-chosen participant ids.
        Ok(format!("user-{}", rand::random::<u32>()))
    }

    async fn send(&self, message: SignalMessage) -> Result<()> {
        let guard = self.outgoing.lock().await;
        let tx = guard
            .as_ref()
            .ok_or_else(|| Error::Transport("relay connection not open".to_string()))?;
        tx.send(message)
            .await
            .map_err(|_| Error::Transport("relay connection closed".to_string()))
    }

    async fn recv(&self) -> Option<SignalMessage> {
        let mut guard = self.incoming.lock().await;
        match guard.as_mut() {
            Some(rx) => rx.recv().await,
            None => None,
        }
    }

    async fn disconnect(&self) {
        self.outgoing.lock().await.take();
        self.incoming.lock().await.take();
        debug!("relay connection closed");
    }
}
