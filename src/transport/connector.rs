// Socket seam for the transport.
// A Connector opens one physical link and exposes it as a pair of channels,
// so the transport state machine never touches the socket type directly.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, warn};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};

use crate::error::TransportError;

/// Commands from the transport to a live link.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkCommand {
    Text(String),
    Close,
}

/// Events from a live link to the transport.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    Text(String),
    Closed { code: Option<u16>, reason: String },
}

/// An open link. Dropping `outbound` closes the socket; `inbound` ends after `Closed`.
pub struct Link {
    pub outbound: mpsc::UnboundedSender<LinkCommand>,
    pub inbound: mpsc::UnboundedReceiver<LinkEvent>,
}

#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Open a link to `url`. Resolves once the socket is open, or fails if it
    /// errors before opening.
    async fn open(&self, url: &str) -> Result<Link, TransportError>;
}

/// Production connector backed by tokio-tungstenite.
#[derive(Debug, Default, Clone)]
pub struct WebSocketConnector;

#[async_trait]
impl Connector for WebSocketConnector {
    async fn open(&self, url: &str) -> Result<Link, TransportError> {
        let (stream, _response) = connect_async(url)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        let (mut write, mut read) = stream.split();

        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<LinkCommand>();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<LinkEvent>();

        // Writer: forward commands until Close or until the transport drops its sender
        tokio::spawn(async move {
            while let Some(command) = outbound_rx.recv().await {
                match command {
                    LinkCommand::Text(text) => {
                        if let Err(e) = write.send(WsMessage::Text(text)).await {
                            warn!("Failed to write to socket: {}", e);
                            break;
                        }
                    }
                    LinkCommand::Close => break,
                }
            }
            if let Err(e) = write.close().await {
                debug!("Socket close returned: {}", e);
            }
        });

        // Reader: forward text frames and report exactly one Closed event
        tokio::spawn(async move {
            let mut closed = LinkEvent::Closed {
                code: None,
                reason: "stream ended".to_string(),
            };
            while let Some(message) = read.next().await {
                match message {
                    Ok(WsMessage::Text(text)) => {
                        if inbound_tx.send(LinkEvent::Text(text)).is_err() {
                            // Transport discarded this link
                            return;
                        }
                    }
                    Ok(WsMessage::Close(frame)) => {
                        closed = match frame {
                            Some(frame) => LinkEvent::Closed {
                                code: Some(u16::from(frame.code)),
                                reason: frame.reason.into_owned(),
                            },
                            None => LinkEvent::Closed {
                                code: None,
                                reason: String::new(),
                            },
                        };
                        break;
                    }
                    Ok(WsMessage::Binary(data)) => {
                        debug!("Ignoring {} byte binary frame", data.len());
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!("Socket error: {}", e);
                        closed = LinkEvent::Closed {
                            code: None,
                            reason: e.to_string(),
                        };
                        break;
                    }
                }
            }
            let _ = inbound_tx.send(closed);
        });

        Ok(Link {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}
