//! Persistent transport seam
//!
//! The connection manager talks to the wire through a [`TransportLink`], a pair
//! of channels backed by tasks that own the actual socket. [`WebSocketConnector`]
//! is the production implementation; tests substitute their own connector.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header::AUTHORIZATION, HeaderValue};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, info, warn};

use huddle_core::TransportError;

// ----------------------------------------------------------------------------
// Link Types
// ----------------------------------------------------------------------------

/// How the transport closed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseKind {
    /// Orderly close initiated by either side
    Normal,
    /// Error, reset or unexpected end of stream
    Abnormal { reason: String },
}

/// Signal delivered from the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportSignal {
    Text(String),
    Closed(CloseKind),
}

/// Command sent to the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkCommand {
    Text(String),
    /// Close with a normal close code
    Close,
}

/// An open transport session
#[derive(Debug)]
pub struct TransportLink {
    pub outbound: mpsc::UnboundedSender<LinkCommand>,
    pub inbound: mpsc::UnboundedReceiver<TransportSignal>,
}

/// Opens transport sessions
#[async_trait]
pub trait TransportConnector: Send + Sync + 'static {
    /// Open a session to `endpoint`, authenticating with `credential`
    async fn open(&self, endpoint: &str, credential: &str) -> Result<TransportLink, TransportError>;
}

// ----------------------------------------------------------------------------
// WebSocket Connector
// ----------------------------------------------------------------------------

/// WebSocket transport with bearer authentication
#[derive(Debug, Clone, Default)]
pub struct WebSocketConnector;

impl WebSocketConnector {
    pub fn new() -> Self {
        Self
    }
}

fn connection_failed(endpoint: &str, reason: impl ToString) -> TransportError {
    TransportError::ConnectionFailed {
        endpoint: endpoint.to_string(),
        reason: reason.to_string(),
    }
}

#[async_trait]
impl TransportConnector for WebSocketConnector {
    async fn open(&self, endpoint: &str, credential: &str) -> Result<TransportLink, TransportError> {
        let mut request = endpoint
            .into_client_request()
            .map_err(|e| connection_failed(endpoint, e))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", credential))
            .map_err(|e| connection_failed(endpoint, e))?;
        request.headers_mut().insert(AUTHORIZATION, bearer);

        let (stream, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| connection_failed(endpoint, e))?;
        info!("WebSocket connected to {}", endpoint);

        let (mut sink, mut source) = stream.split();
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<LinkCommand>();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

        // Writer: drains commands until close or until the manager drops its sender
        tokio::spawn(async move {
            while let Some(command) = outbound_rx.recv().await {
                match command {
                    LinkCommand::Text(text) => {
                        if let Err(e) = sink.send(WsMessage::Text(text)).await {
                            warn!("WebSocket write failed: {}", e);
                            break;
                        }
                    }
                    LinkCommand::Close => break,
                }
            }
            let close = CloseFrame {
                code: CloseCode::Normal,
                reason: "".into(),
            };
            if let Err(e) = sink.send(WsMessage::Close(Some(close))).await {
                debug!("WebSocket close frame not sent: {}", e);
            }
        });

        // Reader: forwards text frames and reports how the stream ended
        tokio::spawn(async move {
            let close = loop {
                match source.next().await {
                    Some(Ok(WsMessage::Text(text))) => {
                        if inbound_tx.send(TransportSignal::Text(text)).is_err() {
                            return;
                        }
                    }
                    Some(Ok(WsMessage::Close(frame))) => {
                        break match frame {
                            Some(frame) if frame.code != CloseCode::Normal => CloseKind::Abnormal {
                                reason: format!("closed with {}: {}", u16::from(frame.code), frame.reason),
                            },
                            _ => CloseKind::Normal,
                        };
                    }
                    Some(Ok(other)) => debug!("Ignoring non-text frame: {:?}", other),
                    Some(Err(e)) => {
                        break CloseKind::Abnormal {
                            reason: e.to_string(),
                        }
                    }
                    None => {
                        break CloseKind::Abnormal {
                            reason: "stream ended without close frame".to_string(),
                        }
                    }
                }
            };
            let _ = inbound_tx.send(TransportSignal::Closed(close));
        });

        Ok(TransportLink {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}
