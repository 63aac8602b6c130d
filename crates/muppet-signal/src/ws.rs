//! Websocket relay client.
//!
//! Relay frames are exchanged as JSON text messages. A writer task drains the
//! link's command queue onto the socket; a reader task parses incoming text
//! frames into [`RelayEvent`]s. Dropping the [`RelayLink`] closes the socket.

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use url::Url;

use crate::error::{Result, SignalError};
use crate::link::{RelayConnector, RelayLink};
use crate::message::{RelayCommand, RelayEvent};

/// Connects to a relay over a websocket.
#[derive(Debug, Clone, Default)]
pub struct WebSocketConnector;

impl WebSocketConnector {
    pub fn new() -> Self {
        Self
    }
}

impl RelayConnector for WebSocketConnector {
    async fn connect(&self, endpoint: &str) -> Result<RelayLink> {
        let url = websocket_url(endpoint)?;
        let (stream, _) =
            connect_async(url.as_str())
                .await
                .map_err(|err| SignalError::Connect {
                    endpoint: endpoint.to_string(),
                    reason: err.to_string(),
                })?;
        tracing::debug!(url = %url, "signaling websocket connected");

        let (mut ws_write, mut ws_read) = stream.split();
        let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel::<RelayCommand>();
        let (evt_tx, evt_rx) = mpsc::unbounded_channel::<RelayEvent>();

        tokio::spawn(async move {
            while let Some(command) = cmd_rx.recv().await {
                let text = match serde_json::to_string(&command) {
                    Ok(text) => text,
                    Err(err) => {
                        tracing::warn!(event = command.name(), error = %err, "failed to encode relay command");
                        continue;
                    }
                };
                if let Err(err) = ws_write.send(Message::Text(text)).await {
                    tracing::warn!(error = %err, "signaling websocket write failed");
                    break;
                }
            }
            let _ = ws_write.close().await;
        });

        tokio::spawn(async move {
            while let Some(frame) = ws_read.next().await {
                let text = match frame {
                    Ok(Message::Text(text)) => text,
                    Ok(Message::Binary(data)) => match String::from_utf8(data) {
                        Ok(text) => text,
                        Err(_) => continue,
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => continue,
                    Err(err) => {
                        tracing::debug!(error = %err, "signaling websocket closed");
                        break;
                    }
                };
                match serde_json::from_str::<RelayEvent>(&text) {
                    Ok(event) => {
                        if evt_tx.send(event).is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, len = text.len(), "unrecognized relay frame dropped");
                    }
                }
            }
        });

        Ok(RelayLink::new(url.to_string(), cmd_tx, evt_rx))
    }
}

/// Map an `http(s)` or `ws(s)` endpoint to the websocket URL to dial.
pub fn websocket_url(endpoint: &str) -> Result<Url> {
    let mut url = Url::parse(endpoint).map_err(|err| SignalError::InvalidEndpoint {
        endpoint: endpoint.to_string(),
        reason: err.to_string(),
    })?;

    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(SignalError::InvalidEndpoint {
                endpoint: endpoint.to_string(),
                reason: format!("unsupported scheme '{other}'"),
            })
        }
    };
    url.set_scheme(scheme)
        .map_err(|()| SignalError::InvalidEndpoint {
            endpoint: endpoint.to_string(),
            reason: format!("cannot switch scheme to '{scheme}'"),
        })?;
    Ok(url)
}
