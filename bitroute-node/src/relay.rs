//! WebSocket relay link (tokio-tungstenite). Each half of the socket is pumped on its own task.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, warn};

use crate::transport::{RelayConnector, RelayLink, TransportError};

#[derive(Debug, Clone, Default)]
pub struct WebSocketRelay;

#[async_trait]
impl RelayConnector for WebSocketRelay {
    async fn open(&self, endpoint: &str) -> Result<RelayLink, TransportError> {
        let (ws, _) = connect_async(endpoint)
            .await
            .map_err(|e| TransportError::Connect {
                endpoint: endpoint.to_string(),
                reason: e.to_string(),
            })?;
        let (mut write_half, mut read_half) = ws.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<String>();

        let endpoint_w = endpoint.to_string();
        tokio::spawn(async move {
            while let Some(text) = out_rx.recv().await {
                if let Err(e) = write_half.send(Message::Text(text)).await {
                    warn!(event = "relay_send_failed", endpoint = %endpoint_w, %e);
                    break;
                }
            }
            let _ = write_half.close().await;
        });

        let endpoint_r = endpoint.to_string();
        tokio::spawn(async move {
            while let Some(next) = read_half.next().await {
                match next {
                    Ok(Message::Text(text)) => {
                        if in_tx.send(text).is_err() {
                            break;
                        }
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        warn!(event = "relay_read_failed", endpoint = %endpoint_r, %e);
                        break;
                    }
                }
            }
            debug!(event = "relay_closed", endpoint = %endpoint_r);
        });

        Ok(RelayLink {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}
