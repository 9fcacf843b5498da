//! Signaling client: connects to one of several relay endpoints with failover and exchanges
//! typed control messages.

use std::sync::Arc;
use std::time::Duration;

use bitroute_core::{EndpointRotation, SignalingMessage};
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::transport::RelayConnector;

pub struct SignalingClient {
    connector: Arc<dyn RelayConnector>,
    endpoints: Vec<String>,
    rotation: EndpointRotation,
    connect_timeout: Duration,
    rounds: u32,
    retry_delay: Duration,
}

impl SignalingClient {
    pub fn new(connector: Arc<dyn RelayConnector>, config: &Config) -> Self {
        Self::with_settings(
            connector,
            config.signaling_endpoints.clone(),
            config.connect_timeout(),
            config.connect_rounds,
            config.retry_delay(),
        )
    }

    pub fn with_settings(
        connector: Arc<dyn RelayConnector>,
        endpoints: Vec<String>,
        connect_timeout: Duration,
        rounds: u32,
        retry_delay: Duration,
    ) -> Self {
        Self {
            connector,
            rotation: EndpointRotation::new(endpoints.len()),
            endpoints,
            connect_timeout,
            rounds,
            retry_delay,
        }
    }

    /// Endpoint the next `connect` tries first.
    pub fn preferred_endpoint(&self) -> Option<&str> {
        self.endpoints.get(self.rotation.start()).map(String::as_str)
    }

    /// Try every endpoint in rotation, each bounded by the connect timeout; after a full
    /// pass fails, wait and retry, up to the round budget.
    pub async fn connect(&mut self) -> Result<SignalingChannel, SignalingError> {
        let mut attempts = 0u32;
        for round in 0..self.rounds {
            if round > 0 {
                sleep(self.retry_delay).await;
            }
            let order: Vec<usize> = self.rotation.order().collect();
            for idx in order {
                let endpoint = &self.endpoints[idx];
                attempts += 1;
                debug!(event = "signaling_connect", endpoint = %endpoint, round, attempts);
                match timeout(self.connect_timeout, self.connector.open(endpoint)).await {
                    Ok(Ok(link)) => {
                        self.rotation.mark_success(idx);
                        info!(event = "signaling_connected", endpoint = %endpoint, attempts);
                        return Ok(SignalingChannel {
                            endpoint: endpoint.clone(),
                            outbound: link.outbound,
                            inbound: link.inbound,
                        });
                    }
                    Ok(Err(e)) => {
                        warn!(event = "signaling_connect_failed", endpoint = %endpoint, %e);
                    }
                    Err(_) => {
                        warn!(
                            event = "signaling_connect_timeout",
                            endpoint = %endpoint,
                            timeout_ms = self.connect_timeout.as_millis() as u64
                        );
                    }
                }
            }
        }
        Err(SignalingError::Unavailable { attempts })
    }
}

/// An open relay connection.
pub struct SignalingChannel {
    endpoint: String,
    outbound: mpsc::UnboundedSender<String>,
    inbound: mpsc::UnboundedReceiver<String>,
}

impl SignalingChannel {
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn send(&self, msg: &SignalingMessage) -> Result<(), SignalingError> {
        let text = msg.to_json().map_err(SignalingError::Encode)?;
        debug!(event = "signaling_send", kind = msg.kind());
        self.outbound.send(text).map_err(|_| SignalingError::Closed)
    }

    /// Next well-formed message; `None` once the relay link is gone. Malformed frames are
    /// logged and skipped.
    pub async fn recv(&mut self) -> Option<SignalingMessage> {
        loop {
            let text = self.inbound.recv().await?;
            match SignalingMessage::from_json(&text) {
                Ok(msg) => {
                    debug!(event = "signaling_recv", kind = msg.kind());
                    return Some(msg);
                }
                Err(e) => warn!(event = "signaling_malformed", %e, bytes = text.len()),
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SignalingError {
    #[error("no signaling endpoint reachable after {attempts} attempts")]
    Unavailable { attempts: u32 },
    #[error("signaling link closed")]
    Closed,
    #[error("encode: {0}")]
    Encode(serde_json::Error),
}
