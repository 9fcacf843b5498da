//! WebRTC peer connection and data channel (webrtc-rs).

use std::sync::Arc;

use async_trait::async_trait;
use bitroute_core::{fragment_ranges, IceCandidate};
use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;

use crate::config::IceServer;
use crate::transport::{
    ChannelMessage, DataChannel, PeerConnection, PeerConnector, PeerEvent, TransportError,
};

fn rtc_err(e: webrtc::Error) -> TransportError {
    TransportError::Rtc(e.to_string())
}

#[derive(Debug, Clone, Default)]
pub struct RtcConnector;

#[async_trait]
impl PeerConnector for RtcConnector {
    async fn open(
        &self,
        ice_servers: &[IceServer],
        events: mpsc::UnboundedSender<PeerEvent>,
    ) -> Result<Arc<dyn PeerConnection>, TransportError> {
        let mut me = MediaEngine::default();
        let reg = register_default_interceptors(Registry::new(), &mut me).map_err(rtc_err)?;
        let api = APIBuilder::new()
            .with_media_engine(me)
            .with_interceptor_registry(reg)
            .build();

        let config = RTCConfiguration {
            ice_servers: ice_servers
                .iter()
                .map(|s| RTCIceServer {
                    urls: s.urls.clone(),
                    username: s.username.clone().unwrap_or_default(),
                    credential: s.credential.clone().unwrap_or_default(),
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        };
        let pc = Arc::new(api.new_peer_connection(config).await.map_err(rtc_err)?);

        let tx = events.clone();
        pc.on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
            let tx = tx.clone();
            Box::pin(async move {
                match s {
                    RTCPeerConnectionState::Connected => {
                        info!(event = "webrtc_connected", "peer connection established");
                    }
                    RTCPeerConnectionState::Failed => {
                        error!(event = "webrtc_failed", "peer connection failed");
                        let _ = tx.send(PeerEvent::Failed("peer connection failed".into()));
                    }
                    RTCPeerConnectionState::Disconnected => {
                        warn!(event = "webrtc_disconnected", "transient disconnect (ICE may recover)");
                    }
                    _ => {}
                }
            })
        }));

        let tx = events.clone();
        pc.on_ice_candidate(Box::new(move |c: Option<RTCIceCandidate>| {
            let tx = tx.clone();
            Box::pin(async move {
                let Some(c) = c else { return };
                match c.to_json() {
                    Ok(init) => {
                        let _ = tx.send(PeerEvent::LocalCandidate(IceCandidate {
                            candidate: init.candidate,
                            sdp_mid: init.sdp_mid,
                            sdp_mline_index: init.sdp_mline_index,
                            username_fragment: init.username_fragment,
                        }));
                    }
                    Err(e) => warn!(event = "ice_candidate_encode_failed", %e),
                }
            })
        }));

        // Answerer side: the offerer's channel arrives here.
        let tx = events.clone();
        pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
            let tx = tx.clone();
            Box::pin(async move {
                debug!(event = "remote_data_channel", label = %dc.label());
                attach_handlers(&dc, tx);
            })
        }));

        Ok(Arc::new(RtcPeer { pc, events }))
    }
}

/// Forward open/message/close callbacks of `dc` to the session.
fn attach_handlers(dc: &Arc<RTCDataChannel>, events: mpsc::UnboundedSender<PeerEvent>) {
    let tx = events.clone();
    let channel: Arc<dyn DataChannel> = Arc::new(RtcChannel { dc: dc.clone() });
    dc.on_open(Box::new(move || {
        let tx = tx.clone();
        let channel = channel.clone();
        Box::pin(async move {
            let _ = tx.send(PeerEvent::ChannelOpen(channel));
        })
    }));

    let tx = events.clone();
    dc.on_message(Box::new(move |msg: DataChannelMessage| {
        let tx = tx.clone();
        Box::pin(async move {
            let message = if msg.is_string {
                match String::from_utf8(msg.data.to_vec()) {
                    Ok(text) => ChannelMessage::Text(text),
                    Err(_) => {
                        warn!(event = "dc_text_not_utf8", bytes = msg.data.len());
                        return;
                    }
                }
            } else {
                ChannelMessage::Binary(msg.data)
            };
            let _ = tx.send(PeerEvent::Message(message));
        })
    }));

    let tx = events;
    dc.on_close(Box::new(move || {
        let tx = tx.clone();
        Box::pin(async move {
            warn!(event = "dc_closed", "data channel closed by transport");
            let _ = tx.send(PeerEvent::ChannelClosed);
        })
    }));
}

struct RtcPeer {
    pc: Arc<RTCPeerConnection>,
    events: mpsc::UnboundedSender<PeerEvent>,
}

impl RtcPeer {
    /// Local SDP after ICE gathering has finished, so candidates are embedded.
    async fn gathered_local_sdp(&self) -> Result<String, TransportError> {
        let desc = self
            .pc
            .local_description()
            .await
            .ok_or_else(|| TransportError::Rtc("no local description".into()))?;
        Ok(desc.sdp)
    }
}

#[async_trait]
impl PeerConnection for RtcPeer {
    async fn create_data_channel(&self, label: &str) -> Result<(), TransportError> {
        let init = RTCDataChannelInit {
            ordered: Some(true),
            ..Default::default()
        };
        let dc = self
            .pc
            .create_data_channel(label, Some(init))
            .await
            .map_err(rtc_err)?;
        attach_handlers(&dc, self.events.clone());
        Ok(())
    }

    async fn create_offer(&self) -> Result<String, TransportError> {
        let offer = self.pc.create_offer(None).await.map_err(rtc_err)?;
        let mut gathered = self.pc.gathering_complete_promise().await;
        self.pc
            .set_local_description(offer)
            .await
            .map_err(rtc_err)?;
        let _ = gathered.recv().await;
        self.gathered_local_sdp().await
    }

    async fn create_answer(&self, offer_sdp: &str) -> Result<String, TransportError> {
        let offer = RTCSessionDescription::offer(offer_sdp.to_string()).map_err(rtc_err)?;
        self.pc
            .set_remote_description(offer)
            .await
            .map_err(rtc_err)?;
        let answer = self.pc.create_answer(None).await.map_err(rtc_err)?;
        let mut gathered = self.pc.gathering_complete_promise().await;
        self.pc
            .set_local_description(answer)
            .await
            .map_err(rtc_err)?;
        let _ = gathered.recv().await;
        self.gathered_local_sdp().await
    }

    async fn apply_answer(&self, answer_sdp: &str) -> Result<(), TransportError> {
        let answer = RTCSessionDescription::answer(answer_sdp.to_string()).map_err(rtc_err)?;
        self.pc
            .set_remote_description(answer)
            .await
            .map_err(rtc_err)
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), TransportError> {
        self.pc
            .add_ice_candidate(RTCIceCandidateInit {
                candidate: candidate.candidate,
                sdp_mid: candidate.sdp_mid,
                sdp_mline_index: candidate.sdp_mline_index,
                username_fragment: candidate.username_fragment,
            })
            .await
            .map_err(rtc_err)
    }

    async fn close(&self) {
        if let Err(e) = self.pc.close().await {
            debug!(event = "webrtc_close_failed", %e);
        }
    }
}

struct RtcChannel {
    dc: Arc<RTCDataChannel>,
}

impl RtcChannel {
    async fn send_fragment(&self, data: &Bytes) -> Result<(), TransportError> {
        self.dc
            .send(data)
            .await
            .map(|_| ())
            .map_err(|e| TransportError::Send(e.to_string()))
    }
}

#[async_trait]
impl DataChannel for RtcChannel {
    async fn send_text(&self, text: String) -> Result<(), TransportError> {
        self.dc
            .send_text(text)
            .await
            .map(|_| ())
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    /// SCTP here caps a message at 64 KiB, so larger payloads go out as consecutive
    /// fragments; the receiving `FrameReader` joins them by the header's size.
    async fn send_binary(&self, data: Bytes) -> Result<(), TransportError> {
        if data.is_empty() {
            return self.send_fragment(&data).await;
        }
        for range in fragment_ranges(data.len()) {
            self.send_fragment(&data.slice(range)).await?;
        }
        Ok(())
    }

    async fn buffered_amount(&self) -> usize {
        self.dc.buffered_amount().await
    }

    fn is_open(&self) -> bool {
        self.dc.ready_state() == RTCDataChannelState::Open
    }

    async fn close(&self) {
        if let Err(e) = self.dc.close().await {
            debug!(event = "dc_close_failed", %e);
        }
    }
}
