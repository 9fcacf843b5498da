//! Handshake state machine for one peer session. Host feeds events; the machine validates
//! transitions and holds the peer's public key once it arrives.

use std::fmt;

use crate::crypto::PublicKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Sender,
    Receiver,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Idle,
    SignalingConnected,
    OfferSent,
    AwaitingOffer,
    AnswerReceived,
    AnswerSent,
    ChannelOpen,
    Closed,
}

impl fmt::Display for HandshakeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HandshakeState::Idle => "idle",
            HandshakeState::SignalingConnected => "signaling_connected",
            HandshakeState::OfferSent => "offer_sent",
            HandshakeState::AwaitingOffer => "awaiting_offer",
            HandshakeState::AnswerReceived => "answer_received",
            HandshakeState::AnswerSent => "answer_sent",
            HandshakeState::ChannelOpen => "channel_open",
            HandshakeState::Closed => "closed",
        };
        f.write_str(s)
    }
}

pub struct Handshake {
    role: Role,
    state: HandshakeState,
    peer_key: Option<PublicKey>,
}

impl Handshake {
    pub fn new(role: Role) -> Self {
        Self {
            role,
            state: HandshakeState::Idle,
            peer_key: None,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    pub fn peer_key(&self) -> Option<&PublicKey> {
        self.peer_key.as_ref()
    }

    pub fn is_closed(&self) -> bool {
        self.state == HandshakeState::Closed
    }

    pub fn on_signaling_connected(&mut self) -> Result<(), HandshakeError> {
        self.expect(&[HandshakeState::Idle], "signaling_connected")?;
        self.state = HandshakeState::SignalingConnected;
        Ok(())
    }

    /// Relay confirmed `room_created` (sender) or `room_joined` (receiver).
    pub fn on_room_ready(&mut self) -> Result<(), HandshakeError> {
        self.expect(&[HandshakeState::SignalingConnected], "room_ready")?;
        if self.role == Role::Receiver {
            self.state = HandshakeState::AwaitingOffer;
        }
        Ok(())
    }

    /// Sender sent its offer.
    pub fn on_offer_sent(&mut self) -> Result<(), HandshakeError> {
        self.expect_role(Role::Sender, "offer_sent")?;
        self.expect(&[HandshakeState::SignalingConnected], "offer_sent")?;
        self.state = HandshakeState::OfferSent;
        Ok(())
    }

    /// Receiver got the sender's offer; captures the sender's public key.
    pub fn on_offer(&mut self, peer_key: PublicKey) -> Result<(), HandshakeError> {
        self.expect_role(Role::Receiver, "offer")?;
        self.expect(&[HandshakeState::AwaitingOffer], "offer")?;
        self.peer_key = Some(peer_key);
        Ok(())
    }

    /// Receiver sent its answer.
    pub fn on_answer_sent(&mut self) -> Result<(), HandshakeError> {
        self.expect_role(Role::Receiver, "answer_sent")?;
        self.expect(&[HandshakeState::AwaitingOffer], "answer_sent")?;
        if self.peer_key.is_none() {
            return Err(HandshakeError::MissingPeerKey);
        }
        self.state = HandshakeState::AnswerSent;
        Ok(())
    }

    /// Sender got the receiver's answer; captures the receiver's public key.
    pub fn on_answer(&mut self, peer_key: PublicKey) -> Result<(), HandshakeError> {
        self.expect_role(Role::Sender, "answer")?;
        self.expect(&[HandshakeState::OfferSent], "answer")?;
        self.peer_key = Some(peer_key);
        self.state = HandshakeState::AnswerReceived;
        Ok(())
    }

    /// Whether a relayed ICE candidate can be applied now (remote description is set).
    pub fn can_apply_candidate(&self) -> bool {
        match self.role {
            Role::Sender => matches!(
                self.state,
                HandshakeState::AnswerReceived | HandshakeState::ChannelOpen
            ),
            Role::Receiver => matches!(
                self.state,
                HandshakeState::AnswerSent | HandshakeState::ChannelOpen
            ),
        }
    }

    /// Data channel opened. Requires completed description exchange and the peer key.
    pub fn on_channel_open(&mut self) -> Result<&PublicKey, HandshakeError> {
        self.expect(
            &[HandshakeState::AnswerReceived, HandshakeState::AnswerSent],
            "channel_open",
        )?;
        if self.peer_key.is_none() {
            return Err(HandshakeError::MissingPeerKey);
        }
        self.state = HandshakeState::ChannelOpen;
        self.peer_key.as_ref().ok_or(HandshakeError::MissingPeerKey)
    }

    pub fn close(&mut self) {
        self.state = HandshakeState::Closed;
    }

    fn expect(&self, allowed: &[HandshakeState], event: &'static str) -> Result<(), HandshakeError> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(HandshakeError::Unexpected {
                state: self.state,
                event,
            })
        }
    }

    fn expect_role(&self, role: Role, event: &'static str) -> Result<(), HandshakeError> {
        if self.role == role {
            Ok(())
        } else {
            Err(HandshakeError::Unexpected {
                state: self.state,
                event,
            })
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum HandshakeError {
    #[error("unexpected {event} in state {state}")]
    Unexpected {
        state: HandshakeState,
        event: &'static str,
    },
    #[error("peer public key not received")]
    MissingPeerKey,
}
