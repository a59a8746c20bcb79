use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/* ------------ session descriptors ------------ */

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
}

/// A peer's proposed (offer) or accepted (answer) media session parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    pub kind: SdpKind,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self { kind: SdpKind::Offer, sdp: sdp.into() }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self { kind: SdpKind::Answer, sdp: sdp.into() }
    }
}

/// A discovered network path descriptor. Round-trips through the wire
/// exactly: no field is dropped or reordered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidateInit {
    pub candidate: String,
    pub sdp_mid: Option<String>,
    pub sdp_mline_index: Option<u32>,
}

/* ------------ signaling rows ------------ */

/// Type-dependent payload of a signaling row. Serializes as the row's
/// `type` column plus a `payload` object, so the stored shape matches the
/// relay table one-to-one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "kebab-case")]
pub enum SignalBody {
    JoinRequest,
    Offer { sdp: String },
    Answer { sdp: String },
    IceCandidate { candidate: Option<IceCandidateInit> },
}

impl SignalBody {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::JoinRequest => "join-request",
            Self::Offer { .. } => "offer",
            Self::Answer { .. } => "answer",
            Self::IceCandidate { .. } => "ice-candidate",
        }
    }
}

/// One record in the shared signaling store. Never mutated after creation;
/// `created_at` is stamped by the transport when the row is inserted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalingMessage {
    pub room_id: String,
    pub sender_id: String,
    /// `None` means "broadcast to everyone in the room".
    pub receiver_id: Option<String>,
    #[serde(flatten)]
    pub body: SignalBody,
    pub created_at: DateTime<Utc>,
}

impl SignalingMessage {
    pub fn broadcast(room_id: &str, sender_id: &str, body: SignalBody) -> Self {
        Self {
            room_id: room_id.into(),
            sender_id: sender_id.into(),
            receiver_id: None,
            body,
            // placeholder; the transport re-stamps on insert
            created_at: Utc::now(),
        }
    }

    pub fn unicast(room_id: &str, sender_id: &str, receiver_id: &str, body: SignalBody) -> Self {
        Self {
            receiver_id: Some(receiver_id.into()),
            ..Self::broadcast(room_id, sender_id, body)
        }
    }
}
