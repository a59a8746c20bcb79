//! Real-time connection collaborator contract. The underlying transport is
//! expected to do NAT traversal, candidate queuing before the remote
//! description lands, and media multiplexing; this crate only drives the
//! descriptor/candidate exchange and observes state changes.

use std::fmt;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::config::IceServer;
use crate::dispatch::SessionEvent;
use crate::error::ConnectionError;
use crate::media::{MediaStream, MediaTrack};
use crate::message::{IceCandidateInit, SessionDescription};

/// Observed (never owned) state of one peer connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl ConnectionState {
    /// Terminal failure/disconnection: triggers registry eviction.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Disconnected | Self::Failed)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::New => "new",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Failed => "failed",
            Self::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Signals a connection raises. Implementations enqueue them as
/// [`SessionEvent::Peer`] on the session's event channel instead of calling
/// back directly, so every reaction runs on the single dispatch loop.
#[derive(Debug, Clone)]
pub enum PeerEvent {
    LocalCandidate(IceCandidateInit),
    StateChanged(ConnectionState),
    /// Listener role only: the broadcaster's stream arrived.
    RemoteTrack(MediaStream),
}

#[async_trait]
pub trait PeerConnection: Send + Sync {
    async fn create_offer(&self) -> Result<SessionDescription, ConnectionError>;
    async fn create_answer(&self) -> Result<SessionDescription, ConnectionError>;
    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), ConnectionError>;
    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), ConnectionError>;
    async fn add_ice_candidate(&self, candidate: IceCandidateInit) -> Result<(), ConnectionError>;
    fn add_track(&self, track: &MediaTrack, stream: &MediaStream);
    /// Idempotent; a closed connection must stop emitting events.
    async fn close(&self);
}

pub trait ConnectionFactory: Send + Sync {
    type Connection: PeerConnection + 'static;

    /// Build a connection for `peer_id`, wired so its candidate/state/track
    /// signals arrive on `events` tagged with that peer id.
    fn create(
        &self,
        ice_servers: &[IceServer],
        peer_id: &str,
        events: mpsc::Sender<SessionEvent>,
    ) -> Self::Connection;
}
