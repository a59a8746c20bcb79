//! Loopback stand-ins for the real-time connection and media collaborators.
//! Used by the demo binary and the test suite: descriptors, candidates and
//! state changes follow the contract's callback order without any network.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::config::{AudioConstraints, IceServer};
use crate::dispatch::SessionEvent;
use crate::error::{ConnectionError, MediaError};
use crate::media::{MediaGateway, MediaStream, MediaTrack};
use crate::message::{IceCandidateInit, SdpKind, SessionDescription};
use crate::rtc::{ConnectionFactory, ConnectionState, PeerConnection, PeerEvent};

/// Shared view of one loopback connection, inspectable from tests while the
/// connection itself lives inside the session's registry.
#[derive(Debug, Default)]
pub struct PeerProbe {
    pub local: Option<SessionDescription>,
    pub remote: Option<SessionDescription>,
    pub tracks: Vec<MediaTrack>,
    pub received_candidates: Vec<IceCandidateInit>,
    pub sent_candidates: Vec<IceCandidateInit>,
    pub closed: bool,
    announced: bool,
    candidate_emitted: bool,
}

pub struct LoopbackConnection {
    peer_id: String,
    events: mpsc::Sender<SessionEvent>,
    state: Arc<Mutex<PeerProbe>>,
}

impl LoopbackConnection {
    async fn emit(&self, event: PeerEvent) {
        let ev = SessionEvent::Peer { peer_id: self.peer_id.clone(), event };
        // session already gone: the signal just evaporates
        let _ = self.events.send(ev).await;
    }

    /// Once both descriptions are in place the connection "establishes":
    /// connecting, then connected, then (answering side) the remote stream.
    async fn try_advance(&self) {
        let deliver_remote = {
            let mut s = self.state.lock().expect("probe lock");
            if s.closed || s.announced || s.local.is_none() || s.remote.is_none() {
                return;
            }
            s.announced = true;
            s.remote.as_ref().map(|d| d.kind) == Some(SdpKind::Offer)
        };
        self.emit(PeerEvent::StateChanged(ConnectionState::Connecting)).await;
        self.emit(PeerEvent::StateChanged(ConnectionState::Connected)).await;
        if deliver_remote {
            let stream = MediaStream::new(vec![MediaTrack::audio()]);
            self.emit(PeerEvent::RemoteTrack(stream)).await;
        }
    }
}

#[async_trait]
impl PeerConnection for LoopbackConnection {
    async fn create_offer(&self) -> Result<SessionDescription, ConnectionError> {
        if self.state.lock().expect("probe lock").closed {
            return Err(ConnectionError::Closed);
        }
        Ok(SessionDescription::offer(format!(
            "v=0\r\no=- {} 0 IN IP4 127.0.0.1\r\ns=-\r\nm=audio 9 UDP/TLS/RTP/SAVPF 111\r\n",
            self.peer_id
        )))
    }

    async fn create_answer(&self) -> Result<SessionDescription, ConnectionError> {
        let s = self.state.lock().expect("probe lock");
        if s.closed {
            return Err(ConnectionError::Closed);
        }
        if s.remote.as_ref().map(|d| d.kind) != Some(SdpKind::Offer) {
            return Err(ConnectionError::Sdp("no remote offer to answer".into()));
        }
        Ok(SessionDescription::answer(format!(
            "v=0\r\no=- {} 1 IN IP4 127.0.0.1\r\ns=-\r\nm=audio 9 UDP/TLS/RTP/SAVPF 111\r\n",
            self.peer_id
        )))
    }

    async fn set_local_description(
        &self,
        desc: SessionDescription,
    ) -> Result<(), ConnectionError> {
        let candidate = {
            let mut s = self.state.lock().expect("probe lock");
            if s.closed {
                return Err(ConnectionError::Closed);
            }
            s.local = Some(desc);
            if s.candidate_emitted {
                None
            } else {
                s.candidate_emitted = true;
                let c = IceCandidateInit {
                    candidate: format!(
                        "candidate:1 1 udp 2122260223 127.0.0.1 50000 typ host generation 0 peer {}",
                        self.peer_id
                    ),
                    sdp_mid: Some("0".into()),
                    sdp_mline_index: Some(0),
                };
                s.sent_candidates.push(c.clone());
                Some(c)
            }
        };
        // candidate discovery is a push, racing the offer/answer exchange
        if let Some(c) = candidate {
            self.emit(PeerEvent::LocalCandidate(c)).await;
        }
        self.try_advance().await;
        Ok(())
    }

    async fn set_remote_description(
        &self,
        desc: SessionDescription,
    ) -> Result<(), ConnectionError> {
        {
            let mut s = self.state.lock().expect("probe lock");
            if s.closed {
                return Err(ConnectionError::Closed);
            }
            s.remote = Some(desc);
        }
        self.try_advance().await;
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidateInit) -> Result<(), ConnectionError> {
        let mut s = self.state.lock().expect("probe lock");
        if s.closed {
            return Err(ConnectionError::Closed);
        }
        // queued unconditionally, like the media transport's candidate pool
        s.received_candidates.push(candidate);
        Ok(())
    }

    fn add_track(&self, track: &MediaTrack, _stream: &MediaStream) {
        self.state.lock().expect("probe lock").tracks.push(track.clone());
    }

    async fn close(&self) {
        self.state.lock().expect("probe lock").closed = true;
    }
}

/* ---------------- factory ---------------- */

struct PeerRecord {
    peer_id: String,
    probe: Arc<Mutex<PeerProbe>>,
    events: mpsc::Sender<SessionEvent>,
}

#[derive(Clone, Default)]
pub struct LoopbackFactory {
    peers: Arc<Mutex<Vec<PeerRecord>>>,
}

impl LoopbackFactory {
    /// How many connections were created for `peer_id`.
    pub fn created(&self, peer_id: &str) -> usize {
        self.peers
            .lock()
            .expect("factory lock")
            .iter()
            .filter(|r| r.peer_id == peer_id)
            .count()
    }

    /// The most recent connection's probe for `peer_id`.
    pub fn probe(&self, peer_id: &str) -> Option<Arc<Mutex<PeerProbe>>> {
        self.peers
            .lock()
            .expect("factory lock")
            .iter()
            .rev()
            .find(|r| r.peer_id == peer_id)
            .map(|r| r.probe.clone())
    }

    /// Inject a state-change signal for `peer_id`, exactly as the real
    /// connection would raise one. Returns false when no such peer exists.
    pub async fn fire_state(&self, peer_id: &str, state: ConnectionState) -> bool {
        let found = {
            let peers = self.peers.lock().expect("factory lock");
            peers
                .iter()
                .rev()
                .find(|r| r.peer_id == peer_id)
                .map(|r| r.events.clone())
        };
        match found {
            Some(tx) => tx
                .send(SessionEvent::Peer {
                    peer_id: peer_id.into(),
                    event: PeerEvent::StateChanged(state),
                })
                .await
                .is_ok(),
            None => false,
        }
    }
}

impl ConnectionFactory for LoopbackFactory {
    type Connection = LoopbackConnection;

    fn create(
        &self,
        _ice_servers: &[IceServer],
        peer_id: &str,
        events: mpsc::Sender<SessionEvent>,
    ) -> LoopbackConnection {
        let probe = Arc::new(Mutex::new(PeerProbe::default()));
        self.peers.lock().expect("factory lock").push(PeerRecord {
            peer_id: peer_id.into(),
            probe: probe.clone(),
            events: events.clone(),
        });
        LoopbackConnection { peer_id: peer_id.into(), events, state: probe }
    }
}

/* ---------------- media gateway ---------------- */

/// Hands out data-only audio streams and records what gets released.
#[derive(Clone, Default)]
pub struct SilentMediaGateway {
    released: Arc<Mutex<Vec<String>>>,
}

impl SilentMediaGateway {
    pub fn released(&self) -> Vec<String> {
        self.released.lock().expect("gateway lock").clone()
    }
}

#[async_trait]
impl MediaGateway for SilentMediaGateway {
    async fn acquire_microphone(
        &self,
        _constraints: &AudioConstraints,
    ) -> Result<MediaStream, MediaError> {
        Ok(MediaStream::new(vec![MediaTrack::audio()]))
    }

    async fn acquire_playlist(&self, files: &[PathBuf]) -> Result<MediaStream, MediaError> {
        if files.is_empty() {
            return Err(MediaError::Decode("empty playlist".into()));
        }
        Ok(MediaStream::new(vec![MediaTrack::audio()]))
    }

    async fn release(&self, stream: MediaStream) {
        self.released.lock().expect("gateway lock").push(stream.id);
    }
}
