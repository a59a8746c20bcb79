//! The signaling state machine. One event loop per session consumes every
//! input — delivered rows, connection signals, stop — as a discrete event,
//! so no two handlers ever mutate the registry concurrently.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, trace, warn};

use crate::config::Config;
use crate::error::DispatchError;
use crate::media::{MediaGateway, MediaStream};
use crate::message::{IceCandidateInit, SessionDescription, SignalBody, SignalingMessage};
use crate::registry::{PeerEntry, PeerRegistry};
use crate::rtc::{ConnectionFactory, ConnectionState, PeerConnection, PeerEvent};
use crate::session::{Role, SessionContext};
use crate::transport::SignalingTransport;

/// Input alphabet of the per-session dispatch loop. Connection callbacks and
/// transport deliveries both funnel in here instead of touching state
/// directly.
pub enum SessionEvent {
    Signal(SignalingMessage),
    Peer { peer_id: String, event: PeerEvent },
    Stop { ack: oneshot::Sender<()> },
}

pub(crate) struct SessionWorker<T, F, G>
where
    T: SignalingTransport,
    F: ConnectionFactory,
    G: MediaGateway,
{
    pub(crate) ctx: SessionContext,
    pub(crate) config: Config,
    pub(crate) transport: Arc<T>,
    pub(crate) subscription: Option<T::Subscription>,
    pub(crate) factory: F,
    pub(crate) gateway: Arc<G>,
    pub(crate) registry: PeerRegistry<F::Connection>,
    pub(crate) events_tx: mpsc::Sender<SessionEvent>,
    pub(crate) local_stream: Option<MediaStream>,
    pub(crate) listener_count: watch::Sender<usize>,
    pub(crate) remote_stream: watch::Sender<Option<MediaStream>>,
}

impl<T, F, G> SessionWorker<T, F, G>
where
    T: SignalingTransport,
    F: ConnectionFactory,
    G: MediaGateway,
{
    pub(crate) async fn run(mut self, mut rx: mpsc::Receiver<SessionEvent>) {
        let mut stop_ack = None;
        while let Some(ev) = rx.recv().await {
            match ev {
                SessionEvent::Signal(msg) => self.on_signal(msg).await,
                SessionEvent::Peer { peer_id, event } => self.on_peer_event(peer_id, event).await,
                SessionEvent::Stop { ack } => {
                    stop_ack = Some(ack);
                    break;
                }
            }
        }
        // reject anything enqueued from here on; callbacks racing the stop
        // land in a closed channel instead of a half-torn-down session
        rx.close();
        self.shutdown().await;
        if let Some(ack) = stop_ack {
            let _ = ack.send(());
        }
    }

    /* ---------------- inbound rows ---------------- */

    async fn on_signal(&mut self, msg: SignalingMessage) {
        if msg.sender_id == self.ctx.user_id {
            return; // the relay echoes our own inserts back
        }
        if matches!(&msg.receiver_id, Some(r) if *r != self.ctx.user_id) {
            return; // unicast addressed to someone else
        }
        debug!(kind = msg.body.kind(), from = %msg.sender_id, "signaling message");

        let sender = msg.sender_id;
        // role gate: a message type is only processed in the role it is
        // valid for; anything else is dropped on purpose, not an error
        let result = match (msg.body, self.ctx.role) {
            (SignalBody::JoinRequest, Role::Broadcaster) => self.on_join_request(&sender).await,
            (SignalBody::Offer { sdp }, Role::Listener) => self.on_offer(&sender, sdp).await,
            (SignalBody::Answer { sdp }, Role::Broadcaster) => self.on_answer(&sender, sdp).await,
            (SignalBody::IceCandidate { candidate }, _) => self.on_candidate(&sender, candidate).await,
            (body, role) => {
                trace!(kind = body.kind(), %role, "message not valid for this role, ignoring");
                Ok(())
            }
        };
        // one bad message never halts the loop
        if let Err(e) = result {
            warn!(peer = %sender, error = %e, "failed to process signaling message");
        }
    }

    async fn on_join_request(&mut self, listener_id: &str) -> Result<(), DispatchError> {
        let Some(stream) = self.local_stream.clone() else {
            warn!("join request but no local stream available");
            return Ok(());
        };
        info!(peer = %listener_id, "listener joining");

        let offer = {
            let fresh = !self.registry.contains(listener_id);
            let entry = self.ensure_peer(listener_id);
            // tracks go on once, at connection creation; a repeated join
            // just renegotiates over the existing connection
            if fresh {
                for track in &stream.tracks {
                    entry.conn.add_track(track, &stream);
                }
            }
            let offer = entry.conn.create_offer().await?;
            entry.conn.set_local_description(offer.clone()).await?;
            offer
        };
        self.send_to(Some(listener_id), SignalBody::Offer { sdp: offer.sdp }).await?;
        self.publish_listener_count();
        Ok(())
    }

    async fn on_offer(&mut self, broadcaster_id: &str, sdp: String) -> Result<(), DispatchError> {
        info!(peer = %broadcaster_id, "offer received");
        let answer = {
            let entry = self.ensure_peer(broadcaster_id);
            entry.conn.set_remote_description(SessionDescription::offer(sdp)).await?;
            let answer = entry.conn.create_answer().await?;
            entry.conn.set_local_description(answer.clone()).await?;
            answer
        };
        self.send_to(Some(broadcaster_id), SignalBody::Answer { sdp: answer.sdp }).await?;
        Ok(())
    }

    async fn on_answer(&mut self, listener_id: &str, sdp: String) -> Result<(), DispatchError> {
        let Some(entry) = self.registry.get(listener_id) else {
            debug!(peer = %listener_id, "answer for unknown peer, ignoring (late or duplicate)");
            return Ok(());
        };
        entry.conn.set_remote_description(SessionDescription::answer(sdp)).await?;
        info!(peer = %listener_id, "answer applied");
        Ok(())
    }

    async fn on_candidate(
        &mut self,
        peer_id: &str,
        candidate: Option<IceCandidateInit>,
    ) -> Result<(), DispatchError> {
        let Some(candidate) = candidate else {
            return Ok(()); // end-of-candidates marker
        };
        let Some(entry) = self.registry.get(peer_id) else {
            debug!(peer = %peer_id, "candidate for unknown peer, ignoring");
            return Ok(());
        };
        // candidates may outrun the offer/answer; the connection queues them
        entry.conn.add_ice_candidate(candidate).await?;
        trace!(peer = %peer_id, "remote candidate added");
        Ok(())
    }

    /* ---------------- connection signals ---------------- */

    async fn on_peer_event(&mut self, peer_id: String, event: PeerEvent) {
        match event {
            PeerEvent::LocalCandidate(candidate) => {
                // pushed as soon as discovered, independent of handshake phase
                let body = SignalBody::IceCandidate { candidate: Some(candidate) };
                if let Err(e) = self.send_to(Some(&peer_id), body).await {
                    // lost candidate: that path just never gets tried
                    warn!(peer = %peer_id, error = %e, "failed to publish local candidate");
                }
            }
            PeerEvent::StateChanged(state) => {
                if !self.registry.set_state(&peer_id, state) {
                    return; // signal from a connection already evicted
                }
                info!(peer = %peer_id, %state, "connection state changed");
                if state.is_terminal() {
                    if let Some(entry) = self.registry.remove(&peer_id) {
                        entry.conn.close().await;
                        debug!(peer = %peer_id, "evicted");
                    }
                }
                self.publish_listener_count();
            }
            PeerEvent::RemoteTrack(stream) => {
                if self.ctx.role == Role::Listener {
                    info!(tracks = stream.tracks.len(), "remote audio stream attached");
                    let _ = self.remote_stream.send(Some(stream));
                }
            }
        }
    }

    /* ---------------- helpers ---------------- */

    fn ensure_peer(&mut self, peer_id: &str) -> &mut PeerEntry<F::Connection> {
        let factory = &self.factory;
        let ice = &self.config.ice_servers;
        let events = self.events_tx.clone();
        self.registry
            .get_or_create(peer_id, || factory.create(ice, peer_id, events))
    }

    async fn send_to(
        &self,
        receiver_id: Option<&str>,
        body: SignalBody,
    ) -> Result<(), crate::error::TransportError> {
        let msg = match receiver_id {
            Some(r) => SignalingMessage::unicast(&self.ctx.room_id, &self.ctx.user_id, r, body),
            None => SignalingMessage::broadcast(&self.ctx.room_id, &self.ctx.user_id, body),
        };
        self.transport.send(msg).await
    }

    fn publish_listener_count(&self) {
        if self.ctx.role != Role::Broadcaster {
            return;
        }
        let count = self.registry.active_count(|s| s == ConnectionState::Connected);
        let _ = self.listener_count.send(count);
    }

    async fn shutdown(&mut self) {
        for (peer_id, entry) in self.registry.remove_all_matching(|_, _| true) {
            entry.conn.close().await;
            debug!(peer = %peer_id, "connection closed");
        }
        if let Some(stream) = self.local_stream.take() {
            self.gateway.release(stream).await;
        }
        if let Some(sub) = self.subscription.take() {
            self.transport.close(sub).await;
        }
        let _ = self.listener_count.send(0);
        let _ = self.remote_stream.send(None);
        info!(room = %self.ctx.room_id, "session stopped");
        self.ctx.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::SignalHub;
    use crate::loopback::{LoopbackFactory, SilentMediaGateway};
    use crate::media::MediaTrack;

    fn worker(
        role: Role,
        factory: LoopbackFactory,
        with_stream: bool,
    ) -> (
        SessionWorker<SignalHub, LoopbackFactory, SilentMediaGateway>,
        mpsc::Receiver<SessionEvent>,
    ) {
        let (events_tx, events_rx) = mpsc::channel(16);
        let (count_tx, _) = watch::channel(0);
        let (remote_tx, _) = watch::channel(None);
        let worker = SessionWorker {
            ctx: SessionContext::new(role, "r1", "me"),
            config: Config::default(),
            transport: Arc::new(SignalHub::new()),
            subscription: None,
            factory,
            gateway: Arc::new(SilentMediaGateway::default()),
            registry: PeerRegistry::new(),
            events_tx,
            local_stream: with_stream.then(|| MediaStream::new(vec![MediaTrack::audio()])),
            listener_count: count_tx,
            remote_stream: remote_tx,
        };
        (worker, events_rx)
    }

    #[tokio::test]
    async fn self_authored_messages_are_never_dispatched() {
        let factory = LoopbackFactory::default();
        let (mut w, _rx) = worker(Role::Broadcaster, factory.clone(), true);
        w.on_signal(SignalingMessage::broadcast("r1", "me", SignalBody::JoinRequest)).await;
        assert_eq!(factory.created("me"), 0);
        assert!(w.registry.is_empty());
    }

    #[tokio::test]
    async fn unicast_for_someone_else_is_dropped() {
        let factory = LoopbackFactory::default();
        let (mut w, _rx) = worker(Role::Broadcaster, factory.clone(), true);
        w.on_signal(SignalingMessage::unicast("r1", "l1", "other", SignalBody::JoinRequest)).await;
        assert_eq!(factory.created("l1"), 0);
    }

    #[tokio::test]
    async fn join_request_is_ignored_by_listeners() {
        let factory = LoopbackFactory::default();
        let (mut w, _rx) = worker(Role::Listener, factory.clone(), false);
        w.on_signal(SignalingMessage::broadcast("r1", "l2", SignalBody::JoinRequest)).await;
        assert!(w.registry.is_empty());
    }

    #[tokio::test]
    async fn answer_is_ignored_by_listeners() {
        let factory = LoopbackFactory::default();
        let (mut w, _rx) = worker(Role::Listener, factory.clone(), false);
        let answer = SignalBody::Answer { sdp: "v=0".into() };
        w.on_signal(SignalingMessage::unicast("r1", "caster", "me", answer)).await;
        assert!(w.registry.is_empty());
    }

    #[tokio::test]
    async fn answer_without_entry_is_a_noop() {
        let factory = LoopbackFactory::default();
        let (mut w, _rx) = worker(Role::Broadcaster, factory.clone(), true);
        let answer = SignalBody::Answer { sdp: "v=0".into() };
        w.on_signal(SignalingMessage::unicast("r1", "l1", "me", answer)).await;
        assert!(w.registry.is_empty());
        assert_eq!(factory.created("l1"), 0);
    }

    #[tokio::test]
    async fn candidate_without_entry_or_payload_is_a_noop() {
        let factory = LoopbackFactory::default();
        let (mut w, _rx) = worker(Role::Broadcaster, factory.clone(), true);

        let empty = SignalBody::IceCandidate { candidate: None };
        w.on_signal(SignalingMessage::unicast("r1", "l1", "me", empty)).await;

        let full = SignalBody::IceCandidate {
            candidate: Some(IceCandidateInit {
                candidate: "candidate:1 1 udp 1 192.0.2.1 1 typ host".into(),
                sdp_mid: Some("0".into()),
                sdp_mline_index: Some(0),
            }),
        };
        w.on_signal(SignalingMessage::unicast("r1", "l1", "me", full)).await;
        assert!(w.registry.is_empty());
    }

    #[tokio::test]
    async fn join_request_creates_one_entry_and_attaches_tracks() {
        let factory = LoopbackFactory::default();
        let (mut w, _rx) = worker(Role::Broadcaster, factory.clone(), true);
        w.on_signal(SignalingMessage::broadcast("r1", "l1", SignalBody::JoinRequest)).await;
        w.on_signal(SignalingMessage::broadcast("r1", "l1", SignalBody::JoinRequest)).await;

        assert_eq!(w.registry.len(), 1);
        assert_eq!(factory.created("l1"), 1);
        let probe = factory.probe("l1").expect("connection for l1");
        let probe = probe.lock().expect("probe lock");
        assert_eq!(probe.tracks.len(), 1);
        assert!(probe.local.as_ref().is_some_and(|d| d.kind == crate::message::SdpKind::Offer));
    }

    #[tokio::test]
    async fn terminal_state_evicts_and_recounts() {
        let factory = LoopbackFactory::default();
        let (mut w, _rx) = worker(Role::Broadcaster, factory.clone(), true);
        w.on_signal(SignalingMessage::broadcast("r1", "l1", SignalBody::JoinRequest)).await;

        let mut count = w.listener_count.subscribe();
        w.on_peer_event("l1".into(), PeerEvent::StateChanged(ConnectionState::Connected)).await;
        assert_eq!(*count.borrow_and_update(), 1);

        w.on_peer_event("l1".into(), PeerEvent::StateChanged(ConnectionState::Failed)).await;
        assert!(w.registry.is_empty());
        assert_eq!(*count.borrow_and_update(), 0);

        // racing signal from the evicted connection: ignored
        w.on_peer_event("l1".into(), PeerEvent::StateChanged(ConnectionState::Closed)).await;
        assert!(w.registry.is_empty());
    }
}
