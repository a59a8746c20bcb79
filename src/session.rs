//! Role-scoped session sequencing: validate, acquire media, open the
//! transport, hand everything to the dispatch loop, and reverse it all on
//! stop.

use std::fmt;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::Config;
use crate::dispatch::{SessionEvent, SessionWorker};
use crate::error::{AppResult, SessionError};
use crate::media::{MediaGateway, MediaStream, SourceSpec};
use crate::message::{SignalBody, SignalingMessage};
use crate::registry::PeerRegistry;
use crate::rtc::ConnectionFactory;
use crate::transport::SignalingTransport;

const EVENT_QUEUE_CAPACITY: usize = 64;

/// Fixed for the lifetime of a session instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Broadcaster,
    Listener,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Broadcaster => "broadcaster",
            Self::Listener => "listener",
        })
    }
}

/// All session-scoped identity in one place, owned by the session instead
/// of floating around as ambient globals.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub role: Role,
    pub room_id: String,
    pub user_id: String,
}

impl SessionContext {
    pub fn new(role: Role, room_id: &str, user_id: &str) -> Self {
        Self { role, room_id: room_id.into(), user_id: user_id.into() }
    }

    pub(crate) fn clear(&mut self) {
        self.room_id.clear();
        self.user_id.clear();
    }
}

/// Handle to a running session. Dropping it without calling [`Session::stop`]
/// still requests the full teardown, just without waiting for it.
#[derive(Debug)]
pub struct Session {
    role: Role,
    events: mpsc::Sender<SessionEvent>,
    worker: Option<JoinHandle<()>>,
    listener_count: watch::Receiver<usize>,
    remote_stream: watch::Receiver<Option<MediaStream>>,
}

impl Session {
    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_stopped(&self) -> bool {
        self.worker.is_none()
    }

    /// Broadcaster side: peers currently in `connected` state.
    pub fn listener_count(&self) -> usize {
        *self.listener_count.borrow()
    }

    pub fn listener_count_watch(&self) -> watch::Receiver<usize> {
        self.listener_count.clone()
    }

    /// Listener side: the broadcaster's stream once the handshake lands.
    pub fn remote_stream(&self) -> Option<MediaStream> {
        self.remote_stream.borrow().clone()
    }

    pub fn remote_stream_watch(&self) -> watch::Receiver<Option<MediaStream>> {
        self.remote_stream.clone()
    }

    /// Tear everything down: every registry entry closed, local media
    /// released, subscription unregistered. Safe to call again afterwards;
    /// the second call returns immediately.
    pub async fn stop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.events.send(SessionEvent::Stop { ack: ack_tx }).await.is_ok() {
            let _ = ack_rx.await;
        }
        let _ = worker.await;
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.worker.take().is_some() {
            let (ack, _) = oneshot::channel();
            let _ = self.events.try_send(SessionEvent::Stop { ack });
        }
    }
}

/* ---------------- start sequences ---------------- */

pub async fn start_broadcasting<T, F, G>(
    transport: Arc<T>,
    factory: F,
    gateway: Arc<G>,
    config: Config,
    room_id: &str,
    user_id: &str,
    source: SourceSpec,
) -> AppResult<Session>
where
    T: SignalingTransport + 'static,
    F: ConnectionFactory + 'static,
    G: MediaGateway + 'static,
{
    validate_ids(room_id, user_id)?;
    if let SourceSpec::Playlist(files) = &source {
        if files.is_empty() {
            return Err(SessionError::Validation("no media files selected".into()));
        }
    }

    let stream = match &source {
        SourceSpec::Microphone => {
            info!("requesting microphone access");
            gateway.acquire_microphone(&config.audio).await?
        }
        SourceSpec::Playlist(files) => {
            info!(files = files.len(), "building playlist stream");
            gateway.acquire_playlist(files).await?
        }
    };
    info!(room = room_id, "broadcast starting");

    launch(Role::Broadcaster, transport, factory, gateway, config, room_id, user_id, Some(stream))
        .await
}

pub async fn start_listening<T, F, G>(
    transport: Arc<T>,
    factory: F,
    gateway: Arc<G>,
    config: Config,
    room_id: &str,
    user_id: &str,
) -> AppResult<Session>
where
    T: SignalingTransport + 'static,
    F: ConnectionFactory + 'static,
    G: MediaGateway + 'static,
{
    validate_ids(room_id, user_id)?;
    info!(room = room_id, "joining as listener");

    let session = launch(
        Role::Listener,
        transport.clone(),
        factory,
        gateway,
        config,
        room_id,
        user_id,
        None,
    )
    .await?;

    // announce ourselves to the broadcaster; a lost join-request stalls this
    // handshake (no retry), it does not fail the session
    let join = SignalingMessage::broadcast(room_id, user_id, SignalBody::JoinRequest);
    if let Err(e) = transport.send(join).await {
        warn!(error = %e, "failed to send join request");
    }
    Ok(session)
}

#[allow(clippy::too_many_arguments)]
async fn launch<T, F, G>(
    role: Role,
    transport: Arc<T>,
    factory: F,
    gateway: Arc<G>,
    config: Config,
    room_id: &str,
    user_id: &str,
    local_stream: Option<MediaStream>,
) -> AppResult<Session>
where
    T: SignalingTransport + 'static,
    F: ConnectionFactory + 'static,
    G: MediaGateway + 'static,
{
    let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
    let (signal_tx, signal_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);

    let subscription = match transport.open(room_id, signal_tx).await {
        Ok(sub) => sub,
        Err(e) => {
            // never leave a half-started session behind
            if let Some(stream) = local_stream {
                gateway.release(stream).await;
            }
            return Err(e.into());
        }
    };
    let _pump = pump_signals(signal_rx, events_tx.clone());

    let (count_tx, count_rx) = watch::channel(0);
    let (remote_tx, remote_rx) = watch::channel(None);
    let worker = SessionWorker {
        ctx: SessionContext::new(role, room_id, user_id),
        config,
        transport,
        subscription: Some(subscription),
        factory,
        gateway,
        registry: PeerRegistry::new(),
        events_tx: events_tx.clone(),
        local_stream,
        listener_count: count_tx,
        remote_stream: remote_tx,
    };
    let handle = tokio::spawn(worker.run(events_rx));

    Ok(Session {
        role,
        events: events_tx,
        worker: Some(handle),
        listener_count: count_rx,
        remote_stream: remote_rx,
    })
}

/// Bridge transport deliveries onto the session's event channel. Ends when
/// the subscription closes or the session loop goes away.
fn pump_signals(
    mut rx: mpsc::Receiver<SignalingMessage>,
    tx: mpsc::Sender<SessionEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if tx.send(SessionEvent::Signal(msg)).await.is_err() {
                break;
            }
        }
    })
}

fn validate_ids(room_id: &str, user_id: &str) -> AppResult<()> {
    if room_id.trim().is_empty() {
        return Err(SessionError::Validation("room id must not be empty".into()));
    }
    if user_id.trim().is_empty() {
        return Err(SessionError::Validation("user id must not be empty".into()));
    }
    Ok(())
}
