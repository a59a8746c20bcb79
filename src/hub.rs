//! In-process signaling relay: rooms are lazily created broadcast channels
//! over a shared append-only row log. Stands in for the hosted relay in the
//! demo binary and the test suite.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{trace, warn};

use crate::error::TransportError;
use crate::message::SignalingMessage;
use crate::transport::SignalingTransport;

const ROOM_CHANNEL_CAPACITY: usize = 100;

type RoomMap = Arc<RwLock<HashMap<String, broadcast::Sender<SignalingMessage>>>>;

#[derive(Clone, Default)]
pub struct SignalHub {
    rooms: RoomMap,
    log: Arc<RwLock<Vec<SignalingMessage>>>,
}

pub struct HubSubscription {
    forwarder: JoinHandle<()>,
}

impl SignalHub {
    pub fn new() -> Self {
        Self::default()
    }

    async fn room_tx(&self, room_id: &str) -> broadcast::Sender<SignalingMessage> {
        let mut rooms = self.rooms.write().await;
        rooms
            .entry(room_id.to_string())
            .or_insert_with(|| broadcast::channel(ROOM_CHANNEL_CAPACITY).0)
            .clone()
    }

    /// Rows currently held in the backing log.
    pub async fn stored(&self) -> usize {
        self.log.read().await.len()
    }

    /// Open subscriptions on a room (test observability).
    pub async fn subscriber_count(&self, room_id: &str) -> usize {
        self.rooms
            .read()
            .await
            .get(room_id)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }
}

#[async_trait]
impl SignalingTransport for SignalHub {
    type Subscription = HubSubscription;

    async fn open(
        &self,
        room_id: &str,
        inbox: mpsc::Sender<SignalingMessage>,
    ) -> Result<HubSubscription, TransportError> {
        let mut rx = self.room_tx(room_id).await.subscribe();
        let room = room_id.to_string();
        let forwarder = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(msg) => {
                        // exact room-filter match, as the relay contract states
                        if msg.room_id != room {
                            continue;
                        }
                        if inbox.send(msg).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(room = %room, skipped, "subscription lagged, rows dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        Ok(HubSubscription { forwarder })
    }

    async fn send(&self, mut msg: SignalingMessage) -> Result<(), TransportError> {
        // insert-time work: stamp the row, keep the stored shape honest
        msg.created_at = Utc::now();
        let row = serde_json::to_string(&msg).map_err(|e| TransportError::Delivery(e.to_string()))?;
        trace!(%row, "insert signaling row");

        self.log.write().await.push(msg.clone());
        let tx = self.room_tx(&msg.room_id).await;
        // a room with no subscribers yet is not a delivery failure
        let _ = tx.send(msg);
        Ok(())
    }

    async fn close(&self, sub: HubSubscription) {
        sub.forwarder.abort();
        // wait until the receiver is really gone so close is observable
        let _ = sub.forwarder.await;
    }

    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize, TransportError> {
        let mut log = self.log.write().await;
        let before = log.len();
        log.retain(|m| m.created_at >= cutoff);
        Ok(before - log.len())
    }
}
