//! Relay transport seam: a publish/subscribe channel over an append-only
//! store with insert-triggered delivery and a room filter.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use crate::error::TransportError;
use crate::message::SignalingMessage;

#[async_trait]
pub trait SignalingTransport: Send + Sync {
    type Subscription: Send + Sync;

    /// Subscribe to the room: every row inserted after this call whose
    /// `room_id` matches is delivered once into `inbox`. Delivery includes
    /// the subscriber's own inserts; filtering those out by `sender_id` is
    /// the state machine's job.
    async fn open(
        &self,
        room_id: &str,
        inbox: mpsc::Sender<SignalingMessage>,
    ) -> Result<Self::Subscription, TransportError>;

    /// Append one row. The transport stamps `created_at` on insert. A
    /// delivery error means the message is lost; callers log and move on,
    /// they do not retry.
    async fn send(&self, msg: SignalingMessage) -> Result<(), TransportError>;

    /// Unregister the subscription and release its resources. Consumes the
    /// subscription, so a second close cannot happen; holders keep it in an
    /// `Option` and treat a missing one as already closed.
    async fn close(&self, sub: Self::Subscription);

    /// Delete rows with `created_at < cutoff`; returns how many went away.
    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize, TransportError>;
}
