//! `aircast` — peer-to-peer audio broadcast signaling coordinator.
//!
//! One broadcaster streams audio (microphone or a queued playlist) to many
//! listeners over direct peer connections; the shared relay channel carries
//! nothing but connection-setup rows. This crate owns the signaling protocol
//! and the per-peer connection lifecycle: join/offer/answer/candidate
//! exchange, registry bookkeeping, and teardown. The relay itself and the
//! actual media stack are collaborators behind the [`transport`], [`rtc`]
//! and [`media`] seams.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod hub;
pub mod loopback;
pub mod media;
pub mod message;
pub mod reaper;
pub mod registry;
pub mod rtc;
pub mod session;
pub mod transport;

pub use config::Config;
pub use error::{AppResult, MediaError, SessionError, TransportError};
pub use message::{SignalBody, SignalingMessage};
pub use session::{start_broadcasting, start_listening, Role, Session};
