//! Local media collaborator contract. The crate never touches devices or
//! decoders itself; it holds data-only stream/track handles and talks to a
//! [`MediaGateway`] that does the actual capture or playback-graph work.

use std::path::PathBuf;

use async_trait::async_trait;
use uuid::Uuid;

use crate::config::AudioConstraints;
use crate::error::MediaError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Audio,
    Video,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaTrack {
    pub id: String,
    pub kind: TrackKind,
}

impl MediaTrack {
    pub fn audio() -> Self {
        Self { id: Uuid::new_v4().to_string(), kind: TrackKind::Audio }
    }
}

/// Handle to a live local or remote stream. Shared read-only (as a track
/// source) across every peer connection a broadcaster creates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaStream {
    pub id: String,
    pub tracks: Vec<MediaTrack>,
}

impl MediaStream {
    pub fn new(tracks: Vec<MediaTrack>) -> Self {
        Self { id: Uuid::new_v4().to_string(), tracks }
    }

    pub fn audio_tracks(&self) -> impl Iterator<Item = &MediaTrack> {
        self.tracks.iter().filter(|t| t.kind == TrackKind::Audio)
    }
}

/// What the broadcaster streams: live microphone capture, or a queued file
/// list decoded through the gateway's playback graph.
#[derive(Debug, Clone)]
pub enum SourceSpec {
    Microphone,
    Playlist(Vec<PathBuf>),
}

#[async_trait]
pub trait MediaGateway: Send + Sync {
    async fn acquire_microphone(
        &self,
        constraints: &AudioConstraints,
    ) -> Result<MediaStream, MediaError>;

    async fn acquire_playlist(&self, files: &[PathBuf]) -> Result<MediaStream, MediaError>;

    /// Stop every track and tear down whatever graph backed the stream.
    /// Must tolerate streams that were already released.
    async fn release(&self, stream: MediaStream);
}
