pub type AppResult<T> = Result<T, SessionError>;

/// Failures that abort a session start sequence. Anything that happens
/// after startup (per-message handler errors) is logged and swallowed by
/// the dispatch loop instead.
#[derive(thiserror::Error, Debug)]
pub enum SessionError {
    #[error("validation: {0}")]
    Validation(String),

    #[error("media: {0}")]
    Media(#[from] MediaError),

    #[error("transport: {0}")]
    Transport(#[from] TransportError),
}

#[derive(thiserror::Error, Debug)]
pub enum MediaError {
    #[error("microphone permission denied")]
    PermissionDenied,

    #[error("device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("decode failure: {0}")]
    Decode(String),
}

#[derive(thiserror::Error, Debug)]
pub enum TransportError {
    #[error("subscribe failed: {0}")]
    Subscribe(String),

    #[error("delivery failed: {0}")]
    Delivery(String),

    #[error("purge failed: {0}")]
    Purge(String),

    #[error("transport closed")]
    Closed,
}

/// Errors surfaced by the real-time connection collaborator.
#[derive(thiserror::Error, Debug)]
pub enum ConnectionError {
    #[error("sdp: {0}")]
    Sdp(String),

    #[error("ice: {0}")]
    Ice(String),

    #[error("connection closed")]
    Closed,
}

/// Per-message handler failure inside the dispatch loop. Never fatal:
/// the loop logs it and moves on to the next event.
#[derive(thiserror::Error, Debug)]
pub enum DispatchError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}
