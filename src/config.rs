use std::time::Duration;

/* ------------ ICE / audio settings ------------ */

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IceServer {
    pub urls: String,
    pub username: Option<String>,
    pub credential: Option<String>,
}

impl IceServer {
    pub fn stun(urls: &str) -> Self {
        Self { urls: urls.into(), username: None, credential: None }
    }
}

/// Capture constraints handed to the media gateway for microphone mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioConstraints {
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
    pub sample_rate: u32,
}

impl Default for AudioConstraints {
    fn default() -> Self {
        Self {
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain_control: true,
            sample_rate: 48_000,
        }
    }
}

/* ------------ session configuration ------------ */

#[derive(Debug, Clone)]
pub struct Config {
    pub ice_servers: Vec<IceServer>,
    pub audio: AudioConstraints,
    /// How often the reaper wakes up.
    pub cleanup_interval: Duration,
    /// Signaling rows older than this are purged.
    pub retention: Duration,
    /// Declared limits; liveness is driven by connection-state signals,
    /// not by an active heartbeat protocol.
    pub connection_timeout: Duration,
    pub heartbeat_interval: Duration,
    pub max_reconnect_attempts: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ice_servers: vec![
                IceServer::stun("stun:stun.l.google.com:19302"),
                IceServer::stun("stun:stun1.l.google.com:19302"),
            ],
            audio: AudioConstraints::default(),
            cleanup_interval: Duration::from_secs(30),
            retention: Duration::from_secs(60),
            connection_timeout: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(5),
            max_reconnect_attempts: 5,
        }
    }
}

impl Config {
    /// Defaults with optional env overrides:
    /// `AIRCAST_ICE_SERVERS` (comma-separated URLs),
    /// `AIRCAST_RETENTION_SECS`, `AIRCAST_CLEANUP_SECS`.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Ok(raw) = std::env::var("AIRCAST_ICE_SERVERS") {
            let servers: Vec<_> = raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(IceServer::stun)
                .collect();
            if !servers.is_empty() {
                cfg.ice_servers = servers;
            }
        }
        if let Some(secs) = env_secs("AIRCAST_RETENTION_SECS") {
            cfg.retention = secs;
        }
        if let Some(secs) = env_secs("AIRCAST_CLEANUP_SECS") {
            cfg.cleanup_interval = secs;
        }
        cfg
    }
}

fn env_secs(key: &str) -> Option<Duration> {
    std::env::var(key).ok()?.parse().ok().map(Duration::from_secs)
}
