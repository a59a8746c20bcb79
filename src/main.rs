use std::sync::Arc;

use anyhow::Result;
use nanoid::nanoid;
use tracing::info;

use aircast::config::Config;
use aircast::hub::SignalHub;
use aircast::loopback::{LoopbackFactory, SilentMediaGateway};
use aircast::media::SourceSpec;
use aircast::{reaper, session};

/// End-to-end demo over the in-process relay: one broadcaster, one listener,
/// full join/offer/answer/candidate handshake, then teardown.
#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt().init();

    let config = Config::from_env();
    let hub = Arc::new(SignalHub::new());
    tokio::spawn(reaper::task(hub.clone(), config.clone()));

    let room = std::env::var("AIRCAST_ROOM").unwrap_or_else(|_| "demo".into());
    let caster_id = format!("caster-{}", nanoid!(6));
    let listener_id = format!("listener-{}", nanoid!(6));
    let gateway = Arc::new(SilentMediaGateway::default());

    let mut caster = session::start_broadcasting(
        hub.clone(),
        LoopbackFactory::default(),
        gateway.clone(),
        config.clone(),
        &room,
        &caster_id,
        SourceSpec::Microphone,
    )
    .await?;

    let mut listener = session::start_listening(
        hub.clone(),
        LoopbackFactory::default(),
        gateway,
        config,
        &room,
        &listener_id,
    )
    .await?;

    let mut count = caster.listener_count_watch();
    count.wait_for(|n| *n == 1).await?;
    info!(room = %room, listeners = *count.borrow(), "broadcast up, listener connected");

    let mut remote = listener.remote_stream_watch();
    remote.wait_for(Option::is_some).await?;
    info!("listener receiving audio");

    listener.stop().await;
    caster.stop().await;
    info!(rows = hub.stored().await, "sessions closed");
    Ok(())
}
