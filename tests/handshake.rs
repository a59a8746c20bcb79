//! End-to-end protocol scenarios over the in-process relay and loopback
//! connections: join handshakes, candidate exchange, eviction, teardown.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;

use aircast::config::Config;
use aircast::hub::SignalHub;
use aircast::loopback::{LoopbackFactory, SilentMediaGateway};
use aircast::media::SourceSpec;
use aircast::message::{SignalBody, SignalingMessage};
use aircast::rtc::ConnectionState;
use aircast::session::{start_broadcasting, start_listening, Role, Session};
use aircast::transport::SignalingTransport;

const WAIT: Duration = Duration::from_secs(2);

struct Endpoint {
    session: Session,
    factory: LoopbackFactory,
    gateway: Arc<SilentMediaGateway>,
}

async fn broadcaster(hub: &Arc<SignalHub>, room: &str, user: &str) -> Endpoint {
    let factory = LoopbackFactory::default();
    let gateway = Arc::new(SilentMediaGateway::default());
    let session = start_broadcasting(
        hub.clone(),
        factory.clone(),
        gateway.clone(),
        Config::default(),
        room,
        user,
        SourceSpec::Microphone,
    )
    .await
    .expect("broadcast start");
    Endpoint { session, factory, gateway }
}

async fn listener(hub: &Arc<SignalHub>, room: &str, user: &str) -> Endpoint {
    let factory = LoopbackFactory::default();
    let gateway = Arc::new(SilentMediaGateway::default());
    let session = start_listening(
        hub.clone(),
        factory.clone(),
        gateway.clone(),
        Config::default(),
        room,
        user,
    )
    .await
    .expect("listen start");
    Endpoint { session, factory, gateway }
}

async fn wait_for_count(session: &Session, n: usize) {
    let mut watch = session.listener_count_watch();
    timeout(WAIT, watch.wait_for(|c| *c == n))
        .await
        .expect("timed out waiting for listener count")
        .expect("count watch closed");
}

#[tokio::test]
async fn start_then_stop_leaves_no_residue() {
    let hub = Arc::new(SignalHub::new());
    let mut b = broadcaster(&hub, "r1", "caster").await;

    assert_eq!(b.session.role(), Role::Broadcaster);
    assert_eq!(hub.subscriber_count("r1").await, 1);

    b.session.stop().await;
    assert!(b.session.is_stopped());
    assert_eq!(hub.subscriber_count("r1").await, 0, "subscription closed");
    assert_eq!(b.gateway.released().len(), 1, "local stream released");
}

#[tokio::test]
async fn stop_is_idempotent() {
    let hub = Arc::new(SignalHub::new());
    let mut b = broadcaster(&hub, "r1", "caster").await;
    b.session.stop().await;
    b.session.stop().await;
    assert_eq!(b.gateway.released().len(), 1, "release happens once");
}

#[tokio::test]
async fn join_request_yields_exactly_one_offer_for_the_sender() {
    let hub = Arc::new(SignalHub::new());
    let mut b = broadcaster(&hub, "r1", "caster").await;

    // spy on the raw room traffic
    let (spy_tx, mut spy_rx) = mpsc::channel::<SignalingMessage>(16);
    let spy = hub.open("r1", spy_tx).await.expect("spy open");

    hub.send(SignalingMessage::broadcast("r1", "l1", SignalBody::JoinRequest))
        .await
        .expect("join send");

    let offer = timeout(WAIT, async {
        loop {
            let msg = spy_rx.recv().await.expect("spy channel");
            if let SignalBody::Offer { .. } = msg.body {
                return msg;
            }
        }
    })
    .await
    .expect("no offer on the wire");

    assert_eq!(offer.sender_id, "caster");
    assert_eq!(offer.receiver_id.as_deref(), Some("l1"), "offer is unicast to the joiner");
    assert_eq!(b.factory.created("l1"), 1, "exactly one registry entry for l1");

    hub.close(spy).await;
    b.session.stop().await;
}

#[tokio::test]
async fn full_handshake_connects_both_sides() {
    let hub = Arc::new(SignalHub::new());
    let mut b = broadcaster(&hub, "r1", "caster").await;
    let mut l = listener(&hub, "r1", "l1").await;

    wait_for_count(&b.session, 1).await;

    let mut remote = l.session.remote_stream_watch();
    timeout(WAIT, remote.wait_for(Option::is_some))
        .await
        .expect("timed out waiting for remote stream")
        .expect("remote watch closed");

    // the broadcaster's connection for l1 saw the answer; the listener's
    // connection for the broadcaster saw the offer
    let b_probe = b.factory.probe("l1").expect("b side entry");
    let l_probe = l.factory.probe("caster").expect("l side entry");
    {
        let bp = b_probe.lock().expect("probe");
        let lp = l_probe.lock().expect("probe");
        assert!(bp.remote.is_some(), "answer applied on broadcaster side");
        assert!(lp.remote.is_some(), "offer applied on listener side");
        assert_eq!(bp.tracks.len(), 1, "local audio attached to the peer connection");
    }

    // candidate round-trip: what each side pushed is exactly what the other
    // side handed to add_ice_candidate (delivery may lag the connected
    // signal by a couple of events, so poll)
    timeout(WAIT, async {
        loop {
            {
                let bp = b_probe.lock().expect("probe");
                let lp = l_probe.lock().expect("probe");
                if !bp.sent_candidates.is_empty()
                    && bp.sent_candidates == lp.received_candidates
                    && lp.sent_candidates == bp.received_candidates
                {
                    break;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("candidates did not round-trip");

    l.session.stop().await;
    b.session.stop().await;
}

#[tokio::test]
async fn two_listeners_have_independent_entries() {
    let hub = Arc::new(SignalHub::new());
    let mut b = broadcaster(&hub, "r1", "caster").await;
    let mut l1 = listener(&hub, "r1", "l1").await;
    wait_for_count(&b.session, 1).await;
    let mut l2 = listener(&hub, "r1", "l2").await;
    wait_for_count(&b.session, 2).await;

    assert_eq!(b.factory.created("l1"), 1);
    assert_eq!(b.factory.created("l2"), 1);

    // l1's connection fails: evicted, count drops, l2 untouched
    assert!(b.factory.fire_state("l1", ConnectionState::Failed).await);
    wait_for_count(&b.session, 1).await;

    let l1_probe = b.factory.probe("l1").expect("l1 entry existed");
    let l2_probe = b.factory.probe("l2").expect("l2 entry");
    assert!(l1_probe.lock().expect("probe").closed, "evicted connection closed");
    assert!(!l2_probe.lock().expect("probe").closed, "l2 unaffected");

    l1.session.stop().await;
    l2.session.stop().await;
    b.session.stop().await;
}

#[tokio::test]
async fn stopping_the_broadcaster_closes_every_connection() {
    let hub = Arc::new(SignalHub::new());
    let mut b = broadcaster(&hub, "r1", "caster").await;
    let mut l1 = listener(&hub, "r1", "l1").await;
    let mut l2 = listener(&hub, "r1", "l2").await;
    wait_for_count(&b.session, 2).await;

    b.session.stop().await;
    for peer in ["l1", "l2"] {
        let probe = b.factory.probe(peer).expect("entry");
        assert!(probe.lock().expect("probe").closed, "{peer} closed at stop");
    }
    assert_eq!(b.gateway.released().len(), 1);

    l1.session.stop().await;
    l2.session.stop().await;
}

#[tokio::test]
async fn late_answer_after_stop_is_harmless() {
    let hub = Arc::new(SignalHub::new());
    let mut b = broadcaster(&hub, "r1", "caster").await;
    b.session.stop().await;

    // rows inserted after the subscription is closed reach nobody
    hub.send(SignalingMessage::unicast("r1", "l1", "caster", SignalBody::Answer {
        sdp: "v=0".into(),
    }))
    .await
    .expect("send");
    assert_eq!(b.factory.created("l1"), 0);
}
