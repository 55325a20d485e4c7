//! End-to-end snapshot-then-deltas scenario (§4.7): a real PTY feeds a real
//! `avt::Vt` screen, and a hub subscriber must see the current snapshot
//! before any delta derived from output that arrives afterward.

mod common;

use std::time::Duration;

use bytes::Bytes;
use futures_util::SinkExt;
use tokio_util::codec::Framed;

use vtd::broadcast::hub::HubEvent;
use vtd::ipc::codec::{IpcFrame, IpcFrameCodec};
use vtd::ipc::messages::frame_type;

#[tokio::test]
async fn subscriber_gets_snapshot_before_any_delta_from_live_output() {
    let h = common::harness();
    let id = h.registry.create(common::request(&["cat"])).await.unwrap();

    let (snapshot, mut rx) = h
        .registry
        .hub()
        .subscribe(&id)
        .await
        .expect("session should be registered with the hub");
    // Freshly created session: nothing has been written to the screen yet.
    assert!(!snapshot.is_empty(), "a snapshot frame is emitted even for a blank screen");

    let stream = common::connect_ipc(&h.control_dir, &id).await;
    let mut framed = Framed::new(stream, IpcFrameCodec::default());
    framed
        .send(IpcFrame::new(frame_type::STDIN_DATA, Bytes::from_static(b"hello world\n")))
        .await
        .unwrap();

    let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("a delta should arrive once the PTY output reaches the screen")
        .unwrap();
    assert!(matches!(event, HubEvent::Delta(_)), "expected a delta, not a bell or final snapshot");

    h.registry.kill(&id, nix::sys::signal::Signal::SIGKILL).await.ok();
}

#[tokio::test]
async fn session_exit_emits_a_final_snapshot_and_closes_the_channel() {
    let h = common::harness();
    // A short delay before exiting gives the test time to subscribe before
    // the hub tears the session's channel down.
    let id = h
        .registry
        .create(common::request(&["sh", "-c", "sleep 0.2; exit 0"]))
        .await
        .unwrap();

    let (_, mut rx) = h.registry.hub().subscribe(&id).await.expect("registered with the hub");

    let event = tokio::time::timeout(Duration::from_secs(3), rx.recv())
        .await
        .expect("a final snapshot should arrive once the process exits")
        .unwrap();
    assert!(matches!(event, HubEvent::FinalSnapshot(_)));

    let next = rx.recv().await;
    assert!(next.is_err(), "the channel should close after the final snapshot");
}
