//! Two-session integration tests
//!
//! Each session's bus socket sends straight to the other's on loopback, which
//! stands in for the multicast group. Every other port is ephemeral.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::net::UdpSocket;
use whiteboard_wire::{
    Action, ActionRecord, Control, ControlRecord, Envelope, PeerAddr, PeerId,
};

use crate::{
    collab::{Renderer, SessionUi},
    config::SyncConfig,
    identity::LocalIdentity,
    object_store::ObjectKey,
    session::{Session, SessionBuilder},
};

const ALICE: PeerId = PeerId(0xa11ce);
const BOB: PeerId = PeerId(0xb0b);

#[derive(Default)]
struct Recorder {
    rendered: Mutex<Vec<(ActionRecord, Option<Bytes>)>>,
}

impl Recorder {
    fn rendered(&self) -> Vec<(ActionRecord, Option<Bytes>)> {
        self.rendered.lock().clone()
    }
}

impl Renderer for Recorder {
    fn render(&self, record: &ActionRecord, object: Option<&Bytes>) {
        self.rendered.lock().push((*record, object.cloned()));
    }
}

struct AcceptClear;

impl SessionUi for AcceptClear {
    fn confirm_clear(&self, _requester: PeerId) -> bool {
        true
    }
}

fn test_config() -> SyncConfig {
    SyncConfig {
        history_port: 0,
        object_port: 0,
        discovery_window_ms: 200,
        history_timeout_ms: 500,
        leave_flush_ms: 20,
        object_timeout_ms: 2_000,
        ..Default::default()
    }
}

struct Pair {
    alice: Session,
    bob: Session,
    alice_canvas: Arc<Recorder>,
    bob_canvas: Arc<Recorder>,
}

async fn pair() -> Pair {
    pair_with(test_config()).await
}

async fn pair_with(config: SyncConfig) -> Pair {
    let alice_socket = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
    let bob_socket = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
    let alice_addr = alice_socket.local_addr().unwrap();
    let bob_addr = bob_socket.local_addr().unwrap();

    let alice_canvas = Arc::new(Recorder::default());
    let bob_canvas = Arc::new(Recorder::default());

    let alice = SessionBuilder::new(config.clone(), alice_canvas.clone())
        .identity(LocalIdentity::new(ALICE, Ipv4Addr::LOCALHOST))
        .transport(alice_socket, bob_addr)
        .start()
        .await
        .unwrap();
    let bob = SessionBuilder::new(config, bob_canvas.clone())
        .identity(LocalIdentity::new(BOB, Ipv4Addr::LOCALHOST))
        .ui(Arc::new(AcceptClear))
        .transport(bob_socket, alice_addr)
        .start()
        .await
        .unwrap();

    Pair {
        alice,
        bob,
        alice_canvas,
        bob_canvas,
    }
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(condition(), "condition not reached in time");
}

fn stroke(n: i32) -> Action {
    Action::Draw {
        x1: 0,
        y1: 0,
        x2: n,
        y2: n,
        color: 0x000000,
        thickness: 3,
    }
}

#[tokio::test]
async fn test_joiner_catches_up_from_longest_history() {
    let Pair { alice, bob, .. } = pair().await;

    let report = alice.connect().await.unwrap();
    assert_eq!(report.peers, 0);
    assert!(report.source.is_none());

    for n in 1..=3 {
        alice.submit(stroke(n));
    }
    alice.settle().await;
    assert_eq!(alice.history_len(), 3);
    // Let the live copies reach Bob, who drops them while offline
    tokio::time::sleep(Duration::from_millis(50)).await;

    let report = bob.connect().await.unwrap();
    assert_eq!(report.source.map(|p| p.id), Some(ALICE));
    assert_eq!(report.expected, 3);
    assert_eq!(report.received, 3);

    let alice_log: Vec<_> = alice.log().snapshot().iter().copied().collect();
    let bob_log: Vec<_> = bob.log().snapshot().iter().copied().collect();
    assert_eq!(bob_log, alice_log);
    assert_eq!(bob.peer_count(), 1);
    wait_until(|| alice.peer_count() == 1).await;

    alice.shutdown().await;
    bob.shutdown().await;
}

#[tokio::test]
async fn test_live_actions_replicate_once() {
    let Pair { alice, bob, .. } = pair().await;
    alice.connect().await.unwrap();
    bob.connect().await.unwrap();

    let sent = alice.submit(stroke(9));
    wait_until(|| bob.history_len() == 1).await;
    bob.settle().await;

    assert_eq!(bob.log().snapshot().iter().next(), Some(&sent));
    assert_eq!(alice.history_len(), 1);

    bob.submit(Action::Text {
        x: 4,
        y: 4,
        ch: 'z' as u32,
        color: 0,
        size: 14,
    });
    wait_until(|| alice.history_len() == 2).await;
    assert_eq!(bob.history_len(), 2);

    alice.shutdown().await;
    bob.shutdown().await;
}

#[tokio::test]
async fn test_disconnected_peer_neither_sends_nor_records() {
    let Pair {
        alice, bob, bob_canvas, ..
    } = pair().await;
    bob.connect().await.unwrap();

    // Alice is offline: her stroke stays local and unlogged
    alice.submit(stroke(1));
    alice.settle().await;
    assert_eq!(alice.history_len(), 0);

    tokio::time::sleep(Duration::from_millis(100)).await;
    bob.settle().await;
    assert_eq!(bob.history_len(), 0);
    assert!(bob_canvas.rendered().is_empty());

    alice.shutdown().await;
    bob.shutdown().await;
}

#[tokio::test]
async fn test_shared_object_is_fetched_from_origin() {
    let Pair {
        alice, bob, bob_canvas, ..
    } = pair().await;
    alice.connect().await.unwrap();
    bob.connect().await.unwrap();

    let blob = Bytes::from_static(b"\x89PNG image!!");
    let record = alice.share_object(30, 40, blob.clone());
    let Action::Image { key, .. } = record.action else {
        panic!("expected an image record");
    };

    wait_until(|| bob_canvas.rendered().iter().any(|(r, _)| *r == record)).await;
    let rendered = bob_canvas.rendered();
    let (_, object) = rendered.iter().find(|(r, _)| *r == record).unwrap();
    assert_eq!(object.as_ref(), Some(&blob));
    assert_eq!(bob.objects().get(&ObjectKey::new(ALICE, key)), Some(blob));

    alice.shutdown().await;
    bob.shutdown().await;
}

#[tokio::test]
async fn test_accepted_clear_request_wipes_both_peers() {
    let Pair {
        alice, bob, bob_canvas, ..
    } = pair().await;
    alice.connect().await.unwrap();
    bob.connect().await.unwrap();

    alice.submit(stroke(1));
    bob.submit(stroke(2));
    wait_until(|| alice.history_len() == 2 && bob.history_len() == 2).await;

    alice.request_clear();
    alice.settle().await;
    assert_eq!(alice.history_len(), 0);

    wait_until(|| bob.history_len() == 0).await;
    wait_until(|| {
        bob_canvas
            .rendered()
            .last()
            .is_some_and(|(r, _)| r.action == Action::Clear && r.origin == BOB)
    })
    .await;

    alice.shutdown().await;
    bob.shutdown().await;
}

#[tokio::test]
async fn test_declined_clear_request_keeps_history() {
    let Pair { alice, bob, .. } = pair().await;
    alice.connect().await.unwrap();
    bob.connect().await.unwrap();

    bob.submit(stroke(1));
    wait_until(|| alice.history_len() == 1).await;

    // Alice runs the default headless UI, which declines
    bob.request_clear();
    tokio::time::sleep(Duration::from_millis(100)).await;
    alice.settle().await;
    assert_eq!(alice.history_len(), 1);
    assert_eq!(bob.history_len(), 0);

    alice.shutdown().await;
    bob.shutdown().await;
}

#[tokio::test]
async fn test_leave_removes_peer() {
    let Pair { alice, bob, .. } = pair().await;
    alice.connect().await.unwrap();
    bob.connect().await.unwrap();
    wait_until(|| alice.peer_count() == 1).await;

    bob.submit(stroke(1));
    bob.settle().await;
    bob.disconnect().await;
    assert!(!bob.is_connected());
    assert_eq!(bob.history_len(), 0);
    assert_eq!(bob.peer_count(), 0);

    wait_until(|| alice.peer_count() == 0).await;
    assert!(alice.directory().longest_history_peer().is_none());

    alice.shutdown().await;
    bob.shutdown().await;
}

#[tokio::test]
async fn test_replay_redraws_without_appending() {
    let Pair {
        alice, alice_canvas, ..
    } = pair().await;
    alice.connect().await.unwrap();
    let first = alice.submit(stroke(1));
    let second = alice.submit(stroke(2));
    alice.settle().await;

    let replayed = alice.replay(Duration::from_millis(1)).await;
    assert_eq!(replayed, 2);
    assert_eq!(alice.history_len(), 2);

    let actions: Vec<ActionRecord> = alice_canvas
        .rendered()
        .into_iter()
        .map(|(record, _)| record)
        .collect();
    assert_eq!(
        actions,
        vec![
            first,
            second,
            ActionRecord::new(ALICE, Action::Clear),
            first,
            second
        ]
    );

    alice.shutdown().await;
}

#[tokio::test]
async fn test_connect_twice_is_a_no_op() {
    let Pair { alice, .. } = pair().await;
    alice.connect().await.unwrap();
    alice.submit(stroke(1));
    alice.settle().await;

    let report = alice.connect().await.unwrap();
    assert!(report.source.is_none());
    assert_eq!(alice.history_len(), 1);
    assert!(alice.is_connected());

    alice.shutdown().await;
}

#[tokio::test]
async fn test_log_is_empty_after_leaving_despite_live_traffic() {
    let Pair { alice, bob, .. } = pair_with(SyncConfig {
        leave_flush_ms: 300,
        ..test_config()
    })
    .await;
    alice.connect().await.unwrap();
    bob.connect().await.unwrap();
    bob.submit(stroke(1));
    wait_until(|| alice.history_len() == 1).await;

    // Alice keeps drawing while Bob's leave notice is being flushed
    let drawing = async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        alice.submit(stroke(2));
        alice.submit(stroke(3));
    };
    tokio::join!(bob.disconnect(), drawing);

    assert!(!bob.is_connected());
    assert_eq!(bob.history_len(), 0);
    assert_eq!(bob.peer_count(), 0);

    alice.submit(stroke(4));
    tokio::time::sleep(Duration::from_millis(100)).await;
    bob.settle().await;
    assert_eq!(bob.history_len(), 0);

    // A fresh join pulls Alice's log without leftovers
    let report = bob.connect().await.unwrap();
    assert_eq!(report.expected, 4);
    assert_eq!(bob.history_len(), 4);

    alice.shutdown().await;
    bob.shutdown().await;
}

#[tokio::test]
async fn test_own_origin_traffic_never_reaches_log_or_directory() {
    let socket = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
    let session_addr = socket.local_addr().unwrap();
    let sink = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let canvas = Arc::new(Recorder::default());
    let session = SessionBuilder::new(test_config(), canvas.clone())
        .identity(LocalIdentity::new(ALICE, Ipv4Addr::LOCALHOST))
        .transport(socket, sink.local_addr().unwrap())
        .start()
        .await
        .unwrap();
    session.connect().await.unwrap();

    let echoes: [Envelope; 3] = [
        ActionRecord::new(ALICE, stroke(1)).into(),
        ControlRecord::new(
            ALICE,
            Control::PeerQuery {
                addr: PeerAddr::new(Ipv4Addr::LOCALHOST, 9),
                history_len: 50,
            },
        )
        .into(),
        ControlRecord::new(ALICE, Control::ClearRequest).into(),
    ];
    let stranger = ActionRecord::new(PeerId(0x5151), stroke(2));

    let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    for envelope in &echoes {
        peer.send_to(&envelope.to_bytes(), session_addr).await.unwrap();
    }
    peer.send_to(&Envelope::from(stranger).to_bytes(), session_addr)
        .await
        .unwrap();

    wait_until(|| session.history_len() == 1).await;
    session.settle().await;
    assert_eq!(session.log().snapshot().iter().next(), Some(&stranger));
    assert_eq!(session.peer_count(), 0);
    assert!(session.directory().longest_history_peer().is_none());
    assert_eq!(canvas.rendered(), vec![(stranger, None)]);

    session.shutdown().await;
}

#[tokio::test]
async fn test_object_keys_are_not_reused_after_a_declined_clear() {
    let Pair {
        alice,
        bob,
        alice_canvas,
        ..
    } = pair().await;
    alice.connect().await.unwrap();
    bob.connect().await.unwrap();

    let old = bob.share_object(0, 0, Bytes::from_static(b"OLD"));
    wait_until(|| alice_canvas.rendered().iter().any(|(r, o)| *r == old && o.is_some())).await;

    // Alice runs the headless UI and keeps her copy of the old object
    bob.request_clear();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let new = bob.share_object(0, 0, Bytes::from_static(b"NEW"));
    let (Action::Image { key: old_key, .. }, Action::Image { key: new_key, .. }) =
        (old.action, new.action)
    else {
        panic!("expected image records");
    };
    assert_ne!(old_key, new_key);

    wait_until(|| alice_canvas.rendered().iter().any(|(r, _)| *r == new)).await;
    let rendered = alice_canvas.rendered();
    let (_, object) = rendered.iter().find(|(r, _)| *r == new).unwrap();
    assert_eq!(object.as_ref(), Some(&Bytes::from_static(b"NEW")));

    alice.shutdown().await;
    bob.shutdown().await;
}
