use std::sync::Mutex;

use agromesh_core::Packet;
use agromesh_services::{NotifyReason, ResponseEntry, Uplink, UplinkForwarder};

use crate::*;

// ══════════════════════════════════════════════════════════════════════════════
//  Controller poll cycle
// ══════════════════════════════════════════════════════════════════════════════

/// A silent node holds the cycle for the full timeout, then the next node
/// is still polled.
#[tokio::test(start_paused = true)]
async fn test_cycle_survives_silent_node() {
    let mut mesh = Mesh::new(&["cn0001", "sn0001", "sn0002", "sn0003"]);
    let cn = mesh.controller("cn0001");
    let a = mesh.sensor("sn0001", Ok([1; 7]));
    let c = mesh.sensor("sn0003", Ok([3; 7]));
    // sn0002 is configured but never powered on.
    mesh.link(cn, a);
    mesh.link(cn, c);
    mesh.start();

    let started = tokio::time::Instant::now();
    let report = mesh.node("cn0001").poller().poll_cycle().await;
    assert_eq!(report.answered, vec![addr("sn0001"), addr("sn0003")]);
    assert_eq!(report.timed_out, vec![addr("sn0002")]);
    assert!(started.elapsed() >= RESPONSE_TIMEOUT);

    let controller = mesh.node("cn0001");
    assert_eq!(
        controller.recorder.events(),
        vec![(addr("sn0002"), NotifyReason::NoResponse)]
    );
    assert_eq!(controller.sequence.current().await, 3);

    // Every request told the nodes how large the mesh is.
    for p in mesh.sent(cn) {
        match p {
            Packet::Request(r) => assert_eq!(r.num_nodes, 4),
            other => panic!("controller sent {other:?}"),
        }
    }

    let status = controller.status.get(&addr("sn0002")).unwrap();
    assert_eq!(status.polls_sent, 1);
    assert_eq!(status.consecutive_timeouts, 1);
    let status = controller.status.get(&addr("sn0003")).unwrap();
    assert_eq!(status.last_data.as_deref(), Some("03030303030303"));

    mesh.stop().await;
}

/// Consecutive cycles use fresh fingerprints, so the second cycle's requests
/// are not mistaken for echoes of the first.
#[tokio::test(start_paused = true)]
async fn test_repeated_cycles_are_not_deduplicated() {
    let mut mesh = Mesh::new(&["sn0001", "sn0002"]);
    let cn = mesh.controller("cn0001");
    let mid = mesh.sensor("sn0002", Ok([2; 7]));
    let far = mesh.sensor("sn0001", Ok([1; 7]));
    mesh.chain(&[cn, mid, far]);
    mesh.start();

    let poller = mesh.node("cn0001").poller();
    let mut delivered = 0;
    for _ in 0..3 {
        let report = poller.poll_cycle().await;
        assert_eq!(report.answered.len(), 2);
        mesh.settle().await;
        // Drain as the uplink forwarder would, so each cycle waits for
        // fresh replies.
        delivered += mesh.node("cn0001").queue.drain().await.len();
    }

    assert_eq!(mesh.node("cn0001").sequence.current().await, 6);
    assert_eq!(mesh.node("sn0001").sequence.current().await, 3);
    assert_eq!(mesh.node("sn0002").sequence.current().await, 3);
    assert_eq!(delivered, 6);

    mesh.stop().await;
}

#[derive(Default)]
struct Collect(Mutex<Vec<ResponseEntry>>);

impl Uplink for Collect {
    fn deliver(&self, batch: &[ResponseEntry]) -> anyhow::Result<()> {
        self.0.lock().unwrap().extend_from_slice(batch);
        Ok(())
    }
}

/// Readings collected by a cycle are handed upstream and leave the queue.
#[tokio::test(start_paused = true)]
async fn test_uplink_drains_cycle_results() {
    let mut mesh = Mesh::new(&["sn0001", "sn0002"]);
    let cn = mesh.controller("cn0001");
    let a = mesh.sensor("sn0001", Ok([1; 7]));
    let b = mesh.sensor("sn0002", Ok([2; 7]));
    mesh.link(cn, a);
    mesh.link(cn, b);
    mesh.start();

    mesh.node("cn0001").poller().poll_cycle().await;

    let sink = Arc::new(Collect::default());
    let forwarder = UplinkForwarder::new(mesh.node("cn0001").queue.clone(), sink.clone());
    assert_eq!(forwarder.flush().await, 2);
    assert!(mesh.node("cn0001").queue.is_empty().await);

    let got: Vec<NodeAddress> = sink.0.lock().unwrap().iter().map(|e| e.src).collect();
    assert_eq!(got, vec![addr("sn0001"), addr("sn0002")]);

    mesh.stop().await;
}
