use agromesh_core::fingerprint;
use agromesh_core::{Packet, PacketKind, Request};
use agromesh_services::PollOutcome;

use crate::*;

// ══════════════════════════════════════════════════════════════════════════════
//  Flood control
// ══════════════════════════════════════════════════════════════════════════════

fn request(dest: &str, ttl: u8, seq: u8) -> Vec<u8> {
    Packet::from(Request {
        dest: addr(dest),
        src: addr("cn0009"),
        num_nodes: 4,
        ttl,
        fingerprint: fingerprint::generate(&addr("cn0009"), seq),
    })
    .to_vec()
}

/// The same request heard over two radio paths is relayed once.
#[tokio::test(start_paused = true)]
async fn test_flood_loop_suppression() {
    let mut mesh = Mesh::new(&["sn0001", "sn0002", "sn0003"]);
    let relay = mesh.sensor("sn0002", Ok([0; 7]));
    mesh.start();

    let frame = request("sn0001", 3, 0);
    mesh.ether.inject(relay, &frame);
    mesh.settle().await;
    mesh.ether.inject(relay, &frame);
    mesh.settle().await;

    let sent = mesh.sent(relay);
    assert_eq!(sent.len(), 1, "second copy must not be retransmitted");
    assert_eq!(sent[0].ttl(), 2);
    assert_eq!(sent[0].kind(), PacketKind::Request);

    let stats = mesh.node("sn0002").stats.snapshot();
    assert_eq!(stats.forwarded, 1);
    assert_eq!(stats.duplicate, 1);

    mesh.stop().await;
}

/// ttl 0 is dropped at any non-destination node, even for a fingerprint
/// the node has never seen.
#[tokio::test(start_paused = true)]
async fn test_ttl_exhaustion() {
    let mut mesh = Mesh::new(&["sn0001", "sn0002", "sn0003"]);
    let relay = mesh.sensor("sn0002", Ok([0; 7]));
    let listener = mesh.sensor("sn0003", Ok([0; 7]));
    mesh.link(relay, listener);
    mesh.start();

    for seq in 0..3 {
        mesh.ether.inject(relay, &request("sn0001", 0, seq));
    }
    mesh.settle().await;

    assert!(mesh.sent(relay).is_empty());
    assert!(mesh.sent(listener).is_empty());
    assert_eq!(mesh.node("sn0002").stats.snapshot().expired, 3);

    mesh.stop().await;
}

/// Corrupted and truncated frames never leave the node that heard them.
#[tokio::test(start_paused = true)]
async fn test_noise_is_not_relayed() {
    let mut mesh = Mesh::new(&["sn0001", "sn0002"]);
    let relay = mesh.sensor("sn0002", Ok([0; 7]));
    let listener = mesh.sensor("sn0001", Ok([0; 7]));
    mesh.link(relay, listener);
    mesh.start();

    let mut corrupt = request("sn0001", 3, 0);
    corrupt[30] ^= 0x80;
    mesh.ether.inject(relay, &corrupt);
    mesh.ether.inject(relay, &request("sn0001", 3, 1)[..20]);
    mesh.ether.inject(relay, &[0xFF; 55]);
    mesh.settle().await;

    assert!(mesh.sent(relay).is_empty());
    let stats = mesh.node("sn0002").stats.snapshot();
    assert_eq!(stats.corrupt, 2);
    assert_eq!(stats.short, 1);

    mesh.stop().await;
}

/// Diamond topology: the request reaches the sensor over two paths and the
/// reply reaches the controller over two paths. Each node acts once.
#[tokio::test(start_paused = true)]
async fn test_diamond_delivers_exactly_once() {
    let mut mesh = Mesh::new(&["sn0001", "sn0002", "sn0003"]);
    let cn = mesh.controller("cn0001");
    let left = mesh.sensor("sn0002", Ok([0; 7]));
    let right = mesh.sensor("sn0003", Ok([0; 7]));
    let sn = mesh.sensor("sn0001", Ok([4; 7]));
    mesh.link(cn, left);
    mesh.link(cn, right);
    mesh.link(left, sn);
    mesh.link(right, sn);
    mesh.start();

    let outcome = mesh.node("cn0001").poller().poll_node(&addr("sn0001"), 3).await;
    assert!(matches!(outcome, PollOutcome::Answered(_)));
    mesh.settle().await;

    assert_eq!(mesh.sent(cn).len(), 1, "controller sends its request and nothing else");
    assert_eq!(mesh.sent(sn).len(), 1, "sensor replies once");
    assert_eq!(mesh.sent(left).len(), 2, "request and reply, once each");
    assert_eq!(mesh.sent(right).len(), 2, "request and reply, once each");

    let controller = mesh.node("cn0001");
    assert_eq!(controller.queue.len().await, 1);
    assert_eq!(controller.stats.snapshot().duplicate, 3);

    mesh.stop().await;
}

/// Shrinking the known-node list shrinks every node's duplicate memory.
#[tokio::test(start_paused = true)]
async fn test_known_node_reload_shrinks_dedup() {
    let mut mesh = Mesh::new(&["sn0001", "sn0002", "sn0003"]);
    let relay = mesh.sensor("sn0002", Ok([0; 7]));
    mesh.start();

    // Two distinct floods, then a repeat of the first: still remembered.
    mesh.ether.inject(relay, &request("sn0001", 3, 0));
    mesh.ether.inject(relay, &request("sn0001", 3, 1));
    mesh.ether.inject(relay, &request("sn0001", 3, 0));
    mesh.settle().await;
    assert_eq!(mesh.sent(relay).len(), 2);

    // Capacity 1 keeps only the newest fingerprint.
    mesh.set_known(&["sn0001"]);
    mesh.settle().await;
    mesh.ether.inject(relay, &request("sn0001", 3, 1));
    mesh.ether.inject(relay, &request("sn0001", 3, 0));
    mesh.settle().await;
    assert_eq!(mesh.sent(relay).len(), 3, "only the evicted flood goes out again");

    mesh.stop().await;
}
