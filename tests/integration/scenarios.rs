use agromesh_core::fingerprint;
use agromesh_core::{Packet, SuccessResponse};
use agromesh_services::{NotifyReason, PollOutcome, SensorError};

use crate::*;

const READING: [u8; 7] = [1, 2, 3, 4, 5, 6, 7];

// ══════════════════════════════════════════════════════════════════════════════
//  End-to-end request / response
// ══════════════════════════════════════════════════════════════════════════════

/// Controller polls a directly linked sensor and queues its reading.
#[tokio::test(start_paused = true)]
async fn test_simple_delivery() {
    let mut mesh = Mesh::new(&["sn0001"]);
    let cn = mesh.controller("cn0001");
    let sn = mesh.sensor("sn0001", Ok(READING));
    mesh.link(cn, sn);
    mesh.start();

    let started = tokio::time::Instant::now();
    let outcome = mesh.node("cn0001").poller().poll_node(&addr("sn0001"), 1).await;
    match outcome {
        PollOutcome::Answered(entry) => {
            assert_eq!(entry.src, addr("sn0001"));
            assert_eq!(entry.dest, addr("cn0001"));
            assert_eq!(entry.data, READING);
        }
        other => panic!("expected an answer, got {other:?}"),
    }
    assert!(started.elapsed() < RESPONSE_TIMEOUT);

    // The sensor replied with the ttl the request arrived with.
    assert_eq!(
        mesh.sent(sn),
        vec![Packet::SuccessResponse(SuccessResponse {
            dest: addr("cn0001"),
            src: addr("sn0001"),
            data: READING,
            ttl: TTL,
            fingerprint: fingerprint::generate(&addr("sn0001"), 0),
        })]
    );
    assert_eq!(mesh.node("cn0001").sequence.current().await, 1);
    assert_eq!(mesh.node("sn0001").sequence.current().await, 1);
    assert_eq!(mesh.node("cn0001").queue.len().await, 1);
    assert!(mesh.node("cn0001").recorder.events().is_empty());

    mesh.stop().await;
}

/// A failed sensor read is answered with an ErrorResponse carrying the
/// driver's code, reported separately from the timeout it also causes.
#[tokio::test(start_paused = true)]
async fn test_sensor_failure_path() {
    let mut mesh = Mesh::new(&["sn0001"]);
    let cn = mesh.controller("cn0001");
    let sn = mesh.sensor("sn0001", Err(SensorError::NoRs485Connection));
    mesh.link(cn, sn);
    mesh.start();

    let outcome = mesh.node("cn0001").poller().poll_node(&addr("sn0001"), 1).await;
    assert_eq!(outcome, PollOutcome::TimedOut);

    match mesh.sent(sn).as_slice() {
        [Packet::ErrorResponse(e)] => {
            assert_eq!(e.err_code, 0x0A);
            assert_eq!(e.dest, addr("cn0001"));
            assert_eq!(e.ttl, TTL);
        }
        other => panic!("expected a single ErrorResponse, got {other:?}"),
    }

    let controller = mesh.node("cn0001");
    assert_eq!(
        controller.recorder.events(),
        vec![
            (addr("sn0001"), NotifyReason::ErrorResponse(0x0A)),
            (addr("sn0001"), NotifyReason::NoResponse),
        ]
    );
    assert!(controller.queue.is_empty().await);
    let status = controller.status.get(&addr("sn0001")).unwrap();
    assert_eq!(status.last_error, Some(0x0A));
    assert_eq!(status.consecutive_timeouts, 1);

    mesh.stop().await;
}

/// Request and reply each cross an intermediate node, losing one ttl per hop.
#[tokio::test(start_paused = true)]
async fn test_multi_hop_delivery() {
    let mut mesh = Mesh::new(&["sn0001", "sn0002"]);
    let cn = mesh.controller("cn0001");
    let mid = mesh.sensor("sn0002", Ok([9; 7]));
    let far = mesh.sensor("sn0001", Ok(READING));
    mesh.chain(&[cn, mid, far]);
    mesh.start();

    let outcome = mesh.node("cn0001").poller().poll_node(&addr("sn0001"), 2).await;
    assert!(matches!(outcome, PollOutcome::Answered(ref e) if e.data == READING));

    // The request reached the far sensor with ttl 2, so its reply starts at 2
    // and arrives at the controller with 1.
    match mesh.sent(far).as_slice() {
        [Packet::SuccessResponse(r)] => assert_eq!(r.ttl, TTL - 1),
        other => panic!("expected one reply, got {other:?}"),
    }
    let relayed: Vec<u8> = mesh.sent(mid).iter().map(|p| p.ttl()).collect();
    assert_eq!(relayed, [TTL - 1, TTL - 2]);

    // The intermediate sensor only relayed; it originated nothing.
    assert_eq!(mesh.node("sn0002").sequence.current().await, 0);
    assert_eq!(mesh.node("sn0002").stats.snapshot().forwarded, 2);

    mesh.stop().await;
}

/// A sensor beyond the request's hop budget never hears it.
#[tokio::test(start_paused = true)]
async fn test_out_of_range_sensor_times_out() {
    let mut mesh = Mesh::new(&["sn0001", "sn0002", "sn0003", "sn0004", "sn0005"]);
    let cn = mesh.controller("cn0001");
    let relays: Vec<_> = ["sn0002", "sn0003", "sn0004", "sn0005"]
        .iter()
        .map(|a| mesh.sensor(a, Ok([0; 7])))
        .collect();
    let far = mesh.sensor("sn0001", Ok(READING));
    let mut line = vec![cn];
    line.extend(&relays);
    line.push(far);
    mesh.chain(&line);
    mesh.start();

    let outcome = mesh.node("cn0001").poller().poll_node(&addr("sn0001"), 5).await;
    assert_eq!(outcome, PollOutcome::TimedOut);

    // ttl 3 buys exactly three retransmissions; the fourth relay drops it.
    let transmitted: Vec<usize> = relays.iter().map(|r| mesh.sent(*r).len()).collect();
    assert_eq!(transmitted, [1, 1, 1, 0]);
    assert!(mesh.sent(far).is_empty());
    assert_eq!(mesh.node("sn0005").stats.snapshot().expired, 1);

    mesh.stop().await;
}
