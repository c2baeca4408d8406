//! Guests align to the host clock across skewed machines

mod common;

use common::{init_tracing, next_event, spawn_peer};
use meshcast_session::{
    MemoryMesh, PeerIdentity, SessionConfig, SessionEvent, SessionNode, SkewedClock,
    SyntheticCapture, SystemClock,
};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_guest_measures_host_skew_on_join() {
    init_tracing();
    let mesh = MemoryMesh::with_latency(Duration::from_millis(3));
    let config = SessionConfig::fast_test_preset();

    let host = spawn_peer(&mesh, "host", "host", Arc::new(SkewedClock::new(2_500)), config.clone());
    let (endpoint, events) = mesh.join("guest".into()).unwrap();
    let guest = SessionNode::new(
        config,
        PeerIdentity::new("guest".into(), "host".into()),
        endpoint,
        Arc::new(SystemClock),
        Arc::new(SyntheticCapture::new("guest")),
    )
    .unwrap();
    let mut guest_events = guest.subscribe();
    guest.run(events).unwrap();

    let offset = next_event(&mut guest_events, Duration::from_secs(2), |event| match event {
        SessionEvent::ClockSynced { peer, offset_ms } if peer.as_str() == "host" => Some(offset_ms),
        _ => None,
    })
    .await
    .expect("guest never synced");

    assert!((offset - 2_500).abs() <= 30, "offset {}", offset);
    assert_eq!(guest.host_offset(), offset);
    assert_eq!(host.host_offset(), 0);
}

#[tokio::test]
async fn test_absent_host_degrades_to_zero_offset() {
    init_tracing();
    let mesh = MemoryMesh::new();
    let config = SessionConfig::fast_test_preset();

    // A raw endpoint that joins as host but never answers
    let (_silent_host, _host_events) = mesh.join("host".into()).unwrap();
    let (endpoint, events) = mesh.join("guest".into()).unwrap();
    let guest = SessionNode::new(
        config,
        PeerIdentity::new("guest".into(), "host".into()),
        endpoint,
        Arc::new(SkewedClock::new(-9_000)),
        Arc::new(SyntheticCapture::new("guest")),
    )
    .unwrap();
    let mut guest_events = guest.subscribe();
    guest.run(events).unwrap();

    let offset = next_event(&mut guest_events, Duration::from_secs(3), |event| match event {
        SessionEvent::ClockSynced { offset_ms, .. } => Some(offset_ms),
        _ => None,
    })
    .await
    .expect("sync batch never finished");
    assert_eq!(offset, 0);
}
