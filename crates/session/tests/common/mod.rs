//! Shared helpers for multi-peer tests

#![allow(dead_code)]

use meshcast_session::{
    Clock, MemoryMesh, PeerIdentity, SessionConfig, SessionEvent, SessionNode, SyntheticCapture,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("meshcast_session=debug")
        .with_test_writer()
        .try_init();
}

/// Join `id` to the mesh and start its session loop
pub fn spawn_peer(
    mesh: &MemoryMesh,
    id: &str,
    host: &str,
    clock: Arc<dyn Clock>,
    config: SessionConfig,
) -> Arc<SessionNode> {
    let (endpoint, events) = mesh.join(id.into()).expect("join mesh");
    let node = SessionNode::new(
        config,
        PeerIdentity::new(id.into(), host.into()),
        endpoint,
        clock,
        Arc::new(SyntheticCapture::new(id).with_payload_size(10_000)),
    )
    .expect("create node");
    node.run(events).expect("start node");
    node
}

/// Poll `check` until it holds or `timeout` elapses
pub async fn wait_until<F>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    check()
}

/// First event matching `pick`, or None after `timeout`
pub async fn next_event<T, F>(
    events: &mut broadcast::Receiver<SessionEvent>,
    timeout: Duration,
    mut pick: F,
) -> Option<T>
where
    F: FnMut(SessionEvent) -> Option<T>,
{
    let wait = async {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if let Some(found) = pick(event) {
                        return Some(found);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    };
    tokio::time::timeout(timeout, wait).await.ok().flatten()
}

pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

/// Run `f` with a generous upper bound so a hang fails the test
pub async fn bounded<T>(f: impl Future<Output = T>) -> T {
    tokio::time::timeout(Duration::from_secs(10), f)
        .await
        .expect("test step timed out")
}
