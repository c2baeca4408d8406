//! Session node demo binary
//!
//! Joins a host and several guests to an in-process mesh, gives each guest a
//! skewed clock, records one take with a camera toggle in the middle, waits
//! for every clip to reach the host and prints the compositor manifest.
//!
//! # Usage
//!
//! ```bash
//! # Host plus two guests, 20ms one-way latency
//! cargo run -p meshcast-session-node
//!
//! # Four guests, larger skew, manifest written to a file
//! cargo run -p meshcast-session-node -- --guests 4 --skew-ms 7000 --output manifest.json
//!
//! # Settings from a TOML file
//! MESHCAST_CONFIG=./session.toml cargo run -p meshcast-session-node
//! ```
//!
//! # Environment Variables
//!
//! - `MESHCAST_CONFIG`: TOML config file (default: built-in defaults)
//! - `MESHCAST_GUESTS`, `MESHCAST_SKEW_MS`, `MESHCAST_LATENCY_MS`, `MESHCAST_TAKE_MS`
//! - `RUST_LOG`: Logging level (default: `info`)

use anyhow::{bail, Context};
use clap::Parser;
use futures::future::join_all;
use meshcast_session::{
    Clock, CompositorManifest, MemoryMesh, PeerIdentity, SessionConfig, SessionEvent, SessionNode,
    SkewedClock, SyntheticCapture, SystemClock,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Meshcast session node
///
/// Simulates a serverless multi-party recording on one machine.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Session config file (TOML)
    #[arg(long, env = "MESHCAST_CONFIG")]
    config: Option<PathBuf>,

    /// Number of guests joining the host
    #[arg(long, default_value_t = 2, env = "MESHCAST_GUESTS")]
    guests: usize,

    /// Clock skew step; guest N runs N * step ms off, alternating sign
    #[arg(long, default_value_t = 2500, env = "MESHCAST_SKEW_MS")]
    skew_ms: i64,

    /// One-way mesh latency in milliseconds
    #[arg(long, default_value_t = 20, env = "MESHCAST_LATENCY_MS")]
    latency_ms: u64,

    /// Length of the recorded take in milliseconds
    #[arg(long, default_value_t = 3000, env = "MESHCAST_TAKE_MS")]
    take_ms: u64,

    /// Synthetic payload size per clip in bytes
    #[arg(long, default_value_t = 256 * 1024)]
    payload_bytes: usize,

    /// Write the manifest here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,
}

fn guest_skew(index: usize, step: i64) -> i64 {
    let magnitude = step * (index as i64 + 1);
    if index % 2 == 0 {
        magnitude
    } else {
        -magnitude
    }
}

fn spawn_node(
    mesh: &MemoryMesh,
    identity: PeerIdentity,
    clock: Arc<dyn Clock>,
    config: SessionConfig,
    payload_bytes: usize,
) -> anyhow::Result<Arc<SessionNode>> {
    let id = identity.local_id().clone();
    let (endpoint, events) = mesh.join(id.clone())?;
    let capture = SyntheticCapture::new(id.as_str()).with_payload_size(payload_bytes);
    let node = SessionNode::new(config, identity, endpoint, clock, Arc::new(capture))?;
    node.run(events)?;
    Ok(node)
}

async fn wait_for_manifest(
    host: &SessionNode,
    expected_clips: usize,
    timeout: Duration,
) -> anyhow::Result<CompositorManifest> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let manifest = host.compositor_manifest();
        if manifest.clips.len() >= expected_clips && manifest.is_complete() {
            return Ok(manifest);
        }
        if tokio::time::Instant::now() >= deadline {
            bail!(
                "Timed out waiting for recordings; missing {:?}",
                manifest.missing_payloads()
            );
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match &args.config {
        Some(path) => SessionConfig::from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => SessionConfig::default(),
    };

    info!(
        version = meshcast_session::version(),
        guests = args.guests,
        latency_ms = args.latency_ms,
        "Meshcast session node starting"
    );

    let mesh = MemoryMesh::with_latency(Duration::from_millis(args.latency_ms));
    let host = spawn_node(
        &mesh,
        PeerIdentity::host_of("host".into()),
        Arc::new(SystemClock),
        config.clone(),
        args.payload_bytes,
    )?;

    let mut guests = Vec::with_capacity(args.guests);
    for i in 0..args.guests {
        let skew = guest_skew(i, args.skew_ms);
        let identity = PeerIdentity::new(format!("guest-{}", i + 1).into(), "host".into());
        info!("Guest {} clock skew {}ms", identity.local_id(), skew);
        guests.push(spawn_node(
            &mesh,
            identity,
            Arc::new(SkewedClock::new(skew)),
            config.clone(),
            args.payload_bytes,
        )?);
    }

    // Each guest measures its host offset right after joining
    let synced = join_all(guests.iter().map(|guest| {
        let mut events = guest.subscribe();
        async move {
            let wait = async {
                loop {
                    match events.recv().await {
                        Ok(SessionEvent::ClockSynced { offset_ms, .. }) => return Some(offset_ms),
                        Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(broadcast::error::RecvError::Closed) => return None,
                    }
                }
            };
            tokio::time::timeout(Duration::from_secs(30), wait).await.ok().flatten()
        }
    }))
    .await;
    for (guest, offset) in guests.iter().zip(synced) {
        match offset {
            Some(offset) => info!("{} host offset {}ms", guest.identity().local_id(), offset),
            None => warn!(
                "{} did not report a clock sync, using {}ms",
                guest.identity().local_id(),
                guest.host_offset()
            ),
        }
    }

    let global_clock_start = host.start_recording().await?;
    info!("Recording started at host time {}", global_clock_start);

    tokio::time::sleep(Duration::from_millis(args.take_ms / 2)).await;
    if let Some(first) = guests.first() {
        first.set_camera_enabled(false).await;
    }
    tokio::time::sleep(Duration::from_millis(args.take_ms / 2)).await;
    host.stop_recording().await?;

    // One presence clip per peer, plus the audio-only clip after the toggle
    let expected = 1 + args.guests + usize::from(!guests.is_empty());
    let manifest = wait_for_manifest(&host, expected, Duration::from_secs(60)).await?;
    if !manifest.overlapping_clips().is_empty() {
        warn!("Overlapping clips: {:?}", manifest.overlapping_clips());
    }

    let json = manifest.to_json()?;
    match &args.output {
        Some(path) => {
            tokio::fs::write(path, json)
                .await
                .with_context(|| format!("writing manifest {}", path.display()))?;
            info!("Manifest written to {}", path.display());
        }
        None => println!("{}", json),
    }

    join_all(guests.iter().map(|g| g.leave())).await;
    host.leave().await;
    info!("Session closed");
    Ok(())
}
