//! Remote-display simulator (§6 "Remote display", §4.5).
//!
//! A TCP server answering the same length-prefixed JSON request/reply
//! protocol `engine::devices::rdisplay::TcpRemoteDisplay` speaks, so the
//! engine's display-frame pipeline (§4.5: triple-buffered frame lead,
//! duplicate-frame tolerance, drift detection) can be exercised without
//! real display hardware.
//!
//! Grounded on `uwb-simulator/src/main.rs`'s accept-loop-plus-fixed-rate-
//! tick-loop shape and `udp_tx.rs`'s "log and continue, never crash on a
//! peer error" discipline, translated from a UDP broadcast fan-out to a
//! single persistent TCP peer (the engine never expects more than one
//! remote display connection at a time).

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use proto::display::{FrameAck, FrameUpdate, ScreenGeometry, TargetDef};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{info, warn};

/// Mirrors `engine::devices::rdisplay::Request` byte-for-byte (same
/// `serde` tag/content names) so the two sides of the wire protocol
/// stay in sync without sharing a private type.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", content = "data")]
enum Request {
    Reinit,
    AddTarget(TargetDef),
    LoadTargets,
    StartAnimation(FrameUpdate, FrameUpdate),
    UpdateAnimation(FrameUpdate),
    StopAnimation,
    GetGeometry,
    SetBkgColor(u8, u8, u8),
    SetSyncFlashParams(u16, u16),
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", content = "data")]
enum Reply {
    Ack(FrameAck),
    Geometry(ScreenGeometry),
    Ok,
    Err(String),
}

/// Behavior knobs for exercising the engine's duplicate-frame and drift
/// handling (§4.5 "Duplicate-frame tolerance", "Drift detection").
#[derive(Debug, Clone, Copy)]
pub struct DisplaySimConfig {
    pub geometry: ScreenGeometry,
    /// Every Nth `update_animation` reports one duplicate frame. `0`
    /// disables duplicate-frame injection.
    pub duplicate_every: u32,
    /// After this many frames, start under-reporting `frames_elapsed` by
    /// one per update to simulate drift (§4.5 "may adjust its working
    /// estimate of P"). `0` disables drift injection.
    pub drift_after_frames: u64,
}

impl Default for DisplaySimConfig {
    fn default() -> Self {
        Self {
            geometry: ScreenGeometry {
                width_pix: 1024,
                height_pix: 768,
                width_mm: 400,
                height_mm: 300,
                distance_mm: 600,
                refresh_microhz: 60_000_000,
            },
            duplicate_every: 0,
            drift_after_frames: 0,
        }
    }
}

struct ConnState {
    frames_sent: u64,
    targets: Vec<TargetDef>,
}

impl ConnState {
    fn new() -> Self {
        Self { frames_sent: 0, targets: Vec::new() }
    }

    fn ack(&self, config: &DisplaySimConfig, update_count: u32) -> FrameAck {
        let duplicate = if config.duplicate_every > 0 && update_count % config.duplicate_every == 0 { 1 } else { 0 };
        let reported_elapsed = if config.drift_after_frames > 0 && self.frames_sent > config.drift_after_frames {
            self.frames_sent.saturating_sub(1)
        } else {
            self.frames_sent
        };
        FrameAck { ok: true, duplicate_frames: Some(duplicate), frames_elapsed: Some(reported_elapsed) }
    }
}

async fn read_frame(stream: &mut TcpStream) -> std::io::Result<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf) as usize;
    let mut buf = vec![0u8; len];
    stream.read_exact(&mut buf).await?;
    Ok(buf)
}

async fn write_frame(stream: &mut TcpStream, payload: &[u8]) -> std::io::Result<()> {
    let len = (payload.len() as u32).to_be_bytes();
    stream.write_all(&len).await?;
    stream.write_all(payload).await
}

async fn handle_connection(mut stream: TcpStream, peer: std::net::SocketAddr, config: DisplaySimConfig, update_counter: Arc<AtomicU32>) {
    let mut state = ConnState::new();
    loop {
        let payload = match read_frame(&mut stream).await {
            Ok(p) => p,
            Err(e) => {
                info!(target: "devsim::rdisplay", %peer, error = %e, "connection closed");
                return;
            }
        };
        let req: Request = match serde_json::from_slice(&payload) {
            Ok(r) => r,
            Err(e) => {
                warn!(target: "devsim::rdisplay", %peer, error = %e, "malformed request, dropping connection");
                return;
            }
        };

        let reply = match req {
            Request::Reinit => {
                state = ConnState::new();
                update_counter.store(0, Ordering::Relaxed);
                Reply::Ok
            }
            Request::AddTarget(def) => {
                state.targets.push(def);
                Reply::Ok
            }
            Request::LoadTargets => Reply::Ok,
            Request::StartAnimation(_f0, _f1) => {
                state.frames_sent += 2;
                let n = update_counter.fetch_add(1, Ordering::Relaxed) + 1;
                Reply::Ack(state.ack(&config, n))
            }
            Request::UpdateAnimation(_frame) => {
                state.frames_sent += 1;
                let n = update_counter.fetch_add(1, Ordering::Relaxed) + 1;
                Reply::Ack(state.ack(&config, n))
            }
            Request::StopAnimation => Reply::Ok,
            Request::GetGeometry => Reply::Geometry(config.geometry),
            Request::SetBkgColor(_, _, _) => Reply::Ok,
            Request::SetSyncFlashParams(_, _) => Reply::Ok,
        };

        let bytes = match serde_json::to_vec(&reply) {
            Ok(b) => b,
            Err(_) => serde_json::to_vec(&Reply::Err("encode failure".into())).unwrap(),
        };
        if let Err(e) = write_frame(&mut stream, &bytes).await {
            warn!(target: "devsim::rdisplay", %peer, error = %e, "write failed, dropping connection");
            return;
        }
    }
}

/// Accepts connections forever, one at a time, serving each to
/// completion. A send/receive error on one connection is logged and the
/// listener simply waits for the next engine connection — matching
/// `udp_tx.rs`'s "never crash on a peer error" discipline.
pub async fn run(addr: &str, config: DisplaySimConfig) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(target: "devsim::rdisplay", %addr, "remote-display simulator listening");
    let update_counter = Arc::new(AtomicU32::new(0));
    let total_connections = Arc::new(AtomicU64::new(0));

    loop {
        let (stream, peer) = listener.accept().await?;
        let n = total_connections.fetch_add(1, Ordering::Relaxed) + 1;
        info!(target: "devsim::rdisplay", %peer, connection = n, "engine connected");
        handle_connection(stream, peer, config, update_counter.clone()).await;
    }
}
