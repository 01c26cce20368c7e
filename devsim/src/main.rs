//! `maestro-devsim` — remote-display and eye-tracker simulator.
//!
//! Stands in for the two networked/analog collaborators a deployed
//! `maestro-engine` talks to that have no software-only counterpart in
//! this workspace: the remote display (§6 "Remote display") and the
//! 1 kHz eye-tracker feed (§6 "Eye tracker feed"). Run this alongside
//! `maestro-engine` during development so `trial::display_pipeline` and
//! `trial::fixation` exercise real network/timing behavior instead of
//! the engine's in-process `Sim*` stand-ins.
//!
//! Grounded on `uwb-simulator/src/main.rs`'s `#[derive(Parser)] struct
//! Args` + `#[tokio::main]` shape.

mod eye_noise;
mod rdisplay_sim;

use clap::Parser;
use tracing::info;

use eye_noise::{EyeNoiseConfig, EyeNoiseGenerator};
use rdisplay_sim::DisplaySimConfig;

#[derive(Parser, Debug)]
#[command(name = "maestro-devsim", about = "Remote-display and eye-tracker device simulator")]
struct Args {
    /// Address the remote-display simulator listens on for the engine's
    /// `TcpRemoteDisplay` connection.
    #[arg(long, default_value = "127.0.0.1:7410")]
    display_addr: String,
    /// Inject one duplicate frame every N `update_animation` calls (0 =
    /// never), to exercise §4.5's duplicate-frame tolerance.
    #[arg(long, default_value_t = 0)]
    duplicate_every: u32,
    /// Start under-reporting `frames_elapsed` after this many frames (0 =
    /// never), to exercise §4.5's drift detection.
    #[arg(long, default_value_t = 0)]
    drift_after_frames: u64,
    /// Log a synthetic eye sample every N simulated ticks instead of
    /// running silently (0 = disable the eye-sample demo loop entirely).
    #[arg(long, default_value_t = 200)]
    eye_log_every: u64,
}

async fn run_eye_demo(log_every: u64) {
    if log_every == 0 {
        return;
    }
    let mut gen = EyeNoiseGenerator::new(EyeNoiseConfig::default());
    let mut tick: u64 = 0;
    let mut interval = tokio::time::interval(std::time::Duration::from_millis(1));
    loop {
        interval.tick().await;
        let sample = gen.next_sample(1);
        tick += 1;
        if tick % log_every == 0 {
            info!(
                target: "devsim::eye",
                t_ms = sample.timestamp_ms,
                h = sample.left_pos.h,
                v = sample.left_pos.v,
                vh = sample.left_vel.h,
                vv = sample.left_vel.v,
                "eye sample"
            );
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "maestro_devsim=info".into()),
        )
        .init();

    let args = Args::parse();
    info!(target: "devsim", version = env!("CARGO_PKG_VERSION"), "maestro-devsim starting");

    let display_config = DisplaySimConfig {
        duplicate_every: args.duplicate_every,
        drift_after_frames: args.drift_after_frames,
        ..DisplaySimConfig::default()
    };

    let display_addr = args.display_addr.clone();
    let display_task = tokio::spawn(async move {
        if let Err(e) = rdisplay_sim::run(&display_addr, display_config).await {
            tracing::error!(target: "devsim::rdisplay", error = %e, "remote-display simulator exited");
        }
    });

    let eye_task = tokio::spawn(run_eye_demo(args.eye_log_every));

    let _ = tokio::join!(display_task, eye_task);
}
