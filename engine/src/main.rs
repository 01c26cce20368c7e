mod admin;
mod config;
mod continuous;
mod data_model;
mod devices;
mod error;
mod mailbox;
mod markers;
mod mode_controller;
mod recording;
mod scheduler;
mod trial;

use std::sync::{Arc, RwLock};
use std::time::Duration;

use clap::Parser;
use proto::mailbox::{Ack, Telemetry};
use tracing::{error, info, warn};

use admin::SharedMode;
use config::EngineConfig;
use devices::ai::SimAiDevice;
use devices::ao_chair::SimChairDevice;
use devices::dio::SimDioDevice;
use devices::eyelink::SimEyelinkDevice;
use devices::rdisplay::{RemoteDisplay, SimRemoteDisplay, TcpRemoteDisplay};
use mode_controller::{Devices, Mode, ModeController};
use scheduler::{ScanClock, ScanTimer};

/// CLI surface for the engine process. The real peer is the authoring
/// process over the IPC mailbox (§6); these flags only ever override
/// [`EngineConfig`]'s environment-variable defaults for local runs.
#[derive(Parser, Debug)]
#[command(name = "maestro-engine", about = "Real-time trial/continuous runtime engine")]
struct Args {
    /// Override the remote display's host:port.
    #[arg(long)]
    display_addr: Option<String>,
    /// Override the admin/health HTTP listener's bind address.
    #[arg(long)]
    admin_addr: Option<String>,
}

/// Connects to the remote display if one is listening, otherwise falls
/// back to the deterministic in-process stand-in (§7 "never crash on
/// I/O"): a missing remote display at startup is not fatal, unlike a
/// missing AI or DIO device (§4.2).
fn connect_display(addr: &str) -> Box<dyn RemoteDisplay> {
    match TcpRemoteDisplay::connect(addr, Duration::from_millis(500)) {
        Ok(d) => {
            info!(target: "engine", %addr, "connected to remote display");
            Box::new(d)
        }
        Err(_) => {
            warn!(target: "engine", %addr, "remote display unreachable at startup, using simulator stand-in");
            Box::new(SimRemoteDisplay::new())
        }
    }
}

/// Drains acks/telemetry the mode controller emits so the admin status
/// endpoint reflects the live mode and so a full mailbox never
/// backpressures the engine thread (both channels are `try_send`, so an
/// un-drained peer only ever costs dropped telemetry, never a stall, but
/// draining keeps `/status` accurate for anyone watching the admin port).
fn spawn_telemetry_sink(peer: mailbox::MailboxPeerSide, shared_mode: SharedMode) {
    std::thread::Builder::new()
        .name("telemetry-sink".into())
        .spawn(move || loop {
            if let Some(telem) = peer.try_recv_telemetry() {
                if let Telemetry::ModeChanged(run_mode) = telem {
                    if let Ok(mut guard) = shared_mode.write() {
                        *guard = match run_mode {
                            proto::mailbox::RunMode::Idle => Mode::Idle,
                            proto::mailbox::RunMode::Test => Mode::Test,
                            proto::mailbox::RunMode::Trial => Mode::Trial,
                            proto::mailbox::RunMode::ContinuousBetween => Mode::ContinuousBetween,
                            proto::mailbox::RunMode::ContinuousActive => Mode::ContinuousActive,
                        };
                    }
                }
            }
            while let Some(ack) = peer.try_recv_ack() {
                if let Ack::Error(msg) = ack {
                    error!(target: "engine", "command error: {msg}");
                }
            }
            std::thread::sleep(Duration::from_millis(20));
        })
        .expect("failed to spawn telemetry sink thread");
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "maestro_engine=info".into()),
        )
        .init();

    let args = Args::parse();
    let mut config = EngineConfig::default();
    if let Some(addr) = args.display_addr {
        config.display_addr = addr;
    }
    if let Some(addr) = args.admin_addr {
        config.admin_addr = addr;
    }

    info!(target: "engine", version = env!("CARGO_PKG_VERSION"), "maestro-engine starting");

    let shared_mode: SharedMode = Arc::new(RwLock::new(Mode::Idle));
    admin::spawn(config.admin_addr.clone(), shared_mode.clone());

    let (engine_side, peer_side) = mailbox::channel(config.mailbox_queue_depth);
    spawn_telemetry_sink(peer_side, shared_mode);

    let clock = ScanClock::new(config.scan_interval_idle_us);
    let timer = ScanTimer::start(clock.clone());

    let devices = Devices {
        ai: Box::new(SimAiDevice::new()),
        chair: Box::new(SimChairDevice::new()),
        dio: Box::new(SimDioDevice::new()),
        eyelink: Box::new(SimEyelinkDevice::new()),
        display: connect_display(&config.display_addr),
    };

    let mut controller = ModeController::new(devices, engine_side, clock, config);

    if let Err(e) = controller.probe_required_devices() {
        error!(target: "engine", "{e}");
        return;
    }

    // §5: the engine's real-time core is a plain thread waiting on the
    // scan interrupt, never an async task — admin HTTP traffic on its
    // own Tokio runtime must never perturb scan timing.
    controller.run_forever();

    timer.stop();
}
