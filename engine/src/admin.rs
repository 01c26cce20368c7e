//! Operational admin/health HTTP surface (§6 "out of scope: no admin
//! HTTP surface is part of the protocol", read as: a liveness/status
//! endpoint is fine, it just isn't part of the mailbox/device protocol).
//!
//! Grounded on the teacher's `main.rs` `health_check()`/`time_sync()`
//! handlers and `STARTUP_MS` uptime bookkeeping, carried over unchanged
//! in shape: a tiny `axum::Router` on its own Tokio runtime, entirely
//! separate from the real-time engine thread so admin HTTP traffic can
//! never perturb scan timing (§5). Request tracing uses `tower-http`'s
//! `TraceLayer` in place of the teacher's CORS layer, since this surface
//! has no browser client to exempt from same-origin checks.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::mode_controller::Mode;

static STARTUP_MS: AtomicU64 = AtomicU64::new(0);

/// Shared last-known mode, updated by the engine thread and read by the
/// `/status` handler; an `Arc<RwLock<_>>` rather than a channel since the
/// admin surface only ever wants the latest value, never a history.
pub type SharedMode = Arc<std::sync::RwLock<Mode>>;

async fn health_check() -> Json<serde_json::Value> {
    let now_ms = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64;
    let startup = STARTUP_MS.load(Ordering::Relaxed);
    let uptime_secs = if startup > 0 { (now_ms - startup) / 1000 } else { 0 };
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptimeSecs": uptime_secs,
    }))
}

async fn time_sync() -> Json<serde_json::Value> {
    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis();
    Json(json!({ "serverTime": now }))
}

async fn status(mode: axum::extract::State<SharedMode>) -> Json<serde_json::Value> {
    let current = *mode.0.read().unwrap_or_else(|p| p.into_inner());
    Json(json!({ "mode": format!("{current:?}") }))
}

fn router(mode: SharedMode) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/sync", get(time_sync))
        .route("/status", get(status))
        .layer(TraceLayer::new_for_http())
        .with_state(mode)
}

/// Spawns a dedicated single-threaded Tokio runtime on a background OS
/// thread and serves the admin router on it until the process exits.
/// The engine's real-time core never touches this runtime (§5).
pub fn spawn(addr: String, mode: SharedMode) {
    let startup_ms = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64;
    STARTUP_MS.store(startup_ms, Ordering::Relaxed);

    std::thread::Builder::new()
        .name("admin-http".into())
        .spawn(move || {
            let rt = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
                Ok(rt) => rt,
                Err(e) => {
                    tracing::error!(target: "admin", error = %e, "failed to start admin HTTP runtime");
                    return;
                }
            };
            rt.block_on(async move {
                let listener = match tokio::net::TcpListener::bind(&addr).await {
                    Ok(l) => l,
                    Err(e) => {
                        tracing::error!(target: "admin", %addr, error = %e, "failed to bind admin HTTP listener");
                        return;
                    }
                };
                info!(target: "admin", %addr, "admin HTTP listener started");
                let app = router(mode);
                if let Err(e) = axum::serve(listener, app).await {
                    tracing::error!(target: "admin", error = %e, "admin HTTP server exited");
                }
            });
        })
        .expect("failed to spawn admin HTTP thread");
}
