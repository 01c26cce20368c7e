//! Engine runtime configuration.
//!
//! Env-var-with-defaults, matching the teacher's
//! `UwbHubConfig::default()` pattern: each field reads its own
//! environment variable, falling back to a hard-coded default rather than
//! failing to start.

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// AI scan interval while idle, microseconds.
    pub scan_interval_idle_us: u32,
    /// AI scan interval while running a trial, microseconds.
    pub scan_interval_trial_us: u32,
    /// AI scan interval between trials, microseconds.
    pub scan_interval_between_us: u32,
    /// AI scan interval while running continuous mode, microseconds.
    pub scan_interval_continuous_us: u32,
    /// AI scan interval in test mode, microseconds.
    pub scan_interval_test_us: u32,
    /// Depth of the recording writer's bounded record queue.
    pub recording_queue_depth: usize,
    /// Depth of the mailbox command/telemetry channels.
    pub mailbox_queue_depth: usize,
    /// Tolerance for duplicate remote-display frames before aborting.
    pub duplicate_frame_tolerance: u32,
    /// Sliding-window length for eye-position smoothing; 1 disables it.
    pub eye_smoothing_window: usize,
    /// Host:port the remote display simulator/device listens on.
    pub display_addr: String,
    /// Bind address for the operational admin/health HTTP listener.
    pub admin_addr: String,
    /// Minimum spacing between successive marker pulses, microseconds.
    pub marker_min_spacing_us: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            scan_interval_idle_us: env_or("ENGINE_SCAN_IDLE_US", 20_000),
            scan_interval_trial_us: env_or("ENGINE_SCAN_TRIAL_US", 1_000),
            scan_interval_between_us: env_or("ENGINE_SCAN_BETWEEN_US", 10_000),
            scan_interval_continuous_us: env_or("ENGINE_SCAN_CONTINUOUS_US", 2_000),
            scan_interval_test_us: env_or("ENGINE_SCAN_TEST_US", 1_000),
            recording_queue_depth: env_or("ENGINE_RECORDING_QUEUE_DEPTH", 30),
            mailbox_queue_depth: env_or("ENGINE_MAILBOX_QUEUE_DEPTH", 64),
            duplicate_frame_tolerance: env_or("ENGINE_DUP_FRAME_TOLERANCE", 3),
            eye_smoothing_window: env_or("ENGINE_EYE_SMOOTH_WINDOW", 5),
            display_addr: std::env::var("ENGINE_DISPLAY_ADDR")
                .unwrap_or_else(|_| "127.0.0.1:7410".to_string()),
            admin_addr: std::env::var("ENGINE_ADMIN_ADDR")
                .unwrap_or_else(|_| "0.0.0.0:7400".to_string()),
            marker_min_spacing_us: env_or("ENGINE_MARKER_MIN_SPACING_US", 900),
        }
    }
}

/// Per-mode duty cycle for the periodic-suspend manager (§4.1), expressed
/// as (run_ms, suspend_ms).
#[derive(Debug, Clone, Copy)]
pub struct DutyCycle {
    pub run_ms: f64,
    pub suspend_ms: f64,
}

impl DutyCycle {
    pub const IDLE: DutyCycle = DutyCycle { run_ms: 1.0, suspend_ms: 19.0 };
    pub const TRIAL_BETWEEN: DutyCycle = DutyCycle { run_ms: 0.5, suspend_ms: 9.5 };
    pub const TRIAL_RUNNING: DutyCycle = DutyCycle { run_ms: 0.8, suspend_ms: 0.2 };
    pub const CONTINUOUS: DutyCycle = DutyCycle { run_ms: 1.6, suspend_ms: 0.4 };
    pub const TEST: DutyCycle = DutyCycle { run_ms: 0.6, suspend_ms: 1.4 };
}
