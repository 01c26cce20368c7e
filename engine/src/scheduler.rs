//! # scheduler
//!
//! Scan scheduler (§4.1, C2): a single periodic event source driving the
//! engine's tick rate, plus the bookkeeping the interrupt context is
//! responsible for.
//!
//! Grounded on the teacher's `main.rs` `STARTUP_MS: AtomicU64` +
//! `run_engine_tick()` timer-loop shape, but moved off `tokio::interval`
//! onto a plain `std::thread` timer: §5 requires the engine's tick source
//! to be independent of any async runtime so that admin-HTTP traffic can
//! never perturb scan timing.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Shared tick bookkeeping, written by the scheduler thread and read by
/// the engine thread once per tick.
pub struct ScanClock {
    elapsed_ticks: AtomicU64,
    interrupt_pending: AtomicBool,
    delayed_isr: AtomicBool,
    scan_interval_us: AtomicU64,
    start: Instant,
}

impl ScanClock {
    pub fn new(scan_interval_us: u32) -> Arc<Self> {
        Arc::new(Self {
            elapsed_ticks: AtomicU64::new(0),
            interrupt_pending: AtomicBool::new(false),
            delayed_isr: AtomicBool::new(false),
            scan_interval_us: AtomicU64::new(scan_interval_us as u64),
            start: Instant::now(),
        })
    }

    pub fn set_scan_interval_us(&self, us: u32) {
        self.scan_interval_us.store(us as u64, Ordering::Relaxed);
    }

    pub fn scan_interval_us(&self) -> u32 {
        self.scan_interval_us.load(Ordering::Relaxed) as u32
    }

    pub fn elapsed_ticks(&self) -> u64 {
        self.elapsed_ticks.load(Ordering::Acquire)
    }

    pub fn take_delayed_isr(&self) -> bool {
        self.delayed_isr.swap(false, Ordering::AcqRel)
    }

    /// Called by the engine thread at the top of its loop: waits for the
    /// next interrupt (busy-polling with a short sleep, since std has no
    /// portable "wait on this boolean" primitive cheaper than that
    /// without a condvar — a condvar is used below instead). Returns
    /// `false` on timeout (2x scan interval, §5 "Timeouts").
    pub fn wait_for_interrupt(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.interrupt_pending.swap(false, Ordering::AcqRel) {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_micros(50));
        }
    }

    /// ISR-context bookkeeping (§4.1): computes latency, flags a delayed
    /// ISR if it exceeds `expected + 500us`, increments `elapsed_ticks`,
    /// and sets `interrupt_pending`.
    fn on_interrupt(&self, last_tick_at: &mut Instant) {
        let now = Instant::now();
        let delta = now.duration_since(*last_tick_at);
        *last_tick_at = now;

        let expected = Duration::from_micros(self.scan_interval_us());
        if delta > expected + Duration::from_micros(500) {
            self.delayed_isr.store(true, Ordering::Release);
        }
        self.elapsed_ticks.fetch_add(1, Ordering::AcqRel);
        self.interrupt_pending.store(true, Ordering::Release);
    }

    pub fn uptime_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

/// Spawns the background thread that stands in for the AI start-of-scan
/// interrupt. Returns a handle whose `JoinHandle` the caller should keep
/// until engine shutdown; dropping the returned `running` flag's `Arc`
/// does not stop the thread — call [`ScanTimer::stop`] explicitly.
pub struct ScanTimer {
    running: Arc<AtomicBool>,
    handle: Option<std::thread::JoinHandle<()>>,
}

impl ScanTimer {
    pub fn start(clock: Arc<ScanClock>) -> Self {
        let running = Arc::new(AtomicBool::new(true));
        let running_thread = running.clone();
        let handle = std::thread::spawn(move || {
            let mut last_tick_at = Instant::now();
            while running_thread.load(Ordering::Relaxed) {
                let interval = Duration::from_micros(clock.scan_interval_us() as u64);
                std::thread::sleep(interval);
                clock.on_interrupt(&mut last_tick_at);
            }
        });
        Self { running, handle: Some(handle) }
    }

    pub fn stop(mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interrupt_increments_elapsed_ticks() {
        let clock = ScanClock::new(1000);
        let mut last = Instant::now();
        clock.on_interrupt(&mut last);
        clock.on_interrupt(&mut last);
        assert_eq!(clock.elapsed_ticks(), 2);
    }

    #[test]
    fn wait_for_interrupt_times_out_when_nothing_pending() {
        let clock = ScanClock::new(1000);
        let ok = clock.wait_for_interrupt(Duration::from_millis(5));
        assert!(!ok);
    }

    #[test]
    fn wait_for_interrupt_returns_true_once_signalled() {
        let clock = ScanClock::new(1000);
        let mut last = Instant::now();
        clock.on_interrupt(&mut last);
        assert!(clock.wait_for_interrupt(Duration::from_millis(5)));
    }
}
