//! Synchronization marker stream (§4.9, C11).
//!
//! Two independent channels ride on the same [`DioDevice`]: a dedicated
//! DO bit pulse train (marker pulses, e.g. `DO<6>` on special-op events,
//! bit 11 by convention for record start/stop) and a character-sentinel
//! stream bracketing a recording session (`START` ... `STOP`).
//!
//! Grounded on the teacher's `handlers.rs::emit_log()` — a small, widely
//! reused tagged-event emission helper — generalized here to pulse +
//! character emission with the §4.9 900 us minimum inter-pulse spacing
//! enforced by a busy-wait, mirroring the DIO contract's
//! `set_do_busy_wait_times`.

use std::time::{Duration, Instant};

use proto::error::DeviceError;
use tracing::{info, warn};

use crate::devices::DioDevice;

/// Conventional DO bit carrying record start/stop pulses (§4.9).
pub const RECORD_MARKER_BIT: u16 = 1 << 11;
/// `DO<6>`: special-op event marker (saccade landed, selection made, …).
pub const SPECIAL_OP_MARKER_BIT: u16 = 1 << 6;

pub mod chars {
    pub const START: u8 = b'S';
    pub const STOP: u8 = b'E';
    pub const ABORT: u8 = b'A';
    pub const LOSTFIX: u8 = b'L';
    pub const NO_DATA_FILE: u8 = b'N';
    pub const DATASAVED: u8 = b'D';
}

/// Enforces the §4.9 900 us minimum spacing between successive marker
/// pulses by busy-waiting on an elapsed-time object, matching the real
/// device's latency budget (a `std::thread::sleep` would overshoot by a
/// scheduler quantum, which is exactly what this invariant exists to
/// avoid).
pub struct MarkerStream {
    min_spacing: Duration,
    last_pulse_at: Option<Instant>,
}

impl MarkerStream {
    pub fn new(min_spacing_us: u32) -> Self {
        Self { min_spacing: Duration::from_micros(min_spacing_us as u64), last_pulse_at: None }
    }

    fn wait_for_spacing(&mut self) {
        if let Some(last) = self.last_pulse_at {
            let elapsed = last.elapsed();
            if elapsed < self.min_spacing {
                let remaining = self.min_spacing - elapsed;
                let deadline = Instant::now() + remaining;
                while Instant::now() < deadline {
                    std::hint::spin_loop();
                }
            }
        }
        self.last_pulse_at = Some(Instant::now());
    }

    /// Pulses `mask` on the DIO device's marker output, respecting the
    /// minimum inter-pulse spacing (§8 "Marker pulse spacing").
    pub fn pulse(&mut self, dio: &mut dyn DioDevice, mask: u16) -> Result<(), DeviceError> {
        self.wait_for_spacing();
        dio.trigger_markers(mask)
    }

    /// Emits the record-start bracket: `START`, the file name (or
    /// `NO_DATA_FILE` if recording was declined), per §4.9.
    pub fn emit_start(&mut self, dio: &mut dyn DioDevice, file_name: Option<&str>) -> Result<(), DeviceError> {
        self.pulse(dio, RECORD_MARKER_BIT)?;
        dio.write_char(chars::START)?;
        match file_name {
            Some(name) => {
                dio.write_string(name.as_bytes())?;
                dio.write_char(0)?;
            }
            None => dio.write_char(chars::NO_DATA_FILE)?,
        }
        info!(target: "markers", file = file_name.unwrap_or("<none>"), "record start");
        Ok(())
    }

    pub fn emit_lostfix(&mut self, dio: &mut dyn DioDevice) -> Result<(), DeviceError> {
        dio.write_char(chars::LOSTFIX)
    }

    pub fn emit_abort(&mut self, dio: &mut dyn DioDevice) -> Result<(), DeviceError> {
        dio.write_char(chars::ABORT)
    }

    pub fn emit_datasaved(&mut self, dio: &mut dyn DioDevice) -> Result<(), DeviceError> {
        dio.write_char(chars::DATASAVED)
    }

    /// Emits the closing `STOP` sentinel and the paired DO pulse (§4.9).
    pub fn emit_stop(&mut self, dio: &mut dyn DioDevice) -> Result<(), DeviceError> {
        dio.write_char(chars::STOP)?;
        self.pulse(dio, RECORD_MARKER_BIT)
    }

    /// Full failure bracket for a non-completed trial (§7 "User-visible
    /// failure behavior"): START/file-name, LOSTFIX and/or ABORT as
    /// applicable, STOP. Never emits DATASAVED since the file is
    /// discarded on any non-completed terminus.
    pub fn emit_failure_sequence(
        &mut self,
        dio: &mut dyn DioDevice,
        lostfix: bool,
        aborted: bool,
    ) -> Result<(), DeviceError> {
        self.emit_start(dio, None)?;
        if lostfix {
            self.emit_lostfix(dio)?;
        }
        if aborted {
            self.emit_abort(dio)?;
        }
        warn!(target: "markers", lostfix, aborted, "non-completed trial: no data file retained");
        self.emit_stop(dio)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::dio::SimDioDevice;

    #[test]
    fn successful_session_brackets_start_and_stop() {
        let mut dio = SimDioDevice::new();
        let mut markers = MarkerStream::new(0);
        markers.emit_start(&mut dio, Some("T0001.001")).unwrap();
        markers.emit_datasaved(&mut dio).unwrap();
        markers.emit_stop(&mut dio).unwrap();
        assert_eq!(dio.written_chars.first(), Some(&chars::START));
        assert!(dio.written_chars.contains(&chars::DATASAVED));
        assert_eq!(dio.written_chars.last(), Some(&chars::STOP));
    }

    #[test]
    fn failure_sequence_emits_no_data_file_sentinel() {
        let mut dio = SimDioDevice::new();
        let mut markers = MarkerStream::new(0);
        markers.emit_failure_sequence(&mut dio, true, true).unwrap();
        assert!(dio.written_chars.contains(&chars::NO_DATA_FILE));
        assert!(dio.written_chars.contains(&chars::LOSTFIX));
        assert!(dio.written_chars.contains(&chars::ABORT));
        assert!(!dio.written_chars.contains(&chars::DATASAVED));
    }

    #[test]
    fn successive_pulses_respect_minimum_spacing() {
        let mut dio = SimDioDevice::new();
        let mut markers = MarkerStream::new(900);
        let start = Instant::now();
        markers.pulse(&mut dio, 1).unwrap();
        markers.pulse(&mut dio, 1).unwrap();
        assert!(start.elapsed() >= Duration::from_micros(900));
    }
}
