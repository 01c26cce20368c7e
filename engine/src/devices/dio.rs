//! Digital event timer contract (§6 "Digital event timer").

use proto::error::DeviceError;

/// One (bit-mask, time) event captured by the timer.
#[derive(Debug, Clone, Copy)]
pub struct DioEvent {
    pub mask: u16,
    pub time_10us: u32,
}

pub trait DioDevice: Send {
    fn configure(&mut self, clock_us: u32, enabled_input_mask: u16) -> Result<(), DeviceError>;
    fn start(&mut self) -> Result<(), DeviceError>;
    fn stop(&mut self) -> Result<(), DeviceError>;

    /// Drain up to `max` buffered events.
    fn unload_events(&mut self, max: usize) -> Result<Vec<DioEvent>, DeviceError>;

    /// Pulse the marker output bits in `mask` (§4.9). Callers are
    /// responsible for respecting the minimum inter-pulse spacing; this
    /// call itself is fire-and-forget.
    fn trigger_markers(&mut self, mask: u16) -> Result<(), DeviceError>;

    fn set_do(&mut self, value: u16) -> Result<(), DeviceError>;
    fn set_fixation_status(&mut self) -> Result<(), DeviceError>;
    fn clear_fixation_status(&mut self) -> Result<(), DeviceError>;

    /// Deliver a reward pulse, respecting the withhold variable ratio
    /// counter (`whvr`: 0 disables withholding). Returns whether a pulse
    /// was actually delivered.
    fn deliver_reward(
        &mut self,
        whvr: u16,
        pulse_len_ms: u16,
        audio_len_ms: u16,
    ) -> Result<bool, DeviceError>;

    fn write_char(&mut self, b: u8) -> Result<(), DeviceError>;
    fn write_string(&mut self, bytes: &[u8]) -> Result<(), DeviceError>;

    /// Configures the three busy-wait steps in the DO delivery path,
    /// tolerating slow latched downstream devices (§6).
    fn set_do_busy_wait_times(&mut self, a_us: u32, b_us: u32, c_us: u32) -> Result<(), DeviceError>;
}

#[derive(Debug, Default)]
pub struct SimDioDevice {
    pending_events: std::collections::VecDeque<DioEvent>,
    reward_counter: u64,
    pub written_chars: Vec<u8>,
    pub marker_pulses: Vec<u16>,
    pub do_value: u16,
}

impl SimDioDevice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_event(&mut self, ev: DioEvent) {
        self.pending_events.push_back(ev);
    }
}

impl DioDevice for SimDioDevice {
    fn configure(&mut self, _clock_us: u32, _enabled_input_mask: u16) -> Result<(), DeviceError> {
        Ok(())
    }
    fn start(&mut self) -> Result<(), DeviceError> {
        Ok(())
    }
    fn stop(&mut self) -> Result<(), DeviceError> {
        Ok(())
    }

    fn unload_events(&mut self, max: usize) -> Result<Vec<DioEvent>, DeviceError> {
        let mut out = Vec::new();
        while out.len() < max {
            match self.pending_events.pop_front() {
                Some(e) => out.push(e),
                None => break,
            }
        }
        Ok(out)
    }

    fn trigger_markers(&mut self, mask: u16) -> Result<(), DeviceError> {
        self.marker_pulses.push(mask);
        Ok(())
    }

    fn set_do(&mut self, value: u16) -> Result<(), DeviceError> {
        self.do_value = value;
        Ok(())
    }

    fn set_fixation_status(&mut self) -> Result<(), DeviceError> {
        Ok(())
    }

    fn clear_fixation_status(&mut self) -> Result<(), DeviceError> {
        Ok(())
    }

    fn deliver_reward(
        &mut self,
        whvr: u16,
        _pulse_len_ms: u16,
        _audio_len_ms: u16,
    ) -> Result<bool, DeviceError> {
        self.reward_counter += 1;
        if whvr == 0 {
            return Ok(true);
        }
        Ok(self.reward_counter % whvr as u64 != 0)
    }

    fn write_char(&mut self, b: u8) -> Result<(), DeviceError> {
        self.written_chars.push(b);
        Ok(())
    }

    fn write_string(&mut self, bytes: &[u8]) -> Result<(), DeviceError> {
        self.written_chars.extend_from_slice(bytes);
        Ok(())
    }

    fn set_do_busy_wait_times(&mut self, _a_us: u32, _b_us: u32, _c_us: u32) -> Result<(), DeviceError> {
        Ok(())
    }
}
