//! Analog input device contract (§6 "Scan AI").

use proto::error::DeviceError;

/// One scan's worth of slow (per-period) and fast (25 kHz spike) samples.
#[derive(Debug, Clone, Default)]
pub struct AiScan {
    /// One 12-bit-range sample per enabled channel, in channel order.
    pub slow: Vec<i16>,
    /// Spike-channel samples collected since the previous scan, if a
    /// spike channel is configured.
    pub fast: Vec<i16>,
}

pub trait AiDevice: Send {
    /// Configure the device for `n_channels` enabled channels, a scan
    /// period of `scan_us` microseconds, and an optional spike channel
    /// index sampled at 25 kHz. `enable_start_scan_int` wires the
    /// start-of-scan event to the scheduler (§4.1).
    fn configure(
        &mut self,
        n_channels: usize,
        scan_us: u32,
        spike_channel: Option<usize>,
        enable_start_scan_int: bool,
    ) -> Result<(), DeviceError>;

    fn start(&mut self) -> Result<(), DeviceError>;
    fn stop(&mut self) -> Result<(), DeviceError>;

    /// Retrieve the most recently completed scan. `block` requests the
    /// call wait for a full scan if one isn't ready yet.
    fn unload(&mut self, block: bool) -> Result<AiScan, DeviceError>;

    /// Registers the start-of-scan interrupt handler. `ctx` is an opaque
    /// token threaded back to `handler` unchanged, matching the
    /// register-a-function-pointer-and-context convention used for ISR
    /// registration in the pack's `hadron-driver-api::registration`
    /// module.
    fn install_isr(&mut self, handler: Box<dyn Fn(u64) + Send + Sync>) -> Result<(), DeviceError>;
}

/// Deterministic in-process stand-in used by tests and `devsim`. Produces
/// a flat zero scan unless fed via [`SimAiDevice::push_scan`].
pub struct SimAiDevice {
    n_channels: usize,
    pending: std::collections::VecDeque<AiScan>,
    started: bool,
}

impl SimAiDevice {
    pub fn new() -> Self {
        Self {
            n_channels: 0,
            pending: std::collections::VecDeque::new(),
            started: false,
        }
    }

    pub fn push_scan(&mut self, scan: AiScan) {
        self.pending.push_back(scan);
    }
}

impl Default for SimAiDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl AiDevice for SimAiDevice {
    fn configure(
        &mut self,
        n_channels: usize,
        _scan_us: u32,
        _spike_channel: Option<usize>,
        _enable_start_scan_int: bool,
    ) -> Result<(), DeviceError> {
        self.n_channels = n_channels;
        Ok(())
    }

    fn start(&mut self) -> Result<(), DeviceError> {
        self.started = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), DeviceError> {
        self.started = false;
        Ok(())
    }

    fn unload(&mut self, _block: bool) -> Result<AiScan, DeviceError> {
        if !self.started {
            return Err(DeviceError::NotReady);
        }
        Ok(self
            .pending
            .pop_front()
            .unwrap_or_else(|| AiScan { slow: vec![0; self.n_channels], fast: Vec::new() }))
    }

    fn install_isr(&mut self, _handler: Box<dyn Fn(u64) + Send + Sync>) -> Result<(), DeviceError> {
        Ok(())
    }
}
