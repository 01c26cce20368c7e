//! Analog out / motion chair device contract (§6 "Analog out / chair").

use proto::error::DeviceError;

pub trait ChairDevice: Send {
    /// One-time chair initialization at mode entry.
    fn init_chair(&mut self) -> Result<(), DeviceError>;

    /// Settle the chair to a known position before a session starts.
    fn settle_chair(&mut self, measured_pos_deg: f32) -> Result<(), DeviceError>;

    /// Per-tick chair update: commanded velocity plus the measured and
    /// expected position, so the device can apply its own drift
    /// compensation (§4.8).
    fn update_chair(
        &mut self,
        cmd_vel_deg_per_s: f32,
        measured_pos_deg: f32,
        expected_pos_deg: f32,
    ) -> Result<(), DeviceError>;

    /// Raw analog-out write, used for non-chair AO channels.
    fn out(&mut self, channel: usize, volts: f32) -> Result<(), DeviceError>;
}

/// Deterministic in-process stand-in: tracks the last commanded values
/// without any physical motion model.
#[derive(Debug, Default)]
pub struct SimChairDevice {
    pub last_cmd_vel: f32,
    pub last_measured_pos: f32,
    pub last_expected_pos: f32,
    pub ao_channels: std::collections::HashMap<usize, f32>,
}

impl SimChairDevice {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ChairDevice for SimChairDevice {
    fn init_chair(&mut self) -> Result<(), DeviceError> {
        Ok(())
    }

    fn settle_chair(&mut self, measured_pos_deg: f32) -> Result<(), DeviceError> {
        self.last_measured_pos = measured_pos_deg;
        Ok(())
    }

    fn update_chair(
        &mut self,
        cmd_vel_deg_per_s: f32,
        measured_pos_deg: f32,
        expected_pos_deg: f32,
    ) -> Result<(), DeviceError> {
        self.last_cmd_vel = cmd_vel_deg_per_s;
        self.last_measured_pos = measured_pos_deg;
        self.last_expected_pos = expected_pos_deg;
        Ok(())
    }

    fn out(&mut self, channel: usize, volts: f32) -> Result<(), DeviceError> {
        self.ao_channels.insert(channel, volts);
        Ok(())
    }
}
