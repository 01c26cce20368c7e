//! Eye-tracker sample wire type (§6 "Eye tracker feed").
//!
//! Samples arrive at 1 kHz over the IPC mailbox (never a separate network
//! link — see `engine::mailbox`). Position is in raw AI units on each
//! channel; `engine::trial::fixation` is responsible for converting to
//! degrees using the session's calibration, never this crate.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum RecordType {
    MonoLeft = 0,
    MonoRight = 1,
    Binocular = 2,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct EyePoint {
    pub h: f32,
    pub v: f32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EyeSample {
    pub timestamp_ms: u64,
    pub record_type: RecordType,
    pub left_pos: EyePoint,
    pub left_vel: EyePoint,
    pub left_has_eye: bool,
    pub right_pos: EyePoint,
    pub right_vel: EyePoint,
    pub right_has_eye: bool,
}

impl EyeSample {
    /// The single-eye position the fixation engine should use when only
    /// one eye is tracked, or the average of both when binocular.
    pub fn combined_pos(&self) -> EyePoint {
        match (self.left_has_eye, self.right_has_eye) {
            (true, true) => EyePoint {
                h: (self.left_pos.h + self.right_pos.h) / 2.0,
                v: (self.left_pos.v + self.right_pos.v) / 2.0,
            },
            (true, false) => self.left_pos,
            (false, true) => self.right_pos,
            (false, false) => EyePoint::default(),
        }
    }

    pub fn combined_vel(&self) -> EyePoint {
        match (self.left_has_eye, self.right_has_eye) {
            (true, true) => EyePoint {
                h: (self.left_vel.h + self.right_vel.h) / 2.0,
                v: (self.left_vel.v + self.right_vel.v) / 2.0,
            },
            (true, false) => self.left_vel,
            (false, true) => self.right_vel,
            (false, false) => EyePoint::default(),
        }
    }
}
