//! Remote-display wire protocol (§6 "Remote display", §4.5).
//!
//! The engine keeps a persistent TCP connection to a frame-accurate
//! remote display process and stays a fixed number of refresh periods
//! ahead of it (the "frame lead"). These types are the messages that
//! cross that connection; `engine::trial::display_pipeline` is the only
//! consumer on the engine side, `devsim::rdisplay_sim` is the only
//! producer/consumer pair on the simulator side.

use serde::{Deserialize, Serialize};

/// A target as authored for the remote display's target list. Creation
/// order in this list is the animation order the display consumes —
/// callers must not reorder it after `load_targets`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TargetDef {
    pub kind: TargetKind,
    pub subkind: DisplaySubkind,
    pub flags: TargetFlags,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum TargetKind {
    Display = 0,
    Chair = 1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum DisplaySubkind {
    RandomDotPatch = 0,
    FlowField = 1,
    Grating = 2,
    Plaid = 3,
    Bar = 4,
    Spot = 5,
    Image = 6,
    Movie = 7,
    /// Used for chair targets, which have no visual subkind.
    None = 255,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetFlags {
    pub orientation_adjust: bool,
    pub pattern_wrt_screen: bool,
    pub independent_gratings: bool,
}

/// One target's contribution to a single display frame (§3 "Trajectory
/// record", §4.5). `h`/`v` are deltas accumulated since the last frame was
/// shipped, in 1/100-degree units, matching the trial-code position scale.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
pub struct FrameTargetUpdate {
    pub on: u8,
    pub _pad: [u8; 3],
    pub h_win: i32,
    pub v_win: i32,
    pub h_pat: i32,
    pub v_pat: i32,
}

/// A single outbound frame: one update per target, in target-creation
/// order. The display replies with [`FrameAck`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameUpdate {
    pub frame_index: u64,
    pub flash_on_this_frame: bool,
    pub targets: Vec<FrameTargetUpdate>,
}

/// Reply to `start_animation`/`update_animation` (§4.5).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FrameAck {
    pub ok: bool,
    /// Duplicate frames the display observed since the previous ack, or
    /// `None` if the display doesn't support duplicate-frame telemetry.
    pub duplicate_frames: Option<u32>,
    /// Frames the display has actually presented since animation start,
    /// or `None` if unsupported. Used for drift detection (§4.5).
    pub frames_elapsed: Option<u64>,
}

/// Screen geometry as reported by the display (§6 "Remote display").
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ScreenGeometry {
    pub width_pix: u32,
    pub height_pix: u32,
    pub width_mm: u32,
    pub height_mm: u32,
    pub distance_mm: u32,
    pub refresh_microhz: u32,
}

impl ScreenGeometry {
    /// Refresh period in seconds, derived from the reported micro-Hz rate.
    pub fn frame_period_s(&self) -> f64 {
        1.0e6 / self.refresh_microhz as f64
    }

    /// Degrees-per-pixel on each axis, given the reported physical size.
    pub fn deg_per_pixel(&self) -> (f64, f64) {
        let half_w_deg = (self.width_mm as f64 / 2.0 / self.distance_mm as f64).atan().to_degrees();
        let half_h_deg = (self.height_mm as f64 / 2.0 / self.distance_mm as f64).atan().to_degrees();
        (
            2.0 * half_w_deg / self.width_pix as f64,
            2.0 * half_h_deg / self.height_pix as f64,
        )
    }
}

/// Expected bounds on `(n_frames_sent - n_frames_elapsed)` outside of any
/// time-warp, per §4.5/§8: the lead should sit between 2 and 3 refresh
/// periods once the pipeline is primed.
pub fn frame_lead_bounds(dt_ms: f64, frame_period_s: f64) -> (u64, u64) {
    let frames_per_lead = (frame_period_s * 1000.0 / dt_ms).max(1.0);
    (
        (2.0 * frames_per_lead).ceil() as u64,
        (3.0 * frames_per_lead).ceil() as u64,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn geometry_round_trips_frame_period() {
        let g = ScreenGeometry {
            width_pix: 1024,
            height_pix: 768,
            width_mm: 400,
            height_mm: 300,
            distance_mm: 600,
            refresh_microhz: 60_000_000,
        };
        assert!((g.frame_period_s() - (1.0 / 60.0)).abs() < 1e-9);
    }

    #[test]
    fn lead_bounds_scale_with_dt() {
        let (lo, hi) = frame_lead_bounds(1.0, 1.0 / 60.0);
        assert!(lo <= hi);
        assert!(lo >= 2);
    }
}
