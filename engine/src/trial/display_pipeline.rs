//! Display-frame pipeline (§4.5 C6): a triple-buffered, two-frame-lead
//! accumulator sitting in front of the [`RemoteDisplay`] link.
//!
//! Grounded on `boat_sim.rs`'s fixed-size ring of in-flight physics
//! frames combined with `udp_tx.rs`'s "ship what's ready, never block the
//! physics loop on the network" discipline — generalized from a
//! send-and-forget UDP frame to a replied, accounted TCP frame since the
//! remote display's ack carries duplicate-frame and drift telemetry the
//! engine must act on (§4.5).

use proto::display::{frame_lead_bounds, FrameAck, FrameTargetUpdate, FrameUpdate};
use proto::error::DeviceError;
use tracing::warn;

use crate::devices::rdisplay::RemoteDisplay;

/// Outcome of a tick's display work, for the mode controller to fold
/// into trial-outcome decisions (§4.5 "duplicate-frame tolerance").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayEvent {
    Idle,
    Published,
    DuplicateFrameExceeded,
}

/// One not-yet-shipped frame's per-target accumulator. Reset to zero
/// after the frame is handed to [`RemoteDisplay`].
#[derive(Debug, Clone)]
struct Slot {
    targets: Vec<FrameTargetUpdate>,
}

impl Slot {
    fn new(n_targets: usize) -> Self {
        Self { targets: vec![FrameTargetUpdate::default(); n_targets] }
    }

    fn clear(&mut self) {
        for t in &mut self.targets {
            *t = FrameTargetUpdate::default();
        }
    }
}

/// Owns the three in-flight frame slots and the lead-time accounting
/// that decides when the oldest slot is due to ship (§4.5 invariant:
/// "the slot for frame N+2 is being accumulated while frames N and N+1
/// are already in flight").
pub struct DisplayPipeline {
    slots: [Slot; 3],
    active: usize,
    frame_index: u64,
    lead_accum_ms: f64,
    frame_period_ms: f64,
    dt_ms: f64,
    duplicate_tolerance: u32,
    drift_threshold: u64,
    started: bool,
}

impl DisplayPipeline {
    pub fn new(n_targets: usize, frame_period_s: f64, dt_ms: f64, duplicate_tolerance: u32) -> Self {
        Self {
            slots: [Slot::new(n_targets), Slot::new(n_targets), Slot::new(n_targets)],
            active: 0,
            frame_index: 0,
            lead_accum_ms: 0.0,
            frame_period_ms: frame_period_s * 1000.0,
            dt_ms,
            duplicate_tolerance,
            drift_threshold: 4,
            started: false,
        }
    }

    /// Accumulates one tick's per-target deltas into the currently
    /// active slot (§4.5 "added into that target's cell in the active
    /// slot").
    pub fn accumulate(&mut self, target_idx: usize, on: bool, h_win: f64, v_win: f64, h_pat: f64, v_pat: f64) {
        let cell = &mut self.slots[self.active].targets[target_idx];
        cell.on = on as u8;
        cell.h_win += (h_win * 100.0).round() as i32;
        cell.v_win += (v_win * 100.0).round() as i32;
        cell.h_pat += (h_pat * 100.0).round() as i32;
        cell.v_pat += (v_pat * 100.0).round() as i32;
    }

    /// Primes the display with two frames before the trial runs (§4.5
    /// "Start"). Must be called exactly once, before the first
    /// [`DisplayPipeline::tick`].
    pub fn start(&mut self, display: &mut dyn RemoteDisplay, flash_on_frame0: bool) -> Result<FrameAck, DeviceError> {
        let frame0 = FrameUpdate { frame_index: 0, flash_on_this_frame: flash_on_frame0, targets: self.slots[0].targets.clone() };
        let frame1 = FrameUpdate { frame_index: 1, flash_on_this_frame: false, targets: self.slots[1].targets.clone() };
        let ack = display.start_animation(frame0, frame1)?;
        self.slots[0].clear();
        self.slots[1].clear();
        self.active = 2;
        self.frame_index = 2;
        self.started = true;
        Ok(ack)
    }

    /// Advances the lead-time accumulator by one tick and ships the
    /// oldest slot once the next-update boundary is crossed (§4.5).
    pub fn tick(&mut self, display: &mut dyn RemoteDisplay) -> Result<DisplayEvent, DeviceError> {
        debug_assert!(self.started, "display pipeline ticked before start()");
        self.lead_accum_ms += self.dt_ms;
        if self.lead_accum_ms < self.frame_period_ms {
            return Ok(DisplayEvent::Idle);
        }
        self.lead_accum_ms -= self.frame_period_ms;
        self.publish(display)
    }

    fn publish(&mut self, display: &mut dyn RemoteDisplay) -> Result<DisplayEvent, DeviceError> {
        let due_slot = (self.active + 1) % 3;
        let frame =
            FrameUpdate { frame_index: self.frame_index, flash_on_this_frame: false, targets: self.slots[due_slot].targets.clone() };
        let ack = display.update_animation(frame)?;
        self.slots[due_slot].clear();
        self.frame_index += 1;
        self.active = due_slot;

        if let Some(dups) = ack.duplicate_frames {
            if dups > self.duplicate_tolerance {
                return Ok(DisplayEvent::DuplicateFrameExceeded);
            }
        }
        if let Some(elapsed) = ack.frames_elapsed {
            if self.frame_index.saturating_sub(elapsed) > self.drift_threshold {
                warn!(target: "display", sent = self.frame_index, elapsed, threshold = self.drift_threshold, "display drift warning");
                self.drift_threshold += 1;
            }
        }
        Ok(DisplayEvent::Published)
    }

    /// Re-bases the lead-time accounting after a skip-on-saccade time
    /// warp (§4.5 "Skip-on-saccade"): the display lead and next-update
    /// boundary are advanced by the same delta the trial clock jumped,
    /// so the discontinuity lands in the currently-active slot instead
    /// of producing a fresh one.
    pub fn warp_forward(&mut self, delta_ms: f64) {
        self.lead_accum_ms += delta_ms;
    }

    /// Bounds the current lead (in frames-sent minus frames-elapsed)
    /// should sit within outside of any active time-warp (§8).
    pub fn expected_lead_bounds(&self) -> (u64, u64) {
        frame_lead_bounds(self.dt_ms, self.frame_period_ms / 1000.0)
    }

    pub fn n_targets(&self) -> usize {
        self.slots[0].targets.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::rdisplay::SimRemoteDisplay;

    #[test]
    fn start_primes_two_frames_and_resets_accumulators() {
        let mut display = SimRemoteDisplay::new();
        let mut pipeline = DisplayPipeline::new(2, 1.0 / 60.0, 1.0, 0);
        pipeline.accumulate(0, true, 1.0, 0.0, 0.0, 0.0);
        pipeline.start(&mut display, true).unwrap();
        assert_eq!(display.frames_sent, 2);
        assert_eq!(pipeline.frame_index, 2);
    }

    #[test]
    fn tick_publishes_once_lead_time_crosses_period() {
        let mut display = SimRemoteDisplay::new();
        let period_s = 1.0 / 60.0;
        let dt_ms = 1.0;
        let mut pipeline = DisplayPipeline::new(1, period_s, dt_ms, 0);
        pipeline.start(&mut display, false).unwrap();

        let mut published = 0;
        for _ in 0..20 {
            if pipeline.tick(&mut display).unwrap() == DisplayEvent::Published {
                published += 1;
            }
        }
        assert!(published >= 1);
    }

    #[test]
    fn duplicate_frames_beyond_tolerance_signals_event() {
        struct DupDisplay;
        impl RemoteDisplay for DupDisplay {
            fn reinit(&mut self) -> Result<(), DeviceError> { Ok(()) }
            fn add_target(&mut self, _def: proto::display::TargetDef) -> Result<(), DeviceError> { Ok(()) }
            fn load_targets(&mut self) -> Result<(), DeviceError> { Ok(()) }
            fn start_animation(&mut self, _f0: FrameUpdate, _f1: FrameUpdate) -> Result<FrameAck, DeviceError> {
                Ok(FrameAck { ok: true, duplicate_frames: Some(0), frames_elapsed: Some(2) })
            }
            fn update_animation(&mut self, _f: FrameUpdate) -> Result<FrameAck, DeviceError> {
                Ok(FrameAck { ok: true, duplicate_frames: Some(5), frames_elapsed: Some(3) })
            }
            fn stop_animation(&mut self) -> Result<(), DeviceError> { Ok(()) }
            fn get_geometry(&mut self) -> Result<proto::display::ScreenGeometry, DeviceError> {
                unimplemented!()
            }
            fn set_bkg_color(&mut self, _r: u8, _g: u8, _b: u8) -> Result<(), DeviceError> { Ok(()) }
            fn set_sync_flash_params(&mut self, _size_pix: u16, _dur_ticks: u16) -> Result<(), DeviceError> { Ok(()) }
        }

        let mut display = DupDisplay;
        let mut pipeline = DisplayPipeline::new(1, 1.0 / 60.0, 1.0, 0);
        pipeline.start(&mut display, false).unwrap();
        let mut saw_exceeded = false;
        for _ in 0..20 {
            if pipeline.tick(&mut display).unwrap() == DisplayEvent::DuplicateFrameExceeded {
                saw_exceeded = true;
                break;
            }
        }
        assert!(saw_exceeded);
    }
}
