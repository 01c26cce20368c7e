//! Trajectory engine (§4.5 C5): piecewise integration of target window
//! and pattern motion, with velocity stabilization.
//!
//! Grounded on `uwb-simulator/src/boat_sim.rs`'s per-tick physics
//! integration shape (plain numeric state advanced by a fixed `dt` each
//! call, no hidden global clock) and `uwb_physics.rs`'s small
//! free-function-per-concern style.

use crate::data_model::{SegmentTarget, Trajectory};
use proto::eyelink::EyePoint;

/// Advances one target's trajectory by one tick of length `dt_s` seconds
/// (§4.5). Does not apply segment-entry overrides; call
/// [`apply_segment_entry`] first on the tick a new segment starts.
pub fn step(traj: &mut Trajectory, dt_s: f64) {
    traj.p_h += traj.v_h * dt_s;
    traj.p_v += traj.v_v * dt_s;
    traj.v_h += traj.a_h * dt_s;
    traj.v_v += traj.a_v * dt_s;
    traj.vp_h += traj.ap_h * dt_s;
    traj.vp_v += traj.ap_v * dt_s;

    traj.pending_win_h += traj.v_h * dt_s;
    traj.pending_win_v += traj.v_v * dt_s;
    traj.pending_pat_h += traj.vp_h * dt_s;
    traj.pending_pat_v += traj.vp_v * dt_s;
}

/// Applies a segment's per-target overrides on the tick that segment
/// becomes active (§4.5). `pattern_wrt_screen` mirrors a window-position
/// jump into the pattern accumulator so the pattern compensates for it.
pub fn apply_segment_entry(traj: &mut Trajectory, seg: &SegmentTarget, pattern_wrt_screen: bool) {
    traj.on = seg.on;
    traj.vstab = seg.vstab;
    traj.v_h = seg.vel_h;
    traj.v_v = seg.vel_v;
    traj.a_h = seg.acc_h;
    traj.a_v = seg.acc_v;
    traj.vp_h = seg.pattern_vel_h;
    traj.vp_v = seg.pattern_vel_v;
    traj.ap_h = seg.pattern_acc_h;
    traj.ap_v = seg.pattern_acc_v;

    if seg.pos_is_relative {
        traj.p_h += seg.pos_change_h;
        traj.p_v += seg.pos_change_v;
    } else {
        traj.p_h = seg.pos_change_h;
        traj.p_v = seg.pos_change_v;
        traj.v_h = 0.0;
        traj.v_v = 0.0;
    }

    if pattern_wrt_screen {
        traj.pending_pat_h += seg.pos_change_h;
        traj.pending_pat_v += seg.pos_change_v;
    }
}

/// Applies the per-tick velocity perturbation (§4.5): stored so the
/// nominal trajectory can be restored at the end of the tick.
pub fn apply_perturbation(traj: &mut Trajectory, dv_h: f64, dv_v: f64, dvp_h: f64, dvp_v: f64) {
    traj.perturb_v_h = dv_h;
    traj.perturb_v_v = dv_v;
    traj.perturb_vp_h = dvp_h;
    traj.perturb_vp_v = dvp_v;
    traj.v_h += dv_h;
    traj.v_v += dv_v;
    traj.vp_h += dvp_h;
    traj.vp_v += dvp_v;
}

/// Restores the nominal trajectory that a perturbation was added on top
/// of, so next tick's `step` integrates from the unperturbed state.
pub fn undo_perturbation(traj: &mut Trajectory) {
    traj.v_h -= traj.perturb_v_h;
    traj.v_v -= traj.perturb_v_v;
    traj.vp_h -= traj.perturb_vp_h;
    traj.vp_v -= traj.perturb_vp_v;
    traj.perturb_v_h = 0.0;
    traj.perturb_v_v = 0.0;
    traj.perturb_vp_h = 0.0;
    traj.perturb_vp_v = 0.0;
}

/// Velocity stabilization (§4.5): either snaps to the eye on first
/// activation, or tracks incremental eye motion on masked axes.
pub struct VStabState {
    pub first_tick_on: bool,
}

pub fn apply_vstab(
    traj: &mut Trajectory,
    state: &mut VStabState,
    eye_avg_prev: EyePoint,
    eye_avg_now: EyePoint,
) {
    if !traj.vstab.on {
        state.first_tick_on = true;
        return;
    }

    if state.first_tick_on && traj.vstab.snap {
        traj.p_h = eye_avg_now.h as f64 + traj.p_h;
        traj.p_v = eye_avg_now.v as f64 + traj.p_v;
        state.first_tick_on = false;
        return;
    }
    state.first_tick_on = false;

    let delta_h = (eye_avg_now.h - eye_avg_prev.h) as f64;
    let delta_v = (eye_avg_now.v - eye_avg_prev.v) as f64;
    if traj.vstab.h_component {
        traj.p_h += delta_h;
    }
    if traj.vstab.v_component {
        traj.p_v += delta_v;
    }
}

/// Sliding-window mean of raw eye samples (§4.5, §9 design note). A
/// window length of 1 bypasses accumulation entirely.
pub struct EyeAverager {
    window: std::collections::VecDeque<EyePoint>,
    capacity: usize,
}

impl EyeAverager {
    pub fn new(capacity: usize) -> Self {
        Self { window: std::collections::VecDeque::with_capacity(capacity.max(1)), capacity: capacity.max(1) }
    }

    pub fn push(&mut self, sample: EyePoint) -> EyePoint {
        if self.capacity <= 1 {
            return sample;
        }
        if self.window.len() == self.capacity {
            self.window.pop_front();
        }
        self.window.push_back(sample);
        let n = self.window.len() as f32;
        let (sum_h, sum_v) = self.window.iter().fold((0.0f32, 0.0f32), |(h, v), p| (h + p.h, v + p.v));
        EyePoint { h: sum_h / n, v: sum_v / n }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_model::Trajectory;

    #[test]
    fn step_integrates_position_from_velocity() {
        let mut t = Trajectory { v_h: 10.0, ..Default::default() };
        step(&mut t, 0.001);
        assert!((t.p_h - 0.01).abs() < 1e-9);
    }

    #[test]
    fn absolute_segment_entry_zeroes_carried_velocity() {
        let mut t = Trajectory { v_h: 5.0, p_h: 1.0, ..Default::default() };
        let seg = SegmentTarget { pos_is_relative: false, pos_change_h: 3.0, ..Default::default() };
        apply_segment_entry(&mut t, &seg, false);
        assert_eq!(t.p_h, 3.0);
        assert_eq!(t.v_h, 0.0);
    }

    #[test]
    fn relative_segment_entry_adds_to_existing_position() {
        let mut t = Trajectory { p_h: 1.0, ..Default::default() };
        let seg = SegmentTarget { pos_is_relative: true, pos_change_h: 0.5, ..Default::default() };
        apply_segment_entry(&mut t, &seg, false);
        assert!((t.p_h - 1.5).abs() < 1e-9);
    }

    #[test]
    fn perturbation_round_trips() {
        let mut t = Trajectory { v_h: 1.0, ..Default::default() };
        apply_perturbation(&mut t, 0.2, 0.0, 0.0, 0.0);
        assert!((t.v_h - 1.2).abs() < 1e-9);
        undo_perturbation(&mut t);
        assert!((t.v_h - 1.0).abs() < 1e-9);
    }

    #[test]
    fn eye_averager_window_one_is_identity() {
        let mut avg = EyeAverager::new(1);
        let out = avg.push(EyePoint { h: 3.0, v: -2.0 });
        assert_eq!(out.h, 3.0);
        assert_eq!(out.v, -2.0);
    }

    #[test]
    fn eye_averager_smooths_over_window() {
        let mut avg = EyeAverager::new(2);
        avg.push(EyePoint { h: 0.0, v: 0.0 });
        let out = avg.push(EyePoint { h: 2.0, v: 0.0 });
        assert!((out.h - 1.0).abs() < 1e-6);
    }
}
