//! Fixation & special-op engine (§4.6, C7).
//!
//! Grounded on `trilateration.rs`'s `detect_ocs()` shape — a pure
//! function over solved-state producing a small classification/event
//! list — generalized from "classify OCS boats from a solve result" to
//! "classify fixation/saccade/selection events from eye state".

use proto::eyelink::EyePoint;
use proto::trialcodes::SpecialOp;

use crate::data_model::FixAccuracyBox;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixationCheck {
    Ok,
    Violated,
    Disabled,
}

/// Rectangular-tolerance fixation test (§4.6): `eye` and `target` are in
/// the same degree units as [`FixAccuracyBox`].
pub fn within_tolerance(eye: EyePoint, target: EyePoint, box_: FixAccuracyBox) -> bool {
    (eye.h - target.h).abs() <= box_.h_deg && (eye.v - target.v).abs() <= box_.v_deg
}

/// Saccade detector (§4.6): present when either axis of eye velocity
/// exceeds `threshold` in magnitude.
pub fn saccade_present(eye_vel: EyePoint, threshold: f64) -> bool {
    (eye_vel.h as f64).abs() > threshold || (eye_vel.v as f64).abs() > threshold
}

/// Tracks consecutive fixation violations; two in a row is a lost
/// fixation (§4.6).
#[derive(Debug, Default)]
pub struct LostFixLatch {
    consecutive_violations: u32,
}

impl LostFixLatch {
    pub fn observe(&mut self, check: FixationCheck) -> bool {
        match check {
            FixationCheck::Violated => {
                self.consecutive_violations += 1;
                self.consecutive_violations >= 2
            }
            _ => {
                self.consecutive_violations = 0;
                false
            }
        }
    }
}

/// Outcome of a select-by-fix variant at the moment a saccade lands or a
/// segment ends (§4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    Fix1,
    Fix2,
}

/// Chooses the closer of two fixation targets by squared distance,
/// breaking ties toward Fix1 (§4.6 select-by-fix: "the target closer in
/// squared distance is selected").
pub fn select_closer(eye: EyePoint, fix1: EyePoint, fix2: EyePoint) -> Selection {
    let d1 = sq_dist(eye, fix1);
    let d2 = sq_dist(eye, fix2);
    if d2 < d1 {
        Selection::Fix2
    } else {
        Selection::Fix1
    }
}

fn sq_dist(a: EyePoint, b: EyePoint) -> f64 {
    let dh = (a.h - b.h) as f64;
    let dv = (a.v - b.v) as f64;
    dh * dh + dv * dv
}

/// R/P-distro response scalar accumulator (§4.6).
#[derive(Debug, Default)]
pub struct RpDistroAccumulator {
    sum: f64,
    n: u64,
}

impl RpDistroAccumulator {
    pub fn observe(&mut self, value: f64) {
        self.sum += value;
        self.n += 1;
    }

    pub fn mean(&self) -> f64 {
        if self.n == 0 {
            0.0
        } else {
            self.sum / self.n as f64
        }
    }

    pub fn in_any_window(&self, windows: &[(f64, f64)]) -> bool {
        let m = self.mean();
        windows.iter().any(|&(lo, hi)| m >= lo && m <= hi)
    }
}

/// Search-task dwell counter (§4.6): ends the task once the eye stays in
/// a target's box for `required_ticks` consecutive ticks.
#[derive(Debug, Default)]
pub struct SearchDwell {
    current_target: Option<usize>,
    consecutive_ticks: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchOutcome {
    StillSearching,
    Selected(usize),
    ExitedBounds,
}

impl SearchDwell {
    pub fn observe(
        &mut self,
        eye: EyePoint,
        targets: &[(usize, EyePoint, FixAccuracyBox)],
        search_bounds_h: f64,
        search_bounds_v: f64,
        required_ticks: u32,
    ) -> SearchOutcome {
        if (eye.h as f64).abs() > search_bounds_h || (eye.v as f64).abs() > search_bounds_v {
            return SearchOutcome::ExitedBounds;
        }

        let hit = targets.iter().find(|(_, pos, box_)| within_tolerance(eye, *pos, *box_));
        match hit {
            Some((idx, _, _)) => {
                if self.current_target == Some(*idx) {
                    self.consecutive_ticks += 1;
                } else {
                    self.current_target = Some(*idx);
                    self.consecutive_ticks = 1;
                }
                if self.consecutive_ticks >= required_ticks {
                    SearchOutcome::Selected(*idx)
                } else {
                    SearchOutcome::StillSearching
                }
            }
            None => {
                self.current_target = None;
                self.consecutive_ticks = 0;
                SearchOutcome::StillSearching
            }
        }
    }
}

/// switch-fix's per-tick fixation check (§4.6): satisfied while the eye is
/// in either designated target's box, for the special segment and every
/// later segment.
pub fn switch_fix_check(eye: EyePoint, fix1: Option<EyePoint>, fix2: Option<EyePoint>, box_: FixAccuracyBox) -> FixationCheck {
    if fix1.is_none() && fix2.is_none() {
        return FixationCheck::Disabled;
    }
    let ok = [fix1, fix2].into_iter().flatten().any(|p| within_tolerance(eye, p, box_));
    if ok {
        FixationCheck::Ok
    } else {
        FixationCheck::Violated
    }
}

/// select-duration-by-fix's tick adjustment (§4.6): the GUI authors codes
/// assuming Fix1's selection (the max duration); choosing Fix1 instead
/// shortens the trial by `max - min` ticks from this point on.
pub fn select_duration_delta(selected: Selection, min_ticks: u32, max_ticks: u32) -> u64 {
    match selected {
        Selection::Fix1 => max_ticks.saturating_sub(min_ticks) as u64,
        Selection::Fix2 => 0,
    }
}

/// Whether normal per-tick fixation checking should run given the active
/// special op and segment role (§4.6: several special ops disable it for
/// the entire special segment).
pub fn normal_check_disabled(op: SpecialOp, in_special_segment: bool) -> bool {
    if !in_special_segment {
        return false;
    }
    matches!(
        op,
        SpecialOp::SelectByFix
            | SpecialOp::SelectByFix2
            | SpecialOp::SelectDurationByFix
            | SpecialOp::ChooseFix1
            | SpecialOp::ChooseFix2
            | SpecialOp::Search
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn within_tolerance_accepts_eye_inside_box() {
        let box_ = FixAccuracyBox { h_deg: 1.0, v_deg: 1.0 };
        assert!(within_tolerance(EyePoint { h: 0.5, v: -0.5 }, EyePoint::default(), box_));
        assert!(!within_tolerance(EyePoint { h: 2.0, v: 0.0 }, EyePoint::default(), box_));
    }

    #[test]
    fn two_consecutive_violations_signal_lost_fixation() {
        let mut latch = LostFixLatch::default();
        assert!(!latch.observe(FixationCheck::Violated));
        assert!(latch.observe(FixationCheck::Violated));
    }

    #[test]
    fn single_violation_then_ok_does_not_lose_fixation() {
        let mut latch = LostFixLatch::default();
        assert!(!latch.observe(FixationCheck::Violated));
        assert!(!latch.observe(FixationCheck::Ok));
    }

    #[test]
    fn select_closer_picks_nearer_target() {
        let eye = EyePoint { h: 0.1, v: 0.0 };
        let fix1 = EyePoint { h: 0.0, v: 0.0 };
        let fix2 = EyePoint { h: 5.0, v: 0.0 };
        assert_eq!(select_closer(eye, fix1, fix2), Selection::Fix1);
    }

    #[test]
    fn search_dwell_selects_after_required_ticks() {
        let mut dwell = SearchDwell::default();
        let targets = vec![(0usize, EyePoint { h: 0.0, v: 0.0 }, FixAccuracyBox { h_deg: 1.0, v_deg: 1.0 })];
        let eye = EyePoint { h: 0.0, v: 0.0 };
        assert_eq!(dwell.observe(eye, &targets, 10.0, 10.0, 3), SearchOutcome::StillSearching);
        assert_eq!(dwell.observe(eye, &targets, 10.0, 10.0, 3), SearchOutcome::StillSearching);
        assert_eq!(dwell.observe(eye, &targets, 10.0, 10.0, 3), SearchOutcome::Selected(0));
    }

    #[test]
    fn search_dwell_exits_when_eye_leaves_bounds() {
        let mut dwell = SearchDwell::default();
        let targets: Vec<(usize, EyePoint, FixAccuracyBox)> = vec![];
        let eye = EyePoint { h: 20.0, v: 0.0 };
        assert_eq!(dwell.observe(eye, &targets, 10.0, 10.0, 3), SearchOutcome::ExitedBounds);
    }

    #[test]
    fn switch_fix_check_accepts_either_box() {
        let box_ = FixAccuracyBox { h_deg: 1.0, v_deg: 1.0 };
        let fix1 = EyePoint { h: 0.0, v: 0.0 };
        let fix2 = EyePoint { h: 10.0, v: 0.0 };
        assert_eq!(switch_fix_check(EyePoint { h: 0.2, v: 0.0 }, Some(fix1), Some(fix2), box_), FixationCheck::Ok);
        assert_eq!(switch_fix_check(EyePoint { h: 10.2, v: 0.0 }, Some(fix1), Some(fix2), box_), FixationCheck::Ok);
        assert_eq!(switch_fix_check(EyePoint { h: 5.0, v: 0.0 }, Some(fix1), Some(fix2), box_), FixationCheck::Violated);
    }

    #[test]
    fn switch_fix_check_disabled_with_no_targets() {
        let box_ = FixAccuracyBox { h_deg: 1.0, v_deg: 1.0 };
        assert_eq!(switch_fix_check(EyePoint::default(), None, None, box_), FixationCheck::Disabled);
    }

    #[test]
    fn select_duration_delta_only_shortens_on_fix1() {
        assert_eq!(select_duration_delta(Selection::Fix2, 40, 90), 0);
        assert_eq!(select_duration_delta(Selection::Fix1, 40, 90), 50);
    }
}
