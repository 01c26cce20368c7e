//! # continuous
//!
//! Continuous-mode active-target/stimulus engine (§4.8, C9): its own
//! scan-synchronous loop at a longer scan interval than a trial's,
//! commanding the active-target list and summing per-channel stimulus
//! waveforms into the chair's velocity/position command while running an
//! independent fixation check.

pub mod active_targets;
pub mod stimulus;

pub use active_targets::{ActiveTargetEdit, ActiveTargetError, ActiveTargetList, LockState};
pub use stimulus::{ChannelKind, StimulusChannel, StimulusRun, Waveform};

use proto::eyelink::EyePoint;

use crate::data_model::FixAccuracyBox;
use crate::trial::fixation::{within_tolerance, FixationCheck, LostFixLatch};

/// Independent fixation-check parameters for continuous mode, distinct
/// from a trial's (§4.8: "distinct parameters: check every
/// `fixCheckIntv` ms, grace = a separate constant, fixation OK may
/// require both Fix1 and Fix2 simultaneously when both defined").
#[derive(Debug, Clone, Copy)]
pub struct ContinuousFixationConfig {
    pub check_interval_ms: u32,
    pub grace_ms: u32,
    pub require_both_when_defined: bool,
    pub accuracy: FixAccuracyBox,
}

impl Default for ContinuousFixationConfig {
    fn default() -> Self {
        Self { check_interval_ms: 50, grace_ms: 200, require_both_when_defined: false, accuracy: FixAccuracyBox::default() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContinuousOutcome {
    Running,
    FixationLost,
}

/// Owns the active-target list and stimulus run for one continuous
/// session (§3 "Ownership").
pub struct ContinuousEngine {
    pub active_targets: ActiveTargetList,
    pub stimulus: StimulusRun,
    fix_config: ContinuousFixationConfig,
    lost_latch: LostFixLatch,
    ms_since_check: u32,
    ms_elapsed: u32,
    tick_count: u64,
}

impl ContinuousEngine {
    pub fn new(fix_config: ContinuousFixationConfig) -> Self {
        Self {
            active_targets: ActiveTargetList::new(),
            stimulus: StimulusRun::default(),
            fix_config,
            lost_latch: LostFixLatch::default(),
            ms_since_check: 0,
            ms_elapsed: 0,
            tick_count: 0,
        }
    }

    /// One tick of commanded motion for every active target (§4.8
    /// "invokes the trajectory engine per target per tick for commanded
    /// motion"): targets move along their authored pattern speed/
    /// direction in the window plane.
    fn step_targets(&mut self, dt_s: f64) {
        for t in self.active_targets.targets_mut() {
            if !t.on {
                continue;
            }
            let rad = t.pattern_dir_deg.to_radians();
            t.pos_h += t.pattern_speed * rad.cos() * dt_s;
            t.pos_v += t.pattern_speed * rad.sin() * dt_s;
        }
    }

    /// Sums the active stimulus channels into a chair command for this
    /// tick (§4.8 "Stimulus channels").
    fn evaluate_stimulus(&self, dt_s: f64) -> (f64, f64) {
        self.stimulus.evaluate_chair(self.tick_count, dt_s)
    }

    /// Runs the independent fixation check at its own cadence, skipping
    /// entirely during the grace window after the run starts (§4.8).
    fn check_fixation(&mut self, dt_ms: f64, eye: EyePoint) -> ContinuousOutcome {
        self.ms_elapsed += dt_ms as u32;
        if self.ms_elapsed < self.fix_config.grace_ms {
            return ContinuousOutcome::Running;
        }

        self.ms_since_check += dt_ms as u32;
        if self.ms_since_check < self.fix_config.check_interval_ms {
            return ContinuousOutcome::Running;
        }
        self.ms_since_check = 0;

        let fix1 = self.active_targets.fix1_index().map(|i| self.active_targets.targets()[i]);
        let fix2 = self.active_targets.fix2_index().map(|i| self.active_targets.targets()[i]);

        let check = match (fix1, fix2) {
            (Some(f1), Some(f2)) if self.fix_config.require_both_when_defined => {
                let p1 = EyePoint { h: f1.pos_h as f32, v: f1.pos_v as f32 };
                let p2 = EyePoint { h: f2.pos_h as f32, v: f2.pos_v as f32 };
                if within_tolerance(eye, p1, self.fix_config.accuracy) && within_tolerance(eye, p2, self.fix_config.accuracy) {
                    FixationCheck::Ok
                } else {
                    FixationCheck::Violated
                }
            }
            (Some(f1), _) => {
                let p1 = EyePoint { h: f1.pos_h as f32, v: f1.pos_v as f32 };
                if within_tolerance(eye, p1, self.fix_config.accuracy) {
                    FixationCheck::Ok
                } else {
                    FixationCheck::Violated
                }
            }
            (None, Some(f2)) => {
                let p2 = EyePoint { h: f2.pos_h as f32, v: f2.pos_v as f32 };
                if within_tolerance(eye, p2, self.fix_config.accuracy) {
                    FixationCheck::Ok
                } else {
                    FixationCheck::Violated
                }
            }
            (None, None) => FixationCheck::Disabled,
        };

        if self.lost_latch.observe(check) {
            ContinuousOutcome::FixationLost
        } else {
            ContinuousOutcome::Running
        }
    }

    /// Advances the session by one scan period: commanded target motion,
    /// stimulus-channel summation, and the independent fixation check
    /// (§4.8, §5 ordering guarantee generalized to the continuous loop).
    pub fn tick(&mut self, dt_s: f64, eye: EyePoint) -> (ContinuousOutcome, (f64, f64)) {
        self.step_targets(dt_s);
        let chair_cmd = self.evaluate_stimulus(dt_s);
        let outcome = self.check_fixation(dt_s * 1000.0, eye);
        self.tick_count += 1;
        (outcome, chair_cmd)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_model::ActiveTarget;

    #[test]
    fn target_with_pattern_speed_moves_along_its_direction() {
        let mut engine = ContinuousEngine::new(ContinuousFixationConfig::default());
        engine
            .active_targets
            .replace(vec![ActiveTarget { on: true, pattern_speed: 10.0, pattern_dir_deg: 0.0, ..Default::default() }], LockState::default())
            .unwrap();
        let (_, _) = engine.tick(0.001, EyePoint::default());
        assert!(engine.active_targets.targets()[0].pos_h > 0.0);
    }

    #[test]
    fn fixation_ok_with_no_designated_targets() {
        let mut engine = ContinuousEngine::new(ContinuousFixationConfig { grace_ms: 0, check_interval_ms: 1, ..Default::default() });
        let (outcome, _) = engine.tick(0.01, EyePoint::default());
        assert_eq!(outcome, ContinuousOutcome::Running);
    }

    #[test]
    fn sustained_fixation_violation_reports_lost() {
        let mut engine = ContinuousEngine::new(ContinuousFixationConfig {
            grace_ms: 0,
            check_interval_ms: 1,
            require_both_when_defined: false,
            accuracy: FixAccuracyBox { h_deg: 0.1, v_deg: 0.1 },
        });
        engine
            .active_targets
            .replace(vec![ActiveTarget { on: true, is_fix1: true, pos_h: 5.0, pos_v: 5.0, ..Default::default() }], LockState::default())
            .unwrap();
        let far_eye = EyePoint { h: 0.0, v: 0.0 };
        let _ = engine.tick(0.01, far_eye);
        let (outcome, _) = engine.tick(0.01, far_eye);
        assert_eq!(outcome, ContinuousOutcome::FixationLost);
    }
}
