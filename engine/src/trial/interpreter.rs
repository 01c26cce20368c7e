//! Trial-code interpreter (§4.3, C4): a per-tick VM that consumes the
//! ordered code stream authored for a trial and materializes segments.
//!
//! Grounded on the teacher's `procedure_engine.rs` tick-dispatch shape
//! (`tick()` draining work due at the current time, returning a small
//! result enum) combined with `uwb_hub.rs::process_packet()`'s match-on-
//! code-number dispatch — the pack's closest analogue to "table-driven
//! dispatch on a numeric opcode" (the teacher never defines a trait for
//! this, so `TrialCode::arity()` plus a plain `match` is the idiomatic
//! fit here, not a handler-registry).

use crate::data_model::{Segment, SegmentTarget, S_MAX, T_MAX};
use crate::error::EngineError;
use proto::trialcodes::{scale, CodePair, RpDistroResponseKind, SpecialOp, TrialCode};

#[derive(Debug, Clone, Copy, Default)]
pub struct PerturbationInstall {
    pub target: usize,
    pub amplitude: f64,
    pub period_ticks: u32,
    pub phase_ticks: u32,
    pub applies_to_pattern: bool,
}

#[derive(Debug, Default)]
pub struct RewardSettings {
    pub reward_len_ms: [u16; 2],
    pub mid_trial_reward_interval_ticks: i32,
}

#[derive(Debug, Default)]
pub struct TrialAuthoredState {
    pub segments: Vec<Segment>,
    pub special_segment: Option<usize>,
    pub special_op: SpecialOp,
    pub saccade_threshold: f64,
    pub rp_distro_kind: RpDistroResponseKind,
    pub seg_dur_min_ticks: u32,
    pub seg_dur_max_ticks: u32,
    pub reward_windows: Vec<(f64, f64)>,
    pub perturbations: Vec<PerturbationInstall>,
    pub reward: RewardSettings,
    pub n_targets: usize,
}

/// Interprets the full `(code, time)` stream for a trial ahead of time
/// (§4.3 "Contract"): groups codes by segment-entry tick, applies each
/// code in order, and returns the fully materialized segment list, or a
/// `Protocol` error on any malformed stream.
pub fn interpret(codes: &[CodePair], n_targets: usize) -> Result<TrialAuthoredState, EngineError> {
    if n_targets > T_MAX {
        return Err(EngineError::Protocol(format!("target count {n_targets} exceeds T_MAX {T_MAX}")));
    }

    let mut state = TrialAuthoredState { n_targets, ..Default::default() };
    let mut segments: Vec<Segment> = vec![Segment::first(n_targets)];

    let mut i = 0usize;
    let mut saw_end = false;
    while i < codes.len() {
        let pair = codes[i];
        let code_lo = (pair.code & 0x00FF) as u16;
        let code = match TrialCode::from_u16(code_lo) {
            Some(c) => c,
            None => {
                return Err(EngineError::Protocol(format!("unrecognized code {}", pair.code)));
            }
        };
        let arity = code.arity();
        if i + arity > codes.len() {
            return Err(EngineError::Protocol(format!("truncated code group at index {i}")));
        }
        let group = &codes[i..i + arity];

        match code {
            TrialCode::StartTrial => {}
            TrialCode::EndTrial => {
                saw_end = true;
            }
            TrialCode::FixAccuracy => {
                apply_fix_accuracy(segments.last_mut().unwrap(), group);
            }
            _ if is_segment_entry_code(code) => {
                let start_tick = ms_to_ticks(pair.time_ms, segments.last().unwrap().start_tick);
                let needs_new_segment = segments.last().unwrap().start_tick != start_tick
                    || segments.len() == 1 && segments[0].start_tick == 0 && i == 0;
                if needs_new_segment && !(segments.len() == 1 && i == 0) {
                    if segments.len() >= S_MAX {
                        return Err(EngineError::Protocol(format!("segment count exceeds S_MAX {S_MAX}")));
                    }
                    let prev = segments.last().unwrap().clone_for_next(start_tick, n_targets);
                    segments.push(prev);
                }
                let seg_index = segments.len() - 1;
                apply_segment_code(segments.last_mut().unwrap(), &mut state, code, group, &pair, seg_index)?;
            }
            _ => {
                return Err(EngineError::Protocol(format!("code {:?} not valid outside segment entry", code)));
            }
        }

        i += arity;
    }

    if !saw_end {
        return Err(EngineError::Protocol("code stream missing ENDTRIAL".to_string()));
    }
    if segments.len() > S_MAX {
        return Err(EngineError::Protocol(format!("segment count exceeds S_MAX {S_MAX}")));
    }

    state.segments = segments;
    Ok(state)
}

fn is_segment_entry_code(code: TrialCode) -> bool {
    !matches!(code, TrialCode::StartTrial | TrialCode::EndTrial | TrialCode::FixAccuracy)
}

fn ms_to_ticks(time_ms: u32, fallback: u64) -> u64 {
    if time_ms == 0 {
        fallback
    } else {
        time_ms as u64
    }
}

fn apply_fix_accuracy(seg: &mut Segment, group: &[CodePair]) {
    // FIXACCURACY may recur mid-segment to introduce a grace period
    // (§9 Open Question): applied as soon as seen, before the tick's
    // fixation check (see engine::trial::fixation).
    if let Some(p) = group.first() {
        seg.fix_accuracy.h_deg = (p.time_ms as f32) / scale::POS as f32;
    }
}

/// Reads a target-scoped parameter pair (§4.3: "target index, scaled
/// velocity, acceleration"): the target index rides in the pair's `code`
/// field, the scaled value in its `time_ms`, mirroring how `SpecialOp`
/// packs its own parameter pair.
fn target_param(group: &[CodePair]) -> (usize, u32) {
    match group.get(1) {
        Some(p) => (p.code as usize, p.time_ms),
        None => (0, 0),
    }
}

fn apply_segment_code(
    seg: &mut Segment,
    state: &mut TrialAuthoredState,
    code: TrialCode,
    group: &[CodePair],
    head: &CodePair,
    seg_index: usize,
) -> Result<(), EngineError> {
    match code {
        TrialCode::TargetOnOff => {
            let idx = head.time_ms as usize % T_MAX.max(1);
            if let Some(t) = seg.targets.get_mut(idx) {
                t.on = !t.on;
            }
        }
        TrialCode::TargetPosRel | TrialCode::TargetPosAbs => {
            let (idx, raw) = target_param(group);
            if let Some(t) = seg.targets.get_mut(idx) {
                t.pos_is_relative = matches!(code, TrialCode::TargetPosRel);
                t.pos_change_h = raw as f64 / scale::POS;
            }
        }
        TrialCode::TargetVel | TrialCode::TargetVelSlow => {
            let divisor = if matches!(code, TrialCode::TargetVelSlow) { scale::VEL_SLOW } else { scale::VEL_STD };
            let (idx, raw) = target_param(group);
            if let Some(t) = seg.targets.get_mut(idx) {
                t.vel_h = raw as f64 / divisor;
            }
        }
        TrialCode::TargetAcc | TrialCode::TargetAccSlow => {
            let divisor = if matches!(code, TrialCode::TargetAccSlow) { scale::ACC_SLOW } else { scale::ACC_STD };
            let (idx, raw) = target_param(group);
            if let Some(t) = seg.targets.get_mut(idx) {
                t.acc_h = raw as f64 / divisor;
            }
        }
        TrialCode::PatternVel | TrialCode::PatternVelSlow => {
            let divisor = if matches!(code, TrialCode::PatternVelSlow) { scale::VEL_SLOW } else { scale::VEL_STD };
            let (idx, raw) = target_param(group);
            if let Some(t) = seg.targets.get_mut(idx) {
                t.pattern_vel_h = raw as f64 / divisor;
            }
        }
        TrialCode::PatternAcc | TrialCode::PatternAccSlow => {
            let divisor = if matches!(code, TrialCode::PatternAccSlow) { scale::ACC_SLOW } else { scale::ACC_STD };
            let (idx, raw) = target_param(group);
            if let Some(t) = seg.targets.get_mut(idx) {
                t.pattern_acc_h = raw as f64 / divisor;
            }
        }
        TrialCode::Perturb => {
            if group.len() == 5 {
                state.perturbations.push(PerturbationInstall {
                    target: group[1].time_ms as usize,
                    amplitude: group[2].time_ms as f64 / scale::VEL_STD,
                    period_ticks: group[3].time_ms,
                    phase_ticks: group[4].time_ms,
                    applies_to_pattern: false,
                });
            }
        }
        TrialCode::RewardLen => {
            // A zero length is a valid "withhold" marker (§4.3, §8).
            state.reward.reward_len_ms[0] = head.time_ms as u16;
        }
        TrialCode::MidTrialReward => {
            seg.mid_trial_reward = true;
            state.reward.mid_trial_reward_interval_ticks = head.time_ms as i32;
        }
        TrialCode::SpecialOp => {
            // The head pair's `time_ms` is the real segment-entry tick, same
            // as every other segment-entry code; the op id and saccade
            // threshold ride in the second pair's `time_ms` as packed bytes.
            let payload = group.get(1).map(|p| p.time_ms).unwrap_or(0);
            let op_byte = (payload & 0xFF) as u8;
            let extra_byte = ((payload >> 8) & 0xFF) as u8;
            state.special_op = SpecialOp::from_u8(op_byte);
            state.saccade_threshold = extra_byte as f64;
            if state.special_op == SpecialOp::RpDistro {
                state.rp_distro_kind = RpDistroResponseKind::from_u8(extra_byte);
            }
            state.special_segment = Some(seg_index);
        }
        TrialCode::SegDurs => {
            state.seg_dur_min_ticks = group.get(1).map(|p| p.time_ms).unwrap_or(0);
            state.seg_dur_max_ticks = group.get(2).map(|p| p.time_ms).unwrap_or(state.seg_dur_min_ticks);
        }
        TrialCode::RpdWindow => {
            if group.len() >= 3 {
                let lo = group[1].time_ms as f64 / scale::VEL_STD;
                let hi = group[2].time_ms as f64 / scale::VEL_STD;
                state.reward_windows.push((lo, hi));
            }
        }
        TrialCode::FailSafe => {}
        TrialCode::CheckResponOn => {
            seg.check_respon = true;
        }
        TrialCode::CheckResponOff => {
            seg.check_respon = false;
        }
        TrialCode::AdcOn => {}
        TrialCode::PulseOn => {
            seg.marker_channel = Some(head.time_ms as u16);
        }
        TrialCode::VStab => {
            let idx = (head.time_ms as usize) % T_MAX.max(1);
            if let Some(t) = seg.targets.get_mut(idx) {
                t.vstab.on = true;
                t.vstab.h_component = true;
                t.vstab.v_component = true;
            }
        }
        TrialCode::StartTrial | TrialCode::EndTrial | TrialCode::FixAccuracy => unreachable!(),
    }
    Ok(())
}

impl Segment {
    fn clone_for_next(&self, start_tick: u64, n_targets: usize) -> Segment {
        Segment::inherit_from(self, start_tick, n_targets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(code: u16, time_ms: u32) -> CodePair {
        CodePair { code, time_ms }
    }

    #[test]
    fn well_formed_single_segment_trial_interprets() {
        let codes = vec![
            pair(TrialCode::StartTrial as u16, 0),
            pair(TrialCode::FixAccuracy as u16, 0),
            pair(TrialCode::EndTrial as u16, 100),
        ];
        let result = interpret(&codes, 1).unwrap();
        assert_eq!(result.segments.len(), 1);
    }

    #[test]
    fn unrecognized_code_aborts_with_protocol_error() {
        let codes = vec![
            pair(TrialCode::StartTrial as u16, 0),
            pair(0x7FFF, 10),
            pair(TrialCode::EndTrial as u16, 11),
        ];
        let err = interpret(&codes, 1).unwrap_err();
        assert!(matches!(err, EngineError::Protocol(_)));
    }

    #[test]
    fn missing_endtrial_is_a_protocol_error() {
        let codes = vec![pair(TrialCode::StartTrial as u16, 0)];
        let err = interpret(&codes, 1).unwrap_err();
        assert!(matches!(err, EngineError::Protocol(_)));
    }

    #[test]
    fn special_op_code_installs_saccade_threshold() {
        let code = TrialCode::SpecialOp as u16;
        let op_and_extra = (SpecialOp::SkipOnSaccade as u32) | (15u32 << 8);
        let codes = vec![
            pair(TrialCode::StartTrial as u16, 0),
            pair(code, 0),
            pair(0, op_and_extra),
            pair(TrialCode::EndTrial as u16, 10),
        ];
        let result = interpret(&codes, 1).unwrap();
        assert_eq!(result.special_op, SpecialOp::SkipOnSaccade);
        assert_eq!(result.saccade_threshold, 15.0);
        assert_eq!(result.special_segment, Some(0));
    }

    #[test]
    fn special_op_tags_the_segment_it_was_authored_in() {
        let code = TrialCode::SpecialOp as u16;
        let op_and_extra = SpecialOp::SelectByFix as u32;
        let codes = vec![
            pair(TrialCode::StartTrial as u16, 0),
            pair(TrialCode::TargetOnOff as u16, 50),
            pair(code, 50),
            pair(0, op_and_extra),
            pair(TrialCode::EndTrial as u16, 100),
        ];
        let result = interpret(&codes, 1).unwrap();
        assert_eq!(result.segments.len(), 2);
        assert_eq!(result.special_segment, Some(1));
    }

    #[test]
    fn seg_durs_reads_distinct_min_and_max_ticks() {
        let codes = vec![
            pair(TrialCode::StartTrial as u16, 0),
            pair(TrialCode::SegDurs as u16, 0),
            pair(0, 40),
            pair(0, 90),
            pair(TrialCode::EndTrial as u16, 10),
        ];
        let result = interpret(&codes, 1).unwrap();
        assert_eq!(result.seg_dur_min_ticks, 40);
        assert_eq!(result.seg_dur_max_ticks, 90);
    }

    #[test]
    fn target_velocity_code_addresses_a_non_zero_target_without_moving_the_segment() {
        let codes = vec![
            pair(TrialCode::StartTrial as u16, 0),
            pair(TrialCode::TargetVel as u16, 20),
            pair(2, 50),
            pair(TrialCode::EndTrial as u16, 100),
        ];
        let result = interpret(&codes, 3).unwrap();
        assert_eq!(result.segments.len(), 2);
        assert_eq!(result.segments[1].start_tick, 20);
        assert_eq!(result.segments[1].targets[2].vel_h, 50.0 / scale::VEL_STD);
        assert_eq!(result.segments[1].targets[0].vel_h, 0.0);
    }

    #[test]
    fn target_position_code_can_set_each_target_independently_in_one_segment() {
        let codes = vec![
            pair(TrialCode::StartTrial as u16, 0),
            pair(TrialCode::TargetPosAbs as u16, 10),
            pair(0, 100),
            pair(TrialCode::TargetPosAbs as u16, 0),
            pair(1, 200),
            pair(TrialCode::EndTrial as u16, 50),
        ];
        let result = interpret(&codes, 2).unwrap();
        assert_eq!(result.segments.len(), 1);
        let seg = &result.segments[0];
        assert_eq!(seg.targets[0].pos_change_h, 100.0 / scale::POS);
        assert_eq!(seg.targets[1].pos_change_h, 200.0 / scale::POS);
    }
}
