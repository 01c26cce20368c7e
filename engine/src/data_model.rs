//! # data_model
//!
//! Per-trial and per-continuous-run data model (§3). Grounded on the
//! teacher's `state.rs`: a flat collection of plain structs, `Default`
//! derived where a zeroed value is meaningful, cross-references expressed
//! as integer indices rather than pointers (§9 design note).

use proto::display::{DisplaySubkind, TargetFlags, TargetKind};

pub const T_MAX: usize = 32;
pub const S_MAX: usize = 30;
pub const A_MAX: usize = 32;

#[derive(Debug, Clone, Copy, Default)]
pub struct VStabFlags {
    pub on: bool,
    pub snap: bool,
    pub h_component: bool,
    pub v_component: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct Target {
    pub kind: TargetKind,
    pub subkind: DisplaySubkind,
    pub flags: TargetFlags,
}

/// Per-target, per-tick trajectory state (§3 "Trajectory record").
#[derive(Debug, Clone, Copy, Default)]
pub struct Trajectory {
    pub p_h: f64,
    pub p_v: f64,
    pub v_h: f64,
    pub v_v: f64,
    pub a_h: f64,
    pub a_v: f64,
    pub vp_h: f64,
    pub vp_v: f64,
    pub ap_h: f64,
    pub ap_v: f64,
    pub on: bool,
    pub vstab: VStabFlags,
    /// Perturbation delta applied to (v_h, v_v) this tick; restored at
    /// tick end so the nominal trajectory integrates cleanly next tick.
    pub perturb_v_h: f64,
    pub perturb_v_v: f64,
    pub perturb_vp_h: f64,
    pub perturb_vp_v: f64,
    /// Not-yet-published window/pattern displacement for the display
    /// pipeline's active frame slot.
    pub pending_win_h: f64,
    pub pending_win_v: f64,
    pub pending_pat_h: f64,
    pub pending_pat_v: f64,
}

/// Per-target, per-segment authored state (§3 "Segment").
#[derive(Debug, Clone, Copy, Default)]
pub struct SegmentTarget {
    pub on: bool,
    pub pos_is_relative: bool,
    pub vstab: VStabFlags,
    pub pos_change_h: f64,
    pub pos_change_v: f64,
    pub vel_h: f64,
    pub vel_v: f64,
    pub acc_h: f64,
    pub acc_v: f64,
    pub pattern_vel_h: f64,
    pub pattern_vel_v: f64,
    pub pattern_acc_h: f64,
    pub pattern_acc_v: f64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FixAccuracyBox {
    pub h_deg: f32,
    pub v_deg: f32,
}

#[derive(Debug, Clone)]
pub struct Segment {
    pub start_tick: u64,
    pub targets: Vec<SegmentTarget>,
    pub fix1: Option<usize>,
    pub fix2: Option<usize>,
    pub fix_accuracy: FixAccuracyBox,
    pub grace_ticks: u32,
    pub marker_channel: Option<u16>,
    pub sync_flash: bool,
    pub check_respon: bool,
    pub respon_correct_ch: u16,
    pub respon_incorrect_ch: u16,
    pub mid_trial_reward: bool,
}

impl Segment {
    /// A new segment inherits the previous segment's per-target flags and
    /// reward/response settings, but position change is always cleared
    /// (§3 invariant: "omitted position codes mean no displacement").
    pub fn inherit_from(prev: &Segment, start_tick: u64, n_targets: usize) -> Self {
        let mut targets = prev.targets.clone();
        targets.resize(n_targets, SegmentTarget::default());
        for t in &mut targets {
            t.pos_change_h = 0.0;
            t.pos_change_v = 0.0;
        }
        Segment {
            start_tick,
            targets,
            fix1: prev.fix1,
            fix2: prev.fix2,
            fix_accuracy: prev.fix_accuracy,
            grace_ticks: prev.grace_ticks,
            marker_channel: None,
            sync_flash: false,
            check_respon: prev.check_respon,
            respon_correct_ch: prev.respon_correct_ch,
            respon_incorrect_ch: prev.respon_incorrect_ch,
            mid_trial_reward: prev.mid_trial_reward,
        }
    }

    pub fn first(n_targets: usize) -> Self {
        Segment {
            start_tick: 0,
            targets: vec![SegmentTarget::default(); n_targets],
            fix1: None,
            fix2: None,
            fix_accuracy: FixAccuracyBox::default(),
            grace_ticks: 0,
            marker_channel: None,
            sync_flash: false,
            check_respon: false,
            respon_correct_ch: 0,
            respon_incorrect_ch: 1,
            mid_trial_reward: false,
        }
    }
}

/// A visually-placable target in continuous mode (§3 "Active target").
#[derive(Debug, Clone, Copy, Default)]
pub struct ActiveTarget {
    pub on: bool,
    pub pos_h: f64,
    pub pos_v: f64,
    pub pattern_speed: f64,
    pub pattern_dir_deg: f64,
    pub is_fix1: bool,
    pub is_fix2: bool,
    pub track_cursor: bool,
}
