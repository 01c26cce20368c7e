//! Trial-code wire vocabulary (§4.3).
//!
//! A trial is authored as an ordered stream of `(code, time_ms)` pairs.
//! Most codes are single-pair; a handful are the head of a fixed-arity
//! group where the following pairs carry parameters (target index, scaled
//! velocity, acceleration, ...). `TrialCode::arity()` is what lets the
//! interpreter consume exactly the right number of pairs per code without
//! look-ahead parsing.

use serde::{Deserialize, Serialize};

/// Fixed-point scale factors used throughout the wire format.
pub mod scale {
    /// Standard velocity scale: wire units per deg/s.
    pub const VEL_STD: f64 = 10.0;
    /// Slow velocity scale: wire units per deg/s, for fine motion.
    pub const VEL_SLOW: f64 = 100.0;
    /// Standard acceleration scale: wire units per deg/s^2.
    pub const ACC_STD: f64 = 10.0;
    /// Slow acceleration scale: wire units per deg/s^2.
    pub const ACC_SLOW: f64 = 100.0;
    /// Position scale: wire units per degree (1/100 degree fixed point).
    pub const POS: f64 = 100.0;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u16)]
pub enum TrialCode {
    StartTrial = 1,
    EndTrial = 2,
    FixAccuracy = 3,
    TargetOnOff = 4,
    TargetPosRel = 5,
    TargetPosAbs = 6,
    TargetVel = 7,
    TargetVelSlow = 8,
    TargetAcc = 9,
    TargetAccSlow = 10,
    PatternVel = 11,
    PatternVelSlow = 12,
    PatternAcc = 13,
    PatternAccSlow = 14,
    Perturb = 15,
    RewardLen = 16,
    MidTrialReward = 17,
    SpecialOp = 18,
    SegDurs = 19,
    RpdWindow = 20,
    FailSafe = 21,
    CheckResponOn = 22,
    CheckResponOff = 23,
    AdcOn = 24,
    PulseOn = 25,
    VStab = 26,
}

impl TrialCode {
    pub fn from_u16(v: u16) -> Option<Self> {
        use TrialCode::*;
        Some(match v {
            1 => StartTrial,
            2 => EndTrial,
            3 => FixAccuracy,
            4 => TargetOnOff,
            5 => TargetPosRel,
            6 => TargetPosAbs,
            7 => TargetVel,
            8 => TargetVelSlow,
            9 => TargetAcc,
            10 => TargetAccSlow,
            11 => PatternVel,
            12 => PatternVelSlow,
            13 => PatternAcc,
            14 => PatternAccSlow,
            15 => Perturb,
            16 => RewardLen,
            17 => MidTrialReward,
            18 => SpecialOp,
            19 => SegDurs,
            20 => RpdWindow,
            21 => FailSafe,
            22 => CheckResponOn,
            23 => CheckResponOff,
            24 => AdcOn,
            25 => PulseOn,
            26 => VStab,
            _ => return None,
        })
    }

    /// Number of `(code, time)` pairs this code consumes, including itself.
    /// `Perturb` carries a 5-pair group (§4.3); `SegDurs` and `RpdWindow`
    /// each carry two parameter pairs (min/max, low/high) beyond the
    /// segment-entry head pair; `SpecialOp` carries one (the packed op id
    /// and saccade threshold); the ten per-target trajectory-parameter
    /// codes (`TargetPosRel`/`Abs`, `TargetVel`/`Slow`, `TargetAcc`/`Slow`,
    /// `PatternVel`/`Slow`, `PatternAcc`/`Slow`) each carry one (the target
    /// index in the parameter pair's `code` field, the scaled value in its
    /// `time_ms`), so the value can be authored for any target without
    /// disturbing the head pair's segment-entry tick. The head's own
    /// `time_ms` is always the real segment-entry tick, same as every
    /// other segment-entry code. Everything else authored in this codebase
    /// is a single pair.
    pub fn arity(self) -> usize {
        match self {
            TrialCode::Perturb => 5,
            TrialCode::RpdWindow | TrialCode::SegDurs => 3,
            TrialCode::SpecialOp
            | TrialCode::TargetPosRel
            | TrialCode::TargetPosAbs
            | TrialCode::TargetVel
            | TrialCode::TargetVelSlow
            | TrialCode::TargetAcc
            | TrialCode::TargetAccSlow
            | TrialCode::PatternVel
            | TrialCode::PatternVelSlow
            | TrialCode::PatternAcc
            | TrialCode::PatternAccSlow => 2,
            _ => 1,
        }
    }
}

/// One `(code, time)` pair as authored in a trial's code stream.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CodePair {
    pub code: u16,
    pub time_ms: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum SpecialOp {
    #[default]
    None = 0,
    SkipOnSaccade = 1,
    SelectByFix = 2,
    SelectByFix2 = 3,
    ChooseFix1 = 4,
    ChooseFix2 = 5,
    SwitchFix = 6,
    RpDistro = 7,
    Search = 8,
    SelectDurationByFix = 9,
}

impl SpecialOp {
    pub fn from_u8(v: u8) -> Self {
        use SpecialOp::*;
        match v {
            1 => SkipOnSaccade,
            2 => SelectByFix,
            3 => SelectByFix2,
            4 => ChooseFix1,
            5 => ChooseFix2,
            6 => SwitchFix,
            7 => RpDistro,
            8 => Search,
            9 => SelectDurationByFix,
            _ => None,
        }
    }
}

/// R/P-Distro response scalar, encoded in the upper byte of the
/// `SPECIALOP` code when `special_op == RpDistro` (§4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum RpDistroResponseKind {
    #[default]
    VectorSpeed = 0,
    HVelocity = 1,
    VVelocity = 2,
    Direction = 3,
}

impl RpDistroResponseKind {
    pub fn from_u8(v: u8) -> Self {
        use RpDistroResponseKind::*;
        match v {
            1 => HVelocity,
            2 => VVelocity,
            3 => Direction,
            _ => VectorSpeed,
        }
    }
}
