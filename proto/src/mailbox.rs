//! IPC mailbox command/ack vocabulary (§6 "IPC mailbox").
//!
//! The mailbox is polled once per tick, outside any time-critical inner
//! section (§5 "Ordering guarantees"). It carries four independent
//! streams in practice — commands in, acks out, status/event telemetry
//! out, and eye-tracker samples out — but all four travel over the same
//! small vocabulary of tagged enums so a single transport (today:
//! `engine::mailbox`'s bounded channel pair; see DESIGN.md) can carry all
//! of them.

use serde::{Deserialize, Serialize};

use crate::display::TargetDef;
use crate::eyelink::EyeSample;
use crate::trialcodes::CodePair;

/// Top-level run mode, mirrored from `engine::mode_controller::Mode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum RunMode {
    Idle = 0,
    Test = 1,
    Trial = 2,
    ContinuousBetween = 3,
    ContinuousActive = 4,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Command {
    Null,
    SwitchMode(RunMode),
    SaveChannels(Vec<u16>),
    SetDisplay(TargetDef),
    FixRewSettings(FixRewSettings),
    TrialStart(TrialStartArgs),
    TrialAbort,
    InitTrace,
    InitEventStream,
    ContinuousFixOn,
    ContinuousFixOff,
    ContinuousUpdateFixTargets { fix1: Option<u16>, fix2: Option<u16> },
    ContinuousUpdateActiveTarget { index: u16, def: TargetDef },
    ContinuousRecOn,
    ContinuousRecOff { save: bool },
    ContinuousRunStart,
    ContinuousRunStop,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct FixRewSettings {
    pub grace_ms: u32,
    pub reward_pulse_len_ms: [u16; 2],
    pub withhold_variable_ratio: u16,
    pub audio_pulse_len_ms: u16,
    pub fix_accuracy_h_deg: f32,
    pub fix_accuracy_v_deg: f32,
    pub play_beep: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrialStartArgs {
    pub protocol_name: String,
    pub set_name: String,
    pub subset_name: String,
    pub file_name: Option<String>,
    /// The authored `(code, time_ms)` stream for `engine::trial::interpreter`
    /// (§4.3 "Input"); the GUI authoring process owns trial-code storage,
    /// the engine only ever sees the stream for the trial about to run.
    pub codes: Vec<CodePair>,
    pub n_targets: u16,
}

/// Reply to any [`Command`]. Unknown commands ack with `Unrecognized`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Ack {
    Ok,
    Unrecognized,
    Error(String),
    /// Reply to `ContinuousRecOff`: whether the file was retained.
    SaveResult { save_ok: bool },
}

/// Status/telemetry pushed from engine to the authoring process once per
/// tick or on state transitions, independent of command/ack traffic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Telemetry {
    ModeChanged(RunMode),
    TrialResult { result_flags: u32 },
    PlotSample { channel: u16, value: f32 },
    EyeSample(EyeSample),
}
