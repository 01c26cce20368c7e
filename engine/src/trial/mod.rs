//! # trial
//!
//! Trial-scope runtime: the code interpreter (C4), trajectory engine
//! (C5), display-frame pipeline (C6), and fixation/special-op engine
//! (C7), plus the per-trial state machine that sequences them (§4.3
//! "State machine (per trial)").

pub mod display_pipeline;
pub mod fixation;
pub mod interpreter;
pub mod trajectory;

use proto::records::result_flags;

/// Terminal state of a trial's RUN phase (§4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrialOutcome {
    Completed,
    LostFix,
    AbortedByUser,
    Error,
    DupFrame,
    EyelinkError,
}

impl TrialOutcome {
    pub fn result_flag_bits(self) -> u32 {
        match self {
            TrialOutcome::Completed => result_flags::DONE,
            TrialOutcome::LostFix => result_flags::DONE | result_flags::LOSTFIX,
            TrialOutcome::AbortedByUser => result_flags::DONE | result_flags::ABORTED,
            TrialOutcome::Error => result_flags::DONE | result_flags::ERROR,
            TrialOutcome::DupFrame => result_flags::DONE | result_flags::DUP_FRAME,
            TrialOutcome::EyelinkError => result_flags::DONE | result_flags::EYELINK_ERROR,
        }
    }

    /// §7: reward and data-file retention both require `Completed`.
    pub fn retains_data_and_reward(self) -> bool {
        matches!(self, TrialOutcome::Completed)
    }
}
