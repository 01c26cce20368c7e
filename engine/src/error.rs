//! Engine-wide error taxonomy (§7).
//!
//! Every component boundary inside the engine speaks this enum. Device
//! drivers themselves return `proto::error::DeviceError`; the call site in
//! the tick loop is what decides which `EngineError` variant a device
//! failure becomes, since the same `DeviceError::LinkDown` means
//! `RuntimeAbort` during a trial but is merely logged during Idle.

use proto::error::DeviceError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("fatal: {0}")]
    Fatal(String),

    #[error("runtime abort: {0}")]
    RuntimeAbort(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("aborted by user")]
    UserAbort,

    #[error("fixation lost")]
    LostFixation,

    #[error("duplicate display frames exceeded tolerance")]
    DuplicateFrame,

    #[error("file I/O error: {0}")]
    FileIo(#[from] std::io::Error),
}

impl EngineError {
    /// Maps a device-layer failure observed mid-trial/mid-run to the
    /// matching engine error. Device errors observed outside a running
    /// session are logged by the caller and do not need this mapping.
    pub fn from_device_error(context: &str, err: DeviceError) -> Self {
        EngineError::RuntimeAbort(format!("{context}: {err}"))
    }

    /// The result-flag bits this error contributes to the trial header
    /// (`proto::records::result_flags`), independent of `DONE` which the
    /// caller always sets on trial exit.
    pub fn result_flag_bits(&self) -> u32 {
        use proto::records::result_flags::*;
        match self {
            EngineError::Fatal(_) => ERROR,
            EngineError::RuntimeAbort(_) => ERROR,
            EngineError::Protocol(_) => ERROR,
            EngineError::UserAbort => ABORTED,
            EngineError::LostFixation => LOSTFIX,
            EngineError::DuplicateFrame => DUP_FRAME,
            EngineError::FileIo(_) => ERROR,
        }
    }
}
