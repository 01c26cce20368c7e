//! Device-layer error codes.
//!
//! Matches the shape of `hadron-driver-api::block::IoError`: a small
//! `Copy` enum with a manual `Display` impl, used at every device
//! trait boundary in `engine::devices`. Device drivers return this; they
//! never panic and never carry an `std::error::Error` chain — the engine
//! converts this into an `EngineError` variant once it decides how a
//! failure should affect the running trial or continuous session.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceError {
    /// Requested channel, sample count, or buffer index is out of range.
    OutOfRange,
    /// The underlying board reported a fault (overrun, bus error, NAK).
    DeviceFault,
    /// A caller-supplied buffer was the wrong size or alignment.
    InvalidBuffer,
    /// The operation did not complete within its allotted deadline.
    Timeout,
    /// The device is not open or not started.
    NotReady,
    /// The network peer (remote display) is unreachable or reset the
    /// connection.
    LinkDown,
}

impl fmt::Display for DeviceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeviceError::OutOfRange => "argument out of range",
            DeviceError::DeviceFault => "device reported a fault",
            DeviceError::InvalidBuffer => "invalid buffer",
            DeviceError::Timeout => "operation timed out",
            DeviceError::NotReady => "device not ready",
            DeviceError::LinkDown => "remote link down",
        };
        write!(f, "{s}")
    }
}
