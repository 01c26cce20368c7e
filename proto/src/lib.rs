//! # proto
//!
//! Shared wire and record types for the Maestro runtime engine.
//!
//! These types are used by:
//! - `engine`: the real-time runtime that produces and consumes them
//! - `devsim`: the device/display simulator that drives the engine's
//!   external interfaces for testing and demos
//!
//! ## Coordinate conventions
//!
//! - Window/pattern positions are in 1/100 degree fixed-point, matching the
//!   trial-code wire scale (§3, §4.3 of the design).
//! - Eye samples are raw AI units on the horizontal/vertical channels; the
//!   fixation engine converts to degrees using the per-session calibration
//!   it already holds, never this crate.
//!
//! ## Invariants
//! - Record sizes in `records` are fixed at compile time; the header's byte
//!   counters must equal the exact sum of bytes emitted across them.
//! - Mailbox commands are polled once per tick; payloads never alias engine
//!   state across the mailbox boundary (always copied, never borrowed).

pub mod display;
pub mod error;
pub mod eyelink;
pub mod mailbox;
pub mod records;
pub mod trialcodes;
