//! # recording
//!
//! Recorded-data stream writer (§4.7, C8): delta-compression of analog
//! scans, event interval/mask record packing, and a background
//! file-writer thread draining a bounded SPSC queue.

pub mod delta;
pub mod writer;

pub use writer::{RecordingWriter, WriterHandle};
