//! # devices
//!
//! Uniform contracts for the real-time hardware collaborators (§6, C1):
//! analog input, analog output / motion chair, the digital event timer,
//! the remote display, and the eye-tracker feed.
//!
//! Every trait here returns `Result<_, DeviceError>` and is `Send`,
//! matching `hadron-driver-api::block::BlockDevice` — the one trait-based
//! device-contract convention found anywhere in the retrieval pack (the
//! teacher itself always uses concrete structs). Each submodule also
//! provides a `Sim*` implementation used by tests and by `devsim`; a
//! missing or unresponsive real device degrades to logging and returning
//! `DeviceError`, never panicking, matching the teacher's
//! `persistence.rs`/`audit.rs` "never crash on I/O" philosophy.

pub mod ai;
pub mod ao_chair;
pub mod dio;
pub mod eyelink;
pub mod rdisplay;

pub use ai::AiDevice;
pub use ao_chair::ChairDevice;
pub use dio::DioDevice;
pub use eyelink::EyelinkDevice;
pub use rdisplay::RemoteDisplay;
