//! Controller subsystem: the single owner of the broker session
//!
//! 1. [`engine`] - Typestate engine running the session event loop
//! 2. [`controller_handle`] - Cloneable API for the UI and lifecycle management
//!
//! # Architecture
//!
//! ```text
//! UI ──► ControllerHandle ──► ControllerEngine ──► Session ──► Broker
//!   ◄── watch<SessionState>, watch<i64> ◄──┘
//! ```

pub mod controller_handle;
pub mod engine;

pub use controller_handle::{ControllerError, ControllerHandle, ControllerSettings};
