//! Core building blocks for the spindle worker bridge.
//!
//! This crate provides:
//! - The value vocabulary and codec crossing the process boundary
//! - Task capture (descriptor, kind, bindings)
//! - The framed wire protocol and its message variants
//! - The transport channel over a unix stream
//! - The shared error taxonomy

pub mod channel;
pub mod codec;
pub mod error;
pub mod protocol;
pub mod task;
pub mod value;

pub use channel::Channel;
pub use error::{Error, RemoteError, Result};
pub use protocol::{Message, StatusReport, MAX_FRAME_LEN};
pub use task::{Bindings, TaskDescriptor, TaskKind, TaskSpec};
pub use value::{DType, NdArray, Value};
