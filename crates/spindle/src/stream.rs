//! Parent-side iterator adapter.
//!
//! Presents the worker's message stream as a lazy, pull-driven sequence of
//! decoded values. Single-pass and never restartable: one worker, one
//! consumption of its output.

use std::sync::TryLockError;

use spindle_core::codec;
use spindle_core::error::{Error, Result};
use spindle_core::protocol::Message;
use spindle_core::value::Value;

use crate::manager::{WorkerHandle, WorkerState};

/// Iterator over the values one worker yields.
///
/// Each pull blocks until the worker produces a value, completes, or
/// fails. Terminal messages update the handle's state; after one, the
/// iterator is fused. A pull that races another consumer of the same
/// handle fails fast with [`Error::ConcurrentAccess`] instead of touching
/// the framing.
pub struct WorkerIter<'a> {
    handle: &'a WorkerHandle,
    done: bool,
}

impl<'a> WorkerIter<'a> {
    pub(crate) fn new(handle: &'a WorkerHandle) -> Self {
        Self { handle, done: false }
    }

    /// Snapshot of the worker's state, without pulling a value.
    pub fn status(&self) -> WorkerState {
        self.handle.status()
    }
}

impl Iterator for WorkerIter<'_> {
    type Item = Result<Value>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let mut link = match self.handle.link.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::WouldBlock) => return Some(Err(Error::ConcurrentAccess)),
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
        };
        loop {
            let message = match link.next_message() {
                Ok(message) => message,
                Err(err) => {
                    self.done = true;
                    return Some(Err(err));
                }
            };
            match message {
                Message::YieldValue(bytes) => match codec::decode_value(&bytes) {
                    Ok(value) => return Some(Ok(value)),
                    Err(err) => {
                        // A framing-level decode failure cannot be resumed
                        // safely; end the iteration here.
                        self.done = true;
                        return Some(Err(err));
                    }
                },
                Message::StreamEnd | Message::StreamError(_) => {
                    self.done = true;
                    self.handle.note_terminal(&message);
                    return match message {
                        Message::StreamError(bytes) => {
                            let remote = codec::decode_remote_error(&bytes).unwrap_or_else(|_| {
                                spindle_core::RemoteError::new(
                                    "malformed error payload from worker",
                                )
                            });
                            Some(Err(Error::Remote(remote)))
                        }
                        _ => None,
                    };
                }
                // A reply to a status query that timed out earlier; skip it.
                Message::StatusReply(_) => continue,
                other => {
                    self.done = true;
                    return Some(Err(Error::Channel(format!(
                        "unexpected message from worker: {other:?}"
                    ))));
                }
            }
        }
    }
}

impl<'a> IntoIterator for &'a WorkerHandle {
    type Item = Result<Value>;
    type IntoIter = WorkerIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
