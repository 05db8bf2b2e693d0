//! Child-side execution loop.
//!
//! Runs entirely inside the worker process on a single logical thread:
//! receive exactly one task payload, resolve it, drive it, and push every
//! produced value back over the channel. Status queries are answered
//! opportunistically between yields and never consume or reorder a
//! pending value.

use std::os::unix::net::UnixListener;
use std::path::Path;

use spindle_core::channel::Channel;
use spindle_core::codec;
use spindle_core::error::{Error, RemoteError, Result};
use spindle_core::protocol::{Message, StatusReport};

use crate::registry::{ResolvedTask, TaskBody, TaskRegistry};

/// Environment variable carrying the socket path in re-exec mode.
pub const WORKER_SOCKET_ENV: &str = "SPINDLE_WORKER_SOCKET";

/// Exit code for a clean stream end.
pub const EXIT_OK: i32 = 0;
/// Exit code when the task itself failed (a stream error was sent).
pub const EXIT_TASK_FAILED: i32 = 2;
/// Exit code when the protocol broke down and no stream error could be
/// delivered.
pub const EXIT_PROTOCOL_FAILED: i32 = 3;

/// Serve as a worker if this process was re-executed as one.
///
/// Binaries that want the in-process re-exec spawn mode call this first
/// thing in `main`; `Some(code)` means the process ran as a worker and
/// should exit with `code`.
pub fn worker_entry_if_requested(registry: &TaskRegistry) -> Option<i32> {
    let socket = std::env::var_os(WORKER_SOCKET_ENV)?;
    let code = match run_worker(Path::new(&socket), registry) {
        Ok(code) => code,
        Err(err) => {
            tracing::error!(%err, "worker loop failed");
            EXIT_PROTOCOL_FAILED
        }
    };
    Some(code)
}

/// Bind the worker socket, accept the parent, and serve one task.
///
/// Returns the exit code the process should terminate with. Channel or
/// codec breakdowns return an error instead: at that point the parent can
/// no longer be told anything, so the process must die loudly rather than
/// limp along.
pub fn run_worker(socket_path: &Path, registry: &TaskRegistry) -> Result<i32> {
    guard_against_orphaning();
    let listener = UnixListener::bind(socket_path).map_err(|e| {
        Error::Channel(format!(
            "unable to bind worker socket {}: {e}",
            socket_path.display()
        ))
    })?;
    let (stream, _addr) = listener
        .accept()
        .map_err(|e| Error::Channel(format!("accept on worker socket failed: {e}")))?;
    let mut channel = Channel::new(stream);
    serve(&mut channel, registry)
}

/// Ask the kernel to kill this process if the parent dies, so orphaned
/// workers do not linger.
fn guard_against_orphaning() {
    #[cfg(target_os = "linux")]
    unsafe {
        libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGKILL);
    }
}

/// Drive one task over an established channel.
///
/// Exposed separately from [`run_worker`] so the loop can be exercised
/// over any connected stream.
pub fn serve(channel: &mut Channel, registry: &TaskRegistry) -> Result<i32> {
    let descriptor = match channel.receive()? {
        Message::TaskPayload(descriptor) => descriptor,
        other => {
            return Err(Error::Channel(format!(
                "expected a task payload as the first message, got {other:?}"
            )))
        }
    };

    let task = match registry.resolve(&descriptor) {
        Ok(task) => task,
        Err(err) => {
            // The parent needs the failure as data before this process dies.
            send_failure(channel, &RemoteError::new(err.to_string()))?;
            return Ok(EXIT_TASK_FAILED);
        }
    };

    let ResolvedTask { name, body, bindings } = task;
    tracing::debug!(task = %name, "worker task resolved");
    let mut yields_sent: u64 = 0;

    match body {
        TaskBody::Function(f) => {
            answer_status_queries(channel, &name, yields_sent)?;
            match f(&bindings) {
                Ok(value) => {
                    if !send_yield(channel, &value, &mut yields_sent)? {
                        return Ok(EXIT_TASK_FAILED);
                    }
                    channel.send(&Message::StreamEnd)?;
                    Ok(EXIT_OK)
                }
                Err(remote) => {
                    send_failure(channel, &remote)?;
                    Ok(EXIT_TASK_FAILED)
                }
            }
        }
        TaskBody::Generator(g) => {
            let mut produced = g(&bindings);
            loop {
                answer_status_queries(channel, &name, yields_sent)?;
                match produced.next() {
                    Some(Ok(value)) => {
                        if !send_yield(channel, &value, &mut yields_sent)? {
                            return Ok(EXIT_TASK_FAILED);
                        }
                    }
                    Some(Err(remote)) => {
                        send_failure(channel, &remote)?;
                        return Ok(EXIT_TASK_FAILED);
                    }
                    None => {
                        channel.send(&Message::StreamEnd)?;
                        return Ok(EXIT_OK);
                    }
                }
            }
        }
    }
}

/// Encode and send one yielded value.
///
/// A value that fails to encode is a task failure, not a protocol failure:
/// the parent gets a stream error and `false` comes back so the caller can
/// exit with the task-failed code.
fn send_yield(channel: &mut Channel, value: &spindle_core::Value, yields_sent: &mut u64) -> Result<bool> {
    match codec::encode_value(value) {
        Ok(bytes) => {
            channel.send(&Message::YieldValue(bytes))?;
            *yields_sent += 1;
            Ok(true)
        }
        Err(err) => {
            send_failure(
                channel,
                &RemoteError::new(format!("failed to encode yielded value: {err}")),
            )?;
            Ok(false)
        }
    }
}

fn send_failure(channel: &mut Channel, error: &RemoteError) -> Result<()> {
    let bytes = codec::encode_remote_error(error)?;
    channel.send(&Message::StreamError(bytes))
}

/// Answer any status queries queued by the parent.
///
/// Non-blocking: replies slot in between yields without ever delaying or
/// reordering one.
fn answer_status_queries(channel: &mut Channel, task: &str, yields_sent: u64) -> Result<()> {
    while let Some(message) = channel.try_receive()? {
        match message {
            Message::StatusQuery => channel.send(&Message::StatusReply(StatusReport {
                task: task.to_string(),
                yields_sent,
            }))?,
            other => tracing::warn!(?other, "worker ignoring unexpected message"),
        }
    }
    Ok(())
}
