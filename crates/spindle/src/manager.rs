//! Worker process management.
//!
//! Spawns the child (re-exec of the current binary or an external worker
//! binary), owns its lifecycle, delivers the captured task, and exposes a
//! status/termination surface on the resulting handle.

use std::collections::VecDeque;
use std::io;
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::{Mutex, MutexGuard, TryLockError};
use std::time::{Duration, Instant};

use spindle_core::channel::Channel;
use spindle_core::codec;
use spindle_core::error::{Error, RemoteError, Result};
use spindle_core::protocol::{Message, StatusReport};
use spindle_core::task::TaskDescriptor;

use crate::child::{EXIT_TASK_FAILED, WORKER_SOCKET_ENV};
use crate::stream::WorkerIter;

/// Environment variable pointing at the worker binary, checked first by
/// [`find_worker_binary`].
pub const WORKER_PATH_ENV: &str = "SPINDLE_WORKER_PATH";

/// Default handshake timeout for [`SpawnOptions`].
const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Default deadline for a status query round-trip.
const DEFAULT_STATUS_TIMEOUT: Duration = Duration::from_secs(5);

/// Where the worker's executor capability lives.
#[derive(Debug, Clone)]
pub enum ExecutorLocation {
    /// Relaunch the current executable as the child, selecting worker mode
    /// via [`WORKER_SOCKET_ENV`]. The host binary must call
    /// [`worker_entry_if_requested`](crate::worker_entry_if_requested)
    /// at startup.
    CurrentExe,
    /// Launch the given executable as the child, passing the socket path
    /// with `--socket-file`.
    Binary(PathBuf),
}

/// Constructor-level options for [`spawn`].
#[derive(Debug, Clone)]
pub struct SpawnOptions {
    /// Which executable serves as the worker.
    pub location: ExecutorLocation,
    /// How long to wait for the child to bind its socket.
    pub handshake_timeout: Duration,
    /// Extra environment variables passed through to the child.
    pub env: Vec<(String, String)>,
}

impl Default for SpawnOptions {
    fn default() -> Self {
        Self {
            location: ExecutorLocation::CurrentExe,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            env: Vec::new(),
        }
    }
}

impl SpawnOptions {
    /// Options for spawning the given worker binary.
    pub fn with_binary(path: impl Into<PathBuf>) -> Self {
        Self {
            location: ExecutorLocation::Binary(path.into()),
            ..Self::default()
        }
    }
}

/// Observable state of one worker.
///
/// Transitions are monotonic: once terminal (`Completed`, `Failed`,
/// `Terminated`), the state never changes again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerState {
    Starting,
    Running,
    Completed,
    Failed(String),
    Terminated,
}

impl WorkerState {
    /// Whether this state can no longer change.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkerState::Completed | WorkerState::Failed(_) | WorkerState::Terminated
        )
    }
}

/// Parent-side receive state: the channel plus messages that arrived while
/// waiting for a status reply and must be replayed in order.
pub(crate) struct Link {
    pub(crate) channel: Channel,
    pub(crate) buffered: VecDeque<Message>,
}

impl Link {
    /// Next message, preferring anything buffered by an earlier status
    /// query so nothing is reordered.
    pub(crate) fn next_message(&mut self) -> Result<Message> {
        match self.buffered.pop_front() {
            Some(message) => Ok(message),
            None => self.channel.receive(),
        }
    }
}

/// Handle to one spawned worker process.
///
/// Owned exclusively by the parent. Dropping the handle kills and reaps
/// the child and removes the socket file.
pub struct WorkerHandle {
    pid: u32,
    child: Mutex<Child>,
    pub(crate) link: Mutex<Link>,
    pub(crate) state: Mutex<WorkerState>,
    socket_path: PathBuf,
}

/// Spawn a worker and deliver the captured task to it.
///
/// On success the handle is already `Running`: the task payload has been
/// sent and the worker is producing values. Every failure before that
/// point cleans up the child and the socket file and surfaces as
/// [`Error::Spawn`]; no handle is ever returned for a dead worker.
pub fn spawn(task: TaskDescriptor, options: &SpawnOptions) -> Result<WorkerHandle> {
    let socket_path =
        std::env::temp_dir().join(format!("spindle-{}.sock", uuid::Uuid::new_v4()));

    let mut command = match &options.location {
        ExecutorLocation::Binary(path) => {
            let mut command = Command::new(path);
            command.arg("--socket-file").arg(&socket_path);
            command
        }
        ExecutorLocation::CurrentExe => {
            let exe = std::env::current_exe()
                .map_err(|e| Error::Spawn(format!("cannot locate current executable: {e}")))?;
            let mut command = Command::new(exe);
            command.env(WORKER_SOCKET_ENV, &socket_path);
            command
        }
    };
    command.stdin(Stdio::null()).stderr(Stdio::inherit());
    for (key, value) in &options.env {
        command.env(key, value);
    }

    let mut child = command
        .spawn()
        .map_err(|e| Error::Spawn(format!("failed to launch worker process: {e}")))?;
    let pid = child.id();
    tracing::debug!(pid, socket = %socket_path.display(), "spawned worker process");

    let stream = match connect_with_backoff(&socket_path, &mut child, options.handshake_timeout) {
        Ok(stream) => stream,
        Err(err) => {
            abandon(&mut child, &socket_path);
            return Err(err);
        }
    };

    let mut channel = Channel::new(stream);
    if let Err(err) = channel.send(&Message::TaskPayload(task)) {
        abandon(&mut child, &socket_path);
        return Err(Error::Spawn(format!(
            "failed to deliver task to worker {pid}: {err}"
        )));
    }

    Ok(WorkerHandle {
        pid,
        child: Mutex::new(child),
        link: Mutex::new(Link {
            channel,
            buffered: VecDeque::new(),
        }),
        state: Mutex::new(WorkerState::Running),
        socket_path,
    })
}

/// Retry connecting until the child has bound its socket or the deadline
/// passes. A child that dies during the handshake is reported as such
/// rather than as a timeout.
fn connect_with_backoff(
    socket_path: &Path,
    child: &mut Child,
    timeout: Duration,
) -> Result<UnixStream> {
    let pid = child.id();
    let deadline = Instant::now() + timeout;
    let mut delay = Duration::from_millis(10);
    loop {
        match UnixStream::connect(socket_path) {
            Ok(stream) => return Ok(stream),
            Err(err) => {
                if let Ok(Some(status)) = child.try_wait() {
                    return Err(Error::Spawn(format!(
                        "worker {pid} exited during handshake: {status}"
                    )));
                }
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    return Err(Error::Spawn(format!(
                        "timed out connecting to worker {pid}: {err}"
                    )));
                }
                std::thread::sleep(delay.min(remaining));
                delay = (delay * 2).min(Duration::from_millis(200));
            }
        }
    }
}

/// Kill and reap a half-spawned child and remove its socket file.
fn abandon(child: &mut Child, socket_path: &Path) {
    let pid = child.id();
    if let Err(err) = child.kill() {
        if err.kind() != io::ErrorKind::InvalidInput {
            tracing::warn!(pid, %err, "failed to kill worker during cleanup");
        }
    }
    let _ = child.wait();
    remove_socket(socket_path, pid);
}

fn remove_socket(socket_path: &Path, pid: u32) {
    if let Err(err) = std::fs::remove_file(socket_path) {
        if err.kind() != io::ErrorKind::NotFound {
            tracing::warn!(pid, %err, "failed to remove worker socket file");
        }
    }
}

/// Locate the `spindle-worker` binary.
///
/// Search order: the [`WORKER_PATH_ENV`] environment variable, the
/// directory of the current executable, the system `PATH`, then cargo
/// target directories for development builds.
pub fn find_worker_binary() -> Result<PathBuf> {
    if let Some(path) = std::env::var_os(WORKER_PATH_ENV) {
        let path = PathBuf::from(path);
        if path.exists() {
            return Ok(path);
        }
    }

    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            let candidate = dir.join("spindle-worker");
            if candidate.exists() {
                return Ok(candidate);
            }
        }
    }

    if let Ok(path) = which::which("spindle-worker") {
        return Ok(path);
    }

    if let Ok(manifest_dir) = std::env::var("CARGO_MANIFEST_DIR") {
        for profile in ["debug", "release"] {
            let candidate = PathBuf::from(&manifest_dir)
                .join("..")
                .join("..")
                .join("target")
                .join(profile)
                .join("spindle-worker");
            if candidate.exists() {
                return Ok(candidate.canonicalize().unwrap_or(candidate));
            }
        }
    }

    Err(Error::Spawn(
        "could not find the spindle-worker binary; set SPINDLE_WORKER_PATH or put it on PATH"
            .to_string(),
    ))
}

/// Lock a mutex, recovering the guard if a previous holder panicked. The
/// protected state is a plain snapshot and stays valid across a poisoning
/// panic.
pub(crate) fn relock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl WorkerHandle {
    /// Process identifier of the child.
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Non-blocking snapshot of the worker's state.
    ///
    /// Reflects process death even if no message has arrived: a child that
    /// exited is reaped here and its exit status mapped to a terminal
    /// state.
    pub fn status(&self) -> WorkerState {
        let mut state = relock(&self.state);
        if state.is_terminal() {
            return state.clone();
        }
        if let Ok(Some(exit)) = relock(&self.child).try_wait() {
            *state = state_from_exit(exit);
        }
        state.clone()
    }

    /// Forcefully terminate the worker.
    ///
    /// Sends SIGKILL and reaps the child; not cooperative, the child gets
    /// no chance to flush a final message. Idempotent once the state is
    /// terminal.
    pub fn terminate(&self) {
        let mut state = relock(&self.state);
        if state.is_terminal() {
            return;
        }
        let mut child = relock(&self.child);
        if let Err(err) = child.kill() {
            if err.kind() != io::ErrorKind::InvalidInput {
                tracing::warn!(pid = self.pid, %err, "failed to kill worker");
            }
        }
        let _ = child.wait();
        *state = WorkerState::Terminated;
    }

    /// Ask the worker for a progress report over the protocol.
    ///
    /// Any yields that arrive before the reply are buffered in order and
    /// handed to the iterator later; a status query never consumes or
    /// reorders the value stream. Fails with
    /// [`Error::ConcurrentAccess`] if an iterator pull is in flight.
    pub fn query_status(&self) -> Result<StatusReport> {
        self.query_status_timeout(DEFAULT_STATUS_TIMEOUT)
    }

    /// [`query_status`](Self::query_status) with an explicit deadline.
    pub fn query_status_timeout(&self, timeout: Duration) -> Result<StatusReport> {
        let mut link = match self.link.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::WouldBlock) => return Err(Error::ConcurrentAccess),
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
        };
        link.channel.send(&Message::StatusQuery)?;
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(Error::Timeout(timeout));
            }
            let message = link.channel.receive_timeout(remaining).map_err(|err| match err {
                Error::Timeout(_) => Error::Timeout(timeout),
                other => other,
            })?;
            match message {
                Message::StatusReply(report) => return Ok(report),
                Message::YieldValue(_) | Message::StreamEnd | Message::StreamError(_) => {
                    self.note_terminal(&message);
                    link.buffered.push_back(message);
                }
                other => {
                    return Err(Error::Channel(format!(
                        "unexpected message while awaiting status reply: {other:?}"
                    )))
                }
            }
        }
    }

    /// Iterate over the values the worker yields.
    ///
    /// Single-pass: the stream is consumed once and cannot be restarted.
    pub fn iter(&self) -> WorkerIter<'_> {
        WorkerIter::new(self)
    }

    /// Operations exposed by a worker handle, for interactive discovery.
    pub fn operations() -> &'static [&'static str] {
        &["iter", "pid", "query_status", "status", "terminate"]
    }

    /// Record the terminal state implied by a terminal message, without
    /// overwriting an earlier terminal state.
    pub(crate) fn note_terminal(&self, message: &Message) {
        let mut state = relock(&self.state);
        if state.is_terminal() {
            return;
        }
        match message {
            Message::StreamEnd => *state = WorkerState::Completed,
            Message::StreamError(bytes) => {
                let remote = codec::decode_remote_error(bytes)
                    .unwrap_or_else(|_| RemoteError::new("malformed error payload from worker"));
                *state = WorkerState::Failed(remote.message);
            }
            _ => {}
        }
    }

    #[cfg(test)]
    pub(crate) fn from_parts(child: Child, channel: Channel, socket_path: PathBuf) -> Self {
        let pid = child.id();
        Self {
            pid,
            child: Mutex::new(child),
            link: Mutex::new(Link {
                channel,
                buffered: VecDeque::new(),
            }),
            state: Mutex::new(WorkerState::Running),
            socket_path,
        }
    }
}

/// Map a child exit status onto a terminal worker state.
fn state_from_exit(exit: ExitStatus) -> WorkerState {
    match exit.code() {
        Some(0) => WorkerState::Completed,
        Some(code) if code == EXIT_TASK_FAILED => {
            WorkerState::Failed("worker reported a task failure".to_string())
        }
        Some(code) => WorkerState::Failed(format!("worker exited with code {code}")),
        None => {
            #[cfg(unix)]
            {
                use std::os::unix::process::ExitStatusExt;
                if let Some(signal) = exit.signal() {
                    return WorkerState::Failed(format!("worker killed by signal {signal}"));
                }
            }
            WorkerState::Failed("worker terminated abnormally".to_string())
        }
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        // Reap unconditionally; a Completed child may still be a zombie if
        // status() never observed its exit.
        {
            let mut child = relock(&self.child);
            let _ = child.kill();
            let _ = child.wait();
        }
        remove_socket(&self.socket_path, self.pid);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spawn_missing_binary_fails_without_a_handle() {
        let registry = crate::test_tasks::registry();
        let task = registry
            .capture("count", spindle_core::Bindings::new())
            .unwrap();
        let options = SpawnOptions::with_binary("/nonexistent/spindle-worker");
        match spawn(task, &options) {
            Err(Error::Spawn(_)) => {}
            other => panic!("expected spawn error, got {:?}", other.map(|h| h.pid())),
        }
    }

    #[test]
    fn terminal_states_are_terminal() {
        assert!(!WorkerState::Starting.is_terminal());
        assert!(!WorkerState::Running.is_terminal());
        assert!(WorkerState::Completed.is_terminal());
        assert!(WorkerState::Failed("x".to_string()).is_terminal());
        assert!(WorkerState::Terminated.is_terminal());
    }

    #[test]
    fn exit_status_mapping() {
        use std::os::unix::process::ExitStatusExt;
        assert_eq!(
            state_from_exit(ExitStatus::from_raw(0)),
            WorkerState::Completed
        );
        // Raw wait status: exit code in the high byte.
        assert_eq!(
            state_from_exit(ExitStatus::from_raw((EXIT_TASK_FAILED as i32) << 8)),
            WorkerState::Failed("worker reported a task failure".to_string())
        );
        match state_from_exit(ExitStatus::from_raw(libc::SIGKILL)) {
            WorkerState::Failed(reason) => assert!(reason.contains("signal")),
            other => panic!("expected failed, got {other:?}"),
        }
    }
}
