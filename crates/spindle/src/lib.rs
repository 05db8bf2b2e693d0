//! Run a registered task in a worker process and iterate over the values
//! it yields.
//!
//! The bridge has three moving parts:
//! - A [`TaskRegistry`] names the functions both processes link. The
//!   parent captures a task (name + constant bindings) into an opaque
//!   [`TaskDescriptor`].
//! - [`run_in_worker`] spawns a child process (a re-exec of the current
//!   binary, or an external worker binary), delivers the descriptor, and
//!   returns a [`WorkerHandle`].
//! - The handle iterates over the values the child yields, one message per
//!   value over a framed unix-socket channel, while `status()` tracks the
//!   child's liveness independently.
//!
//! ```no_run
//! use spindle::{run_in_worker, Bindings, SpawnOptions, TaskRegistry, Value};
//!
//! fn count(bindings: &Bindings) -> Box<dyn Iterator<Item = Result<Value, spindle::RemoteError>> + Send> {
//!     let n = bindings.get_int("n").unwrap_or(10);
//!     Box::new((0..n).map(|i| Ok(Value::Int(i))))
//! }
//!
//! fn main() -> spindle::Result<()> {
//!     let mut registry = TaskRegistry::new();
//!     registry.register_generator("count", count);
//!     // Serve as the worker when re-executed as one.
//!     if let Some(code) = spindle::worker_entry_if_requested(&registry) {
//!         std::process::exit(code);
//!     }
//!
//!     let task = registry.capture("count", Bindings::new().with("n", Value::Int(40)))?;
//!     let worker = run_in_worker(task, &SpawnOptions::default())?;
//!     for value in &worker {
//!         println!("{:?}", value?);
//!     }
//!     println!("{:?}", worker.status());
//!     Ok(())
//! }
//! ```

pub mod child;
pub mod manager;
pub mod registry;
pub mod stream;

#[cfg(test)]
pub(crate) mod test_tasks;

pub use spindle_core::{
    Bindings, Channel, DType, Error, Message, NdArray, RemoteError, Result, StatusReport,
    TaskDescriptor, TaskKind, Value,
};

pub use child::{
    run_worker, worker_entry_if_requested, EXIT_OK, EXIT_PROTOCOL_FAILED, EXIT_TASK_FAILED,
    WORKER_SOCKET_ENV,
};
pub use manager::{
    find_worker_binary, spawn, ExecutorLocation, SpawnOptions, WorkerHandle, WorkerState,
    WORKER_PATH_ENV,
};
pub use registry::{FunctionBody, GeneratorBody, ResolvedTask, TaskBody, TaskRegistry};
pub use stream::WorkerIter;

/// Launch a captured task in a worker process.
///
/// Convenience wrapper around [`manager::spawn`]; the returned handle is
/// already running the task.
pub fn run_in_worker(task: TaskDescriptor, options: &SpawnOptions) -> Result<WorkerHandle> {
    manager::spawn(task, options)
}

/// Operations exposed by this module, for interactive discovery.
pub const MODULE_OPERATIONS: &[&str] = &[
    "find_worker_binary",
    "run_in_worker",
    "run_worker",
    "spawn",
    "worker_entry_if_requested",
];
