//! Task registry: the executor capability shared by parent and worker.
//!
//! Capture is deliberately conservative. A task is a registered,
//! module-level function plus the constant bindings captured at the call
//! site; nothing else crosses the process boundary. Anything outside that
//! policy fails fast at capture time rather than half-working in the
//! child.

use std::collections::HashMap;

use spindle_core::codec;
use spindle_core::error::{Error, RemoteError, Result};
use spindle_core::task::{Bindings, TaskDescriptor, TaskKind, TaskSpec};
use spindle_core::value::Value;

/// A one-shot task body.
pub type FunctionBody = fn(&Bindings) -> std::result::Result<Value, RemoteError>;

/// A generator task body: returns the iterator the worker will drive.
pub type GeneratorBody =
    fn(&Bindings) -> Box<dyn Iterator<Item = std::result::Result<Value, RemoteError>> + Send>;

/// A registered task body, tagged by kind.
#[derive(Clone, Copy)]
pub enum TaskBody {
    Function(FunctionBody),
    Generator(GeneratorBody),
}

impl TaskBody {
    fn kind(&self) -> TaskKind {
        match self {
            TaskBody::Function(_) => TaskKind::Function,
            TaskBody::Generator(_) => TaskKind::Generator,
        }
    }
}

/// A descriptor resolved back into something the worker can run.
pub struct ResolvedTask {
    /// Name the task was registered under.
    pub name: String,
    /// The body to invoke.
    pub body: TaskBody,
    /// Constants captured by the parent.
    pub bindings: Bindings,
}

/// Name-keyed set of task bodies known to this process.
///
/// The parent captures against its registry; the worker resolves against
/// its own. The two only line up when both processes link the same task
/// set, which is the contract of the bridge.
#[derive(Default)]
pub struct TaskRegistry {
    tasks: HashMap<String, TaskBody>,
}

impl TaskRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a one-shot function under `name`.
    pub fn register_function(&mut self, name: impl Into<String>, body: FunctionBody) {
        self.tasks.insert(name.into(), TaskBody::Function(body));
    }

    /// Register a generator function under `name`.
    pub fn register_generator(&mut self, name: impl Into<String>, body: GeneratorBody) {
        self.tasks.insert(name.into(), TaskBody::Generator(body));
    }

    /// Registered task names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tasks.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Capture a task for cross-process execution.
    ///
    /// Fails with a codec error if `name` is not registered: an unknown
    /// name is an unsupported capture, and the failure belongs at the call
    /// site, not inside the worker.
    pub fn capture(&self, name: &str, bindings: Bindings) -> Result<TaskDescriptor> {
        let body = self.tasks.get(name).ok_or_else(|| {
            Error::Codec(format!(
                "task '{name}' is not registered; only registered functions with \
                 captured constants can cross the process boundary"
            ))
        })?;
        let payload = codec::encode_task_spec(&TaskSpec {
            name: name.to_string(),
            bindings,
        })?;
        Ok(TaskDescriptor::new(body.kind(), payload))
    }

    /// Resolve a received descriptor against this registry.
    pub fn resolve(&self, descriptor: &TaskDescriptor) -> Result<ResolvedTask> {
        let spec = codec::decode_task_spec(descriptor.payload())?;
        let body = *self.tasks.get(&spec.name).ok_or_else(|| {
            Error::Codec(format!("task '{}' is not registered in this worker", spec.name))
        })?;
        if body.kind() != descriptor.kind() {
            return Err(Error::Codec(format!(
                "task '{}' was captured as {:?} but is registered as {:?}",
                spec.name,
                descriptor.kind(),
                body.kind()
            )));
        }
        Ok(ResolvedTask {
            name: spec.name,
            body,
            bindings: spec.bindings,
        })
    }
}
