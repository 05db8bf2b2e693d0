//! Task capture: the serialized representation of a function to run in a
//! worker process.
//!
//! Only registered task names plus explicitly captured constant bindings
//! cross the process boundary. The child re-creates everything else from
//! its own linked code, so a descriptor is self-contained by construction.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::value::Value;

/// Whether a captured task is a one-shot function or a generator.
///
/// Decided at capture time and dispatched explicitly by the child-side
/// execution loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskKind {
    Function,
    Generator,
}

/// The captured representation of a function to run in a worker.
///
/// Immutable once created; produced by the parent at capture time and
/// consumed exactly once by the child. The payload is opaque at this layer:
/// the registry that captured it knows how to decode it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDescriptor {
    kind: TaskKind,
    payload: Vec<u8>,
}

impl TaskDescriptor {
    /// Wrap an already-encoded task payload.
    pub fn new(kind: TaskKind, payload: Vec<u8>) -> Self {
        Self { kind, payload }
    }

    /// The declared kind of the captured callable.
    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    /// The opaque encoded payload.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }
}

/// Decoded form of a task payload: a registered name plus captured
/// constants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    /// Name the task was registered under.
    pub name: String,
    /// Constants captured at the call site.
    pub bindings: Bindings,
}

/// Constants captured alongside a task, keyed by name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Bindings(BTreeMap<String, Value>);

impl Bindings {
    /// Create an empty set of bindings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, name: impl Into<String>, value: Value) -> Self {
        self.insert(name, value);
        self
    }

    /// Insert a binding, replacing any previous value under the name.
    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        self.0.insert(name.into(), value);
    }

    /// Look up a binding by name.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    /// Look up an integer binding.
    pub fn get_int(&self, name: &str) -> Option<i64> {
        match self.get(name) {
            Some(Value::Int(n)) => Some(*n),
            _ => None,
        }
    }

    /// Look up a float binding.
    pub fn get_float(&self, name: &str) -> Option<f64> {
        match self.get(name) {
            Some(Value::Float(x)) => Some(*x),
            _ => None,
        }
    }

    /// Look up a string binding.
    pub fn get_str(&self, name: &str) -> Option<&str> {
        match self.get(name) {
            Some(Value::Str(s)) => Some(s),
            _ => None,
        }
    }

    /// Re-check the invariants of every captured value, as on decode.
    pub fn validate(&self) -> crate::error::Result<()> {
        self.0.values().try_for_each(Value::validate)
    }

    /// Number of captured constants.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no constants were captured.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
