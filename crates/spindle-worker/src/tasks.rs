//! Built-in task set served by the standalone worker.
//!
//! Small enough to exercise every path of the bridge: an array-yielding
//! generator, a scalar counter, a task that fails partway through, and a
//! one-shot function.

use spindle::{Bindings, NdArray, RemoteError, TaskRegistry, Value};

type Yield = Result<Value, RemoteError>;

/// Yield `n` rank-1 arrays `[i*i, (i+1)*(i+1)]`.
fn square_pairs(bindings: &Bindings) -> Box<dyn Iterator<Item = Yield> + Send> {
    let n = bindings.get_int("n").unwrap_or(40);
    Box::new((0..n).map(|i| {
        NdArray::int64(vec![2], vec![i * i, (i + 1) * (i + 1)])
            .map(Value::Array)
            .map_err(|err| RemoteError::new(err.to_string()))
    }))
}

/// Yield the integers `0..n`.
fn count(bindings: &Bindings) -> Box<dyn Iterator<Item = Yield> + Send> {
    let n = bindings.get_int("n").unwrap_or(10);
    Box::new((0..n).map(|i| Ok(Value::Int(i))))
}

/// Yield `k` integers, then fail.
fn fail_after(bindings: &Bindings) -> Box<dyn Iterator<Item = Yield> + Send> {
    let k = bindings.get_int("k").unwrap_or(3);
    Box::new((0..=k).map(move |i| {
        if i < k {
            Ok(Value::Int(i))
        } else {
            Err(RemoteError::new(format!("deliberate failure after {k} yields")))
        }
    }))
}

fn answer(_bindings: &Bindings) -> Yield {
    Ok(Value::Int(42))
}

/// Registry of the built-in tasks.
pub fn builtin_registry() -> TaskRegistry {
    let mut registry = TaskRegistry::new();
    registry.register_generator("square_pairs", square_pairs);
    registry.register_generator("count", count);
    registry.register_generator("fail_after", fail_after);
    registry.register_function("answer", answer);
    registry
}
