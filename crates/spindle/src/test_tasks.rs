//! Task set shared by the in-crate tests.

use spindle_core::error::RemoteError;
use spindle_core::task::Bindings;
use spindle_core::value::{NdArray, Value};

use crate::registry::TaskRegistry;

type Yield = std::result::Result<Value, RemoteError>;

fn square_pairs(bindings: &Bindings) -> Box<dyn Iterator<Item = Yield> + Send> {
    let n = bindings.get_int("n").unwrap_or(40);
    Box::new((0..n).map(|i| {
        NdArray::int64(vec![2], vec![i * i, (i + 1) * (i + 1)])
            .map(Value::Array)
            .map_err(|err| RemoteError::new(err.to_string()))
    }))
}

fn count(bindings: &Bindings) -> Box<dyn Iterator<Item = Yield> + Send> {
    let n = bindings.get_int("n").unwrap_or(10);
    Box::new((0..n).map(|i| Ok(Value::Int(i))))
}

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

pub(crate) fn registry() -> TaskRegistry {
    let mut registry = TaskRegistry::new();
    registry.register_generator("square_pairs", square_pairs);
    registry.register_generator("count", count);
    registry.register_generator("fail_after", fail_after);
    registry.register_function("answer", answer);
    registry
}
