//! Runtime values crossing the process boundary.
//!
//! Yielded values, captured constants and status payloads are all expressed
//! in this vocabulary. Numeric arrays carry explicit shape and dtype so the
//! codec can guarantee they round-trip without silent precision loss.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A value that can cross the worker process boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
    Array(NdArray),
}

impl Value {
    /// Re-check invariants that the constructors enforce but a decoded
    /// payload could violate. Walks nested lists and maps.
    pub fn validate(&self) -> Result<()> {
        match self {
            Value::Array(array) => array.validate(),
            Value::List(items) => items.iter().try_for_each(Value::validate),
            Value::Map(entries) => entries.values().try_for_each(Value::validate),
            _ => Ok(()),
        }
    }
}

/// Element type of an [`NdArray`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DType {
    Bool,
    Int32,
    Int64,
    Float32,
    Float64,
}

/// A multi-dimensional numeric array with explicit shape and dtype.
///
/// Invariant: the product of the shape equals the element count. Enforced
/// at construction and re-checked whenever an array is decoded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NdArray {
    shape: Vec<usize>,
    data: ArrayData,
}

/// Typed storage backing an [`NdArray`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum ArrayData {
    Bool(Vec<bool>),
    Int32(Vec<i32>),
    Int64(Vec<i64>),
    Float32(Vec<f32>),
    Float64(Vec<f64>),
}

impl ArrayData {
    fn len(&self) -> usize {
        match self {
            ArrayData::Bool(v) => v.len(),
            ArrayData::Int32(v) => v.len(),
            ArrayData::Int64(v) => v.len(),
            ArrayData::Float32(v) => v.len(),
            ArrayData::Float64(v) => v.len(),
        }
    }

    fn dtype(&self) -> DType {
        match self {
            ArrayData::Bool(_) => DType::Bool,
            ArrayData::Int32(_) => DType::Int32,
            ArrayData::Int64(_) => DType::Int64,
            ArrayData::Float32(_) => DType::Float32,
            ArrayData::Float64(_) => DType::Float64,
        }
    }
}

impl NdArray {
    fn new(shape: Vec<usize>, data: ArrayData) -> Result<Self> {
        let array = Self { shape, data };
        array.validate()?;
        Ok(array)
    }

    /// Create a boolean array with the given shape.
    pub fn bool(shape: Vec<usize>, data: Vec<bool>) -> Result<Self> {
        Self::new(shape, ArrayData::Bool(data))
    }

    /// Create a 32-bit integer array with the given shape.
    pub fn int32(shape: Vec<usize>, data: Vec<i32>) -> Result<Self> {
        Self::new(shape, ArrayData::Int32(data))
    }

    /// Create a 64-bit integer array with the given shape.
    pub fn int64(shape: Vec<usize>, data: Vec<i64>) -> Result<Self> {
        Self::new(shape, ArrayData::Int64(data))
    }

    /// Create a 32-bit float array with the given shape.
    pub fn float32(shape: Vec<usize>, data: Vec<f32>) -> Result<Self> {
        Self::new(shape, ArrayData::Float32(data))
    }

    /// Create a 64-bit float array with the given shape.
    pub fn float64(shape: Vec<usize>, data: Vec<f64>) -> Result<Self> {
        Self::new(shape, ArrayData::Float64(data))
    }

    /// The shape of the array.
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// The element type of the array.
    pub fn dtype(&self) -> DType {
        self.data.dtype()
    }

    /// Total number of elements.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the array holds no elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The elements as i64, if this is an Int64 array.
    pub fn as_int64(&self) -> Option<&[i64]> {
        match &self.data {
            ArrayData::Int64(v) => Some(v),
            _ => None,
        }
    }

    /// The elements as f64, if this is a Float64 array.
    pub fn as_float64(&self) -> Option<&[f64]> {
        match &self.data {
            ArrayData::Float64(v) => Some(v),
            _ => None,
        }
    }

    /// Check the shape/element-count invariant.
    pub fn validate(&self) -> Result<()> {
        let expected: usize = self.shape.iter().product();
        if expected != self.data.len() {
            return Err(Error::Codec(format!(
                "array shape {:?} implies {} elements but storage holds {}",
                self.shape,
                expected,
                self.data.len()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shape_must_match_element_count() {
        assert!(NdArray::int64(vec![2, 3], vec![0; 6]).is_ok());
        let err = NdArray::int64(vec![2, 3], vec![0; 5]).unwrap_err();
        assert!(matches!(err, Error::Codec(_)));
    }

    #[test]
    fn scalar_shape_holds_one_element() {
        // An empty shape is a rank-0 scalar: product of [] is 1.
        let scalar = NdArray::float64(vec![], vec![1.5]).unwrap();
        assert_eq!(scalar.len(), 1);
        assert!(NdArray::float64(vec![], vec![]).is_err());
    }

    #[test]
    fn dtype_reflects_storage() {
        let a = NdArray::float32(vec![2], vec![1.0, 2.0]).unwrap();
        assert_eq!(a.dtype(), DType::Float32);
        let b = NdArray::int32(vec![2], vec![1, 2]).unwrap();
        assert_eq!(b.dtype(), DType::Int32);
    }

    #[test]
    fn validate_walks_nested_values() {
        let mut bad = NdArray::int64(vec![2], vec![1, 2]).unwrap();
        bad.shape = vec![3];
        let value = Value::List(vec![Value::Int(1), Value::Array(bad)]);
        assert!(value.validate().is_err());
    }
}
