//! Encoding and decoding of payloads that cross the process boundary.
//!
//! Everything on the wire is bincode. Decoding re-validates array shapes
//! so a corrupt or hand-crafted payload cannot smuggle an inconsistent
//! array into the parent.

use crate::error::{Error, RemoteError, Result};
use crate::task::TaskSpec;
use crate::value::Value;

/// Encode a value for transmission.
pub fn encode_value(value: &Value) -> Result<Vec<u8>> {
    bincode::serialize(value).map_err(|e| Error::Codec(format!("failed to encode value: {e}")))
}

/// Decode a value received from the peer.
pub fn decode_value(bytes: &[u8]) -> Result<Value> {
    let value: Value = bincode::deserialize(bytes)
        .map_err(|e| Error::Codec(format!("failed to decode value: {e}")))?;
    value.validate()?;
    Ok(value)
}

/// Encode the payload of a stream-error message.
pub fn encode_remote_error(error: &RemoteError) -> Result<Vec<u8>> {
    bincode::serialize(error)
        .map_err(|e| Error::Codec(format!("failed to encode remote error: {e}")))
}

/// Decode the payload of a stream-error message.
pub fn decode_remote_error(bytes: &[u8]) -> Result<RemoteError> {
    bincode::deserialize(bytes)
        .map_err(|e| Error::Codec(format!("failed to decode remote error: {e}")))
}

/// Encode a task spec into the opaque descriptor payload.
pub fn encode_task_spec(spec: &TaskSpec) -> Result<Vec<u8>> {
    bincode::serialize(spec).map_err(|e| Error::Codec(format!("failed to encode task: {e}")))
}

/// Decode a task spec from a descriptor payload.
pub fn decode_task_spec(bytes: &[u8]) -> Result<TaskSpec> {
    let spec: TaskSpec = bincode::deserialize(bytes)
        .map_err(|e| Error::Codec(format!("failed to decode task: {e}")))?;
    spec.bindings.validate()?;
    Ok(spec)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::value::NdArray;

    fn roundtrip(value: Value) {
        let bytes = encode_value(&value).unwrap();
        assert_eq!(decode_value(&bytes).unwrap(), value);
    }

    #[test]
    fn scalars_roundtrip() {
        roundtrip(Value::Null);
        roundtrip(Value::Bool(true));
        roundtrip(Value::Int(-42));
        roundtrip(Value::Float(2.5));
        roundtrip(Value::Str("hello".to_string()));
        roundtrip(Value::Bytes(vec![0, 1, 2, 255]));
    }

    #[test]
    fn composites_roundtrip() {
        let mut map = BTreeMap::new();
        map.insert("xs".to_string(), Value::List(vec![Value::Int(1), Value::Int(2)]));
        map.insert("label".to_string(), Value::Str("inner".to_string()));
        roundtrip(Value::Map(map));
    }

    #[test]
    fn multidimensional_array_preserves_shape_and_dtype() {
        let array = NdArray::int64(vec![2, 3], vec![1, 2, 3, 4, 5, 6]).unwrap();
        let bytes = encode_value(&Value::Array(array)).unwrap();
        match decode_value(&bytes).unwrap() {
            Value::Array(decoded) => {
                assert_eq!(decoded.shape(), &[2, 3]);
                assert_eq!(decoded.dtype(), crate::value::DType::Int64);
                assert_eq!(decoded.as_int64().unwrap(), &[1, 2, 3, 4, 5, 6]);
            }
            other => panic!("expected array, got {other:?}"),
        }
    }

    #[test]
    fn float32_does_not_widen() {
        let array = NdArray::float32(vec![2], vec![1.5, -0.25]).unwrap();
        let bytes = encode_value(&Value::Array(array.clone())).unwrap();
        match decode_value(&bytes).unwrap() {
            Value::Array(decoded) => assert_eq!(decoded.dtype(), crate::value::DType::Float32),
            other => panic!("expected array, got {other:?}"),
        }
    }

    #[test]
    fn corrupt_payload_is_a_codec_error() {
        let err = decode_value(&[0xff, 0xff, 0xff, 0xff, 0x00]).unwrap_err();
        assert!(matches!(err, Error::Codec(_)));
    }

    #[test]
    fn tampered_shape_is_rejected_on_decode() {
        // A well-formed frame whose shape was corrupted in flight. The
        // encoding starts with the enum variant index (u32) and the shape
        // vector (u64 length, then u64 entries), so the first shape entry
        // of a rank-1 array sits at bytes 12..20.
        let array = NdArray::int64(vec![2], vec![7, 9]).unwrap();
        let mut bytes = encode_value(&Value::Array(array)).unwrap();
        bytes[12..20].copy_from_slice(&3u64.to_le_bytes());
        let err = decode_value(&bytes).unwrap_err();
        assert!(matches!(err, Error::Codec(_)));
    }

    #[test]
    fn remote_error_roundtrip() {
        let remote = RemoteError::new("division by zero");
        let bytes = encode_remote_error(&remote).unwrap();
        assert_eq!(decode_remote_error(&bytes).unwrap(), remote);
    }
}
