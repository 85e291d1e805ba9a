//! Typed value codec.
//!
//! Converts between [`TypedValue`], the value carried by every peer message,
//! and its protobuf representation. Arrays travel with an explicit element
//! count so a truncated or padded array is detected on decode instead of
//! being handed to the payload.

use std::fmt;

use crate::error::{PayloadError, Result};
use crate::proto;
use crate::proto::typed_value::Kind;

/// A value exchanged between payloads. Exactly one variant is populated.
#[derive(Debug, Clone, PartialEq)]
pub enum TypedValue {
    Str(String),
    Int64(i64),
    Uint64(u64),
    Int64Array(Vec<i64>),
    DoubleArray(Vec<f64>),
}

impl TypedValue {
    /// Short variant name, used in logs.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Str(_) => "string",
            Self::Int64(_) => "int64",
            Self::Uint64(_) => "uint64",
            Self::Int64Array(_) => "int64array",
            Self::DoubleArray(_) => "doublearray",
        }
    }
}

impl fmt::Display for TypedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Str(s) => write!(f, "{}", s),
            Self::Int64(v) => write!(f, "{}", v),
            Self::Uint64(v) => write!(f, "{}", v),
            Self::Int64Array(values) => write_list(f, values),
            Self::DoubleArray(values) => write_list(f, values),
        }
    }
}

fn write_list<T: fmt::Display>(f: &mut fmt::Formatter<'_>, values: &[T]) -> fmt::Result {
    write!(f, "[")?;
    for (i, v) in values.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", v)?;
    }
    write!(f, "]")
}

impl From<String> for TypedValue {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<&str> for TypedValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<i64> for TypedValue {
    fn from(value: i64) -> Self {
        Self::Int64(value)
    }
}

impl From<u64> for TypedValue {
    fn from(value: u64) -> Self {
        Self::Uint64(value)
    }
}

impl From<Vec<i64>> for TypedValue {
    fn from(values: Vec<i64>) -> Self {
        Self::Int64Array(values)
    }
}

impl From<Vec<f64>> for TypedValue {
    fn from(values: Vec<f64>) -> Self {
        Self::DoubleArray(values)
    }
}

/// Encode a value for the wire.
///
/// # Errors
///
/// Returns `MalformedValue` if an array has more elements than the count
/// field can describe.
pub fn encode(value: &TypedValue) -> Result<proto::TypedValue> {
    let kind = match value {
        TypedValue::Str(s) => Kind::StrValue(s.clone()),
        TypedValue::Int64(v) => Kind::Int64Value(*v),
        TypedValue::Uint64(v) => Kind::Uint64Value(*v),
        TypedValue::Int64Array(values) => Kind::Int64ArrayValue(proto::Int64Array {
            count: element_count(values.len())?,
            values: values.clone(),
        }),
        TypedValue::DoubleArray(values) => Kind::DoubleArrayValue(proto::DoubleArray {
            count: element_count(values.len())?,
            values: values.clone(),
        }),
    };
    Ok(proto::TypedValue { kind: Some(kind) })
}

/// Decode a wire value.
///
/// # Errors
///
/// Returns `MalformedValue` if no variant is set or if an array's declared
/// count does not match its contents.
pub fn decode(wire: proto::TypedValue) -> Result<TypedValue> {
    match wire.kind {
        Some(Kind::StrValue(s)) => Ok(TypedValue::Str(s)),
        Some(Kind::Int64Value(v)) => Ok(TypedValue::Int64(v)),
        Some(Kind::Uint64Value(v)) => Ok(TypedValue::Uint64(v)),
        Some(Kind::Int64ArrayValue(array)) => {
            check_count("int64 array", array.count, array.values.len())?;
            Ok(TypedValue::Int64Array(array.values))
        }
        Some(Kind::DoubleArrayValue(array)) => {
            check_count("double array", array.count, array.values.len())?;
            Ok(TypedValue::DoubleArray(array.values))
        }
        None => Err(PayloadError::malformed("typed value has no variant set")),
    }
}

fn element_count(len: usize) -> Result<u32> {
    u32::try_from(len)
        .map_err(|_| PayloadError::malformed(format!("array of {} elements is too large", len)))
}

fn check_count(what: &str, declared: u32, actual: usize) -> Result<()> {
    if declared as usize != actual {
        return Err(PayloadError::malformed(format!(
            "{} declares {} elements but carries {}",
            what, declared, actual
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_every_variant() {
        let values = vec![
            TypedValue::Str("value".to_string()),
            TypedValue::Str(String::new()),
            TypedValue::Int64(i64::MIN),
            TypedValue::Uint64(u64::MAX),
            TypedValue::Int64Array(vec![0, 10, 200, 3000, 40000, 500000]),
            TypedValue::Int64Array(vec![]),
            TypedValue::DoubleArray(vec![-1.5, 0.0, 3.25]),
        ];

        for value in values {
            let wire = encode(&value).unwrap();
            assert_eq!(decode(wire).unwrap(), value);
        }
    }

    #[test]
    fn test_encode_sets_count() {
        let wire = encode(&TypedValue::DoubleArray(vec![1.0, 2.0])).unwrap();
        match wire.kind {
            Some(Kind::DoubleArrayValue(array)) => assert_eq!(array.count, 2),
            other => panic!("unexpected kind: {:?}", other),
        }
    }

    #[test]
    fn test_decode_unset_variant() {
        let err = decode(proto::TypedValue { kind: None }).unwrap_err();
        assert!(matches!(err, PayloadError::MalformedValue { .. }));
    }

    #[test]
    fn test_decode_count_mismatch() {
        let wire = proto::TypedValue {
            kind: Some(Kind::Int64ArrayValue(proto::Int64Array {
                count: 3,
                values: vec![1, 2],
            })),
        };
        let err = decode(wire).unwrap_err();
        assert!(err.to_string().contains("declares 3 elements but carries 2"));
    }

    #[test]
    fn test_display() {
        assert_eq!(TypedValue::Int64Array(vec![1, 2, 3]).to_string(), "[1, 2, 3]");
        assert_eq!(TypedValue::from("hi").to_string(), "hi");
        assert_eq!(TypedValue::from(7u64).kind_name(), "uint64");
    }
}
