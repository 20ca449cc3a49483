//! Materialized results.

use std::fmt;

use crate::array::{ArrayError, ArrayRef, DType, HostArray, IndexKey, Scalar};

/// The concrete result of evaluating a graph node.
#[derive(Debug, Clone)]
pub enum Value {
    Array(ArrayRef),
    Scalar(Scalar),
}

impl Value {
    /// Wraps a freshly computed array; rank-0 results become scalars.
    pub fn from_host(array: HostArray) -> Self {
        match array.to_scalar() {
            Some(value) => Value::Scalar(value),
            None => Value::Array(ArrayRef::new(array)),
        }
    }

    pub fn dtype(&self) -> DType {
        match self {
            Value::Array(array) => array.read().dtype(),
            Value::Scalar(value) => value.dtype(),
        }
    }

    /// Copies the value out as a host array (rank 0 for scalars).
    pub fn to_host(&self) -> HostArray {
        match self {
            Value::Array(array) => array.snapshot(),
            Value::Scalar(value) => HostArray::from_scalar(*value),
        }
    }

    pub fn as_scalar(&self) -> Option<Scalar> {
        match self {
            Value::Array(_) => None,
            Value::Scalar(value) => Some(*value),
        }
    }

    /// Runs `f` against the value viewed as a host array, without copying arrays.
    pub(crate) fn with_host<R>(&self, f: impl FnOnce(&HostArray) -> R) -> R {
        match self {
            Value::Array(array) => f(&array.read()),
            Value::Scalar(value) => f(&HostArray::from_scalar(*value)),
        }
    }

    /// Interprets the value as an index key.
    pub fn to_key(&self) -> Result<IndexKey, ArrayError> {
        match self {
            Value::Array(array) => IndexKey::from_array(&array.read()),
            Value::Scalar(value) => IndexKey::from_scalar(*value),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Array(array) => write!(f, "{}", *array.read()),
            Value::Scalar(value) => write!(f, "{value}"),
        }
    }
}
