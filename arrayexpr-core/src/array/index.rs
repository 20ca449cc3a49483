//! Index keys for element selection.

use super::{ArrayError, DType, HostArray, Scalar};

/// Selects elements of an array in flat (row-major) order.
#[derive(Debug, Clone, PartialEq)]
pub enum IndexKey {
    /// A single element; negative positions count from the end.
    Position(i64),
    /// Every element whose mask entry is `true`.
    Mask(Vec<bool>),
    /// Elements at the listed positions, in list order.
    Take(Vec<i64>),
}

impl IndexKey {
    /// Interprets a materialized scalar as a key.
    pub fn from_scalar(value: Scalar) -> Result<Self, ArrayError> {
        match value {
            Scalar::Int(i) => Ok(IndexKey::Position(i)),
            other => Err(ArrayError::InvalidKey(other.dtype())),
        }
    }

    /// Interprets a materialized array as a key: boolean arrays mask,
    /// integer arrays take.
    pub fn from_array(array: &HostArray) -> Result<Self, ArrayError> {
        if let Some(value) = array.to_scalar() {
            return Self::from_scalar(value);
        }
        match array.dtype() {
            DType::Bool => Ok(IndexKey::Mask(array.to_bool_vec())),
            DType::Int64 => Ok(IndexKey::Take(array.to_i64_vec())),
            DType::Float64 => Err(ArrayError::InvalidKey(DType::Float64)),
        }
    }
}
