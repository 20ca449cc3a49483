//! Element types supported by host arrays.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Logical element type shared by arrays, scalars and kernel parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    /// Boolean, produced by comparisons and used for masks.
    Bool,
    /// 64-bit signed integer.
    Int64,
    /// 64-bit IEEE-754 float.
    Float64,
}

impl DType {
    /// Canonical text name, as emitted into generated kernel signatures.
    pub fn name(self) -> &'static str {
        match self {
            DType::Bool => "bool",
            DType::Int64 => "int64",
            DType::Float64 => "float64",
        }
    }

    /// Common type two operands are promoted to (`bool < int64 < float64`).
    pub fn promote(self, other: DType) -> DType {
        self.max(other)
    }

    /// Promotion used by arithmetic: booleans never stay boolean.
    pub fn arithmetic(self, other: DType) -> DType {
        match self.promote(other) {
            DType::Bool => DType::Int64,
            dtype => dtype,
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
