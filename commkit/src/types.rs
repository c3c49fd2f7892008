use crate::error::{CommError, Result};
use std::str::FromStr;

/// Rank of a participant in a communicator group (0-indexed).
pub type Rank = u32;

/// Message label for point-to-point traffic, scoped per communicator.
pub type Tag = u32;

/// Tag used when the caller has no reason to pick one.
pub const DEFAULT_TAG: Tag = 0;

/// Root used by rooted collectives when the caller has no reason to pick one.
pub const DEFAULT_ROOT: Rank = 0;

/// Element types a buffer can be declared with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DataType {
    F32 = 0,
    F64 = 1,
    I8 = 2,
    I32 = 3,
    I64 = 4,
    U8 = 5,
    U32 = 6,
    U64 = 7,
}

impl DataType {
    /// Size of one element in bytes.
    pub const fn size_in_bytes(self) -> usize {
        match self {
            DataType::F32 | DataType::I32 | DataType::U32 => 4,
            DataType::F64 | DataType::I64 | DataType::U64 => 8,
            DataType::I8 | DataType::U8 => 1,
        }
    }

    /// Human-readable name.
    pub const fn name(self) -> &'static str {
        match self {
            DataType::F32 => "f32",
            DataType::F64 => "f64",
            DataType::I8 => "i8",
            DataType::I32 => "i32",
            DataType::I64 => "i64",
            DataType::U8 => "u8",
            DataType::U32 => "u32",
            DataType::U64 => "u64",
        }
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Element-wise reduction applied across participants.
///
/// Only `sum`, `max` and `min` are recognized. Parsing any other operator
/// name fails with [`CommError::InvalidOperation`], which is the single place
/// an unrecognized operator can enter the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReduceOp {
    Sum,
    Max,
    Min,
}

impl ReduceOp {
    /// Look up an operator by name (`"sum"`, `"max"`, `"min"`).
    pub fn parse(name: &str) -> Result<Self> {
        match name {
            "sum" => Ok(ReduceOp::Sum),
            "max" => Ok(ReduceOp::Max),
            "min" => Ok(ReduceOp::Min),
            other => Err(CommError::InvalidOperation(other.to_string())),
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            ReduceOp::Sum => "sum",
            ReduceOp::Max => "max",
            ReduceOp::Min => "min",
        }
    }
}

impl FromStr for ReduceOp {
    type Err = CommError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<&str> for ReduceOp {
    type Error = CommError;

    fn try_from(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl std::fmt::Display for ReduceOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
