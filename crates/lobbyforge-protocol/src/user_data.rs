//! Game-defined session data items.
//!
//! Games describe their session data once (ids and types), then attach
//! values on create/update and filter on them during search. How items are
//! laid out in the platform's room attributes is decided by the lobby;
//! this module only defines the values.

use serde::{Deserialize, Serialize};

/// Maximum size of the opaque per-member user data blob.
pub const MEMBER_USER_DATA_LEN: usize = 64;

/// Number of searchable integer attributes a room carries.
pub const SEARCHABLE_ATTRIBUTE_COUNT: usize = 8;

/// Capacity of the binary attribute bucket for non-searchable items.
pub const BINARY_ATTRIBUTE_LEN: usize = 512;

/// Game-chosen identifier of one session data item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserDataId(pub u32);

/// Storage type of a session data item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UserDataType {
    Int8,
    Int16,
    Int32,
    Int64,
    Float32,
    Float64,
}

impl UserDataType {
    /// Encoded size in bytes.
    pub fn size(self) -> usize {
        match self {
            Self::Int8 => 1,
            Self::Int16 => 2,
            Self::Int32 | Self::Float32 => 4,
            Self::Int64 | Self::Float64 => 8,
        }
    }
}

/// A typed session data value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum UserDataValue {
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
}

impl UserDataValue {
    pub fn data_type(&self) -> UserDataType {
        match self {
            Self::Int8(_) => UserDataType::Int8,
            Self::Int16(_) => UserDataType::Int16,
            Self::Int32(_) => UserDataType::Int32,
            Self::Int64(_) => UserDataType::Int64,
            Self::Float32(_) => UserDataType::Float32,
            Self::Float64(_) => UserDataType::Float64,
        }
    }

    /// Writes the little-endian encoding into `out`, which must be exactly
    /// [`UserDataType::size`] bytes long.
    pub fn write_le(&self, out: &mut [u8]) {
        match self {
            Self::Int8(v) => out.copy_from_slice(&v.to_le_bytes()),
            Self::Int16(v) => out.copy_from_slice(&v.to_le_bytes()),
            Self::Int32(v) => out.copy_from_slice(&v.to_le_bytes()),
            Self::Int64(v) => out.copy_from_slice(&v.to_le_bytes()),
            Self::Float32(v) => out.copy_from_slice(&v.to_le_bytes()),
            Self::Float64(v) => out.copy_from_slice(&v.to_le_bytes()),
        }
    }

    /// Reads a value of type `ty` from the start of `bytes`. Returns `None`
    /// if `bytes` is too short.
    pub fn read_le(ty: UserDataType, bytes: &[u8]) -> Option<Self> {
        let raw = bytes.get(..ty.size())?;
        Some(match ty {
            UserDataType::Int8 => Self::Int8(i8::from_le_bytes(raw.try_into().ok()?)),
            UserDataType::Int16 => Self::Int16(i16::from_le_bytes(raw.try_into().ok()?)),
            UserDataType::Int32 => Self::Int32(i32::from_le_bytes(raw.try_into().ok()?)),
            UserDataType::Int64 => Self::Int64(i64::from_le_bytes(raw.try_into().ok()?)),
            UserDataType::Float32 => Self::Float32(f32::from_le_bytes(raw.try_into().ok()?)),
            UserDataType::Float64 => Self::Float64(f64::from_le_bytes(raw.try_into().ok()?)),
        })
    }
}

/// Declares one session data item before it is used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserDataDescriptor {
    pub id: UserDataId,
    pub ty: UserDataType,
}

/// One session data item with its value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SessionUserData {
    pub id: UserDataId,
    pub value: UserDataValue,
}

impl SessionUserData {
    pub fn new(id: u32, value: UserDataValue) -> Self {
        Self {
            id: UserDataId(id),
            value,
        }
    }
}

/// Integer comparison used by search filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    /// Evaluates `lhs <op> rhs`.
    pub fn matches(self, lhs: i32, rhs: i32) -> bool {
        match self {
            Self::Eq => lhs == rhs,
            Self::Ne => lhs != rhs,
            Self::Lt => lhs < rhs,
            Self::Le => lhs <= rhs,
            Self::Gt => lhs > rhs,
            Self::Ge => lhs >= rhs,
        }
    }
}

/// A search constraint on a registered `Int32` session data item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchFilter {
    pub id: UserDataId,
    pub op: CompareOp,
    pub value: i32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_le_matches_write_le_for_float64() {
        let value = UserDataValue::Float64(-2.5);
        let mut buf = [0u8; 8];
        value.write_le(&mut buf);
        assert_eq!(UserDataValue::read_le(UserDataType::Float64, &buf), Some(value));
    }

    #[test]
    fn test_read_le_short_buffer_returns_none() {
        assert_eq!(UserDataValue::read_le(UserDataType::Int32, &[1, 2]), None);
    }

    #[test]
    fn test_compare_op_matches() {
        assert!(CompareOp::Eq.matches(3, 3));
        assert!(CompareOp::Ne.matches(3, 4));
        assert!(CompareOp::Lt.matches(3, 4));
        assert!(CompareOp::Le.matches(4, 4));
        assert!(CompareOp::Gt.matches(5, 4));
        assert!(!CompareOp::Ge.matches(3, 4));
    }
}
