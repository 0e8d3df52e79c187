//! Column values and in-memory literal tuples.

use std::cmp::Ordering;

use granite_common::{DbError, DbResult};

use super::schema::ColumnType;

/// A single column value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// SQL NULL.
    Null,
    /// 32-bit signed integer.
    Integer(i32),
    /// 64-bit signed integer.
    BigInt(i64),
    /// 64-bit floating point.
    Double(f64),
    /// ASCII string.
    Varchar(String),
}

impl Value {
    /// Returns true if this is NULL.
    #[inline]
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Returns true if this value can be stored in a column of the
    /// given type.  NULL is storable in any column.
    #[must_use]
    pub fn matches_type(&self, col_type: &ColumnType) -> bool {
        match (self, col_type) {
            (Self::Null, _) => true,
            (Self::Integer(_), ColumnType::Integer) => true,
            (Self::BigInt(_), ColumnType::BigInt) => true,
            (Self::Double(_), ColumnType::Double) => true,
            (Self::Varchar(s), ColumnType::Varchar { max_length }) => {
                s.is_ascii() && s.len() <= *max_length as usize
            }
            _ => false,
        }
    }

    /// Bytes this value occupies in a tuple's storage: nothing for
    /// NULL, the fixed scalar width otherwise, and a two-byte length
    /// prefix plus the bytes for strings.
    #[must_use]
    pub fn storage_size(&self) -> usize {
        match self {
            Self::Null => 0,
            Self::Integer(_) => 4,
            Self::BigInt(_) | Self::Double(_) => 8,
            Self::Varchar(s) => 2 + s.len(),
        }
    }

    /// Serializes this value to its tuple-storage form (big-endian).
    /// NULL produces no bytes.
    #[must_use]
    pub fn to_storage_bytes(&self) -> Vec<u8> {
        match self {
            Self::Null => Vec::new(),
            Self::Integer(v) => v.to_be_bytes().to_vec(),
            Self::BigInt(v) => v.to_be_bytes().to_vec(),
            Self::Double(v) => v.to_bits().to_be_bytes().to_vec(),
            Self::Varchar(s) => {
                let mut bytes = Vec::with_capacity(2 + s.len());
                bytes.extend_from_slice(&(s.len() as u16).to_be_bytes());
                bytes.extend_from_slice(s.as_bytes());
                bytes
            }
        }
    }

    /// Compares two values of the same variant; `None` for NULLs or
    /// mismatched variants.
    #[must_use]
    pub fn compare(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Self::Integer(a), Self::Integer(b)) => Some(a.cmp(b)),
            (Self::BigInt(a), Self::BigInt(b)) => Some(a.cmp(b)),
            (Self::Double(a), Self::Double(b)) => a.partial_cmp(b),
            (Self::Varchar(a), Self::Varchar(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null => write!(f, "NULL"),
            Self::Integer(v) => write!(f, "{}", v),
            Self::BigInt(v) => write!(f, "{}", v),
            Self::Double(v) => write!(f, "{}", v),
            Self::Varchar(s) => write!(f, "'{}'", s),
        }
    }
}

/// An in-memory tuple not backed by any page: the form in which new
/// rows arrive from the evaluator.
#[derive(Debug, Clone)]
pub struct LiteralTuple {
    values: Vec<Value>,
}

impl LiteralTuple {
    /// Creates a literal tuple from its values.
    #[must_use]
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    /// Number of columns.
    #[inline]
    #[must_use]
    pub fn num_columns(&self) -> usize {
        self.values.len()
    }

    /// Returns the value of column `index`.
    #[must_use]
    pub fn value(&self, index: usize) -> &Value {
        &self.values[index]
    }

    /// Returns all values in order.
    #[must_use]
    pub fn values(&self) -> &[Value] {
        &self.values
    }
}

impl From<Vec<Value>> for LiteralTuple {
    fn from(values: Vec<Value>) -> Self {
        Self::new(values)
    }
}
