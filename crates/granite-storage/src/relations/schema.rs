//! Column types and table schemas.

use granite_common::{DbError, DbResult};

/// The SQL types the storage layer can store in a tuple.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    /// 32-bit signed integer.
    Integer,
    /// 64-bit signed integer.
    BigInt,
    /// 64-bit floating point.
    Double,
    /// Variable-length ASCII string with a declared maximum length.
    Varchar {
        /// Maximum length in bytes.
        max_length: u16,
    },
}

impl ColumnType {
    /// On-disk tag for schema serialization.
    #[must_use]
    pub const fn type_tag(self) -> u8 {
        match self {
            Self::Integer => 1,
            Self::BigInt => 2,
            Self::Double => 3,
            Self::Varchar { .. } => 4,
        }
    }

    /// Returns true for string types, which ANALYZE excludes from
    /// min/max collection.
    #[must_use]
    pub const fn is_string(self) -> bool {
        matches!(self, Self::Varchar { .. })
    }
}

impl std::fmt::Display for ColumnType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Integer => write!(f, "INTEGER"),
            Self::BigInt => write!(f, "BIGINT"),
            Self::Double => write!(f, "DOUBLE"),
            Self::Varchar { max_length } => write!(f, "VARCHAR({})", max_length),
        }
    }
}

/// One column of a schema.
#[derive(Debug, Clone)]
pub struct ColumnInfo {
    /// Column name.
    pub name: String,
    /// Column type.
    pub col_type: ColumnType,
}

impl ColumnInfo {
    /// Creates a column descriptor.
    pub fn new(name: impl Into<String>, col_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            col_type,
        }
    }
}

/// An ordered list of named, typed columns.
#[derive(Debug, Clone)]
pub struct Schema {
    columns: Vec<ColumnInfo>,
}

impl Schema {
    /// Creates a schema, validating column names.
    pub fn new(columns: Vec<ColumnInfo>) -> DbResult<Self> {
        if columns.is_empty() || columns.len() > 255 {
            return Err(DbError::illegal_state(
                "a schema must have between 1 and 255 columns",
            ));
        }
        for (i, col) in columns.iter().enumerate() {
            if col.name.is_empty() || !col.name.is_ascii() || col.name.len() > 255 {
                return Err(DbError::illegal_state(format!(
                    "invalid column name {:?}",
                    col.name
                )));
            }
            if columns[..i].iter().any(|c| c.name == col.name) {
                return Err(DbError::illegal_state(format!(
                    "duplicate column name {:?}",
                    col.name
                )));
            }
        }
        Ok(Self { columns })
    }

    /// Number of columns.
    #[inline]
    #[must_use]
    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    /// Returns the column at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range.
    #[must_use]
    pub fn column(&self, index: usize) -> &ColumnInfo {
        &self.columns[index]
    }

    /// Looks up a column index by name.
    #[must_use]
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Iterates over the columns in order.
    pub fn columns(&self) -> impl Iterator<Item = &ColumnInfo> {
        self.columns.iter()
    }
}
