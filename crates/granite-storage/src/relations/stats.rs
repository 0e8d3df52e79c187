//! Table and column statistics collected by ANALYZE.

use std::collections::HashSet;

use super::schema::ColumnType;
use super::tuple::Value;

/// Statistics describing one column of a table.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnStats {
    /// Number of distinct non-NULL values, if known.
    pub num_distinct: Option<u32>,
    /// Number of NULL values.
    pub num_null: u32,
    /// Minimum non-NULL value.  Never collected for string columns.
    pub min: Option<Value>,
    /// Maximum non-NULL value.  Never collected for string columns.
    pub max: Option<Value>,
}

impl ColumnStats {
    /// Statistics for a column that has never been analyzed.
    #[must_use]
    pub fn unknown() -> Self {
        Self {
            num_distinct: None,
            num_null: 0,
            min: None,
            max: None,
        }
    }
}

/// Statistics describing a heap file.
#[derive(Debug, Clone, PartialEq)]
pub struct TableStats {
    /// Number of data pages in the file.
    pub num_pages: u32,
    /// Number of live tuples.
    pub num_tuples: u32,
    /// Average tuple storage size in bytes.
    pub avg_tuple_size: f32,
    /// Per-column statistics, in schema order.
    pub column_stats: Vec<ColumnStats>,
}

impl TableStats {
    /// Statistics for a table that has never been analyzed.
    #[must_use]
    pub fn unknown(num_columns: usize) -> Self {
        Self {
            num_pages: 0,
            num_tuples: 0,
            avg_tuple_size: 0.0,
            column_stats: vec![ColumnStats::unknown(); num_columns],
        }
    }
}

/// Accumulates one column's statistics during a table scan.
pub struct ColumnStatsCollector {
    col_type: ColumnType,
    distinct: HashSet<Vec<u8>>,
    num_null: u32,
    min: Option<Value>,
    max: Option<Value>,
}

impl ColumnStatsCollector {
    /// Creates a collector for a column of the given type.
    #[must_use]
    pub fn new(col_type: ColumnType) -> Self {
        Self {
            col_type,
            distinct: HashSet::new(),
            num_null: 0,
            min: None,
            max: None,
        }
    }

    /// Feeds one value into the collector.
    pub fn add_value(&mut self, value: &Value) {
        if value.is_null() {
            self.num_null += 1;
            return;
        }

        self.distinct.insert(value.to_storage_bytes());

        if self.col_type.is_string() {
            return;
        }
        let replace_min = match &self.min {
            None => true,
            Some(min) => value.compare(min) == Some(std::cmp::Ordering::Less),
        };
        if replace_min {
            self.min = Some(value.clone());
        }
        let replace_max = match &self.max {
            None => true,
            Some(max) => value.compare(max) == Some(std::cmp::Ordering::Greater),
        };
        if replace_max {
            self.max = Some(value.clone());
        }
    }

    /// Finalizes the collected statistics.
    #[must_use]
    pub fn into_stats(self) -> ColumnStats {
        ColumnStats {
            num_distinct: Some(self.distinct.len() as u32),
            num_null: self.num_null,
            min: self.min,
            max: self.max,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_column() {
        let mut collector = ColumnStatsCollector::new(ColumnType::Integer);
        for v in [3, 1, 4, 1, 5, 9, 2, 6, 5, 3] {
            collector.add_value(&Value::Integer(v));
        }
        collector.add_value(&Value::Null);

        let stats = collector.into_stats();
        assert_eq!(stats.num_distinct, Some(7));
        assert_eq!(stats.num_null, 1);
        assert_eq!(stats.min, Some(Value::Integer(1)));
        assert_eq!(stats.max, Some(Value::Integer(9)));
    }

    #[test]
    fn test_string_column_skips_min_max() {
        let mut collector = ColumnStatsCollector::new(ColumnType::Varchar { max_length: 10 });
        collector.add_value(&Value::Varchar("b".into()));
        collector.add_value(&Value::Varchar("a".into()));

        let stats = collector.into_stats();
        assert_eq!(stats.num_distinct, Some(2));
        assert!(stats.min.is_none());
        assert!(stats.max.is_none());
    }

    #[test]
    fn test_all_nulls() {
        let mut collector = ColumnStatsCollector::new(ColumnType::Double);
        collector.add_value(&Value::Null);
        collector.add_value(&Value::Null);

        let stats = collector.into_stats();
        assert_eq!(stats.num_distinct, Some(0));
        assert_eq!(stats.num_null, 2);
        assert!(stats.min.is_none());
    }
}
