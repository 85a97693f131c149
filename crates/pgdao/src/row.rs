//! Row mapping traits and utilities

use crate::error::DaoResult;
use tokio_postgres::Row;

/// Trait for converting a database row into a Rust struct.
///
/// Generated per-table accessor code implements this for its model types;
/// anything implementing it can be used as a scan destination.
pub trait FromRow: Sized {
    /// Convert a database row into Self
    fn from_row(row: &Row) -> DaoResult<Self>;
}

/// Extension trait for Row to provide typed access
pub trait RowExt {
    /// Try to get a column value, returning `DaoError::Decode` on failure
    fn try_get_column<T>(&self, column: &str) -> DaoResult<T>
    where
        T: for<'a> tokio_postgres::types::FromSql<'a>;
}

impl RowExt for Row {
    fn try_get_column<T>(&self, column: &str) -> DaoResult<T>
    where
        T: for<'a> tokio_postgres::types::FromSql<'a>,
    {
        self.try_get(column)
            .map_err(|e| crate::error::DaoError::decode(column, e.to_string()))
    }
}

/// Map already-fetched rows into any row-mappable type. The first decode
/// failure aborts the mapping and is returned verbatim.
pub fn scan_rows<T: FromRow>(rows: &[Row]) -> DaoResult<Vec<T>> {
    rows.iter().map(T::from_row).collect()
}
