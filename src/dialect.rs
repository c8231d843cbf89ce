//! # SQL Dialect Module
//!
//! This module defines the `Dialect` trait, which abstracts over the differences in
//! SQL syntax across database systems. The SQL compiler ([`crate::sql`]) only ever
//! emits dialect-neutral structure and asks the dialect for placeholders, literals,
//! text containment and the surrounding statements.
//!
//! The database layer picks a dialect at compile time through `CurrentDialect`,
//! driven by feature flags. When the `sqlite` feature is enabled, `CurrentDialect`
//! is `SqliteDialect`. `PostgresDialect` is always available for generating
//! statement text.

mod postgres;
#[cfg(feature = "sqlite")]
mod sqlite;

pub use postgres::PostgresDialect;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteDialect;

use crate::types::{EntitySchema, ValueType};

/// The current SQL dialect used at compile time, determined by feature flags.
#[cfg(feature = "sqlite")]
pub type CurrentDialect = sqlite::SqliteDialect;

#[cfg(feature = "sqlite")]
pub type Db = sqlx::Sqlite;

#[cfg(feature = "sqlite")]
pub type CurrentRow = sqlx::sqlite::SqliteRow;

/// A trait for SQL dialects to support database-specific query generation.
///
/// Every method is a static function returning SQL text; implementors only
/// override what differs from the defaults.
pub trait Dialect {
    /// Returns the SQL placeholder syntax for the given parameter index.
    ///
    /// - SQLite: `?`
    /// - PostgreSQL: `$1`, `$2`, ...
    ///
    /// # Parameters
    /// - `idx`: The 1-based parameter index (used in dialects that number placeholders).
    fn placeholder(idx: usize) -> String;

    /// Quotes an identifier such as a table or column name.
    fn quote(ident: &str) -> String {
        format!("\"{}\"", ident.replace('"', "\"\""))
    }

    /// Renders a boolean literal.
    fn boolean(value: bool) -> &'static str {
        if value { "1" } else { "0" }
    }

    /// Returns a boolean expression testing whether `haystack` contains
    /// `needle`. A NULL haystack reads as the empty string.
    fn contains_text(haystack: &str, needle: &str) -> String;

    /// Converts a scalar expression to text.
    fn cast_text(expr: &str) -> String {
        format!("CAST({expr} AS TEXT)")
    }

    /// Returns the column type used to store values of `ty`, or `None` if
    /// such values are not stored as a column.
    fn column_type(ty: &ValueType) -> Option<&'static str> {
        match ty {
            ValueType::Bool => Some("BOOLEAN"),
            ValueType::Int => Some("INTEGER"),
            ValueType::Float => Some("REAL"),
            ValueType::Text | ValueType::DateTime | ValueType::Any => Some("TEXT"),
            _ => None,
        }
    }

    /// Returns the statement creating the table backing `schema`.
    ///
    /// Only scalar fields get a column; relation fields live in the child
    /// table.
    fn create_table_statement(schema: &EntitySchema) -> String {
        let columns: Vec<String> = schema
            .fields()
            .iter()
            .filter_map(|field| {
                let ty = Self::column_type(&field.ty)?;
                let key = if field.name == schema.key() {
                    " PRIMARY KEY"
                } else {
                    ""
                };
                Some(format!("{} {ty}{key}", Self::quote(&field.name)))
            })
            .collect();

        format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            Self::quote(schema.table()),
            columns.join(", ")
        )
    }

    /// Returns the statement inserting one row into `table`.
    fn insert_statement(table: &str, columns: &[&str]) -> String {
        let names: Vec<String> = columns.iter().map(|c| Self::quote(c)).collect();
        let values: Vec<String> = (1..=columns.len()).map(Self::placeholder).collect();

        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            Self::quote(table),
            names.join(", "),
            values.join(", ")
        )
    }

    /// Returns a SELECT statement reading one window of the rows of `table`
    /// (aliased `alias`) that satisfy `condition`, ordered by `key`.
    ///
    /// # Parameters
    /// - `limit_idx`, `offset_idx`: placeholder indices of the window bounds.
    fn select_window_statement(
        table: &str,
        alias: &str,
        condition: &str,
        key: &str,
        limit_idx: usize,
        offset_idx: usize,
    ) -> String {
        format!(
            "SELECT {alias}.* FROM {} AS {alias} WHERE {condition} ORDER BY {alias}.{} LIMIT {} OFFSET {}",
            Self::quote(table),
            Self::quote(key),
            Self::placeholder(limit_idx),
            Self::placeholder(offset_idx)
        )
    }

    /// Returns a SELECT statement reading every row of `table` that satisfies
    /// `condition`, ordered by `key`.
    fn select_all_statement(table: &str, alias: &str, condition: &str, key: &str) -> String {
        format!(
            "SELECT {alias}.* FROM {} AS {alias} WHERE {condition} ORDER BY {alias}.{}",
            Self::quote(table),
            Self::quote(key)
        )
    }

    /// Returns the statement counting the rows of `table` that satisfy `condition`.
    fn count_statement(table: &str, alias: &str, condition: &str) -> String {
        format!(
            "SELECT COUNT(*) FROM {} AS {alias} WHERE {condition}",
            Self::quote(table)
        )
    }
}
