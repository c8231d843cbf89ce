use super::Dialect;
use crate::types::ValueType;

/// Postgres dialect implementation of the `Dialect` trait.
pub struct PostgresDialect;

impl Dialect for PostgresDialect {
    fn placeholder(idx: usize) -> String {
        format!("${idx}")
    }

    fn boolean(value: bool) -> &'static str {
        if value { "TRUE" } else { "FALSE" }
    }

    fn contains_text(haystack: &str, needle: &str) -> String {
        format!("strpos(COALESCE({haystack}, ''), {needle}) > 0")
    }

    fn column_type(ty: &ValueType) -> Option<&'static str> {
        match ty {
            ValueType::Bool => Some("BOOLEAN"),
            ValueType::Int => Some("BIGINT"),
            ValueType::Float => Some("DOUBLE PRECISION"),
            ValueType::DateTime => Some("TIMESTAMPTZ"),
            ValueType::Text | ValueType::Any => Some("TEXT"),
            _ => None,
        }
    }
}
