use super::Dialect;

/// SQLite dialect implementation of the `Dialect` trait.
pub struct SqliteDialect;

impl Dialect for SqliteDialect {
    fn placeholder(_idx: usize) -> String {
        "?".to_string()
    }

    fn contains_text(haystack: &str, needle: &str) -> String {
        format!("instr(COALESCE({haystack}, ''), {needle}) > 0")
    }
}
