use crate::dialect::{CurrentDialect, CurrentRow, Db, Dialect};
use crate::page::AsyncSource;
use crate::query::Filter;
use crate::sql::{CompileError, ROOT_ALIAS, SqlParam, compile};
use crate::types::{EntityRef, EntitySchema, ValueType};
use crate::value::{Record, Value};
use chrono::{DateTime, Utc};
pub use sqlx::Pool;
use sqlx::sqlite::SqliteArguments;
use sqlx::{Arguments, Row};
use thiserror::Error;

/// A filtered-read abstraction over tables described by [`EntitySchema`]s.
///
/// This struct wraps an SQLx connection pool. Filters are compiled to SQL by
/// [`crate::sql`]; syntax differences are delegated to `Dialect`.
/// Failures are returned as they come, without retrying.
#[derive(Debug, Clone)]
pub struct Database {
    pool: Pool<Db>,
}

impl Database {
    pub fn new(pool: Pool<Db>) -> Self {
        Self { pool }
    }

    /// Creates the table backing `schema` if it does not exist yet.
    pub async fn create_table(&self, schema: &EntitySchema) -> Result<(), DatabaseError> {
        let stmt = CurrentDialect::create_table_statement(schema);

        sqlx::query(&stmt)
            .execute(&self.pool)
            .await
            .map_err(|e| DatabaseError::QueryFailed {
                operation: DbOperation::CreateTable {
                    table: schema.table().to_string(),
                },
                sql: stmt.clone(),
                source: e,
            })?;

        Ok(())
    }

    /// Inserts `record` into the table backing `schema`.
    ///
    /// Every column of the table is written; fields missing from the record
    /// are stored as NULL.
    pub async fn insert(&self, schema: &EntitySchema, record: &Record) -> Result<(), DatabaseError> {
        let columns: Vec<&str> = columns(schema).collect();
        let params = columns
            .iter()
            .map(|column| SqlParam::try_from(record.get(column).unwrap_or(&Value::Null)))
            .collect::<Result<Vec<_>, _>>()?;
        let stmt = CurrentDialect::insert_statement(schema.table(), &columns);
        let operation = || DbOperation::Insert {
            table: schema.table().to_string(),
        };

        let args = arguments(&params).map_err(|e| DatabaseError::QueryFailed {
            operation: operation(),
            sql: stmt.clone(),
            source: e,
        })?;

        sqlx::query_with::<Db, _>(&stmt, args)
            .execute(&self.pool)
            .await
            .map_err(|e| DatabaseError::QueryFailed {
                operation: operation(),
                sql: stmt.clone(),
                source: e,
            })?;

        Ok(())
    }

    /// Counts the rows of `schema`'s table that pass `filter`.
    pub async fn count(&self, schema: &EntitySchema, filter: &Filter) -> Result<u64, DatabaseError> {
        let (condition, params) = compile::<CurrentDialect>(filter)?;
        let stmt = CurrentDialect::count_statement(schema.table(), ROOT_ALIAS, &condition);
        let operation = || DbOperation::Count {
            table: schema.table().to_string(),
        };

        tracing::debug!(sql = %stmt, "counting rows");

        let args = arguments(&params).map_err(|e| DatabaseError::QueryFailed {
            operation: operation(),
            sql: stmt.clone(),
            source: e,
        })?;

        let count: i64 = sqlx::query_scalar_with::<Db, i64, _>(&stmt, args)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| DatabaseError::QueryFailed {
                operation: operation(),
                sql: stmt.clone(),
                source: e,
            })?;

        Ok(count.max(0) as u64)
    }

    /// Returns every row of `schema`'s table that passes `filter`, ordered by key.
    pub async fn fetch(&self, schema: &EntitySchema, filter: &Filter) -> Result<Vec<Record>, DatabaseError> {
        let (condition, params) = compile::<CurrentDialect>(filter)?;
        let stmt = CurrentDialect::select_all_statement(
            schema.table(),
            ROOT_ALIAS,
            &condition,
            schema.key(),
        );

        self.select(schema, stmt, params).await
    }

    /// Returns at most `take` rows passing `filter`, after skipping `skip`.
    pub async fn window(
        &self,
        schema: &EntitySchema,
        filter: &Filter,
        skip: u64,
        take: u32,
    ) -> Result<Vec<Record>, DatabaseError> {
        let (condition, mut params) = compile::<CurrentDialect>(filter)?;
        let stmt = CurrentDialect::select_window_statement(
            schema.table(),
            ROOT_ALIAS,
            &condition,
            schema.key(),
            params.len() + 1,
            params.len() + 2,
        );
        params.push(SqlParam::Int(take.into()));
        params.push(SqlParam::Int(i64::try_from(skip).unwrap_or(i64::MAX)));

        self.select(schema, stmt, params).await
    }

    async fn select(
        &self,
        schema: &EntitySchema,
        stmt: String,
        params: Vec<SqlParam>,
    ) -> Result<Vec<Record>, DatabaseError> {
        let operation = || DbOperation::Select {
            table: schema.table().to_string(),
        };

        tracing::debug!(sql = %stmt, params = params.len(), "selecting rows");

        let args = arguments(&params).map_err(|e| DatabaseError::QueryFailed {
            operation: operation(),
            sql: stmt.clone(),
            source: e,
        })?;

        sqlx::query_with::<Db, _>(&stmt, args)
            .fetch_all(&self.pool)
            .await
            .and_then(|rows| rows.iter().map(|row| decode(schema, row)).collect())
            .map_err(|e| DatabaseError::QueryFailed {
                operation: operation(),
                sql: stmt.clone(),
                source: e,
            })
    }

    /// Starts a read of the table backing `schema`.
    pub fn table(&self, schema: EntityRef) -> TableQuery<'_> {
        TableQuery {
            db: self,
            schema,
            filter: Filter::All,
        }
    }
}

/// The rows of one table passing a filter, readable as a paged source.
#[derive(Debug, Clone)]
pub struct TableQuery<'a> {
    db: &'a Database,
    schema: EntityRef,
    filter: Filter,
}

impl TableQuery<'_> {
    pub fn filter<F: Into<Filter>>(mut self, filter: F) -> Self {
        self.filter = filter.into();
        self
    }

    pub async fn fetch_all(&self) -> Result<Vec<Record>, DatabaseError> {
        self.db.fetch(&self.schema, &self.filter).await
    }
}

impl AsyncSource for TableQuery<'_> {
    type Item = Record;
    type Error = DatabaseError;

    async fn count(&self) -> Result<u64, Self::Error> {
        self.db.count(&self.schema, &self.filter).await
    }

    async fn window(&self, skip: u64, take: u32) -> Result<Vec<Record>, Self::Error> {
        self.db.window(&self.schema, &self.filter, skip, take).await
    }
}

/// Names of the fields of `schema` that are stored as columns.
fn columns(schema: &EntitySchema) -> impl Iterator<Item = &str> {
    schema
        .fields()
        .iter()
        .filter(|field| CurrentDialect::column_type(&field.ty).is_some())
        .map(|field| field.name.as_str())
}

fn arguments(params: &[SqlParam]) -> Result<SqliteArguments<'_>, sqlx::Error> {
    let mut args = SqliteArguments::default();
    for param in params {
        let added = match param {
            SqlParam::Null => args.add(Option::<String>::None),
            SqlParam::Bool(b) => args.add(*b),
            SqlParam::Int(i) => args.add(*i),
            SqlParam::Float(x) => args.add(*x),
            SqlParam::Text(s) => args.add(s.as_str()),
            SqlParam::DateTime(dt) => args.add(dt.to_rfc3339()),
        };
        added.map_err(sqlx::Error::Encode)?;
    }
    Ok(args)
}

fn decode(schema: &EntitySchema, row: &CurrentRow) -> Result<Record, sqlx::Error> {
    schema
        .fields()
        .iter()
        .filter(|field| CurrentDialect::column_type(&field.ty).is_some())
        .map(|field| -> Result<(String, Value), sqlx::Error> {
            let column = field.name.as_str();
            let value: Value = match &field.ty {
                ValueType::Bool => row.try_get::<Option<bool>, _>(column)?.into(),
                ValueType::Int => row.try_get::<Option<i64>, _>(column)?.into(),
                ValueType::Float => row.try_get::<Option<f64>, _>(column)?.into(),
                ValueType::DateTime => match row.try_get::<Option<String>, _>(column)? {
                    Some(text) => DateTime::parse_from_rfc3339(&text)
                        .map(|dt| Value::DateTime(dt.with_timezone(&Utc)))
                        .unwrap_or(Value::Text(text)),
                    None => Value::Null,
                },
                _ => row.try_get::<Option<String>, _>(column)?.into(),
            };
            Ok((field.name.clone(), value))
        })
        .collect()
}

/// Represents errors that can occur during database operations.
///
/// Each variant includes contextual information to assist with debugging and error handling.
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// The filter has no SQL rendering.
    #[error("Failed to compile filter")]
    Compile(#[from] CompileError),

    /// A general SQL query failure, with full context including operation and SQL.
    #[error("Query failed during {operation:?}: sql={sql}")]
    QueryFailed {
        operation: DbOperation,
        sql: String,
        #[source]
        source: sqlx::Error,
    },
}

/// Enum representing the kind of database operation being performed,
/// used for attaching context to [`DatabaseError::QueryFailed`].
#[derive(Debug)]
pub enum DbOperation {
    /// CREATE TABLE IF NOT EXISTS ...
    CreateTable { table: String },
    /// INSERT INTO ...
    Insert { table: String },
    /// SELECT COUNT(*) FROM ... WHERE ...
    Count { table: String },
    /// SELECT ... FROM ... WHERE ...
    Select { table: String },
}

#[cfg(test)]
mod tests {
    use crate::{
        condition::tests::{header_schema, line_schema},
        condition::{Condition, FieldProjection, Subquery},
        database::{Database, DatabaseError, Db, Pool},
        membership::{ValueSet, member_of},
        memory::tests::{Header, null_sensitive_conditions, sample_headers},
        memory::Table,
        page::{AsyncSource, paginate_async, paginate_async_with},
        query::{Filter, combine_and, combine_or},
        search::search_any,
        sql::CompileError,
        value::{Record, Value},
    };
    use sqlx::sqlite::SqlitePoolOptions;
    use std::num::NonZeroU32;

    /// Returns an in-memory SQLite connection pool for testing.
    ///
    /// A single connection keeps every query on the same in-memory database.
    async fn get_pool() -> Pool<Db> {
        SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap()
    }

    /// Creates the headers and lines tables and loads the sample data.
    async fn sample_database() -> Database {
        database_with(sample_headers()).await
    }

    async fn database_with(headers: Vec<Header>) -> Database {
        let db = Database::new(get_pool().await);
        db.create_table(&header_schema()).await.unwrap();
        db.create_table(&line_schema()).await.unwrap();

        for header in headers {
            let row = Record::new().with("id", header.id).with("name", header.name);
            db.insert(&header_schema(), &row).await.unwrap();

            for line in header.lines {
                let row = Record::new()
                    .with("id", line.id)
                    .with("header_id", line.header_id)
                    .with("description", line.description)
                    .with("disabled", line.disabled);
                db.insert(&line_schema(), &row).await.unwrap();
            }
        }

        db
    }

    fn ids(rows: &[Record]) -> Vec<i64> {
        rows.iter()
            .filter_map(|row| match row.get("id") {
                Some(Value::Int(id)) => Some(*id),
                _ => None,
            })
            .collect()
    }

    fn names(rows: &[Record]) -> Vec<String> {
        rows.iter()
            .filter_map(|row| row.get("name").and_then(Value::as_text))
            .map(str::to_string)
            .collect()
    }

    #[tokio::test]
    async fn test_search_name_and_lines() {
        let db = sample_database().await;
        let projections = vec![
            FieldProjection::path(header_schema(), "name").unwrap(),
            FieldProjection::path(header_schema(), "lines.description").unwrap(),
        ];
        let condition = search_any(Some("First line"), &projections).unwrap();

        let rows = db
            .table(header_schema())
            .filter(condition)
            .fetch_all()
            .await
            .unwrap();

        assert_eq!(vec!["Hello world", "Bye!", "First line"], names(&rows));
    }

    #[tokio::test]
    async fn test_member_of_in_memory_values() {
        let db = sample_database().await;
        let description = FieldProjection::on(line_schema(), |x| x.field("description")).unwrap();
        let values = ValueSet::texts(vec!["Line A", "Line X"]);
        let condition = member_of(Some(&values), &description).unwrap();

        let rows = db.table(line_schema()).filter(condition).fetch_all().await.unwrap();

        assert_eq!(2, rows.len());
    }

    #[tokio::test]
    async fn test_member_of_remote_values() {
        let db = sample_database().await;
        let ids = FieldProjection::on(line_schema(), |x| x.field("id")).unwrap();
        let enabled =
            Condition::on(line_schema(), |x| Ok(x.field("disabled")?.eq(false))).unwrap();
        let values = ValueSet::remote(Subquery::new(ids.clone()).unwrap().filter(enabled).unwrap());
        let condition = member_of(Some(&values), &ids).unwrap();

        let lines = db.table(line_schema()).filter(condition);

        assert_eq!(5, lines.count().await.unwrap());
        for row in lines.fetch_all().await.unwrap() {
            assert_eq!(Some(&Value::Bool(false)), row.get("disabled"));
        }
    }

    #[tokio::test]
    async fn test_member_of_empty_remote_values_matches_all() {
        let db = sample_database().await;
        let ids = FieldProjection::on(line_schema(), |x| x.field("id")).unwrap();
        let none = Condition::on(line_schema(), |x| Ok(x.field("id")?.gt(100))).unwrap();
        let values = ValueSet::remote(Subquery::new(ids.clone()).unwrap().filter(none).unwrap());
        let condition = member_of(Some(&values), &ids).unwrap();

        let lines = db.table(line_schema()).filter(condition);

        assert_eq!(8, lines.count().await.unwrap());
    }

    #[tokio::test]
    async fn test_database_agrees_with_memory() {
        let mut headers = sample_headers();
        headers[1].name = None;
        let db = database_with(headers.clone()).await;
        let table = Table::new(headers);
        let line = Condition::on(header_schema(), |x| {
            x.field("lines")?
                .any("l", |l| Ok(l.field("disabled")?.eq(true)))
        })
        .unwrap();
        let name = Condition::on(header_schema(), |x| x.field("name")?.contains("e")).unwrap();

        let mut filters = vec![
            combine_and(vec![line.clone(), name.clone()]).unwrap(),
            combine_or(vec![line, name]).unwrap(),
            Filter::All,
        ];
        let mut expected_ids = vec![None, None, None];
        for (condition, expected) in null_sensitive_conditions() {
            filters.push(condition.into());
            expected_ids.push(Some(expected));
        }

        for (filter, expected) in filters.into_iter().zip(expected_ids) {
            let in_memory: Vec<i64> = table.filter(&filter).unwrap().iter().map(|h| h.id).collect();
            let label = filter.to_string();
            let rows = db.table(header_schema()).filter(filter).fetch_all().await.unwrap();

            assert_eq!(in_memory, ids(&rows), "{label}");
            if let Some(expected) = expected {
                assert_eq!(expected, in_memory, "{label}");
            }
        }
    }

    #[tokio::test]
    async fn test_pagination() {
        let db = Database::new(get_pool().await);
        db.create_table(&header_schema()).await.unwrap();
        for i in 0..100 {
            let row = Record::new()
                .with("id", i)
                .with("name", format!("Header number {i}"));
            db.insert(&header_schema(), &row).await.unwrap();
        }
        let headers = db.table(header_schema());
        let size = NonZeroU32::new(5).unwrap();

        let first = paginate_async(&headers, 1, size).await.unwrap();
        let past = paginate_async(&headers, 21, size).await.unwrap();
        let names = paginate_async_with(&headers, 0, size, |row| {
            row.get("name").and_then(Value::as_text).map(str::to_string)
        })
        .await
        .unwrap();

        assert_eq!(
            (1, 20, 100, 5),
            (first.current_page, first.total_pages, first.total_count, first.items.len())
        );
        assert!(past.items.is_empty());
        assert_eq!(20, past.total_pages);
        assert_eq!(0, names.current_page);
        assert_eq!(Some("Header number 0".to_string()), names.items[0]);
    }

    #[tokio::test]
    async fn test_uncompilable_filter() {
        let db = sample_database().await;
        let projections = vec![FieldProjection::path(header_schema(), "tags").unwrap()];
        let condition = search_any(Some("a"), &projections).unwrap();

        let result = db.table(header_schema()).filter(condition).fetch_all().await;

        assert!(matches!(
            result,
            Err(DatabaseError::Compile(CompileError::Unsupported { .. }))
        ));
    }
}
