//! # Predicate Composition and Pagination
//!
//! This crate builds boolean conditions over rows as inspectable data, combines
//! independently written conditions into one, and pages through the rows that
//! pass them. The same condition can run in memory or be compiled to SQL.
//!
//! ## Features
//!
//! - **Conditions as data**: [`condition::Condition`] trees carry static types,
//!   so they can be checked, rewritten and compiled before any row is read.
//! - **Combining**: [`query::combine_and`] and [`query::combine_or`] rebind every
//!   condition onto one shared input (see [`rebind`]) and fold them in order.
//! - **Substring search**: [`search::search_any`] matches a value against text,
//!   scalar and sequence-valued projections.
//! - **Membership**: [`membership::member_of`] tests a projection against an
//!   in-memory or remote set. An absent or empty set matches every row.
//! - **Operation resolution**: containment and membership operations are
//!   chosen from a statically registered table by [`capability`].
//! - **Paging**: [`page::paginate`] and [`page::paginate_async`] window any
//!   countable source.
//! - **Execution**: [`memory`] evaluates conditions against rows in memory;
//!   `database` runs them through SQLx after [`sql`] compiles them.
//!
//! ## Usage
//!
//! ```rust
//! use querykit::condition::FieldProjection;
//! use querykit::memory::Table;
//! use querykit::search::search_any;
//! use querykit::value::Record;
//!
//! let rows = vec![
//!     Record::new().with("id", 1).with("name", "Hello world"),
//!     Record::new().with("id", 2).with("name", "Bye!"),
//! ];
//! let schema = Record::infer_schema("greetings", &rows).into_ref();
//! let table = Table::new(rows);
//!
//! let name = FieldProjection::path(schema, "name").unwrap();
//! let condition = search_any(Some("world"), &[name]).unwrap();
//!
//! let matched = table.filter(&condition.into()).unwrap();
//! assert_eq!(1, matched.len());
//! ```

pub mod capability;
pub mod condition;
#[cfg(feature = "sqlite")]
pub mod database;
pub mod dialect;
pub mod membership;
pub mod memory;
pub mod page;
pub mod query;
pub mod rebind;
pub mod search;
pub mod sql;
pub mod types;
pub mod value;

pub mod prelude {
    pub use crate::condition::{BoolOp, BuildError, Condition, Expr, FieldProjection, Subquery};
    pub use crate::membership::{ValueSet, member_of};
    pub use crate::page::{PagedResult, paginate, paginate_async, paginate_with};
    pub use crate::query::{Filter, combine_and, combine_or};
    pub use crate::search::search_any;
    pub use crate::types::{EntitySchema, ValueType};
    pub use crate::value::{Entity, FieldAccess, Record, Value};
}
