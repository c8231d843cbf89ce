//! # SQL Compilation
//!
//! Turns a [`Filter`] into a WHERE-clause fragment plus the parameters to
//! bind, for any [`Dialect`]. The input row is aliased [`ROOT_ALIAS`].
//!
//! | Condition node | SQL |
//! |---|---|
//! | `x.field` | `t0."field"` |
//! | `text.contains(v)` | dialect text containment, NULL reads as `''` |
//! | `x.children.any(c => ..)` | `EXISTS (SELECT 1 FROM children AS t1 WHERE t1.fk = t0.key AND ..)` |
//! | `[a, b].contains(v)` | `v IN (?, ?)` |
//! | `Entity.where(..).select(..).contains(v)` | `v IN (SELECT .. FROM .. WHERE ..)` |
//! | `(v as Text)` | `CAST(v AS TEXT)` |
//!
//! Sequence fields only compile when they are relations (see
//! [`crate::types::EntitySchema::with_relation`]). Raw fragments are copied
//! verbatim and cannot carry bound parameters.
//!
//! Parameters are marked in the text while compiling and numbered at the
//! end, so raw fragments and identifiers may not contain the mark
//! characters `U+0001` and `U+0002`.

use crate::capability::Owner;
use crate::condition::{BoolOp, CompareOp, Condition, Expr, Lambda, Symbol};
use crate::dialect::Dialect;
use crate::query::Filter;
use crate::types::{EntityRef, ValueType};
use crate::value::Value;
use chrono::{DateTime, Utc};
use std::marker::PhantomData;
use thiserror::Error;

/// Alias of the table holding the filtered rows.
pub const ROOT_ALIAS: &str = "t0";

const MARK_OPEN: char = '\u{1}';
const MARK_CLOSE: char = '\u{2}';

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CompileError {
    #[error("{construct} has no SQL rendering")]
    Unsupported { construct: String },

    #[error("symbol {name} is not bound")]
    Unbound { name: String },
}

fn unsupported(construct: impl ToString) -> CompileError {
    CompileError::Unsupported {
        construct: construct.to_string(),
    }
}

/// Checks text that is copied into the statement as is.
fn unmarked<'a>(what: &str, text: &'a str) -> Result<&'a str, CompileError> {
    if text.contains([MARK_OPEN, MARK_CLOSE]) {
        return Err(unsupported(format!("{what} {text:?} with control characters")));
    }
    Ok(text)
}

fn quoted<D: Dialect>(name: &str) -> Result<String, CompileError> {
    Ok(D::quote(unmarked("the identifier", name)?))
}

/// A value bound to a statement parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    DateTime(DateTime<Utc>),
}

impl TryFrom<&Value> for SqlParam {
    type Error = CompileError;

    fn try_from(value: &Value) -> Result<Self, Self::Error> {
        Ok(match value {
            Value::Null => SqlParam::Null,
            Value::Bool(b) => SqlParam::Bool(*b),
            Value::Int(i) => SqlParam::Int(*i),
            Value::Float(x) => SqlParam::Float(*x),
            Value::Text(s) => SqlParam::Text(s.clone()),
            Value::DateTime(dt) => SqlParam::DateTime(*dt),
            other => return Err(unsupported(format!("the value {other}"))),
        })
    }
}

/// Compiles `filter` into a WHERE-clause fragment and its parameters.
///
/// [`Filter::All`] compiles to the dialect's `true` literal.
pub fn compile<D: Dialect>(filter: &Filter) -> Result<(String, Vec<SqlParam>), CompileError> {
    match filter {
        Filter::All => Ok((D::boolean(true).to_string(), vec![])),
        Filter::Where(condition) => SqlBuilder::<D>::new().condition(condition),
    }
}

#[derive(Debug, Clone)]
enum Binding {
    Table { alias: String, schema: EntityRef },
    Scalar(String),
}

/// A sequence read from a table: `FROM table AS alias WHERE conditions`,
/// producing `element` per row. `table` is already quoted.
struct SetSource {
    table: String,
    alias: String,
    conditions: Vec<String>,
    element: Binding,
}

impl SetSource {
    fn from_where<D: Dialect>(&self) -> String {
        let mut sql = format!("FROM {} AS {}", self.table, self.alias);
        if !self.conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&self.conditions.join(" AND "));
        }
        sql
    }
}

struct SqlBuilder<D> {
    params: Vec<SqlParam>,
    scope: Vec<(String, Binding)>,
    next_alias: usize,
    _dialect: PhantomData<D>,
}

impl<D: Dialect> SqlBuilder<D> {
    fn new() -> Self {
        Self {
            params: vec![],
            scope: vec![],
            next_alias: 1,
            _dialect: PhantomData,
        }
    }

    fn condition(mut self, condition: &Condition) -> Result<(String, Vec<SqlParam>), CompileError> {
        let ty = condition.input().ty();
        let schema = ty
            .entity()
            .cloned()
            .ok_or_else(|| unsupported(format!("a condition over {ty}")))?;

        let root = Binding::Table {
            alias: ROOT_ALIAS.to_string(),
            schema,
        };
        let sql = self.with_binding(condition.input(), root, |b| b.expr(condition.body()))?;

        Ok(self.finish(sql))
    }

    /// Replaces parameter marks with the dialect's placeholders, numbering
    /// them in the order they appear in the text.
    fn finish(self, sql: String) -> (String, Vec<SqlParam>) {
        let mut out = String::with_capacity(sql.len());
        let mut params = Vec::with_capacity(self.params.len());
        let mut rest = sql.as_str();

        while let Some(start) = rest.find(MARK_OPEN) {
            out.push_str(&rest[..start]);
            let tail = &rest[start + MARK_OPEN.len_utf8()..];
            let mark = tail.find(MARK_CLOSE).and_then(|end| {
                let idx = tail[..end].parse::<usize>().ok()?;
                Some((self.params.get(idx)?, end))
            });

            match mark {
                Some((param, end)) => {
                    params.push(param.clone());
                    out.push_str(&D::placeholder(params.len()));
                    rest = &tail[end + MARK_CLOSE.len_utf8()..];
                }
                None => {
                    out.push(MARK_OPEN);
                    rest = tail;
                }
            }
        }
        out.push_str(rest);

        tracing::trace!(sql = %out, params = params.len(), "compiled condition");
        (out, params)
    }

    fn param(&mut self, param: SqlParam) -> String {
        self.params.push(param);
        format!("{MARK_OPEN}{}{MARK_CLOSE}", self.params.len() - 1)
    }

    fn alias(&mut self) -> String {
        let alias = format!("t{}", self.next_alias);
        self.next_alias += 1;
        alias
    }

    fn with_binding<T, F>(&mut self, symbol: &Symbol, binding: Binding, f: F) -> Result<T, CompileError>
    where
        F: FnOnce(&mut Self) -> Result<T, CompileError>,
    {
        self.scope.push((symbol.name().to_string(), binding));
        let result = f(self);
        self.scope.pop();
        result
    }

    fn lookup(&self, symbol: &Symbol) -> Result<&Binding, CompileError> {
        self.scope
            .iter()
            .rev()
            .find(|(name, _)| name == symbol.name())
            .map(|(_, binding)| binding)
            .ok_or_else(|| CompileError::Unbound {
                name: symbol.name().to_string(),
            })
    }

    /// Resolves an expression that must denote a table row.
    fn table_of(&self, expr: &Expr) -> Result<(String, EntityRef), CompileError> {
        match expr {
            Expr::Param(symbol) => match self.lookup(symbol)? {
                Binding::Table { alias, schema } => Ok((alias.clone(), schema.clone())),
                Binding::Scalar(_) => Err(unsupported(format!("field access on the scalar {symbol}"))),
            },
            other => Err(unsupported(format!("field access through {other}"))),
        }
    }

    fn literal(&mut self, value: &Value) -> Result<String, CompileError> {
        Ok(match value {
            Value::Null => "NULL".to_string(),
            Value::Bool(b) => D::boolean(*b).to_string(),
            other => {
                let param = SqlParam::try_from(other)?;
                self.param(param)
            }
        })
    }

    fn expr(&mut self, expr: &Expr) -> Result<String, CompileError> {
        match expr {
            Expr::Param(symbol) => match self.lookup(symbol)? {
                Binding::Scalar(sql) => Ok(sql.clone()),
                Binding::Table { .. } => Err(unsupported(format!("the whole row {symbol}"))),
            },
            Expr::Member { target, field, ty } => {
                if ty.is_sequence() {
                    return Err(unsupported(format!("the sequence field {field} used as a value")));
                }
                let (alias, _) = self.table_of(target)?;
                Ok(format!("{alias}.{}", quoted::<D>(field)?))
            }
            Expr::Constant { value, .. } => self.literal(value),
            Expr::Convert { operand, ty } => {
                let inner = self.expr(operand)?;
                match ty {
                    ValueType::Text if operand.ty() != ValueType::Text => Ok(D::cast_text(&inner)),
                    _ => Ok(inner),
                }
            }
            Expr::Compare { op, lhs, rhs } => {
                let lhs = self.expr(lhs)?;
                if let Expr::Constant {
                    value: Value::Null,
                    ..
                } = rhs.as_ref()
                {
                    match op {
                        CompareOp::Eq => return Ok(format!("({lhs} IS NULL)")),
                        CompareOp::Ne => return Ok(format!("({lhs} IS NOT NULL)")),
                        _ => {}
                    }
                }
                let rhs = self.expr(rhs)?;
                Ok(format!("({lhs} {} {rhs})", compare_sql(*op)))
            }
            Expr::Logical { op, lhs, rhs } => {
                let lhs = self.expr(lhs)?;
                let rhs = self.expr(rhs)?;
                let op = match op {
                    BoolOp::And => "AND",
                    BoolOp::Or => "OR",
                };
                Ok(format!("({lhs} {op} {rhs})"))
            }
            Expr::Not(inner) => Ok(format!("NOT ({})", self.expr(inner)?)),
            Expr::Call { op, args } => self.call(op.owner, &op.name, args),
            Expr::Raw { sql } => Ok(format!("({})", unmarked("raw SQL", sql)?)),
            Expr::Lambda(lambda) => Err(unsupported(format!("the function {lambda}"))),
            Expr::Subquery(subquery) => Err(unsupported(format!("the sub-query {subquery} used as a value"))),
        }
    }

    fn call(&mut self, owner: Owner, name: &str, args: &[Expr]) -> Result<String, CompileError> {
        match (owner, name, args) {
            (Owner::Text, "contains", [haystack, needle]) => {
                let haystack = self.expr(haystack)?;
                let needle = self.expr(needle)?;
                Ok(D::contains_text(&haystack, &needle))
            }
            (
                Owner::Sequence | Owner::Query,
                "contains",
                [
                    Expr::Constant {
                        value: Value::List(values),
                        ..
                    },
                    item,
                ],
            ) => {
                if values.is_empty() {
                    return Ok(D::boolean(false).to_string());
                }
                let item = self.expr(item)?;
                let values = values
                    .iter()
                    .map(|value| self.literal(value))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(format!("{item} IN ({})", values.join(", ")))
            }
            (Owner::Sequence | Owner::Query, "contains", [set, item]) => {
                let item = self.expr(item)?;
                let source = self.set_source(set)?;
                let Binding::Scalar(element) = &source.element else {
                    return Err(unsupported(format!("membership in the rows of {set}")));
                };
                Ok(format!(
                    "{item} IN (SELECT {element} {})",
                    source.from_where::<D>()
                ))
            }
            (Owner::Sequence | Owner::Query, "any", [set]) => {
                let source = self.set_source(set)?;
                Ok(format!("EXISTS (SELECT 1 {})", source.from_where::<D>()))
            }
            (Owner::Sequence | Owner::Query, "any", [set, Expr::Lambda(predicate)]) => {
                let mut source = self.set_source(set)?;
                let test = self.apply(predicate, source.element.clone())?;
                source.conditions.push(test);
                Ok(format!("EXISTS (SELECT 1 {})", source.from_where::<D>()))
            }
            _ => Err(unsupported(format!("the operation {owner}::{name}"))),
        }
    }

    fn apply(&mut self, lambda: &Lambda, binding: Binding) -> Result<String, CompileError> {
        self.with_binding(&lambda.param, binding, |b| b.expr(&lambda.body))
    }

    /// Like [`Self::apply`], but the body may also denote a whole row.
    fn apply_binding(&mut self, lambda: &Lambda, binding: Binding) -> Result<Binding, CompileError> {
        self.with_binding(&lambda.param, binding, |b| match &lambda.body {
            Expr::Param(symbol) => b.lookup(symbol).cloned(),
            body => Ok(Binding::Scalar(b.expr(body)?)),
        })
    }

    fn set_source(&mut self, expr: &Expr) -> Result<SetSource, CompileError> {
        match expr {
            Expr::Member { target, field, .. } => {
                let (parent_alias, parent) = self.table_of(target)?;
                let def = parent
                    .field(field)
                    .ok_or_else(|| unsupported(format!("the unknown field {field}")))?;
                let relation = def
                    .relation
                    .as_ref()
                    .ok_or_else(|| unsupported(format!("the sequence field {field} without a relation")))?;
                let child = def
                    .ty
                    .element()
                    .and_then(ValueType::entity)
                    .cloned()
                    .ok_or_else(|| unsupported(format!("the relation {field} of {}", def.ty)))?;

                let alias = self.alias();
                let correlation = format!(
                    "{alias}.{} = {parent_alias}.{}",
                    quoted::<D>(&relation.foreign_key)?,
                    quoted::<D>(parent.key())?
                );
                Ok(SetSource {
                    table: quoted::<D>(child.table())?,
                    conditions: vec![correlation],
                    element: Binding::Table {
                        alias: alias.clone(),
                        schema: child,
                    },
                    alias,
                })
            }
            Expr::Call { op, args } if op.name == "select" => match args.as_slice() {
                [receiver, Expr::Lambda(selector)] => {
                    let mut source = self.set_source(receiver)?;
                    source.element = self.apply_binding(selector, source.element.clone())?;
                    Ok(source)
                }
                _ => Err(unsupported(expr)),
            },
            Expr::Subquery(subquery) => {
                let alias = self.alias();
                let row = Binding::Table {
                    alias: alias.clone(),
                    schema: subquery.source.clone(),
                };
                let element = self.apply_binding(&subquery.select, row.clone())?;
                let conditions = match &subquery.filter {
                    Some(filter) => vec![self.apply(filter, row)?],
                    None => vec![],
                };
                Ok(SetSource {
                    table: quoted::<D>(subquery.source.table())?,
                    alias,
                    conditions,
                    element,
                })
            }
            other => Err(unsupported(format!("the sequence {other}"))),
        }
    }
}

fn compare_sql(op: CompareOp) -> &'static str {
    match op {
        CompareOp::Eq => "=",
        CompareOp::Ne => "<>",
        CompareOp::Lt => "<",
        CompareOp::Le => "<=",
        CompareOp::Gt => ">",
        CompareOp::Ge => ">=",
    }
}

#[cfg(test)]
mod tests {
    use super::{CompileError, SqlParam, compile};
    use crate::condition::tests::{header_schema, line_schema};
    use crate::condition::{Condition, Expr, FieldProjection, Subquery};
    use crate::dialect::PostgresDialect;
    #[cfg(feature = "sqlite")]
    use crate::dialect::SqliteDialect;
    use crate::types::{EntitySchema, ValueType};
    use crate::membership::{ValueSet, member_of};
    use crate::query::{Filter, combine_and};
    use crate::search::search_any;
    use crate::value::Value;

    fn text(s: &str) -> SqlParam {
        SqlParam::Text(s.to_string())
    }

    fn search(value: &str, paths: &[&str]) -> Filter {
        let projections: Vec<FieldProjection> = paths
            .iter()
            .map(|path| FieldProjection::path(header_schema(), path).unwrap())
            .collect();
        search_any(Some(value), &projections).unwrap().into()
    }

    #[test]
    #[cfg(feature = "sqlite")]
    fn test_compile_all() {
        assert_eq!(
            ("1".to_string(), vec![]),
            compile::<SqliteDialect>(&Filter::All).unwrap()
        );
    }

    #[test]
    fn test_compile_all_postgres() {
        assert_eq!(
            ("TRUE".to_string(), vec![]),
            compile::<PostgresDialect>(&Filter::All).unwrap()
        );
    }

    #[test]
    #[cfg(feature = "sqlite")]
    fn test_compile_search() {
        let (sql, params) =
            compile::<SqliteDialect>(&search("First line", &["name", "lines.description"])).unwrap();

        assert_eq!(
            r#"(instr(COALESCE(t0."name", ''), ?) > 0 OR EXISTS (SELECT 1 FROM "lines" AS t1 WHERE t1."header_id" = t0."id" AND instr(COALESCE(t1."description", ''), ?) > 0))"#,
            sql
        );
        assert_eq!(vec![text("First line"), text("First line")], params);
    }

    #[test]
    fn test_compile_search_postgres() {
        let (sql, params) = compile::<PostgresDialect>(&search("7", &["name", "id"])).unwrap();

        assert_eq!(
            r#"(strpos(COALESCE(t0."name", ''), $1) > 0 OR strpos(COALESCE(CAST(t0."id" AS TEXT), ''), $2) > 0)"#,
            sql
        );
        assert_eq!(vec![text("7"), text("7")], params);
    }

    #[test]
    #[cfg(feature = "sqlite")]
    fn test_compile_in_memory_membership() {
        let description = FieldProjection::on(line_schema(), |x| x.field("description")).unwrap();
        let values = ValueSet::texts(vec!["Line A", "Line X"]);
        let filter = member_of(Some(&values), &description).unwrap().into();

        let (sql, params) = compile::<SqliteDialect>(&filter).unwrap();

        assert_eq!(r#"t0."description" IN (?, ?)"#, sql);
        assert_eq!(vec![text("Line A"), text("Line X")], params);
    }

    #[test]
    #[cfg(feature = "sqlite")]
    fn test_compile_remote_membership() {
        let ids = FieldProjection::on(line_schema(), |x| x.field("id")).unwrap();
        let enabled =
            Condition::on(line_schema(), |x| Ok(x.field("disabled")?.eq(false))).unwrap();
        let values = ValueSet::remote(Subquery::new(ids.clone()).unwrap().filter(enabled).unwrap());
        let filter = member_of(Some(&values), &ids).unwrap().into();

        let (sql, params) = compile::<SqliteDialect>(&filter).unwrap();

        assert_eq!(
            r#"(NOT (EXISTS (SELECT 1 FROM "lines" AS t1 WHERE (t1."disabled" = 0))) OR t0."id" IN (SELECT t2."id" FROM "lines" AS t2 WHERE (t2."disabled" = 0)))"#,
            sql
        );
        assert!(params.is_empty());
    }

    #[test]
    fn test_placeholders_follow_text_order() {
        let names = Subquery::new(FieldProjection::on(line_schema(), |x| x.field("description")).unwrap())
            .unwrap()
            .filter(Condition::on(line_schema(), |x| Ok(x.field("id")?.gt(2))).unwrap())
            .unwrap();
        let header_name = FieldProjection::on(header_schema(), |x| x.field("name")).unwrap();
        let member = member_of(Some(&ValueSet::remote(names)), &header_name).unwrap();
        let recent = Condition::on(header_schema(), |x| Ok(x.field("id")?.lt(10))).unwrap();

        let filter = combine_and(vec![recent, member]).unwrap();
        let (sql, params) = compile::<PostgresDialect>(&filter).unwrap();

        assert_eq!(
            r#"((t0."id" < $1) AND (NOT (EXISTS (SELECT 1 FROM "lines" AS t1 WHERE (t1."id" > $2))) OR t0."name" IN (SELECT t2."description" FROM "lines" AS t2 WHERE (t2."id" > $3))))"#,
            sql
        );
        assert_eq!(
            vec![SqlParam::Int(10), SqlParam::Int(2), SqlParam::Int(2)],
            params
        );
    }

    #[test]
    #[cfg(feature = "sqlite")]
    fn test_compile_null_and_raw() {
        let filter: Filter = Condition::on(header_schema(), |x| {
            Ok(x.field("name")?
                .eq(Value::Null)
                .or(Expr::raw("length(t0.name) > 3")))
        })
        .unwrap()
        .into();

        let (sql, _) = compile::<SqliteDialect>(&filter).unwrap();

        assert_eq!(r#"((t0."name" IS NULL) OR (length(t0.name) > 3))"#, sql);
    }

    #[test]
    fn test_compile_rejects_plain_lists() {
        let filter: Filter = search("a", &["tags"]);

        assert!(matches!(
            compile::<PostgresDialect>(&filter),
            Err(CompileError::Unsupported { .. })
        ));
    }

    #[test]
    fn test_compile_rejects_marks_in_raw_sql() {
        let filter: Filter = Condition::on(header_schema(), |x| {
            Ok(x.field("id")?
                .eq(7)
                .and(Expr::raw("t0.name = '\u{1}0\u{2}'")))
        })
        .unwrap()
        .into();

        assert!(matches!(
            compile::<PostgresDialect>(&filter),
            Err(CompileError::Unsupported { .. })
        ));
    }

    #[test]
    fn test_compile_rejects_marks_in_identifiers() {
        let schema = EntitySchema::new("Odd", "odd", "id")
            .with_field("id", ValueType::Int)
            .with_field("a\u{1}0\u{2}", ValueType::Int)
            .into_ref();
        let filter: Filter =
            Condition::on(schema, |x| Ok(x.field("a\u{1}0\u{2}")?.eq(1)))
                .unwrap()
                .into();

        assert!(matches!(
            compile::<PostgresDialect>(&filter),
            Err(CompileError::Unsupported { .. })
        ));
    }

    #[test]
    fn test_raw_sql_keeps_its_text() {
        let filter: Filter = Condition::on(header_schema(), |x| {
            Ok(x.field("id")?.eq(7).or(Expr::raw("t0.name LIKE '%$1%'")))
        })
        .unwrap()
        .into();

        assert_eq!(
            (
                r#"((t0."id" = $1) OR (t0.name LIKE '%$1%'))"#.to_string(),
                vec![SqlParam::Int(7)]
            ),
            compile::<PostgresDialect>(&filter).unwrap()
        );
    }
}
