//! # In-Memory Execution
//!
//! Evaluates conditions directly against rows that implement
//! [`FieldAccess`]. Missing fields and nulls read as null; a null text reads
//! as the empty string in containment tests, and a null sequence reads as
//! empty.
//!
//! Nulls follow SQL's three-valued logic, so a condition selects the same
//! rows here as it does once compiled by [`crate::sql`]:
//!
//! - comparing with null yields null, except `== null` / `!= null`, which
//!   test for null;
//! - `!null` is null, `false && null` is false and `true || null` is true;
//! - membership of null, or of a value missing from a set holding null, is
//!   null;
//! - a row passes only when its condition is `true`.
//!
//! Remote sub-queries and raw SQL fragments only mean something to a
//! database and are rejected with [`EvalError::Unsupported`].

use crate::capability::Owner;
use crate::condition::{BoolOp, CompareOp, Condition, Expr, Lambda};
use crate::page::Source;
use crate::query::Filter;
use crate::types::ValueType;
use crate::value::{FieldAccess, Value};
use std::cmp::Ordering;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error("symbol {name} is not bound")]
    Unbound { name: String },

    #[error("type mismatch at runtime: expected {expected}, found {found}")]
    TypeMismatch { expected: String, found: String },

    #[error("{construct} cannot be evaluated in memory")]
    Unsupported { construct: String },
}

impl EvalError {
    fn mismatch(expected: impl ToString, found: &Value) -> Self {
        EvalError::TypeMismatch {
            expected: expected.to_string(),
            found: found.to_string(),
        }
    }

    fn unsupported(construct: impl ToString) -> Self {
        EvalError::Unsupported {
            construct: construct.to_string(),
        }
    }
}

/// What a symbol refers to while evaluating.
#[derive(Clone, Copy)]
enum Binding<'a> {
    Row(&'a dyn FieldAccess),
    Value(&'a Value),
}

/// Symbols in scope, innermost last.
struct Scope<'a> {
    frames: Vec<(&'a str, Binding<'a>)>,
}

impl<'a> Scope<'a> {
    fn lookup(&self, name: &str) -> Result<Binding<'a>, EvalError> {
        self.frames
            .iter()
            .rev()
            .find(|(bound, _)| *bound == name)
            .map(|(_, binding)| *binding)
            .ok_or_else(|| EvalError::Unbound {
                name: name.to_string(),
            })
    }
}

/// Returns whether `row` satisfies `condition`.
pub fn evaluate(condition: &Condition, row: &dyn FieldAccess) -> Result<bool, EvalError> {
    let scope = Scope {
        frames: vec![(condition.input().name(), Binding::Row(row))],
    };
    truth(&eval(condition.body(), &scope)?)
}

/// Returns whether `row` passes `filter`.
pub fn matches(filter: &Filter, row: &dyn FieldAccess) -> Result<bool, EvalError> {
    match filter {
        Filter::All => Ok(true),
        Filter::Where(condition) => evaluate(condition, row),
    }
}

fn truth(value: &Value) -> Result<bool, EvalError> {
    Ok(known(value)?.unwrap_or(false))
}

/// Reads a boolean, with null as unknown.
fn known(value: &Value) -> Result<Option<bool>, EvalError> {
    match value {
        Value::Bool(b) => Ok(Some(*b)),
        Value::Null => Ok(None),
        other => Err(EvalError::mismatch(ValueType::Bool, other)),
    }
}

fn unknown_or(value: Option<bool>) -> Value {
    value.map_or(Value::Null, Value::Bool)
}

fn eval(expr: &Expr, scope: &Scope<'_>) -> Result<Value, EvalError> {
    match expr {
        Expr::Param(symbol) => match scope.lookup(symbol.name())? {
            Binding::Value(value) => Ok(value.clone()),
            Binding::Row(_) => Err(EvalError::unsupported(format!(
                "the whole row {symbol} used as a value"
            ))),
        },
        Expr::Member { target, field, .. } => read_field(target, field, scope),
        Expr::Constant { value, .. } => Ok(value.clone()),
        Expr::Convert { operand, ty } => convert(eval(operand, scope)?, ty),
        Expr::Call { op, args } => call(op.owner, &op.name, args, scope),
        Expr::Compare { op, lhs, rhs } => {
            let lhs = eval(lhs, scope)?;
            if let Expr::Constant {
                value: Value::Null,
                ..
            } = rhs.as_ref()
            {
                match op {
                    CompareOp::Eq => return Ok(Value::Bool(lhs.is_null())),
                    CompareOp::Ne => return Ok(Value::Bool(!lhs.is_null())),
                    _ => {}
                }
            }
            let rhs = eval(rhs, scope)?;
            Ok(compare(*op, &lhs, &rhs))
        }
        Expr::Logical { op, lhs, rhs } => {
            let lhs = known(&eval(lhs, scope)?)?;
            match (op, lhs) {
                (BoolOp::And, Some(false)) => return Ok(Value::Bool(false)),
                (BoolOp::Or, Some(true)) => return Ok(Value::Bool(true)),
                _ => {}
            }
            let result = match (op, known(&eval(rhs, scope)?)?) {
                (BoolOp::And, Some(false)) => Some(false),
                (BoolOp::Or, Some(true)) => Some(true),
                (_, Some(_)) => lhs,
                (_, None) => None,
            };
            Ok(unknown_or(result))
        }
        Expr::Not(inner) => Ok(unknown_or(known(&eval(inner, scope)?)?.map(|b| !b))),
        Expr::Lambda(lambda) => Err(EvalError::unsupported(format!(
            "the free-standing function {lambda}"
        ))),
        Expr::Subquery(subquery) => Err(EvalError::unsupported(format!(
            "the remote sub-query {subquery}"
        ))),
        Expr::Raw { sql } => Err(EvalError::unsupported(format!("raw SQL {sql:?}"))),
    }
}

fn read_field(target: &Expr, field: &str, scope: &Scope<'_>) -> Result<Value, EvalError> {
    if let Expr::Param(symbol) = target {
        if let Binding::Row(row) = scope.lookup(symbol.name())? {
            return Ok(row.field(field).unwrap_or(Value::Null));
        }
    }

    match eval(target, scope)? {
        Value::Record(record) => Ok(record.get(field).cloned().unwrap_or(Value::Null)),
        Value::Null => Ok(Value::Null),
        other => Err(EvalError::mismatch(format!("a row with field {field}"), &other)),
    }
}

fn convert(value: Value, ty: &ValueType) -> Result<Value, EvalError> {
    match (ty, value) {
        (_, Value::Null) => Ok(Value::Null),
        (ValueType::Text, value @ (Value::List(_) | Value::Record(_))) => {
            Err(EvalError::mismatch(ty, &value))
        }
        (ValueType::Text, value) => Ok(Value::Text(value.to_text())),
        (ValueType::Float, Value::Int(i)) => Ok(Value::Float(i as f64)),
        (ValueType::Any, value) => Ok(value),
        (ty, value) if value.value_type() == *ty => Ok(value),
        (ty, value) => Err(EvalError::mismatch(ty, &value)),
    }
}

fn compare(op: CompareOp, lhs: &Value, rhs: &Value) -> Value {
    if lhs.is_null() || rhs.is_null() {
        return Value::Null;
    }

    Value::Bool(match op {
        CompareOp::Eq => equal(lhs, rhs),
        CompareOp::Ne => !equal(lhs, rhs),
        CompareOp::Lt => lhs.compare(rhs) == Some(Ordering::Less),
        CompareOp::Le => matches!(lhs.compare(rhs), Some(Ordering::Less | Ordering::Equal)),
        CompareOp::Gt => lhs.compare(rhs) == Some(Ordering::Greater),
        CompareOp::Ge => matches!(
            lhs.compare(rhs),
            Some(Ordering::Greater | Ordering::Equal)
        ),
    })
}

fn equal(lhs: &Value, rhs: &Value) -> bool {
    match lhs.compare(rhs) {
        Some(ordering) => ordering == Ordering::Equal,
        None => lhs == rhs,
    }
}

fn call(owner: Owner, name: &str, args: &[Expr], scope: &Scope<'_>) -> Result<Value, EvalError> {
    match (owner, name, args) {
        (Owner::Text, "contains", [haystack, needle]) => {
            let haystack = eval(haystack, scope)?.to_text();
            let needle = eval(needle, scope)?.to_text();
            Ok(Value::Bool(haystack.contains(&needle)))
        }
        (Owner::Sequence | Owner::Query, "contains", [items, item]) => {
            let items = sequence(eval(items, scope)?)?;
            let item = eval(item, scope)?;
            Ok(member(&items, &item))
        }
        (Owner::Sequence | Owner::Query, "any", [items]) => {
            Ok(Value::Bool(!sequence(eval(items, scope)?)?.is_empty()))
        }
        (Owner::Sequence | Owner::Query, "any", [items, Expr::Lambda(predicate)]) => {
            for item in sequence(eval(items, scope)?)? {
                if truth(&apply(predicate, &item, scope)?)? {
                    return Ok(Value::Bool(true));
                }
            }
            Ok(Value::Bool(false))
        }
        (Owner::Sequence | Owner::Query, "select", [items, Expr::Lambda(selector)]) => {
            let items = sequence(eval(items, scope)?)?;
            let selected = items
                .iter()
                .map(|item| apply(selector, item, scope))
                .collect::<Result<_, _>>()?;
            Ok(Value::List(selected))
        }
        _ => Err(EvalError::unsupported(format!("the operation {owner}::{name}"))),
    }
}

/// `item IN (items)`: an empty set holds nothing, and a miss against a set
/// holding null is unknown.
fn member(items: &[Value], item: &Value) -> Value {
    if items.is_empty() {
        return Value::Bool(false);
    }
    if item.is_null() {
        return Value::Null;
    }
    if items.iter().any(|v| !v.is_null() && equal(v, item)) {
        Value::Bool(true)
    } else if items.iter().any(Value::is_null) {
        Value::Null
    } else {
        Value::Bool(false)
    }
}

fn sequence(value: Value) -> Result<Vec<Value>, EvalError> {
    match value {
        Value::List(items) => Ok(items),
        Value::Null => Ok(vec![]),
        other => Err(EvalError::mismatch("a sequence", &other)),
    }
}

fn apply(lambda: &Lambda, argument: &Value, scope: &Scope<'_>) -> Result<Value, EvalError> {
    let mut frames = scope.frames.clone();
    frames.push((lambda.param.name(), Binding::Value(argument)));
    eval(&lambda.body, &Scope { frames })
}

/// Rows held in memory.
#[derive(Debug, Clone, PartialEq)]
pub struct Table<R> {
    rows: Vec<R>,
}

impl<R: FieldAccess> Table<R> {
    pub fn new(rows: Vec<R>) -> Self {
        Self { rows }
    }

    pub fn rows(&self) -> &[R] {
        &self.rows
    }

    /// Returns the rows that pass `filter`, in their original order.
    pub fn filter(&self, filter: &Filter) -> Result<Vec<&R>, EvalError> {
        let mut matched = Vec::new();
        for row in &self.rows {
            if matches(filter, row)? {
                matched.push(row);
            }
        }

        tracing::debug!(
            total = self.rows.len(),
            matched = matched.len(),
            "filtered table"
        );

        Ok(matched)
    }

    pub fn count(&self, filter: &Filter) -> Result<usize, EvalError> {
        Ok(self.filter(filter)?.len())
    }
}

impl<R: FieldAccess> FromIterator<R> for Table<R> {
    fn from_iter<I: IntoIterator<Item = R>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl<R: FieldAccess + Clone> Source for Table<R> {
    type Item = R;
    type Error = EvalError;

    fn count(&self) -> Result<u64, Self::Error> {
        Ok(self.rows.len() as u64)
    }

    fn window(&self, skip: u64, take: u32) -> Result<Vec<R>, Self::Error> {
        let skip = usize::try_from(skip).unwrap_or(usize::MAX);
        Ok(self.rows.iter().skip(skip).take(take as usize).cloned().collect())
    }
}
