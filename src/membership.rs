//! Set-membership conditions.
//!
//! [`member_of`] tests whether a projected field is one of a set of values.
//! An absent or empty set places no restriction: the result is the
//! constant-true condition.
//!
//! For a [`ValueSet::Remote`] set, emptiness is only known once the set is
//! read, so the condition carries the check itself:
//! `!values.any() || values.contains(field)`.

use crate::capability::{CapabilityRegistry, Owner};
use crate::condition::{BuildError, Condition, Expr, FieldProjection, Lambda, Subquery};
use crate::query::shared_input;
use crate::rebind::rebind;
use crate::types::ValueType;
use crate::value::Value;
use std::fmt;

/// Right-hand side of a membership test.
#[derive(Debug, Clone, PartialEq)]
pub enum ValueSet {
    /// Values known up front.
    InMemory { values: Vec<Value>, element: ValueType },

    /// Values read from another entity when the condition runs.
    Remote(Subquery),
}

impl ValueSet {
    /// An in-memory set whose element type is inferred from its values.
    /// An empty set gets the element type `Any`.
    pub fn in_memory<V: Into<Value>>(values: Vec<V>) -> Self {
        let values: Vec<Value> = values.into_iter().map(Into::into).collect();
        let element = values
            .iter()
            .find(|v| !v.is_null())
            .map(Value::value_type)
            .unwrap_or(ValueType::Any);
        ValueSet::InMemory { values, element }
    }

    pub fn texts<S: Into<String>>(values: Vec<S>) -> Self {
        ValueSet::InMemory {
            values: values.into_iter().map(|s| Value::Text(s.into())).collect(),
            element: ValueType::Text,
        }
    }

    pub fn ints(values: Vec<i64>) -> Self {
        ValueSet::InMemory {
            values: values.into_iter().map(Value::Int).collect(),
            element: ValueType::Int,
        }
    }

    pub fn remote(subquery: Subquery) -> Self {
        ValueSet::Remote(subquery)
    }

    /// The owner whose operations apply to this set.
    pub fn owner(&self) -> Owner {
        match self {
            ValueSet::InMemory { .. } => Owner::Sequence,
            ValueSet::Remote(_) => Owner::Query,
        }
    }

    pub fn ty(&self) -> ValueType {
        match self {
            ValueSet::InMemory { element, .. } => ValueType::list(element.clone()),
            ValueSet::Remote(subquery) => subquery.ty(),
        }
    }

    pub fn element(&self) -> ValueType {
        match self {
            ValueSet::InMemory { element, .. } => element.clone(),
            ValueSet::Remote(subquery) => subquery.select.body.ty(),
        }
    }

    /// Returns `true` only for an in-memory set with no values.
    pub fn is_known_empty(&self) -> bool {
        matches!(self, ValueSet::InMemory { values, .. } if values.is_empty())
    }

    pub fn to_expr(&self) -> Expr {
        match self {
            ValueSet::InMemory { values, element } => Expr::constant_of(
                Value::List(values.clone()),
                ValueType::list(element.clone()),
            ),
            ValueSet::Remote(subquery) => Expr::Subquery(Box::new(subquery.clone())),
        }
    }
}

impl fmt::Display for ValueSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_expr())
    }
}

pub fn member_of(
    values: Option<&ValueSet>,
    field: &FieldProjection,
) -> Result<Condition, BuildError> {
    member_of_with(CapabilityRegistry::standard(), values, field)
}

pub fn member_of_with(
    registry: &CapabilityRegistry,
    values: Option<&ValueSet>,
    field: &FieldProjection,
) -> Result<Condition, BuildError> {
    let shared = shared_input(field.input().ty().clone());

    let values = match values {
        Some(values) if !values.is_known_empty() => values,
        _ => {
            tracing::debug!("membership set is absent or empty, matching every row");
            return Ok(Condition::always(shared));
        }
    };

    let owner = values.owner();
    let element = values.element();
    let target = rebind(field.lambda(), &shared)?;

    let contains = registry
        .resolve(owner, "contains", &[element.clone(), values.ty(), target.ty()])?
        .operation
        .call(vec![values.to_expr(), target]);

    let body = match owner {
        Owner::Query => {
            let any = registry
                .resolve(owner, "any", &[element, values.ty()])?
                .operation
                .call(vec![values.to_expr()]);
            Expr::not(any).or(contains)
        }
        _ => contains,
    };

    Condition::new(Lambda::new(shared, body))
}
