//! # Substring Search
//!
//! [`search_any`] builds one condition that matches a row when any of the
//! given projections contains a search string:
//!
//! - text projections are tested directly;
//! - sequences of text match when some element contains the value;
//! - other scalars (and sequences of them) are converted to text first.
//!
//! An absent search string is treated as the empty string, which every text
//! contains, so `search_any(None, ..)` matches every row.

use crate::capability::CapabilityRegistry;
use crate::condition::{BoolOp, BuildError, Condition, Expr, FieldProjection};
use crate::query::{fold_bodies, shared_input};
use crate::rebind::rebind;
use crate::types::ValueType;

/// Name of the element symbol introduced for sequence projections.
const ELEMENT: &str = "s";

pub fn search_any(
    value: Option<&str>,
    projections: &[FieldProjection],
) -> Result<Condition, BuildError> {
    search_any_with(CapabilityRegistry::standard(), value, projections)
}

pub fn search_any_with(
    registry: &CapabilityRegistry,
    value: Option<&str>,
    projections: &[FieldProjection],
) -> Result<Condition, BuildError> {
    let first = projections.first().ok_or(BuildError::NoProjections)?;
    let value = value.unwrap_or_default();
    let shared = shared_input(first.input().ty().clone());

    tracing::debug!(value, projections = projections.len(), "building search");

    let tests = projections
        .iter()
        .map(|projection| {
            let target = rebind(projection.lambda(), &shared)?;
            contains_test(registry, target, value)
        })
        .collect::<Result<Vec<_>, _>>()?;

    fold_bodies(shared, BoolOp::Or, tests)
}

fn contains_test(
    registry: &CapabilityRegistry,
    target: Expr,
    value: &str,
) -> Result<Expr, BuildError> {
    let ty = target.ty();
    match &ty {
        ValueType::Text => target.contains_with(registry, value),
        _ if ty.is_scalar() => target.convert(ValueType::Text).contains_with(registry, value),
        ValueType::List(element) | ValueType::Query(element) | ValueType::Sequence(element)
            if element.is_scalar() =>
        {
            let text = **element == ValueType::Text;
            target.any_with(registry, ELEMENT, |s| {
                let s = if text { s } else { s.convert(ValueType::Text) };
                s.contains_with(registry, value)
            })
        }
        _ => Err(BuildError::mismatch("text, a scalar or a sequence of them", ty)),
    }
}
