//! Predicate combinator for composing independently built conditions.

use crate::condition::{BoolOp, BuildError, Condition, Expr, Lambda, Symbol};
use crate::rebind::rebind;
use crate::types::ValueType;
use std::fmt;

/// Name of the input symbol shared by every combined condition.
pub const SHARED_INPUT: &str = "p";

/// What to apply to a source: nothing, or a condition.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Every row matches; the source is returned unfiltered.
    All,

    Where(Condition),
}

impl From<Condition> for Filter {
    fn from(condition: Condition) -> Self {
        Filter::Where(condition)
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::All => write!(f, "*"),
            Filter::Where(condition) => write!(f, "{condition}"),
        }
    }
}

/// Combines `predicates` with `op`.
///
/// - No predicates: [`Filter::All`].
/// - One predicate: rebound onto the shared input and used as is.
/// - More: each is rebound onto the shared input, then they are folded from
///   the left in their original order.
///
/// All predicates must share one input type.
pub fn combine(op: BoolOp, predicates: Vec<Condition>) -> Result<Filter, BuildError> {
    let Some(first) = predicates.first() else {
        tracing::debug!(%op, "no predicates to combine");
        return Ok(Filter::All);
    };

    let shared = shared_input(first.input().ty().clone());
    tracing::debug!(%op, count = predicates.len(), "combining predicates");

    let mut bodies = predicates
        .iter()
        .map(|predicate| rebind(predicate.lambda(), &shared));

    let mut body = match bodies.next() {
        Some(body) => body?,
        None => return Ok(Filter::All),
    };
    for next in bodies {
        body = body.logical(op, next?);
    }

    Ok(Filter::Where(Condition::new(Lambda::new(shared, body))?))
}

/// Like [`combine`], taking the operator by name (`and`, `or`, `&&`, `||`).
pub fn combine_named(op: &str, predicates: Vec<Condition>) -> Result<Filter, BuildError> {
    combine(op.parse()?, predicates)
}

pub fn combine_and(predicates: Vec<Condition>) -> Result<Filter, BuildError> {
    combine(BoolOp::And, predicates)
}

pub fn combine_or(predicates: Vec<Condition>) -> Result<Filter, BuildError> {
    combine(BoolOp::Or, predicates)
}

pub(crate) fn shared_input(ty: ValueType) -> Symbol {
    Symbol::new(SHARED_INPUT, ty)
}

/// Folds already rebound bodies into one condition over `input`.
pub(crate) fn fold_bodies(
    input: Symbol,
    op: BoolOp,
    bodies: Vec<Expr>,
) -> Result<Condition, BuildError> {
    let body = bodies
        .into_iter()
        .reduce(|acc, next| acc.logical(op, next))
        .unwrap_or_else(|| Expr::constant(true));
    Condition::new(Lambda::new(input, body))
}
