//! # Parameter Rebinding
//!
//! Conditions built independently each name their own input symbol. Before
//! they can be combined into one tree they must all refer to the same symbol.
//! [`rebind`] rewrites a condition's body so every reference to its input
//! refers to a target symbol instead, leaving everything else untouched.
//!
//! Nested lambdas are handled with ordinary scoping: a lambda whose parameter
//! is the source symbol shadows it, so its body is left alone. A nested
//! lambda whose parameter has the target's name is alpha-renamed first, so
//! the substituted target cannot be captured by it.

use crate::condition::{BuildError, Expr, Lambda, Subquery, Symbol};

/// Rewrites `lambda`'s body so that references to its parameter refer to
/// `target` instead.
///
/// Fails with [`BuildError::TypeMismatch`] when the parameter and the target
/// have different types, and with [`BuildError::UnsupportedConstruct`] when
/// the body holds a node that cannot be rewritten.
pub fn rebind(lambda: &Lambda, target: &Symbol) -> Result<Expr, BuildError> {
    if lambda.param.ty() != target.ty() {
        return Err(BuildError::mismatch(target.ty(), lambda.param.ty()));
    }
    replace_parameter(&lambda.body, &lambda.param, target)
}

/// Replaces every free occurrence of `source` in `expr` with `target`.
pub fn replace_parameter(
    expr: &Expr,
    source: &Symbol,
    target: &Symbol,
) -> Result<Expr, BuildError> {
    Rebinder { source, target }.visit(expr)
}

struct Rebinder<'a> {
    source: &'a Symbol,
    target: &'a Symbol,
}

impl Rebinder<'_> {
    fn visit(&self, expr: &Expr) -> Result<Expr, BuildError> {
        Ok(match expr {
            Expr::Param(symbol) if symbol == self.source => Expr::Param(self.target.clone()),
            Expr::Param(_) | Expr::Constant { .. } => expr.clone(),
            Expr::Member { target, field, ty } => Expr::Member {
                target: Box::new(self.visit(target)?),
                field: field.clone(),
                ty: ty.clone(),
            },
            Expr::Convert { operand, ty } => Expr::Convert {
                operand: Box::new(self.visit(operand)?),
                ty: ty.clone(),
            },
            Expr::Call { op, args } => Expr::Call {
                op: op.clone(),
                args: args
                    .iter()
                    .map(|arg| self.visit(arg))
                    .collect::<Result<_, _>>()?,
            },
            Expr::Lambda(lambda) => Expr::Lambda(Box::new(self.visit_lambda(lambda)?)),
            Expr::Compare { op, lhs, rhs } => Expr::Compare {
                op: *op,
                lhs: Box::new(self.visit(lhs)?),
                rhs: Box::new(self.visit(rhs)?),
            },
            Expr::Logical { op, lhs, rhs } => Expr::Logical {
                op: *op,
                lhs: Box::new(self.visit(lhs)?),
                rhs: Box::new(self.visit(rhs)?),
            },
            Expr::Not(inner) => Expr::Not(Box::new(self.visit(inner)?)),
            Expr::Subquery(subquery) => Expr::Subquery(Box::new(Subquery {
                source: subquery.source.clone(),
                filter: subquery
                    .filter
                    .as_ref()
                    .map(|filter| self.visit_lambda(filter))
                    .transpose()?,
                select: self.visit_lambda(&subquery.select)?,
            })),
            Expr::Raw { sql } => {
                return Err(BuildError::UnsupportedConstruct {
                    construct: format!("raw SQL fragment {sql:?}"),
                });
            }
        })
    }

    fn visit_lambda(&self, lambda: &Lambda) -> Result<Lambda, BuildError> {
        if lambda.param == *self.source {
            return Ok(lambda.clone());
        }

        if lambda.param.name() == self.target.name() {
            let renamed = fresh_symbol(&lambda.param, &lambda.body, self.target);
            let body = replace_parameter(&lambda.body, &lambda.param, &renamed)?;
            return Ok(Lambda::new(renamed.clone(), self.visit(&body)?));
        }

        Ok(Lambda::new(lambda.param.clone(), self.visit(&lambda.body)?))
    }
}

/// Picks a name for `param` that clashes with neither `target` nor any
/// symbol already used in `body`.
fn fresh_symbol(param: &Symbol, body: &Expr, target: &Symbol) -> Symbol {
    let mut used = Vec::new();
    collect_names(body, &mut used);

    (1..)
        .map(|n| format!("{}'{n}", param.name()))
        .find(|name| name != target.name() && !used.iter().any(|u| u == name))
        .map(|name| Symbol::new(name, param.ty().clone()))
        .unwrap_or_else(|| param.clone())
}

fn collect_names(expr: &Expr, names: &mut Vec<String>) {
    match expr {
        Expr::Param(symbol) => names.push(symbol.name().to_string()),
        Expr::Member { target, .. } => collect_names(target, names),
        Expr::Convert { operand, .. } => collect_names(operand, names),
        Expr::Call { args, .. } => args.iter().for_each(|arg| collect_names(arg, names)),
        Expr::Lambda(lambda) => {
            names.push(lambda.param.name().to_string());
            collect_names(&lambda.body, names);
        }
        Expr::Compare { lhs, rhs, .. } | Expr::Logical { lhs, rhs, .. } => {
            collect_names(lhs, names);
            collect_names(rhs, names);
        }
        Expr::Not(inner) => collect_names(inner, names),
        Expr::Subquery(subquery) => {
            if let Some(filter) = &subquery.filter {
                collect_names(&Expr::Lambda(Box::new(filter.clone())), names);
            }
            collect_names(&Expr::Lambda(Box::new(subquery.select.clone())), names);
        }
        Expr::Constant { .. } | Expr::Raw { .. } => {}
    }
}
