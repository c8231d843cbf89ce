//! # Condition Trees
//!
//! A [`Condition`] is a boolean test over one input row, kept as data rather
//! than as a closure. It can be inspected, rebound onto another input symbol
//! (see [`crate::rebind`]), evaluated in memory (see [`crate::memory`]) or
//! compiled to SQL (see [`crate::sql`]).
//!
//! Conditions are built from [`Expr`] nodes. Each node carries its static
//! [`ValueType`], computed when the node is built, so the search and
//! membership builders can choose their strategy without touching any data.
//!
//! ```rust
//! # use querykit::condition::{Condition, Expr};
//! # use querykit::types::{EntitySchema, ValueType};
//! let header = EntitySchema::new("Header", "headers", "id")
//!     .with_field("name", ValueType::Text)
//!     .into_ref();
//!
//! let condition = Condition::on(header, |x| x.field("name")?.contains("line")).unwrap();
//!
//! assert_eq!(r#"x => x.name.contains("line")"#, condition.to_string());
//! ```

use crate::capability::{CapabilityRegistry, Operation, Owner};
use crate::types::{EntityRef, ValueType};
use crate::value::{Entity, Value};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors raised while building or rewriting a condition.
///
/// Building is all-or-nothing: when any of these is returned, no partially
/// built condition escapes.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BuildError {
    /// The condition contains a node the rebinder cannot rewrite.
    #[error("unsupported construct in condition: {construct}")]
    UnsupportedConstruct { construct: String },

    /// No registered operation accepts the supplied argument types.
    #[error("no operation {owner}::{name} accepts ({args})")]
    OperationNotFound {
        owner: Owner,
        name: String,
        args: String,
    },

    /// A boolean operator name that is neither `and` nor `or`.
    #[error("invalid boolean operator: {operator}")]
    InvalidOperator { operator: String },

    #[error("entity {entity} has no field {field}")]
    UnknownField { entity: String, field: String },

    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: String, found: String },

    /// A substring search was requested over zero projections.
    #[error("search requires at least one field projection")]
    NoProjections,
}

impl BuildError {
    pub(crate) fn mismatch(expected: impl fmt::Display, found: impl fmt::Display) -> Self {
        BuildError::TypeMismatch {
            expected: expected.to_string(),
            found: found.to_string(),
        }
    }
}

/// A named, typed input symbol.
///
/// Two symbols are the same symbol when both name and type match.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Symbol {
    name: String,
    ty: ValueType,
}

impl Symbol {
    pub fn new<N: Into<String>>(name: N, ty: ValueType) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ty(&self) -> &ValueType {
        &self.ty
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    pub fn symbol(self) -> &'static str {
        match self {
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
        }
    }
}

/// Boolean operator used to fold conditions together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BoolOp {
    And,
    Or,
}

impl FromStr for BoolOp {
    type Err = BuildError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "and" | "&&" => Ok(BoolOp::And),
            "or" | "||" => Ok(BoolOp::Or),
            _ => Err(BuildError::InvalidOperator {
                operator: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for BoolOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BoolOp::And => write!(f, "&&"),
            BoolOp::Or => write!(f, "||"),
        }
    }
}

/// A node of a condition tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Reference to an input symbol.
    Param(Symbol),

    /// Reads `field` from `target`.
    Member {
        target: Box<Expr>,
        field: String,
        ty: ValueType,
    },

    /// Invokes a resolved operation. The first argument is the receiver.
    Call { op: Operation, args: Vec<Expr> },

    /// Converts `operand` to `ty`.
    Convert { operand: Box<Expr>, ty: ValueType },

    /// A nested single-parameter function, e.g. the predicate of `any`.
    Lambda(Box<Lambda>),

    /// A literal value.
    Constant { value: Value, ty: ValueType },

    Compare {
        op: CompareOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },

    Logical {
        op: BoolOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },

    Not(Box<Expr>),

    /// A remote-queryable sequence read from another entity's table.
    Subquery(Box<Subquery>),

    /// A verbatim SQL boolean fragment. Only the SQL engine understands it,
    /// and it cannot be rebound onto another input symbol.
    Raw { sql: String },
}

impl Expr {
    /// A literal whose type is taken from the value.
    pub fn constant<V: Into<Value>>(value: V) -> Expr {
        let value = value.into();
        let ty = value.value_type();
        Expr::Constant { value, ty }
    }

    /// A literal with an explicit type.
    pub fn constant_of<V: Into<Value>>(value: V, ty: ValueType) -> Expr {
        Expr::Constant {
            value: value.into(),
            ty,
        }
    }

    pub fn raw<S: Into<String>>(sql: S) -> Expr {
        Expr::Raw { sql: sql.into() }
    }

    /// The static type of this node.
    pub fn ty(&self) -> ValueType {
        match self {
            Expr::Param(symbol) => symbol.ty().clone(),
            Expr::Member { ty, .. } | Expr::Convert { ty, .. } | Expr::Constant { ty, .. } => {
                ty.clone()
            }
            Expr::Call { op, .. } => op.returns.clone(),
            Expr::Lambda(lambda) => lambda.ty(),
            Expr::Compare { .. } | Expr::Logical { .. } | Expr::Not(_) | Expr::Raw { .. } => {
                ValueType::Bool
            }
            Expr::Subquery(subquery) => subquery.ty(),
        }
    }

    /// Reads a field of an entity-typed expression.
    pub fn field(self, name: &str) -> Result<Expr, BuildError> {
        let ty = self.ty();
        let schema = ty
            .entity()
            .ok_or_else(|| BuildError::mismatch("an entity", &ty))?;
        let def = schema.field(name).ok_or_else(|| BuildError::UnknownField {
            entity: schema.name().to_string(),
            field: name.to_string(),
        })?;

        Ok(Expr::Member {
            ty: def.ty.clone(),
            field: name.to_string(),
            target: Box::new(self),
        })
    }

    /// Tests whether this text contains `needle`.
    pub fn contains<N: Into<Expr>>(self, needle: N) -> Result<Expr, BuildError> {
        self.contains_with(CapabilityRegistry::standard(), needle)
    }

    pub fn contains_with<N: Into<Expr>>(
        self,
        registry: &CapabilityRegistry,
        needle: N,
    ) -> Result<Expr, BuildError> {
        let needle = needle.into();
        let resolution = registry.resolve(Owner::Text, "contains", &[self.ty(), needle.ty()])?;
        Ok(resolution.operation.call(vec![self, needle]))
    }

    /// Tests whether any element of this sequence satisfies `predicate`.
    ///
    /// `param` names the element symbol inside the predicate.
    pub fn any<F>(self, param: &str, predicate: F) -> Result<Expr, BuildError>
    where
        F: FnOnce(Expr) -> Result<Expr, BuildError>,
    {
        self.any_with(CapabilityRegistry::standard(), param, predicate)
    }

    pub fn any_with<F>(
        self,
        registry: &CapabilityRegistry,
        param: &str,
        predicate: F,
    ) -> Result<Expr, BuildError>
    where
        F: FnOnce(Expr) -> Result<Expr, BuildError>,
    {
        let (owner, element) = sequence_parts(&self.ty())?;
        let lambda = Lambda::build(param, element.clone(), predicate)?;
        let resolution =
            registry.resolve(owner, "any", &[element, self.ty(), lambda.ty()])?;
        Ok(resolution
            .operation
            .call(vec![self, Expr::Lambda(Box::new(lambda))]))
    }

    /// Maps every element of this sequence through `selector`.
    pub fn select<F>(self, param: &str, selector: F) -> Result<Expr, BuildError>
    where
        F: FnOnce(Expr) -> Result<Expr, BuildError>,
    {
        self.select_with(CapabilityRegistry::standard(), param, selector)
    }

    pub fn select_with<F>(
        self,
        registry: &CapabilityRegistry,
        param: &str,
        selector: F,
    ) -> Result<Expr, BuildError>
    where
        F: FnOnce(Expr) -> Result<Expr, BuildError>,
    {
        let (owner, element) = sequence_parts(&self.ty())?;
        let lambda = Lambda::build(param, element.clone(), selector)?;
        let returns = lambda.body.ty();
        let resolution = registry.resolve(
            owner,
            "select",
            &[element, returns, self.ty(), lambda.ty()],
        )?;
        Ok(resolution
            .operation
            .call(vec![self, Expr::Lambda(Box::new(lambda))]))
    }

    pub fn convert(self, ty: ValueType) -> Expr {
        Expr::Convert {
            operand: Box::new(self),
            ty,
        }
    }

    pub fn compare<R: Into<Expr>>(self, op: CompareOp, rhs: R) -> Expr {
        Expr::Compare {
            op,
            lhs: Box::new(self),
            rhs: Box::new(rhs.into()),
        }
    }

    pub fn eq<R: Into<Expr>>(self, rhs: R) -> Expr {
        self.compare(CompareOp::Eq, rhs)
    }

    pub fn ne<R: Into<Expr>>(self, rhs: R) -> Expr {
        self.compare(CompareOp::Ne, rhs)
    }

    pub fn lt<R: Into<Expr>>(self, rhs: R) -> Expr {
        self.compare(CompareOp::Lt, rhs)
    }

    pub fn le<R: Into<Expr>>(self, rhs: R) -> Expr {
        self.compare(CompareOp::Le, rhs)
    }

    pub fn gt<R: Into<Expr>>(self, rhs: R) -> Expr {
        self.compare(CompareOp::Gt, rhs)
    }

    pub fn ge<R: Into<Expr>>(self, rhs: R) -> Expr {
        self.compare(CompareOp::Ge, rhs)
    }

    pub fn logical(self, op: BoolOp, rhs: Expr) -> Expr {
        Expr::Logical {
            op,
            lhs: Box::new(self),
            rhs: Box::new(rhs),
        }
    }

    pub fn and(self, rhs: Expr) -> Expr {
        self.logical(BoolOp::And, rhs)
    }

    pub fn or(self, rhs: Expr) -> Expr {
        self.logical(BoolOp::Or, rhs)
    }

    pub fn not(expr: Expr) -> Expr {
        Expr::Not(Box::new(expr))
    }
}

/// Splits a sequence type into the owner exposing its operations and its
/// element type.
fn sequence_parts(ty: &ValueType) -> Result<(Owner, ValueType), BuildError> {
    match ty {
        ValueType::Query(e) => Ok((Owner::Query, (**e).clone())),
        ValueType::List(e) | ValueType::Sequence(e) => Ok((Owner::Sequence, (**e).clone())),
        other => Err(BuildError::mismatch("a sequence", other)),
    }
}

impl From<Value> for Expr {
    fn from(value: Value) -> Self {
        Expr::constant(value)
    }
}

impl From<&str> for Expr {
    fn from(value: &str) -> Self {
        Expr::constant(value)
    }
}

impl From<String> for Expr {
    fn from(value: String) -> Self {
        Expr::constant(value)
    }
}

impl From<i64> for Expr {
    fn from(value: i64) -> Self {
        Expr::constant(value)
    }
}

impl From<i32> for Expr {
    fn from(value: i32) -> Self {
        Expr::constant(value)
    }
}

impl From<bool> for Expr {
    fn from(value: bool) -> Self {
        Expr::constant(value)
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Param(symbol) => write!(f, "{symbol}"),
            Expr::Member { target, field, .. } => write!(f, "{target}.{field}"),
            Expr::Call { op, args } => {
                let (receiver, rest) = match args.split_first() {
                    Some((receiver, rest)) => (receiver.to_string(), rest),
                    None => (op.owner.to_string(), &args[..]),
                };
                write!(f, "{receiver}.{}(", op.name)?;
                for (i, arg) in rest.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                write!(f, ")")
            }
            Expr::Convert { operand, ty } => write!(f, "({operand} as {ty})"),
            Expr::Lambda(lambda) => write!(f, "{lambda}"),
            Expr::Constant { value, .. } => write!(f, "{value}"),
            Expr::Compare { op, lhs, rhs } => write!(f, "({lhs} {} {rhs})", op.symbol()),
            Expr::Logical { op, lhs, rhs } => write!(f, "({lhs} {op} {rhs})"),
            Expr::Not(expr) => write!(f, "!{expr}"),
            Expr::Subquery(subquery) => write!(f, "{subquery}"),
            Expr::Raw { sql } => write!(f, "raw({sql:?})"),
        }
    }
}

/// A single-parameter function: a symbol and a body that refers to it.
#[derive(Debug, Clone, PartialEq)]
pub struct Lambda {
    pub param: Symbol,
    pub body: Expr,
}

impl Lambda {
    pub fn new(param: Symbol, body: Expr) -> Self {
        Self { param, body }
    }

    /// Builds a lambda by handing `f` a reference to a fresh symbol.
    pub fn build<F>(name: &str, ty: ValueType, f: F) -> Result<Lambda, BuildError>
    where
        F: FnOnce(Expr) -> Result<Expr, BuildError>,
    {
        let param = Symbol::new(name, ty);
        let body = f(Expr::Param(param.clone()))?;
        Ok(Lambda { param, body })
    }

    pub fn ty(&self) -> ValueType {
        ValueType::function(self.param.ty().clone(), self.body.ty())
    }
}

impl fmt::Display for Lambda {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} => {}", self.param, self.body)
    }
}

/// Values of one field read from another entity's rows, optionally
/// filtered. Its type is `Query<field type>`.
#[derive(Debug, Clone, PartialEq)]
pub struct Subquery {
    pub source: EntityRef,
    pub filter: Option<Lambda>,
    pub select: Lambda,
}

impl Subquery {
    /// Reads `projection` from every row of the projection's entity.
    pub fn new(projection: FieldProjection) -> Result<Self, BuildError> {
        let ty = projection.input().ty().clone();
        let source = ty
            .entity()
            .cloned()
            .ok_or_else(|| BuildError::mismatch("an entity", &ty))?;

        Ok(Self {
            source,
            filter: None,
            select: projection.into_lambda(),
        })
    }

    /// Restricts the rows read to those satisfying `condition`.
    pub fn filter(mut self, condition: Condition) -> Result<Self, BuildError> {
        let expected = ValueType::Entity(self.source.clone());
        if condition.input().ty() != &expected {
            return Err(BuildError::mismatch(expected, condition.input().ty()));
        }
        self.filter = Some(condition.into_lambda());
        Ok(self)
    }

    pub fn ty(&self) -> ValueType {
        ValueType::query(self.select.body.ty())
    }
}

impl fmt::Display for Subquery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.source.name())?;
        if let Some(filter) = &self.filter {
            write!(f, ".where({filter})")?;
        }
        write!(f, ".select({})", self.select)
    }
}

/// A boolean test over one input symbol.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    lambda: Lambda,
}

impl Condition {
    /// Wraps a lambda, checking that its body is boolean.
    pub fn new(lambda: Lambda) -> Result<Self, BuildError> {
        let ty = lambda.body.ty();
        if ty != ValueType::Bool {
            return Err(BuildError::mismatch(ValueType::Bool, ty));
        }
        Ok(Self { lambda })
    }

    /// Builds a condition over entity `E`, naming the input `x`.
    pub fn build<E, F>(f: F) -> Result<Self, BuildError>
    where
        E: Entity,
        F: FnOnce(Expr) -> Result<Expr, BuildError>,
    {
        Self::on(E::schema(), f)
    }

    /// Builds a condition over rows described by `schema`, naming the input `x`.
    pub fn on<F>(schema: EntityRef, f: F) -> Result<Self, BuildError>
    where
        F: FnOnce(Expr) -> Result<Expr, BuildError>,
    {
        Self::new(Lambda::build("x", ValueType::Entity(schema), f)?)
    }

    /// The condition every input satisfies.
    pub fn always(input: Symbol) -> Self {
        Self {
            lambda: Lambda::new(input, Expr::constant(true)),
        }
    }

    pub fn input(&self) -> &Symbol {
        &self.lambda.param
    }

    pub fn body(&self) -> &Expr {
        &self.lambda.body
    }

    pub fn lambda(&self) -> &Lambda {
        &self.lambda
    }

    pub fn into_lambda(self) -> Lambda {
        self.lambda
    }

    /// Returns `true` if this is the constant-true condition.
    pub fn is_always(&self) -> bool {
        matches!(
            &self.lambda.body,
            Expr::Constant {
                value: Value::Bool(true),
                ..
            }
        )
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.lambda)
    }
}

/// A named read of one field (or computed value) from an input row.
///
/// The result type is fixed when the projection is built; it decides how
/// search and membership treat the projection.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldProjection {
    lambda: Lambda,
}

impl FieldProjection {
    pub fn new(lambda: Lambda) -> Self {
        Self { lambda }
    }

    /// Builds a projection over entity `E`, naming the input `x`.
    pub fn build<E, F>(f: F) -> Result<Self, BuildError>
    where
        E: Entity,
        F: FnOnce(Expr) -> Result<Expr, BuildError>,
    {
        Self::on(E::schema(), f)
    }

    pub fn on<F>(schema: EntityRef, f: F) -> Result<Self, BuildError>
    where
        F: FnOnce(Expr) -> Result<Expr, BuildError>,
    {
        Ok(Self::new(Lambda::build("x", ValueType::Entity(schema), f)?))
    }

    /// Builds a projection from a dotted path such as `lines.description`.
    ///
    /// When a segment lands on a sequence, the rest of the path is mapped
    /// over its elements with `select`.
    pub fn path(schema: EntityRef, path: &str) -> Result<Self, BuildError> {
        let segments: Vec<&str> = path.split('.').filter(|s| !s.is_empty()).collect();
        if segments.is_empty() {
            return Err(BuildError::UnknownField {
                entity: schema.name().to_string(),
                field: path.to_string(),
            });
        }
        Self::on(schema, |x| follow_path(x, &segments, 1))
    }

    pub fn input(&self) -> &Symbol {
        &self.lambda.param
    }

    pub fn result_type(&self) -> ValueType {
        self.lambda.body.ty()
    }

    pub fn lambda(&self) -> &Lambda {
        &self.lambda
    }

    pub fn into_lambda(self) -> Lambda {
        self.lambda
    }
}

fn follow_path(base: Expr, segments: &[&str], depth: usize) -> Result<Expr, BuildError> {
    let Some((head, rest)) = segments.split_first() else {
        return Ok(base);
    };

    if base.ty().is_sequence() {
        let param = format!("x{depth}");
        base.select(&param, |e| follow_path(e, segments, depth + 1))
    } else {
        follow_path(base.field(head)?, rest, depth)
    }
}

impl fmt::Display for FieldProjection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.lambda)
    }
}
