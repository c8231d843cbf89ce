//! # Capability Resolver
//!
//! Containment and membership tests are calls to operations registered in a
//! [`CapabilityRegistry`]. Each operation belongs to an [`Owner`] (the type
//! exposing it) and may be generic. Resolving an operation means picking,
//! among the candidates registered under a name, the one whose signature
//! best fits a list of concrete argument types, then instantiating its
//! generic parameters.
//!
//! The supplied types list the intended generic arguments first, then the
//! regular argument types. A candidate is scored as follows:
//!
//! 1. `generics + params` must equal the number of supplied types.
//! 2. Generic parameters bind against the leading supplied types. An
//!    unconstrained generic binds anything exactly; a constrained one uses
//!    the slot rule below.
//! 3. Regular parameters, instantiated with the bound generics, are compared
//!    with the trailing supplied types: an exact match scores [`EXACT_FIT`],
//!    a registered widening scores [`LOOSE_FIT`] per widening step, anything
//!    else rejects the candidate.
//!
//! Slot scores multiply and the lowest product wins; ties go to the
//! operation registered first.
//!
//! The registry is populated once, up front. The standard table covers text
//! containment and the `contains`/`any`/`select` family for in-memory
//! (`Sequence`) and remote (`Query`) sequences.

use crate::condition::{BuildError, Expr};
use crate::types::ValueType;
use std::collections::HashMap;
use std::fmt;
use std::sync::LazyLock;

/// Score of a slot whose type matches exactly.
pub const EXACT_FIT: u64 = 1;

/// Score of a single widening step. Much larger than [`EXACT_FIT`], so any
/// exact candidate beats any widened one.
pub const LOOSE_FIT: u64 = 1024;

/// The type that exposes an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Owner {
    /// Operations on text values.
    Text,
    /// Operations on in-memory (or any) sequences.
    Sequence,
    /// Operations on remote-queryable sequences.
    Query,
}

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Owner::Text => write!(f, "Text"),
            Owner::Sequence => write!(f, "Sequence"),
            Owner::Query => write!(f, "Query"),
        }
    }
}

/// A parameter or return type in a signature, possibly referring to the
/// signature's generic parameters by index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypePattern {
    Concrete(ValueType),
    Generic(usize),
    List(Box<TypePattern>),
    Query(Box<TypePattern>),
    Sequence(Box<TypePattern>),
    Function(Box<TypePattern>, Box<TypePattern>),
}

impl TypePattern {
    pub fn sequence(element: TypePattern) -> Self {
        TypePattern::Sequence(Box::new(element))
    }

    pub fn query(element: TypePattern) -> Self {
        TypePattern::Query(Box::new(element))
    }

    pub fn function(param: TypePattern, returns: TypePattern) -> Self {
        TypePattern::Function(Box::new(param), Box::new(returns))
    }

    /// Substitutes bound generic arguments. Returns `None` if the pattern
    /// refers to a generic parameter that is not bound.
    pub fn instantiate(&self, args: &[ValueType]) -> Option<ValueType> {
        Some(match self {
            TypePattern::Concrete(ty) => ty.clone(),
            TypePattern::Generic(idx) => args.get(*idx)?.clone(),
            TypePattern::List(e) => ValueType::list(e.instantiate(args)?),
            TypePattern::Query(e) => ValueType::query(e.instantiate(args)?),
            TypePattern::Sequence(e) => ValueType::sequence(e.instantiate(args)?),
            TypePattern::Function(p, r) => {
                ValueType::function(p.instantiate(args)?, r.instantiate(args)?)
            }
        })
    }
}

impl From<ValueType> for TypePattern {
    fn from(value: ValueType) -> Self {
        TypePattern::Concrete(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenericParam {
    pub name: &'static str,
    /// Types accepted for this parameter. `None` accepts anything.
    pub bound: Option<ValueType>,
}

/// A registered operation, before generic instantiation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationSignature {
    pub owner: Owner,
    pub name: String,
    pub generics: Vec<GenericParam>,
    pub params: Vec<TypePattern>,
    pub returns: TypePattern,
}

impl OperationSignature {
    pub fn new<N: Into<String>>(owner: Owner, name: N) -> Self {
        Self {
            owner,
            name: name.into(),
            generics: vec![],
            params: vec![],
            returns: TypePattern::Concrete(ValueType::Bool),
        }
    }

    pub fn with_generic(mut self, name: &'static str) -> Self {
        self.generics.push(GenericParam { name, bound: None });
        self
    }

    pub fn with_bounded_generic(mut self, name: &'static str, bound: ValueType) -> Self {
        self.generics.push(GenericParam {
            name,
            bound: Some(bound),
        });
        self
    }

    pub fn with_param<P: Into<TypePattern>>(mut self, param: P) -> Self {
        self.params.push(param.into());
        self
    }

    pub fn returning<P: Into<TypePattern>>(mut self, returns: P) -> Self {
        self.returns = returns.into();
        self
    }

    pub fn arity(&self) -> usize {
        self.generics.len() + self.params.len()
    }

    /// Scores this signature against `supplied`. Returns `None` when the
    /// signature does not qualify.
    pub fn score(&self, supplied: &[ValueType]) -> Option<Resolution> {
        if self.arity() != supplied.len() {
            return None;
        }

        let (type_args, args) = supplied.split_at(self.generics.len());

        let mut score = EXACT_FIT;
        for (generic, ty) in self.generics.iter().zip(type_args) {
            if let Some(bound) = &generic.bound {
                score = score.saturating_mul(slot_score(ty, bound)?);
            }
        }

        let params = self
            .params
            .iter()
            .map(|p| p.instantiate(type_args))
            .collect::<Option<Vec<_>>>()?;

        for (expected, ty) in params.iter().zip(args) {
            score = score.saturating_mul(slot_score(ty, expected)?);
        }

        Some(Resolution {
            score,
            operation: Operation {
                owner: self.owner,
                name: self.name.clone(),
                type_args: type_args.to_vec(),
                returns: self.returns.instantiate(type_args)?,
                params,
            },
        })
    }
}

fn slot_score(supplied: &ValueType, expected: &ValueType) -> Option<u64> {
    match supplied.widening_distance(expected)? {
        0 => Some(EXACT_FIT),
        steps => Some(LOOSE_FIT.saturating_pow(steps)),
    }
}

/// A resolved, fully instantiated operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Operation {
    pub owner: Owner,
    pub name: String,
    pub type_args: Vec<ValueType>,
    pub params: Vec<ValueType>,
    pub returns: ValueType,
}

impl Operation {
    /// Builds a call node invoking this operation.
    pub fn call(self, args: Vec<Expr>) -> Expr {
        Expr::Call { op: self, args }
    }
}

/// The outcome of scoring one candidate: how well it fits, and the
/// instantiated operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub score: u64,
    pub operation: Operation,
}

/// Operations available to condition builders, grouped by owner and name.
#[derive(Debug, Clone, Default)]
pub struct CapabilityRegistry {
    operations: HashMap<(Owner, String), Vec<OperationSignature>>,
}

static STANDARD: LazyLock<CapabilityRegistry> =
    LazyLock::new(CapabilityRegistry::with_standard_operations);

impl CapabilityRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The shared, immutable registry holding the standard operations.
    pub fn standard() -> &'static CapabilityRegistry {
        &STANDARD
    }

    /// Creates a registry holding the standard operations.
    pub fn with_standard_operations() -> Self {
        let mut registry = Self::new();
        registry.register_standard_operations();
        registry
    }

    pub fn register(&mut self, signature: OperationSignature) {
        self.operations
            .entry((signature.owner, signature.name.clone()))
            .or_default()
            .push(signature);
    }

    fn register_standard_operations(&mut self) {
        use TypePattern::Generic;

        self.register(
            OperationSignature::new(Owner::Text, "contains")
                .with_param(ValueType::Text)
                .with_param(ValueType::Text),
        );

        for owner in [Owner::Sequence, Owner::Query] {
            let seq = |e: TypePattern| match owner {
                Owner::Query => TypePattern::query(e),
                _ => TypePattern::sequence(e),
            };

            self.register(
                OperationSignature::new(owner, "contains")
                    .with_generic("T")
                    .with_param(seq(Generic(0)))
                    .with_param(Generic(0)),
            );
            self.register(
                OperationSignature::new(owner, "any")
                    .with_generic("T")
                    .with_param(seq(Generic(0))),
            );
            self.register(
                OperationSignature::new(owner, "any")
                    .with_generic("T")
                    .with_param(seq(Generic(0)))
                    .with_param(TypePattern::function(
                        Generic(0),
                        ValueType::Bool.into(),
                    )),
            );
            self.register(
                OperationSignature::new(owner, "select")
                    .with_generic("T")
                    .with_generic("R")
                    .with_param(seq(Generic(0)))
                    .with_param(TypePattern::function(Generic(0), Generic(1)))
                    .returning(seq(Generic(1))),
            );
        }
    }

    /// Candidates registered as `owner::name`, in registration order.
    pub fn candidates(&self, owner: Owner, name: &str) -> &[OperationSignature] {
        self.operations
            .get(&(owner, name.to_string()))
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Resolves `owner::name` against `supplied` (generic arguments first).
    pub fn resolve(
        &self,
        owner: Owner,
        name: &str,
        supplied: &[ValueType],
    ) -> Result<Resolution, BuildError> {
        let best = self
            .candidates(owner, name)
            .iter()
            .filter_map(|candidate| candidate.score(supplied))
            .min_by_key(|resolution| resolution.score);

        match best {
            Some(resolution) => {
                tracing::trace!(
                    %owner,
                    name,
                    score = resolution.score,
                    "resolved operation"
                );
                Ok(resolution)
            }
            None => Err(BuildError::OperationNotFound {
                owner,
                name: name.to_string(),
                args: supplied
                    .iter()
                    .map(ValueType::to_string)
                    .collect::<Vec<_>>()
                    .join(", "),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{
        CapabilityRegistry, EXACT_FIT, LOOSE_FIT, OperationSignature, Owner, TypePattern,
    };
    use crate::condition::BuildError;
    use crate::types::ValueType;

    #[test]
    fn test_resolve_in_memory_contains() {
        let registry = CapabilityRegistry::with_standard_operations();
        let text = ValueType::Text;

        let resolution = registry
            .resolve(
                Owner::Sequence,
                "contains",
                &[text.clone(), ValueType::list(text.clone()), text.clone()],
            )
            .unwrap();

        assert_eq!(LOOSE_FIT, resolution.score);
        assert_eq!(vec![text.clone()], resolution.operation.type_args);
        assert_eq!(
            vec![ValueType::sequence(text.clone()), text],
            resolution.operation.params
        );
        assert_eq!(ValueType::Bool, resolution.operation.returns);
    }

    #[test]
    fn test_resolve_remote_contains_is_exact() {
        let registry = CapabilityRegistry::with_standard_operations();
        let int = ValueType::Int;

        let resolution = registry
            .resolve(
                Owner::Query,
                "contains",
                &[int.clone(), ValueType::query(int.clone()), int],
            )
            .unwrap();

        assert_eq!(EXACT_FIT, resolution.score);
        assert_eq!(Owner::Query, resolution.operation.owner);
    }

    #[test]
    fn test_resolve_picks_by_arity() {
        let registry = CapabilityRegistry::with_standard_operations();
        let text = ValueType::Text;
        let seq = ValueType::sequence(text.clone());

        let plain = registry
            .resolve(Owner::Sequence, "any", &[text.clone(), seq.clone()])
            .unwrap();
        let with_predicate = registry
            .resolve(
                Owner::Sequence,
                "any",
                &[
                    text.clone(),
                    seq.clone(),
                    ValueType::function(text, ValueType::Bool),
                ],
            )
            .unwrap();

        assert_eq!(1, plain.operation.params.len());
        assert_eq!(2, with_predicate.operation.params.len());
    }

    #[test]
    fn test_resolve_rejects_element_mismatch() {
        let registry = CapabilityRegistry::with_standard_operations();

        let result = registry.resolve(
            Owner::Sequence,
            "contains",
            &[
                ValueType::Text,
                ValueType::list(ValueType::Int),
                ValueType::Text,
            ],
        );

        assert_eq!(
            Err(BuildError::OperationNotFound {
                owner: Owner::Sequence,
                name: "contains".to_string(),
                args: "Text, List<Int>, Text".to_string(),
            }),
            result
        );
    }

    #[test]
    fn test_resolve_unknown_name() {
        let registry = CapabilityRegistry::with_standard_operations();

        assert!(matches!(
            registry.resolve(Owner::Text, "soundex", &[ValueType::Text]),
            Err(BuildError::OperationNotFound { .. })
        ));
    }

    #[test]
    fn test_resolve_prefers_exact_over_widened() {
        let mut registry = CapabilityRegistry::new();
        registry.register(
            OperationSignature::new(Owner::Text, "eq")
                .with_param(ValueType::Any)
                .with_param(ValueType::Any),
        );
        registry.register(
            OperationSignature::new(Owner::Text, "eq")
                .with_param(ValueType::Text)
                .with_param(ValueType::Any),
        );
        registry.register(
            OperationSignature::new(Owner::Text, "eq")
                .with_param(ValueType::Text)
                .with_param(ValueType::Text),
        );

        let resolution = registry
            .resolve(Owner::Text, "eq", &[ValueType::Text, ValueType::Text])
            .unwrap();

        assert_eq!(EXACT_FIT, resolution.score);
        assert_eq!(
            vec![ValueType::Text, ValueType::Text],
            resolution.operation.params
        );
    }

    #[test]
    fn test_resolve_ties_go_to_first_registered() {
        let mut registry = CapabilityRegistry::new();
        registry.register(
            OperationSignature::new(Owner::Text, "len")
                .with_param(ValueType::Text)
                .returning(ValueType::Int),
        );
        registry.register(
            OperationSignature::new(Owner::Text, "len")
                .with_param(ValueType::Text)
                .returning(ValueType::Float),
        );

        let resolution = registry
            .resolve(Owner::Text, "len", &[ValueType::Text])
            .unwrap();

        assert_eq!(ValueType::Int, resolution.operation.returns);
    }

    #[test]
    fn test_bounded_generic() {
        let mut registry = CapabilityRegistry::new();
        registry.register(
            OperationSignature::new(Owner::Sequence, "sum")
                .with_bounded_generic("N", ValueType::Int)
                .with_param(TypePattern::sequence(TypePattern::Generic(0)))
                .returning(TypePattern::Generic(0)),
        );

        let ok = registry.resolve(
            Owner::Sequence,
            "sum",
            &[ValueType::Int, ValueType::sequence(ValueType::Int)],
        );
        let rejected = registry.resolve(
            Owner::Sequence,
            "sum",
            &[ValueType::Text, ValueType::sequence(ValueType::Text)],
        );

        assert_eq!(ValueType::Int, ok.unwrap().operation.returns);
        assert!(rejected.is_err());
    }

    #[test]
    fn test_resolve_select_instantiates_both_generics() {
        let registry = CapabilityRegistry::standard();
        let line = ValueType::Any;

        let resolution = registry
            .resolve(
                Owner::Query,
                "select",
                &[
                    line.clone(),
                    ValueType::Text,
                    ValueType::query(line.clone()),
                    ValueType::function(line, ValueType::Text),
                ],
            )
            .unwrap();

        assert_eq!(ValueType::query(ValueType::Text), resolution.operation.returns);
    }
}
