//! # Static Type Model
//!
//! Every node of a condition carries a [`ValueType`] computed when the node is
//! built. The capability resolver and the search builder only ever look at
//! these static types; they never inspect the data that a condition will later
//! be applied to.
//!
//! Row types are described by an [`EntitySchema`], shared through a cheap
//! [`EntityRef`] handle. A schema names its fields, their types and, for
//! one-to-many relations, the foreign key the SQL engine needs to correlate a
//! child table with its parent.
//!
//! Compatibility between types is an explicitly registered widening table
//! (see [`ValueType::widening_distance`]). There is no inheritance inference:
//! a type is either identical to the expected type, reachable through one of
//! the registered widenings, or incompatible.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Deref;
use std::sync::Arc;

/// The static type of an expression node.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ValueType {
    /// Accepts any value. Every type widens to `Any`.
    Any,
    Bool,
    Int,
    Float,
    Text,
    DateTime,

    /// A row described by a schema.
    Entity(EntityRef),

    /// An in-memory sequence.
    List(Box<ValueType>),

    /// A remote-queryable sequence, evaluated by the execution engine.
    Query(Box<ValueType>),

    /// Any sequence, regardless of where it lives.
    Sequence(Box<ValueType>),

    /// A single-parameter function, i.e. the type of a nested lambda.
    Function(Box<ValueType>, Box<ValueType>),
}

/// Distance of the `List<T> -> Sequence<T>` and `Query<T> -> Sequence<T>` widenings.
const SEQUENCE_WIDENING: u32 = 1;

/// Distance of the `T -> Any` widening.
const ANY_WIDENING: u32 = 2;

impl ValueType {
    pub fn list(element: ValueType) -> Self {
        ValueType::List(Box::new(element))
    }

    pub fn query(element: ValueType) -> Self {
        ValueType::Query(Box::new(element))
    }

    pub fn sequence(element: ValueType) -> Self {
        ValueType::Sequence(Box::new(element))
    }

    pub fn function(param: ValueType, returns: ValueType) -> Self {
        ValueType::Function(Box::new(param), Box::new(returns))
    }

    /// Returns the element type if this is any kind of sequence.
    pub fn element(&self) -> Option<&ValueType> {
        match self {
            ValueType::List(e) | ValueType::Query(e) | ValueType::Sequence(e) => Some(e),
            _ => None,
        }
    }

    /// Returns `true` for `List`, `Query` and `Sequence`.
    pub fn is_sequence(&self) -> bool {
        self.element().is_some()
    }

    /// Returns `true` for types that hold a single plain value.
    pub fn is_scalar(&self) -> bool {
        matches!(
            self,
            ValueType::Any
                | ValueType::Bool
                | ValueType::Int
                | ValueType::Float
                | ValueType::Text
                | ValueType::DateTime
        )
    }

    /// Returns the schema if this is an entity type.
    pub fn entity(&self) -> Option<&EntityRef> {
        match self {
            ValueType::Entity(schema) => Some(schema),
            _ => None,
        }
    }

    /// Number of registered widening steps needed to accept `self` where `to`
    /// is expected.
    ///
    /// - `Some(0)`: the types are identical.
    /// - `Some(n)`: `self` widens to `to` through a registered rule.
    /// - `None`: `self` is not accepted where `to` is expected.
    ///
    /// Element types of sequences are invariant.
    pub fn widening_distance(&self, to: &ValueType) -> Option<u32> {
        if self == to {
            return Some(0);
        }

        match (self, to) {
            (_, ValueType::Any) => Some(ANY_WIDENING),
            (ValueType::List(from) | ValueType::Query(from), ValueType::Sequence(to))
                if from == to =>
            {
                Some(SEQUENCE_WIDENING)
            }
            _ => None,
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueType::Any => write!(f, "Any"),
            ValueType::Bool => write!(f, "Bool"),
            ValueType::Int => write!(f, "Int"),
            ValueType::Float => write!(f, "Float"),
            ValueType::Text => write!(f, "Text"),
            ValueType::DateTime => write!(f, "DateTime"),
            ValueType::Entity(schema) => write!(f, "{}", schema.name()),
            ValueType::List(e) => write!(f, "List<{e}>"),
            ValueType::Query(e) => write!(f, "Query<{e}>"),
            ValueType::Sequence(e) => write!(f, "Sequence<{e}>"),
            ValueType::Function(p, r) => write!(f, "Fn({p}) -> {r}"),
        }
    }
}

/// Links a one-to-many field to the child table's column that references
/// the parent key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relation {
    pub foreign_key: String,
}

/// A named field of an entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDef {
    pub name: String,
    pub ty: ValueType,
    pub relation: Option<Relation>,
}

/// Describes a row type: its name, backing table, key column and fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntitySchema {
    name: String,
    table: String,
    key: String,
    fields: Vec<FieldDef>,
}

impl EntitySchema {
    /// Creates a schema for the entity `name` stored in `table`, keyed by `key`.
    pub fn new<N: Into<String>, T: Into<String>, K: Into<String>>(name: N, table: T, key: K) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
            key: key.into(),
            fields: vec![],
        }
    }

    /// Adds a plain field.
    pub fn with_field<N: Into<String>>(mut self, name: N, ty: ValueType) -> Self {
        self.fields.push(FieldDef {
            name: name.into(),
            ty,
            relation: None,
        });
        self
    }

    /// Adds a one-to-many field whose rows live in `child`'s table and point
    /// back through `foreign_key`.
    pub fn with_relation<N: Into<String>, F: Into<String>>(
        mut self,
        name: N,
        child: EntityRef,
        foreign_key: F,
    ) -> Self {
        self.fields.push(FieldDef {
            name: name.into(),
            ty: ValueType::list(ValueType::Entity(child)),
            relation: Some(Relation {
                foreign_key: foreign_key.into(),
            }),
        });
        self
    }

    pub fn into_ref(self) -> EntityRef {
        EntityRef(Arc::new(self))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// Shared handle to an [`EntitySchema`].
///
/// Two handles are equal when they name the same entity.
#[derive(Clone)]
pub struct EntityRef(Arc<EntitySchema>);

impl Deref for EntityRef {
    type Target = EntitySchema;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl PartialEq for EntityRef {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0) || self.0.name == other.0.name
    }
}

impl Eq for EntityRef {}

impl Hash for EntityRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.name.hash(state);
    }
}

impl fmt::Debug for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityRef({})", self.0.name)
    }
}

#[cfg(test)]
mod tests {
    use super::{EntitySchema, ValueType};

    #[test]
    fn test_widening_distance() {
        let text_list = ValueType::list(ValueType::Text);
        let text_query = ValueType::query(ValueType::Text);
        let text_seq = ValueType::sequence(ValueType::Text);

        assert_eq!(Some(0), ValueType::Text.widening_distance(&ValueType::Text));
        assert_eq!(Some(1), text_list.widening_distance(&text_seq));
        assert_eq!(Some(1), text_query.widening_distance(&text_seq));
        assert_eq!(Some(2), ValueType::Int.widening_distance(&ValueType::Any));
        assert_eq!(None, ValueType::Int.widening_distance(&ValueType::Text));
        assert_eq!(
            None,
            ValueType::list(ValueType::Int).widening_distance(&text_seq)
        );
        assert_eq!(None, text_seq.widening_distance(&text_list));
        assert_eq!(None, text_list.widening_distance(&text_query));
    }

    #[test]
    fn test_schema_lookup() {
        let line = EntitySchema::new("Line", "lines", "id")
            .with_field("description", ValueType::Text)
            .into_ref();
        let header = EntitySchema::new("Header", "headers", "id")
            .with_field("name", ValueType::Text)
            .with_relation("lines", line.clone(), "header_id")
            .into_ref();

        assert_eq!(Some(&ValueType::Text), header.field("name").map(|f| &f.ty));
        assert_eq!(
            ValueType::list(ValueType::Entity(line)),
            header.field("lines").unwrap().ty
        );
        assert_eq!(
            "header_id",
            header.field("lines").unwrap().relation.as_ref().unwrap().foreign_key
        );
        assert!(header.field("missing").is_none());
        assert_eq!("List<Line>", header.field("lines").unwrap().ty.to_string());
    }
}
