//! Runtime values and row access.
//!
//! Conditions are evaluated against rows through [`FieldAccess`]. Application
//! row types implement [`Entity`], which adds the static schema that condition
//! builders type-check against. Loosely structured rows (e.g. JSON documents)
//! use [`Record`].

use crate::types::{EntityRef, EntitySchema, ValueType};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

/// A single runtime value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    DateTime(DateTime<Utc>),
    List(Vec<Value>),
    Record(Record),
}

impl Value {
    /// Returns the static type this value would be given as a literal.
    ///
    /// Lists take their element type from the first non-null element.
    /// Records have no schema of their own and report `Any`.
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Null | Value::Record(_) => ValueType::Any,
            Value::Bool(_) => ValueType::Bool,
            Value::Int(_) => ValueType::Int,
            Value::Float(_) => ValueType::Float,
            Value::Text(_) => ValueType::Text,
            Value::DateTime(_) => ValueType::DateTime,
            Value::List(items) => ValueType::list(
                items
                    .iter()
                    .find(|v| !matches!(v, Value::Null))
                    .map(Value::value_type)
                    .unwrap_or(ValueType::Any),
            ),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Renders a scalar as text. `Null` renders as the empty string.
    pub fn to_text(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Text(s) => s.clone(),
            Value::DateTime(dt) => dt.to_rfc3339(),
            other => other.to_string(),
        }
    }

    /// Orders two values of compatible kinds. Integers and floats compare
    /// numerically; everything else only compares against its own kind.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
            (Value::Int(a), Value::Float(b)) => (*a as f64).partial_cmp(b),
            (Value::Float(a), Value::Int(b)) => a.partial_cmp(&(*b as f64)),
            (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
            (Value::DateTime(a), Value::DateTime(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// Builds a list value out of entities.
    pub fn entities<E: Entity>(items: &[E]) -> Value {
        Value::List(items.iter().map(Entity::to_value).collect())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Text(s) => write!(f, "{s:?}"),
            Value::DateTime(dt) => write!(f, "{}", dt.to_rfc3339()),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Value::Record(record) => {
                write!(f, "{{")?;
                for (i, (k, v)) in record.0.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                write!(f, "}}")
            }
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(value.into())
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<&String> for Value {
    fn from(value: &String) -> Self {
        Value::Text(value.clone())
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(value: DateTime<Utc>) -> Self {
        Value::DateTime(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::Null)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(value: Vec<T>) -> Self {
        Value::List(value.into_iter().map(Into::into).collect())
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => n.as_f64().map(Value::Float).unwrap_or(Value::Null),
            },
            serde_json::Value::String(s) => Value::Text(s),
            serde_json::Value::Array(items) => {
                Value::List(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => Value::Record(Record(
                map.into_iter().map(|(k, v)| (k, Value::from(v))).collect(),
            )),
        }
    }
}

/// Read access to the named fields of a row.
pub trait FieldAccess {
    /// Returns the value of `name`, or `None` if the row has no such field.
    fn field(&self, name: &str) -> Option<Value>;
}

impl<T: FieldAccess + ?Sized> FieldAccess for &T {
    fn field(&self, name: &str) -> Option<Value> {
        (**self).field(name)
    }
}

/// A row type with a static schema.
pub trait Entity: FieldAccess {
    fn schema() -> EntityRef;

    /// Snapshots every schema field into a [`Record`] value, so the row can
    /// be nested inside another row's sequence field.
    fn to_value(&self) -> Value
    where
        Self: Sized,
    {
        let schema = Self::schema();
        Value::Record(Record(
            schema
                .fields()
                .iter()
                .map(|f| (f.name.clone(), self.field(&f.name).unwrap_or(Value::Null)))
                .collect(),
        ))
    }
}

/// A loosely structured row: a map from field name to value.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(transparent)]
pub struct Record(BTreeMap<String, Value>);

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<K: Into<String>, V: Into<Value>>(mut self, key: K, value: V) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Infers a schema covering every field seen across `rows`.
    ///
    /// A field's type comes from its first non-null occurrence. Nested
    /// objects become entity fields and arrays of objects become list
    /// fields of a child entity named after the field.
    pub fn infer_schema(name: &str, rows: &[Record]) -> EntitySchema {
        let mut fields: BTreeMap<&str, Vec<&Value>> = BTreeMap::new();
        for row in rows {
            for (k, v) in row.iter() {
                fields.entry(k.as_str()).or_default().push(v);
            }
        }

        fields
            .into_iter()
            .fold(EntitySchema::new(name, name, "id"), |schema, (field, values)| {
                schema.with_field(field, infer_type(field, &values))
            })
    }
}

fn infer_type(name: &str, values: &[&Value]) -> ValueType {
    let Some(first) = values.iter().find(|v| !v.is_null()) else {
        return ValueType::Any;
    };

    match first {
        Value::Record(_) => {
            let records: Vec<Record> = values
                .iter()
                .filter_map(|v| match v {
                    Value::Record(r) => Some(r.clone()),
                    _ => None,
                })
                .collect();
            ValueType::Entity(Record::infer_schema(name, &records).into_ref())
        }
        Value::List(_) => {
            let elements: Vec<&Value> = values
                .iter()
                .filter_map(|v| match v {
                    Value::List(items) => Some(items.iter()),
                    _ => None,
                })
                .flatten()
                .collect();
            ValueType::list(infer_type(name, &elements))
        }
        scalar => scalar.value_type(),
    }
}

impl FieldAccess for Record {
    fn field(&self, name: &str) -> Option<Value> {
        self.0.get(name).cloned()
    }
}

impl FromIterator<(String, Value)> for Record {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Record(iter.into_iter().collect())
    }
}
