use std::fmt;

use indexmap::IndexMap;
use serde::Serialize;

use crate::json_ext::Value;

/// Address of a cached node: its concrete type and its id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct IdentityKey {
    pub typename: String,
    pub id: String,
}

impl IdentityKey {
    pub fn new(typename: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            typename: typename.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.typename, self.id)
    }
}

/// A stored field value.
///
/// Nodes are stored once, in the store, and referenced by key everywhere else. Every other
/// object is owned by the value containing it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    Null,
    Leaf(Value),
    List(Vec<FieldValue>),
    Object(ObjectValue),
    Node(IdentityKey),
}

/// An object without identity.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ObjectValue {
    pub typename: String,
    /// Values by storage key.
    pub fields: IndexMap<String, FieldValue>,
}

/// Writes `incoming` over `fields`.
///
/// Objects without identity of the same type are merged field by field, so that selections of
/// different operations on the same node field accumulate. Anything else is replaced.
pub(crate) fn merge_fields(
    fields: &mut IndexMap<String, FieldValue>,
    incoming: IndexMap<String, FieldValue>,
) {
    for (key, value) in incoming {
        merge_field(fields, key, value);
    }
}

pub(crate) fn merge_field(fields: &mut IndexMap<String, FieldValue>, key: String, value: FieldValue) {
    match (fields.get_mut(&key), value) {
        (Some(FieldValue::Object(existing)), FieldValue::Object(object))
            if existing.typename == object.typename =>
        {
            merge_fields(&mut existing.fields, object.fields)
        }
        (Some(existing), value) => *existing = value,
        (None, value) => {
            fields.insert(key, value);
        }
    }
}
