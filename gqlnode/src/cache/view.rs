use indexmap::IndexMap;

use super::FieldValue;
use super::IdentityKey;
use super::ObjectGraphStore;
use crate::json_ext::Object;
use crate::json_ext::Value;
use crate::spec::QueriedField;

/// Read access to an object of a result graph, restricted to the selections of the operation
/// that fetched it.
///
/// Node fields are read from the store, so a view always shows the latest values of the nodes
/// it reaches, whichever operation wrote them.
#[derive(Debug, Clone, Copy)]
pub struct ObjectView<'a> {
    store: &'a ObjectGraphStore,
    variables: &'a Object,
    typename: &'a str,
    identity: Option<&'a IdentityKey>,
    fields: &'a IndexMap<String, FieldValue>,
    selections: &'a [QueriedField],
}

/// Read access to one field value.
#[derive(Debug, Clone)]
pub enum FieldView<'a> {
    Null,
    Leaf(&'a Value),
    List(Vec<FieldView<'a>>),
    Object(ObjectView<'a>),
}

impl<'a> ObjectView<'a> {
    pub(super) fn new(
        store: &'a ObjectGraphStore,
        variables: &'a Object,
        typename: &'a str,
        fields: &'a IndexMap<String, FieldValue>,
        selections: &'a [QueriedField],
    ) -> Self {
        Self {
            store,
            variables,
            typename,
            identity: None,
            fields,
            selections,
        }
    }

    pub fn typename(&self) -> &'a str {
        self.typename
    }

    /// The identity of the object, if it is a node.
    pub fn identity(&self) -> Option<&'a IdentityKey> {
        self.identity
    }

    pub fn selections(&self) -> &'a [QueriedField] {
        self.selections
    }

    /// The value of the field selected under `response_key`.
    ///
    /// `None` if nothing is selected under that key, or if the selection is skipped for the
    /// variables of the graph.
    pub fn get(&self, response_key: &str) -> Option<FieldView<'a>> {
        let selection = self
            .selections
            .iter()
            .find(|selection| selection.response_key() == response_key)?;
        if selection.include_skip.should_skip(self.variables) {
            return None;
        }
        Some(
            self.fields
                .get(&selection.storage_key(self.variables))
                .map(|value| self.field(selection, value))
                .unwrap_or(FieldView::Null),
        )
    }

    fn field(&self, selection: &'a QueriedField, value: &'a FieldValue) -> FieldView<'a> {
        match value {
            FieldValue::Null => FieldView::Null,
            FieldValue::Leaf(value) => FieldView::Leaf(value),
            FieldValue::List(items) => FieldView::List(
                items
                    .iter()
                    .map(|item| self.field(selection, item))
                    .collect(),
            ),
            FieldValue::Object(object) => FieldView::Object(ObjectView::new(
                self.store,
                self.variables,
                &object.typename,
                &object.fields,
                selection.selections_for(&object.typename),
            )),
            // a node evicted by a graph that is not this one reads as null
            FieldValue::Node(key) => match self.store.get(key) {
                Some(node) => FieldView::Object(ObjectView {
                    identity: Some(&node.key),
                    ..ObjectView::new(
                        self.store,
                        self.variables,
                        &node.key.typename,
                        &node.fields,
                        selection.selections_for(&node.key.typename),
                    )
                }),
                None => FieldView::Null,
            },
        }
    }

    /// The object as a response would carry it.
    pub fn to_value(&self) -> Value {
        let mut object = Object::new();
        for selection in self.selections {
            let key = selection.response_key();
            if let Some(field) = self.get(key) {
                object.insert(key, field.to_value());
            }
        }
        Value::Object(object)
    }
}

impl<'a> FieldView<'a> {
    pub fn is_null(&self) -> bool {
        matches!(self, FieldView::Null)
    }

    pub fn as_leaf(&self) -> Option<&'a Value> {
        match self {
            FieldView::Leaf(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[FieldView<'a>]> {
        match self {
            FieldView::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&ObjectView<'a>> {
        match self {
            FieldView::Object(object) => Some(object),
            _ => None,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            FieldView::Null => Value::Null,
            FieldView::Leaf(value) => (*value).clone(),
            FieldView::List(items) => Value::Array(items.iter().map(FieldView::to_value).collect()),
            FieldView::Object(object) => object.to_value(),
        }
    }
}
