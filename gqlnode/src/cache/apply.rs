//! Decodes a response payload against a compiled selection tree.
//!
//! Nothing is written to the store while decoding: node writes are collected and only committed
//! once the whole payload matched its selections, so that a malformed response leaves the store
//! untouched.

use indexmap::IndexMap;

use super::value::merge_field;
use super::ApplyContext;
use super::FieldValue;
use super::IdentityKey;
use super::ObjectValue;
use crate::error::ResponseShapeError;
use crate::json_ext::Path;
use crate::json_ext::Value;
use crate::json_ext::ValueExt;
use crate::spec::FieldKind;
use crate::spec::FieldType;
use crate::spec::QueriedField;
use crate::spec::TypeDefinition;
use crate::spec::TYPENAME;

const ID: &str = "id";

pub(super) struct Decoder<'a> {
    context: ApplyContext<'a>,
    /// Fields of every node found, in the order they were found.
    writes: Vec<(IdentityKey, IndexMap<String, FieldValue>)>,
}

impl<'a> Decoder<'a> {
    pub(super) fn new(context: ApplyContext<'a>) -> Self {
        Self {
            context,
            writes: Vec::new(),
        }
    }

    pub(super) fn into_writes(self) -> Vec<(IdentityKey, IndexMap<String, FieldValue>)> {
        self.writes
    }

    pub(super) fn decode(
        &mut self,
        field: &QueriedField,
        value: &Value,
        path: &Path,
    ) -> Result<FieldValue, ResponseShapeError> {
        self.decode_typed(field, &field.field_type, value, path)
    }

    fn decode_typed(
        &mut self,
        field: &QueriedField,
        field_type: &FieldType,
        value: &Value,
        path: &Path,
    ) -> Result<FieldValue, ResponseShapeError> {
        match field_type {
            FieldType::NonNull(inner) => {
                if value.is_null() {
                    return Err(ResponseShapeError::new(path, "null value for non-null field"));
                }
                self.decode_typed(field, inner, value, path)
            }
            _ if value.is_null() => Ok(FieldValue::Null),
            FieldType::List(inner) => {
                let items = value.as_array().ok_or_else(|| {
                    ResponseShapeError::new(
                        path,
                        format!("expected a list, found {}", value.json_kind()),
                    )
                })?;
                items
                    .iter()
                    .enumerate()
                    .map(|(index, item)| {
                        self.decode_typed(field, inner, item, &path.join_index(index))
                    })
                    .collect::<Result<Vec<_>, _>>()
                    .map(FieldValue::List)
            }
            _ => match field.kind {
                FieldKind::Scalar | FieldKind::Enum => self.decode_leaf(field_type, value, path),
                FieldKind::Object | FieldKind::Interface | FieldKind::Union => {
                    self.decode_object(field, field_type.inner_type_name(), value, path)
                }
            },
        }
    }

    /// Leaves are copied by value after checking them against their type.
    fn decode_leaf(
        &self,
        field_type: &FieldType,
        value: &Value,
        path: &Path,
    ) -> Result<FieldValue, ResponseShapeError> {
        let valid = match field_type {
            FieldType::String => value.is_string(),
            FieldType::Id => value.is_string() || value.is_i64() || value.is_u64(),
            FieldType::Int => value.is_valid_int_input(),
            FieldType::Float => value.is_valid_float_input(),
            FieldType::Boolean => value.is_boolean(),
            FieldType::Named(name) => match self.context.registry.get(name) {
                Some(TypeDefinition::Enum(definition)) => value
                    .as_str()
                    .map(|value| definition.values.iter().any(|known| known == value))
                    .unwrap_or(false),
                Some(TypeDefinition::Scalar(_)) => {
                    self.context
                        .scalars
                        .deserialize(name, value)
                        .map_err(|error| ResponseShapeError::new(path, error.to_string()))?;
                    true
                }
                _ => false,
            },
            FieldType::List(_) | FieldType::NonNull(_) => false,
        };
        if valid {
            Ok(FieldValue::Leaf(value.clone()))
        } else {
            Err(ResponseShapeError::new(
                path,
                format!(
                    "expected a value of type {field_type}, found {}",
                    value.json_kind()
                ),
            ))
        }
    }

    fn decode_object(
        &mut self,
        field: &QueriedField,
        declared_type: &str,
        value: &Value,
        path: &Path,
    ) -> Result<FieldValue, ResponseShapeError> {
        let object = value.as_object().ok_or_else(|| {
            ResponseShapeError::new(
                path,
                format!("expected an object, found {}", value.json_kind()),
            )
        })?;
        let typename = if field.kind.is_abstract() {
            let typename = object
                .get(TYPENAME)
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    ResponseShapeError::new(
                        path,
                        format!("missing '{TYPENAME}' on a value of abstract type '{declared_type}'"),
                    )
                })?;
            if !self.context.registry.is_subtype(declared_type, typename) {
                return Err(ResponseShapeError::new(
                    path,
                    format!("'{typename}' is not a possible type of '{declared_type}'"),
                ));
            }
            typename
        } else {
            declared_type
        };

        let variables = self.context.variables;
        let mut fields = IndexMap::new();
        for selection in field.selections_for(typename) {
            if selection.include_skip.should_skip(variables) {
                continue;
            }
            let key = selection.response_key();
            let value = if selection.is_typename() {
                FieldValue::Leaf(Value::String(typename.to_string().into()))
            } else {
                let field_path = path.join_key(key);
                match object.get(key) {
                    Some(value) => self.decode(selection, value, &field_path)?,
                    None if selection.field_type.is_non_null() => {
                        return Err(ResponseShapeError::new(
                            &field_path,
                            "missing non-null field",
                        ))
                    }
                    None => FieldValue::Null,
                }
            };
            merge_field(&mut fields, selection.storage_key(variables), value);
        }

        if !self.context.registry.is_node(typename) {
            return Ok(FieldValue::Object(ObjectValue {
                typename: typename.to_string(),
                fields,
            }));
        }
        let id = match fields.get(ID) {
            Some(FieldValue::Leaf(Value::String(id))) => id.as_str().to_string(),
            Some(FieldValue::Leaf(Value::Number(id))) => id.to_string(),
            _ => {
                return Err(ResponseShapeError::new(
                    path,
                    format!("missing '{ID}' on a value of node type '{typename}'"),
                ))
            }
        };
        let key = IdentityKey::new(typename, id);
        self.writes.push((key.clone(), fields));
        Ok(FieldValue::Node(key))
    }
}
