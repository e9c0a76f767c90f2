use apollo_compiler::ast;
use serde::Deserialize;
use serde::Serialize;

use crate::json_ext::Object;
use crate::json_ext::Value;
use crate::json_ext::ValueExt;
use crate::scalars::ScalarCodecs;
use crate::spec::TypeDefinition;
use crate::spec::TypeRegistry;

#[derive(Debug)]
pub(crate) struct InvalidValue;

// Primitives are taken from scalars: https://spec.graphql.org/draft/#sec-Scalars
/// A reference to a type, with its nullability and list wrappers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldType {
    /// Named type {0}
    Named(String),
    /// List type {0}
    List(Box<FieldType>),
    /// Non null type {0}
    NonNull(Box<FieldType>),
    /// String
    String,
    /// Int
    Int,
    /// Float
    Float,
    /// Id
    Id,
    /// Boolean
    Boolean,
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldType::Named(ty) => write!(f, "{ty}"),
            FieldType::List(ty) => write!(f, "[{ty}]"),
            FieldType::NonNull(ty) => write!(f, "{ty}!"),
            FieldType::String => write!(f, "String"),
            FieldType::Int => write!(f, "Int"),
            FieldType::Float => write!(f, "Float"),
            FieldType::Id => write!(f, "ID"),
            FieldType::Boolean => write!(f, "Boolean"),
        }
    }
}

impl FieldType {
    pub(crate) fn named(name: &str) -> Self {
        match name {
            "String" => Self::String,
            "Int" => Self::Int,
            "Float" => Self::Float,
            "ID" => Self::Id,
            "Boolean" => Self::Boolean,
            _ => Self::Named(name.to_string()),
        }
    }

    pub(crate) fn non_null(self) -> Self {
        match self {
            FieldType::NonNull(_) => self,
            other => FieldType::NonNull(Box::new(other)),
        }
    }

    /// return the name of the type on which selections happen
    ///
    /// Example if we get the field `list: [User!]!`, it will return "User"
    pub fn inner_type_name(&self) -> &str {
        match self {
            FieldType::Named(name) => name.as_str(),
            FieldType::List(inner) | FieldType::NonNull(inner) => inner.inner_type_name(),
            FieldType::String => "String",
            FieldType::Int => "Int",
            FieldType::Float => "Float",
            FieldType::Id => "ID",
            FieldType::Boolean => "Boolean",
        }
    }

    pub fn is_builtin_scalar(&self) -> bool {
        match self {
            FieldType::Named(_) | FieldType::List(_) | FieldType::NonNull(_) => false,
            FieldType::String
            | FieldType::Int
            | FieldType::Float
            | FieldType::Id
            | FieldType::Boolean => true,
        }
    }

    pub fn is_non_null(&self) -> bool {
        matches!(self, FieldType::NonNull(_))
    }

    /// Number of list wrappers, `[[Int!]]!` has two.
    pub fn list_depth(&self) -> usize {
        match self {
            FieldType::List(inner) => 1 + inner.list_depth(),
            FieldType::NonNull(inner) => inner.list_depth(),
            _ => 0,
        }
    }

    /// The type without its outer non-null wrapper.
    pub fn nullable(&self) -> &FieldType {
        match self {
            FieldType::NonNull(inner) => inner,
            other => other,
        }
    }

    /// Whether this is the `ID!` of the identity contract.
    pub(crate) fn is_non_null_id(&self) -> bool {
        matches!(self, FieldType::NonNull(inner) if **inner == FieldType::Id)
    }

    // This function validates input values according to the graphql specification.
    // Each of the values are validated against the "input coercion" rules.
    pub(crate) fn validate_input_value(
        &self,
        value: &Value,
        registry: &TypeRegistry,
        scalars: &ScalarCodecs,
    ) -> Result<(), InvalidValue> {
        match (self, value) {
            (FieldType::String, Value::String(_)) => Ok(()),
            // Spec: https://spec.graphql.org/June2018/#sec-Int
            (FieldType::Int, maybe_int) => {
                if maybe_int == &Value::Null || maybe_int.is_valid_int_input() {
                    Ok(())
                } else {
                    Err(InvalidValue)
                }
            }
            // Spec: https://spec.graphql.org/draft/#sec-Float.Input-Coercion
            (FieldType::Float, maybe_float) => {
                if maybe_float == &Value::Null || maybe_float.is_valid_float_input() {
                    Ok(())
                } else {
                    Err(InvalidValue)
                }
            }
            // "The ID scalar type represents a unique identifier, often used to refetch an object
            // or as the key for a cache. The ID type is serialized in the same way as a String;
            // however, it is not intended to be human-readable. While it is often numeric, it
            // should always serialize as a String."
            //
            // In practice it seems Int works too
            (FieldType::Id, Value::String(_)) => Ok(()),
            (FieldType::Id, maybe_int) => {
                if maybe_int == &Value::Null || maybe_int.is_valid_int_input() {
                    Ok(())
                } else {
                    Err(InvalidValue)
                }
            }
            (FieldType::Boolean, Value::Bool(_)) => Ok(()),
            (FieldType::List(inner_ty), Value::Array(vec)) => vec
                .iter()
                .try_for_each(|x| inner_ty.validate_input_value(x, registry, scalars)),
            // For coercion from single value to list
            (FieldType::List(inner_ty), val) if val != &Value::Null => {
                inner_ty.validate_input_value(val, registry, scalars)
            }
            (FieldType::NonNull(inner_ty), value) => {
                if value.is_null() {
                    Err(InvalidValue)
                } else {
                    inner_ty.validate_input_value(value, registry, scalars)
                }
            }
            // NOTE: graphql's types are all optional by default
            (_, Value::Null) => Ok(()),
            (FieldType::Named(name), value) => match registry.get(name) {
                Some(TypeDefinition::Scalar(_)) => scalars
                    .deserialize(name, value)
                    .map(|_| ())
                    .map_err(|_| InvalidValue),
                Some(TypeDefinition::Enum(definition)) => match value.as_str() {
                    Some(value) if definition.values.iter().any(|v| v == value) => Ok(()),
                    _ => Err(InvalidValue),
                },
                Some(TypeDefinition::InputObject(definition)) => value
                    .as_object()
                    .ok_or(InvalidValue)
                    .and_then(|object| definition.validate_object(object, registry, scalars)),
                _ => Err(InvalidValue),
            },
            _ => Err(InvalidValue),
        }
    }
}

impl From<&'_ ast::Type> for FieldType {
    // Spec: https://spec.graphql.org/draft/#sec-Type-References
    fn from(ty: &'_ ast::Type) -> Self {
        match ty {
            ast::Type::Named(name) => Self::named(name.as_str()),
            ast::Type::NonNullNamed(name) => Self::NonNull(Box::new(Self::named(name.as_str()))),
            ast::Type::List(inner) => Self::List(Box::new((&**inner).into())),
            ast::Type::NonNullList(inner) => {
                Self::NonNull(Box::new(Self::List(Box::new((&**inner).into()))))
            }
        }
    }
}

/// Fills declared defaults into an input object, recursively, the way a server coerces it.
pub(crate) fn apply_input_defaults(
    ty: &FieldType,
    value: &mut Value,
    registry: &TypeRegistry,
) {
    match (ty, value) {
        (FieldType::NonNull(inner), value) => apply_input_defaults(inner, value, registry),
        (FieldType::List(inner), Value::Array(items)) => items
            .iter_mut()
            .for_each(|item| apply_input_defaults(inner, item, registry)),
        (FieldType::Named(name), Value::Object(object)) => {
            if let Some(TypeDefinition::InputObject(definition)) = registry.get(name) {
                fill_object_defaults(definition.fields.values(), object, registry);
            }
        }
        _ => {}
    }
}

fn fill_object_defaults<'a>(
    fields: impl Iterator<Item = &'a crate::spec::InputValueDefinition>,
    object: &mut Object,
    registry: &TypeRegistry,
) {
    for field in fields {
        match object.get_mut(field.name.as_str()) {
            Some(value) => apply_input_defaults(&field.ty, value, registry),
            None => {
                if let Some(default) = &field.default_value {
                    object.insert(field.name.as_str(), default.clone());
                }
            }
        }
    }
}
