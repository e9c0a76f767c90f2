use std::fmt;

use apollo_compiler::ast;
use apollo_compiler::parser::SourceMap;
use apollo_compiler::Node;
use indexmap::IndexMap;
use serde::Deserialize;
use serde::Serialize;

use crate::error::location_of;
use crate::error::AttachError;
use crate::error::CompileError;
use crate::error::CompileErrors;
use crate::graphql::Request;
use crate::json_ext::Object;
use crate::json_ext::Value;
use crate::scalars::ScalarCodecs;
use crate::spec::apply_input_defaults;
use crate::spec::Arguments;
use crate::spec::FieldKind;
use crate::spec::FieldType;
use crate::spec::Fragments;
use crate::spec::IncludeSkip;
use crate::spec::InputValue;
use crate::spec::QueriedField;
use crate::spec::SelectionCompiler;
use crate::spec::TypeRegistry;

mod serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Query,
    Mutation,
    Subscription,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Query => "query",
            OperationKind::Mutation => "mutation",
            OperationKind::Subscription => "subscription",
        }
    }
}

impl OperationKind {
    /// Whether a fetch of this kind yields a stream of responses.
    pub(crate) fn is_streaming(self) -> bool {
        self == OperationKind::Subscription
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<ast::OperationType> for OperationKind {
    fn from(operation_type: ast::OperationType) -> Self {
        match operation_type {
            ast::OperationType::Query => OperationKind::Query,
            ast::OperationType::Mutation => OperationKind::Mutation,
            ast::OperationType::Subscription => OperationKind::Subscription,
        }
    }
}

/// A variable declared by an operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VariableDefinition {
    pub name: String,
    pub ty: FieldType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<InputValue>,
}

impl VariableDefinition {
    pub fn default_value(&self) -> Option<Value> {
        self.default
            .as_ref()
            .map(|default| default.to_json(&Object::new()))
    }
}

/// A compiled operation, ready to be sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperationDefinition {
    pub kind: OperationKind,
    pub name: String,
    pub variables: Vec<VariableDefinition>,
    /// The selections of the operation, as a field of the root type.
    pub root: QueriedField,
    /// Canonical text sent over the wire.
    pub text: String,
}

impl OperationDefinition {
    /// Compiles one operation of a document.
    ///
    /// Every variable used by the compiled selections must be declared, and every declared
    /// variable must be used.
    pub(crate) fn compile(
        registry: &TypeRegistry,
        operation: &Node<ast::OperationDefinition>,
        fragments: &Fragments,
        sources: &SourceMap,
    ) -> Result<OperationDefinition, CompileErrors> {
        let location = location_of(operation, sources);
        let Some(name) = &operation.name else {
            return Err(CompileError::AnonymousOperation { location }.into());
        };
        let name = name.to_string();
        let kind = OperationKind::from(operation.operation_type);
        let Some(root_type) = registry.root_type(kind) else {
            return Err(CompileError::MissingRootType {
                operation_type: kind.to_string(),
                location,
            }
            .into());
        };

        let mut errors = CompileErrors::default();
        let mut declared = IndexMap::new();
        let mut variables = Vec::with_capacity(operation.variables.len());
        for definition in &operation.variables {
            let ty = FieldType::from(&*definition.ty);
            let location = location_of(definition, sources);
            if registry.get(ty.inner_type_name()).is_none() {
                errors.push(CompileError::UnknownType {
                    name: ty.inner_type_name().to_string(),
                    location,
                });
            }
            declared.insert(definition.name.to_string(), location);
            variables.push(VariableDefinition {
                name: definition.name.to_string(),
                ty,
                default: definition
                    .default_value
                    .as_ref()
                    .map(|value| InputValue::from(&**value)),
            });
        }

        let mut compiler = SelectionCompiler::new(registry, fragments, sources);
        let selections = compiler.compile_root(root_type, &operation.selection_set);
        let SelectionCompiler {
            variables: used,
            errors: selection_errors,
            ..
        } = compiler;
        errors.extend(selection_errors);

        for (variable, location) in &used {
            if !declared.contains_key(variable) {
                errors.push(CompileError::UndeclaredVariable {
                    name: variable.clone(),
                    operation: name.clone(),
                    location: *location,
                });
            }
        }
        for (variable, location) in &declared {
            if !used.contains_key(variable) {
                errors.push(CompileError::UnusedVariable {
                    name: variable.clone(),
                    operation: name.clone(),
                    location: *location,
                });
            }
        }

        let root = QueriedField {
            name: root_type.to_string(),
            alias: None,
            arguments: Arguments::new(),
            field_type: FieldType::named(root_type).non_null(),
            kind: FieldKind::Object,
            selections,
            choices: IndexMap::new(),
            include_skip: IncludeSkip::default(),
        };
        let text = serialize::OperationText {
            kind,
            name: &name,
            variables: &variables,
            root: &root,
        }
        .to_string();

        errors.into_result(OperationDefinition {
            kind,
            name,
            variables,
            root,
            text,
        })
    }

    /// Coerces the variables given by a consumer against the declarations of the operation.
    ///
    /// Declared defaults are filled in, including the defaults of input object fields.
    pub fn coerce_variables(
        &self,
        provided: &Object,
        registry: &TypeRegistry,
        scalars: &ScalarCodecs,
    ) -> Result<Object, AttachError> {
        let invalid = |reason: String| AttachError::InvalidVariables {
            operation: self.name.clone(),
            reason,
        };
        if let Some(unknown) = provided.keys().find(|key| {
            !self
                .variables
                .iter()
                .any(|variable| variable.name == key.as_str())
        }) {
            return Err(invalid(format!("unknown variable '${}'", unknown.as_str())));
        }

        let mut coerced = Object::new();
        for variable in &self.variables {
            let provided = provided.get(variable.name.as_str()).cloned();
            let mut value = match provided.or_else(|| variable.default_value()) {
                Some(value) => value,
                None if variable.ty.is_non_null() => {
                    return Err(invalid(format!(
                        "missing value for non-null variable '${}' of type {}",
                        variable.name, variable.ty
                    )))
                }
                None => continue,
            };
            if variable
                .ty
                .validate_input_value(&value, registry, scalars)
                .is_err()
            {
                return Err(invalid(format!(
                    "invalid value for variable '${}' of type {}",
                    variable.name, variable.ty
                )));
            }
            apply_input_defaults(&variable.ty, &mut value, registry);
            coerced.insert(variable.name.as_str(), value);
        }
        Ok(coerced)
    }

    /// The request sending this operation with already coerced variables.
    pub fn request(&self, variables: Object) -> Request {
        Request::builder()
            .query(self.text.clone())
            .operation_name(self.name.clone())
            .variables(variables)
            .build()
    }
}
