//! Compile time and runtime errors.
use std::fmt;

use apollo_compiler::parser::SourceMap;
use apollo_compiler::Node;
use displaydoc::Display;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

pub use crate::configuration::ConfigurationError;
use crate::graphql::ErrorExtension;
pub(crate) use crate::graphql::Location;
use crate::json_ext::Path;

/// Errors raised while compiling a schema and its operations.
///
/// Every variant naming a schema or document element carries the location of that element when
/// the parser could provide one.
#[derive(Error, Display, Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
#[ignore_extra_doc_attributes]
#[non_exhaustive]
pub enum CompileError {
    /// parsing error: {message}
    Parsing { message: String },

    /// unknown type '{name}'
    UnknownType {
        name: String,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        location: Option<Location>,
    },

    /// type '{name}' is defined more than once
    DuplicateType {
        name: String,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        location: Option<Location>,
    },

    /// custom scalar '{name}' has no codec
    UnknownScalar {
        name: String,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        location: Option<Location>,
    },

    /// cyclic definition: {cycle}
    CyclicDefinition {
        /// The types forming the cycle, joined with ` -> `.
        cycle: String,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        location: Option<Location>,
    },

    /// fragment '{name}' spreads itself: {cycle}
    CyclicFragment {
        name: String,
        cycle: String,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        location: Option<Location>,
    },

    /// fragment '{name}' is defined more than once
    DuplicateFragment {
        name: String,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        location: Option<Location>,
    },

    /// unknown fragment '{name}'
    UnknownFragment {
        name: String,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        location: Option<Location>,
    },

    /// cannot query field '{field}' on type '{type_name}'
    UnknownField {
        field: String,
        type_name: String,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        location: Option<Location>,
    },

    /// field '{response_key}' on type '{type_name}' is selected with different arguments
    ConflictingFieldArguments {
        response_key: String,
        type_name: String,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        location: Option<Location>,
    },

    /// response key '{response_key}' selects both '{first}' and '{second}'
    ConflictingFieldNames {
        response_key: String,
        first: String,
        second: String,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        location: Option<Location>,
    },

    /// field '{response_key}' is selected under @include/@skip conditions that cannot be combined
    ConflictingConditions {
        response_key: String,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        location: Option<Location>,
    },

    /// variable '${name}' is used but not declared by operation '{operation}'
    UndeclaredVariable {
        name: String,
        operation: String,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        location: Option<Location>,
    },

    /// variable '${name}' is declared but never used by operation '{operation}'
    UnusedVariable {
        name: String,
        operation: String,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        location: Option<Location>,
    },

    /// cannot select '{field}' on root type '{root_type}'
    InvalidRootSelection {
        field: String,
        root_type: String,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        location: Option<Location>,
    },

    /// schema defines no {operation_type} root type
    MissingRootType {
        operation_type: String,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        location: Option<Location>,
    },

    /// fragment on '{type_condition}' can never apply to '{parent_type}'
    InvalidTypeCondition {
        type_condition: String,
        parent_type: String,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        location: Option<Location>,
    },

    /// operation '{name}' is defined more than once
    DuplicateOperation {
        name: String,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        location: Option<Location>,
    },

    /// operations must be named
    AnonymousOperation {
        #[serde(skip_serializing_if = "Option::is_none", default)]
        location: Option<Location>,
    },
}

impl CompileError {
    /// Where the error was found, if known.
    pub fn location(&self) -> Option<Location> {
        match self {
            CompileError::Parsing { .. } => None,
            CompileError::UnknownType { location, .. }
            | CompileError::DuplicateType { location, .. }
            | CompileError::UnknownScalar { location, .. }
            | CompileError::CyclicDefinition { location, .. }
            | CompileError::CyclicFragment { location, .. }
            | CompileError::DuplicateFragment { location, .. }
            | CompileError::UnknownFragment { location, .. }
            | CompileError::UnknownField { location, .. }
            | CompileError::ConflictingFieldArguments { location, .. }
            | CompileError::ConflictingFieldNames { location, .. }
            | CompileError::ConflictingConditions { location, .. }
            | CompileError::UndeclaredVariable { location, .. }
            | CompileError::UnusedVariable { location, .. }
            | CompileError::InvalidRootSelection { location, .. }
            | CompileError::MissingRootType { location, .. }
            | CompileError::InvalidTypeCondition { location, .. }
            | CompileError::DuplicateOperation { location, .. }
            | CompileError::AnonymousOperation { location } => *location,
        }
    }
}

/// Every error accumulated by one compile step.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct CompileErrors {
    pub errors: Vec<CompileError>,
}

impl CompileErrors {
    /// Adds an error unless the very same one was already reported.
    pub(crate) fn push(&mut self, error: CompileError) {
        if !self.errors.contains(&error) {
            self.errors.push(error);
        }
    }

    pub(crate) fn extend(&mut self, errors: impl IntoIterator<Item = CompileError>) {
        errors.into_iter().for_each(|error| self.push(error));
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CompileError> {
        self.errors.iter()
    }

    /// `Ok(value)` if nothing was accumulated.
    pub(crate) fn into_result<T>(self, value: T) -> Result<T, CompileErrors> {
        if self.errors.is_empty() {
            Ok(value)
        } else {
            Err(self)
        }
    }
}

impl From<CompileError> for CompileErrors {
    fn from(error: CompileError) -> Self {
        CompileErrors {
            errors: vec![error],
        }
    }
}

impl IntoIterator for CompileErrors {
    type Item = CompileError;
    type IntoIter = std::vec::IntoIter<CompileError>;

    fn into_iter(self) -> Self::IntoIter {
        self.errors.into_iter()
    }
}

impl fmt::Display for CompileErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, error) in self.errors.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            match error.location() {
                Some(location) => write!(f, "[{location}] {error}")?,
                None => write!(f, "{error}")?,
            }
        }
        Ok(())
    }
}

impl std::error::Error for CompileErrors {}

/// Non fatal findings of a compile step.
#[derive(Display, Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
#[non_exhaustive]
pub enum CompileWarning {
    /// type '{type_name}' is queried with a nullable 'id': treating it as non-null to cache it by identity
    IdentityWidened { type_name: String },
}

/// Errors surfaced while fetching an operation.
///
/// These are reported to consumers as data, never as panics.
#[derive(Error, Display, Debug, Clone, Serialize, Eq, PartialEq)]
#[serde(untagged)]
#[ignore_extra_doc_attributes]
#[non_exhaustive]
pub enum FetchError {
    /// transport failed: {reason}
    Transport {
        /// The reason the fetch failed.
        reason: String,
    },

    /// response was malformed: {reason}
    MalformedResponse {
        /// The reason the deserialization failed.
        reason: String,
    },

    /// subscription stream ended with an error: {reason}
    Subscription { reason: String },
}

impl ErrorExtension for FetchError {
    fn extension_code(&self) -> String {
        match self {
            FetchError::Transport { .. } => "TRANSPORT_ERROR",
            FetchError::MalformedResponse { .. } => "MALFORMED_RESPONSE",
            FetchError::Subscription { .. } => "SUBSCRIPTION_ERROR",
        }
        .to_string()
    }
}

/// invalid response at '{path}': {reason}
#[derive(Error, Display, Debug, Clone, Serialize, Eq, PartialEq)]
pub struct ResponseShapeError {
    pub path: Path,
    pub reason: String,
}

impl ResponseShapeError {
    pub(crate) fn new(path: &Path, reason: impl Into<String>) -> Self {
        ResponseShapeError {
            path: path.clone(),
            reason: reason.into(),
        }
    }

    /// Converts the shape error to the GraphQL error exposed to consumers.
    pub fn to_graphql_error(&self) -> crate::graphql::Error {
        ErrorExtension::to_graphql_error(self, Some(self.path.clone()))
    }
}

impl ErrorExtension for ResponseShapeError {
    fn extension_code(&self) -> String {
        "RESPONSE_SHAPE_ERROR".to_string()
    }
}

/// Errors returned by the consumer facing runtime API.
#[derive(Error, Display, Debug, Clone, Serialize, Eq, PartialEq)]
#[non_exhaustive]
pub enum AttachError {
    /// unknown environment '{0}'
    UnknownEnvironment(String),

    /// unknown operation '{operation}' in environment '{environment}'
    UnknownOperation {
        environment: String,
        operation: String,
    },

    /// invalid variables for operation '{operation}': {reason}
    InvalidVariables { operation: String, reason: String },

    /// the handle is not attached
    UnknownHandle,
}

/// invalid value for scalar '{scalar}': {reason}
#[derive(Error, Display, Debug, Clone, Serialize, Eq, PartialEq)]
pub struct ScalarError {
    pub scalar: String,
    pub reason: String,
}

/// Start of the node in the parsed sources.
pub(crate) fn location_of<T>(node: &Node<T>, sources: &SourceMap) -> Option<Location> {
    node.line_column_range(sources).map(|range| Location {
        line: range.start.line as u32,
        column: range.start.column as u32,
    })
}
