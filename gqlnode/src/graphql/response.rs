use serde::Deserialize;
use serde::Serialize;
use serde_json_bytes::ByteString;
use serde_json_bytes::Map;

use crate::error::FetchError;
use crate::graphql::Error;
use crate::json_ext::Object;
use crate::json_ext::Value;
use crate::json_ext::ValueExt;

/// A GraphQL response as delivered by the transport, either the single result of a query or
/// mutation or one `next` payload of a subscription.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct Response {
    /// The response data.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub data: Option<Value>,

    /// The optional graphql errors encountered.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub errors: Vec<Error>,

    /// The optional graphql extensions.
    #[serde(skip_serializing_if = "Object::is_empty", default)]
    pub extensions: Object,
}

#[buildstructor::buildstructor]
impl Response {
    /// Constructor
    #[builder(visibility = "pub")]
    fn new(data: Option<Value>, errors: Vec<Error>, extensions: Map<ByteString, Value>) -> Self {
        Self {
            data,
            errors,
            extensions,
        }
    }

    /// Create a [`Response`] from a JSON payload.
    ///
    /// Fails if the payload is not an object, or if `data` is neither an object nor `null`.
    pub fn from_value(value: Value) -> Result<Response, FetchError> {
        let mut object = match value {
            Value::Object(object) => object,
            other => {
                return Err(FetchError::MalformedResponse {
                    reason: format!("expected an object, found {}", other.json_kind()),
                })
            }
        };

        let data = match object.remove("data") {
            None | Some(Value::Null) => None,
            Some(data @ Value::Object(_)) => Some(data),
            Some(other) => {
                return Err(FetchError::MalformedResponse {
                    reason: format!("'data' must be an object, found {}", other.json_kind()),
                })
            }
        };
        let errors = match object.remove("errors") {
            None | Some(Value::Null) => Vec::new(),
            Some(errors) => serde_json_bytes::from_value(errors).map_err(|error| {
                FetchError::MalformedResponse {
                    reason: format!("invalid 'errors': {error}"),
                }
            })?,
        };
        let extensions = match object.remove("extensions") {
            Some(Value::Object(extensions)) => extensions,
            _ => Object::default(),
        };

        Ok(Response {
            data,
            errors,
            extensions,
        })
    }

    /// Whether the response reports any GraphQL error.
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}
