//! JSON helpers shared by the wire types and the object cache.

use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use serde_json_bytes::ByteString;
use serde_json_bytes::Map;
pub use serde_json_bytes::Value;

/// A JSON object.
pub type Object = Map<ByteString, Value>;

/// A path element inside a response payload.
#[derive(Clone, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathElement {
    /// An index inside a list.
    Index(usize),

    /// A key inside an object.
    Key(String),
}

/// A path inside a response payload, used to locate shape errors.
#[derive(Clone, Debug, Default, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Path(pub Vec<PathElement>);

impl Path {
    pub fn empty() -> Self {
        Path(Vec::new())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn join_key(&self, key: impl Into<String>) -> Self {
        let mut elements = self.0.clone();
        elements.push(PathElement::Key(key.into()));
        Path(elements)
    }

    pub fn join_index(&self, index: usize) -> Self {
        let mut elements = self.0.clone();
        elements.push(PathElement::Index(index));
        Path(elements)
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return write!(f, "<root>");
        }
        for (i, element) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, "/")?;
            }
            match element {
                PathElement::Index(index) => write!(f, "{index}")?,
                PathElement::Key(key) => write!(f, "{key}")?,
            }
        }
        Ok(())
    }
}

impl<'a> FromIterator<&'a str> for Path {
    fn from_iter<T: IntoIterator<Item = &'a str>>(iter: T) -> Self {
        Path(
            iter.into_iter()
                .map(|segment| match segment.parse::<usize>() {
                    Ok(index) => PathElement::Index(index),
                    Err(_) => PathElement::Key(segment.to_string()),
                })
                .collect(),
        )
    }
}

/// Extension methods for [`Value`].
pub trait ValueExt {
    /// Returns a human readable kind for error messages.
    fn json_kind(&self) -> &'static str;

    /// Whether the value could be a GraphQL `Int` (32 bits signed).
    fn is_valid_int_input(&self) -> bool;

    /// Whether the value could be a GraphQL `Float`.
    fn is_valid_float_input(&self) -> bool;
}

impl ValueExt for Value {
    fn json_kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Array(_) => "list",
            Value::Object(_) => "object",
        }
    }

    fn is_valid_int_input(&self) -> bool {
        // Spec: https://spec.graphql.org/June2018/#sec-Int
        self.as_i64()
            .map(|int| i32::try_from(int).is_ok())
            .unwrap_or(false)
    }

    fn is_valid_float_input(&self) -> bool {
        // Spec: https://spec.graphql.org/draft/#sec-Float.Input-Coercion
        self.as_f64().map(|float| float.is_finite()).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use serde_json_bytes::json;

    use super::*;

    #[test]
    fn path_display() {
        let path: Path = ["user", "friends", "1", "name"].into_iter().collect();
        assert_eq!(path.to_string(), "user/friends/1/name");
        assert_eq!(Path::empty().to_string(), "<root>");
    }

    #[test]
    fn path_serializes_as_graphql_error_path() {
        let path = Path::empty().join_key("user").join_index(2);
        assert_eq!(
            serde_json_bytes::to_value(&path).unwrap(),
            json!(["user", 2])
        );
    }

    #[test]
    fn int_input() {
        assert!(json!(12).is_valid_int_input());
        assert!(!json!(i64::MAX).is_valid_int_input());
        assert!(!json!(1.5).is_valid_int_input());
        assert!(json!(1.5).is_valid_float_input());
        assert!(!json!("1.5").is_valid_float_input());
    }
}
