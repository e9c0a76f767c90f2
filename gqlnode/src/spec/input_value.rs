use std::fmt;

use apollo_compiler::ast;
use indexmap::IndexMap;
use serde::Serialize;

use crate::json_ext::Object;
use crate::json_ext::Value;

/// A literal argument or default value, as written in a document.
///
/// Numbers keep their source text so that the canonical operation text reproduces them exactly.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum InputValue {
    Null,
    Boolean(bool),
    Int(String),
    Float(String),
    String(String),
    Enum(String),
    Variable(String),
    List(Vec<InputValue>),
    Object(Vec<(String, InputValue)>),
}

impl From<&'_ ast::Value> for InputValue {
    fn from(value: &'_ ast::Value) -> Self {
        match value {
            ast::Value::Null => InputValue::Null,
            ast::Value::Enum(name) => InputValue::Enum(name.to_string()),
            ast::Value::Variable(name) => InputValue::Variable(name.to_string()),
            ast::Value::String(s) => InputValue::String(s.to_string()),
            ast::Value::Float(f) => InputValue::Float(f.as_str().to_string()),
            ast::Value::Int(i) => InputValue::Int(i.as_str().to_string()),
            ast::Value::Boolean(b) => InputValue::Boolean(*b),
            ast::Value::List(items) => {
                InputValue::List(items.iter().map(|item| (&**item).into()).collect())
            }
            ast::Value::Object(fields) => InputValue::Object(
                fields
                    .iter()
                    .map(|(name, value)| (name.to_string(), (&**value).into()))
                    .collect(),
            ),
        }
    }
}

impl InputValue {
    /// Visits every variable this value references.
    pub(crate) fn for_each_variable<'a>(&'a self, f: &mut impl FnMut(&'a str)) {
        match self {
            InputValue::Variable(name) => f(name),
            InputValue::List(items) => items.iter().for_each(|item| item.for_each_variable(f)),
            InputValue::Object(fields) => fields
                .iter()
                .for_each(|(_, value)| value.for_each_variable(f)),
            InputValue::Null
            | InputValue::Boolean(_)
            | InputValue::Int(_)
            | InputValue::Float(_)
            | InputValue::String(_)
            | InputValue::Enum(_) => {}
        }
    }

    /// JSON form of the value with variables substituted. Missing variables become `null`.
    pub fn to_json(&self, variables: &Object) -> Value {
        match self {
            InputValue::Null => Value::Null,
            InputValue::Boolean(b) => Value::Bool(*b),
            InputValue::Int(i) => i
                .parse::<i64>()
                .map(|i| Value::Number(i.into()))
                .unwrap_or_else(|_| float_value(i)),
            InputValue::Float(f) => float_value(f),
            InputValue::String(s) | InputValue::Enum(s) => Value::String(s.as_str().into()),
            InputValue::Variable(name) => {
                variables.get(name.as_str()).cloned().unwrap_or(Value::Null)
            }
            InputValue::List(items) => {
                Value::Array(items.iter().map(|item| item.to_json(variables)).collect())
            }
            InputValue::Object(fields) => Value::Object(
                fields
                    .iter()
                    .map(|(name, value)| (name.as_str().into(), value.to_json(variables)))
                    .collect(),
            ),
        }
    }
}

fn float_value(text: &str) -> Value {
    text.parse::<f64>()
        .ok()
        .and_then(serde_json::Number::from_f64)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

/// Minified GraphQL syntax.
impl fmt::Display for InputValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputValue::Null => write!(f, "null"),
            InputValue::Boolean(b) => write!(f, "{b}"),
            InputValue::Int(text) | InputValue::Float(text) | InputValue::Enum(text) => {
                write!(f, "{text}")
            }
            InputValue::String(s) => {
                // JSON string escaping is valid GraphQL string escaping.
                let escaped = serde_json::to_string(s).map_err(|_| fmt::Error)?;
                write!(f, "{escaped}")
            }
            InputValue::Variable(name) => write!(f, "${name}"),
            InputValue::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            InputValue::Object(fields) => {
                write!(f, "{{")?;
                for (i, (name, value)) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{name}:{value}")?;
                }
                write!(f, "}}")
            }
        }
    }
}

/// Arguments of a selected field, in source order.
pub type Arguments = IndexMap<String, InputValue>;

#[cfg(test)]
mod tests {
    use serde_json_bytes::json;
    use test_log::test;

    use super::*;

    fn parse_value(value: &str) -> InputValue {
        let document =
            ast::Document::parse(format!("{{ f(a: {value}) }}"), "query.graphql").unwrap();
        let ast::Definition::OperationDefinition(operation) = &document.definitions[0] else {
            panic!("expected an operation");
        };
        let ast::Selection::Field(field) = &operation.selection_set[0] else {
            panic!("expected a field");
        };
        (&*field.arguments[0].value).into()
    }

    #[test]
    fn minified_display() {
        assert_eq!(
            parse_value(r#"{ name: "A \"quoted\" name", tags: [ONE, TWO], limit: $first }"#)
                .to_string(),
            r#"{name:"A \"quoted\" name",tags:[ONE,TWO],limit:$first}"#
        );
        assert_eq!(parse_value("-1.5e3").to_string(), "-1.5e3");
    }

    #[test]
    fn json_substitutes_variables() {
        let value = parse_value("{ id: $id, first: 10, ratio: 0.5, missing: $nope }");
        let variables = json!({ "id": "u1" });
        assert_eq!(
            value.to_json(variables.as_object().unwrap()),
            json!({ "id": "u1", "first": 10, "ratio": 0.5, "missing": null })
        );
    }

    #[test]
    fn collects_variables() {
        let value = parse_value("[$a, { b: $b, c: [1, $c] }]");
        let mut names = Vec::new();
        value.for_each_variable(&mut |name| names.push(name));
        assert_eq!(names, vec!["a", "b", "c"]);
    }
}
