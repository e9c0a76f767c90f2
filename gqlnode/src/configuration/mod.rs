//! Logic for loading configuration in to an object model
use std::fs;
use std::path::Path;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use displaydoc::Display;
use indexmap::IndexMap;
use schemars::gen::SchemaSettings;
use schemars::schema::RootSchema;
use schemars::JsonSchema;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::scalars::OpaqueCodec;
use crate::scalars::ScalarCodecs;

/// Configuration error.
#[derive(Debug, Error, Display)]
#[non_exhaustive]
pub enum ConfigurationError {
    /// could not read '{path}': {error}
    Read {
        path: String,
        error: std::io::Error,
    },
    /// could not deserialize configuration: {0}
    Deserialize(serde_yaml::Error),
    /// {message}: {error}
    InvalidConfiguration {
        message: &'static str,
        error: String,
    },
}

/// The configuration of one environment: where its schema and operations live and how its custom
/// scalars are represented.
///
/// Can be created through `serde::Deserialize` from YAML or JSON, or inline in Rust code with the
/// builder.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields, default)]
pub struct Configuration {
    /// Name of the environment the compiled operations run in.
    pub environment: String,

    /// Path of the SDL file.
    pub schema: PathBuf,

    /// Paths of the documents holding operations and fragments.
    pub operations: Vec<PathBuf>,

    /// Custom scalars declared by the schema, by name.
    pub custom_scalars: IndexMap<String, CustomScalarConfig>,
}

/// A custom scalar whose values are passed through untouched unless the embedding application
/// registers a codec for it.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct CustomScalarConfig {
    /// Name of the native representation of the scalar.
    pub native_type: String,
}

fn default_environment() -> String {
    "default_env".to_string()
}

fn default_schema() -> PathBuf {
    PathBuf::from("graphql/schema.graphql")
}

fn default_operations() -> Vec<PathBuf> {
    vec![PathBuf::from("graphql/operations.graphql")]
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            environment: default_environment(),
            schema: default_schema(),
            operations: default_operations(),
            custom_scalars: IndexMap::new(),
        }
    }
}

/// Source texts referenced by a [`Configuration`].
#[derive(Debug, Clone)]
pub struct Sources {
    pub schema: (PathBuf, String),
    pub operations: Vec<(PathBuf, String)>,
}

#[buildstructor::buildstructor]
impl Configuration {
    #[builder(visibility = "pub")]
    fn new(
        environment: Option<String>,
        schema: Option<PathBuf>,
        operations: Vec<PathBuf>,
        custom_scalars: Option<IndexMap<String, CustomScalarConfig>>,
    ) -> Self {
        Self {
            environment: environment.unwrap_or_else(default_environment),
            schema: schema.unwrap_or_else(default_schema),
            operations: if operations.is_empty() {
                default_operations()
            } else {
                operations
            },
            custom_scalars: custom_scalars.unwrap_or_default(),
        }
    }

    /// Parse configuration from a string in YAML syntax.
    pub fn from_yaml_str(s: &str) -> Result<Self, ConfigurationError> {
        let configuration: Configuration =
            serde_yaml::from_str(s).map_err(ConfigurationError::Deserialize)?;
        configuration.validate()?;
        Ok(configuration)
    }

    /// Reads a configuration file. Relative paths inside it are resolved against the directory
    /// holding the file.
    pub fn read(path: impl AsRef<Path>) -> Result<Self, ConfigurationError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|error| ConfigurationError::Read {
            path: path.display().to_string(),
            error,
        })?;
        let mut configuration = Self::from_yaml_str(&contents)?;
        if let Some(base) = path.parent() {
            configuration.resolve_relative_to(base);
        }
        Ok(configuration)
    }

    /// The JSON schema of the configuration file.
    pub fn json_schema() -> RootSchema {
        let settings = SchemaSettings::draft2019_09().with(|s| {
            s.option_nullable = true;
            s.option_add_null_type = false;
        });
        settings.into_generator().into_root_schema_for::<Configuration>()
    }

    fn validate(&self) -> Result<(), ConfigurationError> {
        if self.environment.trim().is_empty() {
            return Err(ConfigurationError::InvalidConfiguration {
                message: "environment must not be empty",
                error: format!("{:?}", self.environment),
            });
        }
        if self.operations.is_empty() {
            return Err(ConfigurationError::InvalidConfiguration {
                message: "no operation documents",
                error: "at least one path is required in 'operations'".to_string(),
            });
        }
        if let Some((name, _)) = self
            .custom_scalars
            .iter()
            .find(|(_, scalar)| scalar.native_type.trim().is_empty())
        {
            return Err(ConfigurationError::InvalidConfiguration {
                message: "custom scalar without native type",
                error: name.clone(),
            });
        }
        Ok(())
    }

    fn resolve_relative_to(&mut self, base: &Path) {
        if self.schema.is_relative() {
            self.schema = base.join(&self.schema);
        }
        for operation in &mut self.operations {
            if operation.is_relative() {
                *operation = base.join(&*operation);
            }
        }
    }

    /// Reads the schema and operation documents.
    pub fn read_sources(&self) -> Result<Sources, ConfigurationError> {
        let read = |path: &PathBuf| {
            fs::read_to_string(path)
                .map(|contents| (path.clone(), contents))
                .map_err(|error| ConfigurationError::Read {
                    path: path.display().to_string(),
                    error,
                })
        };
        Ok(Sources {
            schema: read(&self.schema)?,
            operations: self
                .operations
                .iter()
                .map(read)
                .collect::<Result<_, _>>()?,
        })
    }

    /// Codecs for the built-in scalars plus a pass-through codec for every configured custom
    /// scalar.
    pub fn scalar_codecs(&self) -> ScalarCodecs {
        let mut codecs = ScalarCodecs::default();
        for (name, scalar) in &self.custom_scalars {
            if !codecs.contains(name) {
                codecs.register(name, Arc::new(OpaqueCodec::new(&scalar.native_type)));
            }
        }
        codecs
    }
}

/// Parse configuration from a string in YAML syntax
impl FromStr for Configuration {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_yaml_str(s)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use test_log::test;

    use super::*;

    #[test]
    fn defaults() {
        let configuration = Configuration::from_yaml_str("{}").unwrap();
        assert_eq!(configuration.environment, "default_env");
        assert_eq!(configuration.schema, PathBuf::from("graphql/schema.graphql"));
        assert_eq!(
            configuration.operations,
            vec![PathBuf::from("graphql/operations.graphql")]
        );
        assert_eq!(configuration, Configuration::builder().build());
    }

    #[test]
    fn custom_scalars_get_codecs() {
        let configuration = Configuration::from_yaml_str(
            r#"
environment: staging
custom_scalars:
  Country:
    native_type: String
"#,
        )
        .unwrap();
        let codecs = configuration.scalar_codecs();
        assert_eq!(
            codecs.get("Country").map(|codec| codec.native_type()),
            Some("String")
        );
        assert!(codecs.contains("DateTime"));
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let error = Configuration::from_yaml_str("schemas: a.graphql").unwrap_err();
        assert!(matches!(error, ConfigurationError::Deserialize(_)));
    }

    #[test]
    fn empty_native_type_is_invalid() {
        let error = Configuration::from_yaml_str(
            r#"
custom_scalars:
  Country:
    native_type: ""
"#,
        )
        .unwrap_err();
        assert_eq!(
            error.to_string(),
            "custom scalar without native type: Country"
        );
    }

    #[test]
    fn read_resolves_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gqlnode.yaml");
        let mut file = fs::File::create(&path).unwrap();
        writeln!(file, "schema: schema.graphql\noperations: [ops/a.graphql]").unwrap();

        let configuration = Configuration::read(&path).unwrap();
        assert_eq!(configuration.schema, dir.path().join("schema.graphql"));
        assert_eq!(configuration.operations, vec![dir.path().join("ops/a.graphql")]);
    }

    #[test]
    fn json_schema_lists_fields() {
        let schema = serde_json::to_value(Configuration::json_schema()).unwrap();
        let properties = schema["properties"].as_object().unwrap();
        assert!(properties.contains_key("custom_scalars"));
        assert!(properties.contains_key("environment"));
    }
}
