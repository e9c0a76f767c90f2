//! Compiles a schema and its operation documents into the model used by code emission and by
//! the runtime.

use std::sync::Arc;

use apollo_compiler::ast;
use apollo_compiler::parser::SourceMap;
use indexmap::IndexMap;
use indexmap::IndexSet;
use serde::Serialize;

use crate::configuration::Configuration;
use crate::configuration::Sources;
use crate::error::location_of;
use crate::error::CompileError;
use crate::error::CompileErrors;
use crate::error::CompileWarning;
use crate::scalars::ScalarCodecs;
use crate::spec::FieldKind;
use crate::spec::Fragments;
use crate::spec::OperationDefinition;
use crate::spec::QueriedField;
use crate::spec::TypeRegistry;

/// A schema and its operations, fully resolved.
#[derive(Debug, Clone, Serialize)]
pub struct Compilation {
    pub registry: TypeRegistry,
    /// Operations by name, in document order.
    pub operations: IndexMap<String, OperationDefinition>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<CompileWarning>,
    #[serde(skip)]
    pub scalars: ScalarCodecs,
}

impl Compilation {
    pub fn operation(&self, name: &str) -> Option<&OperationDefinition> {
        self.operations.get(name)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Compiler {
    scalars: ScalarCodecs,
}

impl Compiler {
    pub fn new(scalars: ScalarCodecs) -> Self {
        Self { scalars }
    }

    /// A compiler using the scalar codecs the configuration declares.
    pub fn from_configuration(configuration: &Configuration) -> Self {
        Self::new(configuration.scalar_codecs())
    }

    /// Compiles sources read by [`Configuration::read_sources`].
    pub fn compile_sources(&self, sources: &Sources) -> Result<Compilation, CompileErrors> {
        let schema_path = sources.schema.0.display().to_string();
        let paths = sources
            .operations
            .iter()
            .map(|(path, _)| path.display().to_string())
            .collect::<Vec<_>>();
        let documents = paths
            .iter()
            .zip(&sources.operations)
            .map(|(path, (_, source))| (path.as_str(), source.as_str()))
            .collect::<Vec<_>>();
        self.compile(
            (schema_path.as_str(), sources.schema.1.as_str()),
            &documents,
        )
    }

    /// Compiles a schema, given as `(path, sdl)`, and operation documents, given as
    /// `(path, source)`.
    ///
    /// Fragments are shared by all documents. Every error found is reported, not only the first
    /// one.
    pub fn compile(
        &self,
        schema: (&str, &str),
        documents: &[(&str, &str)],
    ) -> Result<Compilation, CompileErrors> {
        let (schema_path, sdl) = schema;
        let mut registry = TypeRegistry::parse(sdl, schema_path, &self.scalars)?;

        let mut errors = CompileErrors::default();
        let mut parsed = Vec::with_capacity(documents.len());
        for (path, source) in documents {
            match ast::Document::parse(*source, *path) {
                Ok(document) => parsed.push(document),
                Err(with_errors) => errors.push(CompileError::Parsing {
                    message: with_errors.errors.to_string(),
                }),
            }
        }
        let mut sources = SourceMap::default();
        for document in &parsed {
            Arc::make_mut(&mut sources).extend(
                document
                    .sources
                    .iter()
                    .map(|(file_id, file)| (*file_id, file.clone())),
            );
        }

        let fragments = Fragments::from_documents(&parsed, &registry, &sources, &mut errors);
        let mut operations =
            compile_operations(&registry, &parsed, &fragments, &sources, &mut errors);
        if !errors.is_empty() {
            return Err(errors);
        }

        let mut warnings = Vec::new();
        let widened = identity_candidates(&registry, operations.values());
        if !widened.is_empty() {
            for type_name in &widened {
                if registry.widen_identity(type_name) {
                    tracing::warn!(
                        type_name = %type_name,
                        "type is queried with a nullable 'id', caching it by identity"
                    );
                    warnings.push(CompileWarning::IdentityWidened {
                        type_name: type_name.clone(),
                    });
                }
            }
            // implicit ids depend on which types are nodes
            operations = compile_operations(&registry, &parsed, &fragments, &sources, &mut errors);
        }

        tracing::debug!(
            types = registry.types().count(),
            fragments = fragments.len(),
            operations = operations.len(),
            "compiled operations"
        );
        errors.into_result(Compilation {
            registry,
            operations,
            warnings,
            scalars: self.scalars.clone(),
        })
    }
}

fn compile_operations(
    registry: &TypeRegistry,
    documents: &[ast::Document],
    fragments: &Fragments,
    sources: &SourceMap,
    errors: &mut CompileErrors,
) -> IndexMap<String, OperationDefinition> {
    let mut seen = IndexSet::new();
    let mut operations = IndexMap::new();
    for definition in documents
        .iter()
        .flat_map(|document| document.definitions.iter())
    {
        let ast::Definition::OperationDefinition(operation) = definition else {
            continue;
        };
        if let Some(name) = &operation.name {
            if !seen.insert(name.to_string()) {
                errors.push(CompileError::DuplicateOperation {
                    name: name.to_string(),
                    location: location_of(operation, sources),
                });
                continue;
            }
        }
        match OperationDefinition::compile(registry, operation, fragments, sources) {
            Ok(compiled) => {
                operations.insert(compiled.name.clone(), compiled);
            }
            Err(operation_errors) => errors.extend(operation_errors),
        }
    }
    operations
}

/// Object types with a nullable `id` that some operation selects.
fn identity_candidates<'a>(
    registry: &TypeRegistry,
    operations: impl Iterator<Item = &'a OperationDefinition>,
) -> IndexSet<String> {
    fn selects_id(fields: &[QueriedField]) -> bool {
        fields.iter().any(|field| field.name == "id")
    }

    fn visit(registry: &TypeRegistry, field: &QueriedField, candidates: &mut IndexSet<String>) {
        let type_name = field.field_type.inner_type_name();
        match field.kind {
            FieldKind::Object => {
                if registry.has_nullable_id(type_name) && selects_id(&field.selections) {
                    candidates.insert(type_name.to_string());
                }
            }
            FieldKind::Interface | FieldKind::Union => {
                if selects_id(&field.selections) {
                    candidates.extend(
                        registry
                            .possible_types(type_name)
                            .into_iter()
                            .filter(|possible_type| registry.has_nullable_id(possible_type))
                            .map(str::to_string),
                    );
                }
                for (possible_type, choice) in &field.choices {
                    if registry.has_nullable_id(possible_type) && selects_id(choice) {
                        candidates.insert(possible_type.clone());
                    }
                }
            }
            FieldKind::Scalar | FieldKind::Enum => {}
        }
        for nested in field
            .selections
            .iter()
            .chain(field.choices.values().flatten())
        {
            visit(registry, nested, candidates);
        }
    }

    let mut candidates = IndexSet::new();
    for operation in operations {
        visit(registry, &operation.root, &mut candidates);
    }
    candidates
}
