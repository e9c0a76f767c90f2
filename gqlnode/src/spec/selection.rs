use apollo_compiler::ast;
use apollo_compiler::parser::SourceMap;
use apollo_compiler::Node;
use indexmap::IndexMap;
use indexmap::IndexSet;
use itertools::Itertools;
use serde::Deserialize;
use serde::Serialize;

use crate::error::location_of;
use crate::error::CompileError;
use crate::error::CompileErrors;
use crate::error::Location;
use crate::json_ext::Object;
use crate::json_ext::Value;
use crate::spec::Arguments;
use crate::spec::FieldType;
use crate::spec::Fragments;
use crate::spec::InputValue;
use crate::spec::TypeDefinition;
use crate::spec::TypeRegistry;

pub const TYPENAME: &str = "__typename";

/// What a selected field returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Scalar,
    Enum,
    Object,
    Interface,
    Union,
}

impl FieldKind {
    fn of(definition: &TypeDefinition) -> Option<Self> {
        match definition {
            TypeDefinition::Scalar(_) => Some(FieldKind::Scalar),
            TypeDefinition::Enum(_) => Some(FieldKind::Enum),
            TypeDefinition::Object(_) => Some(FieldKind::Object),
            TypeDefinition::Interface(_) => Some(FieldKind::Interface),
            TypeDefinition::Union(_) => Some(FieldKind::Union),
            TypeDefinition::InputObject(_) => None,
        }
    }

    /// Whether the field takes a selection set.
    pub fn is_composite(self) -> bool {
        matches!(
            self,
            FieldKind::Object | FieldKind::Interface | FieldKind::Union
        )
    }

    pub fn is_abstract(self) -> bool {
        matches!(self, FieldKind::Interface | FieldKind::Union)
    }
}

/// One field of a compiled selection tree.
///
/// Fragments are gone at this point: every field is merged with the other occurrences of its
/// response key, and polymorphic fields carry the selections of each concrete type that needs
/// more than the common ones in `choices`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueriedField {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub arguments: Arguments,
    /// Declared type, on the parent type the field was selected on.
    pub field_type: FieldType,
    pub kind: FieldKind,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub selections: Vec<QueriedField>,
    /// Selections by concrete type name, for interface and union fields.
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub choices: IndexMap<String, Vec<QueriedField>>,
    #[serde(skip_serializing_if = "IncludeSkip::is_always")]
    pub include_skip: IncludeSkip,
}

impl QueriedField {
    /// The key of the field in a response: its alias, or its name.
    pub fn response_key(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }

    pub fn is_typename(&self) -> bool {
        self.name == TYPENAME
    }

    /// Selections that apply to a value of the given concrete type.
    pub fn selections_for(&self, typename: &str) -> &[QueriedField] {
        self.choices
            .get(typename)
            .unwrap_or(&self.selections)
            .as_slice()
    }

    /// Key the field value is stored under in a cached object.
    ///
    /// Arguments are part of the key, sorted by name and with variables substituted, so that
    /// the same field fetched with different arguments does not collide.
    pub fn storage_key(&self, variables: &Object) -> String {
        if self.arguments.is_empty() {
            return self.name.clone();
        }
        let arguments = self
            .arguments
            .iter()
            .sorted_by(|(a, _), (b, _)| a.cmp(b))
            .map(|(name, value)| format!("{name}:{}", json_text(&value.to_json(variables))))
            .join(",");
        format!("{}({arguments})", self.name)
    }
}

fn json_text(value: &Value) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "null".to_string())
}

/// The compiled selections of a selection set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CompiledSelection {
    pub selections: Vec<QueriedField>,
    pub choices: IndexMap<String, Vec<QueriedField>>,
}

/// The `@include` and `@skip` conditions of a selection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IncludeSkip {
    include: Condition,
    skip: Condition,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Condition {
    Yes,
    No,
    Variable(String),
}

impl Default for IncludeSkip {
    fn default() -> Self {
        Self {
            include: Condition::Yes,
            skip: Condition::No,
        }
    }
}

impl IncludeSkip {
    pub(crate) fn parse(directives: &ast::DirectiveList) -> Self {
        let mut include = None;
        let mut skip = None;
        for directive in &directives.0 {
            if include.is_none() && directive.name.as_str() == "include" {
                include = Condition::parse(directive)
            }
            if skip.is_none() && directive.name.as_str() == "skip" {
                skip = Condition::parse(directive)
            }
        }
        Self {
            include: include.unwrap_or(Condition::Yes),
            skip: skip.unwrap_or(Condition::No),
        }
    }

    pub fn include(&self) -> &Condition {
        &self.include
    }

    pub fn skip(&self) -> &Condition {
        &self.skip
    }

    /// No condition at all.
    pub fn is_always(&self) -> bool {
        self.include == Condition::Yes && self.skip == Condition::No
    }

    pub(crate) fn statically_skipped(&self) -> bool {
        matches!(self.skip, Condition::Yes) || matches!(self.include, Condition::No)
    }

    pub fn should_skip(&self, variables: &Object) -> bool {
        // Using .unwrap_or is legit here because
        // the variables were coerced against their declarations when attaching
        self.skip.eval(variables).unwrap_or(false) || !self.include.eval(variables).unwrap_or(true)
    }

    /// Conditions of a selection nested in a fragment with these conditions.
    ///
    /// `None` if the result needs two different variables for the same directive.
    pub(crate) fn combine(&self, nested: &IncludeSkip) -> Option<IncludeSkip> {
        Some(IncludeSkip {
            include: self.include.and(&nested.include)?,
            skip: self.skip.or(&nested.skip)?,
        })
    }

    /// Conditions of a field selected twice, included when either occurrence is.
    pub(crate) fn merge(&self, other: &IncludeSkip) -> Option<IncludeSkip> {
        if self == other {
            Some(self.clone())
        } else if self.is_always() || other.is_always() {
            Some(IncludeSkip::default())
        } else {
            None
        }
    }

    pub(crate) fn variables(&self) -> impl Iterator<Item = &str> {
        [&self.include, &self.skip]
            .into_iter()
            .filter_map(|condition| match condition {
                Condition::Variable(name) => Some(name.as_str()),
                Condition::Yes | Condition::No => None,
            })
    }
}

impl Condition {
    pub(crate) fn parse(directive: &Node<ast::Directive>) -> Option<Self> {
        let argument = directive
            .arguments
            .iter()
            .find(|argument| argument.name.as_str() == "if")?;
        match &*argument.value {
            ast::Value::Boolean(true) => Some(Condition::Yes),
            ast::Value::Boolean(false) => Some(Condition::No),
            ast::Value::Variable(variable) => Some(Condition::Variable(variable.to_string())),
            _ => None,
        }
    }

    pub(crate) fn eval(&self, variables: &Object) -> Option<bool> {
        match self {
            Condition::Yes => Some(true),
            Condition::No => Some(false),
            Condition::Variable(variable_name) => variables
                .get(variable_name.as_str())
                .and_then(|v| v.as_bool()),
        }
    }

    fn and(&self, other: &Condition) -> Option<Condition> {
        match (self, other) {
            (Condition::Yes, condition) | (condition, Condition::Yes) => Some(condition.clone()),
            (Condition::No, _) | (_, Condition::No) => Some(Condition::No),
            (Condition::Variable(a), Condition::Variable(b)) => (a == b).then(|| self.clone()),
        }
    }

    fn or(&self, other: &Condition) -> Option<Condition> {
        match (self, other) {
            (Condition::No, condition) | (condition, Condition::No) => Some(condition.clone()),
            (Condition::Yes, _) | (_, Condition::Yes) => Some(Condition::Yes),
            (Condition::Variable(a), Condition::Variable(b)) => (a == b).then(|| self.clone()),
        }
    }
}

/// Where the fields of a selection set apply.
#[derive(Debug, Clone)]
struct Scope {
    /// Type fields are looked up on when compiled for every possible type of the parent.
    lookup_type: String,
    /// Object types the scope is narrowed to by type conditions, `None` when it applies to every
    /// possible type of the parent.
    types: Option<IndexSet<String>>,
    include_skip: IncludeSkip,
}

impl Scope {
    fn new(parent_type: &str) -> Self {
        Scope {
            lookup_type: parent_type.to_string(),
            types: None,
            include_skip: IncludeSkip::default(),
        }
    }

    fn applies_to(&self, type_name: &str) -> bool {
        self.types
            .as_ref()
            .map(|types| types.contains(type_name))
            .unwrap_or(true)
    }
}

/// A field selection once fragments are expanded.
#[derive(Debug)]
struct Entry<'a> {
    field: &'a Node<ast::Field>,
    scope: Scope,
}

/// Compiles selection sets into trees of [`QueriedField`].
///
/// Fragment spreads are expanded in place before anything is merged, so after compilation only
/// fields remain. Errors are accumulated and compilation goes on with the rest of the selections.
pub(crate) struct SelectionCompiler<'a> {
    registry: &'a TypeRegistry,
    fragments: &'a Fragments,
    sources: &'a SourceMap,
    spreads: Vec<&'a str>,
    /// Variables referenced by the compiled selections, with the location of their first use.
    pub(crate) variables: IndexMap<String, Option<Location>>,
    pub(crate) errors: CompileErrors,
}

impl<'a> SelectionCompiler<'a> {
    pub(crate) fn new(
        registry: &'a TypeRegistry,
        fragments: &'a Fragments,
        sources: &'a SourceMap,
    ) -> Self {
        Self {
            registry,
            fragments,
            sources,
            spreads: Vec::new(),
            variables: IndexMap::new(),
            errors: CompileErrors::default(),
        }
    }

    /// Compiles the selection set of an operation against its root type.
    pub(crate) fn compile_root(
        &mut self,
        root_type: &str,
        selection_set: &'a [ast::Selection],
    ) -> Vec<QueriedField> {
        let mut entries = Vec::new();
        self.collect(selection_set, root_type, &Scope::new(root_type), &mut entries);
        self.compile_fields(root_type, Some(root_type), entries.iter(), true)
    }

    pub(crate) fn compile(
        &mut self,
        parent_type: &str,
        selection_set: &'a [ast::Selection],
    ) -> CompiledSelection {
        let mut entries = Vec::new();
        self.collect(
            selection_set,
            parent_type,
            &Scope::new(parent_type),
            &mut entries,
        );
        self.compile_entries(parent_type, &entries)
    }

    fn location<T>(&self, node: &Node<T>) -> Option<Location> {
        location_of(node, self.sources)
    }

    fn collect(
        &mut self,
        selections: &'a [ast::Selection],
        parent_type: &str,
        scope: &Scope,
        entries: &mut Vec<Entry<'a>>,
    ) {
        let fragments = self.fragments;
        for selection in selections {
            match selection {
                // Spec: https://spec.graphql.org/draft/#Field
                ast::Selection::Field(field) => {
                    let conditions = IncludeSkip::parse(&field.directives);
                    if conditions.statically_skipped() {
                        continue;
                    }
                    let response_key = field.alias.as_ref().unwrap_or(&field.name).as_str();
                    let location = self.location(field);
                    let Some(include_skip) =
                        self.combine(&scope.include_skip, &conditions, response_key, location)
                    else {
                        continue;
                    };
                    entries.push(Entry {
                        field,
                        scope: Scope {
                            include_skip,
                            ..scope.clone()
                        },
                    });
                }
                // Spec: https://spec.graphql.org/draft/#InlineFragment
                ast::Selection::InlineFragment(inline) => {
                    let location = self.location(inline);
                    let type_condition = inline.type_condition.as_ref().map(|name| name.as_str());
                    if let Some(narrowed) = self.narrow(
                        parent_type,
                        scope,
                        type_condition,
                        &inline.directives,
                        location,
                    ) {
                        self.collect(&inline.selection_set, parent_type, &narrowed, entries);
                    }
                }
                // Spec: https://spec.graphql.org/draft/#FragmentSpread
                ast::Selection::FragmentSpread(spread) => {
                    let name = spread.fragment_name.as_str();
                    let location = self.location(spread);
                    let Some(fragment) = fragments.get(name) else {
                        self.errors.push(CompileError::UnknownFragment {
                            name: name.to_string(),
                            location,
                        });
                        continue;
                    };
                    // cycles are reported once, when fragments are collected
                    if self.spreads.contains(&name) {
                        continue;
                    }
                    if let Some(narrowed) = self.narrow(
                        parent_type,
                        scope,
                        Some(fragment.type_condition.as_str()),
                        &spread.directives,
                        location,
                    ) {
                        self.spreads.push(name);
                        self.collect(
                            &fragment.definition.selection_set,
                            parent_type,
                            &narrowed,
                            entries,
                        );
                        self.spreads.pop();
                    }
                }
            }
        }
    }

    /// Scope of a fragment nested in `scope`, `None` if it never applies.
    fn narrow(
        &mut self,
        parent_type: &str,
        scope: &Scope,
        type_condition: Option<&str>,
        directives: &ast::DirectiveList,
        location: Option<Location>,
    ) -> Option<Scope> {
        let registry = self.registry;
        let conditions = IncludeSkip::parse(directives);
        if conditions.statically_skipped() {
            return None;
        }
        let include_skip = self.combine(
            &scope.include_skip,
            &conditions,
            type_condition.unwrap_or(parent_type),
            location,
        )?;
        let Some(type_condition) = type_condition else {
            return Some(Scope {
                include_skip,
                ..scope.clone()
            });
        };
        let Some(condition_type) = registry.get(type_condition) else {
            self.errors.push(CompileError::UnknownType {
                name: type_condition.to_string(),
                location,
            });
            return None;
        };

        let current = scope.types.clone().unwrap_or_else(|| {
            registry
                .possible_types(parent_type)
                .into_iter()
                .map(str::to_string)
                .collect()
        });
        let narrowed = current
            .iter()
            .filter(|possible_type| registry.is_subtype(type_condition, possible_type))
            .cloned()
            .collect::<IndexSet<_>>();
        if narrowed.is_empty() {
            self.errors.push(CompileError::InvalidTypeCondition {
                type_condition: type_condition.to_string(),
                parent_type: scope.lookup_type.clone(),
                location,
            });
            return None;
        }

        if narrowed.len() == current.len() {
            // the condition holds for every type already in scope
            let lookup_type = match condition_type {
                TypeDefinition::Union(_) => scope.lookup_type.clone(),
                _ => type_condition.to_string(),
            };
            Some(Scope {
                lookup_type,
                types: scope.types.clone(),
                include_skip,
            })
        } else {
            Some(Scope {
                lookup_type: type_condition.to_string(),
                types: Some(narrowed),
                include_skip,
            })
        }
    }

    fn combine(
        &mut self,
        outer: &IncludeSkip,
        nested: &IncludeSkip,
        response_key: &str,
        location: Option<Location>,
    ) -> Option<IncludeSkip> {
        let combined = outer.combine(nested);
        if combined.is_none() {
            self.errors.push(CompileError::ConflictingConditions {
                response_key: response_key.to_string(),
                location,
            });
        }
        combined
    }

    fn compile_entries(&mut self, parent_type: &str, entries: &[Entry<'a>]) -> CompiledSelection {
        let registry = self.registry;
        if !registry.is_abstract(parent_type) {
            let mut selections =
                self.compile_fields(parent_type, Some(parent_type), entries.iter(), false);
            self.ensure_id(parent_type, &mut selections);
            return CompiledSelection {
                selections,
                choices: IndexMap::new(),
            };
        }

        let common = || entries.iter().filter(|entry| entry.scope.types.is_none());
        let mut selections = self.compile_fields(parent_type, None, common(), false);
        self.ensure_id(parent_type, &mut selections);
        let has_id = selections.iter().any(|field| field.response_key() == "id");

        let mut choices = IndexMap::new();
        for possible_type in registry.possible_types(parent_type) {
            let specific = || {
                entries.iter().filter(|entry| {
                    entry.scope.types.is_some() && entry.scope.applies_to(possible_type)
                })
            };
            let needs_id = !has_id && registry.is_node(possible_type);
            if specific().next().is_none() && !needs_id {
                continue;
            }
            let mut fields = self.compile_fields(
                parent_type,
                Some(possible_type),
                common().chain(specific()),
                false,
            );
            self.ensure_id(possible_type, &mut fields);
            choices.insert(possible_type.to_string(), fields);
        }
        CompiledSelection {
            selections,
            choices,
        }
    }

    /// Compiles entries grouped by response key, in order of first appearance.
    fn compile_fields<'e>(
        &mut self,
        parent_type: &str,
        concrete_type: Option<&str>,
        entries: impl Iterator<Item = &'e Entry<'a>>,
        root: bool,
    ) -> Vec<QueriedField>
    where
        'a: 'e,
    {
        let mut groups: IndexMap<&str, Vec<&Entry<'a>>> = IndexMap::new();
        for entry in entries {
            let response_key = entry.field.alias.as_ref().unwrap_or(&entry.field.name);
            groups.entry(response_key.as_str()).or_default().push(entry);
        }
        groups
            .into_values()
            .filter_map(|group| self.compile_field(parent_type, concrete_type, &group, root))
            .collect()
    }

    fn compile_field(
        &mut self,
        parent_type: &str,
        concrete_type: Option<&str>,
        group: &[&Entry<'a>],
        root: bool,
    ) -> Option<QueriedField> {
        let registry = self.registry;
        let (first, others) = group.split_first()?;
        let field: &'a Node<ast::Field> = first.field;
        let response_key = field.alias.as_ref().unwrap_or(&field.name).as_str();
        let location = self.location(field);

        // Spec: https://spec.graphql.org/draft/#sec-Field-Selection-Merging
        if let Some(other) = others.iter().find(|other| other.field.name != field.name) {
            let location = self.location(other.field);
            self.errors.push(CompileError::ConflictingFieldNames {
                response_key: response_key.to_string(),
                first: field.name.to_string(),
                second: other.field.name.to_string(),
                location,
            });
            return None;
        }
        let arguments = field_arguments(field);
        if others
            .iter()
            .any(|other| field_arguments(other.field) != arguments)
        {
            self.errors.push(CompileError::ConflictingFieldArguments {
                response_key: response_key.to_string(),
                type_name: parent_type.to_string(),
                location,
            });
            return None;
        }
        let mut include_skip = first.scope.include_skip.clone();
        for other in others {
            let Some(merged) = include_skip.merge(&other.scope.include_skip) else {
                self.errors.push(CompileError::ConflictingConditions {
                    response_key: response_key.to_string(),
                    location,
                });
                return None;
            };
            include_skip = merged;
        }

        let lookup_type = concrete_type.unwrap_or(first.scope.lookup_type.as_str());
        let field_type = if field.name.as_str() == TYPENAME {
            FieldType::String.non_null()
        } else if let Some(definition) = registry.field(lookup_type, field.name.as_str()) {
            definition.ty.clone()
        } else {
            self.errors.push(if root {
                CompileError::InvalidRootSelection {
                    field: field.name.to_string(),
                    root_type: parent_type.to_string(),
                    location,
                }
            } else {
                CompileError::UnknownField {
                    field: field.name.to_string(),
                    type_name: lookup_type.to_string(),
                    location,
                }
            });
            return None;
        };
        let inner_type = field_type.inner_type_name().to_string();
        let Some(kind) = registry.get(&inner_type).and_then(FieldKind::of) else {
            self.errors.push(CompileError::UnknownType {
                name: inner_type,
                location,
            });
            return None;
        };

        for value in arguments.values() {
            value.for_each_variable(&mut |name| {
                self.variables.entry(name.to_string()).or_insert(location);
            });
        }
        for name in include_skip.variables() {
            self.variables.entry(name.to_string()).or_insert(location);
        }

        let compiled = if kind.is_composite() {
            let mut nested = Vec::new();
            let scope = Scope::new(&inner_type);
            for entry in group {
                let field: &'a Node<ast::Field> = entry.field;
                self.collect(&field.selection_set, &inner_type, &scope, &mut nested);
            }
            self.compile_entries(&inner_type, &nested)
        } else {
            CompiledSelection::default()
        };

        Some(QueriedField {
            name: field.name.to_string(),
            alias: field.alias.as_ref().map(|alias| alias.to_string()),
            arguments,
            field_type,
            kind,
            selections: compiled.selections,
            choices: compiled.choices,
            include_skip,
        })
    }

    /// Makes sure objects cached by identity select their `id`, unconditionally.
    fn ensure_id(&mut self, type_name: &str, fields: &mut Vec<QueriedField>) {
        let registry = self.registry;
        if !registry.is_node(type_name) {
            return;
        }
        if let Some(existing) = fields.iter_mut().find(|field| field.response_key() == "id") {
            if existing.name == "id" {
                existing.include_skip = IncludeSkip::default();
            } else {
                self.errors.push(CompileError::ConflictingFieldNames {
                    response_key: "id".to_string(),
                    first: existing.name.clone(),
                    second: "id".to_string(),
                    location: None,
                });
            }
            return;
        }
        let Some(id) = registry.field(type_name, "id") else {
            return;
        };
        fields.push(QueriedField {
            name: "id".to_string(),
            alias: None,
            arguments: Arguments::new(),
            field_type: id.ty.clone(),
            kind: FieldKind::Scalar,
            selections: Vec::new(),
            choices: IndexMap::new(),
            include_skip: IncludeSkip::default(),
        });
    }
}

/// IndexMap equality does not depend on order, so neither does the comparison of arguments.
fn field_arguments(field: &ast::Field) -> Arguments {
    field
        .arguments
        .iter()
        .map(|argument| {
            (
                argument.name.to_string(),
                InputValue::from(&*argument.value),
            )
        })
        .collect()
}

/// Compiles a standalone selection set, such as `{ a { x } }`, against a parent type.
///
/// Named fragments defined in the same source can be spread.
pub fn compile_selection_set(
    registry: &TypeRegistry,
    parent_type: &str,
    source: &str,
) -> Result<CompiledSelection, CompileErrors> {
    let document = ast::Document::parse(source, "selection.graphql").map_err(|with_errors| {
        CompileErrors::from(CompileError::Parsing {
            message: with_errors.errors.to_string(),
        })
    })?;
    if registry.get(parent_type).is_none() {
        return Err(CompileError::UnknownType {
            name: parent_type.to_string(),
            location: None,
        }
        .into());
    }
    let Some(selection_set) = document
        .definitions
        .iter()
        .find_map(|definition| match definition {
            ast::Definition::OperationDefinition(operation) => Some(&operation.selection_set),
            _ => None,
        })
    else {
        return Err(CompileError::Parsing {
            message: "no selection set".to_string(),
        }
        .into());
    };

    let mut errors = CompileErrors::default();
    let fragments =
        Fragments::from_documents([&document], registry, &document.sources, &mut errors);
    let mut compiler = SelectionCompiler::new(registry, &fragments, &document.sources);
    let compiled = compiler.compile(parent_type, selection_set);
    errors.extend(compiler.errors);
    errors.into_result(compiled)
}
