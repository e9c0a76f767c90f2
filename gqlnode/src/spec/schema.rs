//! The type registry: every named type of a schema, resolved once.

use std::collections::HashMap;

use apollo_compiler::ast;
use apollo_compiler::parser::SourceMap;
use apollo_compiler::Name;
use apollo_compiler::Node;
use indexmap::IndexMap;
use indexmap::IndexSet;
use serde::Serialize;

use crate::error::location_of;
use crate::error::CompileError;
use crate::error::CompileErrors;
use crate::error::Location;
use crate::json_ext::Object;
use crate::json_ext::Value;
use crate::scalars::ScalarCodecs;
use crate::spec::field_type::InvalidValue;
use crate::spec::FieldType;
use crate::spec::InputValue;
use crate::spec::OperationKind;

pub(crate) const BUILTIN_SCALARS: [&str; 5] = ["String", "Int", "Float", "Boolean", "ID"];

/// A resolved named type.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind")]
pub enum TypeDefinition {
    Scalar(ScalarDefinition),
    Enum(EnumDefinition),
    Object(ObjectDefinition),
    Interface(InterfaceDefinition),
    Union(UnionDefinition),
    InputObject(InputObjectDefinition),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScalarDefinition {
    pub name: String,
    pub builtin: bool,
    /// Native representation given by the scalar's codec.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub native_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnumDefinition {
    pub name: String,
    pub values: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObjectDefinition {
    pub name: String,
    pub fields: IndexMap<String, FieldDefinition>,
    pub interfaces: Vec<String>,
    /// Whether instances are cached by identity.
    pub node: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InterfaceDefinition {
    pub name: String,
    pub fields: IndexMap<String, FieldDefinition>,
    pub interfaces: Vec<String>,
    /// Object types implementing the interface.
    pub possible_types: IndexSet<String>,
    pub node: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnionDefinition {
    pub name: String,
    pub members: IndexSet<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InputObjectDefinition {
    pub name: String,
    pub fields: IndexMap<String, InputValueDefinition>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldDefinition {
    pub name: String,
    pub ty: FieldType,
    pub arguments: IndexMap<String, InputValueDefinition>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InputValueDefinition {
    pub name: String,
    pub ty: FieldType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Value>,
}

impl TypeDefinition {
    pub fn name(&self) -> &str {
        match self {
            TypeDefinition::Scalar(definition) => &definition.name,
            TypeDefinition::Enum(definition) => &definition.name,
            TypeDefinition::Object(definition) => &definition.name,
            TypeDefinition::Interface(definition) => &definition.name,
            TypeDefinition::Union(definition) => &definition.name,
            TypeDefinition::InputObject(definition) => &definition.name,
        }
    }

    fn fields(&self) -> Option<&IndexMap<String, FieldDefinition>> {
        match self {
            TypeDefinition::Object(definition) => Some(&definition.fields),
            TypeDefinition::Interface(definition) => Some(&definition.fields),
            _ => None,
        }
    }
}

impl InputObjectDefinition {
    pub(crate) fn validate_object(
        &self,
        object: &Object,
        registry: &TypeRegistry,
        scalars: &ScalarCodecs,
    ) -> Result<(), InvalidValue> {
        if object
            .keys()
            .any(|key| !self.fields.contains_key(key.as_str()))
        {
            return Err(InvalidValue);
        }
        self.fields.values().try_for_each(|field| {
            match object.get(field.name.as_str()) {
                Some(value) => field.ty.validate_input_value(value, registry, scalars),
                None if field.ty.is_non_null() && field.default_value.is_none() => {
                    Err(InvalidValue)
                }
                None => Ok(()),
            }
        })
    }
}

/// Every named type of a schema, indexed by name.
///
/// Field types are stored as names and looked up on access, so self referencing and mutually
/// referencing types need no special handling.
#[derive(Debug, Clone, Serialize)]
pub struct TypeRegistry {
    types: IndexMap<String, TypeDefinition>,
    query_type: Option<String>,
    mutation_type: Option<String>,
    subscription_type: Option<String>,
}

/// Base definition and extensions of one type, gathered by the first pass.
#[derive(Default)]
struct Pending<'doc> {
    objects: Vec<&'doc Node<ast::ObjectTypeDefinition>>,
    object_extensions: Vec<&'doc Node<ast::ObjectTypeExtension>>,
    interfaces: Vec<&'doc Node<ast::InterfaceTypeDefinition>>,
    interface_extensions: Vec<&'doc Node<ast::InterfaceTypeExtension>>,
    unions: Vec<&'doc Node<ast::UnionTypeDefinition>>,
    union_extensions: Vec<&'doc Node<ast::UnionTypeExtension>>,
    enums: Vec<&'doc Node<ast::EnumTypeDefinition>>,
    enum_extensions: Vec<&'doc Node<ast::EnumTypeExtension>>,
    inputs: Vec<&'doc Node<ast::InputObjectTypeDefinition>>,
    input_extensions: Vec<&'doc Node<ast::InputObjectTypeExtension>>,
    scalars: Vec<&'doc Node<ast::ScalarTypeDefinition>>,
    root_operations: Vec<&'doc Node<(ast::OperationType, ast::NamedType)>>,
}

struct Resolver<'doc> {
    sources: &'doc SourceMap,
    types: IndexMap<String, TypeDefinition>,
    errors: CompileErrors,
}

impl TypeRegistry {
    /// Parses SDL and resolves it.
    pub fn parse(
        sdl: &str,
        path: &str,
        scalars: &ScalarCodecs,
    ) -> Result<TypeRegistry, CompileErrors> {
        let document = ast::Document::parse(sdl, path).map_err(|with_errors| {
            CompileErrors::from(CompileError::Parsing {
                message: with_errors.errors.to_string(),
            })
        })?;
        Self::resolve(&document, scalars)
    }

    /// Resolves every type definition and extension of a schema document.
    ///
    /// Type names are registered first, then field types are checked against them. All errors
    /// are accumulated.
    pub fn resolve(
        document: &ast::Document,
        scalars: &ScalarCodecs,
    ) -> Result<TypeRegistry, CompileErrors> {
        let mut pending = Pending::default();
        for definition in &document.definitions {
            match definition {
                ast::Definition::ObjectTypeDefinition(def) => pending.objects.push(def),
                ast::Definition::ObjectTypeExtension(def) => pending.object_extensions.push(def),
                ast::Definition::InterfaceTypeDefinition(def) => pending.interfaces.push(def),
                ast::Definition::InterfaceTypeExtension(def) => {
                    pending.interface_extensions.push(def)
                }
                ast::Definition::UnionTypeDefinition(def) => pending.unions.push(def),
                ast::Definition::UnionTypeExtension(def) => pending.union_extensions.push(def),
                ast::Definition::EnumTypeDefinition(def) => pending.enums.push(def),
                ast::Definition::EnumTypeExtension(def) => pending.enum_extensions.push(def),
                ast::Definition::InputObjectTypeDefinition(def) => pending.inputs.push(def),
                ast::Definition::InputObjectTypeExtension(def) => {
                    pending.input_extensions.push(def)
                }
                ast::Definition::ScalarTypeDefinition(def) => pending.scalars.push(def),
                ast::Definition::SchemaDefinition(def) => {
                    pending.root_operations.extend(&def.root_operations)
                }
                ast::Definition::SchemaExtension(def) => {
                    pending.root_operations.extend(&def.root_operations)
                }
                _ => {}
            }
        }

        let mut resolver = Resolver {
            sources: &document.sources,
            types: IndexMap::new(),
            errors: CompileErrors::default(),
        };
        resolver.register_names(&pending, scalars);
        resolver.resolve_fields(&pending);
        resolver.link_possible_types();
        resolver.check_cycles();
        resolver.detect_nodes();
        let (query_type, mutation_type, subscription_type) = resolver.root_types(&pending);

        let Resolver { types, errors, .. } = resolver;
        let registry = TypeRegistry {
            types,
            query_type,
            mutation_type,
            subscription_type,
        };
        tracing::debug!(types = registry.types.len(), "resolved schema types");
        errors.into_result(registry)
    }

    pub fn get(&self, name: &str) -> Option<&TypeDefinition> {
        self.types.get(name)
    }

    pub fn types(&self) -> impl Iterator<Item = &TypeDefinition> {
        self.types.values()
    }

    pub fn object(&self, name: &str) -> Option<&ObjectDefinition> {
        match self.types.get(name) {
            Some(TypeDefinition::Object(object)) => Some(object),
            _ => None,
        }
    }

    /// The root type of the given operation kind, if the schema defines one.
    pub fn root_type(&self, kind: OperationKind) -> Option<&str> {
        match kind {
            OperationKind::Query => self.query_type.as_deref(),
            OperationKind::Mutation => self.mutation_type.as_deref(),
            OperationKind::Subscription => self.subscription_type.as_deref(),
        }
    }

    /// Field of an object or interface type.
    pub fn field(&self, type_name: &str, field_name: &str) -> Option<&FieldDefinition> {
        self.types.get(type_name)?.fields()?.get(field_name)
    }

    pub fn is_abstract(&self, name: &str) -> bool {
        matches!(
            self.types.get(name),
            Some(TypeDefinition::Interface(_) | TypeDefinition::Union(_))
        )
    }

    /// Object types a value of the named type can be.
    pub fn possible_types(&self, name: &str) -> IndexSet<&str> {
        match self.types.get(name) {
            Some(TypeDefinition::Object(object)) => IndexSet::from([object.name.as_str()]),
            Some(TypeDefinition::Interface(interface)) => interface
                .possible_types
                .iter()
                .map(String::as_str)
                .collect(),
            Some(TypeDefinition::Union(union)) => {
                union.members.iter().map(String::as_str).collect()
            }
            _ => IndexSet::new(),
        }
    }

    pub fn is_subtype(&self, abstract_type: &str, maybe_subtype: &str) -> bool {
        self.possible_types(abstract_type).contains(maybe_subtype)
    }

    /// Whether values of this object or interface type are cached by identity.
    pub fn is_node(&self, name: &str) -> bool {
        match self.types.get(name) {
            Some(TypeDefinition::Object(object)) => object.node,
            Some(TypeDefinition::Interface(interface)) => interface.node,
            _ => false,
        }
    }

    /// Whether an object type has a nullable `id: ID` that could be widened into the identity
    /// contract.
    pub(crate) fn has_nullable_id(&self, name: &str) -> bool {
        self.object(name)
            .and_then(|object| object.fields.get("id"))
            .map(|field| field.ty == FieldType::Id)
            .unwrap_or(false)
    }

    /// Treats the nullable `id` of an object type as non-null so that it is cached by identity.
    pub(crate) fn widen_identity(&mut self, name: &str) -> bool {
        if !self.has_nullable_id(name) {
            return false;
        }
        if let Some(TypeDefinition::Object(object)) = self.types.get_mut(name) {
            if let Some(id) = object.fields.get_mut("id") {
                id.ty = FieldType::Id.non_null();
            }
            object.node = true;
            return true;
        }
        false
    }
}

impl<'doc> Resolver<'doc> {
    fn location<T>(&self, node: &Node<T>) -> Option<Location> {
        location_of(node, self.sources)
    }

    fn register_names(&mut self, pending: &Pending<'doc>, scalars: &ScalarCodecs) {
        for name in BUILTIN_SCALARS {
            self.types.insert(
                name.to_string(),
                TypeDefinition::Scalar(ScalarDefinition {
                    name: name.to_string(),
                    builtin: true,
                    native_type: None,
                }),
            );
        }
        for def in &pending.scalars {
            if BUILTIN_SCALARS.contains(&def.name.as_str()) {
                continue;
            }
            let native_type = scalars
                .get(def.name.as_str())
                .map(|codec| codec.native_type().to_string());
            if native_type.is_none() {
                self.errors.push(CompileError::UnknownScalar {
                    name: def.name.to_string(),
                    location: self.location(def),
                });
            }
            self.register(
                def,
                TypeDefinition::Scalar(ScalarDefinition {
                    name: def.name.to_string(),
                    builtin: false,
                    native_type,
                }),
            );
        }
        for def in &pending.enums {
            self.register(
                def,
                TypeDefinition::Enum(EnumDefinition {
                    name: def.name.to_string(),
                    values: Vec::new(),
                }),
            );
        }
        for def in &pending.objects {
            self.register(
                def,
                TypeDefinition::Object(ObjectDefinition {
                    name: def.name.to_string(),
                    fields: IndexMap::new(),
                    interfaces: Vec::new(),
                    node: false,
                }),
            );
        }
        for def in &pending.interfaces {
            self.register(
                def,
                TypeDefinition::Interface(InterfaceDefinition {
                    name: def.name.to_string(),
                    fields: IndexMap::new(),
                    interfaces: Vec::new(),
                    possible_types: IndexSet::new(),
                    node: false,
                }),
            );
        }
        for def in &pending.unions {
            self.register(
                def,
                TypeDefinition::Union(UnionDefinition {
                    name: def.name.to_string(),
                    members: IndexSet::new(),
                }),
            );
        }
        for def in &pending.inputs {
            self.register(
                def,
                TypeDefinition::InputObject(InputObjectDefinition {
                    name: def.name.to_string(),
                    fields: IndexMap::new(),
                }),
            );
        }
    }

    /// Registers the name of a type, reporting a second definition of the same name.
    fn register<T>(&mut self, def: &Node<T>, definition: TypeDefinition) {
        let name = definition.name().to_string();
        if self.types.contains_key(&name) {
            self.errors.push(CompileError::DuplicateType {
                name,
                location: self.location(def),
            });
            return;
        }
        self.types.insert(name, definition);
    }

    fn check_type_exists(&mut self, ty: &FieldType, location: Option<Location>) -> bool {
        let name = ty.inner_type_name();
        if self.types.contains_key(name) {
            true
        } else {
            self.errors.push(CompileError::UnknownType {
                name: name.to_string(),
                location,
            });
            false
        }
    }

    fn input_values(
        &mut self,
        definitions: &[Node<ast::InputValueDefinition>],
    ) -> IndexMap<String, InputValueDefinition> {
        let mut values = IndexMap::new();
        for def in definitions {
            let ty = FieldType::from(&*def.ty);
            let location = self.location(def);
            self.check_type_exists(&ty, location);
            let default_value = def
                .default_value
                .as_ref()
                .map(|value| InputValue::from(&**value).to_json(&Object::new()));
            values.insert(
                def.name.to_string(),
                InputValueDefinition {
                    name: def.name.to_string(),
                    ty,
                    default_value,
                },
            );
        }
        values
    }

    fn output_fields(
        &mut self,
        definitions: &[Node<ast::FieldDefinition>],
    ) -> IndexMap<String, FieldDefinition> {
        let mut fields = IndexMap::new();
        for def in definitions {
            let ty = FieldType::from(&def.ty);
            let location = self.location(def);
            self.check_type_exists(&ty, location);
            let arguments = self.input_values(&def.arguments);
            fields.insert(
                def.name.to_string(),
                FieldDefinition {
                    name: def.name.to_string(),
                    ty,
                    arguments,
                },
            );
        }
        fields
    }

    fn interface_names(&mut self, names: &[Name], location: Option<Location>) -> Vec<String> {
        names
            .iter()
            .filter(|name| {
                let known = matches!(
                    self.types.get(name.as_str()),
                    Some(TypeDefinition::Interface(_))
                );
                if !known {
                    self.errors.push(CompileError::UnknownType {
                        name: name.to_string(),
                        location,
                    });
                }
                known
            })
            .map(|name| name.to_string())
            .collect()
    }

    fn extend_fields(
        &mut self,
        name: &str,
        fields: IndexMap<String, FieldDefinition>,
        interfaces: Vec<String>,
        location: Option<Location>,
    ) {
        match self.types.get_mut(name) {
            Some(TypeDefinition::Object(object)) => {
                object.fields.extend(fields);
                object.interfaces.extend(interfaces);
            }
            Some(TypeDefinition::Interface(interface)) => {
                interface.fields.extend(fields);
                interface.interfaces.extend(interfaces);
            }
            _ => self.errors.push(CompileError::UnknownType {
                name: name.to_string(),
                location,
            }),
        }
    }

    fn resolve_fields(&mut self, pending: &Pending<'doc>) {
        for def in &pending.objects {
            let location = self.location(def);
            let fields = self.output_fields(&def.fields);
            let interfaces = self.interface_names(&def.implements_interfaces, location);
            self.extend_fields(def.name.as_str(), fields, interfaces, location);
        }
        for def in &pending.object_extensions {
            let location = self.location(def);
            let fields = self.output_fields(&def.fields);
            let interfaces = self.interface_names(&def.implements_interfaces, location);
            if matches!(
                self.types.get(def.name.as_str()),
                Some(TypeDefinition::Object(_))
            ) {
                self.extend_fields(def.name.as_str(), fields, interfaces, location);
            } else {
                self.errors.push(CompileError::UnknownType {
                    name: def.name.to_string(),
                    location,
                });
            }
        }
        for def in &pending.interfaces {
            let location = self.location(def);
            let fields = self.output_fields(&def.fields);
            let interfaces = self.interface_names(&def.implements_interfaces, location);
            self.extend_fields(def.name.as_str(), fields, interfaces, location);
        }
        for def in &pending.interface_extensions {
            let location = self.location(def);
            let fields = self.output_fields(&def.fields);
            let interfaces = self.interface_names(&def.implements_interfaces, location);
            if matches!(
                self.types.get(def.name.as_str()),
                Some(TypeDefinition::Interface(_))
            ) {
                self.extend_fields(def.name.as_str(), fields, interfaces, location);
            } else {
                self.errors.push(CompileError::UnknownType {
                    name: def.name.to_string(),
                    location,
                });
            }
        }

        let unions = pending
            .unions
            .iter()
            .map(|def| (def.name.as_str(), &def.members, self.location(def)))
            .chain(
                pending
                    .union_extensions
                    .iter()
                    .map(|def| (def.name.as_str(), &def.members, self.location(def))),
            )
            .collect::<Vec<_>>();
        for (name, members, location) in unions {
            let members = members
                .iter()
                .filter(|member| {
                    let known = matches!(
                        self.types.get(member.as_str()),
                        Some(TypeDefinition::Object(_))
                    );
                    if !known {
                        self.errors.push(CompileError::UnknownType {
                            name: member.to_string(),
                            location,
                        });
                    }
                    known
                })
                .map(|member| member.to_string())
                .collect::<Vec<_>>();
            match self.types.get_mut(name) {
                Some(TypeDefinition::Union(union)) => union.members.extend(members),
                _ => self.errors.push(CompileError::UnknownType {
                    name: name.to_string(),
                    location,
                }),
            }
        }

        let enums = pending
            .enums
            .iter()
            .map(|def| (def.name.as_str(), &def.values, self.location(def)))
            .chain(
                pending
                    .enum_extensions
                    .iter()
                    .map(|def| (def.name.as_str(), &def.values, self.location(def))),
            )
            .collect::<Vec<_>>();
        for (name, values, location) in enums {
            match self.types.get_mut(name) {
                Some(TypeDefinition::Enum(definition)) => definition
                    .values
                    .extend(values.iter().map(|value| value.value.to_string())),
                _ => self.errors.push(CompileError::UnknownType {
                    name: name.to_string(),
                    location,
                }),
            }
        }

        for def in &pending.inputs {
            let fields = self.input_values(&def.fields);
            if let Some(TypeDefinition::InputObject(input)) = self.types.get_mut(def.name.as_str())
            {
                input.fields.extend(fields);
            }
        }
        for def in &pending.input_extensions {
            let location = self.location(def);
            let fields = self.input_values(&def.fields);
            match self.types.get_mut(def.name.as_str()) {
                Some(TypeDefinition::InputObject(input)) => input.fields.extend(fields),
                _ => self.errors.push(CompileError::UnknownType {
                    name: def.name.to_string(),
                    location,
                }),
            }
        }
    }

    fn link_possible_types(&mut self) {
        let implementations = self
            .types
            .values()
            .filter_map(|definition| match definition {
                TypeDefinition::Object(object) => Some(object),
                _ => None,
            })
            .flat_map(|object| {
                object
                    .interfaces
                    .iter()
                    .map(|interface| (interface.clone(), object.name.clone()))
            })
            .collect::<Vec<_>>();
        for (interface, object) in implementations {
            if let Some(TypeDefinition::Interface(definition)) = self.types.get_mut(&interface) {
                definition.possible_types.insert(object);
            }
        }
    }

    /// Cycles that no lazy resolution can break: interfaces implementing each other, and input
    /// objects whose non-null fields lead back to themselves (no finite value exists).
    fn check_cycles(&mut self) {
        let mut interface_edges: IndexMap<&str, Vec<&str>> = IndexMap::new();
        let mut input_edges: IndexMap<&str, Vec<&str>> = IndexMap::new();
        for definition in self.types.values() {
            match definition {
                TypeDefinition::Interface(interface) => {
                    interface_edges.insert(
                        &interface.name,
                        interface.interfaces.iter().map(String::as_str).collect(),
                    );
                }
                TypeDefinition::InputObject(input) => {
                    let required = input
                        .fields
                        .values()
                        .filter_map(|field| match &field.ty {
                            FieldType::NonNull(inner) => match &**inner {
                                FieldType::Named(name)
                                    if matches!(
                                        self.types.get(name),
                                        Some(TypeDefinition::InputObject(_))
                                    ) =>
                                {
                                    Some(name.as_str())
                                }
                                _ => None,
                            },
                            _ => None,
                        })
                        .collect();
                    input_edges.insert(&input.name, required);
                }
                _ => {}
            }
        }
        let cycles = find_cycles(&interface_edges)
            .into_iter()
            .chain(find_cycles(&input_edges))
            .map(|cycle| CompileError::CyclicDefinition {
                cycle: cycle.join(" -> "),
                location: None,
            })
            .collect::<Vec<_>>();
        self.errors.extend(cycles);
    }

    fn detect_nodes(&mut self) {
        let interface_nodes = self
            .types
            .values()
            .filter_map(|definition| match definition {
                TypeDefinition::Interface(interface) => interface
                    .fields
                    .get("id")
                    .filter(|id| id.ty.is_non_null_id())
                    .map(|_| interface.name.clone()),
                _ => None,
            })
            .collect::<IndexSet<_>>();
        for definition in self.types.values_mut() {
            match definition {
                TypeDefinition::Interface(interface) => {
                    interface.node = interface_nodes.contains(&interface.name);
                }
                TypeDefinition::Object(object) => {
                    object.node = object
                        .fields
                        .get("id")
                        .map(|id| id.ty.is_non_null_id())
                        .unwrap_or(false)
                        || object
                            .interfaces
                            .iter()
                            .any(|interface| interface_nodes.contains(interface));
                }
                _ => {}
            }
        }
    }

    fn root_types(
        &mut self,
        pending: &Pending<'doc>,
    ) -> (Option<String>, Option<String>, Option<String>) {
        let mut roots: HashMap<ast::OperationType, String> = HashMap::new();
        for root in &pending.root_operations {
            let (kind, name) = &***root;
            if matches!(self.types.get(name.as_str()), Some(TypeDefinition::Object(_))) {
                roots.insert(*kind, name.to_string());
            } else {
                let location = self.location(root);
                self.errors.push(CompileError::UnknownType {
                    name: name.to_string(),
                    location,
                });
            }
        }
        let mut root = |kind: ast::OperationType, default: &str| {
            roots.remove(&kind).or_else(|| {
                matches!(self.types.get(default), Some(TypeDefinition::Object(_)))
                    .then(|| default.to_string())
            })
        };
        (
            root(ast::OperationType::Query, "Query"),
            root(ast::OperationType::Mutation, "Mutation"),
            root(ast::OperationType::Subscription, "Subscription"),
        )
    }
}

/// Elementary cycles reachable in a directed graph, each reported once starting from its first
/// node in graph order.
pub(super) fn find_cycles<'a>(edges: &IndexMap<&'a str, Vec<&'a str>>) -> Vec<Vec<&'a str>> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Visiting,
        Done,
    }

    fn visit<'a>(
        node: &'a str,
        edges: &IndexMap<&'a str, Vec<&'a str>>,
        marks: &mut HashMap<&'a str, Mark>,
        stack: &mut Vec<&'a str>,
        cycles: &mut Vec<Vec<&'a str>>,
    ) {
        marks.insert(node, Mark::Visiting);
        stack.push(node);
        for next in edges.get(node).into_iter().flatten() {
            match marks.get(next) {
                Some(Mark::Visiting) => {
                    if let Some(start) = stack.iter().position(|n| n == next) {
                        let mut cycle = stack[start..].to_vec();
                        cycle.push(next);
                        cycles.push(cycle);
                    }
                }
                Some(Mark::Done) => {}
                None => visit(next, edges, marks, stack, cycles),
            }
        }
        stack.pop();
        marks.insert(node, Mark::Done);
    }

    let mut marks = HashMap::new();
    let mut cycles = Vec::new();
    for node in edges.keys() {
        if !marks.contains_key(node) {
            visit(node, edges, &mut marks, &mut Vec::new(), &mut cycles);
        }
    }
    cycles
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;

    fn registry(sdl: &str) -> TypeRegistry {
        TypeRegistry::parse(sdl, "schema.graphql", &ScalarCodecs::default()).unwrap()
    }

    fn errors(sdl: &str) -> Vec<CompileError> {
        TypeRegistry::parse(sdl, "schema.graphql", &ScalarCodecs::default())
            .unwrap_err()
            .into_iter()
            .collect()
    }

    #[test]
    fn self_referencing_types_resolve() {
        let registry = registry(
            r#"
            type Query { me: User }
            type User { id: ID! name: String friends: [User!]! bestFriend: User }
            "#,
        );
        let friends = registry.field("User", "friends").unwrap();
        assert_eq!(friends.ty.to_string(), "[User!]!");
        assert!(registry.is_node("User"));
        assert_eq!(registry.root_type(OperationKind::Query), Some("Query"));
        assert_eq!(registry.root_type(OperationKind::Mutation), None);
    }

    #[test]
    fn unknown_type_is_reported_with_location() {
        let errors = errors("type Query {\n  me: Missing\n  other: AlsoMissing\n}");
        assert_eq!(
            errors,
            vec![
                CompileError::UnknownType {
                    name: "Missing".into(),
                    location: Some(Location { line: 2, column: 3 }),
                },
                CompileError::UnknownType {
                    name: "AlsoMissing".into(),
                    location: Some(Location { line: 3, column: 3 }),
                },
            ]
        );
    }

    #[test]
    fn types_defined_twice_are_reported() {
        let errors = errors("type Query { me: User }\ntype User { id: ID! }\ntype User { name: String }");
        assert_eq!(
            errors,
            vec![CompileError::DuplicateType {
                name: "User".into(),
                location: Some(Location { line: 3, column: 1 }),
            }]
        );
    }

    #[test]
    fn custom_scalars_need_a_codec() {
        let errors = errors("scalar Country\nscalar DateTime\ntype Query { c: Country d: DateTime }");
        assert_eq!(errors.len(), 1);
        assert!(
            matches!(&errors[0], CompileError::UnknownScalar { name, .. } if name == "Country")
        );
    }

    #[test]
    fn interfaces_and_unions() {
        let registry = registry(
            r#"
            type Query { node(id: ID!): Node search: [SearchResult!]! }
            interface Node { id: ID! }
            type User implements Node { id: ID! name: String }
            type Post implements Node { id: ID! title: String }
            type Tag { label: String }
            union SearchResult = User | Tag
            extend union SearchResult = Post
            "#,
        );
        assert!(registry.is_abstract("Node"));
        assert_eq!(
            registry.possible_types("Node").into_iter().collect::<Vec<_>>(),
            vec!["User", "Post"]
        );
        assert_eq!(
            registry
                .possible_types("SearchResult")
                .into_iter()
                .collect::<Vec<_>>(),
            vec!["User", "Tag", "Post"]
        );
        assert!(registry.is_node("Node"));
        assert!(!registry.is_node("Tag"));
        assert!(registry.is_subtype("SearchResult", "Post"));
    }

    #[test]
    fn node_contract_is_inherited() {
        let registry = registry(
            r#"
            type Query { a: A }
            interface Node { id: ID! }
            type A implements Node { id: ID! }
            type B { id: ID }
            "#,
        );
        assert!(registry.is_node("A"));
        assert!(!registry.is_node("B"));
        assert!(registry.has_nullable_id("B"));
    }

    #[test]
    fn widening_establishes_identity() {
        let mut registry = registry("type Query { b: B } type B { id: ID name: String }");
        assert!(registry.widen_identity("B"));
        assert!(registry.is_node("B"));
        assert_eq!(registry.field("B", "id").unwrap().ty.to_string(), "ID!");
        assert!(!registry.widen_identity("B"));
    }

    #[test]
    fn extensions_and_root_overrides() {
        let registry = registry(
            r#"
            schema { query: Root }
            type Root { a: Int }
            extend type Root { b: Color }
            enum Color { RED }
            extend enum Color { GREEN }
            input Filter { a: Int }
            extend input Filter { b: String = "x" }
            "#,
        );
        assert_eq!(registry.root_type(OperationKind::Query), Some("Root"));
        assert!(registry.field("Root", "b").is_some());
        let Some(TypeDefinition::Enum(color)) = registry.get("Color") else {
            panic!("expected an enum");
        };
        assert_eq!(color.values, vec!["RED", "GREEN"]);
        let Some(TypeDefinition::InputObject(filter)) = registry.get("Filter") else {
            panic!("expected an input object");
        };
        assert_eq!(
            filter.fields["b"].default_value,
            Some(serde_json_bytes::json!("x"))
        );
    }

    #[test]
    fn recursive_inputs() {
        // A nullable self reference is fine.
        registry("type Query { a(f: Filter): Int } input Filter { and: [Filter!] not: Filter }");

        let errors = errors(
            r#"
            type Query { a(f: A): Int }
            input A { b: B! }
            input B { a: A! }
            "#,
        );
        assert_eq!(
            errors,
            vec![CompileError::CyclicDefinition {
                cycle: "A -> B -> A".into(),
                location: None,
            }]
        );
    }

    #[test]
    fn interface_cycles() {
        let errors = errors(
            r#"
            type Query { a: Int }
            interface I implements J { a: Int }
            interface J implements I { a: Int }
            "#,
        );
        assert_eq!(
            errors,
            vec![CompileError::CyclicDefinition {
                cycle: "I -> J -> I".into(),
                location: None,
            }]
        );
    }

    #[test]
    fn parse_errors() {
        let errors = errors("type Query {");
        assert!(matches!(&errors[..], [CompileError::Parsing { .. }]));
    }
}
