//! The normalized object cache.
//!
//! Responses are stored as result graphs: trees of values in which every object of a node type
//! is replaced by its [`IdentityKey`]. The node itself lives once in the [`ObjectGraphStore`],
//! shared by every graph that references it and reference counted by them.

mod apply;
mod value;
mod view;

use std::collections::HashMap;

use indexmap::IndexMap;
use indexmap::IndexSet;
use serde::Serialize;

use self::apply::Decoder;
pub use self::value::FieldValue;
pub use self::value::IdentityKey;
pub use self::value::ObjectValue;
pub use self::view::FieldView;
pub use self::view::ObjectView;
use crate::error::ResponseShapeError;
use crate::json_ext::Object;
use crate::json_ext::Path;
use crate::json_ext::Value;
use crate::scalars::ScalarCodecs;
use crate::spec::QueriedField;
use crate::spec::TypeRegistry;

/// One cached node.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CachedNode {
    pub key: IdentityKey,
    /// Values by storage key, accumulated from every selection that fetched the node.
    pub fields: IndexMap<String, FieldValue>,
    /// Number of live result graphs referencing the node.
    pub ref_count: usize,
}

impl CachedNode {
    /// Returns whether any stored value changed.
    fn merge(&mut self, fields: IndexMap<String, FieldValue>) -> bool {
        let before = self.fields.clone();
        value::merge_fields(&mut self.fields, fields);
        before != self.fields
    }
}

/// The data of one applied response.
///
/// A graph holds one reference on every node it reached and must be given back to
/// [`ObjectGraphStore::release`] once superseded.
#[derive(Debug)]
pub struct ResultGraph {
    root: ObjectValue,
    nodes: IndexSet<IdentityKey>,
    variables: Object,
}

impl ResultGraph {
    /// Nodes the graph holds a reference on.
    pub fn nodes(&self) -> &IndexSet<IdentityKey> {
        &self.nodes
    }

    pub fn references(&self, key: &IdentityKey) -> bool {
        self.nodes.contains(key)
    }

    pub fn variables(&self) -> &Object {
        &self.variables
    }
}

/// What decoding a response needs beside the selections.
#[derive(Debug, Clone, Copy)]
pub struct ApplyContext<'a> {
    pub registry: &'a TypeRegistry,
    pub scalars: &'a ScalarCodecs,
    /// Coerced variables of the operation.
    pub variables: &'a Object,
}

/// Outcome of [`ObjectGraphStore::apply`].
#[derive(Debug)]
pub struct Applied {
    pub graph: ResultGraph,
    /// Nodes that existed before the apply and whose values changed.
    pub updated: IndexSet<IdentityKey>,
}

#[derive(Debug, Default)]
pub struct ObjectGraphStore {
    nodes: HashMap<IdentityKey, CachedNode>,
}

impl ObjectGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a response payload fetched with the given root selection.
    ///
    /// Nodes already cached are updated in place, only for the fields this selection carries.
    /// The payload is checked entirely before anything is written.
    pub fn apply(
        &mut self,
        root: &QueriedField,
        payload: &Value,
        context: ApplyContext<'_>,
    ) -> Result<Applied, ResponseShapeError> {
        let mut decoder = Decoder::new(context);
        let FieldValue::Object(root_value) = decoder.decode(root, payload, &Path::empty())? else {
            return Err(ResponseShapeError::new(
                &Path::empty(),
                "expected an object at the root",
            ));
        };

        let mut created = IndexSet::new();
        let mut updated = IndexSet::new();
        let mut nodes = IndexSet::new();
        for (key, fields) in decoder.into_writes() {
            match self.nodes.get_mut(&key) {
                Some(node) => {
                    if node.merge(fields) && !created.contains(&key) {
                        tracing::trace!(node = %key, "updated cached node");
                        updated.insert(key.clone());
                    }
                }
                None => {
                    tracing::trace!(node = %key, "created cached node");
                    self.nodes.insert(
                        key.clone(),
                        CachedNode {
                            key: key.clone(),
                            fields,
                            ref_count: 0,
                        },
                    );
                    created.insert(key.clone());
                }
            }
            nodes.insert(key);
        }
        for key in &nodes {
            if let Some(node) = self.nodes.get_mut(key) {
                node.ref_count += 1;
            }
        }

        Ok(Applied {
            graph: ResultGraph {
                root: root_value,
                nodes,
                variables: context.variables.clone(),
            },
            updated,
        })
    }

    /// Gives back the references of a graph, evicting the nodes no graph references anymore.
    ///
    /// Returns the evicted keys.
    pub fn release(&mut self, graph: ResultGraph) -> Vec<IdentityKey> {
        let mut evicted = Vec::new();
        for key in graph.nodes {
            let Some(node) = self.nodes.get_mut(&key) else {
                continue;
            };
            node.ref_count = node.ref_count.saturating_sub(1);
            if node.ref_count == 0 {
                self.nodes.remove(&key);
                tracing::debug!(node = %key, "evicted cached node");
                evicted.push(key);
            }
        }
        evicted
    }

    pub fn get(&self, key: &IdentityKey) -> Option<&CachedNode> {
        self.nodes.get(key)
    }

    pub fn contains(&self, key: &IdentityKey) -> bool {
        self.nodes.contains_key(key)
    }

    /// Number of live graphs referencing a node, zero for a node not in the store.
    pub fn ref_count(&self, key: &IdentityKey) -> usize {
        self.nodes.get(key).map(|node| node.ref_count).unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Reads a graph through the root selection it was applied with.
    pub fn view<'a>(&'a self, graph: &'a ResultGraph, root: &'a QueriedField) -> ObjectView<'a> {
        ObjectView::new(
            self,
            &graph.variables,
            &graph.root.typename,
            &graph.root.fields,
            &root.selections,
        )
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json_bytes::json;
    use test_log::test;

    use super::*;
    use crate::compiler::Compilation;
    use crate::compiler::Compiler;

    const SCHEMA: &str = r#"
        interface Node { id: ID! }
        type User implements Node {
            id: ID!
            name: String!
            friends(first: Int): [User!]!
            profile: Profile
            pet: Pet
        }
        type Profile { bio: String avatar: String }
        type Dog implements Node { id: ID! name: String! barks: Boolean! }
        type Cat { name: String! lives: Int! }
        union Pet = Dog | Cat
        type Query { me: User user(id: ID!): User pets: [Pet!]! }
    "#;

    const OPERATIONS: &str = r#"
        query Me { me { id name } }
        query UserName($id: ID!) { user(id: $id) { name } }
        query Friends($first: Int) { me { friends(first: $first) { name } } }
        query Pets { pets { ... on Dog { name barks } ... on Cat { name lives } } }
        query Profile($full: Boolean!) { me { name profile @include(if: $full) { bio } } }
    "#;

    fn compilation() -> Compilation {
        Compiler::default()
            .compile(
                ("schema.graphql", SCHEMA),
                &[("operations.graphql", OPERATIONS)],
            )
            .unwrap()
    }

    fn apply(
        store: &mut ObjectGraphStore,
        compilation: &Compilation,
        operation: &str,
        variables: Value,
        payload: Value,
    ) -> Result<Applied, ResponseShapeError> {
        let variables = variables.as_object().cloned().unwrap_or_default();
        store.apply(
            &compilation.operation(operation).unwrap().root,
            &payload,
            ApplyContext {
                registry: &compilation.registry,
                scalars: &compilation.scalars,
                variables: &variables,
            },
        )
    }

    fn user(id: &str) -> IdentityKey {
        IdentityKey::new("User", id)
    }

    #[test]
    fn same_node_is_updated_in_place() {
        let compilation = compilation();
        let mut store = ObjectGraphStore::new();
        let first = apply(
            &mut store,
            &compilation,
            "Me",
            json!({}),
            json!({ "me": { "id": "1", "name": "Ann" } }),
        )
        .unwrap();
        assert!(first.updated.is_empty());
        let second = apply(
            &mut store,
            &compilation,
            "Me",
            json!({}),
            json!({ "me": { "id": "1", "name": "Bob" } }),
        )
        .unwrap();
        assert_eq!(second.updated, IndexSet::from([user("1")]));
        assert!(store.release(first.graph).is_empty());

        assert_eq!(store.len(), 1);
        let node = store.get(&user("1")).unwrap();
        assert_eq!(node.fields["name"], FieldValue::Leaf(json!("Bob")));
        assert_eq!(node.ref_count, 1);
    }

    #[test]
    fn graphs_of_different_operations_share_nodes() {
        let compilation = compilation();
        let mut store = ObjectGraphStore::new();
        let me = apply(
            &mut store,
            &compilation,
            "Me",
            json!({}),
            json!({ "me": { "id": "1", "name": "Ann" } }),
        )
        .unwrap();
        let by_id = apply(
            &mut store,
            &compilation,
            "UserName",
            json!({ "id": "1" }),
            json!({ "user": { "id": "1", "name": "Bob" } }),
        )
        .unwrap();
        assert_eq!(by_id.updated, IndexSet::from([user("1")]));
        assert_eq!(store.ref_count(&user("1")), 2);

        let root = &compilation.operation("Me").unwrap().root;
        assert_eq!(
            store.view(&me.graph, root).to_value(),
            json!({ "me": { "id": "1", "name": "Bob" } })
        );
    }

    #[test]
    fn releasing_the_last_graph_evicts() {
        let compilation = compilation();
        let mut store = ObjectGraphStore::new();
        let me = apply(
            &mut store,
            &compilation,
            "Me",
            json!({}),
            json!({ "me": { "id": "1", "name": "Ann" } }),
        )
        .unwrap();
        let friends = apply(
            &mut store,
            &compilation,
            "Friends",
            json!({ "first": 2 }),
            json!({ "me": { "id": "1", "friends": [
                { "id": "2", "name": "Cy" },
                { "id": "3", "name": "Di" },
            ] } }),
        )
        .unwrap();
        assert_eq!(store.len(), 3);
        assert_eq!(store.ref_count(&user("1")), 2);

        let mut evicted = store.release(friends.graph);
        evicted.sort();
        assert_eq!(evicted, vec![user("2"), user("3")]);
        assert!(store.contains(&user("1")));
        assert!(!store.contains(&user("2")));

        assert_eq!(store.release(me.graph), vec![user("1")]);
        assert!(store.is_empty());
    }

    #[test]
    fn a_node_listed_twice_is_referenced_once() {
        let compilation = compilation();
        let mut store = ObjectGraphStore::new();
        let applied = apply(
            &mut store,
            &compilation,
            "Friends",
            json!({}),
            json!({ "me": { "id": "1", "friends": [
                { "id": "1", "name": "Ann" },
                { "id": "2", "name": "Cy" },
                { "id": "2", "name": "Cy" },
            ] } }),
        )
        .unwrap();
        assert_eq!(applied.graph.nodes().len(), 2);
        assert_eq!(store.ref_count(&user("2")), 1);
        assert!(applied.updated.is_empty());
    }

    #[test]
    fn arguments_are_part_of_the_storage_key() {
        let compilation = compilation();
        let mut store = ObjectGraphStore::new();
        let _one = apply(
            &mut store,
            &compilation,
            "Friends",
            json!({ "first": 1 }),
            json!({ "me": { "id": "1", "friends": [{ "id": "2", "name": "Cy" }] } }),
        )
        .unwrap();
        let two = apply(
            &mut store,
            &compilation,
            "Friends",
            json!({ "first": 2 }),
            json!({ "me": { "id": "1", "friends": [
                { "id": "2", "name": "Cy" },
                { "id": "3", "name": "Di" },
            ] } }),
        )
        .unwrap();
        let node = store.get(&user("1")).unwrap();
        assert_eq!(
            node.fields.keys().collect::<Vec<_>>(),
            vec!["friends(first:1)", "id", "friends(first:2)"]
        );
        assert_eq!(two.updated, IndexSet::from([user("1")]));
    }

    #[test]
    fn shape_errors_leave_the_store_untouched() {
        let compilation = compilation();
        let mut store = ObjectGraphStore::new();
        let error = apply(
            &mut store,
            &compilation,
            "Me",
            json!({}),
            json!({ "me": { "id": "1" } }),
        )
        .unwrap_err();
        assert_eq!(error.path.to_string(), "me/name");
        assert_eq!(error.reason, "missing non-null field");
        assert!(store.is_empty());

        let error = apply(
            &mut store,
            &compilation,
            "Me",
            json!({}),
            json!({ "me": { "id": "1", "name": 3 } }),
        )
        .unwrap_err();
        assert_eq!(error.reason, "expected a value of type String, found number");

        let error = apply(
            &mut store,
            &compilation,
            "Friends",
            json!({}),
            json!({ "me": { "id": "1", "friends": [{ "id": "2", "name": "Cy" }, null] } }),
        )
        .unwrap_err();
        assert_eq!(error.path.to_string(), "me/friends/1");
        assert_eq!(error.reason, "null value for non-null field");
        assert!(store.is_empty());
    }

    #[test]
    fn polymorphic_values_dispatch_on_typename() {
        let compilation = compilation();
        let mut store = ObjectGraphStore::new();
        let payload = json!({ "pets": [
            { "__typename": "Dog", "id": "d1", "name": "Rex", "barks": true },
            { "__typename": "Cat", "name": "Tom", "lives": 9 },
        ] });
        let applied = apply(&mut store, &compilation, "Pets", json!({}), payload).unwrap();
        assert_eq!(
            applied.graph.nodes(),
            &IndexSet::from([IdentityKey::new("Dog", "d1")])
        );

        let root = &compilation.operation("Pets").unwrap().root;
        let view = store.view(&applied.graph, root);
        let pets = view.get("pets").unwrap();
        let pets = pets.as_list().unwrap();
        assert_eq!(
            pets[0].as_object().unwrap().identity(),
            Some(&IdentityKey::new("Dog", "d1"))
        );
        assert_eq!(pets[1].as_object().unwrap().typename(), "Cat");
        assert_eq!(pets[1].as_object().unwrap().identity(), None);
        assert_eq!(
            view.to_value(),
            json!({ "pets": [
                { "id": "d1", "name": "Rex", "barks": true },
                { "name": "Tom", "lives": 9 },
            ] })
        );
    }

    #[test]
    fn abstract_values_need_a_possible_typename() {
        let compilation = compilation();
        let mut store = ObjectGraphStore::new();
        let error = apply(
            &mut store,
            &compilation,
            "Pets",
            json!({}),
            json!({ "pets": [{ "name": "Tom", "lives": 9 }] }),
        )
        .unwrap_err();
        assert_eq!(error.path.to_string(), "pets/0");
        assert_eq!(
            error.reason,
            "missing '__typename' on a value of abstract type 'Pet'"
        );

        let error = apply(
            &mut store,
            &compilation,
            "Pets",
            json!({}),
            json!({ "pets": [{ "__typename": "User", "id": "1" }] }),
        )
        .unwrap_err();
        assert_eq!(error.reason, "'User' is not a possible type of 'Pet'");
    }

    #[test]
    fn skipped_fields_are_neither_required_nor_read() {
        let compilation = compilation();
        let mut store = ObjectGraphStore::new();
        let applied = apply(
            &mut store,
            &compilation,
            "Profile",
            json!({ "full": false }),
            json!({ "me": { "id": "1", "name": "Ann" } }),
        )
        .unwrap();
        let root = &compilation.operation("Profile").unwrap().root;
        let view = store.view(&applied.graph, root);
        let me = view.get("me").unwrap();
        let me = me.as_object().unwrap();
        assert!(me.get("profile").is_none());
        assert_eq!(me.get("name").unwrap().as_leaf(), Some(&json!("Ann")));
        assert!(!store.get(&user("1")).unwrap().fields.contains_key("profile"));
    }

    #[test]
    fn missing_nodes_read_as_null() {
        let compilation = compilation();
        let mut store = ObjectGraphStore::new();
        let applied = apply(
            &mut store,
            &compilation,
            "Me",
            json!({}),
            json!({ "me": { "id": "1", "name": "Ann" } }),
        )
        .unwrap();
        store.nodes.clear();
        let root = &compilation.operation("Me").unwrap().root;
        assert_eq!(
            store.view(&applied.graph, root).to_value(),
            json!({ "me": null })
        );
    }
}
