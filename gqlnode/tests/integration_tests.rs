use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use futures::channel::mpsc::UnboundedReceiver;
use futures::stream;
use futures::StreamExt;
use gqlnode::cache::FieldValue;
use gqlnode::cache::IdentityKey;
use gqlnode::error::AttachError;
use gqlnode::error::FetchError;
use gqlnode::graphql;
use gqlnode::handler::HandlerEvent;
use gqlnode::handler::HandlerState;
use gqlnode::json_ext::Object;
use gqlnode::json_ext::Value;
use gqlnode::services::Driver;
use gqlnode::services::ResponseStream;
use gqlnode::services::Transport;
use gqlnode::Compilation;
use gqlnode::Compiler;
use gqlnode::Configuration;
use gqlnode::Fetch;
use gqlnode::Runtime;
use pretty_assertions::assert_eq;
use serde_json_bytes::json;
use test_log::test;
use uuid::Uuid;

const SCHEMA: &str = r#"
    interface Node { id: ID! }
    type User implements Node {
        id: ID!
        name: String!
        email: String
        friends(first: Int = 10): [User!]!
    }
    type Post implements Node { id: ID! title: String! author: User! }
    union SearchResult = User | Post
    type Query {
        me: User
        user(id: ID!): User
        node(id: ID!): Node
        search(text: String!): [SearchResult!]!
    }
    type Mutation { rename(id: ID!, name: String!): User! }
    type Subscription { userChanged(id: ID!): User! }
"#;

const FRAGMENTS: &str = r#"
    fragment UserFields on User { id name }
"#;

const OPERATIONS: &str = r#"
    query Me { me { ...UserFields } }
    query UserById($id: ID!) { user(id: $id) { ...UserFields email } }
    query Friends($first: Int) { me { id friends(first: $first) { ...UserFields } } }
    query Search($text: String!) {
        search(text: $text) {
            ... on User { name }
            ... on Post { title author { name } }
        }
    }
    mutation Rename($id: ID!, $name: String!) { rename(id: $id, name: $name) { id name } }
    subscription UserChanged($id: ID!) { userChanged(id: $id) { ...UserFields } }
"#;

const ENVIRONMENT: &str = "main";

fn compile(documents: &[(&str, &str)]) -> Compilation {
    Compiler::default()
        .compile(("schema.graphql", SCHEMA), documents)
        .unwrap()
}

fn runtime() -> Runtime {
    let mut runtime = Runtime::new();
    runtime.add_environment(
        ENVIRONMENT,
        compile(&[
            ("fragments.graphql", FRAGMENTS),
            ("operations.graphql", OPERATIONS),
        ]),
    );
    runtime
}

fn variables(value: Value) -> Object {
    value.as_object().cloned().unwrap()
}

fn respond(runtime: &mut Runtime, fetch: &Fetch, data: Value) {
    runtime.on_response(fetch.id, graphql::Response::builder().data(data).build());
}

fn drain(receiver: &mut UnboundedReceiver<HandlerEvent>) -> Vec<HandlerEvent> {
    let mut events = Vec::new();
    while let Ok(Some(event)) = receiver.try_next() {
        events.push(event);
    }
    events
}

fn user(id: &str) -> IdentityKey {
    IdentityKey::new("User", id)
}

#[test]
fn canonical_text() {
    let compilation = compile(&[
        ("fragments.graphql", FRAGMENTS),
        ("operations.graphql", OPERATIONS),
    ]);
    let text = |name: &str| compilation.operation(name).unwrap().text.clone();
    insta::assert_snapshot!(text("Me"), @"query Me{me{id name}}");
    insta::assert_snapshot!(
        text("UserById"),
        @"query UserById($id:ID!){user(id:$id){id name email}}"
    );
    insta::assert_snapshot!(
        text("Search"),
        @"query Search($text:String!){search(text:$text){__typename ...on User{name id} ...on Post{title author{name id} id}}}"
    );
    insta::assert_snapshot!(
        text("UserChanged"),
        @"subscription UserChanged($id:ID!){userChanged(id:$id){id name}}"
    );
}

#[test]
fn repeated_fields_compile_like_merged_ones() {
    let compilation = compile(&[(
        "operations.graphql",
        r#"
            query Split { me { name } me { email } }
            query Merged { me { name email } }
            query Spread { me { ...Name ... on User { email } } }
            fragment Name on User { name }
        "#,
    )]);
    let root = |name: &str| compilation.operation(name).unwrap().root.clone();
    assert_eq!(root("Split"), root("Merged"));
    assert_eq!(root("Spread"), root("Merged"));
}

#[test]
fn interface_choices_cover_every_fragment() {
    let compilation = compile(&[(
        "operations.graphql",
        r#"query Node { node(id: "1") { id ... on User { name } ... on Post { title } } }"#,
    )]);
    let node = &compilation.operation("Node").unwrap().root.selections[0];
    let keys = |fields: &[gqlnode::QueriedField]| {
        fields
            .iter()
            .map(|field| field.response_key().to_string())
            .collect::<Vec<_>>()
    };
    assert_eq!(keys(&node.selections), vec!["id"]);
    let choices = node
        .choices
        .iter()
        .map(|(type_name, fields)| (type_name.as_str(), keys(fields)))
        .collect::<Vec<_>>();
    assert_eq!(
        choices
            .iter()
            .map(|(type_name, fields)| (*type_name, fields.iter().map(String::as_str).collect::<Vec<_>>()))
            .collect::<Vec<_>>(),
        vec![("User", vec!["id", "name"]), ("Post", vec!["id", "title"])]
    );
}

#[test]
fn operations_share_cached_nodes() {
    let mut runtime = runtime();
    let (me, mut me_events) = runtime.attach(ENVIRONMENT, "Me", Object::new()).unwrap();
    let (by_id, _by_id_events) = runtime
        .attach(ENVIRONMENT, "UserById", variables(json!({ "id": "1" })))
        .unwrap();
    let fetches = runtime.take_fetches();
    assert_eq!(fetches.len(), 2);

    respond(
        &mut runtime,
        &fetches[0],
        json!({ "me": { "id": "1", "name": "Ann" } }),
    );
    respond(
        &mut runtime,
        &fetches[1],
        json!({ "user": { "id": "1", "name": "Bob", "email": "bob@example.com" } }),
    );

    let store = runtime.store(ENVIRONMENT).unwrap();
    assert_eq!(store.len(), 1);
    assert_eq!(store.ref_count(&user("1")), 2);
    assert_eq!(
        runtime.current_data(me).unwrap().unwrap().to_value(),
        json!({ "me": { "id": "1", "name": "Bob" } })
    );
    assert_eq!(
        runtime.current_data(by_id).unwrap().unwrap().to_value(),
        json!({ "user": { "id": "1", "name": "Bob", "email": "bob@example.com" } })
    );
    assert_eq!(
        drain(&mut me_events),
        vec![
            HandlerEvent::FetchStarted,
            HandlerEvent::DataChanged,
            HandlerEvent::Completed,
            // from the response of UserById
            HandlerEvent::DataChanged,
        ]
    );
}

#[test]
fn nodes_live_as_long_as_a_graph_references_them() {
    let mut runtime = runtime();
    let (me, _me_events) = runtime.attach(ENVIRONMENT, "Me", Object::new()).unwrap();
    let (search, _search_events) = runtime
        .attach(ENVIRONMENT, "Search", variables(json!({ "text": "a" })))
        .unwrap();
    let fetches = runtime.take_fetches();
    respond(
        &mut runtime,
        &fetches[0],
        json!({ "me": { "id": "1", "name": "Ann" } }),
    );
    respond(
        &mut runtime,
        &fetches[1],
        json!({ "search": [
            { "__typename": "User", "id": "1", "name": "Ann" },
            { "__typename": "Post", "id": "p1", "title": "Hello", "author": { "id": "2", "name": "Cy" } },
        ] }),
    );
    assert_eq!(runtime.store(ENVIRONMENT).unwrap().len(), 3);

    runtime.detach(search).unwrap();
    let store = runtime.store(ENVIRONMENT).unwrap();
    assert_eq!(store.len(), 1);
    assert_eq!(store.ref_count(&user("1")), 1);
    assert!(runtime.node(ENVIRONMENT, "Post", "p1").is_none());
    assert!(runtime.node(ENVIRONMENT, "User", "2").is_none());

    runtime.detach(me).unwrap();
    assert!(runtime.store(ENVIRONMENT).unwrap().is_empty());
    assert!(runtime.handlers(ENVIRONMENT).unwrap().is_empty());
    assert_eq!(runtime.detach(me), Err(AttachError::UnknownHandle));
}

#[test]
fn concurrent_attaches_fetch_once() {
    let mut runtime = runtime();
    let consumers = (0..3)
        .map(|_| runtime.attach(ENVIRONMENT, "Me", Object::new()).unwrap())
        .collect::<Vec<_>>();
    let fetches = runtime.take_fetches();
    assert_eq!(fetches.len(), 1);
    for (consumer, _) in &consumers {
        assert!(runtime.is_loading(*consumer).unwrap());
    }

    respond(
        &mut runtime,
        &fetches[0],
        json!({ "me": { "id": "1", "name": "Ann" } }),
    );
    for (consumer, _) in &consumers {
        assert_eq!(runtime.state(*consumer).unwrap(), HandlerState::Completed);
    }

    // a late consumer reads what is cached
    let (late, _) = runtime.attach(ENVIRONMENT, "Me", Object::new()).unwrap();
    assert!(runtime.take_fetches().is_empty());
    assert_eq!(
        runtime.current_data(late).unwrap().unwrap().to_value(),
        json!({ "me": { "id": "1", "name": "Ann" } })
    );
}

#[test]
fn refetch_updates_the_node_in_place() {
    let mut runtime = runtime();
    let (me, _events) = runtime.attach(ENVIRONMENT, "Me", Object::new()).unwrap();
    let first = runtime.take_fetches().remove(0);
    respond(
        &mut runtime,
        &first,
        json!({ "me": { "id": "1", "name": "Ann" } }),
    );

    runtime.refetch(me).unwrap();
    let second = runtime.take_fetches().remove(0);
    assert_eq!(second.request.query, first.request.query);
    respond(
        &mut runtime,
        &second,
        json!({ "me": { "id": "1", "name": "Bob" } }),
    );

    let store = runtime.store(ENVIRONMENT).unwrap();
    assert_eq!(store.len(), 1);
    assert_eq!(store.ref_count(&user("1")), 1);
    assert_eq!(
        runtime.node(ENVIRONMENT, "User", "1").unwrap().fields["name"],
        FieldValue::Leaf(json!("Bob"))
    );
}

#[test]
fn late_responses_do_not_override_newer_ones() {
    let mut runtime = runtime();
    let (me, _events) = runtime.attach(ENVIRONMENT, "Me", Object::new()).unwrap();
    runtime.refetch(me).unwrap();
    let fetches = runtime.take_fetches();
    assert_eq!(fetches.len(), 2);

    respond(
        &mut runtime,
        &fetches[1],
        json!({ "me": { "id": "1", "name": "Bob" } }),
    );
    respond(
        &mut runtime,
        &fetches[0],
        json!({ "me": { "id": "1", "name": "Ann" } }),
    );
    assert!(!runtime.is_loading(me).unwrap());
    assert_eq!(
        runtime.current_data(me).unwrap().unwrap().to_value(),
        json!({ "me": { "id": "1", "name": "Bob" } })
    );
}

#[test]
fn new_variables_refetch() {
    let mut runtime = runtime();
    let (consumer, _events) = runtime
        .attach(ENVIRONMENT, "UserById", variables(json!({ "id": "1" })))
        .unwrap();
    let first = runtime.take_fetches().remove(0);
    respond(
        &mut runtime,
        &first,
        json!({ "user": { "id": "1", "name": "Ann", "email": null } }),
    );

    runtime
        .set_variables(consumer, variables(json!({ "id": "2" })))
        .unwrap();
    let second = runtime.take_fetches().remove(0);
    assert_eq!(second.request.variables, variables(json!({ "id": "2" })));
    respond(
        &mut runtime,
        &second,
        json!({ "user": { "id": "2", "name": "Cy", "email": null } }),
    );

    // the first user is not referenced anymore
    assert!(runtime.node(ENVIRONMENT, "User", "1").is_none());
    assert!(runtime.node(ENVIRONMENT, "User", "2").is_some());
}

#[test]
fn responses_are_stored_with_the_variables_of_their_fetch() {
    let mut runtime = runtime();
    let (consumer, _events) = runtime
        .attach(ENVIRONMENT, "Friends", variables(json!({ "first": 1 })))
        .unwrap();
    let first = runtime.take_fetches().remove(0);
    runtime
        .set_variables(consumer, variables(json!({ "first": 2 })))
        .unwrap();
    let second = runtime.take_fetches().remove(0);

    // the answer to the first fetch arrives while the second one is in flight
    respond(
        &mut runtime,
        &first,
        json!({ "me": { "id": "1", "friends": [{ "id": "2", "name": "Cy" }] } }),
    );
    let me = runtime.node(ENVIRONMENT, "User", "1").unwrap();
    assert_eq!(
        me.fields.keys().map(String::as_str).collect::<Vec<_>>(),
        vec!["id", "friends(first:1)"]
    );
    assert!(runtime.is_loading(consumer).unwrap());
    assert_eq!(
        runtime.current_data(consumer).unwrap().unwrap().to_value(),
        json!({ "me": { "id": "1", "friends": [{ "id": "2", "name": "Cy" }] } })
    );

    respond(
        &mut runtime,
        &second,
        json!({ "me": { "id": "1", "friends": [
            { "id": "2", "name": "Cy" },
            { "id": "3", "name": "Di" },
        ] } }),
    );
    let me = runtime.node(ENVIRONMENT, "User", "1").unwrap();
    assert_eq!(
        me.fields.keys().map(String::as_str).collect::<Vec<_>>(),
        vec!["id", "friends(first:1)", "friends(first:2)"]
    );
    assert_eq!(
        runtime.current_data(consumer).unwrap().unwrap().to_value(),
        json!({ "me": { "id": "1", "friends": [
            { "id": "2", "name": "Cy" },
            { "id": "3", "name": "Di" },
        ] } })
    );
}

#[test]
fn mutations_update_queries() {
    let mut runtime = runtime();
    let (me, mut me_events) = runtime.attach(ENVIRONMENT, "Me", Object::new()).unwrap();
    let fetch = runtime.take_fetches().remove(0);
    respond(
        &mut runtime,
        &fetch,
        json!({ "me": { "id": "1", "name": "Ann" } }),
    );
    drain(&mut me_events);

    let (_rename, _rename_events) = runtime
        .attach(
            ENVIRONMENT,
            "Rename",
            variables(json!({ "id": "1", "name": "Bob" })),
        )
        .unwrap();
    let fetch = runtime.take_fetches().remove(0);
    assert_eq!(
        fetch.request.query,
        "mutation Rename($id:ID!,$name:String!){rename(id:$id,name:$name){id name}}"
    );
    respond(
        &mut runtime,
        &fetch,
        json!({ "rename": { "id": "1", "name": "Bob" } }),
    );
    assert_eq!(drain(&mut me_events), vec![HandlerEvent::DataChanged]);
    assert_eq!(
        runtime.current_data(me).unwrap().unwrap().to_value(),
        json!({ "me": { "id": "1", "name": "Bob" } })
    );
}

#[test]
fn responses_of_destroyed_handlers_are_discarded() {
    let mut runtime = runtime();
    let (me, _events) = runtime.attach(ENVIRONMENT, "Me", Object::new()).unwrap();
    let fetch = runtime.take_fetches().remove(0);
    runtime.detach(me).unwrap();
    assert!(!runtime.is_pending(fetch.id));

    respond(
        &mut runtime,
        &fetch,
        json!({ "me": { "id": "1", "name": "Ann" } }),
    );
    assert!(runtime.store(ENVIRONMENT).unwrap().is_empty());
    assert!(runtime.handlers(ENVIRONMENT).unwrap().is_empty());
}

#[test]
fn dropped_receivers_release_their_handler() {
    let mut runtime = runtime();
    let (_me, events) = runtime.attach(ENVIRONMENT, "Me", Object::new()).unwrap();
    let fetch = runtime.take_fetches().remove(0);
    drop(events);
    respond(
        &mut runtime,
        &fetch,
        json!({ "me": { "id": "1", "name": "Ann" } }),
    );
    assert!(runtime.handlers(ENVIRONMENT).unwrap().is_empty());
    assert!(runtime.store(ENVIRONMENT).unwrap().is_empty());
}

#[test]
fn attach_errors() {
    let mut runtime = runtime();
    assert_eq!(
        runtime.attach("nope", "Me", Object::new()).unwrap_err(),
        AttachError::UnknownEnvironment("nope".to_string())
    );
    assert_eq!(
        runtime.attach(ENVIRONMENT, "Nope", Object::new()).unwrap_err(),
        AttachError::UnknownOperation {
            environment: ENVIRONMENT.to_string(),
            operation: "Nope".to_string(),
        }
    );
    assert_eq!(
        runtime
            .attach(ENVIRONMENT, "UserById", Object::new())
            .unwrap_err()
            .to_string(),
        "invalid variables for operation 'UserById': missing value for non-null variable '$id' of type ID!"
    );
    assert!(runtime.take_fetches().is_empty());
}

#[test]
fn graphql_errors_keep_the_previous_data() {
    let mut runtime = runtime();
    let (me, _events) = runtime.attach(ENVIRONMENT, "Me", Object::new()).unwrap();
    let fetch = runtime.take_fetches().remove(0);
    respond(
        &mut runtime,
        &fetch,
        json!({ "me": { "id": "1", "name": "Ann" } }),
    );

    runtime.refetch(me).unwrap();
    let fetch = runtime.take_fetches().remove(0);
    runtime.on_response(
        fetch.id,
        graphql::Response::from_value(json!({
            "data": null,
            "errors": [{ "message": "not allowed" }],
        }))
        .unwrap(),
    );
    assert_eq!(runtime.state(me).unwrap(), HandlerState::Failed);
    assert_eq!(runtime.current_error(me).unwrap()[0].message, "not allowed");
    assert_eq!(
        runtime.current_data(me).unwrap().unwrap().to_value(),
        json!({ "me": { "id": "1", "name": "Ann" } })
    );
}

#[test]
fn configured_sources_compile() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("schema.graphql"), SCHEMA).unwrap();
    std::fs::write(dir.path().join("fragments.graphql"), FRAGMENTS).unwrap();
    std::fs::write(dir.path().join("operations.graphql"), OPERATIONS).unwrap();
    std::fs::write(
        dir.path().join("gqlnode.yaml"),
        r#"
environment: app
schema: schema.graphql
operations:
  - fragments.graphql
  - operations.graphql
"#,
    )
    .unwrap();

    let configuration = Configuration::read(dir.path().join("gqlnode.yaml")).unwrap();
    let sources = configuration.read_sources().unwrap();
    let compilation = Compiler::from_configuration(&configuration)
        .compile_sources(&sources)
        .unwrap();
    assert_eq!(
        compilation.operations.keys().collect::<Vec<_>>(),
        vec!["Me", "UserById", "Friends", "Search", "Rename", "UserChanged"]
    );
}

/// Answers from canned payloads, by operation name.
#[derive(Default)]
struct MockTransport {
    responses: Mutex<HashMap<String, VecDeque<Value>>>,
    subscriptions: Mutex<HashMap<String, Vec<Value>>>,
    open: Mutex<HashMap<String, Vec<Value>>>,
    closed: Arc<AtomicUsize>,
    sent: Mutex<Vec<graphql::Request>>,
}

/// Counts the subscription streams the driver dropped.
struct CloseGuard(Arc<AtomicUsize>);

impl CloseGuard {
    fn keep(&self) {}
}

impl Drop for CloseGuard {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

impl MockTransport {
    fn respond(self, operation: &str, payload: Value) -> Self {
        self.responses
            .lock()
            .unwrap()
            .entry(operation.to_string())
            .or_default()
            .push_back(payload);
        self
    }

    fn stream(self, operation: &str, payloads: Vec<Value>) -> Self {
        self.subscriptions
            .lock()
            .unwrap()
            .insert(operation.to_string(), payloads);
        self
    }

    /// A subscription that never ends on its own.
    fn stream_open(self, operation: &str, payloads: Vec<Value>) -> Self {
        self.open
            .lock()
            .unwrap()
            .insert(operation.to_string(), payloads);
        self
    }

    fn sent(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|request| request.operation_name.clone().unwrap_or_default())
            .collect()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: graphql::Request) -> Result<graphql::Response, FetchError> {
        let operation = request.operation_name.clone().unwrap_or_default();
        self.sent.lock().unwrap().push(request);
        let payload = self
            .responses
            .lock()
            .unwrap()
            .get_mut(&operation)
            .and_then(VecDeque::pop_front);
        match payload {
            Some(payload) => graphql::Response::from_value(payload),
            None => Err(FetchError::Transport {
                reason: format!("no response for {operation}"),
            }),
        }
    }

    fn subscribe(&self, _id: Uuid, request: graphql::Request) -> ResponseStream {
        let operation = request.operation_name.clone().unwrap_or_default();
        self.sent.lock().unwrap().push(request);
        if let Some(payloads) = self.open.lock().unwrap().remove(&operation) {
            let guard = CloseGuard(self.closed.clone());
            return stream::iter(payloads.into_iter().map(graphql::Response::from_value))
                .chain(stream::pending())
                .map(move |response| {
                    guard.keep();
                    response
                })
                .boxed();
        }
        let payloads = self
            .subscriptions
            .lock()
            .unwrap()
            .remove(&operation)
            .unwrap_or_default();
        stream::iter(payloads.into_iter().map(graphql::Response::from_value)).boxed()
    }
}

#[test(tokio::test)]
async fn driver_deduplicates_fetches() {
    let transport = Arc::new(
        MockTransport::default().respond("Me", json!({ "data": { "me": { "id": "1", "name": "Ann" } } })),
    );
    let mut driver = Driver::new(runtime(), transport.clone());
    let consumers = (0..3)
        .map(|_| {
            driver
                .runtime_mut()
                .attach(ENVIRONMENT, "Me", Object::new())
                .unwrap()
        })
        .collect::<Vec<_>>();
    driver.run_until_idle().await;

    assert_eq!(transport.sent(), vec!["Me"]);
    for (consumer, _) in &consumers {
        assert_eq!(
            driver.runtime().state(*consumer).unwrap(),
            HandlerState::Completed
        );
    }
}

#[test(tokio::test)]
async fn driver_reports_transport_failures() {
    let transport = Arc::new(MockTransport::default());
    let mut driver = Driver::new(runtime(), transport.clone());
    let (me, _events) = driver
        .runtime_mut()
        .attach(ENVIRONMENT, "Me", Object::new())
        .unwrap();
    driver.run_until_idle().await;

    let runtime = driver.into_runtime();
    assert_eq!(runtime.state(me).unwrap(), HandlerState::Failed);
    assert_eq!(
        runtime.current_error(me).unwrap()[0].message,
        "transport failed: no response for Me"
    );
}

#[test(tokio::test)]
async fn subscription_payloads_supersede_each_other() {
    let transport = Arc::new(MockTransport::default().stream(
        "UserChanged",
        vec![
            json!({ "data": { "userChanged": { "id": "1", "name": "Ann" } } }),
            json!({ "data": { "userChanged": { "id": "1", "name": "Bob" } } }),
        ],
    ));
    let mut driver = Driver::new(runtime(), transport.clone());
    let (consumer, mut events) = driver
        .runtime_mut()
        .attach(ENVIRONMENT, "UserChanged", variables(json!({ "id": "1" })))
        .unwrap();
    driver.run_until_idle().await;

    let runtime = driver.runtime();
    assert_eq!(transport.sent(), vec!["UserChanged"]);
    assert_eq!(runtime.state(consumer).unwrap(), HandlerState::Completed);
    assert_eq!(
        runtime.current_data(consumer).unwrap().unwrap().to_value(),
        json!({ "userChanged": { "id": "1", "name": "Bob" } })
    );
    assert_eq!(
        runtime.store(ENVIRONMENT).unwrap().ref_count(&user("1")),
        1
    );
    assert_eq!(
        drain(&mut events),
        vec![
            HandlerEvent::FetchStarted,
            HandlerEvent::DataChanged,
            HandlerEvent::DataChanged,
            HandlerEvent::Completed,
        ]
    );
    assert!(!runtime.has_pending_fetches());
}

#[test(tokio::test)]
async fn detached_subscriptions_are_dropped() {
    let transport = Arc::new(MockTransport::default().stream_open(
        "UserChanged",
        vec![json!({ "data": { "userChanged": { "id": "1", "name": "Ann" } } })],
    ));
    let mut driver = Driver::new(runtime(), transport.clone());
    let (consumer, _events) = driver
        .runtime_mut()
        .attach(ENVIRONMENT, "UserChanged", variables(json!({ "id": "1" })))
        .unwrap();
    assert!(driver.step().await);
    assert!(driver.runtime().is_loading(consumer).unwrap());
    assert_eq!(transport.closed.load(Ordering::SeqCst), 0);

    driver.runtime_mut().detach(consumer).unwrap();
    tokio::time::timeout(Duration::from_secs(5), driver.run_until_idle())
        .await
        .unwrap();
    assert_eq!(transport.closed.load(Ordering::SeqCst), 1);
    assert!(!driver.runtime().has_pending_fetches());
    assert!(driver.runtime().store(ENVIRONMENT).unwrap().is_empty());
}
