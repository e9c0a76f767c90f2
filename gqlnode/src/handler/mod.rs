//! Query handlers: the state of one operation in one environment, and the consumers watching it.

use std::fmt;

use futures::channel::mpsc;
use indexmap::IndexMap;
use indexmap::IndexSet;
use serde::Serialize;

use crate::cache::ApplyContext;
use crate::cache::IdentityKey;
use crate::cache::ObjectGraphStore;
use crate::cache::ResultGraph;
use crate::compiler::Compilation;
use crate::error::FetchError;
use crate::graphql;
use crate::graphql::ErrorExtension;
use crate::json_ext::Object;
use crate::spec::OperationDefinition;

/// Identifies one attached consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ConsumerHandle(pub(crate) u64);

impl fmt::Display for ConsumerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "consumer-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HandlerState {
    /// No fetch was issued yet.
    Idle,
    /// A fetch, or a subscription stream, is in flight.
    Fetching,
    Completed,
    Failed,
}

/// Change notification sent to the consumers of a handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HandlerEvent {
    FetchStarted,
    /// The data readable through the handler changed, possibly because another handler
    /// updated a node this one references.
    DataChanged,
    ErrorChanged,
    /// The latest fetch is over, successfully or not.
    Completed,
}

/// Sequence number of a fetch issued by a handler, starting at 1.
pub type Sequence = u64;

/// The runtime state of one operation.
#[derive(Debug)]
pub struct QueryHandler {
    operation: OperationDefinition,
    variables: Object,
    state: HandlerState,
    consumers: IndexMap<ConsumerHandle, mpsc::UnboundedSender<HandlerEvent>>,
    dropped: Vec<ConsumerHandle>,
    graph: Option<ResultGraph>,
    errors: Vec<graphql::Error>,
    /// Variables each fetch in flight was sent with.
    in_flight: IndexMap<Sequence, Object>,
    issued: Sequence,
    applied: Sequence,
}

impl QueryHandler {
    pub(crate) fn new(operation: OperationDefinition, variables: Object) -> Self {
        Self {
            operation,
            variables,
            state: HandlerState::Idle,
            consumers: IndexMap::new(),
            dropped: Vec::new(),
            graph: None,
            errors: Vec::new(),
            in_flight: IndexMap::new(),
            issued: 0,
            applied: 0,
        }
    }

    pub fn operation(&self) -> &OperationDefinition {
        &self.operation
    }

    pub fn variables(&self) -> &Object {
        &self.variables
    }

    pub fn state(&self) -> HandlerState {
        self.state
    }

    pub fn is_loading(&self) -> bool {
        self.state == HandlerState::Fetching
    }

    /// The graph of the latest applied response.
    pub fn graph(&self) -> Option<&ResultGraph> {
        self.graph.as_ref()
    }

    /// Errors of the latest failed fetch, empty once a fetch succeeds.
    pub fn errors(&self) -> &[graphql::Error] {
        &self.errors
    }

    pub fn consumers(&self) -> impl Iterator<Item = ConsumerHandle> + '_ {
        self.consumers.keys().copied()
    }

    pub fn has_consumers(&self) -> bool {
        !self.consumers.is_empty()
    }

    /// Returns whether the consumer should trigger the first fetch of the handler.
    pub(crate) fn attach(
        &mut self,
        handle: ConsumerHandle,
        sender: mpsc::UnboundedSender<HandlerEvent>,
    ) -> bool {
        self.consumers.insert(handle, sender);
        self.state == HandlerState::Idle
    }

    /// Returns whether the consumer was attached.
    pub(crate) fn detach(&mut self, handle: ConsumerHandle) -> bool {
        self.consumers.shift_remove(&handle).is_some()
    }

    /// Replaces the variables, returning whether they changed.
    pub(crate) fn set_variables(&mut self, variables: Object) -> bool {
        if self.variables == variables {
            return false;
        }
        self.variables = variables;
        true
    }

    /// Starts a new fetch superseding any previous one.
    pub(crate) fn start_fetch(&mut self) -> (Sequence, graphql::Request) {
        self.issued += 1;
        self.state = HandlerState::Fetching;
        tracing::debug!(sequence = self.issued, "fetch issued");
        self.in_flight.insert(self.issued, self.variables.clone());
        self.notify(HandlerEvent::FetchStarted);
        (self.issued, self.operation.request(self.variables.clone()))
    }

    /// Handles a response of the fetch with the given sequence.
    ///
    /// `finished` is false for the intermediate payloads of a subscription. Returns the nodes
    /// that existed before and were updated by the response.
    pub(crate) fn on_response(
        &mut self,
        sequence: Sequence,
        response: graphql::Response,
        finished: bool,
        store: &mut ObjectGraphStore,
        compilation: &Compilation,
    ) -> IndexSet<IdentityKey> {
        if !self.accepts(sequence) {
            return IndexSet::new();
        }
        self.applied = sequence;
        let variables = self.fetch_variables(sequence, finished);

        let mut updated = IndexSet::new();
        let failed = if response.has_errors() {
            self.set_errors(response.errors);
            true
        } else if let Some(data) = response.data {
            let context = ApplyContext {
                registry: &compilation.registry,
                scalars: &compilation.scalars,
                variables: &variables,
            };
            match store.apply(&self.operation.root, &data, context) {
                Ok(applied) => {
                    // the previous graph is released only once the new one holds its references
                    if let Some(previous) = self.graph.replace(applied.graph) {
                        store.release(previous);
                    }
                    updated = applied.updated;
                    if !self.errors.is_empty() {
                        self.set_errors(Vec::new());
                    }
                    self.notify(HandlerEvent::DataChanged);
                    false
                }
                Err(error) => {
                    tracing::error!(%error, "response does not match the operation");
                    self.set_errors(vec![error.to_graphql_error()]);
                    true
                }
            }
        } else {
            let error = FetchError::MalformedResponse {
                reason: "response carries neither data nor errors".to_string(),
            };
            self.set_errors(vec![error.to_graphql_error(None)]);
            true
        };

        if finished {
            self.settle(sequence, failed);
        }
        updated
    }

    /// Handles the failure of the fetch with the given sequence.
    pub(crate) fn on_failure(&mut self, sequence: Sequence, error: FetchError) {
        if !self.accepts(sequence) {
            return;
        }
        self.applied = sequence;
        self.fetch_variables(sequence, true);
        tracing::warn!(%error, "fetch failed");
        self.set_errors(vec![error.to_graphql_error(None)]);
        self.settle(sequence, true);
    }

    /// Handles the end of a subscription stream.
    pub(crate) fn on_complete(&mut self, sequence: Sequence) {
        self.in_flight.shift_remove(&sequence);
        if sequence != self.issued || self.state != HandlerState::Fetching {
            return;
        }
        let failed = !self.errors.is_empty();
        self.settle(sequence, failed);
    }

    /// Notifies the consumers if the handler reads any of the updated nodes.
    pub(crate) fn on_nodes_updated(&mut self, updated: &IndexSet<IdentityKey>) {
        let Some(graph) = &self.graph else {
            return;
        };
        if updated.iter().any(|key| graph.references(key)) {
            self.notify(HandlerEvent::DataChanged);
        }
    }

    /// Consumers whose receiver was dropped since the last call.
    pub(crate) fn take_dropped(&mut self) -> Vec<ConsumerHandle> {
        std::mem::take(&mut self.dropped)
    }

    /// Releases the data of the handler, returning the evicted nodes.
    pub(crate) fn destroy(self, store: &mut ObjectGraphStore) -> Vec<IdentityKey> {
        match self.graph {
            Some(graph) => store.release(graph),
            None => Vec::new(),
        }
    }

    fn accepts(&self, sequence: Sequence) -> bool {
        if sequence < self.applied {
            tracing::warn!(
                sequence,
                applied = self.applied,
                "dropping a response older than the one applied"
            );
            return false;
        }
        true
    }

    /// Variables the fetch with the given sequence was sent with.
    ///
    /// Older fetches are forgotten, their responses are not accepted anymore. The fetch itself is
    /// forgotten once `finished`.
    fn fetch_variables(&mut self, sequence: Sequence, finished: bool) -> Object {
        self.in_flight.retain(|issued, _| *issued >= sequence);
        let variables = if finished {
            self.in_flight.shift_remove(&sequence)
        } else {
            self.in_flight.get(&sequence).cloned()
        };
        variables.unwrap_or_else(|| self.variables.clone())
    }

    /// Leaves the fetching state, unless a more recent fetch is still in flight.
    fn settle(&mut self, sequence: Sequence, failed: bool) {
        if sequence != self.issued {
            return;
        }
        self.state = if failed {
            HandlerState::Failed
        } else {
            HandlerState::Completed
        };
        self.notify(HandlerEvent::Completed);
    }

    fn set_errors(&mut self, errors: Vec<graphql::Error>) {
        self.errors = errors;
        self.notify(HandlerEvent::ErrorChanged);
    }

    fn notify(&mut self, event: HandlerEvent) {
        let dropped = self
            .consumers
            .iter()
            .filter(|(_, sender)| sender.unbounded_send(event).is_err())
            .map(|(handle, _)| *handle)
            .collect::<Vec<_>>();
        for handle in dropped {
            self.consumers.shift_remove(&handle);
            self.dropped.push(handle);
        }
    }
}

/// The handlers of one environment, one per operation.
///
/// Handlers are created on the first attach and removed once their last consumer detached.
#[derive(Debug, Default)]
pub struct QueryHandlerRegistry {
    handlers: IndexMap<String, QueryHandler>,
}

impl QueryHandlerRegistry {
    pub fn get(&self, operation: &str) -> Option<&QueryHandler> {
        self.handlers.get(operation)
    }

    pub(crate) fn get_mut(&mut self, operation: &str) -> Option<&mut QueryHandler> {
        self.handlers.get_mut(operation)
    }

    /// The handler of an operation, created if needed with the given variables.
    pub(crate) fn get_or_create(
        &mut self,
        operation: &OperationDefinition,
        variables: Object,
    ) -> &mut QueryHandler {
        self.handlers
            .entry(operation.name.clone())
            .or_insert_with(|| {
                tracing::debug!(operation = %operation.name, "created handler");
                QueryHandler::new(operation.clone(), variables)
            })
    }

    pub(crate) fn remove(&mut self, operation: &str) -> Option<QueryHandler> {
        let handler = self.handlers.shift_remove(operation);
        if handler.is_some() {
            tracing::debug!(operation, "destroyed handler");
        }
        handler
    }

    /// Every handler but the one of the given operation.
    pub(crate) fn others_mut<'a>(
        &'a mut self,
        operation: &'a str,
    ) -> impl Iterator<Item = &'a mut QueryHandler> + 'a {
        self.handlers
            .iter_mut()
            .filter(move |(name, _)| name.as_str() != operation)
            .map(|(_, handler)| handler)
    }

    pub fn iter(&self) -> impl Iterator<Item = &QueryHandler> {
        self.handlers.values()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut QueryHandler> {
        self.handlers.values_mut()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
