//! The consumer facing runtime.
//!
//! [`Runtime`] owns the environments, their stores and their handlers. It performs no I/O:
//! fetches are queued and handed out by [`Runtime::take_fetches`], and their outcome is fed back
//! with [`Runtime::on_response`], [`Runtime::on_transport_error`] and [`Runtime::on_complete`].
//! [`crate::services::Driver`] does this against a [`crate::services::Transport`].

use std::collections::HashMap;
use std::collections::VecDeque;

use futures::channel::mpsc;
use indexmap::IndexMap;
use serde::Serialize;
use uuid::Uuid;

use crate::cache::CachedNode;
use crate::cache::IdentityKey;
use crate::cache::ObjectGraphStore;
use crate::cache::ObjectView;
use crate::compiler::Compilation;
use crate::error::AttachError;
use crate::error::FetchError;
use crate::graphql;
use crate::handler::ConsumerHandle;
use crate::handler::HandlerEvent;
use crate::handler::HandlerState;
use crate::handler::QueryHandler;
use crate::handler::QueryHandlerRegistry;
use crate::handler::Sequence;
use crate::json_ext::Object;
use crate::spec::OperationKind;

/// A fetch to hand to the transport.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Fetch {
    /// Correlates the outcome of the fetch, and names the subscription on the wire.
    pub id: Uuid,
    pub environment: String,
    pub operation: String,
    pub kind: OperationKind,
    pub request: graphql::Request,
}

/// A compiled schema with its own store and handlers.
#[derive(Debug)]
struct Environment {
    compilation: Compilation,
    store: ObjectGraphStore,
    handlers: QueryHandlerRegistry,
}

#[derive(Debug, Clone)]
struct Attachment {
    environment: String,
    operation: String,
}

#[derive(Debug, Clone)]
struct PendingFetch {
    environment: String,
    operation: String,
    sequence: Sequence,
    kind: OperationKind,
}

impl PendingFetch {
    fn is_for(&self, environment: &str, operation: &str) -> bool {
        self.environment == environment && self.operation == operation
    }
}

/// Handlers of every environment, and the consumers attached to them.
#[derive(Debug, Default)]
pub struct Runtime {
    environments: IndexMap<String, Environment>,
    attachments: HashMap<ConsumerHandle, Attachment>,
    pending: HashMap<Uuid, PendingFetch>,
    outbox: VecDeque<Fetch>,
    next_consumer: u64,
}

impl Runtime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a compiled schema under a name, replacing any environment of that name.
    pub fn add_environment(&mut self, name: impl Into<String>, compilation: Compilation) {
        let name = name.into();
        tracing::debug!(
            environment = %name,
            operations = compilation.operations.len(),
            "added environment"
        );
        self.environments.insert(
            name,
            Environment {
                compilation,
                store: ObjectGraphStore::new(),
                handlers: QueryHandlerRegistry::default(),
            },
        );
    }

    pub fn store(&self, environment: &str) -> Option<&ObjectGraphStore> {
        self.environments
            .get(environment)
            .map(|environment| &environment.store)
    }

    pub fn handlers(&self, environment: &str) -> Option<&QueryHandlerRegistry> {
        self.environments
            .get(environment)
            .map(|environment| &environment.handlers)
    }

    /// A cached node, if some live result graph of the environment references it.
    pub fn node(&self, environment: &str, typename: &str, id: &str) -> Option<&CachedNode> {
        self.store(environment)?
            .get(&IdentityKey::new(typename, id))
    }

    /// Attaches a consumer to the handler of an operation.
    ///
    /// The handler is created, and its first fetch queued, if no consumer is attached to it yet.
    /// Attaching with variables that differ from the ones of an existing handler re-fetches it
    /// with the new ones.
    pub fn attach(
        &mut self,
        environment: &str,
        operation: &str,
        variables: Object,
    ) -> Result<(ConsumerHandle, mpsc::UnboundedReceiver<HandlerEvent>), AttachError> {
        let env = self
            .environments
            .get_mut(environment)
            .ok_or_else(|| AttachError::UnknownEnvironment(environment.to_string()))?;
        let definition = env.compilation.operation(operation).ok_or_else(|| {
            AttachError::UnknownOperation {
                environment: environment.to_string(),
                operation: operation.to_string(),
            }
        })?;
        let variables = definition.coerce_variables(
            &variables,
            &env.compilation.registry,
            &env.compilation.scalars,
        )?;

        self.next_consumer += 1;
        let handle = ConsumerHandle(self.next_consumer);
        let (sender, receiver) = mpsc::unbounded();

        let span = handler_span(environment, operation);
        let guard = span.enter();
        let handler = env
            .handlers
            .get_or_create(definition, variables.clone());
        let idle = handler.attach(handle, sender);
        let changed = handler.set_variables(variables);
        tracing::debug!(consumer = %handle, "attached consumer");
        if idle || changed {
            let (sequence, request) = handler.start_fetch();
            self.outbox.push_back(queue_fetch(
                &mut self.pending,
                environment,
                handler,
                sequence,
                request,
            ));
        }
        self.attachments.insert(
            handle,
            Attachment {
                environment: environment.to_string(),
                operation: operation.to_string(),
            },
        );
        drop(guard);
        self.reap_dropped(environment);
        Ok((handle, receiver))
    }

    /// Detaches a consumer. The handler is destroyed, and its data released, with its last
    /// consumer.
    pub fn detach(&mut self, handle: ConsumerHandle) -> Result<(), AttachError> {
        let attachment = self
            .attachments
            .remove(&handle)
            .ok_or(AttachError::UnknownHandle)?;
        let span = handler_span(&attachment.environment, &attachment.operation);
        let _guard = span.enter();
        tracing::debug!(consumer = %handle, "detached consumer");
        let Some(env) = self.environments.get_mut(&attachment.environment) else {
            return Ok(());
        };
        let destroy = match env.handlers.get_mut(&attachment.operation) {
            Some(handler) => {
                handler.detach(handle);
                !handler.has_consumers()
            }
            None => false,
        };
        if destroy {
            destroy_handler(env, &mut self.pending, &attachment.environment, &attachment.operation);
        }
        Ok(())
    }

    /// Data of the handler a consumer is attached to, once a response was applied.
    pub fn current_data(
        &self,
        handle: ConsumerHandle,
    ) -> Result<Option<ObjectView<'_>>, AttachError> {
        let (env, handler) = self.handler(handle)?;
        Ok(handler
            .graph()
            .map(|graph| env.store.view(graph, &handler.operation().root)))
    }

    pub fn current_error(&self, handle: ConsumerHandle) -> Result<&[graphql::Error], AttachError> {
        Ok(self.handler(handle)?.1.errors())
    }

    pub fn is_loading(&self, handle: ConsumerHandle) -> Result<bool, AttachError> {
        Ok(self.handler(handle)?.1.is_loading())
    }

    pub fn state(&self, handle: ConsumerHandle) -> Result<HandlerState, AttachError> {
        Ok(self.handler(handle)?.1.state())
    }

    /// Fetches the operation of a consumer again, with the same variables.
    pub fn refetch(&mut self, handle: ConsumerHandle) -> Result<(), AttachError> {
        self.restart(handle, None)
    }

    /// Fetches the operation of a consumer again with new variables.
    pub fn set_variables(
        &mut self,
        handle: ConsumerHandle,
        variables: Object,
    ) -> Result<(), AttachError> {
        self.restart(handle, Some(variables))
    }

    /// Fetches queued since the last call.
    pub fn take_fetches(&mut self) -> Vec<Fetch> {
        self.outbox.drain(..).collect()
    }

    /// Whether some fetch is still waiting for its outcome.
    pub fn has_pending_fetches(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Whether the outcome of a fetch is still expected.
    pub fn is_pending(&self, fetch: Uuid) -> bool {
        self.pending.contains_key(&fetch)
    }

    /// Applies a response of a fetch.
    ///
    /// A query or mutation is over with its response. A subscription goes on until
    /// [`Runtime::on_complete`].
    pub fn on_response(&mut self, fetch: Uuid, response: graphql::Response) {
        let Some(pending) = self.pending_fetch(fetch) else {
            return;
        };
        let finished = !pending.kind.is_streaming();
        if finished {
            self.pending.remove(&fetch);
        }
        let Some(env) = self.environments.get_mut(&pending.environment) else {
            return;
        };
        let span = handler_span(&pending.environment, &pending.operation);
        let guard = span.enter();
        let Environment {
            compilation,
            store,
            handlers,
        } = env;
        let Some(handler) = handlers.get_mut(&pending.operation) else {
            return;
        };
        let updated = handler.on_response(pending.sequence, response, finished, store, compilation);
        if !updated.is_empty() {
            for other in handlers.others_mut(&pending.operation) {
                other.on_nodes_updated(&updated);
            }
        }
        drop(guard);
        self.reap_dropped(&pending.environment);
    }

    /// Fails a fetch whose transport gave up.
    pub fn on_transport_error(&mut self, fetch: Uuid, error: FetchError) {
        let Some(pending) = self.pending.remove(&fetch) else {
            tracing::warn!(%fetch, "discarding the error of an unknown fetch");
            return;
        };
        let span = handler_span(&pending.environment, &pending.operation);
        let guard = span.enter();
        if let Some(handler) = self.handler_mut(&pending.environment, &pending.operation) {
            handler.on_failure(pending.sequence, error);
        }
        drop(guard);
        self.reap_dropped(&pending.environment);
    }

    /// Ends a subscription stream.
    pub fn on_complete(&mut self, fetch: Uuid) {
        let Some(pending) = self.pending.remove(&fetch) else {
            return;
        };
        let span = handler_span(&pending.environment, &pending.operation);
        let guard = span.enter();
        if let Some(handler) = self.handler_mut(&pending.environment, &pending.operation) {
            handler.on_complete(pending.sequence);
        }
        drop(guard);
        self.reap_dropped(&pending.environment);
    }

    fn pending_fetch(&self, fetch: Uuid) -> Option<PendingFetch> {
        let pending = self.pending.get(&fetch).cloned();
        if pending.is_none() {
            // the handler was destroyed, or the fetch is not ours
            tracing::warn!(%fetch, "discarding the response of an unknown fetch");
        }
        pending
    }

    fn restart(
        &mut self,
        handle: ConsumerHandle,
        variables: Option<Object>,
    ) -> Result<(), AttachError> {
        let attachment = self
            .attachments
            .get(&handle)
            .cloned()
            .ok_or(AttachError::UnknownHandle)?;
        let env = self
            .environments
            .get_mut(&attachment.environment)
            .ok_or_else(|| AttachError::UnknownEnvironment(attachment.environment.clone()))?;
        let handler = env
            .handlers
            .get_mut(&attachment.operation)
            .ok_or(AttachError::UnknownHandle)?;
        if let Some(variables) = variables {
            let variables = handler.operation().coerce_variables(
                &variables,
                &env.compilation.registry,
                &env.compilation.scalars,
            )?;
            handler.set_variables(variables);
        }
        let span = handler_span(&attachment.environment, &attachment.operation);
        let guard = span.enter();
        let (sequence, request) = handler.start_fetch();
        self.outbox.push_back(queue_fetch(
            &mut self.pending,
            &attachment.environment,
            handler,
            sequence,
            request,
        ));
        drop(guard);
        self.reap_dropped(&attachment.environment);
        Ok(())
    }

    fn handler(&self, handle: ConsumerHandle) -> Result<(&Environment, &QueryHandler), AttachError> {
        let attachment = self
            .attachments
            .get(&handle)
            .ok_or(AttachError::UnknownHandle)?;
        let env = self
            .environments
            .get(&attachment.environment)
            .ok_or_else(|| AttachError::UnknownEnvironment(attachment.environment.clone()))?;
        let handler = env
            .handlers
            .get(&attachment.operation)
            .ok_or(AttachError::UnknownHandle)?;
        Ok((env, handler))
    }

    fn handler_mut(&mut self, environment: &str, operation: &str) -> Option<&mut QueryHandler> {
        self.environments
            .get_mut(environment)?
            .handlers
            .get_mut(operation)
    }

    /// Detaches the consumers whose receiver was dropped.
    fn reap_dropped(&mut self, environment: &str) {
        let dropped = match self.environments.get_mut(environment) {
            Some(env) => env
                .handlers
                .iter_mut()
                .flat_map(QueryHandler::take_dropped)
                .collect::<Vec<_>>(),
            None => return,
        };
        for handle in dropped {
            let Some(attachment) = self.attachments.remove(&handle) else {
                continue;
            };
            tracing::debug!(consumer = %handle, "consumer went away");
            let Some(env) = self.environments.get_mut(&attachment.environment) else {
                continue;
            };
            let idle = env
                .handlers
                .get(&attachment.operation)
                .map(|handler| !handler.has_consumers())
                .unwrap_or(false);
            if idle {
                destroy_handler(env, &mut self.pending, &attachment.environment, &attachment.operation);
            }
        }
    }
}

fn handler_span(environment: &str, operation: &str) -> tracing::Span {
    tracing::debug_span!("handler", environment = %environment, operation = %operation)
}

fn queue_fetch(
    pending: &mut HashMap<Uuid, PendingFetch>,
    environment: &str,
    handler: &QueryHandler,
    sequence: Sequence,
    request: graphql::Request,
) -> Fetch {
    let id = Uuid::new_v4();
    let kind = handler.operation().kind;
    let operation = handler.operation().name.clone();
    if kind.is_streaming() {
        // a new subscription replaces the stream of the previous one
        pending.retain(|_, fetch| !fetch.is_for(environment, &operation));
    }
    pending.insert(
        id,
        PendingFetch {
            environment: environment.to_string(),
            operation: operation.clone(),
            sequence,
            kind,
        },
    );
    Fetch {
        id,
        environment: environment.to_string(),
        operation,
        kind,
        request,
    }
}

/// Removes a handler, releasing its data and forgetting its fetches in flight.
fn destroy_handler(
    env: &mut Environment,
    pending: &mut HashMap<Uuid, PendingFetch>,
    environment: &str,
    operation: &str,
) {
    let Some(handler) = env.handlers.remove(operation) else {
        return;
    };
    pending.retain(|_, fetch| !fetch.is_for(environment, operation));
    let evicted = handler.destroy(&mut env.store);
    if !evicted.is_empty() {
        tracing::debug!(evicted = evicted.len(), "released handler data");
    }
}
