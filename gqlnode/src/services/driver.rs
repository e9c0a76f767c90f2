use std::collections::HashMap;
use std::sync::Arc;

use futures::future::AbortHandle;
use futures::stream;
use futures::stream::Abortable;
use futures::stream::BoxStream;
use futures::stream::SelectAll;
use futures::StreamExt;
use uuid::Uuid;

use super::Transport;
use crate::error::FetchError;
use crate::graphql;
use crate::runtime::Fetch;
use crate::runtime::Runtime;

enum Outcome {
    Response(graphql::Response),
    Failed(FetchError),
    Complete,
}

/// Runs the fetches of a [`Runtime`] against a [`Transport`].
///
/// Fetches run concurrently, and their outcomes are fed back to the runtime as they arrive,
/// in whatever order that is. A fetch the runtime stopped waiting for, because its handler was
/// destroyed or its subscription restarted, is dropped along with its response stream.
pub struct Driver<T> {
    runtime: Runtime,
    transport: Arc<T>,
    in_flight: SelectAll<Abortable<BoxStream<'static, (Uuid, Outcome)>>>,
    aborts: HashMap<Uuid, AbortHandle>,
}

impl<T> Driver<T>
where
    T: Transport + 'static,
{
    pub fn new(runtime: Runtime, transport: Arc<T>) -> Self {
        Self {
            runtime,
            transport,
            in_flight: SelectAll::new(),
            aborts: HashMap::new(),
        }
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    pub fn runtime_mut(&mut self) -> &mut Runtime {
        &mut self.runtime
    }

    pub fn into_runtime(self) -> Runtime {
        self.runtime
    }

    /// Sends the queued fetches and waits for one outcome.
    ///
    /// Returns false once nothing is in flight anymore.
    pub async fn step(&mut self) -> bool {
        self.abort_forgotten();
        for fetch in self.runtime.take_fetches() {
            let id = fetch.id;
            let (handle, registration) = AbortHandle::new_pair();
            let outcomes = self.start(fetch);
            self.in_flight.push(Abortable::new(outcomes, registration));
            self.aborts.insert(id, handle);
        }
        match self.in_flight.next().await {
            Some((fetch, outcome)) => {
                match outcome {
                    Outcome::Response(response) => self.runtime.on_response(fetch, response),
                    Outcome::Failed(error) => self.runtime.on_transport_error(fetch, error),
                    Outcome::Complete => self.runtime.on_complete(fetch),
                }
                if !self.runtime.is_pending(fetch) {
                    if let Some(handle) = self.aborts.remove(&fetch) {
                        handle.abort();
                    }
                }
                true
            }
            None => false,
        }
    }

    /// Runs until every fetch, and every subscription, is over.
    pub async fn run_until_idle(&mut self) {
        while self.step().await {}
    }

    /// Stops the fetches whose outcome the runtime does not expect anymore.
    fn abort_forgotten(&mut self) {
        let runtime = &self.runtime;
        self.aborts.retain(|fetch, handle| {
            if runtime.is_pending(*fetch) {
                return true;
            }
            tracing::debug!(%fetch, "dropping forgotten fetch");
            handle.abort();
            false
        });
    }

    fn start(&self, fetch: Fetch) -> BoxStream<'static, (Uuid, Outcome)> {
        let id = fetch.id;
        tracing::debug!(
            fetch = %id,
            environment = %fetch.environment,
            operation = %fetch.operation,
            kind = %fetch.kind,
            "sending fetch"
        );
        if fetch.kind.is_streaming() {
            self.transport
                .subscribe(id, fetch.request)
                .map(move |response| match response {
                    Ok(response) => (id, Outcome::Response(response)),
                    Err(error) => (id, Outcome::Failed(error)),
                })
                .chain(stream::once(async move { (id, Outcome::Complete) }))
                .boxed()
        } else {
            let transport = self.transport.clone();
            stream::once(async move {
                match transport.send(fetch.request).await {
                    Ok(response) => (id, Outcome::Response(response)),
                    Err(error) => (id, Outcome::Failed(error)),
                }
            })
            .boxed()
        }
    }
}
