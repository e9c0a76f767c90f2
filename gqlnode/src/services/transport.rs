use async_trait::async_trait;
use futures::stream;
use futures::stream::BoxStream;
use futures::StreamExt;
use uuid::Uuid;

use crate::error::FetchError;
use crate::graphql;

/// Responses of a subscription, in the order the server sent them.
pub type ResponseStream = BoxStream<'static, Result<graphql::Response, FetchError>>;

/// Sends operations to a GraphQL server.
///
/// Implemented by the embedding application. The request carries the canonical text of the
/// operation and its coerced variables.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: graphql::Request) -> Result<graphql::Response, FetchError>;

    /// Starts a subscription. `id` is unique per subscription, and can be used as the
    /// `graphql-transport-ws` operation id.
    ///
    /// The stream ends when the subscription is over.
    fn subscribe(&self, id: Uuid, request: graphql::Request) -> ResponseStream {
        let _ = (id, request);
        stream::once(async {
            Err(FetchError::Subscription {
                reason: "the transport does not support subscriptions".to_string(),
            })
        })
        .boxed()
    }
}
