//! Message shapes of the `graphql-transport-ws` protocol.
//!
//! Reference: <https://github.com/enisdenjo/graphql-ws/blob/0c0eb499c3a0278c6d9cc799064f22c5d24d2f60/PROTOCOL.md>
//!
//! The socket itself belongs to the embedding application's transport. These types only give it
//! a shared vocabulary and a way to turn server messages into [`graphql::Response`]s for the
//! subscription stream.

use serde::Deserialize;
use serde::Serialize;
use serde_json_bytes::Value;
use uuid::Uuid;

use crate::graphql;

/// The WebSocket subprotocol name.
pub const GRAPHQL_TRANSPORT_WS_SUBPROTOCOL: &str = "graphql-transport-ws";

/// WebSocket messages sent from the client.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// A new connection
    ConnectionInit {
        /// Optional init payload from the client
        #[serde(skip_serializing_if = "Option::is_none", default)]
        payload: Option<Value>,
    },
    /// The start of a subscription
    Subscribe {
        /// Message ID
        id: String,
        /// The GraphQL request
        payload: graphql::Request,
    },
    /// The end of a subscription
    Complete {
        /// Message ID
        id: String,
    },
    /// Reference: <https://github.com/enisdenjo/graphql-ws/blob/0c0eb499c3a0278c6d9cc799064f22c5d24d2f60/PROTOCOL.md#ping>
    Ping {
        #[serde(skip_serializing_if = "Option::is_none", default)]
        payload: Option<Value>,
    },
    /// The response to the Ping message.
    Pong {
        #[serde(skip_serializing_if = "Option::is_none", default)]
        payload: Option<Value>,
    },
}

impl ClientMessage {
    /// Starts a subscription. The id is the one of the fetch, as handed to
    /// [`crate::services::Transport::subscribe`].
    pub fn subscribe(id: Uuid, payload: graphql::Request) -> Self {
        ClientMessage::Subscribe {
            id: id.to_string(),
            payload,
        }
    }

    /// Stops the subscription started with the given id.
    pub fn complete(id: Uuid) -> Self {
        ClientMessage::Complete { id: id.to_string() }
    }

    /// The operation id this message refers to, if any.
    pub fn id(&self) -> Option<&str> {
        match self {
            ClientMessage::Subscribe { id, .. } | ClientMessage::Complete { id } => Some(id),
            ClientMessage::ConnectionInit { .. }
            | ClientMessage::Ping { .. }
            | ClientMessage::Pong { .. } => None,
        }
    }
}

/// WebSocket messages received from the server.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    ConnectionAck {
        #[serde(skip_serializing_if = "Option::is_none", default)]
        payload: Option<Value>,
    },
    Next {
        id: String,
        payload: graphql::Response,
    },
    Error {
        id: String,
        payload: ServerError,
    },
    Complete {
        id: String,
    },
    Ping {
        #[serde(skip_serializing_if = "Option::is_none", default)]
        payload: Option<Value>,
    },
    Pong {
        #[serde(skip_serializing_if = "Option::is_none", default)]
        payload: Option<Value>,
    },
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum ServerError {
    Error(graphql::Error),
    Errors(Vec<graphql::Error>),
}

impl From<ServerError> for Vec<graphql::Error> {
    fn from(value: ServerError) -> Self {
        match value {
            ServerError::Error(e) => vec![e],
            ServerError::Errors(e) => e,
        }
    }
}

impl ServerMessage {
    /// Converts a message into the response it carries for its subscription, plus whether the
    /// subscription is over.
    pub fn into_graphql_response(self) -> (Option<graphql::Response>, bool) {
        match self {
            ServerMessage::Next { id: _, payload } => (Some(payload), false),
            ServerMessage::Error { id: _, payload } => (
                Some(graphql::Response::builder().errors(payload.into()).build()),
                true,
            ),
            ServerMessage::Complete { .. } => (None, true),
            ServerMessage::ConnectionAck { .. }
            | ServerMessage::Ping { .. }
            | ServerMessage::Pong { .. } => (None, false),
        }
    }

    /// The operation id this message refers to, if any.
    pub fn id(&self) -> Option<&str> {
        match self {
            ServerMessage::ConnectionAck { .. }
            | ServerMessage::Ping { .. }
            | ServerMessage::Pong { .. } => None,
            ServerMessage::Next { id, .. }
            | ServerMessage::Error { id, .. }
            | ServerMessage::Complete { id } => Some(id),
        }
    }
}
