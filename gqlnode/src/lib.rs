//! Compiles GraphQL schemas and operations, and keeps the data they fetch in a normalized,
//! reference counted object cache.
//!
//! [`Compiler`] resolves a schema and its operation documents into a [`Compilation`]. A
//! [`Runtime`] attaches consumers to the operations of one or more compilations, stores their
//! responses in an [`ObjectGraphStore`] per environment, and queues the fetches a
//! [`services::Driver`] sends through the application's [`services::Transport`].

#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::panic))]
#![warn(unreachable_pub)]

pub mod json_ext;

pub mod cache;
mod compiler;
pub mod configuration;
pub mod error;
pub mod graphql;
pub mod handler;
mod runtime;
pub mod scalars;
pub mod services;
pub mod spec;

pub use cache::ObjectGraphStore;
pub use compiler::Compilation;
pub use compiler::Compiler;
pub use configuration::Configuration;
pub use runtime::Fetch;
pub use runtime::Runtime;
pub use spec::OperationDefinition;
pub use spec::QueriedField;
pub use spec::TypeRegistry;
