//! Typed GraphQL queries built from selection expressions.
//!
//! A [`GraphContext`] holds a [`Schema`] and a transport. Queries created from
//! it compile a selection into a single-operation document, post it, and map
//! `data.result` back into client types. Entities are deduplicated through the
//! context's [`IdentityMap`] so every payload for the same `(type, id)` updates
//! one shared instance.

mod json_ext;

/// Query document compilation.
pub mod compiler;

/// Client configuration.
pub mod configuration;

/// The client session.
pub mod context;

/// Identity map, entity references and per-type managers.
pub mod entity;

/// Error types.
pub mod error;

mod executor;

/// Wire envelopes.
pub mod graphql;

mod projector;

/// Typed query descriptors.
pub mod query;

/// Schema metadata.
pub mod schema;

/// Selection expressions and includes.
pub mod selection;

/// Transports.
pub mod transport;

pub use crate::compiler::OperationKind;
pub use crate::compiler::QueryDocument;
pub use crate::configuration::Configuration;
pub use crate::context::GraphContext;
pub use crate::entity::Entity;
pub use crate::entity::EntityManager;
pub use crate::entity::EntityRef;
pub use crate::entity::Id;
pub use crate::entity::IdentityMap;
pub use crate::error::CompileError;
pub use crate::error::ConfigurationError;
pub use crate::error::EntityError;
pub use crate::error::QueryError;
pub use crate::error::QueryExecutionError;
pub use crate::error::TransportError;
pub use crate::json_ext::Object;
pub use crate::json_ext::Path;
pub use crate::json_ext::PathElement;
pub use crate::json_ext::Value;
pub use crate::projector::Mapper;
pub use crate::projector::Projection;
pub use crate::query::CollectionQuery;
pub use crate::query::GraphQuery;
pub use crate::query::ItemQuery;
pub use crate::schema::GraphType;
pub use crate::schema::ObjectType;
pub use crate::schema::Schema;
pub use crate::selection::Expression;
pub use crate::selection::Include;
pub use crate::selection::MethodInclude;
pub use crate::transport::HttpTransport;
pub use crate::transport::Transport;
