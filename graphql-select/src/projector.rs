//! Turns `data.result` nodes into typed values.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::vec;

use serde::de::DeserializeOwned;

use crate::entity::with_identity_map;
use crate::entity::IdentityMap;
use crate::error::QueryError;
use crate::json_ext::value_kind;
use crate::json_ext::Value;

/// Maps a projected source value into the client-facing type.
pub type Mapper<S, T> = Arc<dyn Fn(S) -> T + Send + Sync>;

pub(crate) fn identity<T: 'static>() -> Mapper<T, T> {
    Arc::new(|value: T| value)
}

/// Deserializes one node, routing entities through `map`.
///
/// An entity failure is reported as [`QueryError::Entity`] rather than as the
/// generic deserialization error it surfaces as inside serde.
pub(crate) fn project<S: DeserializeOwned>(map: &IdentityMap, node: Value) -> Result<S, QueryError> {
    let (result, entity_error) =
        with_identity_map(map, || serde_json_bytes::from_value::<S>(node));
    if let Some(error) = entity_error {
        return Err(QueryError::Entity(error));
    }
    result.map_err(|error| QueryError::Deserialization {
        reason: error.to_string(),
    })
}

pub(crate) fn project_item<S, T>(
    map: &IdentityMap,
    node: Value,
    mapper: &Mapper<S, T>,
) -> Result<T, QueryError>
where
    S: DeserializeOwned,
{
    project::<S>(map, node).map(|source| mapper(source))
}

/// Starts a lazy projection of a list node. A `null` list is empty.
pub(crate) fn project_collection<S, T>(
    map: &IdentityMap,
    node: Value,
    mapper: Mapper<S, T>,
) -> Result<Projection<S, T>, QueryError> {
    let nodes = match node {
        Value::Array(nodes) => nodes,
        Value::Null => Vec::new(),
        other => {
            return Err(QueryError::Deserialization {
                reason: format!("expected a list result, found {}", value_kind(&other)),
            })
        }
    };
    Ok(Projection {
        nodes: nodes.into_iter(),
        map: map.clone(),
        mapper,
        source: PhantomData,
    })
}

/// The items of a collection result, deserialized one at a time as they are
/// pulled. Entities are merged into the identity map on the way out.
pub struct Projection<S, T> {
    nodes: vec::IntoIter<Value>,
    map: IdentityMap,
    mapper: Mapper<S, T>,
    source: PhantomData<fn() -> S>,
}

impl<S, T> fmt::Debug for Projection<S, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Projection")
            .field("remaining", &self.nodes.len())
            .finish()
    }
}

impl<S: DeserializeOwned, T> Iterator for Projection<S, T> {
    type Item = Result<T, QueryError>;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.nodes.next()?;
        Some(project_item(&self.map, node, &self.mapper))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.nodes.size_hint()
    }
}

impl<S: DeserializeOwned, T> ExactSizeIterator for Projection<S, T> {}
