//! Sends compiled documents and maps the responses.

use std::mem;
use std::time::Duration;

use serde::de::DeserializeOwned;
use tower::ServiceExt;

use crate::compiler::QueryDocument;
use crate::entity::IdentityMap;
use crate::error::QueryError;
use crate::graphql::extract_result;
use crate::json_ext::Value;
use crate::projector::project_collection;
use crate::projector::project_item;
use crate::projector::Mapper;
use crate::projector::Projection;
use crate::transport::Transport;

/// Everything one execution needs, owned so the returned futures are `Send`.
#[derive(Clone)]
pub(crate) struct QueryExecutor {
    pub(crate) transport: Transport,
    pub(crate) timeout: Option<Duration>,
    pub(crate) identity_map: IdentityMap,
}

impl QueryExecutor {
    /// Performs the round trip and returns the `data.result` node.
    ///
    /// The transport call is the only suspension point, and the only thing the
    /// timeout applies to.
    pub(crate) async fn send(self, document: &QueryDocument) -> Result<Value, QueryError> {
        tracing::debug!("executing {}", document.raw);
        let call = self.transport.oneshot(document.raw.clone());
        let response = match self.timeout {
            Some(timeout) => tokio::time::timeout(timeout, call).await.map_err(|_| {
                tracing::debug!("query timed out after {timeout:?}");
                QueryError::Cancelled
            })?,
            None => call.await,
        }
        .map_err(|error| QueryError::from_transport(error, &document.raw))?;
        tracing::trace!("received {response}");

        Ok(extract_result(&document.query, &response)?)
    }

    pub(crate) async fn execute_item<S, T>(
        self,
        document: &QueryDocument,
        mapper: &Mapper<S, T>,
    ) -> Result<T, QueryError>
    where
        S: DeserializeOwned,
    {
        let identity_map = self.identity_map.clone();
        let mut node = self.send(document).await?;
        if let Some(shape) = &document.shape {
            node = shape.reshape(node);
        }
        project_item(&identity_map, node, mapper)
    }

    pub(crate) async fn execute_collection<S, T>(
        self,
        document: &QueryDocument,
        mapper: Mapper<S, T>,
    ) -> Result<Projection<S, T>, QueryError>
    where
        S: DeserializeOwned,
    {
        let identity_map = self.identity_map.clone();
        let mut node = self.send(document).await?;
        if let (Some(shape), Value::Array(items)) = (&document.shape, &mut node) {
            for item in items.iter_mut() {
                *item = shape.reshape(mem::replace(item, Value::Null));
            }
        }
        project_collection(&identity_map, node, mapper)
    }
}
