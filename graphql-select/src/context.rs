//! The client session queries are created from.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::compiler::QueryDefinition;
use crate::configuration::Configuration;
use crate::entity::IdentityMap;
use crate::error::ConfigurationError;
use crate::executor::QueryExecutor;
use crate::query::CollectionQuery;
use crate::query::ItemQuery;
use crate::schema::GraphType;
use crate::schema::Schema;
use crate::transport::HttpTransport;
use crate::transport::Transport;

/// Owns the schema, the transport and the identity map shared by every query
/// created from it. Cheap to clone.
#[derive(Clone)]
pub struct GraphContext {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    schema: Schema,
    // `BoxCloneService` is not `Sync`; each execution clones it out.
    transport: Mutex<Transport>,
    identity_map: IdentityMap,
    configuration: Configuration,
}

impl fmt::Debug for GraphContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphContext")
            .field("configuration", &self.inner.configuration)
            .field("identity_map", &self.inner.identity_map)
            .finish()
    }
}

#[buildstructor::buildstructor]
impl GraphContext {
    #[builder]
    pub fn new(
        schema: Schema,
        transport: Transport,
        configuration: Option<Configuration>,
        identity_map: Option<IdentityMap>,
    ) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                schema,
                transport: Mutex::new(transport),
                identity_map: identity_map.unwrap_or_default(),
                configuration: configuration.unwrap_or_default(),
            }),
        }
    }

    /// A context posting to the configured HTTP endpoint.
    pub fn from_configuration(
        schema: Schema,
        configuration: Configuration,
    ) -> Result<Self, ConfigurationError> {
        let transport = HttpTransport::from_configuration(&configuration)?.boxed();
        tracing::debug!(
            "created a context for {}",
            configuration.require_endpoint()?
        );
        Ok(Self::new(schema, transport, Some(configuration), None))
    }

    pub fn schema(&self) -> &Schema {
        &self.inner.schema
    }

    /// The identity map every entity deserialized through this context lands in.
    pub fn identity_map(&self) -> &IdentityMap {
        &self.inner.identity_map
    }

    pub fn configuration(&self) -> &Configuration {
        &self.inner.configuration
    }

    /// A query for a root field returning a single `T`.
    pub fn item_query<T: GraphType + 'static>(&self, query_name: &str) -> ItemQuery<T> {
        ItemQuery::new(self.clone(), self.definition(query_name, T::TYPE_NAME))
    }

    /// A query for a root field returning a list of `T`.
    pub fn collection_query<T: GraphType + 'static>(&self, query_name: &str) -> CollectionQuery<T> {
        CollectionQuery::new(self.clone(), self.definition(query_name, T::TYPE_NAME))
    }

    fn definition(&self, query_name: &str, root_type: &str) -> QueryDefinition {
        QueryDefinition {
            operation: self.inner.configuration.operation,
            query_name: query_name.to_string(),
            root_type: root_type.to_string(),
            ..Default::default()
        }
    }

    pub(crate) fn executor(&self) -> QueryExecutor {
        QueryExecutor {
            transport: self.inner.transport.lock().clone(),
            timeout: self.inner.configuration.timeout,
            identity_map: self.inner.identity_map.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde::Deserialize;
    use test_log::test;
    use tower::service_fn;
    use tower::util::BoxCloneService;
    use url::Url;
    use wiremock::matchers::body_string_contains;
    use wiremock::matchers::method;
    use wiremock::Mock;
    use wiremock::MockServer;
    use wiremock::ResponseTemplate;

    use super::*;
    use crate::compiler::OperationKind;
    use crate::entity::Entity;
    use crate::entity::EntityRef;
    use crate::entity::Id;
    use crate::error::QueryError;
    use crate::error::TransportError;
    use crate::schema::ObjectType;

    #[derive(Debug, Deserialize)]
    struct Person {
        id: Id,
        name: String,
    }

    impl GraphType for Person {
        const TYPE_NAME: &'static str = "Person";
    }

    impl Entity for Person {
        fn id(&self) -> &Id {
            &self.id
        }
    }

    fn schema() -> Schema {
        Schema::new()
            .object(
                "Person",
                ObjectType::new().field("id", "ID!").field("name", "String"),
            )
            .query_argument("person", "id", "ID!")
            .query_argument("renamePerson", "id", "ID!")
            .query_argument("renamePerson", "name", "String!")
    }

    fn echo() -> Transport {
        BoxCloneService::new(service_fn(|_body: String| async {
            Ok::<_, TransportError>(r#"{"data":{"result":{"id":"1","name":"Ada"}}}"#.to_string())
        }))
    }

    #[test]
    fn queries_take_their_root_type_and_operation() {
        let context = GraphContext::builder()
            .schema(schema())
            .transport(echo())
            .configuration(
                Configuration::builder()
                    .operation(OperationKind::Mutation)
                    .build(),
            )
            .build();
        let query = context
            .item_query::<Person>("renamePerson")
            .argument("id", "1")
            .argument("name", "Ada");
        assert_eq!(query.definition().root_type, "Person");
        assert_eq!(
            query.document().unwrap().query,
            "mutation ($id: ID!, $name: String!) { result: renamePerson(id: $id, name: $name) { id name } }"
        );
    }

    #[test(tokio::test)]
    async fn entities_land_in_the_shared_identity_map() {
        let identity_map = IdentityMap::new();
        let context = GraphContext::builder()
            .schema(schema())
            .transport(echo())
            .identity_map(identity_map.clone())
            .build();
        let person = context
            .item_query::<EntityRef<Person>>("person")
            .argument("id", "1")
            .execute()
            .await
            .unwrap();
        assert_eq!(person.read().name, "Ada");
        assert!(identity_map
            .get::<Person>("1")
            .is_some_and(|cached| cached.ptr_eq(&person)));
    }

    #[test(tokio::test)]
    async fn configured_timeout_applies() {
        let slow = BoxCloneService::new(service_fn(|_body: String| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, TransportError>(String::new())
        }));
        let context = GraphContext::builder()
            .schema(schema())
            .transport(slow)
            .configuration(
                Configuration::builder()
                    .timeout(Duration::from_millis(20))
                    .build(),
            )
            .build();
        let error = context
            .item_query::<Person>("person")
            .argument("id", "1")
            .execute()
            .await
            .unwrap_err();
        assert_eq!(error, QueryError::Cancelled);
    }

    #[test(tokio::test)]
    async fn from_configuration_posts_over_http() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_string_contains("result: person(id: $id)"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(r#"{"data":{"result":{"id":"1","name":"Ada"}}}"#),
            )
            .expect(1)
            .mount(&server)
            .await;

        let configuration = Configuration::builder()
            .endpoint(Url::parse(&server.uri()).unwrap())
            .build();
        let context = GraphContext::from_configuration(schema(), configuration).unwrap();
        let person = context
            .item_query::<Person>("person")
            .argument("id", "1")
            .execute()
            .await
            .unwrap();
        assert_eq!(person.name, "Ada");

        assert!(matches!(
            GraphContext::from_configuration(schema(), Configuration::default()),
            Err(ConfigurationError::MissingEndpoint)
        ));
    }
}
