//! Typed query descriptors.
//!
//! A [`GraphQuery`] names a root field, its arguments and what to select. It
//! compiles to a [`QueryDocument`] and executes against the transport of the
//! [`GraphContext`] it was created from.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use serde::de::DeserializeOwned;

use crate::compiler::QueryCompiler;
use crate::compiler::QueryDefinition;
use crate::compiler::QueryDocument;
use crate::context::GraphContext;
use crate::error::CompileError;
use crate::error::QueryError;
use crate::json_ext::Value;
use crate::projector::identity;
use crate::projector::Mapper;
use crate::projector::Projection;
use crate::selection::Expression;
use crate::selection::Include;
use crate::selection::Selector;

/// Marks a query whose `result` is a single value.
#[derive(Debug, Clone, Copy)]
pub struct Item;

/// Marks a query whose `result` is a list.
#[derive(Debug, Clone, Copy)]
pub struct Collection;

/// A query for values of type `T`, read from the wire as `S`.
pub struct GraphQuery<Shape, T, S = T> {
    context: GraphContext,
    definition: QueryDefinition,
    mapper: Mapper<S, T>,
    shape: PhantomData<Shape>,
}

pub type ItemQuery<T, S = T> = GraphQuery<Item, T, S>;

pub type CollectionQuery<T, S = T> = GraphQuery<Collection, T, S>;

impl<Shape, T, S> Clone for GraphQuery<Shape, T, S> {
    fn clone(&self) -> Self {
        Self {
            context: self.context.clone(),
            definition: self.definition.clone(),
            mapper: self.mapper.clone(),
            shape: PhantomData,
        }
    }
}

impl<Shape, T, S> fmt::Debug for GraphQuery<Shape, T, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphQuery")
            .field("definition", &self.definition)
            .finish()
    }
}

impl<Shape, T: 'static> GraphQuery<Shape, T, T> {
    pub(crate) fn new(context: GraphContext, definition: QueryDefinition) -> Self {
        Self {
            context,
            definition,
            mapper: identity(),
            shape: PhantomData,
        }
    }
}

impl<Shape, T, S> GraphQuery<Shape, T, S> {
    /// Sets an argument of the root field. Null arguments are not sent.
    pub fn argument(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.definition.arguments.insert(name, value.into());
        self
    }

    /// Requests extra nested fields, optionally through argument-taking methods.
    pub fn include(mut self, include: impl Into<Include>) -> Self {
        self.definition.includes.push(include.into());
        self
    }

    /// Makes the default selection recurse into object-typed fields.
    pub fn include_all(mut self) -> Self {
        self.definition.include_all = true;
        self
    }

    /// Narrows the selection to `expression`, whose value has type `U`.
    ///
    /// The selected values are pulled out of each result node before
    /// deserialization: a member chain yields its value, a construction a
    /// sequence (a tuple) and an initializer an object keyed by binding. Any
    /// earlier mapping is discarded since it applied to the old shape.
    pub fn select<U: 'static>(
        self,
        expression: Expression,
    ) -> Result<GraphQuery<Shape, U, U>, CompileError> {
        let selector = Selector::from_expression(&expression)?;
        let mut definition = self.definition;
        definition.selector = Some(selector);
        Ok(GraphQuery {
            context: self.context,
            definition,
            mapper: identity(),
            shape: PhantomData,
        })
    }

    /// Maps each projected value into a richer client type.
    pub fn map<U>(self, f: impl Fn(T) -> U + Send + Sync + 'static) -> GraphQuery<Shape, U, S>
    where
        S: 'static,
        T: 'static,
    {
        let mapper = self.mapper;
        GraphQuery {
            context: self.context,
            definition: self.definition,
            mapper: Arc::new(move |source| f(mapper(source))),
            shape: PhantomData,
        }
    }

    pub fn definition(&self) -> &QueryDefinition {
        &self.definition
    }

    /// Compiles the query without sending it.
    pub fn document(&self) -> Result<QueryDocument, CompileError> {
        QueryCompiler::new(self.context.schema()).compile(&self.definition)
    }
}

impl<T, S: DeserializeOwned> GraphQuery<Item, T, S> {
    /// Sends the query and maps `data.result` to a single value.
    pub async fn execute(self) -> Result<T, QueryError> {
        let document = self.document()?;
        let GraphQuery {
            context, mapper, ..
        } = self;
        context
            .executor()
            .execute_item(&document, &mapper)
            .await
    }
}

impl<T, S: DeserializeOwned> GraphQuery<Collection, T, S> {
    /// Sends the query and lazily maps each element of `data.result`.
    pub async fn execute(self) -> Result<Projection<S, T>, QueryError> {
        let document = self.document()?;
        let GraphQuery {
            context, mapper, ..
        } = self;
        context
            .executor()
            .execute_collection(&document, mapper)
            .await
    }
}

#[cfg(test)]
mod tests {
    use insta::assert_snapshot;
    use tower::service_fn;
    use tower::util::BoxCloneService;

    use super::*;
    use crate::error::TransportError;
    use crate::schema::GraphType;
    use crate::schema::ObjectType;
    use crate::schema::Schema;
    use crate::selection::MethodInclude;

    #[derive(Debug, serde::Deserialize)]
    struct User {
        name: String,
    }

    impl GraphType for User {
        const TYPE_NAME: &'static str = "User";
    }

    fn session(response: &'static str) -> GraphContext {
        let schema = Schema::new()
            .object(
                "User",
                ObjectType::new()
                    .field("id", "ID!")
                    .field("name", "String")
                    .field("posts", "[Post]")
                    .method("posts", [("first", "Int")], "[Post]"),
            )
            .object("Post", ObjectType::new().field("title", "String"))
            .query_argument("getUser", "id", "ID!")
            .query_argument("users", "first", "Int");
        let transport = BoxCloneService::new(service_fn(move |_body: String| async move {
            Ok::<_, TransportError>(response.to_string())
        }));
        GraphContext::builder()
            .schema(schema)
            .transport(transport)
            .build()
    }

    #[test]
    fn builds_documents() {
        let context = session("{}");
        let query = context
            .item_query::<User>("getUser")
            .argument("id", "42")
            .include(
                Include::path("posts").with_method(MethodInclude::new("posts").argument("first", 2)),
            );
        assert_snapshot!(query.document().unwrap().query, @"query ($id: ID!, $first1: Int) { result: getUser(id: $id) { id name posts(first: $first1) { title } } }");

        let query = context
            .collection_query::<User>("users")
            .argument("first", Value::Null)
            .include_all();
        assert_snapshot!(query.document().unwrap().query, @"query { result: users { id name posts { title } } }");
    }

    #[test]
    fn select_changes_the_result_type() {
        let context = session("{}");
        let query = context
            .item_query::<User>("getUser")
            .argument("id", "42")
            .select::<String>(Expression::parameter().member("name"))
            .unwrap();
        assert_eq!(query.definition().root_type, "User");
        assert_snapshot!(query.document().unwrap().query, @"query ($id: ID!) { result: getUser(id: $id) { name } }");

        assert!(context
            .item_query::<User>("getUser")
            .select::<String>(Expression::constant("x"))
            .is_err());
    }

    #[tokio::test]
    async fn executes_and_maps() {
        let context = session(r#"{"data":{"result":{"name":"Ada"}}}"#);
        let greeting = context
            .item_query::<User>("getUser")
            .argument("id", "42")
            .map(|user| format!("hello {}", user.name))
            .map(|greeting| greeting.len())
            .execute()
            .await
            .unwrap();
        assert_eq!(greeting, "hello Ada".len());

        let context = session(r#"{"data":{"result":[{"name":"Ada"},{"name":"Grace"}]}}"#);
        let names = context
            .collection_query::<User>("users")
            .select::<String>(Expression::parameter().member("name"))
            .unwrap()
            .execute()
            .await
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        assert_eq!(names, ["Ada", "Grace"]);
    }

    #[tokio::test]
    async fn projections_deserialize_into_their_own_types() {
        #[derive(Debug, PartialEq, serde::Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Card {
            display_name: String,
            first_post: Vec<String>,
        }

        let context = session(
            r#"{"data":{"result":{"id":"42","name":"Ada","posts":[{"title":"Notes"}]}}}"#,
        );
        let (id, name) = context
            .item_query::<User>("getUser")
            .argument("id", "42")
            .select::<(String, String)>(Expression::construct(vec![
                Expression::parameter().member("id"),
                Expression::parameter().member("name"),
            ]))
            .unwrap()
            .execute()
            .await
            .unwrap();
        assert_eq!((id.as_str(), name.as_str()), ("42", "Ada"));

        let context = session(
            r#"{"data":{"result":{"displayName":"Ada","posts":[{"title":"Notes"}]}}}"#,
        );
        let card = context
            .item_query::<User>("getUser")
            .argument("id", "42")
            .select::<Card>(Expression::init([
                ("displayName", Expression::parameter().member("name")),
                ("firstPost", Expression::parameter().member("posts").member("title")),
            ]))
            .unwrap()
            .map(|card| card.first_post.len())
            .execute()
            .await
            .unwrap();
        assert_eq!(card, 1);
    }

    #[tokio::test]
    async fn compile_errors_surface_before_sending() {
        let context = session(r#"{"data":{"result":null}}"#);
        let error = context
            .item_query::<User>("getUser")
            .argument("locale", "fr")
            .execute()
            .await
            .unwrap_err();
        assert!(matches!(
            error,
            QueryError::Compilation(CompileError::UnknownArgumentType { .. })
        ));

        let users = context
            .collection_query::<User>("users")
            .execute()
            .await
            .unwrap();
        assert_eq!(users.len(), 0);
    }
}
