use std::collections::VecDeque;
use std::sync::Arc;

use graphql_select::Entity;
use graphql_select::EntityManager;
use graphql_select::EntityRef;
use graphql_select::Expression;
use graphql_select::GraphContext;
use graphql_select::GraphType;
use graphql_select::Id;
use graphql_select::Include;
use graphql_select::MethodInclude;
use graphql_select::ObjectType;
use graphql_select::QueryError;
use graphql_select::Schema;
use graphql_select::Transport;
use graphql_select::TransportError;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use serde::Deserialize;
use serde_json::json;
use test_log::test;
use tower::service_fn;
use tower::util::BoxCloneService;

#[derive(Debug, Deserialize)]
struct Person {
    id: Id,
    name: String,
    email: Option<String>,
}

impl GraphType for Person {
    const TYPE_NAME: &'static str = "Person";
}

impl Entity for Person {
    fn id(&self) -> &Id {
        &self.id
    }
}

#[derive(Debug, Deserialize)]
struct User {
    name: String,
    #[serde(default)]
    posts: Vec<Post>,
}

impl GraphType for User {
    const TYPE_NAME: &'static str = "User";
}

#[derive(Debug, Deserialize)]
struct Post {
    title: String,
}

fn schema() -> Schema {
    Schema::new()
        .object(
            "User",
            ObjectType::new()
                .field("id", "ID!")
                .field("name", "String")
                .field("posts", "[Post]")
                .method("posts", [("first", "Int")], "[Post]"),
        )
        .object("Post", ObjectType::new().field("title", "String"))
        .object(
            "Person",
            ObjectType::new()
                .field("id", "ID!")
                .field("name", "String")
                .field("email", "String"),
        )
        .query_argument("getUser", "id", "ID!")
        .query_argument("person", "id", "ID!")
}

/// Answers each request with the next canned response and records the bodies.
struct Recorder {
    requests: Arc<Mutex<Vec<String>>>,
    transport: Transport,
}

fn recorder(responses: &[serde_json::Value]) -> Recorder {
    let requests = Arc::new(Mutex::new(Vec::new()));
    let responses = Arc::new(Mutex::new(
        responses
            .iter()
            .map(|response| response.to_string())
            .collect::<VecDeque<_>>(),
    ));
    let seen = requests.clone();
    let transport = BoxCloneService::new(service_fn(move |body: String| {
        seen.lock().push(body);
        let response = responses
            .lock()
            .pop_front()
            .ok_or_else(|| TransportError::failed("no response left"));
        async move { response }
    }));
    Recorder {
        requests,
        transport,
    }
}

fn context(transport: Transport) -> GraphContext {
    GraphContext::builder()
        .schema(schema())
        .transport(transport)
        .build()
}

#[test(tokio::test)]
async fn selects_a_single_member() {
    let recorder = recorder(&[json!({ "data": { "result": { "name": "Ada" } } })]);
    let context = context(recorder.transport);

    let name = context
        .item_query::<User>("getUser")
        .argument("id", "42")
        .select::<String>(Expression::parameter().member("name"))
        .unwrap()
        .execute()
        .await
        .unwrap();
    assert_eq!(name, "Ada");

    let requests = recorder.requests.lock();
    let request: serde_json::Value = serde_json::from_str(&requests[0]).unwrap();
    assert_eq!(
        request,
        json!({
            "query": "query ($id: ID!) { result: getUser(id: $id) { name } }",
            "variables": { "id": "42" }
        })
    );
}

#[test(tokio::test)]
async fn server_errors_are_reported_with_the_query() {
    let recorder = recorder(&[json!({
        "errors": [{
            "message": "user not found",
            "path": ["getUser"],
            "locations": [{ "line": 1, "column": 21 }],
            "extensions": { "code": "NOT_FOUND" }
        }]
    })]);
    let context = context(recorder.transport);

    let error = context
        .item_query::<User>("getUser")
        .argument("id", "404")
        .execute()
        .await
        .unwrap_err();
    let errors = error.graphql_errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].message, "user not found");

    let QueryError::Execution(execution) = &error else {
        panic!("expected an execution error, got {error:?}");
    };
    assert_eq!(
        execution.query,
        "query ($id: ID!) { result: getUser(id: $id) { id name } }"
    );
    let report = error.to_string();
    assert!(report.contains("Message: user not found"), "{report}");
    assert!(report.contains("Code: NOT_FOUND"), "{report}");
}

#[test(tokio::test)]
async fn method_includes_become_variables() {
    let recorder = recorder(&[json!({
        "data": { "result": { "id": "42", "name": "Ada", "posts": [{ "title": "Notes" }] } }
    })]);
    let context = context(recorder.transport);

    let user = context
        .item_query::<User>("getUser")
        .argument("id", "42")
        .include(
            Include::path("posts").with_method(MethodInclude::new("posts").argument("first", 1)),
        )
        .execute()
        .await
        .unwrap();
    assert_eq!(user.name, "Ada");
    assert_eq!(user.posts[0].title, "Notes");

    let requests = recorder.requests.lock();
    let request: serde_json::Value = serde_json::from_str(&requests[0]).unwrap();
    assert_eq!(
        request,
        json!({
            "query": "query ($id: ID!, $first1: Int) { result: getUser(id: $id) { id name posts(first: $first1) { title } } }",
            "variables": { "id": "42", "first1": 1 }
        })
    );
}

#[test(tokio::test)]
async fn repeated_entities_share_one_instance() {
    let recorder = recorder(&[
        json!({ "data": { "result": { "id": "1", "name": "Ada", "email": "ada@example.com" } } }),
        json!({ "data": { "result": { "id": "1", "name": "Ada Lovelace" } } }),
    ]);
    let context = context(recorder.transport);
    let people = EntityManager::<Person>::new();
    context.identity_map().register_manager(&people).unwrap();

    let added = Arc::new(Mutex::new(Vec::new()));
    let updated = Arc::new(Mutex::new(Vec::new()));
    {
        let added = added.clone();
        people.on_added(move |person| added.lock().push(person.read().name.clone()));
        let updated = updated.clone();
        people.on_updated(move |person| updated.lock().push(person.read().name.clone()));
    }

    let first = context
        .item_query::<EntityRef<Person>>("person")
        .argument("id", "1")
        .execute()
        .await
        .unwrap();
    let second = context
        .item_query::<EntityRef<Person>>("person")
        .argument("id", "1")
        .execute()
        .await
        .unwrap();

    assert!(first.ptr_eq(&second));
    assert_eq!(first.read().name, "Ada Lovelace");
    assert_eq!(first.read().email, None);
    assert_eq!(people.len(), 1);
    assert_eq!(*added.lock(), ["Ada"]);
    assert_eq!(*updated.lock(), ["Ada", "Ada Lovelace"]);
}

#[test(tokio::test)]
async fn transport_failures_carry_the_request() {
    let recorder = recorder(&[]);
    let context = context(recorder.transport);

    let error = context
        .item_query::<Person>("person")
        .argument("id", "1")
        .execute()
        .await
        .unwrap_err();
    let QueryError::Transport { reason, request } = error else {
        panic!("expected a transport error");
    };
    assert_eq!(reason, "no response left");
    assert!(request.contains("result: person(id: $id)"), "{request}");
}
