mod common;

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use api_server::GatewaySettings;
use topic_engine::TopicRegistry;

fn app(base_path: &str, ws_path: &str) -> (Router, Arc<TopicRegistry>) {
    let registry = Arc::new(TopicRegistry::new());
    let router = common::build(&registry);
    let state = common::state(&router, &registry, GatewaySettings::default(), &CancellationToken::new());
    (api_server::app(state, base_path, ws_path), registry)
}

async fn post(app: &Router, uri: &str, body: &str) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

async fn get(app: &Router, uri: &str) -> (StatusCode, Value) {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn single_mutation_then_query() {
    let (app, _) = app("/", "/graphql");

    let (status, body) = post(
        &app,
        "/",
        r#"{ "operationName": "createPost", "variables": { "title": "A", "content": "B" } }"#,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "data": { "createPost": { "id": 1, "title": "A", "content": "B" } } }));

    let (_, body) = post(&app, "/", r#"{ "field": "post", "arguments": { "id": 1 } }"#).await;
    assert_eq!(body["data"]["post"]["title"], "A");
}

#[tokio::test]
async fn batch_reports_errors_next_to_results() {
    let (app, _) = app("/", "/graphql");

    let (status, body) = post(
        &app,
        "/",
        &json!({
            "selections": [
                { "field": "createUser", "arguments": { "name": "ann", "email": "a@x.io", "age": 31 } },
                { "field": "updateUser", "arguments": { "id": 99, "age": 32 }, "alias": "missing" },
                { "field": "users" }
            ]
        })
        .to_string(),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["createUser"]["name"], "ann");
    assert_eq!(body["data"]["missing"], Value::Null);
    assert_eq!(body["data"]["users"].as_array().unwrap().len(), 1);
    assert_eq!(body["errors"][0]["path"], json!(["missing"]));
    assert_eq!(body["errors"][0]["extensions"]["code"], "NOT_FOUND");
}

#[tokio::test]
async fn http_create_publishes_to_topic() {
    let (app, registry) = app("/", "/graphql");
    let mut sub = registry.subscribe(common::TOPIC, 8, Default::default());

    post(&app, "/", r#"{ "field": "createPost", "arguments": { "title": "A", "content": "B" } }"#).await;

    let event = sub.try_recv().unwrap();
    assert_eq!(event.value, json!({ "id": 1, "title": "A", "content": "B" }));
}

#[tokio::test]
async fn malformed_body_is_bad_request() {
    let (app, _) = app("/", "/graphql");

    let (status, body) = post(&app, "/", "{ not json").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["errors"][0]["extensions"]["code"], "BAD_REQUEST");

    let (status, _) = post(&app, "/", r#"{ "selections": [] }"#).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn invalid_arguments_are_user_input_errors() {
    let (app, _) = app("/", "/graphql");
    let (status, body) = post(&app, "/", r#"{ "field": "createPost", "arguments": { "title": 5 } }"#).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["createPost"], Value::Null);
    assert_eq!(body["errors"][0]["extensions"]["code"], "BAD_USER_INPUT");
}

#[tokio::test]
async fn get_returns_schema() {
    let (app, _) = app("/", "/graphql");
    let (status, body) = get(&app, "/").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["sdl"].as_str().unwrap().contains("postAdded: Post!"));
    assert_eq!(body["subscriptions"][0]["name"], "postAdded");

    let (status, _) = get(&app, "/graphql").await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn shared_base_and_ws_path() {
    let (app, _) = app("/graphql", "/graphql");

    let (status, body) = post(&app, "/graphql", r#"{ "field": "users" }"#).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "data": { "users": [] } }));

    let (status, _) = get(&app, "/graphql").await;
    assert_eq!(status, StatusCode::OK);
}
