//! End-to-end tests for the fluent fetch API against a real Axum server.

use axum::body::{Body, Bytes};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::Response;
use axum::routing::{get, post};
use axum::Router;
use fetch_expect::{fetch, make_fetch, AppServer, ExternalServer, RequestInit};
use http::Method;
use regex::Regex;
use serde_json::json;

/// The fixture application: a JSON route, a bare-text route (no content-type),
/// an echo route, and an empty-body route.
fn app() -> Router {
    Router::new()
        .route(
            "/hello",
            get(|| async { axum::Json(json!({"greeting": "Hello!"})) }),
        )
        .route("/text", get(|| async { Response::new(Body::from("Hello!")) }))
        .route("/echo", post(echo))
        .route("/empty", get(|| async { StatusCode::NO_CONTENT }))
        .route(
            "/redirect",
            get(|| async {
                Response::builder()
                    .status(StatusCode::FOUND)
                    .header(header::LOCATION, "/hello")
                    .body(Body::empty())
                    .expect("response")
            }),
        )
}

async fn echo(headers: HeaderMap, body: Bytes) -> Response {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .cloned()
        .unwrap_or_else(|| "text/plain".parse().expect("header value"));
    Response::builder()
        .header(header::CONTENT_TYPE, content_type)
        .body(Body::from(body))
        .expect("response")
}

#[tokio::test]
async fn test_verifies_a_json_request() {
    fetch(AppServer::new(app()), "/hello", RequestInit::new())
        .expect_status(200)
        .expect_header("content-type", "application/json")
        .expect_body(json!({"greeting": "Hello!"}))
        .end()
        .await
        .expect("request should pass");
}

#[tokio::test]
async fn test_polymorphic_expect_shorthand() {
    fetch(AppServer::new(app()), "/hello", RequestInit::new())
        .expect(200)
        .expect(("content-type", "application/json"))
        .expect(("content-type", Regex::new("json").expect("regex")))
        .expect((200, json!({"greeting": "Hello!"})))
        .end()
        .await
        .expect("request should pass");
}

#[tokio::test]
async fn test_shorthand_body_only() {
    fetch(AppServer::new(app()), "/hello", RequestInit::new())
        .expect(json!({"greeting": "Hello!"}))
        .end()
        .await
        .expect("request should pass");
}

#[tokio::test]
async fn test_shorthand_body_regex() {
    fetch(AppServer::new(app()), "/hello", RequestInit::new())
        .expect(Regex::new("Hello").expect("regex"))
        .end()
        .await
        .expect("request should pass");
}

#[tokio::test]
async fn test_verifies_a_text_request() {
    fetch(AppServer::new(app()), "/text", RequestInit::new())
        .expect_status(200)
        .expect_no_header("content-type")
        .expect_header("content-length", 6)
        .expect_body("Hello!")
        .end()
        .await
        .expect("request should pass");
}

#[tokio::test]
async fn test_header_names_are_case_insensitive() {
    fetch(AppServer::new(app()), "/hello", RequestInit::new())
        .expect_status(200)
        .expect_header("Content-Type", "application/json")
        .expect_body(json!({"greeting": "Hello!"}))
        .end()
        .await
        .expect("request should pass");
}

#[tokio::test]
async fn test_fails_on_incorrect_status_code() {
    let err = fetch(AppServer::new(app()), "/hello", RequestInit::new())
        .expect_status(404)
        .expect_header("content-type", "application/json")
        .expect_body(json!({"greeting": "Hello!"}))
        .end()
        .await
        .expect_err("request should fail");

    let failure = err.as_assertion().expect("assertion failure");
    assert!(failure
        .message
        .starts_with("Request \"GET /hello\" should have status code 404 but was 200"));
    assert_eq!(failure.expected.status.as_deref(), Some("404"));
    assert_eq!(failure.actual.status.as_deref(), Some("200"));
}

#[tokio::test]
async fn test_fails_on_incorrect_header() {
    let err = fetch(AppServer::new(app()), "/hello", RequestInit::new())
        .expect_status(200)
        .expect_header("content-type", "text/plain")
        .expect_body(json!({"greeting": "Hello!"}))
        .end()
        .await
        .expect_err("request should fail");

    assert_eq!(
        err.as_assertion().expect("assertion failure").message,
        "Request \"GET /hello\" should have correct header content-type"
    );
}

#[tokio::test]
async fn test_fails_on_incorrect_json_body() {
    let err = fetch(AppServer::new(app()), "/hello", RequestInit::new())
        .expect_status(200)
        .expect_header("content-type", "application/json")
        .expect_body(json!({"greeting": "Hello2!"}))
        .end()
        .await
        .expect_err("request should fail");

    let failure = err.as_assertion().expect("assertion failure");
    assert_eq!(
        failure.message,
        "Request \"GET /hello\" should have expected JSON body"
    );
    // Both full structures are recorded for diffing.
    assert_eq!(failure.expected.body, Some(json!({"greeting": "Hello2!"})));
    assert_eq!(failure.actual.body, Some(json!({"greeting": "Hello!"})));
}

#[tokio::test]
async fn test_posts_data_with_a_request_descriptor() {
    let factory = make_fetch(AppServer::new(app()));
    let body = "<hello>world</hello>";
    let request = http::Request::builder()
        .method(Method::POST)
        .uri("/echo")
        .header("content-type", "application/xml")
        .body(body.as_bytes().to_vec())
        .expect("request");

    factory
        .fetch(request, RequestInit::new())
        .expect_status(200)
        .expect_header("content-type", "application/xml")
        .expect_body(body)
        .end()
        .await
        .expect("request should pass");
}

#[tokio::test]
async fn test_empty_body_expectation() {
    fetch(AppServer::new(app()), "/empty", RequestInit::new())
        .expect_status(204)
        .expect_no_body()
        .end()
        .await
        .expect("request should pass");
}

#[tokio::test]
async fn test_manual_redirect_policy() {
    fetch(
        AppServer::new(app()),
        "/redirect",
        RequestInit::new().redirect(fetch_expect::Redirect::Manual),
    )
    .expect_status(302)
    .expect_header("location", "/hello")
    .end()
    .await
    .expect("request should pass");
}

#[tokio::test]
async fn test_redirects_are_followed_by_default() {
    fetch(AppServer::new(app()), "/redirect", RequestInit::new())
        .expect_status(200)
        .expect_body(json!({"greeting": "Hello!"}))
        .end()
        .await
        .expect("request should pass");
}

#[tokio::test]
async fn test_make_fetch_generates_a_fetch_function() {
    let factory = make_fetch(AppServer::new(app()));
    factory
        .fetch("/hello", RequestInit::new())
        .expect(200)
        .expect(("content-type", "application/json"))
        .expect(json!({"greeting": "Hello!"}))
        .end()
        .await
        .expect("request should pass");

    assert!(
        !factory.is_listening().await,
        "server should be stopped after the session"
    );
}

#[tokio::test]
async fn test_session_behaves_like_fetch() {
    let factory = make_fetch(AppServer::new(app()));
    let response = factory
        .fetch("/hello", RequestInit::new())
        .await
        .expect("request should pass");

    let parsed: serde_json::Value = response.json().await.expect("parse body");
    assert_eq!(parsed, json!({"greeting": "Hello!"}));
}

#[tokio::test]
async fn test_mix_and_match_assertions_and_response_access() {
    let factory = make_fetch(AppServer::new(app()));
    let response = factory
        .fetch("/hello", RequestInit::new())
        .expect(200)
        .expect(("content-type", "application/json"))
        .await
        .expect("request should pass");

    let parsed: serde_json::Value = response.json().await.expect("parse body");
    assert_eq!(parsed, json!({"greeting": "Hello!"}));
}

#[tokio::test]
async fn test_json_convenience_method() {
    let factory = make_fetch(AppServer::new(app()));
    let parsed = factory
        .fetch("/hello", RequestInit::new())
        .expect_status(200)
        .json()
        .await
        .expect("request should pass");
    assert_eq!(parsed, json!({"greeting": "Hello!"}));
}

#[tokio::test]
async fn test_recycling_starts_and_stops_the_server_each_time() {
    let factory = make_fetch(AppServer::new(app()));

    factory
        .fetch("/hello", RequestInit::new())
        .expect_status(200)
        .end()
        .await
        .expect("first request should pass");
    assert!(!factory.is_listening().await, "stopped after first session");

    factory
        .fetch("/hello", RequestInit::new())
        .expect_status(200)
        .end()
        .await
        .expect("second request should pass");
    assert!(!factory.is_listening().await, "stopped after second session");
}

#[tokio::test]
async fn test_server_is_stopped_after_a_failed_session() {
    let factory = make_fetch(AppServer::new(app()));
    factory
        .fetch("/hello", RequestInit::new())
        .expect_status(404)
        .end()
        .await
        .expect_err("request should fail");
    assert!(!factory.is_listening().await, "stopped despite the failure");
}

#[tokio::test]
async fn test_a_pre_started_server_is_left_listening() {
    use fetch_expect::Listener;

    let mut server = AppServer::new(app());
    server.start().await.expect("start server");

    let factory = make_fetch(server);
    let err = factory
        .fetch("/hello", RequestInit::new())
        .expect_status(404)
        .end()
        .await
        .expect_err("request should fail");
    assert!(err
        .as_assertion()
        .expect("assertion failure")
        .message
        .starts_with("Request \"GET /hello\" should have status code 404"));

    assert!(
        factory.is_listening().await,
        "a listener we did not start must remain listening"
    );
}

#[tokio::test]
async fn test_external_server_survives_multiple_sessions() {
    // A server whose lifetime is managed entirely by the test.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app()).await.ok();
    });

    for _ in 0..2 {
        fetch(ExternalServer::new(addr), "/hello", RequestInit::new())
            .expect_status(200)
            .expect_body(json!({"greeting": "Hello!"}))
            .end()
            .await
            .expect("request should pass");
    }
}

#[tokio::test]
async fn test_request_init_builds_the_request() {
    fetch(
        AppServer::new(app()),
        "/echo",
        RequestInit::new()
            .method(Method::POST)
            .header("content-type", "text/plain")
            .body("ping"),
    )
    .expect_status(200)
    .expect_header("content-type", "text/plain")
    .expect_body("ping")
    .end()
    .await
    .expect("request should pass");
}
