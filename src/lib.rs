//! # fetch-expect
//!
//! Fluent HTTP-response assertions for integration tests. A session performs
//! a real network request against an ephemeral (or already-running) server
//! and lets the test declaratively assert on the response's status, headers,
//! and body; every mismatch is aggregated into a single structured failure
//! carrying a full expected/actual snapshot pair.
//!
//! The server is started on a random port when the session begins and stopped
//! when it completes, unless it was already listening, in which case it is
//! left untouched.
//!
//! ## Example
//!
//! ```rust,no_run
//! use axum::Router;
//! use axum::routing::get;
//! use fetch_expect::{fetch, AppServer, RequestInit};
//! use serde_json::json;
//!
//! async fn example() -> Result<(), fetch_expect::FetchError> {
//!     let app = Router::new().route(
//!         "/hello",
//!         get(|| async { axum::Json(json!({"greeting": "Hello!"})) }),
//!     );
//!
//!     fetch(AppServer::new(app), "/hello", RequestInit::new())
//!         .expect_status(200)
//!         .expect_header("content-type", "application/json")
//!         .expect_body(json!({"greeting": "Hello!"}))
//!         .end()
//!         .await?;
//!     Ok(())
//! }
//! ```
//!
//! A failed expectation rejects the session with a message like
//! `Request "GET /hello" should have status code 404 but was 200 (body was:
//! ...)` plus the expected/actual snapshots for diffing.

pub mod assertions;
pub mod error;
pub mod response;
mod runner;
pub mod server;
pub mod session;

pub use assertions::{BodyExpectation, HeaderExpectation, Snapshot};
pub use error::{AssertionFailure, FetchError};
pub use response::FetchResponse;
pub use server::{AppServer, ExternalServer, Listener};
pub use session::{Expect, FetchFactory, FetchSession, Redirect, RequestInit, Target};

use session::validate_target;

/// Issues a request against the given listener and returns the session.
///
/// The listener is started if it is not already accepting connections, the
/// network call begins immediately, and the listener is stopped when the
/// session completes (only if this call started it).
///
/// Must be called within a Tokio runtime.
///
/// # Panics
///
/// Panics if the target path is empty.
pub fn fetch(
    listener: impl Listener + 'static,
    target: impl Into<Target>,
    init: RequestInit,
) -> FetchSession {
    let target = target.into();
    validate_target(&target);
    FetchSession::start(server::shared(listener), target, init)
}

/// Returns a reusable request function bound to the given listener.
///
/// Each call to [`FetchFactory::fetch`] starts and stops the listener around
/// its own request (leaving it alone when it was already listening), so a
/// single factory can serve a whole test.
pub fn make_fetch(listener: impl Listener + 'static) -> FetchFactory {
    FetchFactory::new(server::shared(listener))
}
