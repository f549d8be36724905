//! Request sessions: one in-flight request, its queued assertions, and its
//! bound server lifecycle, completed exactly once.
//!
//! A [`FetchSession`] starts its network call eagerly, the moment it is
//! created; assertion registration methods are synchronous queue appends that
//! never block on or inspect the in-flight response. Completion, via
//! [`FetchSession::end`], awaiting the session, or [`FetchSession::json`],
//! awaits the response, runs every queued assertion,
//! tears the lifecycle down exactly once, and yields the outcome. Because
//! completion consumes the session, it cannot re-run assertions or close the
//! lifecycle twice.

use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::sync::Arc;

use http::Method;
use serde_json::Value;
use tokio::task::JoinHandle;

use crate::assertions::{
    Assertion, BodyAssertion, BodyExpectation, HeaderAssertion, HeaderExpectation, StatusAssertion,
};
use crate::error::FetchError;
use crate::response::{BodyCapture, FetchResponse, ResponseView};
use crate::runner::run_assertions;
use crate::server::{Lifecycle, SharedListener};

/// What to request: an absolute path against the listener's base URL, or a
/// pre-built request descriptor carrying its own method, headers, and body.
pub enum Target {
    /// Path (and optional query) appended to the listener's base URL.
    Path(String),
    /// Pre-built request; its method, headers, and body take precedence over
    /// the session's [`RequestInit`].
    Request(http::Request<Vec<u8>>),
}

impl From<&str> for Target {
    fn from(path: &str) -> Self {
        Self::Path(path.to_string())
    }
}

impl From<String> for Target {
    fn from(path: String) -> Self {
        Self::Path(path)
    }
}

impl From<http::Request<Vec<u8>>> for Target {
    fn from(request: http::Request<Vec<u8>>) -> Self {
        Self::Request(request)
    }
}

/// Redirect handling for the session's network call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Redirect {
    /// Follow redirects (the client default).
    #[default]
    Follow,
    /// Return redirect responses as-is.
    Manual,
}

/// Options for the network call, in the shape of a fetch `init` argument.
#[derive(Debug, Default)]
pub struct RequestInit {
    /// Request method; defaults to GET.
    pub method: Option<Method>,
    /// Extra request headers.
    pub headers: Vec<(String, String)>,
    /// Request body.
    pub body: Option<Vec<u8>>,
    /// Redirect policy.
    pub redirect: Redirect,
    /// Accept self-signed certificates when talking to an HTTPS listener.
    pub accept_invalid_certs: bool,
}

impl RequestInit {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    #[must_use]
    pub const fn redirect(mut self, redirect: Redirect) -> Self {
        self.redirect = redirect;
        self
    }

    #[must_use]
    pub const fn accept_invalid_certs(mut self) -> Self {
        self.accept_invalid_certs = true;
        self
    }
}

/// A call shape accepted by the polymorphic [`FetchSession::expect`]
/// shorthand.
///
/// This is a compatibility shim over the primary typed `expect_*` API,
/// modelling runtime shape dispatch (number = status, name/value pair =
/// header, anything else = body) as a tagged union built through `From`
/// conversions.
pub enum Expect {
    /// `expect(200)`
    Status(u16),
    /// `expect((200, body))`
    StatusAndBody(u16, BodyExpectation),
    /// `expect(("content-type", "application/json"))`
    Header(String, HeaderExpectation),
    /// `expect(body)`
    Body(BodyExpectation),
}

impl From<u16> for Expect {
    fn from(code: u16) -> Self {
        Self::Status(code)
    }
}

// Bare integer literals fall back to i32; accept them so `expect(200)` works.
impl From<i32> for Expect {
    fn from(code: i32) -> Self {
        Self::Status(status_code(code))
    }
}

impl<B: Into<BodyExpectation>> From<(i32, B)> for Expect {
    fn from((code, body): (i32, B)) -> Self {
        Self::StatusAndBody(status_code(code), body.into())
    }
}

fn status_code(code: i32) -> u16 {
    u16::try_from(code).unwrap_or_else(|_| panic!("invalid status code: {code}"))
}

impl<B: Into<BodyExpectation>> From<(u16, B)> for Expect {
    fn from((code, body): (u16, B)) -> Self {
        Self::StatusAndBody(code, body.into())
    }
}

impl<V: Into<HeaderExpectation>> From<(&str, V)> for Expect {
    fn from((name, value): (&str, V)) -> Self {
        Self::Header(name.to_string(), value.into())
    }
}

impl From<&str> for Expect {
    fn from(body: &str) -> Self {
        Self::Body(body.into())
    }
}

impl From<regex::Regex> for Expect {
    fn from(pattern: regex::Regex) -> Self {
        Self::Body(pattern.into())
    }
}

impl From<Value> for Expect {
    fn from(json: Value) -> Self {
        Self::Body(json.into())
    }
}

/// Merges a shorthand expectation into the queue.
///
/// Identical duplicates are skipped; a shorthand expectation that conflicts
/// with an earlier one on the same field is a programmer error and panics
/// immediately.
pub(crate) fn merge_shorthand(queue: &mut Vec<Assertion>, expectation: Expect) {
    match expectation {
        Expect::Status(code) => {
            push_shorthand(queue, Assertion::Status(StatusAssertion::new(code, None)));
        }
        Expect::StatusAndBody(code, body) => {
            push_shorthand(queue, Assertion::Status(StatusAssertion::new(code, None)));
            push_shorthand(queue, Assertion::Body(BodyAssertion::new(body)));
        }
        Expect::Header(name, value) => {
            push_shorthand(queue, Assertion::Header(HeaderAssertion::new(name, value)));
        }
        Expect::Body(body) => {
            push_shorthand(queue, Assertion::Body(BodyAssertion::new(body)));
        }
    }
}

fn push_shorthand(queue: &mut Vec<Assertion>, assertion: Assertion) {
    if queue.contains(&assertion) {
        return;
    }
    assert!(
        assertion.can_add(queue),
        "expect() conflicts with an earlier expectation on the same field"
    );
    queue.push(assertion);
}

type Inflight = JoinHandle<(Option<Lifecycle>, Result<reqwest::Response, FetchError>)>;

/// One in-flight request plus its queued assertions.
///
/// Created by [`fetch`](crate::fetch) or a [`FetchFactory`]; completed by
/// [`end`](Self::end), [`json`](Self::json), or awaiting the session itself.
pub struct FetchSession {
    description: String,
    inflight: Inflight,
    assertions: Vec<Assertion>,
}

impl FetchSession {
    /// Spawns the lifecycle resolution and network call immediately; the
    /// request is in flight before any assertion registers.
    pub(crate) fn start(listener: SharedListener, target: Target, init: RequestInit) -> Self {
        let description = describe(&target, &init);
        let inflight = tokio::spawn(async move {
            let lifecycle = match Lifecycle::create(listener).await {
                Ok(lifecycle) => lifecycle,
                Err(err) => return (None, Err(err)),
            };
            let result = send(&lifecycle, target, init).await;
            (Some(lifecycle), result)
        });

        Self {
            description,
            inflight,
            assertions: Vec::new(),
        }
    }

    /// Expects the given status code.
    #[must_use]
    pub fn expect_status(mut self, code: u16) -> Self {
        self.assertions
            .push(Assertion::Status(StatusAssertion::new(code, None)));
        self
    }

    /// Expects the given status code and status text.
    #[must_use]
    pub fn expect_status_text(mut self, code: u16, text: impl Into<String>) -> Self {
        self.assertions
            .push(Assertion::Status(StatusAssertion::new(code, Some(text.into()))));
        self
    }

    /// Expects the body to match: exact text, a [`regex::Regex`], or a JSON
    /// value compared structurally.
    #[must_use]
    pub fn expect_body(mut self, body: impl Into<BodyExpectation>) -> Self {
        self.assertions
            .push(Assertion::Body(BodyAssertion::new(body.into())));
        self
    }

    /// Expects no body: neither `content-length` nor `transfer-encoding` may
    /// be present.
    #[must_use]
    pub fn expect_no_body(mut self) -> Self {
        self.assertions
            .push(Assertion::Body(BodyAssertion::new(BodyExpectation::Absent)));
        self
    }

    /// Expects a header to be present with the given value (exact string,
    /// number, [`regex::Regex`], or list compared comma-joined).
    #[must_use]
    pub fn expect_header(mut self, name: impl Into<String>, value: impl Into<HeaderExpectation>) -> Self {
        self.assertions
            .push(Assertion::Header(HeaderAssertion::new(name, value.into())));
        self
    }

    /// Expects a header to be absent.
    #[must_use]
    pub fn expect_no_header(mut self, name: impl Into<String>) -> Self {
        self.assertions.push(Assertion::Header(HeaderAssertion::new(
            name,
            HeaderExpectation::Absent,
        )));
        self
    }

    /// Polymorphic shorthand dispatching on the argument shape: a number is a
    /// status (optionally paired with a body), a name/value pair is a header,
    /// anything else is a body.
    ///
    /// # Panics
    ///
    /// Panics if the expectation conflicts with one already registered
    /// through this shorthand.
    #[must_use]
    pub fn expect(mut self, expectation: impl Into<Expect>) -> Self {
        merge_shorthand(&mut self.assertions, expectation.into());
        self
    }

    /// Completes the session: awaits the response, runs every queued
    /// assertion in registration order, and tears the lifecycle down exactly
    /// once regardless of outcome.
    pub async fn end(self) -> Result<FetchResponse, FetchError> {
        let (lifecycle, outcome) = match self.inflight.await {
            Ok(pair) => pair,
            Err(err) => return Err(FetchError::Task(err.to_string())),
        };

        let result = match outcome {
            Ok(response) => {
                let view = ResponseView::new(response.status(), response.headers().clone());
                let mut capture = BodyCapture::new(response);
                run_assertions(&self.description, &self.assertions, &view, &mut capture)
                    .await
                    .map(|()| FetchResponse::new(&view, capture))
            }
            Err(err) => Err(err),
        };

        if let Some(mut lifecycle) = lifecycle {
            lifecycle.close().await;
        }

        tracing::debug!(
            request = %self.description,
            ok = result.is_ok(),
            "session completed"
        );
        result
    }

    /// Completes the session and parses the response body as JSON.
    pub async fn json(self) -> Result<Value, FetchError> {
        self.end().await?.json().await
    }
}

impl IntoFuture for FetchSession {
    type Output = Result<FetchResponse, FetchError>;
    type IntoFuture = Pin<Box<dyn Future<Output = Self::Output> + Send>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(self.end())
    }
}

/// A reusable request function bound to one listener.
///
/// Each call creates an independent session with its own lifecycle, so the
/// listener is started and stopped around each call (and left alone when it
/// was already listening).
pub struct FetchFactory {
    listener: SharedListener,
}

impl FetchFactory {
    pub(crate) const fn new(listener: SharedListener) -> Self {
        Self { listener }
    }

    /// Issues a request against the bound listener.
    ///
    /// # Panics
    ///
    /// Panics if the target path is empty.
    pub fn fetch(&self, target: impl Into<Target>, init: RequestInit) -> FetchSession {
        let target = target.into();
        validate_target(&target);
        FetchSession::start(Arc::clone(&self.listener), target, init)
    }

    /// Whether the bound listener currently accepts connections.
    pub async fn is_listening(&self) -> bool {
        self.listener.lock().await.local_addr().is_some()
    }
}

pub(crate) fn validate_target(target: &Target) {
    let path = match target {
        Target::Path(path) => path.as_str(),
        Target::Request(request) => request.uri().path(),
    };
    assert!(!path.is_empty(), "expected a path to fetch");
}

fn describe(target: &Target, init: &RequestInit) -> String {
    match target {
        Target::Path(path) => {
            let method = init.method.clone().unwrap_or(Method::GET);
            format!("{method} {path}")
        }
        Target::Request(request) => {
            format!("{} {}", request.method(), request_path(request))
        }
    }
}

fn request_path(request: &http::Request<Vec<u8>>) -> String {
    request
        .uri()
        .path_and_query()
        .map_or_else(|| request.uri().path().to_string(), ToString::to_string)
}

async fn send(
    lifecycle: &Lifecycle,
    target: Target,
    init: RequestInit,
) -> Result<reqwest::Response, FetchError> {
    let mut builder = reqwest::Client::builder();
    builder = match init.redirect {
        Redirect::Follow => builder,
        Redirect::Manual => builder.redirect(reqwest::redirect::Policy::none()),
    };
    if init.accept_invalid_certs {
        builder = builder.danger_accept_invalid_certs(true);
    }
    let client = builder
        .build()
        .map_err(|err| FetchError::Client(err.to_string()))?;

    let request = match target {
        Target::Path(path) => {
            let url = format!("{}{path}", lifecycle.base_url());
            let method = init.method.unwrap_or(Method::GET);
            let mut request = client.request(method, &url);
            for (name, value) in init.headers {
                request = request.header(name, value);
            }
            if let Some(body) = init.body {
                request = request.body(body);
            }
            request
        }
        Target::Request(descriptor) => {
            let path = request_path(&descriptor);
            let url = format!("{}{path}", lifecycle.base_url());
            let (parts, body) = descriptor.into_parts();
            let mut request = client.request(parts.method, &url).headers(parts.headers);
            if !body.is_empty() {
                request = request.body(body);
            }
            request
        }
    };

    Ok(request.send().await?)
}
