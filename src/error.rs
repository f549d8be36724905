//! Error types for fetch-expect.
//!
//! There is one error enum, [`FetchError`], split along the lines callers
//! care about in a test suite: lifecycle problems (the test server could not
//! be started), transport problems (the request itself failed), and
//! [`AssertionFailure`], the single structured failure produced when one or
//! more response expectations did not hold.

use std::fmt;

use thiserror::Error;

use crate::assertions::Snapshot;

/// The primary error type for fetch-expect.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The test server could not bind because the address is already in use.
    #[error("address already in use")]
    AddressInUse,

    /// The supplied listener is not bound to a host:port address.
    ///
    /// Only IP socket addresses are supported; named pipes and other
    /// non-inspectable address families are rejected at creation time.
    #[error("unsupported listener address: {0}")]
    UnsupportedAddress(String),

    /// Binding the test server failed for a reason other than a busy address.
    #[error("failed to bind test server: {0}")]
    Bind(#[source] std::io::Error),

    /// The HTTP client could not be constructed.
    #[error("failed to build HTTP client: {0}")]
    Client(String),

    /// The network call itself failed (connect, write, read headers).
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The response body could not be parsed as JSON.
    #[error("failed to parse response body as JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// The response body stream failed on a previous read.
    ///
    /// The body is read at most once; after a failed read every later read
    /// reports this error instead of touching the stream again.
    #[error("response body could not be read")]
    BodyUnavailable,

    /// One or more response expectations did not hold.
    #[error("{0}")]
    Assertion(AssertionFailure),

    /// The in-flight request task panicked or was cancelled.
    #[error("request task failed: {0}")]
    Task(String),
}

/// A structured assertion failure.
///
/// `message` is the headline of the first violated expectation, in the form
/// `Request "<METHOD> <path>" should <violation>`. The `expected` and
/// `actual` snapshots reflect *every* assertion that ran, not just the first
/// failure, so the caller's assertion layer can render a complete diff.
#[derive(Debug, Clone)]
pub struct AssertionFailure {
    /// Headline message of the first violated expectation.
    pub message: String,
    /// What the registered assertions expected.
    pub expected: Snapshot,
    /// What the response actually contained.
    pub actual: Snapshot,
}

impl fmt::Display for AssertionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AssertionFailure {}

impl FetchError {
    /// Returns the assertion failure if this error is one.
    pub fn as_assertion(&self) -> Option<&AssertionFailure> {
        match self {
            Self::Assertion(failure) => Some(failure),
            _ => None,
        }
    }
}
