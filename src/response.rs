//! Response access and body memoization.
//!
//! A response body stream can only be read once. [`BodyCapture`] owns the
//! body-bearing response and reads the body text exactly once, on first
//! demand, memoizing it for every later reader: assertions and the
//! caller-facing [`FetchResponse`] alike.

use http::{HeaderMap, StatusCode};
use serde::de::DeserializeOwned;

use crate::error::FetchError;

/// Maximum length of the single-line body preview used in diagnostics.
const MAX_SHORT_BODY_LENGTH: usize = 80;

/// Status and headers of the live response, shared by all assertions.
pub(crate) struct ResponseView {
    status: StatusCode,
    headers: HeaderMap,
}

impl ResponseView {
    pub fn new(status: StatusCode, headers: HeaderMap) -> Self {
        Self { status, headers }
    }

    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// Canonical status text, empty for codes without one.
    pub fn status_text(&self) -> &'static str {
        self.status.canonical_reason().unwrap_or("")
    }

    pub const fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Case-insensitive header lookup, comma-joining repeated values.
    pub fn header(&self, name: &str) -> Option<String> {
        let values: Vec<&str> = self
            .headers
            .get_all(name)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .collect();
        if values.is_empty() {
            None
        } else {
            Some(values.join(", "))
        }
    }
}

/// Memoizing one-shot reader for a response body.
///
/// The underlying stream is read at most once regardless of how many
/// assertions need the body; a failed read poisons the capture so the stream
/// is never touched again.
#[derive(Debug)]
pub(crate) struct BodyCapture {
    pending: Option<reqwest::Response>,
    text: Option<String>,
}

impl BodyCapture {
    pub fn new(response: reqwest::Response) -> Self {
        Self {
            pending: Some(response),
            text: None,
        }
    }

    /// A capture whose body is already known. Used by unit tests.
    #[cfg(test)]
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            pending: None,
            text: Some(text.into()),
        }
    }

    /// A capture whose body stream has already failed. Used by unit tests.
    #[cfg(test)]
    pub const fn poisoned() -> Self {
        Self {
            pending: None,
            text: None,
        }
    }

    /// The full body text, read from the stream on first call and memoized.
    pub async fn text(&mut self) -> Result<&str, FetchError> {
        if self.text.is_none() {
            let response = self.pending.take().ok_or(FetchError::BodyUnavailable)?;
            self.text = Some(response.text().await?);
        }
        Ok(self.text.as_deref().unwrap_or(""))
    }

    /// Single-line preview of the body for diagnostic messages.
    ///
    /// Returns `None` when the body cannot be read; callers contribute an
    /// empty string to their message in that case.
    pub async fn short_text(&mut self) -> Option<String> {
        let body = self.text().await.ok()?;
        let first_line = body.split('\n').next().unwrap_or("");
        if first_line.chars().count() > MAX_SHORT_BODY_LENGTH {
            let truncated: String = first_line.chars().take(MAX_SHORT_BODY_LENGTH).collect();
            Some(format!("{truncated}..."))
        } else {
            Some(first_line.to_string())
        }
    }
}

/// The response handed back by a successfully completed session.
///
/// Body readers are served from the session's memoized capture, so a body
/// already consumed by an assertion is still available here.
#[derive(Debug)]
pub struct FetchResponse {
    status: StatusCode,
    headers: HeaderMap,
    capture: BodyCapture,
}

impl FetchResponse {
    pub(crate) fn new(view: &ResponseView, capture: BodyCapture) -> Self {
        Self {
            status: view.status(),
            headers: view.headers().clone(),
            capture,
        }
    }

    /// HTTP status code of the response.
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// Response headers.
    pub const fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Case-insensitive single-header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    /// Reads the response body as text.
    pub async fn text(mut self) -> Result<String, FetchError> {
        Ok(self.capture.text().await?.to_string())
    }

    /// Reads the response body and parses it as JSON.
    pub async fn json<T: DeserializeOwned>(mut self) -> Result<T, FetchError> {
        let text = self.capture.text().await?;
        Ok(serde_json::from_str(text)?)
    }
}
