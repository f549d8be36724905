//! Response assertions and the snapshot pair they populate.
//!
//! Each assertion is a queued, unexecuted intent to validate one aspect of a
//! response: status, body, or a header. At execution time every assertion
//! writes its expectation into a shared `expected` [`Snapshot`] and the
//! observed value into a parallel `actual` snapshot, on success as well as
//! failure, so that a single structural comparison at the end reconstructs
//! whether anything diverged and exactly what. Assertions never throw
//! individually; they return a message fragment describing their violation
//! and keep going.
//!
//! The shared mutable snapshot pair is deliberate: the "only populate a field
//! if not already populated" rule is what prevents duplicate body reads and
//! duplicate diagnostic noise when several assertions touch the body.

use std::collections::BTreeMap;

use regex::Regex;
use serde::Serialize;
use serde_json::Value;

use crate::error::FetchError;
use crate::response::{BodyCapture, ResponseView};

/// One side of the expected/actual pair built incrementally by assertions.
///
/// `PartialEq` between two snapshots is the deep structural equality that
/// decides the final verdict.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Snapshot {
    /// Canonical status string, `"<code>"` or `"<code> - <text>"`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Body as raw text or a parsed JSON structure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    /// Headers by lower-cased name; `Null` marks an expected-absent header.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headers: Option<BTreeMap<String, Value>>,
}

impl Snapshot {
    fn headers_mut(&mut self) -> &mut BTreeMap<String, Value> {
        self.headers.get_or_insert_with(BTreeMap::new)
    }
}

/// What a body assertion expects, by shape.
#[derive(Debug, Clone)]
pub enum BodyExpectation {
    /// Exact equality against the full text body.
    Text(String),
    /// The full text body must match.
    Pattern(Regex),
    /// Parse the body as JSON and compare structurally.
    Json(Value),
    /// No body: neither `content-length` nor `transfer-encoding` present.
    Absent,
}

impl PartialEq for BodyExpectation {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Text(a), Self::Text(b)) => a == b,
            (Self::Pattern(a), Self::Pattern(b)) => a.as_str() == b.as_str(),
            (Self::Json(a), Self::Json(b)) => a == b,
            (Self::Absent, Self::Absent) => true,
            _ => false,
        }
    }
}

impl From<&str> for BodyExpectation {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<String> for BodyExpectation {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<Regex> for BodyExpectation {
    fn from(pattern: Regex) -> Self {
        Self::Pattern(pattern)
    }
}

impl From<Value> for BodyExpectation {
    fn from(json: Value) -> Self {
        Self::Json(json)
    }
}

/// What a header assertion expects, by shape.
///
/// A list is compared against the comma-joined actual value. This conflates
/// repeated headers with a single comma-separated value, which is a known
/// simplification of HTTP header semantics, kept for compatibility.
#[derive(Debug, Clone)]
pub enum HeaderExpectation {
    /// The header must not be present.
    Absent,
    /// Exact stringified equality.
    Exact(String),
    /// The header value must match.
    Pattern(Regex),
    /// Comma-joined equality.
    List(Vec<String>),
}

impl PartialEq for HeaderExpectation {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Absent, Self::Absent) => true,
            (Self::Exact(a), Self::Exact(b)) => a == b,
            (Self::Pattern(a), Self::Pattern(b)) => a.as_str() == b.as_str(),
            (Self::List(a), Self::List(b)) => a == b,
            _ => false,
        }
    }
}

impl From<&str> for HeaderExpectation {
    fn from(value: &str) -> Self {
        Self::Exact(value.to_string())
    }
}

impl From<String> for HeaderExpectation {
    fn from(value: String) -> Self {
        Self::Exact(value)
    }
}

impl From<i64> for HeaderExpectation {
    fn from(value: i64) -> Self {
        Self::Exact(value.to_string())
    }
}

impl From<i32> for HeaderExpectation {
    fn from(value: i32) -> Self {
        Self::Exact(value.to_string())
    }
}

impl From<Regex> for HeaderExpectation {
    fn from(pattern: Regex) -> Self {
        Self::Pattern(pattern)
    }
}

impl From<Vec<&str>> for HeaderExpectation {
    fn from(values: Vec<&str>) -> Self {
        Self::List(values.into_iter().map(str::to_string).collect())
    }
}

impl From<Vec<String>> for HeaderExpectation {
    fn from(values: Vec<String>) -> Self {
        Self::List(values)
    }
}

/// Expectation on the response status line.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct StatusAssertion {
    code: u16,
    text: Option<String>,
}

impl StatusAssertion {
    pub fn new(code: u16, text: Option<String>) -> Self {
        Self { code, text }
    }

    fn expected_string(&self) -> String {
        match &self.text {
            Some(text) => format!("{} - {}", self.code, text),
            None => self.code.to_string(),
        }
    }

    fn actual_string(&self, view: &ResponseView) -> String {
        if self.text.is_some() {
            format!("{} - {}", view.status().as_u16(), view.status_text())
        } else {
            view.status().as_u16().to_string()
        }
    }

    async fn execute(
        &self,
        actual: &mut Snapshot,
        expected: &mut Snapshot,
        view: &ResponseView,
        capture: &mut BodyCapture,
    ) -> Result<Option<String>, FetchError> {
        expected.status = Some(self.expected_string());
        actual.status = Some(self.actual_string(view));

        if expected.status == actual.status {
            return Ok(None);
        }

        let preview = match capture.short_text().await {
            Some(short) => format!(" (body was: {short})"),
            None => String::new(),
        };

        // A body assertion may already have recorded the body; keep it.
        if actual.body.is_none() {
            let text = capture.text().await?.to_string();
            let content_type = view.header("content-type").unwrap_or_default();
            actual.body = Some(if content_type.to_lowercase().contains("json") {
                serde_json::from_str(&text).unwrap_or(Value::String(text))
            } else {
                Value::String(text)
            });
        }

        Ok(Some(format!(
            "have status code {} but was {}{preview}",
            expected.status.as_deref().unwrap_or(""),
            actual.status.as_deref().unwrap_or(""),
        )))
    }
}

/// Expectation on the response body.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct BodyAssertion {
    expected_body: BodyExpectation,
}

impl BodyAssertion {
    pub fn new(expected_body: BodyExpectation) -> Self {
        Self { expected_body }
    }

    async fn execute(
        &self,
        actual: &mut Snapshot,
        expected: &mut Snapshot,
        view: &ResponseView,
        capture: &mut BodyCapture,
    ) -> Result<Option<String>, FetchError> {
        match &self.expected_body {
            BodyExpectation::Text(want) => {
                expected.body = Some(Value::String(want.clone()));
                actual.body = Some(Value::String(capture.text().await?.to_string()));
                Ok((expected.body != actual.body).then(|| "have expected body".to_string()))
            }
            BodyExpectation::Pattern(pattern) => {
                let text = capture.text().await?.to_string();
                let matched = pattern.is_match(&text);
                actual.body = Some(Value::String(text));
                if matched {
                    expected.body.clone_from(&actual.body);
                    Ok(None)
                } else {
                    let description =
                        format!("a body with a value that matches /{}/", pattern.as_str());
                    expected.body = Some(Value::String(description.clone()));
                    Ok(Some(format!("have {description}")))
                }
            }
            BodyExpectation::Json(want) => {
                expected.body = Some(want.clone());
                let text = capture.text().await?.to_string();
                match serde_json::from_str::<Value>(&text) {
                    Ok(parsed) => {
                        actual.body = Some(parsed);
                        Ok((expected.body != actual.body)
                            .then(|| "have expected JSON body".to_string()))
                    }
                    Err(err) => {
                        actual.body = Some(Value::String(text));
                        Ok(Some(format!(
                            "have JSON body but body could not be parsed: {err}"
                        )))
                    }
                }
            }
            BodyExpectation::Absent => {
                let mut present = false;
                for name in ["content-length", "transfer-encoding"] {
                    expected.headers_mut().insert(name.to_string(), Value::Null);
                    let observed = view.header(name);
                    present = present || observed.is_some();
                    actual
                        .headers_mut()
                        .insert(name.to_string(), observed.map_or(Value::Null, Value::String));
                }
                Ok(present.then(|| "have no body".to_string()))
            }
        }
    }
}

/// Expectation on a single response header.
///
/// Name matching is case-insensitive; snapshot keys are lower-cased.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct HeaderAssertion {
    name: String,
    value: HeaderExpectation,
}

impl HeaderAssertion {
    pub fn new(name: impl Into<String>, value: HeaderExpectation) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }

    fn execute(
        &self,
        actual: &mut Snapshot,
        expected: &mut Snapshot,
        view: &ResponseView,
    ) -> Option<String> {
        let key = self.name.to_lowercase();
        let observed = view.header(&self.name);
        let observed_value = observed.clone().map_or(Value::Null, Value::String);
        actual.headers_mut().insert(key.clone(), observed_value);

        match &self.value {
            HeaderExpectation::Absent => {
                expected.headers_mut().insert(key, Value::Null);
                observed.map(|value| {
                    format!("have no header {} but has \"{value}\"", self.name)
                })
            }
            HeaderExpectation::Pattern(pattern) => {
                match observed {
                    Some(value) if pattern.is_match(&value) => {
                        expected.headers_mut().insert(key, Value::String(value));
                        None
                    }
                    _ => {
                        expected.headers_mut().insert(
                            key,
                            Value::String(format!(
                                "a header that matches /{}/",
                                pattern.as_str()
                            )),
                        );
                        Some(format!(
                            "have a header {} which matches /{}/",
                            self.name,
                            pattern.as_str()
                        ))
                    }
                }
            }
            HeaderExpectation::Exact(want) => {
                expected
                    .headers_mut()
                    .insert(key, Value::String(want.clone()));
                (observed.as_deref() != Some(want))
                    .then(|| format!("have correct header {}", self.name))
            }
            HeaderExpectation::List(values) => {
                let joined = values.join(", ");
                expected
                    .headers_mut()
                    .insert(key, Value::String(joined.clone()));
                (observed.as_deref() != Some(joined.as_str()))
                    .then(|| format!("have correct header {}", self.name))
            }
        }
    }
}

/// A queued assertion, tagged by kind.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Assertion {
    Status(StatusAssertion),
    Body(BodyAssertion),
    Header(HeaderAssertion),
}

impl Assertion {
    /// Whether this assertion is compatible with everything already queued:
    /// no prior expectation on the same field, or an identical one.
    ///
    /// Consulted only by the polymorphic `expect` shorthand; the explicit
    /// `expect_*` registration methods queue unconditionally.
    pub fn can_add(&self, queued: &[Self]) -> bool {
        match self {
            Self::Status(new) => queued.iter().all(|prior| match prior {
                Self::Status(existing) => existing == new,
                _ => true,
            }),
            Self::Body(new) => queued.iter().all(|prior| match prior {
                Self::Body(existing) => existing == new,
                _ => true,
            }),
            Self::Header(_) => true,
        }
    }

    /// Runs the assertion against the live response, recording its
    /// contribution to both snapshots and returning a violation description
    /// if the expectation did not hold.
    pub async fn execute(
        &self,
        actual: &mut Snapshot,
        expected: &mut Snapshot,
        view: &ResponseView,
        capture: &mut BodyCapture,
    ) -> Result<Option<String>, FetchError> {
        match self {
            Self::Status(assertion) => assertion.execute(actual, expected, view, capture).await,
            Self::Body(assertion) => assertion.execute(actual, expected, view, capture).await,
            Self::Header(assertion) => Ok(assertion.execute(actual, expected, view)),
        }
    }
}
