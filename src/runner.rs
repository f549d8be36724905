//! Assertion execution and verdict aggregation.
//!
//! The runner executes every queued assertion in registration order against
//! one shared snapshot pair and one shared body capture. The first violation
//! message becomes the failure headline, but later assertions still run so
//! the snapshots reflect the complete picture. The verdict itself is a single
//! structural comparison of the two snapshots, which lets the failure carry a
//! unified diff across status, headers, and body at once instead of stopping
//! at the first mismatch.

use crate::assertions::{Assertion, Snapshot};
use crate::error::{AssertionFailure, FetchError};
use crate::response::{BodyCapture, ResponseView};

/// Runs the queued assertions and produces the aggregate verdict.
///
/// `description` is the `<METHOD> <path>` of the request, used to build the
/// headline message.
pub(crate) async fn run_assertions(
    description: &str,
    assertions: &[Assertion],
    view: &ResponseView,
    capture: &mut BodyCapture,
) -> Result<(), FetchError> {
    let mut expected = Snapshot::default();
    let mut actual = Snapshot::default();
    let mut headline: Option<String> = None;

    for assertion in assertions {
        if let Some(message) = assertion
            .execute(&mut actual, &mut expected, view, capture)
            .await?
        {
            headline.get_or_insert(message);
        }
    }

    if actual == expected {
        return Ok(());
    }

    let violation = headline.unwrap_or_else(|| "match the expected response".to_string());
    Err(FetchError::Assertion(AssertionFailure {
        message: format!("Request \"{description}\" should {violation}"),
        expected,
        actual,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assertions::{BodyExpectation, HeaderExpectation};
    use http::{HeaderMap, StatusCode};
    use serde_json::json;

    fn json_view(status: StatusCode) -> ResponseView {
        let mut headers = HeaderMap::new();
        headers.insert("content-type", "application/json".parse().expect("value"));
        ResponseView::new(status, headers)
    }

    fn status(code: u16) -> Assertion {
        Assertion::Status(crate::assertions::StatusAssertion::new(code, None))
    }

    fn body(expectation: BodyExpectation) -> Assertion {
        Assertion::Body(crate::assertions::BodyAssertion::new(expectation))
    }

    fn header(name: &str, expectation: HeaderExpectation) -> Assertion {
        Assertion::Header(crate::assertions::HeaderAssertion::new(name, expectation))
    }

    #[tokio::test]
    async fn test_all_passing_assertions_resolve() {
        let assertions = vec![
            status(200),
            header("content-type", "application/json".into()),
            body(json!({"greeting": "Hello!"}).into()),
        ];
        let mut capture = BodyCapture::from_text(r#"{"greeting":"Hello!"}"#);

        run_assertions(
            "GET /hello",
            &assertions,
            &json_view(StatusCode::OK),
            &mut capture,
        )
        .await
        .expect("verdict should be a pass");
    }

    #[tokio::test]
    async fn test_first_violation_wins_but_all_assertions_run() {
        let assertions = vec![
            status(404),
            header("content-type", "text/plain".into()),
            body(json!({"greeting": "Hello!"}).into()),
        ];
        let mut capture = BodyCapture::from_text(r#"{"greeting":"Hello!"}"#);

        let err = run_assertions(
            "GET /hello",
            &assertions,
            &json_view(StatusCode::OK),
            &mut capture,
        )
        .await
        .expect_err("verdict should be a failure");

        let failure = err.as_assertion().expect("assertion failure");
        assert!(failure
            .message
            .starts_with("Request \"GET /hello\" should have status code 404"));
        // The later header assertion still contributed to the snapshots.
        let headers = failure.expected.headers.as_ref().expect("headers");
        assert_eq!(
            headers.get("content-type"),
            Some(&serde_json::Value::String("text/plain".to_string()))
        );
    }

    #[tokio::test]
    async fn test_shared_capture_avoids_double_body_reads() {
        // A pattern assertion consumes the body; the status assertion's
        // failure path reads it again from the memo.
        let assertions = vec![
            body(regex::Regex::new(".*").expect("regex").into()),
            status(404),
        ];
        let mut capture = BodyCapture::from_text("Boom!\nLong message\n");

        let err = run_assertions(
            "GET /err",
            &assertions,
            &json_view(StatusCode::OK),
            &mut capture,
        )
        .await
        .expect_err("verdict should be a failure");

        let failure = err.as_assertion().expect("assertion failure");
        assert_eq!(
            failure.message,
            "Request \"GET /err\" should have status code 404 but was 200 (body was: Boom!)"
        );
    }

    #[tokio::test]
    async fn test_snapshots_are_attached_to_the_failure() {
        let assertions = vec![body(BodyExpectation::from("Hello!"))];
        let mut capture = BodyCapture::from_text("Goodbye!");

        let err = run_assertions(
            "GET /text",
            &assertions,
            &json_view(StatusCode::OK),
            &mut capture,
        )
        .await
        .expect_err("verdict should be a failure");

        let failure = err.as_assertion().expect("assertion failure");
        assert_eq!(
            failure.expected.body,
            Some(serde_json::Value::String("Hello!".to_string()))
        );
        assert_eq!(
            failure.actual.body,
            Some(serde_json::Value::String("Goodbye!".to_string()))
        );
    }
}
