use super::*;
use crate::core::envelope::{
    EnvelopeStatus, CANCELLED_MESSAGE, NETWORK_ERROR_MESSAGE, TIMEOUT_MESSAGE,
    UPSTREAM_ERROR_MESSAGE,
};
use crate::utils::test_utils::{refused_url, test_client, MockReply, MockUpstream};
use serde_json::json;

fn gateway(url: &str) -> UpstreamGateway {
    UpstreamGateway::new(test_client(), url)
}

#[tokio::test]
async fn json_reply_is_normalized_and_request_carries_all_fields() {
    let upstream = MockUpstream::start(vec![MockReply::json(json!({
        "response": "Mars is roughly 1.5 AU from the Sun.",
        "session_id": "s-17",
        "sources": ["https://nasa.gov/mars"]
    }))])
    .await;

    let request = QueryRequest::new("How far is Mars?", "u-9").with_generate_image(false);
    let envelope = gateway(&upstream.url).send(&request).await;

    assert_eq!(envelope.status, EnvelopeStatus::Success);
    assert_eq!(envelope.session_id, "s-17");
    assert_eq!(envelope.original_query, "How far is Mars?");
    assert_eq!(envelope.proof, vec!["https://nasa.gov/mars"]);

    let requests = upstream.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].request_line, "POST /query HTTP/1.1");
    assert!(requests[0]
        .header("content-type")
        .is_some_and(|value| value.starts_with("application/json")));
    assert_eq!(
        requests[0].json(),
        json!({ "message": "How far is Mars?", "user_id": "u-9", "generate_image": false })
    );
}

#[tokio::test]
async fn endpoint_with_query_suffix_is_not_doubled() {
    let upstream = MockUpstream::start(vec![MockReply::text("ok")]).await;

    let gateway = gateway(&format!("{}/query", upstream.url));
    gateway.send(&QueryRequest::new("hi", "u")).await;

    assert_eq!(upstream.requests()[0].request_line, "POST /query HTTP/1.1");
}

#[tokio::test]
async fn plain_text_reply_becomes_uniform_success_envelope() {
    let sentence = "Mars is further away from the Sun than Earth.";
    let upstream = MockUpstream::start(vec![MockReply::text(sentence)]).await;

    let envelope = gateway(&upstream.url)
        .send(&QueryRequest::new("Is Mars further from the Sun?", "u"))
        .await;

    assert_eq!(envelope.status, EnvelopeStatus::Success);
    assert_eq!(envelope.formatted_content.concise, sentence);
    assert_eq!(envelope.formatted_content.detailed, sentence);
    assert!(envelope.proof.is_empty());
    assert!(envelope.images().is_empty());
}

#[tokio::test]
async fn declared_json_that_does_not_parse_is_treated_as_text() {
    let upstream = MockUpstream::start(vec![MockReply::status(
        200,
        Some("application/json"),
        "not { json",
    )])
    .await;

    let envelope = gateway(&upstream.url).send(&QueryRequest::new("q", "u")).await;

    assert_eq!(envelope.status, EnvelopeStatus::Success);
    assert_eq!(envelope.formatted_content.concise, "not { json");
}

#[tokio::test]
async fn slow_upstream_times_out_and_request_is_abandoned() {
    let upstream = MockUpstream::start(vec![MockReply::Hang]).await;

    let envelope = gateway(&upstream.url)
        .with_timeout(Duration::from_millis(200))
        .send(&QueryRequest::new("q", "u"))
        .await;

    assert_eq!(envelope.status, EnvelopeStatus::Timeout);
    assert_eq!(envelope.formatted_content.concise, TIMEOUT_MESSAGE);
    assert_eq!(envelope.formatted_content.detailed, TIMEOUT_MESSAGE);
    assert!(envelope.images().is_empty());
    assert!(envelope.proof.is_empty());

    tokio::time::timeout(Duration::from_secs(5), upstream.wait_for_disconnect())
        .await
        .expect("timed out request should close its connection");
}

#[tokio::test(start_paused = true)]
async fn default_timeout_is_two_minutes() {
    // Bound but never accepted: the request is queued in the backlog forever.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("listener should bind");
    let url = format!("http://{}", listener.local_addr().expect("local addr"));

    let gateway = gateway(&url);
    assert_eq!(gateway.timeout(), Duration::from_secs(120));

    let started = tokio::time::Instant::now();
    let envelope = gateway.send(&QueryRequest::new("q", "u")).await;

    assert_eq!(envelope.status, EnvelopeStatus::Timeout);
    assert!(started.elapsed() >= Duration::from_secs(120));
    drop(listener);
}

#[tokio::test]
async fn refused_connection_yields_network_error_with_detail() {
    let url = refused_url().await;

    let envelope = gateway(&url).send(&QueryRequest::new("q", "u")).await;

    assert_eq!(envelope.status, EnvelopeStatus::NetworkError);
    assert_eq!(envelope.formatted_content.concise, NETWORK_ERROR_MESSAGE);
    assert!(envelope
        .formatted_content
        .detailed
        .starts_with(NETWORK_ERROR_MESSAGE));
    assert!(envelope.formatted_content.detailed.contains("Details:"));
}

#[tokio::test]
async fn error_status_yields_error_envelope_with_summary() {
    let upstream = MockUpstream::start(vec![MockReply::status(
        500,
        Some("application/json"),
        r#"{"detail":"Agent not initialized"}"#,
    )])
    .await;

    let envelope = gateway(&upstream.url).send(&QueryRequest::new("q", "u")).await;

    assert_eq!(envelope.status, EnvelopeStatus::Error);
    assert_eq!(envelope.formatted_content.concise, UPSTREAM_ERROR_MESSAGE);
    assert!(envelope
        .formatted_content
        .detailed
        .contains("Agent not initialized"));
    assert!(envelope.formatted_content.detailed.contains("500"));
}

#[tokio::test]
async fn cancellation_wins_over_a_pending_exchange() {
    let upstream = MockUpstream::start(vec![MockReply::Hang]).await;
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let envelope = gateway(&upstream.url)
        .send_with_cancel(&QueryRequest::new("q", "u"), &cancel)
        .await;

    assert_eq!(envelope.status, EnvelopeStatus::Error);
    assert_eq!(envelope.formatted_content.concise, CANCELLED_MESSAGE);
}

#[tokio::test]
async fn health_reports_agent_availability() {
    let upstream = MockUpstream::start(vec![MockReply::json(json!({
        "status": "healthy",
        "service": "JustiFi AI",
        "agent_available": true
    }))])
    .await;

    let report = gateway(&upstream.url).health().await;

    assert_eq!(upstream.requests()[0].request_line, "GET /health HTTP/1.1");
    assert_eq!(
        report,
        HealthReport {
            reachable: true,
            status: Some("healthy".into()),
            agent_available: Some(true),
            detail: Some("JustiFi AI".into()),
        }
    );
}

#[tokio::test]
async fn health_marks_unreachable_service() {
    let report = gateway(&refused_url().await).health().await;
    assert!(!report.reachable);
    assert!(report.detail.is_some());
}

#[test]
fn http_error_description_prefers_structured_summary() {
    let status = StatusCode::BAD_GATEWAY;
    assert_eq!(describe_http_error(status, "  "), "HTTP 502 Bad Gateway");
    assert_eq!(
        describe_http_error(status, r#"{"error":{"message":"  upstream\n  down "}}"#),
        "HTTP 502 Bad Gateway: upstream down"
    );
    assert_eq!(
        describe_http_error(status, "<html>oops</html>"),
        "HTTP 502 Bad Gateway: <html>oops</html>"
    );

    let long = "x".repeat(600);
    let described = describe_http_error(status, &long);
    assert!(described.ends_with('…'));
    assert_eq!(described.chars().count(), "HTTP 502 Bad Gateway: ".len() + 500 + 1);
}

#[test]
fn json_content_type_detection_handles_parameters_and_suffixes() {
    assert!(is_json_content_type("application/json"));
    assert!(is_json_content_type("Application/JSON; charset=utf-8"));
    assert!(is_json_content_type("application/problem+json"));
    assert!(!is_json_content_type("text/plain"));
}
