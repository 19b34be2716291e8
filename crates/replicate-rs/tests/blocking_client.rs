//! Blocking client against a scripted local server.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use common::{MockServer, Reply, failed_prediction, fast_retry, prediction};
use replicate_rs::blocking::Client;
use replicate_rs::{ClientConfig, CreatePrediction, Cursor, Error, EventType, Status, Transport};
use serde_json::{Value, json};

fn client(server: &MockServer) -> Client {
    Client::new(server.config()).unwrap()
}

// ── Retry transport ────────────────────────────────────────────────

#[test]
fn transient_status_is_retried_until_success() {
    let server = MockServer::start();
    server
        .on("GET", "/v1/predictions/p1", Reply::status(503))
        .on("GET", "/v1/predictions/p1", Reply::status(503))
        .on("GET", "/v1/predictions/p1", Reply::ok(prediction(server.url(), "p1", "starting", Value::Null)));

    let p = client(&server).predictions().get("p1").unwrap();
    assert_eq!(p.status, Status::Starting);
    assert_eq!(server.hits("GET", "/v1/predictions/p1"), 3);
}

#[test]
fn exhausted_retries_surface_the_last_status() {
    let server = MockServer::start();
    server.on("GET", "/v1/predictions/p1", Reply::status(503));
    let client = Client::new(server.config().with_retry(fast_retry(3))).unwrap();

    let err = client.predictions().get("p1").unwrap_err();
    assert_eq!(err.status().map(|s| s.as_u16()), Some(503));
    assert_eq!(server.hits("GET", "/v1/predictions/p1"), 3);
}

#[test]
fn create_is_not_retried_on_server_error() {
    let server = MockServer::start();
    server.on("POST", "/v1/predictions", Reply::status(503));

    let err = client(&server)
        .predictions()
        .create(CreatePrediction::new(json!({})).with_version("v1"))
        .unwrap_err();
    assert!(matches!(err, Error::Api(ref api) if api.status == 503), "{err:?}");
    assert_eq!(server.hits("POST", "/v1/predictions"), 1);
}

#[test]
fn create_is_retried_on_rate_limit_with_retry_after() {
    let server = MockServer::start();
    server
        .on("POST", "/v1/predictions", Reply::status(429).with_header("retry-after", "0"))
        .on("POST", "/v1/predictions", Reply::json(201, prediction(server.url(), "p1", "starting", Value::Null)));

    let p = client(&server)
        .predictions()
        .create(CreatePrediction::new(json!({"prompt": "x"})).with_version("v1"))
        .unwrap();
    assert_eq!(p.id, "p1");
    assert_eq!(server.hits("POST", "/v1/predictions"), 2);
}

#[test]
fn problem_details_become_api_error() {
    let server = MockServer::start();
    server.on(
        "GET",
        "/v1/models/acme/missing",
        Reply::json(
            404,
            json!({"type": "about:blank", "title": "Not found", "status": 404, "detail": "No such model"}),
        ),
    );

    match client(&server).models().get("acme/missing").unwrap_err() {
        Error::Api(api) => {
            assert_eq!(api.status, 404);
            assert_eq!(api.title.as_deref(), Some("Not found"));
            assert_eq!(api.detail.as_deref(), Some("No such model"));
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(server.hits("GET", "/v1/models/acme/missing"), 1);
}

/// Counts every request handed to the network.
struct CountingTransport {
    inner: reqwest::blocking::Client,
    sends: Arc<AtomicUsize>,
}

impl Transport for CountingTransport {
    fn send(&self, request: reqwest::blocking::Request) -> reqwest::Result<reqwest::blocking::Response> {
        self.sends.fetch_add(1, Ordering::SeqCst);
        self.inner.execute(request)
    }
}

fn unreachable_client(max_attempts: u32) -> (Client, Arc<AtomicUsize>) {
    let sends = Arc::new(AtomicUsize::new(0));
    let transport = CountingTransport {
        inner: reqwest::blocking::Client::new(),
        sends: sends.clone(),
    };
    let config = ClientConfig::default()
        .with_api_token("r8_test_token")
        .with_base_url("http://127.0.0.1:1")
        .with_retry(fast_retry(max_attempts));
    (Client::with_transport(config, transport).unwrap(), sends)
}

#[test]
fn connection_failures_are_retried_for_reads() {
    let (client, sends) = unreachable_client(4);
    let err = client.accounts().current().unwrap_err();
    assert!(matches!(err, Error::Transport(_)), "{err:?}");
    assert_eq!(sends.load(Ordering::SeqCst), 4);
}

#[test]
fn connection_failures_are_not_retried_for_creates() {
    let (client, sends) = unreachable_client(4);
    let err = client
        .predictions()
        .create(CreatePrediction::new(json!({})).with_version("v1"))
        .unwrap_err();
    assert!(matches!(err, Error::Transport(_)), "{err:?}");
    assert_eq!(sends.load(Ordering::SeqCst), 1);
}

// ── Requests ───────────────────────────────────────────────────────

#[test]
fn missing_token_fails_before_sending() {
    let server = MockServer::start();
    let client = Client::new(ClientConfig::default().with_base_url(server.url())).unwrap();

    let err = client.accounts().current().unwrap_err();
    assert!(matches!(err, Error::Config(_)), "{err:?}");
    assert!(server.requests().is_empty());
}

#[test]
fn requests_carry_auth_and_sync_wait() {
    let server = MockServer::start();
    server.on(
        "POST",
        "/v1/models/acme/echo/predictions",
        Reply::json(201, prediction(server.url(), "p1", "succeeded", json!("hi"))),
    );

    let p = client(&server)
        .models()
        .predictions()
        .create("acme/echo", CreatePrediction::new(json!({"text": "hi"})).with_wait(10))
        .unwrap();
    assert_eq!(p.status, Status::Succeeded);

    let requests = server.requests();
    let sent = &requests[0];
    assert_eq!(sent.header("authorization"), Some("Bearer r8_test_token"));
    assert_eq!(sent.header("prefer"), Some("wait=10"));
    assert!(sent.header("user-agent").is_some_and(|ua| ua.starts_with("replicate-rs/")));
    assert_eq!(sent.json(), json!({"input": {"text": "hi"}}));
}

// ── Pagination ─────────────────────────────────────────────────────

#[test]
fn pages_follow_next_links_until_exhausted() {
    let server = MockServer::start();
    let base = server.url();
    server
        .on(
            "GET",
            "/v1/predictions",
            Reply::ok(json!({
                "results": [prediction(base, "p1", "succeeded", Value::Null)],
                "next": format!("{base}/v1/predictions?cursor=c2"),
            })),
        )
        .on(
            "GET",
            "/v1/predictions",
            Reply::ok(json!({
                "results": [prediction(base, "p2", "failed", Value::Null)],
                "next": format!("{base}/v1/predictions?cursor=c3"),
            })),
        )
        .on(
            "GET",
            "/v1/predictions",
            Reply::ok(json!({"results": [prediction(base, "p3", "canceled", Value::Null)], "next": null})),
        );

    let client = client(&server);
    let ids: Vec<String> = client
        .predictions()
        .pages()
        .map(|page| page.unwrap())
        .flat_map(|page| page.results)
        .map(|p| p.id)
        .collect();
    assert_eq!(ids, ["p1", "p2", "p3"]);

    let queries: Vec<Option<String>> = server.requests().into_iter().map(|r| r.query).collect();
    assert_eq!(queries, [None, Some("cursor=c2".to_string()), Some("cursor=c3".to_string())]);
}

#[test]
fn empty_listing_yields_one_empty_page() {
    let server = MockServer::start();
    server.on("GET", "/v1/trainings", Reply::ok(json!({"results": [], "next": null})));

    let client = client(&server);
    let pages: Vec<_> = client.trainings().pages().collect::<Result<_, _>>().unwrap();
    assert_eq!(pages.len(), 1);
    assert!(pages[0].is_empty());
}

#[test]
fn listing_from_end_cursor_is_rejected() {
    let server = MockServer::start();
    let err = client(&server).predictions().list(Cursor::End).unwrap_err();
    assert!(matches!(err, Error::Config(_)));
    assert!(server.requests().is_empty());
}

// ── Lifecycle ──────────────────────────────────────────────────────

#[test]
fn run_polls_until_succeeded() {
    let server = MockServer::start();
    let base = server.url();
    server
        .on(
            "POST",
            "/v1/models/acme/echo/predictions",
            Reply::json(201, prediction(base, "p1", "starting", Value::Null)),
        )
        .on("GET", "/v1/predictions/p1", Reply::ok(prediction(base, "p1", "processing", Value::Null)))
        .on("GET", "/v1/predictions/p1", Reply::ok(prediction(base, "p1", "succeeded", json!("y"))));

    let output = client(&server).run("acme/echo", json!({"text": "y"})).unwrap();
    assert_eq!(output, json!("y"));
    assert_eq!(server.hits("GET", "/v1/predictions/p1"), 2);
}

#[test]
fn run_reports_failed_prediction() {
    let server = MockServer::start();
    let base = server.url();
    server
        .on(
            "POST",
            "/v1/models/acme/echo/predictions",
            Reply::json(201, prediction(base, "p1", "processing", Value::Null)),
        )
        .on("GET", "/v1/predictions/p1", Reply::ok(failed_prediction(base, "p1", "boom")));

    match client(&server).run("acme/echo", json!({})).unwrap_err() {
        Error::Model(e) => {
            assert_eq!(e.id(), "p1");
            assert_eq!(e.status(), Status::Failed);
            assert_eq!(e.error().as_deref(), Some("boom"));
            assert!(e.logs().is_some_and(|logs| logs.contains("Traceback")));
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn wait_does_not_fail_on_failed_prediction() {
    let server = MockServer::start();
    let base = server.url();
    server.on("GET", "/v1/predictions/p1", Reply::ok(failed_prediction(base, "p1", "boom")));

    let client = client(&server);
    let predictions = client.predictions();
    let mut p = serde_json::from_value(prediction(base, "p1", "starting", Value::Null)).unwrap();
    predictions.wait(&mut p).unwrap();
    assert_eq!(p.status, Status::Failed);
}

#[test]
fn cancel_after_completion_keeps_terminal_state() {
    let server = MockServer::start();
    let base = server.url();
    server
        .on("GET", "/v1/predictions/p1", Reply::ok(prediction(base, "p1", "succeeded", json!("done"))))
        .on("POST", "/v1/predictions/p1/cancel", Reply::ok(prediction(base, "p1", "canceled", Value::Null)));

    let client = client(&server);
    let predictions = client.predictions();
    let mut p = predictions.get("p1").unwrap();
    predictions.cancel(&mut p).unwrap();
    assert_eq!(p.status, Status::Succeeded);
    assert_eq!(p.output, Some(json!("done")));
}

#[test]
fn output_iterator_delivers_each_chunk_once() {
    let server = MockServer::start();
    let base = server.url();
    server
        .on("GET", "/v1/predictions/p1", Reply::ok(prediction(base, "p1", "processing", json!(["a"]))))
        .on("GET", "/v1/predictions/p1", Reply::ok(prediction(base, "p1", "processing", json!(["a", "b"]))))
        .on("GET", "/v1/predictions/p1", Reply::ok(prediction(base, "p1", "succeeded", json!(["a", "b", "c"]))));

    let client = client(&server);
    let start = serde_json::from_value(prediction(base, "p1", "starting", Value::Null)).unwrap();
    let chunks: Vec<Value> = client
        .predictions()
        .output_iterator(start)
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(chunks, [json!("a"), json!("b"), json!("c")]);
}

#[test]
fn run_concatenates_iterator_output() {
    let server = MockServer::start();
    let base = server.url();
    server
        .on(
            "POST",
            "/v1/predictions",
            Reply::json(201, prediction(base, "p1", "starting", Value::Null)),
        )
        .on(
            "GET",
            "/v1/models/acme/llm/versions/v1",
            Reply::ok(json!({
                "id": "v1",
                "cog_version": "0.9.4",
                "openapi_schema": {"components": {"schemas": {"Output": {
                    "type": "array",
                    "items": {"type": "string"},
                    "x-cog-array-type": "iterator",
                    "x-cog-array-display": "concatenate",
                }}}},
            })),
        )
        .on("GET", "/v1/predictions/p1", Reply::ok(prediction(base, "p1", "succeeded", json!(["Hel", "lo"]))));

    let output = client(&server).run("acme/llm:v1", json!({"prompt": "hi"})).unwrap();
    assert_eq!(output, json!("Hello"));
    assert_eq!(server.requests()[0].json()["version"], "v1");
}

// ── Streaming ──────────────────────────────────────────────────────

fn streaming_prediction(base: &str) -> Value {
    let mut p = prediction(base, "p1", "starting", Value::Null);
    p["urls"]["stream"] = json!(format!("{base}/v1/streams/p1"));
    p
}

#[test]
fn stream_yields_output_until_done() {
    let server = MockServer::start();
    server
        .on("POST", "/v1/models/acme/llm/predictions", Reply::json(201, streaming_prediction(server.url())))
        .on(
            "GET",
            "/v1/streams/p1",
            Reply::sse("data: a\n\nevent: logs\ndata: loading\n\ndata: b\n\nevent: done\ndata: {}\n\n"),
        );

    let client = client(&server);
    let mut stream = client.stream("acme/llm", json!({"prompt": "hi"})).unwrap();
    let events: Vec<_> = stream.by_ref().collect::<Result<_, _>>().unwrap();
    let output: Vec<&str> = events
        .iter()
        .filter(|e| e.event == EventType::Output)
        .map(|e| e.data.as_str())
        .collect();
    assert_eq!(output, ["a", "b"]);
    assert_eq!(events.len(), 3);
    assert!(stream.completed());

    assert_eq!(server.requests()[0].json()["stream"], true);
    assert_eq!(server.requests()[1].header("accept"), Some("text/event-stream"));
}

#[test]
fn stream_error_event_becomes_error() {
    let server = MockServer::start();
    server
        .on("POST", "/v1/models/acme/llm/predictions", Reply::json(201, streaming_prediction(server.url())))
        .on("GET", "/v1/streams/p1", Reply::sse("data: a\n\nevent: error\ndata: CUDA out of memory\n\n"));

    let client = client(&server);
    let mut stream = client.stream("acme/llm", json!({})).unwrap();
    assert_eq!(stream.next().unwrap().unwrap().data, "a");
    match stream.next() {
        Some(Err(Error::Stream(message))) => assert_eq!(message, "CUDA out of memory"),
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn stream_with_wrong_content_type_is_rejected() {
    let server = MockServer::start();
    server
        .on("POST", "/v1/models/acme/llm/predictions", Reply::json(201, streaming_prediction(server.url())))
        .on("GET", "/v1/streams/p1", Reply::ok(json!({"not": "a stream"})));

    let err = client(&server).stream("acme/llm", json!({})).unwrap_err();
    assert!(matches!(err, Error::Stream(_)), "{err:?}");
}

#[test]
fn stream_without_link_is_a_config_error() {
    let server = MockServer::start();
    let client = client(&server);
    let p = serde_json::from_value(prediction(server.url(), "p1", "starting", Value::Null)).unwrap();
    let err = client.predictions().stream(&p).unwrap_err();
    assert!(matches!(err, Error::Config(_)));
}

#[test]
fn stream_ending_without_done_is_incomplete() {
    let server = MockServer::start();
    server
        .on("POST", "/v1/models/acme/llm/predictions", Reply::json(201, streaming_prediction(server.url())))
        .on("GET", "/v1/streams/p1", Reply::sse("data: a\n\n"));

    let client = client(&server);
    let mut stream = client.stream("acme/llm", json!({})).unwrap();
    assert_eq!(stream.next().unwrap().unwrap().data, "a");
    assert!(stream.next().is_none());
    assert!(stream.next().is_none());
    assert!(!stream.completed());
}

#[test]
fn dropped_connection_is_a_stream_error() {
    let server = MockServer::start();
    server
        .on("POST", "/v1/models/acme/llm/predictions", Reply::json(201, streaming_prediction(server.url())))
        .on("GET", "/v1/streams/p1", Reply::sse("data: a\n\n").aborting());

    let client = client(&server);
    let mut stream = client.stream("acme/llm", json!({})).unwrap();
    let items: Vec<_> = stream.by_ref().collect();
    match items.last() {
        Some(Err(Error::Stream(message))) => assert!(message.starts_with("connection lost"), "{message}"),
        other => panic!("unexpected {other:?}"),
    }
    assert!(stream.next().is_none());
    assert!(!stream.completed());
}

#[test]
fn closed_stream_yields_nothing_more() {
    let server = MockServer::start();
    server
        .on("POST", "/v1/models/acme/llm/predictions", Reply::json(201, streaming_prediction(server.url())))
        .on("GET", "/v1/streams/p1", Reply::sse("data: a\n\ndata: b\n\nevent: done\ndata: {}\n\n"));

    let client = client(&server);
    let mut stream = client.stream("acme/llm", json!({})).unwrap();
    assert_eq!(stream.next().unwrap().unwrap().data, "a");
    stream.close();
    assert!(stream.next().is_none());
    assert!(!stream.completed());
}

#[test]
fn dropping_a_stream_early_leaves_the_client_usable() {
    let server = MockServer::start();
    server
        .on("POST", "/v1/models/acme/llm/predictions", Reply::json(201, streaming_prediction(server.url())))
        .on("GET", "/v1/streams/p1", Reply::sse("data: a\n\ndata: b\n\nevent: done\ndata: {}\n\n"))
        .on("GET", "/v1/predictions/p1", Reply::ok(prediction(server.url(), "p1", "processing", Value::Null)));

    let client = client(&server);
    let mut stream = client.stream("acme/llm", json!({})).unwrap();
    assert_eq!(stream.next().unwrap().unwrap().data, "a");
    drop(stream);

    let p = client.predictions().get("p1").unwrap();
    assert_eq!(p.status, Status::Processing);
}

// ── Webhooks ───────────────────────────────────────────────────────

#[test]
fn default_webhook_secret_is_fetched() {
    let server = MockServer::start();
    server.on("GET", "/v1/webhooks/default/secret", Reply::ok(json!({"key": "whsec_abc"})));

    let secret = client(&server).webhooks().default_secret().unwrap();
    assert_eq!(secret.key, "whsec_abc");
    assert_eq!(server.hits("GET", "/v1/webhooks/default/secret"), 1);
}

// ── Trainings ──────────────────────────────────────────────────────

#[test]
fn training_lifecycle() {
    let server = MockServer::start();
    let training = |status: &str| {
        json!({
            "id": "t1",
            "version": "v1",
            "destination": "me/tuned",
            "status": status,
            "input": {"epochs": 1},
            "urls": {"get": format!("{}/v1/trainings/t1", server.url())},
        })
    };
    server
        .on("POST", "/v1/models/acme/base/versions/v1/trainings", Reply::json(201, training("starting")))
        .on("GET", "/v1/trainings/t1", Reply::ok(training("processing")))
        .on("GET", "/v1/trainings/t1", Reply::ok(training("succeeded")));

    let client = client(&server);
    let trainings = client.trainings();
    let mut t = trainings
        .create("acme/base:v1", replicate_rs::CreateTraining::new("me/tuned", json!({"epochs": 1})))
        .unwrap();
    trainings.wait(&mut t).unwrap();
    assert_eq!(t.status, Status::Succeeded);
    assert_eq!(server.requests()[0].json()["destination"], "me/tuned");
}
