//! Scripted API server for integration tests.
//!
//! Runs a real axum server on a random local port, on its own thread and
//! runtime, so both blocking and async tests can talk to it. Each
//! `(method, path)` has a queue of replies; the last reply of a queue repeats
//! forever. Every request is recorded for assertions.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use futures::{StreamExt, stream};
use replicate_rs::{ClientConfig, RetryConfig};
use serde_json::{Value, json};

#[derive(Debug, Clone)]
pub struct Reply {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
    /// Reset the connection after sending `body`.
    pub abort: bool,
}

impl Reply {
    pub fn json(status: u16, body: Value) -> Self {
        Self {
            status,
            headers: vec![("content-type".into(), "application/json".into())],
            body: body.to_string(),
            abort: false,
        }
    }

    pub fn ok(body: Value) -> Self {
        Self::json(200, body)
    }

    pub fn status(status: u16) -> Self {
        Self::json(status, json!({"status": status, "detail": "scripted failure"}))
    }

    /// An event stream whose body is `events`, already framed.
    pub fn sse(events: &str) -> Self {
        Self {
            status: 200,
            headers: vec![("content-type".into(), "text/event-stream".into())],
            body: events.to_string(),
            abort: false,
        }
    }

    /// Send the body, then fail the connection instead of ending it cleanly.
    pub fn aborting(mut self) -> Self {
        self.abort = true;
        self
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

impl IntoResponse for Reply {
    fn into_response(self) -> Response {
        let body = if self.abort {
            let head = Bytes::from(self.body);
            // The pause lets the first chunk reach the client before the reset.
            let chunks = stream::once(async move { Ok::<_, io::Error>(head) }).chain(stream::once(async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Err(io::Error::new(io::ErrorKind::ConnectionReset, "scripted reset"))
            }));
            Body::from_stream(chunks)
        } else {
            Body::from(self.body)
        };
        let mut response = Response::new(body);
        *response.status_mut() = StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        for (name, value) in self.headers {
            if let (Ok(name), Ok(value)) = (name.parse::<HeaderName>(), value.parse::<HeaderValue>()) {
                response.headers_mut().insert(name, value);
            }
        }
        response
    }
}

#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: String,
    pub path: String,
    pub query: Option<String>,
    pub headers: HeaderMap,
    pub body: String,
}

impl Recorded {
    pub fn json(&self) -> Value {
        serde_json::from_str(&self.body).unwrap_or(Value::Null)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

#[derive(Default)]
struct Script {
    routes: HashMap<(String, String), VecDeque<Reply>>,
    requests: Vec<Recorded>,
}

type Shared = Arc<Mutex<Script>>;

pub struct MockServer {
    base: String,
    script: Shared,
    shutdown: Option<tokio::sync::oneshot::Sender<()>>,
}

impl MockServer {
    pub fn start() -> Self {
        let script: Shared = Arc::default();
        let (addr_tx, addr_rx) = std::sync::mpsc::channel();
        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
        let state = script.clone();
        std::thread::spawn(move || {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .worker_threads(2)
                .enable_all()
                .build()
                .unwrap();
            runtime.block_on(async move {
                let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
                addr_tx.send(listener.local_addr().unwrap()).unwrap();
                let app = Router::new().fallback(handle).with_state(state);
                axum::serve(listener, app)
                    .with_graceful_shutdown(async {
                        let _ = shutdown_rx.await;
                    })
                    .await
                    .unwrap();
            });
        });
        let addr = addr_rx.recv_timeout(Duration::from_secs(10)).unwrap();
        Self {
            base: format!("http://{addr}"),
            script,
            shutdown: Some(shutdown_tx),
        }
    }

    pub fn url(&self) -> &str {
        &self.base
    }

    /// Queue `reply` for `method path`.
    pub fn on(&self, method: &str, path: &str, reply: Reply) -> &Self {
        self.script
            .lock()
            .unwrap()
            .routes
            .entry((method.to_uppercase(), path.to_string()))
            .or_default()
            .push_back(reply);
        self
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.script.lock().unwrap().requests.clone()
    }

    pub fn hits(&self, method: &str, path: &str) -> usize {
        self.requests()
            .iter()
            .filter(|r| r.method == method.to_uppercase() && r.path == path)
            .count()
    }

    /// Client configuration pointed at this server with fast polling and
    /// near-zero backoff.
    pub fn config(&self) -> ClientConfig {
        ClientConfig::default()
            .with_api_token("r8_test_token")
            .with_base_url(self.base.clone())
            .with_poll_interval(Duration::from_millis(5))
            .with_max_poll_interval(Duration::from_millis(20))
            .with_retry(fast_retry(10))
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

pub fn fast_retry(max_attempts: u32) -> RetryConfig {
    RetryConfig {
        max_attempts,
        backoff_factor: Duration::from_millis(1),
        max_backoff_wait: Duration::from_millis(20),
        ..RetryConfig::default()
    }
}

async fn handle(State(script): State<Shared>, method: Method, uri: Uri, headers: HeaderMap, body: Bytes) -> Response {
    let path = uri.path().to_string();
    let reply = {
        let mut script = script.lock().unwrap();
        script.requests.push(Recorded {
            method: method.to_string(),
            path: path.clone(),
            query: uri.query().map(str::to_string),
            headers,
            body: String::from_utf8_lossy(&body).into_owned(),
        });
        match script.routes.get_mut(&(method.to_string(), path)) {
            Some(queue) if queue.len() > 1 => queue.pop_front(),
            Some(queue) => queue.front().cloned(),
            None => None,
        }
    };
    match reply {
        Some(reply) => reply.into_response(),
        None => Reply::json(404, json!({"title": "Not found", "status": 404})).into_response(),
    }
}

// ── Fixtures ───────────────────────────────────────────────────────

pub fn prediction(base: &str, id: &str, status: &str, output: Value) -> Value {
    json!({
        "id": id,
        "version": "v1",
        "status": status,
        "input": {"prompt": "x"},
        "output": output,
        "logs": "",
        "error": null,
        "created_at": "2024-01-01T00:00:00Z",
        "urls": {
            "get": format!("{base}/v1/predictions/{id}"),
            "cancel": format!("{base}/v1/predictions/{id}/cancel"),
        }
    })
}

pub fn failed_prediction(base: &str, id: &str, error: &str) -> Value {
    let mut p = prediction(base, id, "failed", Value::Null);
    p["error"] = json!(error);
    p["logs"] = json!("Traceback...\n");
    p
}
