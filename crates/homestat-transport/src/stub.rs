//! Scripted device for tests.
//!
//! [`StubServer`] is an axum app whose fallback handler answers every
//! request with the next [`StubResponse`] of a script and records what it
//! received. Once the script runs out it answers `500`. [`StubServer::start_tls`]
//! serves the same app over rustls with a caller-supplied identity.

use axum::body::{Body, Bytes};
use axum::extract::{Request, State};
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::response::Response;
use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use futures::stream::{self, StreamExt};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::net::TcpListener;

/// One scripted response.
#[derive(Debug, Clone)]
pub struct StubResponse {
    status: u16,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
    delay: Duration,
    hold_open: bool,
}

impl StubResponse {
    /// Empty response with a status code.
    #[must_use]
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Vec::new(),
            delay: Duration::ZERO,
            hold_open: false,
        }
    }

    /// `200` with a JSON body.
    #[must_use]
    pub fn json(body: impl Into<String>) -> Self {
        Self::new(200)
            .header("Content-Type", "application/json")
            .body(body)
    }

    /// Add a response header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Set the body.
    #[must_use]
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into().into_bytes();
        self
    }

    /// Wait before answering.
    #[must_use]
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Stream the body as one chunk and never end the stream.
    #[must_use]
    pub fn hold_open(mut self) -> Self {
        self.hold_open = true;
        self
    }

    fn into_response(self) -> Response {
        let body = if self.hold_open {
            let chunk = Bytes::from(self.body);
            Body::from_stream(
                stream::once(async move { Ok::<_, std::io::Error>(chunk) }).chain(stream::pending()),
            )
        } else {
            Body::from(self.body)
        };

        let mut response = Response::new(body);
        *response.status_mut() =
            StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        for (name, value) in &self.headers {
            if let (Ok(name), Ok(value)) = (
                HeaderName::try_from(name.as_str()),
                HeaderValue::try_from(value.as_str()),
            ) {
                response.headers_mut().append(name, value);
            }
        }
        response
    }
}

/// Request seen by the stub.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    /// Method (`GET`, `POST`)
    pub method: String,
    /// Path with query
    pub path: String,
    /// Headers with lowercased names
    pub headers: Vec<(String, String)>,
    /// Body bytes
    pub body: Vec<u8>,
}

impl RecordedRequest {
    /// First header value with the given (lowercase) name.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Body as text.
    #[must_use]
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[derive(Debug, Default)]
struct Shared {
    script: VecDeque<StubResponse>,
    requests: Vec<RecordedRequest>,
}

type SharedState = Arc<Mutex<Shared>>;

/// Local HTTP(S) server playing a script.
#[derive(Debug)]
pub struct StubServer {
    url: String,
    shared: SharedState,
    task: tokio::task::JoinHandle<()>,
}

impl StubServer {
    /// Serve plain HTTP on a free local port.
    ///
    /// # Panics
    ///
    /// Panics if no local port can be bound.
    pub async fn start(script: Vec<StubResponse>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind stub server");
        let port = listener.local_addr().expect("stub address").port();
        let shared = shared(script);

        let app = router(Arc::clone(&shared));
        let task = tokio::spawn(async move {
            if let Err(err) = axum::serve(listener, app).await {
                tracing::warn!(error = %err, "Stub server stopped");
            }
        });

        Self {
            url: format!("http://127.0.0.1:{port}"),
            shared,
            task,
        }
    }

    /// Serve HTTPS on a free local port with a PEM certificate chain and
    /// key. The URL host is `localhost`.
    ///
    /// # Panics
    ///
    /// Panics if no local port can be bound or the identity is rejected.
    pub async fn start_tls(script: Vec<StubResponse>, cert_pem: &str, key_pem: &str) -> Self {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind stub server");
        listener
            .set_nonblocking(true)
            .expect("non-blocking stub listener");
        let port = listener.local_addr().expect("stub address").port();
        let config = RustlsConfig::from_pem(cert_pem.as_bytes().to_vec(), key_pem.as_bytes().to_vec())
            .await
            .expect("stub TLS identity");
        let shared = shared(script);

        let app = router(Arc::clone(&shared));
        let task = tokio::spawn(async move {
            if let Err(err) = axum_server::from_tcp_rustls(listener, config)
                .serve(app.into_make_service())
                .await
            {
                tracing::warn!(error = %err, "Stub server stopped");
            }
        });

        Self {
            url: format!("https://localhost:{port}"),
            shared,
            task,
        }
    }

    /// Base URL, `http://127.0.0.1:{port}` or `https://localhost:{port}`.
    #[must_use]
    pub fn url(&self) -> String {
        self.url.clone()
    }

    /// Requests received so far.
    #[must_use]
    pub fn requests(&self) -> Vec<RecordedRequest> {
        lock(&self.shared).requests.clone()
    }

    /// Append responses to the script.
    pub fn push(&self, responses: impl IntoIterator<Item = StubResponse>) {
        lock(&self.shared).script.extend(responses);
    }
}

impl Drop for StubServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn shared(script: Vec<StubResponse>) -> SharedState {
    Arc::new(Mutex::new(Shared {
        script: script.into(),
        requests: Vec::new(),
    }))
}

fn lock(shared: &SharedState) -> std::sync::MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

fn router(shared: SharedState) -> Router {
    Router::new().fallback(replay).with_state(shared)
}

async fn replay(State(shared): State<SharedState>, request: Request) -> Response {
    let (parts, body) = request.into_parts();
    let body = axum::body::to_bytes(body, usize::MAX)
        .await
        .unwrap_or_default();

    let recorded = RecordedRequest {
        method: parts.method.to_string(),
        path: parts
            .uri
            .path_and_query()
            .map_or_else(|| parts.uri.path().to_string(), ToString::to_string),
        headers: parts
            .headers
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect(),
        body: body.to_vec(),
    };

    let response = {
        let mut guard = lock(&shared);
        guard.requests.push(recorded);
        guard
            .script
            .pop_front()
            .unwrap_or_else(|| StubResponse::new(500).body("script exhausted"))
    };

    if !response.delay.is_zero() {
        tokio::time::sleep(response.delay).await;
    }
    response.into_response()
}
