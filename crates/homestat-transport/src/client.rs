//! Per-source HTTP client.
//!
//! Device APIs are small: a handful of GET/POST calls against a fixed base
//! URL. [`DeviceClient`] owns the TLS configuration and the timeout of one
//! source and turns every failure into a [`PollError`].

use crate::encoding::basic_authorization;
use homestat_core::{DecodeError, PollError, SourceConfig};
use reqwest::header::{CONTENT_TYPE, SET_COOKIE, WWW_AUTHENTICATE};
use reqwest::{Client, Method, StatusCode};
use std::error::Error as _;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Longest part of an error response body kept in [`PollError::HttpStatus`].
const ERROR_EXCERPT_LEN: usize = 256;

/// Largest response body accepted from a device.
pub const MAX_BODY_LEN: usize = 4 * 1024 * 1024;

/// One request against a device API.
#[derive(Clone)]
pub struct RequestSpec {
    method: Method,
    path: String,
    headers: Vec<(&'static str, String)>,
    body: Option<(&'static str, Vec<u8>)>,
    basic_auth: bool,
    stop_marker: Option<&'static str>,
}

impl RequestSpec {
    fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: Vec::new(),
            body: None,
            basic_auth: false,
            stop_marker: None,
        }
    }

    /// GET request on a path relative to the endpoint.
    #[must_use]
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    /// POST request on a path relative to the endpoint.
    #[must_use]
    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    /// Add a header.
    #[must_use]
    pub fn header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }

    /// Attach a JSON body.
    #[must_use]
    pub fn json_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(("application/json", body.into()));
        self
    }

    /// Attach a form-encoded body.
    #[must_use]
    pub fn form_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(("application/x-www-form-urlencoded", body.into()));
        self
    }

    /// Send the endpoint credentials as HTTP Basic authorization.
    #[must_use]
    pub fn with_basic_auth(mut self) -> Self {
        self.basic_auth = true;
        self
    }

    /// Stop reading the body once `marker` has been received.
    ///
    /// Some embedded web servers keep streaming after the useful part of a
    /// page; the payload then ends at the chunk completing the marker.
    #[must_use]
    pub fn read_until(mut self, marker: &'static str) -> Self {
        self.stop_marker = Some(marker);
        self
    }

    /// Request path.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Request method.
    #[must_use]
    pub fn method(&self) -> &Method {
        &self.method
    }
}

impl fmt::Debug for RequestSpec {
    // Header values and bodies may carry session tokens or passwords.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestSpec")
            .field("method", &self.method)
            .field("path", &self.path)
            .field(
                "headers",
                &self.headers.iter().map(|(name, _)| *name).collect::<Vec<_>>(),
            )
            .field("body_len", &self.body.as_ref().map(|(_, body)| body.len()))
            .field("basic_auth", &self.basic_auth)
            .finish()
    }
}

/// Successful device response.
#[derive(Debug, Clone)]
pub struct RawPayload {
    /// HTTP status code (always 2xx)
    pub status: u16,
    /// `Content-Type` header, if any
    pub content_type: Option<String>,
    /// `Set-Cookie` header values
    pub set_cookies: Vec<String>,
    /// Body bytes
    pub body: Vec<u8>,
}

impl RawPayload {
    /// `Set-Cookie` values as string slices.
    pub fn cookies(&self) -> impl Iterator<Item = &str> {
        self.set_cookies.iter().map(String::as_str)
    }
}

/// HTTP client bound to one source.
#[derive(Clone)]
pub struct DeviceClient {
    client: Client,
    config: Arc<SourceConfig>,
}

impl DeviceClient {
    /// Create a client for a source.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be created or a trust anchor
    /// is rejected by the TLS stack.
    pub fn new(config: Arc<SourceConfig>) -> Result<Self, ClientError> {
        let mut builder = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.timeout)
            .user_agent(concat!("homestat/", env!("CARGO_PKG_VERSION")));

        if config.endpoint.is_https() {
            builder = builder.use_rustls_tls();

            if !config.trust.system_roots {
                builder = builder.tls_built_in_root_certs(false);
            }

            for (index, anchor) in config.trust.anchors.iter().enumerate() {
                let cert = reqwest::Certificate::from_pem(anchor.as_pem()).map_err(|e| {
                    ClientError::Init(format!("failed to parse trust anchor #{index}: {e}"))
                })?;
                builder = builder.add_root_certificate(cert);
            }

            tracing::debug!(
                source = %config.id,
                anchors = config.trust.anchors.len(),
                system_roots = config.trust.system_roots,
                "Configured TLS trust"
            );
        }

        let client = builder
            .build()
            .map_err(|e| ClientError::Init(e.to_string()))?;

        Ok(Self { client, config })
    }

    /// Source this client talks to.
    #[must_use]
    pub fn source(&self) -> &SourceConfig {
        &self.config
    }

    /// Perform one request.
    ///
    /// # Errors
    ///
    /// - [`PollError::Timeout`] when the source timeout elapses
    /// - [`PollError::TlsVerification`] when the certificate is rejected
    /// - [`PollError::Connection`] for other transport failures
    /// - [`PollError::Auth`] on 401/403
    /// - [`PollError::HttpStatus`] on other non-2xx statuses
    /// - [`PollError::Decode`] when the body exceeds [`MAX_BODY_LEN`]
    pub async fn fetch(&self, spec: &RequestSpec) -> Result<RawPayload, PollError> {
        let url = self
            .config
            .endpoint
            .url_for(&spec.path)
            .map_err(|e| PollError::Connection(format!("invalid path {}: {e}", spec.path)))?;

        tracing::debug!(source = %self.config.id, method = %spec.method, path = %spec.path, "HTTP request");

        let mut request = self.client.request(spec.method.clone(), url);
        for (name, value) in &spec.headers {
            request = request.header(*name, value);
        }
        if spec.basic_auth {
            if let Some(credentials) = self.config.endpoint.credentials() {
                request = request.header("Authorization", basic_authorization(credentials));
            }
        }
        if let Some((content_type, body)) = &spec.body {
            request = request
                .header(CONTENT_TYPE, *content_type)
                .body(body.clone());
        }

        let mut response = request
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            let challenge = response.headers().contains_key(WWW_AUTHENTICATE);
            tracing::debug!(source = %self.config.id, path = %spec.path, %status, challenge, "Device refused authorization");
            return Err(PollError::Auth(format!("{status} on {}", spec.path)));
        }
        if !status.is_success() {
            let text = self
                .read_body(&mut response, None)
                .await
                .map(|body| String::from_utf8_lossy(&body).into_owned())
                .unwrap_or_default();
            return Err(PollError::HttpStatus {
                status: status.as_u16(),
                message: excerpt(&text),
            });
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let set_cookies = response
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .map(str::to_string)
            .collect();

        let body = self.read_body(&mut response, spec.stop_marker).await?;

        tracing::debug!(
            source = %self.config.id,
            path = %spec.path,
            status = status.as_u16(),
            body_len = body.len(),
            "HTTP response"
        );

        Ok(RawPayload {
            status: status.as_u16(),
            content_type,
            set_cookies,
            body,
        })
    }

    async fn read_body(
        &self,
        response: &mut reqwest::Response,
        marker: Option<&'static str>,
    ) -> Result<Vec<u8>, PollError> {
        let mut reader = BodyReader::new(MAX_BODY_LEN, marker);
        if let Some(len) = response.content_length() {
            reader.expect(len)?;
        }
        while let Some(chunk) = response.chunk().await.map_err(|e| self.classify(e))? {
            if reader.push(&chunk)? {
                break;
            }
        }
        Ok(reader.finish())
    }

    fn classify(&self, err: reqwest::Error) -> PollError {
        classify_error(err, self.config.timeout)
    }
}

/// Accumulates a response body up to a size limit.
struct BodyReader {
    body: Vec<u8>,
    limit: usize,
    marker: Option<&'static [u8]>,
}

impl BodyReader {
    fn new(limit: usize, marker: Option<&'static str>) -> Self {
        Self {
            body: Vec::new(),
            limit,
            marker: marker.map(str::as_bytes).filter(|m| !m.is_empty()),
        }
    }

    /// Reject a declared length over the limit before reading anything.
    fn expect(&mut self, len: u64) -> Result<(), PollError> {
        match usize::try_from(len) {
            Ok(len) if len <= self.limit => {
                self.body.reserve(len);
                Ok(())
            }
            _ => Err(self.too_large()),
        }
    }

    /// Append a chunk; `true` once the marker has been received.
    fn push(&mut self, chunk: &[u8]) -> Result<bool, PollError> {
        if self.body.len() + chunk.len() > self.limit {
            return Err(self.too_large());
        }
        let start = self.body.len();
        self.body.extend_from_slice(chunk);

        let Some(marker) = self.marker else {
            return Ok(false);
        };
        // Only the new bytes and a marker-sized overlap can complete a match.
        let from = start.saturating_sub(marker.len() - 1);
        Ok(self.body[from..].windows(marker.len()).any(|w| w == marker))
    }

    fn finish(self) -> Vec<u8> {
        self.body
    }

    fn too_large(&self) -> PollError {
        PollError::Decode(DecodeError::new(format!(
            "response body exceeds {} bytes",
            self.limit
        )))
    }
}

/// Map a reqwest failure onto the poll error taxonomy.
fn classify_error(err: reqwest::Error, timeout: Duration) -> PollError {
    if err.is_timeout() {
        return PollError::Timeout(timeout);
    }

    let err = err.without_url();
    let message = describe(&err);
    if is_tls_rejection(&err) || is_tls_failure(&message) {
        PollError::TlsVerification(message)
    } else {
        PollError::Connection(message)
    }
}

/// Flatten an error and its sources into one line.
fn describe(err: &reqwest::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

/// Whether a rustls error sits anywhere in the cause chain.
///
/// hyper hands rustls failures up inside an `io::Error`, whose `source()`
/// skips the wrapped error, so those are unwrapped with `get_ref`.
fn is_tls_rejection(err: &(dyn std::error::Error + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(cause) = current {
        if cause.is::<rustls::Error>() {
            return true;
        }
        if let Some(io) = cause.downcast_ref::<std::io::Error>() {
            if io.get_ref().is_some_and(|inner| inner.is::<rustls::Error>()) {
                return true;
            }
        }
        current = cause.source();
    }
    false
}

/// Fallback for TLS failures that only surface as text.
fn is_tls_failure(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    ["certificate", "unknownissuer", "handshake", "tls"]
        .iter()
        .any(|needle| lower.contains(needle))
}

fn excerpt(text: &str) -> String {
    let trimmed = text.trim();
    match trimmed.char_indices().nth(ERROR_EXCERPT_LEN) {
        Some((cut, _)) => format!("{}...", &trimmed[..cut]),
        None => trimmed.to_string(),
    }
}

/// Errors that can occur when building a client.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ClientError {
    /// Client initialization failed
    #[error("client init error: {0}")]
    Init(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stub::{StubResponse, StubServer};
    use homestat_core::{Endpoint, SourceKind, TrustAnchor, TrustSettings};

    fn source(url: &str, timeout: Duration) -> Arc<SourceConfig> {
        Arc::new(
            SourceConfig::new("test", SourceKind::Deye, Endpoint::parse(url).unwrap())
                .with_timeout(timeout),
        )
    }

    #[test]
    fn client_creation() {
        let client = DeviceClient::new(source("http://127.0.0.1:1", Duration::from_secs(1)));
        assert!(client.is_ok());
    }

    #[test]
    fn https_client_without_system_roots() {
        let config = SourceConfig::new(
            "freebox",
            SourceKind::Freebox,
            Endpoint::parse("https://mafreebox.freebox.fr").unwrap(),
        )
        .with_trust(TrustSettings {
            anchors: Vec::new(),
            system_roots: false,
        });
        assert!(DeviceClient::new(Arc::new(config)).is_ok());
    }

    #[tokio::test]
    async fn fetch_returns_body_and_headers() {
        let server = StubServer::start(vec![StubResponse::new(200)
            .header("Content-Type", "application/json")
            .header("Set-Cookie", "BBOX_ID=abc; Path=/")
            .body("[{\"ok\":true}]")])
        .await;
        let client = DeviceClient::new(source(&server.url(), Duration::from_secs(2))).unwrap();

        let payload = tokio_test::assert_ok!(client.fetch(&RequestSpec::get("/api/v1/device/cpu")).await);

        assert_eq!(payload.status, 200);
        assert_eq!(payload.content_type.as_deref(), Some("application/json"));
        assert_eq!(payload.cookies().collect::<Vec<_>>(), ["BBOX_ID=abc; Path=/"]);
        assert_eq!(payload.body, b"[{\"ok\":true}]");
        assert_eq!(server.requests()[0].path, "/api/v1/device/cpu");
    }

    #[tokio::test]
    async fn unauthorized_is_auth_error() {
        let server = StubServer::start(vec![StubResponse::new(401)]).await;
        let client = DeviceClient::new(source(&server.url(), Duration::from_secs(2))).unwrap();

        let err = tokio_test::assert_err!(client.fetch(&RequestSpec::get("/status.html")).await);
        assert!(matches!(err, PollError::Auth(_)));
    }

    #[tokio::test]
    async fn server_error_is_http_status() {
        let server = StubServer::start(vec![StubResponse::new(503).body("busy")]).await;
        let client = DeviceClient::new(source(&server.url(), Duration::from_secs(2))).unwrap();

        let err = client.fetch(&RequestSpec::get("/")).await.unwrap_err();
        assert!(matches!(
            err,
            PollError::HttpStatus { status: 503, ref message } if message == "busy"
        ));
    }

    #[tokio::test]
    async fn slow_device_times_out() {
        let server = StubServer::start(vec![
            StubResponse::new(200).delay(Duration::from_secs(5))
        ])
        .await;
        let client = DeviceClient::new(source(&server.url(), Duration::from_millis(200))).unwrap();

        let err = client.fetch(&RequestSpec::get("/")).await.unwrap_err();
        assert!(matches!(err, PollError::Timeout(_)));
    }

    #[tokio::test]
    async fn refused_connection() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let client = DeviceClient::new(source(
            &format!("http://127.0.0.1:{port}"),
            Duration::from_secs(2),
        ))
        .unwrap();

        let err = client.fetch(&RequestSpec::get("/")).await.unwrap_err();
        assert!(matches!(err, PollError::Connection(_)));
    }

    #[tokio::test]
    async fn basic_auth_sent_on_request() {
        let server = StubServer::start(vec![StubResponse::new(200).body("ok")]).await;
        let url = server.url().replace("http://", "http://admin:s3cret@");
        let client = DeviceClient::new(source(&url, Duration::from_secs(2))).unwrap();

        client
            .fetch(&RequestSpec::get("/status.html").with_basic_auth())
            .await
            .unwrap();

        let request = &server.requests()[0];
        assert_eq!(
            request.header("authorization"),
            Some("Basic YWRtaW46czNjcmV0")
        );
    }

    #[tokio::test]
    async fn body_reading_stops_at_marker() {
        let server = StubServer::start(vec![StubResponse::new(200)
            .body("var webdata_sn = \"1\";\nvar status_c = \"1\";\n")
            .hold_open()])
        .await;
        let client = DeviceClient::new(source(&server.url(), Duration::from_secs(2))).unwrap();

        let payload = client
            .fetch(&RequestSpec::get("/status.html").read_until("var status_c = "))
            .await
            .unwrap();

        assert!(std::str::from_utf8(&payload.body).unwrap().contains("webdata_sn"));
    }

    #[test]
    fn marker_split_across_chunks_is_found() {
        let mut reader = BodyReader::new(1024, Some("var status_c = "));
        assert!(!reader.push(b"var webdata_sn = \"1\";\nvar sta").unwrap());
        assert!(!reader.push(b"tus").unwrap());
        assert!(reader.push(b"_c = \"1\";").unwrap());
        assert!(reader.finish().starts_with(b"var webdata_sn"));
    }

    #[test]
    fn body_over_limit_is_rejected() {
        let mut reader = BodyReader::new(8, None);
        assert!(!reader.push(b"12345").unwrap());
        let err = reader.push(b"6789").unwrap_err();
        assert_eq!(err.kind(), "decode");

        let mut reader = BodyReader::new(8, Some("end"));
        assert!(reader.expect(9).is_err());
        assert!(reader.expect(8).is_ok());
    }

    #[tokio::test]
    async fn oversized_body_fails_fetch() {
        let server = StubServer::start(vec![
            StubResponse::new(200).body("x".repeat(MAX_BODY_LEN + 1))
        ])
        .await;
        let client = DeviceClient::new(source(&server.url(), Duration::from_secs(5))).unwrap();

        let err = client.fetch(&RequestSpec::get("/")).await.unwrap_err();
        assert!(matches!(err, PollError::Decode(_)));
    }

    #[tokio::test]
    async fn endless_body_without_marker_times_out() {
        let server = StubServer::start(vec![StubResponse::new(200)
            .body("var webdata_sn = \"1\";\n")
            .hold_open()])
        .await;
        let client = DeviceClient::new(source(&server.url(), Duration::from_millis(300))).unwrap();

        let err = client
            .fetch(&RequestSpec::get("/status.html").read_until("never sent"))
            .await
            .unwrap_err();
        assert!(matches!(err, PollError::Timeout(_)));
    }

    struct TestPki {
        ca_pem: String,
        cert_pem: String,
        key_pem: String,
    }

    /// A CA and a `localhost` leaf signed by it.
    fn test_pki() -> TestPki {
        let mut ca_params = rcgen::CertificateParams::default();
        ca_params
            .distinguished_name
            .push(rcgen::DnType::CommonName, "homestat test CA");
        ca_params.is_ca = rcgen::IsCa::Ca(rcgen::BasicConstraints::Unconstrained);
        ca_params.alg = &rcgen::PKCS_ECDSA_P256_SHA256;
        let ca = rcgen::Certificate::from_params(ca_params).unwrap();

        let mut leaf_params = rcgen::CertificateParams::new(vec!["localhost".to_string()]);
        leaf_params
            .distinguished_name
            .push(rcgen::DnType::CommonName, "localhost");
        leaf_params.alg = &rcgen::PKCS_ECDSA_P256_SHA256;
        let leaf = rcgen::Certificate::from_params(leaf_params).unwrap();

        TestPki {
            ca_pem: ca.serialize_pem().unwrap(),
            cert_pem: leaf.serialize_pem_with_signer(&ca).unwrap(),
            key_pem: leaf.serialize_private_key_pem(),
        }
    }

    fn tls_source(server: &StubServer, anchors: Vec<TrustAnchor>, system_roots: bool) -> Arc<SourceConfig> {
        Arc::new(
            SourceConfig::new(
                "freebox",
                SourceKind::Freebox,
                Endpoint::parse(&server.url()).unwrap(),
            )
            .with_timeout(Duration::from_secs(5))
            .with_trust(TrustSettings {
                anchors,
                system_roots,
            }),
        )
    }

    #[tokio::test]
    async fn untrusted_certificate_is_tls_verification_error() {
        let pki = test_pki();
        let server = StubServer::start_tls(
            vec![StubResponse::json("{}")],
            &pki.cert_pem,
            &pki.key_pem,
        )
        .await;

        for system_roots in [true, false] {
            let client = DeviceClient::new(tls_source(&server, Vec::new(), system_roots)).unwrap();
            let err = client.fetch(&RequestSpec::get("/api/v8/login/")).await.unwrap_err();
            assert_eq!(err.kind(), "tls_verification", "{err}");
        }
        assert!(server.requests().is_empty());
    }

    #[tokio::test]
    async fn trust_anchor_accepts_device_certificate() {
        let pki = test_pki();
        let server = StubServer::start_tls(
            vec![StubResponse::json("{\"success\":true}"), StubResponse::json("{}")],
            &pki.cert_pem,
            &pki.key_pem,
        )
        .await;
        let anchor = TrustAnchor::from_pem(pki.ca_pem.as_bytes()).unwrap();

        for system_roots in [true, false] {
            let client =
                DeviceClient::new(tls_source(&server, vec![anchor.clone()], system_roots)).unwrap();
            let payload = tokio_test::assert_ok!(client.fetch(&RequestSpec::get("/api/v8/login/")).await);
            assert_eq!(payload.status, 200);
        }
        assert_eq!(server.requests().len(), 2);
        assert_eq!(server.requests()[0].path, "/api/v8/login/");
    }

    #[test]
    fn tls_failures_detected_from_message() {
        assert!(is_tls_failure(
            "error sending request: invalid peer certificate: UnknownIssuer"
        ));
        assert!(!is_tls_failure("error trying to connect: Connection refused"));
    }

    #[test]
    fn long_error_bodies_are_cut() {
        let long = "x".repeat(1000);
        assert_eq!(excerpt(&long).len(), ERROR_EXCERPT_LEN + 3);
        assert_eq!(excerpt("  short \n"), "short");
    }
}
