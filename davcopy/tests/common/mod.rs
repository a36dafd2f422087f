//! Shared harness: scripted HTTP and HTTPS endpoints on loopback.

#![allow(dead_code)]

use std::io::{self, Cursor, Read, Seek, SeekFrom};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use davcopy::ClientParameters;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use hyper_util::service::TowerToHyperService;
use rustls::ServerConfig;
use rustls::pki_types::CertificateDer;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;

/// A request as seen by a [`MockServer`]
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: Method,
    pub path: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).expect("request body should be JSON")
    }
}

type Responder = dyn Fn(&RecordedRequest, usize) -> Response + Send + Sync;

struct MockState {
    requests: Mutex<Vec<RecordedRequest>>,
    client_certs: Mutex<Vec<CertificateDer<'static>>>,
    respond: Box<Responder>,
}

/// Loopback server answering every request through a closure that gets
/// the request and its zero-based arrival index.
pub struct MockServer {
    pub addr: SocketAddr,
    scheme: &'static str,
    state: Arc<MockState>,
}

impl MockServer {
    pub async fn start<F>(respond: F) -> Self
    where
        F: Fn(&RecordedRequest, usize) -> Response + Send + Sync + 'static,
    {
        let (listener, state, app) = bind(respond).await;
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("mock server");
        });

        Self {
            addr,
            scheme: "http",
            state,
        }
    }

    /// Like [`MockServer::start`], behind TLS. The leaf certificate of every
    /// client that authenticates is recorded.
    pub async fn start_tls<F>(tls: Arc<ServerConfig>, respond: F) -> Self
    where
        F: Fn(&RecordedRequest, usize) -> Response + Send + Sync + 'static,
    {
        let (listener, state, app) = bind(respond).await;
        let addr = listener.local_addr().expect("local addr");
        let acceptor = TlsAcceptor::from(tls);
        let shared = state.clone();

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let acceptor = acceptor.clone();
                let app = app.clone();
                let state = shared.clone();
                tokio::spawn(async move {
                    // Rejected handshakes are an expected outcome in some tests.
                    let Ok(stream) = acceptor.accept(stream).await else {
                        return;
                    };
                    if let Some(chain) = stream.get_ref().1.peer_certificates() {
                        state
                            .client_certs
                            .lock()
                            .unwrap()
                            .extend(chain.first().cloned());
                    }
                    let _ = auto::Builder::new(TokioExecutor::new())
                        .serve_connection(TokioIo::new(stream), TowerToHyperService::new(app))
                        .await;
                });
            }
        });

        Self {
            addr,
            scheme: "https",
            state,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}://{}{}", self.scheme, self.addr, path)
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.state.requests.lock().unwrap().len()
    }

    pub fn client_certificates(&self) -> Vec<CertificateDer<'static>> {
        self.state.client_certs.lock().unwrap().clone()
    }
}

async fn bind<F>(respond: F) -> (TcpListener, Arc<MockState>, Router)
where
    F: Fn(&RecordedRequest, usize) -> Response + Send + Sync + 'static,
{
    let state = Arc::new(MockState {
        requests: Mutex::new(Vec::new()),
        client_certs: Mutex::new(Vec::new()),
        respond: Box::new(respond),
    });

    let app = Router::new()
        .fallback(handle)
        .with_state(state.clone());

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind loopback");
    (listener, state, app)
}

/// Answers one request per connection with `status` and a `Content-Length`
/// promising more body than is sent before the connection closes.
pub async fn start_truncated(status: u16, reason: &str) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind loopback");
    let addr = listener.local_addr().expect("local addr");
    let head = format!(
        "HTTP/1.1 {status} {reason}\r\nContent-Type: text/plain\r\nContent-Length: 1000\r\n\r\npartial"
    );

    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            read_request(&mut stream).await;
            let _ = stream.write_all(head.as_bytes()).await;
            let _ = stream.shutdown().await;
        }
    });
    addr
}

// Consumes headers and a Content-Length body so closing the socket does not
// reset the connection under the client.
async fn read_request(stream: &mut tokio::net::TcpStream) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        if let Some(end) = find(&buf, b"\r\n\r\n") {
            let head = String::from_utf8_lossy(&buf[..end]).to_ascii_lowercase();
            let length = head
                .lines()
                .find_map(|line| line.strip_prefix("content-length:"))
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if buf.len() >= end + 4 + length {
                return;
            }
        }
        match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

async fn handle(
    State(state): State<Arc<MockState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request = RecordedRequest {
        method,
        path: uri.path().to_string(),
        headers,
        body,
    };
    let index = {
        let mut requests = state.requests.lock().unwrap();
        requests.push(request.clone());
        requests.len() - 1
    };
    (state.respond)(&request, index)
}

pub fn redirect_to(location: &str) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, location.to_string())]).into_response()
}

pub fn status(code: StatusCode) -> Response {
    code.into_response()
}

pub fn token_reply(token: &str) -> Response {
    let body = serde_json::json!({
        "macaroon": token,
        "uri": {
            "targetWithMacaroon": format!("https://dest/file?authz={}", token),
            "baseWithMacaroon": format!("https://dest/?authz={}", token),
            "target": "https://dest/file",
            "base": "https://dest/",
        }
    });
    (StatusCode::OK, axum::Json(body)).into_response()
}

/// Parameters for plain-HTTP tests: no client certificate, empty CA directory.
pub fn anonymous_params() -> (TempDir, ClientParameters) {
    let ca_dir = tempfile::tempdir().expect("temp CA dir");
    let params = ClientParameters::anonymous(ca_dir.path());
    (ca_dir, params)
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// In-memory body that records every seek and whether it was dropped
pub struct TrackedReader {
    inner: Cursor<Vec<u8>>,
    pub seeks: Arc<Mutex<Vec<SeekFrom>>>,
    pub dropped: Arc<AtomicBool>,
}

impl TrackedReader {
    pub fn new(data: &[u8]) -> Self {
        Self {
            inner: Cursor::new(data.to_vec()),
            seeks: Arc::new(Mutex::new(Vec::new())),
            dropped: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl Read for TrackedReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Read::read(&mut self.inner, buf)
    }
}

impl Seek for TrackedReader {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.seeks.lock().unwrap().push(pos);
        self.inner.seek(pos)
    }
}

impl Drop for TrackedReader {
    fn drop(&mut self) {
        self.dropped.store(true, Ordering::SeqCst);
    }
}
