//! Shared utilities for integration and load testing.

#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use passeplat_gateway::config::{parse_config, GatewayConfig};
use passeplat_gateway::gateway::{Gateway, Listener};
use passeplat_gateway::lifecycle::startup::build_directory;
use passeplat_gateway::lifecycle::Shutdown;
use passeplat_gateway::processor::MemorySink;
use passeplat_gateway::resolver::ServiceDirectory;
use passeplat_gateway::telemetry::LogMap;

/// A request as seen by a mock backend. Header names are lower-cased.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub target: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct MockResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    /// Send the body with chunked transfer coding.
    pub chunked: bool,
    pub delay: Duration,
}

impl MockResponse {
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Self {
            status: 200,
            headers: Vec::new(),
            body: body.into(),
            chunked: false,
            delay: Duration::ZERO,
        }
    }

    pub fn status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn chunked(mut self) -> Self {
        self.chunked = true;
        self
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// Start a mock backend that returns a fixed 200 response.
pub async fn start_mock_backend(response: &'static str) -> SocketAddr {
    let (addr, _requests) = start_programmable_backend(move |_| async move { MockResponse::ok(response) }).await;
    addr
}

/// Start a backend whose responses are computed per request. Every
/// request received is also sent on the returned channel.
pub async fn start_programmable_backend<F, Fut>(f: F) -> (SocketAddr, mpsc::UnboundedReceiver<RecordedRequest>)
where
    F: Fn(RecordedRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = MockResponse> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();
    let f = Arc::new(f);

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let f = f.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                let Some(request) = read_request(&mut socket).await else {
                    return;
                };
                let _ = tx.send(request.clone());
                let response = f(request).await;
                tokio::time::sleep(response.delay).await;
                let _ = socket.write_all(&render(&response)).await;
                let _ = socket.shutdown().await;
            });
        }
    });
    (addr, rx)
}

/// An address nothing listens on.
pub async fn unused_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

async fn read_more(socket: &mut TcpStream, buf: &mut Vec<u8>) -> bool {
    let mut tmp = [0u8; 8192];
    match socket.read(&mut tmp).await {
        Ok(0) | Err(_) => false,
        Ok(n) => {
            buf.extend_from_slice(&tmp[..n]);
            true
        }
    }
}

async fn read_request(socket: &mut TcpStream) -> Option<RecordedRequest> {
    let mut buf = Vec::new();
    let head_len = loop {
        if let Some(pos) = find(&buf, b"\r\n\r\n") {
            break pos + 4;
        }
        if !read_more(socket, &mut buf).await {
            return None;
        }
    };

    let mut slots = [httparse::EMPTY_HEADER; 64];
    let mut parsed = httparse::Request::new(&mut slots);
    parsed.parse(&buf[..head_len]).ok()?;
    let method = parsed.method?.to_string();
    let target = parsed.path?.to_string();
    let headers: Vec<(String, String)> = parsed
        .headers
        .iter()
        .map(|h| (h.name.to_ascii_lowercase(), String::from_utf8_lossy(h.value).into_owned()))
        .collect();

    let mut request = RecordedRequest {
        method,
        target,
        headers,
        body: buf[head_len..].to_vec(),
    };

    if let Some(len) = request.header("content-length").and_then(|v| v.parse::<usize>().ok()) {
        while request.body.len() < len {
            if !read_more(socket, &mut request.body).await {
                break;
            }
        }
        request.body.truncate(len);
    } else if request
        .header("transfer-encoding")
        .is_some_and(|v| v.contains("chunked"))
    {
        while !request.body.ends_with(b"0\r\n\r\n") {
            if !read_more(socket, &mut request.body).await {
                break;
            }
        }
        request.body = decode_chunked(&request.body);
    }
    Some(request)
}

pub fn decode_chunked(mut raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    while let Some(line_end) = find(raw, b"\r\n") {
        let size_line = String::from_utf8_lossy(&raw[..line_end]);
        let size = usize::from_str_radix(size_line.split(';').next().unwrap_or("0").trim(), 16).unwrap_or(0);
        raw = &raw[line_end + 2..];
        if size == 0 || raw.len() < size {
            break;
        }
        out.extend_from_slice(&raw[..size]);
        raw = &raw[(size + 2).min(raw.len())..];
    }
    out
}

fn render(response: &MockResponse) -> Vec<u8> {
    let reason = match response.status {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        404 => "Not Found",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "Unknown",
    };
    let mut out = format!("HTTP/1.1 {} {}\r\n", response.status, reason);
    for (name, value) in &response.headers {
        out.push_str(&format!("{name}: {value}\r\n"));
    }
    if response.chunked {
        out.push_str("Transfer-Encoding: chunked\r\n");
    } else {
        out.push_str(&format!("Content-Length: {}\r\n", response.body.len()));
    }
    out.push_str("Connection: close\r\n\r\n");

    let mut bytes = out.into_bytes();
    if response.chunked {
        for chunk in response.body.chunks(7) {
            bytes.extend_from_slice(format!("{:x}\r\n", chunk.len()).as_bytes());
            bytes.extend_from_slice(chunk);
            bytes.extend_from_slice(b"\r\n");
        }
        bytes.extend_from_slice(b"0\r\n\r\n");
    } else {
        bytes.extend_from_slice(&response.body);
    }
    bytes
}

/// Config with user `alice` plus the given TOML (web services etc.).
pub fn config_with(extra: &str) -> GatewayConfig {
    let text = format!(
        r#"
[observability]
metrics_enabled = false

[[users]]
id = "alice"

{extra}
"#
    );
    parse_config(&text).unwrap()
}

pub struct TestGateway {
    pub addr: SocketAddr,
    pub sink: Arc<MemorySink>,
    pub shutdown: Shutdown,
    pub directory: Arc<ArcSwap<ServiceDirectory>>,
}

impl TestGateway {
    /// Gateway URL targeting `backend` for user `alice`.
    pub fn url(&self, backend: SocketAddr, path: &str) -> String {
        let separator = if path.contains('?') { '&' } else { '?' };
        format!(
            "http://{}{}{}PP_DESTINATION_SCHEME_AND_HOST=http://{}&PP_USER=alice",
            self.addr, path, separator, backend
        )
    }
}

pub async fn spawn_gateway(config: GatewayConfig) -> TestGateway {
    let directory = Arc::new(ArcSwap::from_pointee(build_directory(&config).unwrap()));
    let sink = Arc::new(MemorySink::new());
    let gateway = Gateway::new(&config, directory.clone(), sink.clone()).unwrap();

    let inner = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let listener = Listener::from_listener(inner, config.listener.max_connections);
    let addr = listener.local_addr().unwrap();

    let shutdown = Shutdown::new();
    let run_shutdown = shutdown.clone();
    tokio::spawn(async move {
        let _ = gateway.run(listener, &run_shutdown).await;
    });

    TestGateway {
        addr,
        sink,
        shutdown,
        directory,
    }
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .no_proxy()
        .pool_max_idle_per_host(0)
        .build()
        .unwrap()
}

/// Wait until the sink holds `count` records.
pub async fn wait_for_records(sink: &MemorySink, count: usize) -> Vec<LogMap> {
    for _ in 0..100 {
        let records = sink.records();
        if records.len() >= count {
            return records;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("expected {count} telemetry records, got {}", sink.records().len());
}
