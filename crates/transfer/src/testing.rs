//! In-process resumable upload endpoint for tests.
//!
//! Speaks just enough HTTP/1.1 (one request per connection) to stand in for
//! a resumable upload service: `POST` on the upload URL opens a session,
//! `PUT` with `Content-Range` appends to it, confirming with `308` and a
//! `Range` header until the total is known.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use buildpush_protocol::constants::UPLOAD_CHUNK_SIZE;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// Content and state of one mock session.
#[derive(Debug, Clone, Default)]
pub struct MockSession {
    pub data: Vec<u8>,
    pub complete: bool,
    /// Headers of the request that opened the session (lower-cased names).
    pub bootstrap_headers: HashMap<String, String>,
}

#[derive(Default)]
struct ServerState {
    sessions: HashMap<String, MockSession>,
    next_id: u64,
    bootstrap_failures: u32,
    reject_puts: u32,
    lose_acks: u32,
    puts: usize,
}

/// A running mock upload endpoint. Stops when dropped.
pub struct MockUploadServer {
    base_url: String,
    state: Arc<Mutex<ServerState>>,
    handle: JoinHandle<()>,
}

impl MockUploadServer {
    pub async fn start() -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let base_url = format!("http://{}", listener.local_addr()?);
        let state = Arc::new(Mutex::new(ServerState::default()));

        let shared = Arc::clone(&state);
        let handle = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let state = Arc::clone(&shared);
                tokio::spawn(async move {
                    let _ = serve(stream, state).await;
                });
            }
        });

        Ok(Self {
            base_url,
            state,
            handle,
        })
    }

    /// URL sessions are opened on.
    pub fn upload_url(&self) -> String {
        format!("{}/upload", self.base_url)
    }

    /// Answers the next `n` session bootstraps with `500`.
    pub fn fail_next_bootstraps(&self, n: u32) {
        self.lock().bootstrap_failures = n;
    }

    /// Answers the next `n` chunk uploads with `503` without storing them.
    pub fn reject_next_puts(&self, n: u32) {
        self.lock().reject_puts = n;
    }

    /// Stores the next `n` chunk uploads but answers `503`, as if the
    /// acknowledgement got lost on the way back.
    pub fn lose_next_acks(&self, n: u32) {
        self.lock().lose_acks = n;
    }

    /// Number of `PUT` requests received, status queries included.
    pub fn put_count(&self) -> usize {
        self.lock().puts
    }

    /// Session by its location URL.
    pub fn session(&self, location: &str) -> Option<MockSession> {
        let path = location.strip_prefix(&self.base_url).unwrap_or(location);
        self.lock().sessions.get(path).cloned()
    }

    pub fn sessions(&self) -> Vec<MockSession> {
        let state = self.lock();
        let mut paths: Vec<&String> = state.sessions.keys().collect();
        paths.sort();
        paths
            .into_iter()
            .filter_map(|p| state.sessions.get(p).cloned())
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ServerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for MockUploadServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

struct Request {
    method: String,
    path: String,
    headers: HashMap<String, String>,
    body: Vec<u8>,
}

async fn read_request(stream: &mut TcpStream) -> std::io::Result<Option<Request>> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 64 * 1024];

    let header_end = loop {
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos;
        }
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Ok(None);
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).into_owned();
    let mut lines = head.split("\r\n");
    let request_line = lines.next().unwrap_or_default();
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default().to_string();
    let path = parts.next().unwrap_or_default().to_string();

    let headers: HashMap<String, String> = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.trim().to_ascii_lowercase(), v.trim().to_string()))
        .collect();

    let content_length: usize = headers
        .get("content-length")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);

    let mut body = buf[header_end + 4..].to_vec();
    while body.len() < content_length {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..n]);
    }
    body.truncate(content_length);

    Ok(Some(Request {
        method,
        path,
        headers,
        body,
    }))
}

struct Response {
    status: u16,
    reason: &'static str,
    headers: Vec<(&'static str, String)>,
}

impl Response {
    fn new(status: u16, reason: &'static str) -> Self {
        Self {
            status,
            reason,
            headers: Vec::new(),
        }
    }

    fn header(mut self, name: &'static str, value: String) -> Self {
        self.headers.push((name, value));
        self
    }
}

async fn serve(mut stream: TcpStream, state: Arc<Mutex<ServerState>>) -> std::io::Result<()> {
    let Some(request) = read_request(&mut stream).await? else {
        return Ok(());
    };

    let response = {
        let mut state = state.lock().unwrap_or_else(|e| e.into_inner());
        handle(&mut state, request)
    };

    let mut raw = format!("HTTP/1.1 {} {}\r\n", response.status, response.reason);
    for (name, value) in &response.headers {
        raw.push_str(&format!("{name}: {value}\r\n"));
    }
    raw.push_str("Content-Length: 0\r\nConnection: close\r\n\r\n");
    stream.write_all(raw.as_bytes()).await?;
    stream.shutdown().await
}

fn handle(state: &mut ServerState, request: Request) -> Response {
    match request.method.as_str() {
        "POST" if request.path.starts_with("/upload") => {
            if state.bootstrap_failures > 0 {
                state.bootstrap_failures -= 1;
                return Response::new(500, "Internal Server Error");
            }
            state.next_id += 1;
            let path = format!("/session/{}", state.next_id);
            state.sessions.insert(
                path.clone(),
                MockSession {
                    bootstrap_headers: request.headers,
                    ..Default::default()
                },
            );
            Response::new(201, "Created").header("Location", path)
        }
        "PUT" => {
            state.puts += 1;
            handle_put(state, request)
        }
        _ => Response::new(405, "Method Not Allowed"),
    }
}

fn handle_put(state: &mut ServerState, request: Request) -> Response {
    let Some(range) = request.headers.get("content-range").cloned() else {
        return Response::new(400, "Bad Request");
    };
    let is_query = range == "bytes */*";

    if !is_query && state.reject_puts > 0 {
        state.reject_puts -= 1;
        return Response::new(503, "Service Unavailable");
    }
    let lose_ack = !is_query && state.lose_acks > 0;
    if lose_ack {
        state.lose_acks -= 1;
    }

    let Some(session) = state.sessions.get_mut(&request.path) else {
        return Response::new(404, "Not Found");
    };

    if !is_query && !session.complete {
        if let Err(status) = apply_range(session, &range, &request.body) {
            return Response::new(status, "Bad Request");
        }
    }

    if lose_ack {
        return Response::new(503, "Service Unavailable");
    }
    if session.complete {
        return Response::new(200, "OK");
    }
    let mut response = Response::new(308, "Resume Incomplete");
    if !session.data.is_empty() {
        response = response.header("Range", format!("bytes=0-{}", session.data.len() - 1));
    }
    response
}

/// Applies `Content-Range: bytes a-b/T` or `bytes */T` to a session.
fn apply_range(session: &mut MockSession, range: &str, body: &[u8]) -> Result<(), u16> {
    let spec = range.strip_prefix("bytes ").ok_or(400u16)?;
    let (span, total) = spec.split_once('/').ok_or(400u16)?;
    let total: Option<usize> = match total {
        "*" => None,
        t => Some(t.parse().map_err(|_| 400u16)?),
    };

    if span != "*" {
        let (start, end) = span.split_once('-').ok_or(400u16)?;
        let start: usize = start.parse().map_err(|_| 400u16)?;
        let end: usize = end.parse().map_err(|_| 400u16)?;
        let len = (end + 1).checked_sub(start).ok_or(400u16)?;
        if len != body.len() || start > session.data.len() {
            return Err(400);
        }
        if total.is_none() && body.len() % UPLOAD_CHUNK_SIZE != 0 {
            return Err(400);
        }
        // Resent bytes overwrite what the session already holds.
        session.data.truncate(start);
        session.data.extend_from_slice(body);
    }

    if let Some(total) = total {
        if session.data.len() != total {
            return Err(400);
        }
        session.complete = true;
    }
    Ok(())
}
