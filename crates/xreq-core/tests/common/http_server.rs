//! Minimal HTTP/1.1 server for integration tests.
//!
//! Routes:
//! - `/status/<code>`: empty JSON object with that status
//! - `/text`: `hello` as text/plain
//! - `/slow`: echo after a 3 s delay
//! - `/set-cookie/<name>=<value>`: empty JSON object plus `Set-Cookie: <name>=<value>; Path=/`
//! - anything else: JSON echo of method, path, lower-cased headers and body

use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone, Copy, Default)]
pub struct ServerOptions {
    /// Close this many connections without answering before serving normally.
    pub drop_first: usize,
}

pub struct TestServer {
    base: String,
    hits: Arc<AtomicUsize>,
}

impl TestServer {
    /// Absolute URL for `path` (which starts with `/`).
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    /// Connections accepted so far, dropped ones included.
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

pub fn start() -> TestServer {
    start_with_options(ServerOptions::default())
}

/// The server runs until the process exits.
pub fn start_with_options(opts: ServerOptions) -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().unwrap().port();
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&hits);
    thread::spawn(move || {
        for stream in listener.incoming().flatten() {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            if n < opts.drop_first {
                let _ = stream.shutdown(std::net::Shutdown::Both);
                continue;
            }
            thread::spawn(move || handle(stream));
        }
    });
    TestServer {
        base: format!("http://127.0.0.1:{}", port),
        hits,
    }
}

struct Request {
    method: String,
    path: String,
    headers: BTreeMap<String, String>,
    body: Vec<u8>,
}

fn read_request(stream: &mut TcpStream) -> Option<Request> {
    let mut data = Vec::new();
    let mut buf = [0u8; 8192];
    let head_end = loop {
        let n = stream.read(&mut buf).ok()?;
        if n == 0 {
            return None;
        }
        data.extend_from_slice(&buf[..n]);
        if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&data[..head_end]).into_owned();
    let mut lines = head.lines();
    let mut start = lines.next()?.split_whitespace();
    let method = start.next()?.to_string();
    let path = start.next()?.to_string();
    let mut headers = BTreeMap::new();
    for line in lines {
        if let Some((name, value)) = line.split_once(':') {
            headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
        }
    }

    let len: usize = headers
        .get("content-length")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    let mut body = data[head_end..].to_vec();
    while body.len() < len {
        let n = stream.read(&mut buf).ok()?;
        if n == 0 {
            break;
        }
        body.extend_from_slice(&buf[..n]);
    }
    Some(Request {
        method,
        path,
        headers,
        body,
    })
}

fn respond(stream: &mut TcpStream, status: u16, reason: &str, content_type: &str, body: &[u8]) {
    respond_with(stream, status, reason, content_type, "", body);
}

/// `extra` is zero or more complete `Name: value\r\n` lines.
fn respond_with(
    stream: &mut TcpStream,
    status: u16,
    reason: &str,
    content_type: &str,
    extra: &str,
    body: &[u8],
) {
    let head = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nX-Test-Server: 1\r\n{}Connection: close\r\n\r\n",
        status,
        reason,
        content_type,
        body.len(),
        extra
    );
    let _ = stream.write_all(head.as_bytes());
    let _ = stream.write_all(body);
}

fn handle(mut stream: TcpStream) {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(5)));
    let _ = stream.set_write_timeout(Some(Duration::from_secs(5)));
    let Some(req) = read_request(&mut stream) else {
        return;
    };

    if let Some(code) = req.path.strip_prefix("/status/") {
        let status = code.parse().unwrap_or(500);
        respond(&mut stream, status, "Test Status", "application/json", b"{}");
        return;
    }
    if let Some(pair) = req.path.strip_prefix("/set-cookie/") {
        let extra = format!("Set-Cookie: {}; Path=/\r\n", pair);
        respond_with(&mut stream, 200, "OK", "application/json", &extra, b"{}");
        return;
    }
    if req.path == "/text" {
        respond(&mut stream, 200, "OK", "text/plain", b"hello");
        return;
    }
    if req.path == "/slow" {
        thread::sleep(Duration::from_secs(3));
    }

    let echo = serde_json::json!({
        "method": req.method,
        "path": req.path,
        "headers": req.headers,
        "body": String::from_utf8_lossy(&req.body),
    });
    respond(
        &mut stream,
        200,
        "OK",
        "application/json",
        echo.to_string().as_bytes(),
    );
}
