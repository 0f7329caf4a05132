//! Throwaway HTTP/1.1 server for transport tests
//!
//! Serves exactly one connection from a script of actions, records the
//! request it received and reports when the client closed the connection.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;

/// Upper bound for anything a test waits on
pub const TEST_DEADLINE: Duration = Duration::from_secs(5);

/// One step of a scripted response
#[derive(Clone, Debug)]
pub enum Action {
    /// Write these bytes and flush
    Send(String),
    /// Stop writing until the client hangs up
    Stall,
}

/// A request as the server saw it
#[derive(Clone, Debug)]
pub struct CapturedRequest {
    /// e.g. `POST /serving-endpoints/agent/invocations HTTP/1.1`
    pub request_line: String,
    /// Header names lowercased
    pub headers: Vec<(String, String)>,
    /// Raw body
    pub body: String,
}

impl CapturedRequest {
    /// First header value with this (lowercase) name
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Body parsed as JSON
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_str(&self.body).unwrap()
    }
}

/// Handle to a running fake server
pub struct FakeServer {
    /// Address the server listens on
    pub addr: SocketAddr,
    request: oneshot::Receiver<CapturedRequest>,
    hangup: oneshot::Receiver<()>,
}

impl FakeServer {
    /// Start serving one connection with the given response head and actions
    pub async fn start(head: String, actions: Vec<Action>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (request_tx, request) = oneshot::channel();
        let (hangup_tx, hangup) = oneshot::channel();

        tokio::spawn(async move {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            let captured = read_request(&mut socket).await;
            let _ = request_tx.send(captured);

            if socket.write_all(head.as_bytes()).await.is_err() {
                return;
            }
            for action in actions {
                match action {
                    Action::Send(bytes) => {
                        if socket.write_all(bytes.as_bytes()).await.is_err()
                            || socket.flush().await.is_err()
                        {
                            break;
                        }
                    }
                    Action::Stall => {
                        wait_for_hangup(&mut socket).await;
                        let _ = hangup_tx.send(());
                        return;
                    }
                }
            }
        });

        Self {
            addr,
            request,
            hangup,
        }
    }

    /// Base URL for the endpoint host
    pub fn host(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// The request the server received
    pub async fn request(&mut self) -> CapturedRequest {
        tokio::time::timeout(TEST_DEADLINE, &mut self.request)
            .await
            .expect("no request within deadline")
            .expect("server task ended without a request")
    }

    /// Wait until the client closed a stalled connection
    pub async fn hung_up(&mut self) -> bool {
        matches!(
            tokio::time::timeout(TEST_DEADLINE, &mut self.hangup).await,
            Ok(Ok(()))
        )
    }
}

async fn read_request(socket: &mut TcpStream) -> CapturedRequest {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];

    let header_end = loop {
        if let Some(pos) = find(&buf, b"\r\n\r\n") {
            break pos + 4;
        }
        let n = socket.read(&mut chunk).await.unwrap_or(0);
        if n == 0 {
            break buf.len();
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let mut lines = head.split("\r\n");
    let request_line = lines.next().unwrap_or_default().to_string();
    let headers: Vec<(String, String)> = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(n, v)| (n.trim().to_ascii_lowercase(), v.trim().to_string()))
        .collect();

    let content_length = headers
        .iter()
        .find(|(n, _)| n == "content-length")
        .and_then(|(_, v)| v.parse::<usize>().ok())
        .unwrap_or(0);

    while buf.len() < header_end + content_length {
        let n = socket.read(&mut chunk).await.unwrap_or(0);
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    let body_end = buf.len().min(header_end + content_length);
    let body = String::from_utf8_lossy(&buf[header_end..body_end]).to_string();

    CapturedRequest {
        request_line,
        headers,
        body,
    }
}

async fn wait_for_hangup(socket: &mut TcpStream) {
    let mut chunk = [0u8; 1024];
    loop {
        match socket.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Response head for an SSE stream delimited by connection close
pub fn sse_head() -> String {
    "HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\ncache-control: no-cache\r\nconnection: close\r\n\r\n"
        .to_string()
}

/// A complete response with a fixed body
pub fn full_response(status: &str, headers: &[(&str, &str)], body: &str) -> String {
    let mut response = format!("HTTP/1.1 {status}\r\n");
    for (name, value) in headers {
        response.push_str(&format!("{name}: {value}\r\n"));
    }
    response.push_str(&format!(
        "content-length: {}\r\nconnection: close\r\n\r\n{body}",
        body.len()
    ));
    response
}

/// One SSE record carrying `payload`
pub fn sse_record(payload: &str) -> String {
    format!("data: {payload}\n\n")
}
