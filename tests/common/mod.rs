//! Shared integration-test harness: spawns `sortie` as a child process on
//! an ephemeral port and talks to it over HTTP and WebSocket.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

/// Default timeout for a single frame or startup step.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// A running `sortie` server with helpers for its HTTP API.
///
/// The child process is killed on drop via `kill_on_drop(true)`.
pub struct SortieProcess {
    child: Child,
    pub addr: String,
    pub http: reqwest::Client,
}

impl SortieProcess {
    /// Absolute path of a file under `tests/fixtures`.
    pub fn fixture_path(name: &str) -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("tests")
            .join("fixtures")
            .join(name)
    }

    /// Spawns a server over the fixture mission directory.
    pub async fn spawn() -> Self {
        Self::spawn_with_args(&[]).await
    }

    /// Spawns a server with extra `server run` arguments.
    ///
    /// Reads stderr until the "server listening" line to discover the port.
    pub async fn spawn_with_args(extra: &[&str]) -> Self {
        let missions = Self::fixture_path("missions");
        let mut args = vec![
            "--color",
            "never",
            "-v",
            "server",
            "run",
            "--bind",
            "127.0.0.1:0",
            "--missions",
            missions.to_str().expect("non-UTF-8 fixture path"),
        ];
        args.extend_from_slice(extra);

        let mut child = Command::new(env!("CARGO_BIN_EXE_sortie"))
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .expect("failed to spawn sortie");

        let stderr = child.stderr.take().expect("stderr not captured");
        let mut reader = BufReader::new(stderr);
        let mut line = String::new();
        let addr = loop {
            line.clear();
            let n = tokio::time::timeout(DEFAULT_TIMEOUT, reader.read_line(&mut line))
                .await
                .expect("timed out waiting for server startup")
                .expect("failed to read stderr");
            assert!(n > 0, "server exited before listening");
            if line.contains("server listening")
                && let Some(start) = line.find("addr=")
            {
                break line[start + "addr=".len()..]
                    .split_whitespace()
                    .next()
                    .expect("empty addr field")
                    .to_string();
            }
        };

        // Keep draining stderr so the child never blocks on a full pipe.
        tokio::spawn(async move {
            let mut sink = String::new();
            while reader.read_line(&mut sink).await.is_ok_and(|n| n > 0) {
                sink.clear();
            }
        });

        Self {
            child,
            addr,
            http: reqwest::Client::new(),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    /// Launches a session of `mission_id` owned by `owner_id`.
    pub async fn launch(&self, mission_id: &str, owner_id: &str, config: Option<Value>) -> Value {
        let mut body = json!({ "missionId": mission_id, "ownerId": owner_id });
        if let Some(config) = config {
            body["config"] = config;
        }
        let resp = self
            .http
            .post(self.url("/api/sessions"))
            .json(&body)
            .send()
            .await
            .expect("launch request failed");
        assert_eq!(resp.status(), reqwest::StatusCode::CREATED);
        resp.json().await.expect("launch body not JSON")
    }

    /// Opens a protocol socket as `user_id` with `access`.
    pub async fn connect(&self, user_id: &str, access: &str) -> WsClient {
        WsClient::connect(&format!(
            "ws://{}/connect?userId={user_id}&username={user_id}&access={access}",
            self.addr
        ))
        .await
    }

    /// Runs the binary to completion with `args`.
    pub fn spawn_command(args: &[&str]) -> std::process::Output {
        std::process::Command::new(env!("CARGO_BIN_EXE_sortie"))
            .args(args)
            .output()
            .expect("failed to run sortie")
    }
}

/// A protocol client over one WebSocket.
pub struct WsClient {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    next_request: u64,
    /// Frames read while waiting for something else.
    pub backlog: Vec<Value>,
}

impl WsClient {
    pub async fn connect(url: &str) -> Self {
        let (stream, _) = tokio::time::timeout(DEFAULT_TIMEOUT, connect_async(url))
            .await
            .expect("timed out connecting")
            .expect("websocket handshake failed");
        Self {
            stream,
            next_request: 1,
            backlog: Vec::new(),
        }
    }

    /// Sends `method` with `data` and returns the request id used.
    pub async fn send(&mut self, method: &str, data: Value) -> String {
        let request_id = format!("r{}", self.next_request);
        self.next_request += 1;
        let mut frame = json!({ "method": method, "requestId": request_id });
        if !data.is_null() {
            frame["data"] = data;
        }
        self.send_raw(&frame.to_string()).await;
        request_id
    }

    pub async fn send_raw(&mut self, text: &str) {
        self.stream
            .send(Message::text(text))
            .await
            .expect("failed to send frame");
    }

    /// Next JSON frame, or `None` once the server closes.
    pub async fn next(&mut self) -> Option<Value> {
        loop {
            let msg = tokio::time::timeout(DEFAULT_TIMEOUT, self.stream.next())
                .await
                .expect("timed out waiting for frame")?;
            match msg.expect("websocket error") {
                Message::Text(text) => {
                    return Some(serde_json::from_str(text.as_str()).expect("frame not JSON"));
                }
                Message::Close(_) => return None,
                _ => {}
            }
        }
    }

    /// Reads until a frame with `method` arrives; earlier frames go to the
    /// backlog.
    pub async fn expect_method(&mut self, method: &str) -> Value {
        if let Some(i) = self.backlog.iter().position(|f| f["method"] == method) {
            return self.backlog.remove(i);
        }
        loop {
            let frame = self
                .next()
                .await
                .unwrap_or_else(|| panic!("closed while waiting for {method}"));
            if frame["method"] == method {
                return frame;
            }
            self.backlog.push(frame);
        }
    }

    /// Reads until the reply to `request_id`.
    pub async fn expect_reply(&mut self, request_id: &str) -> Value {
        if let Some(i) = self
            .backlog
            .iter()
            .position(|f| f["request"]["requestId"] == request_id)
        {
            return self.backlog.remove(i);
        }
        loop {
            let frame = self
                .next()
                .await
                .unwrap_or_else(|| panic!("closed while waiting for reply to {request_id}"));
            if frame["request"]["requestId"] == request_id {
                return frame;
            }
            self.backlog.push(frame);
        }
    }

    /// Sends a request and waits for its reply.
    pub async fn request(&mut self, method: &str, data: Value) -> Value {
        let id = self.send(method, data).await;
        self.expect_reply(&id).await
    }
}

/// Error name of an `error` frame.
pub fn error_name(frame: &Value) -> &str {
    assert_eq!(frame["method"], "error", "not an error frame: {frame}");
    frame["data"]["name"].as_str().expect("error without name")
}
