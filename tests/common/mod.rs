//! In-process fakes of the sensor hub and the HVAC endpoint.

#![allow(dead_code)]

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tokio::net::TcpListener;

pub const TOKEN: &str = "secret";
pub const RS: char = '\u{1e}';

/// One hub session: frames pushed after the handshake, then either keep the
/// socket open or drop it.
#[derive(Clone, Default)]
pub struct Session {
    pub frames: Vec<String>,
    pub hang_up: bool,
}

#[derive(Clone, Default)]
pub struct FakeServer {
    sessions: Arc<Vec<Session>>,
    pub connections: Arc<AtomicUsize>,
    pub negotiations: Arc<AtomicUsize>,
    pub hvac_calls: Arc<Mutex<Vec<(String, u32)>>>,
}

impl FakeServer {
    pub fn new(sessions: Vec<Session>) -> Self {
        Self {
            sessions: Arc::new(sessions),
            ..Default::default()
        }
    }

    /// Serve on an ephemeral loopback port; returns the base URL.
    pub async fn spawn(self) -> String {
        let app = Router::new()
            .route("/SensorHub", get(hub))
            .route("/SensorHub/negotiate", post(negotiate))
            .route("/api/hvac/{token}/{action}/{ticks}", get(hvac))
            .with_state(self);
        serve(app).await
    }
}

pub async fn serve(app: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

pub fn invocation(target: &str, date: &str, data: &str) -> String {
    let record = json!({
        "type": 1,
        "target": target,
        "arguments": [{ "date": date, "data": data }],
    });
    format!("{record}{RS}")
}

pub fn reading(data: &str) -> String {
    invocation("ReceiveSensorData", "2024-06-05T14:30:00Z", data)
}

pub fn ping() -> String {
    format!("{{\"type\":6}}{RS}")
}

pub fn close() -> String {
    format!("{{\"type\":7}}{RS}")
}

/// Poll `check` until it holds or `timeout` passes.
pub async fn eventually<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

async fn negotiate(
    State(server): State<FakeServer>,
    Query(query): Query<HashMap<String, String>>,
) -> Json<Value> {
    server.negotiations.fetch_add(1, Ordering::SeqCst);
    if query.get("token").map(String::as_str) != Some(TOKEN) {
        return Json(json!({ "error": "unauthorized" }));
    }
    if query.get("negotiateVersion").map(String::as_str) != Some("1") {
        return Json(json!({ "error": "unsupported negotiate version" }));
    }
    Json(json!({
        "connectionId": "cid",
        "connectionToken": "ctok",
        "negotiateVersion": 1,
        "availableTransports": [{ "transport": "WebSockets", "transferFormats": ["Text"] }],
    }))
}

async fn hub(State(server): State<FakeServer>, ws: WebSocketUpgrade) -> Response {
    let index = server.connections.fetch_add(1, Ordering::SeqCst);
    let session = server
        .sessions
        .get(index)
        .or_else(|| server.sessions.last())
        .cloned()
        .unwrap_or_default();
    ws.on_upgrade(move |socket| run_session(socket, session))
}

async fn run_session(mut socket: WebSocket, session: Session) {
    // Wait for {"protocol":"json","version":1}
    match socket.recv().await {
        Some(Ok(Message::Text(text))) if text.as_str().contains("\"protocol\":\"json\"") => {}
        _ => return,
    }

    // The handshake answer shares a frame with the first scripted records.
    let mut frames = session.frames.into_iter();
    let first = format!("{{}}{RS}{}", frames.next().unwrap_or_default());
    if socket.send(Message::Text(first.into())).await.is_err() {
        return;
    }
    for frame in frames {
        if socket.send(Message::Text(frame.into())).await.is_err() {
            return;
        }
    }

    if session.hang_up {
        let _ = socket.send(Message::Close(None)).await;
        return;
    }
    while let Some(Ok(_)) = socket.recv().await {}
}

async fn hvac(
    State(server): State<FakeServer>,
    Path((token, action, ticks)): Path<(String, String, u32)>,
) -> Response {
    server.hvac_calls.lock().unwrap().push((action.clone(), ticks));
    match token.as_str() {
        TOKEN => Json(json!({ "Response": format!("{action} for {ticks} ticks") })).into_response(),
        "html" => "<html>maintenance</html>".into_response(),
        _ => (StatusCode::UNAUTHORIZED, "bad token").into_response(),
    }
}
