use std::{path::Path, sync::Arc, time::Duration};

use axum::{
    Json, Router,
    extract::{State, WebSocketUpgrade, ws::Message},
    response::IntoResponse,
    routing::get,
};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use parley_core::{
    ContactsPage, Dialog, DialogsPage, ErrorBody, Frame, Peer, Request, api::encode_body,
    decode_frame, encode_frame, frame::MAX_FRAME_BYTES,
};
use serde::{Deserialize, Serialize};
use tokio::{
    net::TcpListener,
    sync::{RwLock, mpsc},
};
use tracing::{debug, error, info, warn};

pub const MAX_PAGE_LIMIT: u32 = 100;
/// Upper bound for a fixture file read from disk.
pub const MAX_FIXTURE_BYTES: u64 = 16 * 1024 * 1024;

const FIRST_NAMES: &[&str] = &[
    "John", "Mary", "Joan", "Robert", "Alice", "Jonas", "Carl", "Eve", "Mike", "Sara", "Jordan",
    "Nina",
];
const LAST_NAMES: &[&str] = &[
    "Smith", "Jones", "Brown", "Miller", "Johnson", "Davis", "Garcia", "Wilson",
];
const EXTRA_CONTACTS: usize = 10;

/// The dialogs and contacts one account sees.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Directory {
    pub dialogs: Vec<Dialog>,
    #[serde(default)]
    pub contacts: Vec<Peer>,
    /// Send the total with every dialogs page instead of leaving it implicit.
    #[serde(default)]
    pub report_count: bool,
}

fn generated_name(index: usize) -> String {
    format!(
        "{} {}",
        FIRST_NAMES[index % FIRST_NAMES.len()],
        LAST_NAMES[(index / FIRST_NAMES.len()) % LAST_NAMES.len()]
    )
}

fn generated_peer(index: usize, id: u64) -> Peer {
    Peer {
        id,
        name: generated_name(index),
        username: (index % 5 == 0).then(|| format!("user{id}")),
    }
}

impl Directory {
    /// Deterministic directory with `dialogs` dialogs. Every third dialog
    /// peer is also a contact, plus a few contacts without dialogs.
    pub fn generate(dialogs: usize) -> Self {
        let dialog_rows: Vec<Dialog> = (0..dialogs)
            .map(|index| Dialog {
                peer: generated_peer(index, index as u64 + 1),
                unread_count: (index % 4) as u32,
            })
            .collect();
        let contacts = dialog_rows
            .iter()
            .step_by(3)
            .map(|dialog| dialog.peer.clone())
            .chain(
                (0..EXTRA_CONTACTS)
                    .map(|extra| generated_peer(dialogs + extra, 10_000 + extra as u64)),
            )
            .collect();

        Self {
            dialogs: dialog_rows,
            contacts,
            report_count: false,
        }
    }

    pub fn load(path: &Path) -> Result<Self, String> {
        let meta = std::fs::metadata(path)
            .map_err(|err| format!("failed to stat fixture {}: {err}", path.display()))?;
        if meta.len() > MAX_FIXTURE_BYTES {
            return Err(format!(
                "fixture {} too large: {} bytes (max {})",
                path.display(),
                meta.len(),
                MAX_FIXTURE_BYTES
            ));
        }
        let data = std::fs::read_to_string(path)
            .map_err(|err| format!("failed to read fixture {}: {err}", path.display()))?;
        serde_json::from_str(&data)
            .map_err(|err| format!("failed to parse fixture {}: {err}", path.display()))
    }

    #[must_use]
    pub fn with_report_count(mut self, report_count: bool) -> Self {
        self.report_count = report_count;
        self
    }

    /// Answer one request body.
    pub fn answer(&self, payload: &[u8]) -> Result<Bytes, ErrorBody> {
        let request = Request::decode(payload)
            .map_err(|err| ErrorBody::new(400, "METHOD_INVALID", err.to_string()))?;

        let body = match request {
            Request::GetDialogs { offset, limit } => {
                if limit == 0 || limit > MAX_PAGE_LIMIT {
                    return Err(ErrorBody::new(
                        400,
                        "LIMIT_INVALID",
                        format!("limit must be between 1 and {MAX_PAGE_LIMIT}"),
                    ));
                }
                let start = (offset as usize).min(self.dialogs.len());
                let end = start.saturating_add(limit as usize).min(self.dialogs.len());
                encode_body(&DialogsPage {
                    dialogs: self.dialogs[start..end].to_vec(),
                    count: self
                        .report_count
                        .then(|| u32::try_from(self.dialogs.len()).unwrap_or(u32::MAX)),
                })
            }
            Request::GetContacts => encode_body(&ContactsPage {
                contacts: self.contacts.clone(),
            }),
        };
        body.map_err(|err| ErrorBody::new(500, "INTERNAL", err.to_string()))
    }
}

#[derive(Debug)]
struct ServerState {
    directory: Arc<Directory>,
    served: u64,
}

#[derive(Debug, Clone)]
pub struct AppState {
    inner: Arc<RwLock<ServerState>>,
}

impl AppState {
    #[must_use]
    pub fn new(directory: Directory) -> Self {
        Self {
            inner: Arc::new(RwLock::new(ServerState {
                directory: Arc::new(directory),
                served: 0,
            })),
        }
    }

    pub async fn replace_directory(&self, directory: Directory) {
        self.inner.write().await.directory = Arc::new(directory);
    }

    pub async fn served(&self) -> u64 {
        self.inner.read().await.served
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new(Directory::default())
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/rpc", get(ws_handler))
        .route("/healthz", get(healthz_handler))
        .with_state(state)
}

pub async fn serve(listener: TcpListener, state: AppState) -> Result<(), String> {
    info!(
        "rpc server listening on {}",
        listener
            .local_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".to_owned())
    );
    axum::serve(listener, build_router(state))
        .await
        .map_err(|err| err.to_string())
}

async fn healthz_handler(State(state): State<AppState>) -> impl IntoResponse {
    let inner = state.inner.read().await;
    Json(serde_json::json!({
        "ok": true,
        "dialogs": inner.directory.dialogs.len(),
        "served": inner.served,
    }))
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.max_frame_size(MAX_FRAME_BYTES)
        .on_upgrade(move |socket| async move {
            if let Err(err) = handle_socket(state, socket).await {
                warn!("socket session ended with error: {}", err);
            }
        })
}

async fn handle_socket(
    state: AppState,
    socket: axum::extract::ws::WebSocket,
) -> Result<(), String> {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();

    // Split sockets only flush queued pongs when the write half sends.
    const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

    let send_task = tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval(KEEPALIVE_INTERVAL);
        ping_interval.tick().await;

        loop {
            tokio::select! {
                msg = outbound_rx.recv() => {
                    match msg {
                        Some(message) => {
                            if ws_sender.send(message).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                _ = ping_interval.tick() => {
                    if ws_sender.send(Message::Ping(Bytes::new())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    info!("client connected");

    let mut result = Ok(());
    while let Some(next_message) = ws_receiver.next().await {
        let message = match next_message {
            Ok(message) => message,
            Err(err) => {
                result = Err(format!("websocket receive error: {err}"));
                break;
            }
        };

        match message {
            Message::Binary(data) => {
                let directory = {
                    let mut inner = state.inner.write().await;
                    inner.served += 1;
                    Arc::clone(&inner.directory)
                };
                if let Some(reply) = respond(&directory, &data)
                    && outbound_tx.send(Message::Binary(reply)).is_err()
                {
                    break;
                }
            }
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) | Message::Text(_) => {}
        }
    }

    send_task.abort();
    info!("client disconnected");
    result
}

/// Turn one inbound frame into the frame to send back, if any.
pub fn respond(directory: &Directory, data: &[u8]) -> Option<Bytes> {
    let frame = match decode_frame(data) {
        Ok(frame) => frame,
        Err(err) => {
            warn!("failed to decode frame: {}", err);
            return None;
        }
    };

    let id = frame.id();
    let reply = match frame {
        Frame::Request { id, payload } => match directory.answer(&payload) {
            Ok(body) => Frame::Response { id, payload: body },
            Err(error) => {
                warn!(request_id = %id, kind = %error.kind, "request rejected: {}", error.description);
                Frame::Error { id, error }
            }
        },
        Frame::Response { .. } | Frame::Error { .. } => Frame::Error {
            id,
            error: ErrorBody::new(400, "FRAME_INVALID", "expected a request frame"),
        },
    };

    match encode_frame(&reply) {
        Ok(bytes) => {
            debug!(request_id = %id, bytes = bytes.len(), "reply encoded");
            Some(bytes)
        }
        Err(err) => {
            error!(request_id = %id, "failed to encode reply: {}", err);
            encode_frame(&Frame::Error {
                id,
                error: ErrorBody::new(500, "RESPONSE_TOO_LARGE", err.to_string()),
            })
            .ok()
        }
    }
}
