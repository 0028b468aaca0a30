use super::{BackendEvent, SessionMetadata, TerminalBackend};
use crate::error::{ApiError, BindError, BindResult, ErrorCode};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;

const EVENT_CAPACITY: usize = 1024;

type PendingMap = HashMap<u64, oneshot::Sender<BindResult<Value>>>;

#[derive(Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Deserialize)]
struct RpcMessage {
    id: Option<u64>,
    method: Option<String>,
    #[serde(default)]
    params: Value,
    result: Option<Value>,
    error: Option<Value>,
}

#[derive(Deserialize)]
struct RpcErrorPayload {
    message: String,
    data: Option<ApiError>,
}

#[derive(Deserialize)]
struct OutputParams {
    id: String,
    data: String,
}

#[derive(Deserialize)]
struct TitleParams {
    id: String,
    title: String,
}

struct Shared {
    pending: Mutex<PendingMap>,
    events: Mutex<Option<broadcast::Sender<BackendEvent>>>,
    closed: AtomicBool,
}

impl Shared {
    fn lock_pending(&self) -> std::sync::MutexGuard<'_, PendingMap> {
        self.pending.lock().expect("pending mutex poisoned")
    }

    /// Registers a pending request unless the connection already closed.
    /// `read_loop` marks the connection closed before draining, so a request
    /// registered here is either refused or drained.
    fn register(&self, id: u64, tx: oneshot::Sender<BindResult<Value>>) -> bool {
        let mut pending = self.lock_pending();
        if self.closed.load(Ordering::SeqCst) {
            return false;
        }
        pending.insert(id, tx);
        true
    }

    fn lock_events(&self) -> std::sync::MutexGuard<'_, Option<broadcast::Sender<BackendEvent>>> {
        self.events.lock().expect("events mutex poisoned")
    }
}

/// Backend client speaking line-delimited JSON-RPC 2.0 over a Unix socket.
///
/// Responses are matched to requests by id. Notifications without an id carry
/// `terminal_output` and `terminal_title` events.
pub struct SocketBackend {
    writer: tokio::sync::Mutex<OwnedWriteHalf>,
    shared: Arc<Shared>,
    next_id: AtomicU64,
    request_timeout: Duration,
    reader_task: JoinHandle<()>,
}

impl SocketBackend {
    pub async fn connect(socket_path: impl AsRef<Path>, request_timeout_ms: u64) -> BindResult<Self> {
        let socket_path = socket_path.as_ref();
        let stream = UnixStream::connect(socket_path).await.map_err(|err| {
            ApiError::new(ErrorCode::TransportFailure, "Failed to connect backend socket")
                .with_details(format!("{}: {}", socket_path.display(), err))
        })?;
        Ok(Self::from_stream(stream, request_timeout_ms))
    }

    pub fn from_stream(stream: UnixStream, request_timeout_ms: u64) -> Self {
        let (reader, writer) = stream.into_split();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let shared = Arc::new(Shared {
            pending: Mutex::new(HashMap::new()),
            events: Mutex::new(Some(events)),
            closed: AtomicBool::new(false),
        });
        let reader_task = tokio::spawn(read_loop(reader, shared.clone()));
        Self {
            writer: tokio::sync::Mutex::new(writer),
            shared,
            next_id: AtomicU64::new(1),
            request_timeout: Duration::from_millis(request_timeout_ms.max(1)),
            reader_task,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    async fn call(&self, method: &str, params: Value) -> BindResult<Value> {
        if self.is_closed() {
            return Err(ApiError::new(ErrorCode::Closed, "Backend connection closed").into());
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        if !self.shared.register(id, tx) {
            return Err(ApiError::new(ErrorCode::Closed, "Backend connection closed").into());
        }

        let request = RpcRequest {
            jsonrpc: "2.0",
            id,
            method,
            params,
        };
        let mut payload = serde_json::to_string(&request)?;
        payload.push('\n');
        let written = {
            let mut writer = self.writer.lock().await;
            match writer.write_all(payload.as_bytes()).await {
                Ok(()) => writer.flush().await,
                Err(err) => Err(err),
            }
        };
        if let Err(err) = written {
            self.shared.lock_pending().remove(&id);
            return Err(ApiError::new(ErrorCode::TransportFailure, "Backend write failed")
                .with_details(err.to_string())
                .into());
        }

        match timeout(self.request_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ApiError::new(ErrorCode::Closed, "Backend connection closed").into()),
            Err(_) => {
                self.shared.lock_pending().remove(&id);
                tracing::warn!(method, request_id = id, "Backend request timed out");
                Err(BindError::Timeout)
            }
        }
    }
}

impl Drop for SocketBackend {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}

async fn read_loop(reader: OwnedReadHalf, shared: Arc<Shared>) {
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<RpcMessage>(&line) {
                    Ok(message) => dispatch(&shared, message),
                    Err(err) => tracing::warn!(error = %err, "Malformed backend message"),
                }
            }
            Ok(None) => break,
            Err(err) => {
                tracing::warn!(error = %err, "Backend read failed");
                break;
            }
        }
    }

    shared.closed.store(true, Ordering::SeqCst);
    let pending: Vec<_> = shared.lock_pending().drain().collect();
    for (_, tx) in pending {
        let _ = tx.send(Err(ApiError::new(ErrorCode::Closed, "Backend connection closed").into()));
    }
    // Dropping the only sender ends every listener's stream.
    shared.lock_events().take();
    tracing::info!("Backend connection closed");
}

fn dispatch(shared: &Shared, message: RpcMessage) {
    if let Some(id) = message.id {
        let Some(tx) = shared.lock_pending().remove(&id) else {
            tracing::debug!(request_id = id, "Response for unknown request");
            return;
        };
        let result = match message.error {
            Some(error) => Err(parse_rpc_error(error).into()),
            None => Ok(message.result.unwrap_or(Value::Null)),
        };
        let _ = tx.send(result);
        return;
    }

    let event = match message.method.as_deref() {
        Some("terminal_output") => match serde_json::from_value::<OutputParams>(message.params) {
            Ok(params) => match STANDARD.decode(params.data.as_bytes()) {
                Ok(data) => BackendEvent::Output {
                    id: params.id,
                    data: Bytes::from(data),
                },
                Err(err) => {
                    tracing::warn!(session_id = %params.id, error = %err, "Undecodable output payload");
                    return;
                }
            },
            Err(err) => {
                tracing::warn!(error = %err, "Malformed terminal_output notification");
                return;
            }
        },
        Some("terminal_title") => match serde_json::from_value::<TitleParams>(message.params) {
            Ok(params) => BackendEvent::TitleChanged {
                id: params.id,
                title: params.title,
            },
            Err(err) => {
                tracing::warn!(error = %err, "Malformed terminal_title notification");
                return;
            }
        },
        other => {
            tracing::debug!(method = ?other, "Ignoring backend notification");
            return;
        }
    };

    if let Some(sender) = shared.lock_events().as_ref() {
        // No receivers simply means nobody is listening right now.
        let _ = sender.send(event);
    }
}

fn parse_rpc_error(err: Value) -> ApiError {
    if let Ok(payload) = serde_json::from_value::<RpcErrorPayload>(err.clone()) {
        if let Some(api) = payload.data {
            return api;
        }
        return ApiError::new(ErrorCode::RemoteError, payload.message);
    }
    ApiError::new(ErrorCode::RemoteError, "Backend request failed").with_details(err.to_string())
}

#[async_trait]
impl TerminalBackend for SocketBackend {
    async fn get_config(&self) -> BindResult<Value> {
        self.call("get_config", json!({})).await
    }

    async fn get_terminal(&self, id: &str) -> BindResult<Option<SessionMetadata>> {
        let value = self.call("get_terminal", json!({ "id": id })).await?;
        if value.is_null() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_value(value)?))
    }

    async fn set_terminal_title(&self, id: &str, title: &str) -> BindResult<()> {
        self.call("set_terminal_title", json!({ "id": id, "title": title }))
            .await
            .map(|_| ())
    }

    async fn subscribe_terminal(&self, id: &str) -> BindResult<()> {
        self.call("subscribe_terminal", json!({ "id": id }))
            .await
            .map(|_| ())
    }

    async fn unsubscribe_terminal(&self, id: &str) -> BindResult<()> {
        self.call("unsubscribe_terminal", json!({ "id": id }))
            .await
            .map(|_| ())
    }

    async fn send_terminal_input(&self, id: &str, data: &[u8]) -> BindResult<()> {
        self.call(
            "send_terminal_input",
            json!({ "id": id, "data": STANDARD.encode(data) }),
        )
        .await
        .map(|_| ())
    }

    async fn send_terminal_buffer(&self, id: &str) -> BindResult<()> {
        self.call("send_terminal_buffer", json!({ "id": id }))
            .await
            .map(|_| ())
    }

    async fn change_terminal_window_size(&self, id: &str, rows: u16, cols: u16) -> BindResult<()> {
        self.call(
            "change_terminal_window_size",
            json!({ "id": id, "rows": rows, "cols": cols }),
        )
        .await
        .map(|_| ())
    }

    fn events(&self) -> broadcast::Receiver<BackendEvent> {
        match self.shared.lock_events().as_ref() {
            Some(sender) => sender.subscribe(),
            None => {
                // Already closed: hand out a receiver that reports Closed.
                let (_, receiver) = broadcast::channel(1);
                receiver
            }
        }
    }
}
