//! RPC surface of the backend process manager.

mod socket;

use crate::error::BindResult;
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;

pub use socket::SocketBackend;

/// Metadata the backend keeps for one remote terminal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionMetadata {
    #[serde(default)]
    pub title: Option<String>,
}

/// Events pushed by the backend, keyed by session id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendEvent {
    Output { id: String, data: Bytes },
    TitleChanged { id: String, title: String },
}

impl BackendEvent {
    pub fn session_id(&self) -> &str {
        match self {
            BackendEvent::Output { id, .. } | BackendEvent::TitleChanged { id, .. } => id,
        }
    }
}

#[async_trait]
pub trait TerminalBackend: Send + Sync {
    /// Raw versioned config object; see [`crate::options::RemoteConfig`].
    async fn get_config(&self) -> BindResult<Value>;
    /// `None` when the backend has no terminal with this id.
    async fn get_terminal(&self, id: &str) -> BindResult<Option<SessionMetadata>>;
    async fn set_terminal_title(&self, id: &str, title: &str) -> BindResult<()>;
    async fn subscribe_terminal(&self, id: &str) -> BindResult<()>;
    async fn unsubscribe_terminal(&self, id: &str) -> BindResult<()>;
    async fn send_terminal_input(&self, id: &str, data: &[u8]) -> BindResult<()>;
    /// Asks the backend to replay the current screen buffer as output events.
    async fn send_terminal_buffer(&self, id: &str) -> BindResult<()>;
    async fn change_terminal_window_size(&self, id: &str, rows: u16, cols: u16) -> BindResult<()>;
    /// Registers a listener on the output event stream. Events published
    /// after this call are delivered to the returned receiver in order.
    fn events(&self) -> broadcast::Receiver<BackendEvent>;
}
