use crate::backend::TerminalBackend;
use crate::error::BindResult;
use crate::widget::Dimensions;
use std::sync::{Arc, Mutex};

/// Forwards local grid sizes to the remote PTY of one session.
///
/// Only non-empty [`Dimensions`] can reach the wire. Consecutive identical
/// sizes are sent once; otherwise the last write wins on the remote.
pub struct ResizeNegotiator {
    backend: Arc<dyn TerminalBackend>,
    session_id: String,
    last_sent: Mutex<Option<Dimensions>>,
}

impl ResizeNegotiator {
    pub fn new(backend: Arc<dyn TerminalBackend>, session_id: impl Into<String>) -> Self {
        Self {
            backend,
            session_id: session_id.into(),
            last_sent: Mutex::new(None),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn last_sent(&self) -> Option<Dimensions> {
        *self.last_sent.lock().expect("resize mutex poisoned")
    }

    fn claim(&self, dims: Dimensions) -> bool {
        let mut last = self.last_sent.lock().expect("resize mutex poisoned");
        if *last == Some(dims) {
            return false;
        }
        *last = Some(dims);
        true
    }

    /// Sends `dims` and waits for the remote to acknowledge it.
    pub async fn send(&self, dims: Dimensions) -> BindResult<()> {
        if !self.claim(dims) {
            return Ok(());
        }
        tracing::debug!(session_id = %self.session_id, size = %dims, "Sending window size");
        self.backend
            .change_terminal_window_size(&self.session_id, dims.rows(), dims.cols())
            .await
    }

    /// Fire-and-forget variant used for widget resize events.
    pub fn on_resize(self: &Arc<Self>, dims: Dimensions) {
        let negotiator = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(err) = negotiator.send(dims).await {
                tracing::warn!(
                    session_id = %negotiator.session_id,
                    size = %dims,
                    error = %err,
                    "Window size update failed"
                );
            }
        });
    }
}
