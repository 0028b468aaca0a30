use super::resize::ResizeNegotiator;
use super::{Core, DISCONNECTED_NOTICE, NOT_FOUND_NOTICE};
use crate::backend::BackendEvent;
use crate::error::BindResult;
use crate::options::{ConfigAdapter, RemoteConfig};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

/// Identity of one connect attempt: the session it targets and the controller
/// generation it was started under. Any retarget or unmount bumps the
/// generation and makes older tickets stale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ConnectTicket {
    pub(crate) id: String,
    pub(crate) generation: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConnectOutcome {
    Ready,
    NotFound,
    /// The event stream closed before the subscription went live.
    Disconnected,
    Stale,
}

/// One output listener paired with one remote subscription.
pub(crate) struct SubscriptionHandle {
    pub(crate) id: String,
    listener: JoinHandle<()>,
}

/// Bridges the mounted widget to one session's byte stream.
pub(crate) struct SessionConnector {
    core: Arc<Core>,
}

impl SessionConnector {
    pub(crate) fn new(core: Arc<Core>) -> Self {
        Self { core }
    }

    /// Runs the connect protocol for `ticket`. Anything set up by an attempt
    /// that does not end `Ready` is undone before returning.
    pub(crate) async fn connect(&self, ticket: &ConnectTicket) -> BindResult<ConnectOutcome> {
        let result = self.connect_steps(ticket).await;
        if !matches!(result, Ok(ConnectOutcome::Ready)) {
            self.core.clear_routes_for(ticket);
        }
        result
    }

    async fn connect_steps(&self, ticket: &ConnectTicket) -> BindResult<ConnectOutcome> {
        let core = &self.core;
        let id = ticket.id.as_str();

        core.widget.ensure_open(&core.widget_events)?;

        let raw_config = core.backend.get_config().await?;
        let config = RemoteConfig::from_value(&raw_config);
        if !core.is_current(ticket) {
            return Ok(ConnectOutcome::Stale);
        }
        let options = ConfigAdapter::apply(&core.widget, &config);
        let Some(layout) = core.store_options(ticket, options) else {
            return Ok(ConnectOutcome::Stale);
        };
        if core.fitter.fit(&core.widget, layout).is_none() {
            tracing::debug!(session_id = %id, "Layout not ready; fit deferred");
        }

        let metadata = core.backend.get_terminal(id).await?;
        if !core.is_current(ticket) {
            return Ok(ConnectOutcome::Stale);
        }
        let Some(metadata) = metadata else {
            tracing::warn!(session_id = %id, "Terminal not found");
            core.write_if_current(ticket, NOT_FOUND_NOTICE.as_bytes());
            return Ok(ConnectOutcome::NotFound);
        };
        if let Some(title) = metadata.title.filter(|title| !title.is_empty()) {
            core.set_title_if_current(ticket, title);
        }

        if !core.attach_routes(ticket) {
            return Ok(ConnectOutcome::Stale);
        }

        let negotiator = Arc::new(ResizeNegotiator::new(core.backend.clone(), id));
        if !core.install_negotiator(ticket, negotiator.clone()) {
            return Ok(ConnectOutcome::Stale);
        }
        if let Some(dims) = core.widget.with(|w| w.dimensions()).flatten()
            && let Err(err) = negotiator.send(dims).await
        {
            tracing::warn!(session_id = %id, error = %err, "Initial window size failed");
        }

        // Listen before subscribing so nothing emitted after subscribe is lost.
        let listener = spawn_output_listener(core.clone(), ticket.clone(), core.backend.events());
        let handle = SubscriptionHandle {
            id: id.to_string(),
            listener,
        };
        if let Err(err) = core.backend.subscribe_terminal(id).await {
            handle.listener.abort();
            return Err(err);
        }
        if !core.is_current(ticket) {
            self.release(handle).await;
            return Ok(ConnectOutcome::Stale);
        }

        if let Err(err) = core.backend.send_terminal_buffer(id).await {
            tracing::warn!(session_id = %id, error = %err, "Screen buffer replay failed");
        }

        match core.install_subscription(ticket, handle) {
            Ok(()) => Ok(ConnectOutcome::Ready),
            Err(handle) => {
                self.release(handle).await;
                if core.is_disconnected(ticket) {
                    Ok(ConnectOutcome::Disconnected)
                } else {
                    Ok(ConnectOutcome::Stale)
                }
            }
        }
    }

    /// Unregisters the listener and unsubscribes (best effort). The widget is
    /// left alone.
    async fn release(&self, handle: SubscriptionHandle) {
        handle.listener.abort();
        if let Err(err) = self.core.backend.unsubscribe_terminal(&handle.id).await {
            tracing::warn!(session_id = %handle.id, error = %err, "Unsubscribe failed");
        }
    }

    /// Releases the live subscription and clears what it drew.
    pub(crate) async fn teardown(&self, handle: SubscriptionHandle) {
        let id = handle.id.clone();
        self.release(handle).await;
        self.core.widget.with(|w| w.clear());
        tracing::debug!(session_id = %id, "Subscription torn down");
    }
}

fn spawn_output_listener(
    core: Arc<Core>,
    ticket: ConnectTicket,
    mut events: broadcast::Receiver<BackendEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if event.session_id() != ticket.id {
                        continue;
                    }
                    let delivered = match event {
                        BackendEvent::Output { data, .. } => core.write_if_current(&ticket, &data),
                        BackendEvent::TitleChanged { title, .. } => {
                            core.set_title_if_current(&ticket, title)
                        }
                    };
                    if !delivered {
                        tracing::debug!(session_id = %ticket.id, "Discarding event for stale session");
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(session_id = %ticket.id, skipped, "Output listener lagged; requesting replay");
                    if !core.is_current(&ticket) {
                        continue;
                    }
                    // Dropped output leaves the screen out of sync; redraw it.
                    if let Err(err) = core.backend.send_terminal_buffer(&ticket.id).await {
                        tracing::warn!(session_id = %ticket.id, error = %err, "Screen buffer replay failed");
                    }
                }
                Err(RecvError::Closed) => {
                    if core.write_if_current(&ticket, DISCONNECTED_NOTICE.as_bytes()) {
                        core.mark_disconnected(&ticket);
                    }
                    break;
                }
            }
        }
    })
}
