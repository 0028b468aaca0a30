//! Session controller: binds one mounted widget to one remote PTY at a time.
//!
//! Lifecycle:
//!
//! ```text
//! Unmounted -> WidgetCreated -> Initializing(id) -> Connected(id)
//!                                     ^                  |
//!                                     +-- Reinitializing(id -> id') <-+
//! any mounted phase -> Disposing -> Unmounted
//! ```
//!
//! All mutable controller state lives in one [`ControllerState`] behind a
//! mutex that is never held across an await. Connect attempts carry a
//! [`ConnectTicket`]; each step re-checks it, so work started for an id that
//! is no longer the target is dropped instead of touching shared state.
//! Lock order is state before widget.

mod connector;
mod resize;

use crate::backend::TerminalBackend;
use crate::config::{Config, FitConfig, InputConfig};
use crate::error::{ApiError, BindResult, ErrorCode};
use crate::fit::{LayoutMode, ScreenFitter};
use crate::host::HostShell;
use crate::keys::{self, DpadDirection, KeySymbol};
use crate::options::TerminalOptions;
use crate::widget::{Dimensions, TerminalWidget, WidgetEvent, WidgetEvents, WidgetHandle};
use connector::{ConnectOutcome, ConnectTicket, SessionConnector, SubscriptionHandle};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

pub use resize::ResizeNegotiator;

pub const NOT_FOUND_NOTICE: &str = "--- Terminal Not Found ---";
pub const DISCONNECTED_NOTICE: &str = "\r\n--- Terminal Disconnected ---";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase {
    Unmounted,
    WidgetCreated,
    Initializing(String),
    Connected(String),
    Reinitializing { from: String, to: String },
    /// The connect attempt for this id ended without a live session.
    Failed { id: String, reason: FailureReason },
    Disposing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    NotFound,
    Disconnected,
}

#[derive(Debug, Clone, Default)]
pub struct ControllerSettings {
    pub fit: FitConfig,
    pub input: InputConfig,
}

impl From<&Config> for ControllerSettings {
    fn from(config: &Config) -> Self {
        Self {
            fit: config.fit.clone(),
            input: config.input.clone(),
        }
    }
}

#[derive(Default)]
struct Routes {
    input: Option<ConnectTicket>,
    title_sync: Option<ConnectTicket>,
    resize: Option<Arc<ResizeNegotiator>>,
}

struct ControllerState {
    phase: Phase,
    generation: u64,
    target: Option<String>,
    subscription: Option<SubscriptionHandle>,
    /// Attempt whose event stream closed; it can no longer become live.
    disconnected: Option<ConnectTicket>,
    routes: Routes,
    title: Option<String>,
    options: TerminalOptions,
    fullscreen: bool,
    timers: Vec<JoinHandle<()>>,
    pump: Option<JoinHandle<()>>,
}

impl ControllerState {
    fn is_current(&self, ticket: &ConnectTicket) -> bool {
        self.generation == ticket.generation && self.target.as_deref() == Some(ticket.id.as_str())
    }

    fn is_live(&self, ticket: &ConnectTicket) -> bool {
        self.is_current(ticket) && self.disconnected.as_ref() != Some(ticket)
    }
}

pub(crate) struct Core {
    instance: Uuid,
    backend: Arc<dyn TerminalBackend>,
    host: Arc<dyn HostShell>,
    widget: WidgetHandle,
    widget_events: WidgetEvents,
    fitter: ScreenFitter,
    focus_delay: Duration,
    state: Mutex<ControllerState>,
    phase_tx: watch::Sender<Phase>,
    connect_gate: tokio::sync::Mutex<()>,
}

impl Core {
    fn lock(&self) -> std::sync::MutexGuard<'_, ControllerState> {
        self.state.lock().expect("controller state mutex poisoned")
    }

    fn set_phase(&self, state: &mut ControllerState, phase: Phase) {
        tracing::debug!(instance = %self.instance, phase = ?phase, "Controller phase");
        state.phase = phase.clone();
        self.phase_tx.send_replace(phase);
    }

    fn set_phase_if_current(&self, ticket: &ConnectTicket, phase: Phase) -> bool {
        let mut state = self.lock();
        if !state.is_current(ticket) {
            return false;
        }
        self.set_phase(&mut state, phase);
        true
    }

    pub(crate) fn is_current(&self, ticket: &ConnectTicket) -> bool {
        self.lock().is_current(ticket)
    }

    /// Records applied options and returns the layout to fit against.
    pub(crate) fn store_options(
        &self,
        ticket: &ConnectTicket,
        options: TerminalOptions,
    ) -> Option<LayoutMode> {
        let mut state = self.lock();
        if !state.is_current(ticket) {
            return None;
        }
        state.options = options;
        Some(options.layout(state.fullscreen))
    }

    pub(crate) fn set_title_if_current(&self, ticket: &ConnectTicket, title: String) -> bool {
        let mut state = self.lock();
        if !state.is_current(ticket) {
            return false;
        }
        state.title = Some(title);
        true
    }

    pub(crate) fn write_if_current(&self, ticket: &ConnectTicket, data: &[u8]) -> bool {
        let state = self.lock();
        if !state.is_current(ticket) {
            return false;
        }
        self.widget.write(data);
        true
    }

    /// Enables title sync and input forwarding for `ticket`'s session.
    pub(crate) fn attach_routes(&self, ticket: &ConnectTicket) -> bool {
        let mut state = self.lock();
        if !state.is_current(ticket) {
            return false;
        }
        state.routes.title_sync = Some(ticket.clone());
        state.routes.input = Some(ticket.clone());
        true
    }

    pub(crate) fn install_negotiator(
        &self,
        ticket: &ConnectTicket,
        negotiator: Arc<ResizeNegotiator>,
    ) -> bool {
        let mut state = self.lock();
        if !state.is_current(ticket) {
            return false;
        }
        state.routes.resize = Some(negotiator);
        true
    }

    pub(crate) fn clear_routes_for(&self, ticket: &ConnectTicket) {
        let mut state = self.lock();
        if state.routes.input.as_ref() == Some(ticket) {
            state.routes.input = None;
        }
        if state.routes.title_sync.as_ref() == Some(ticket) {
            state.routes.title_sync = None;
        }
        if state
            .routes
            .resize
            .as_ref()
            .is_some_and(|negotiator| negotiator.session_id() == ticket.id)
        {
            state.routes.resize = None;
        }
    }

    /// Installs the live subscription, or hands it back if `ticket` went stale
    /// or its event stream already closed.
    pub(crate) fn install_subscription(
        &self,
        ticket: &ConnectTicket,
        handle: SubscriptionHandle,
    ) -> Result<(), SubscriptionHandle> {
        let mut state = self.lock();
        if !state.is_live(ticket) || state.subscription.is_some() {
            return Err(handle);
        }
        state.subscription = Some(handle);
        Ok(())
    }

    /// Records that `ticket`'s event stream closed. The phase stays
    /// `Failed` for this attempt; a later step cannot report it connected.
    pub(crate) fn mark_disconnected(&self, ticket: &ConnectTicket) {
        let mut state = self.lock();
        if !state.is_current(ticket) {
            return;
        }
        tracing::warn!(session_id = %ticket.id, "Backend event stream closed");
        state.disconnected = Some(ticket.clone());
        self.set_phase(
            &mut state,
            Phase::Failed {
                id: ticket.id.clone(),
                reason: FailureReason::Disconnected,
            },
        );
    }

    pub(crate) fn is_disconnected(&self, ticket: &ConnectTicket) -> bool {
        self.lock().disconnected.as_ref() == Some(ticket)
    }

    fn set_connected(&self, ticket: &ConnectTicket) -> bool {
        let mut state = self.lock();
        if !state.is_live(ticket) {
            return false;
        }
        self.set_phase(&mut state, Phase::Connected(ticket.id.clone()));
        true
    }

    /// Takes the live subscription and drops every route, leaving nothing
    /// attached to the widget.
    fn detach_active(&self) -> Option<SubscriptionHandle> {
        let mut state = self.lock();
        state.routes = Routes::default();
        state.subscription.take()
    }

    fn input_target(&self) -> Option<String> {
        let state = self.lock();
        state
            .routes
            .input
            .as_ref()
            .filter(|ticket| state.is_current(ticket))
            .map(|ticket| ticket.id.clone())
    }

    async fn run_connect(self: Arc<Self>, ticket: ConnectTicket) {
        let _gate = self.connect_gate.lock().await;
        if !self.is_current(&ticket) {
            tracing::debug!(session_id = %ticket.id, "Connect superseded before start");
            return;
        }

        let connector = SessionConnector::new(self.clone());
        if let Some(previous) = self.detach_active() {
            connector.teardown(previous).await;
        }
        if !self.set_phase_if_current(&ticket, Phase::Initializing(ticket.id.clone())) {
            return;
        }

        match connector.connect(&ticket).await {
            Ok(ConnectOutcome::Ready) => {
                if self.set_connected(&ticket) {
                    tracing::info!(instance = %self.instance, session_id = %ticket.id, "Terminal connected");
                }
            }
            Ok(ConnectOutcome::NotFound) => {
                let current = self.set_phase_if_current(
                    &ticket,
                    Phase::Failed {
                        id: ticket.id.clone(),
                        reason: FailureReason::NotFound,
                    },
                );
                if current {
                    self.host.navigate_back();
                }
            }
            Ok(ConnectOutcome::Disconnected) => {
                tracing::debug!(session_id = %ticket.id, "Event stream closed during connect");
            }
            Ok(ConnectOutcome::Stale) => {
                tracing::debug!(session_id = %ticket.id, "Discarded stale connect");
            }
            Err(err) => {
                tracing::error!(session_id = %ticket.id, error = %err, "Connect failed");
                if self.write_if_current(&ticket, DISCONNECTED_NOTICE.as_bytes()) {
                    self.set_phase_if_current(
                        &ticket,
                        Phase::Failed {
                            id: ticket.id.clone(),
                            reason: FailureReason::Disconnected,
                        },
                    );
                }
            }
        }
    }

    fn schedule_focus(&self) {
        let widget = self.widget.clone();
        let delay = self.focus_delay;
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            widget.with(|w| w.focus());
        });
        let mut state = self.lock();
        if matches!(state.phase, Phase::Disposing | Phase::Unmounted) {
            timer.abort();
            return;
        }
        state.timers.retain(|timer| !timer.is_finished());
        state.timers.push(timer);
    }
}

async fn pump_widget_events(core: Arc<Core>, mut events: mpsc::UnboundedReceiver<WidgetEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            WidgetEvent::Data(data) => {
                let Some(id) = core.input_target() else {
                    tracing::trace!("Dropping input with no attached session");
                    continue;
                };
                if let Err(err) = core.backend.send_terminal_input(&id, &data).await {
                    tracing::warn!(session_id = %id, error = %err, "Input forwarding failed");
                }
            }
            WidgetEvent::Resize(dims) => {
                let negotiator = core.lock().routes.resize.clone();
                match negotiator {
                    Some(negotiator) => negotiator.on_resize(dims),
                    None => tracing::trace!(size = %dims, "Resize before session attached"),
                }
            }
            WidgetEvent::TitleChange(title) => {
                let ticket = core.lock().routes.title_sync.clone();
                let Some(ticket) = ticket else {
                    continue;
                };
                if !core.set_title_if_current(&ticket, title.clone()) {
                    continue;
                }
                let backend = core.backend.clone();
                tokio::spawn(async move {
                    if let Err(err) = backend.set_terminal_title(&ticket.id, &title).await {
                        tracing::warn!(session_id = %ticket.id, error = %err, "Title update failed");
                    }
                });
            }
        }
    }
}

/// Controller for one mounted terminal view.
///
/// Must be created inside a tokio runtime. Dropping the controller without
/// [`unmount`](Self::unmount) leaves the remote subscription in place.
#[derive(Clone)]
pub struct TerminalController {
    core: Arc<Core>,
}

impl TerminalController {
    /// Mounts a view around `widget`. The widget is created here exactly once
    /// and opened lazily by the first connect.
    pub fn mount(
        widget: Box<dyn TerminalWidget>,
        backend: Arc<dyn TerminalBackend>,
        host: Arc<dyn HostShell>,
        settings: ControllerSettings,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (phase_tx, _) = watch::channel(Phase::WidgetCreated);
        let core = Arc::new(Core {
            instance: Uuid::new_v4(),
            backend,
            host,
            widget: WidgetHandle::new(widget),
            widget_events: events_tx,
            fitter: ScreenFitter::new(settings.fit),
            focus_delay: Duration::from_millis(settings.input.focus_delay_ms),
            state: Mutex::new(ControllerState {
                phase: Phase::WidgetCreated,
                generation: 0,
                target: None,
                subscription: None,
                disconnected: None,
                routes: Routes::default(),
                title: None,
                options: TerminalOptions::default(),
                fullscreen: false,
                timers: Vec::new(),
                pump: None,
            }),
            phase_tx,
            connect_gate: tokio::sync::Mutex::new(()),
        });
        let pump = tokio::spawn(pump_widget_events(core.clone(), events_rx));
        core.lock().pump = Some(pump);
        tracing::debug!(instance = %core.instance, "Terminal view mounted");
        Self { core }
    }

    /// Points the view at session `id`. The first call connects; a different
    /// id tears the current session down and reconnects. Repeating the
    /// current id is a no-op.
    pub fn set_session(&self, id: impl Into<String>) {
        let id = id.into();
        let ticket = {
            let mut state = self.core.lock();
            if matches!(state.phase, Phase::Disposing | Phase::Unmounted) {
                tracing::warn!(session_id = %id, "Ignoring session change on unmounted view");
                return;
            }
            if state.target.as_deref() == Some(id.as_str()) {
                return;
            }
            state.generation += 1;
            let next = match state.target.take() {
                Some(previous) => Phase::Reinitializing {
                    from: previous,
                    to: id.clone(),
                },
                None => Phase::Initializing(id.clone()),
            };
            state.target = Some(id.clone());
            state.title = Some(id.clone());
            self.core.set_phase(&mut state, next);
            ConnectTicket {
                id,
                generation: state.generation,
            }
        };
        tokio::spawn(self.core.clone().run_connect(ticket));
    }

    /// Tears down the session, disposes the widget and cancels pending
    /// timers. Safe to call repeatedly.
    pub async fn unmount(&self) {
        let (subscription, timers, pump) = {
            let mut state = self.core.lock();
            if matches!(state.phase, Phase::Disposing | Phase::Unmounted) {
                return;
            }
            self.core.set_phase(&mut state, Phase::Disposing);
            state.generation += 1;
            state.target = None;
            state.routes = Routes::default();
            state.fullscreen = false;
            (
                state.subscription.take(),
                std::mem::take(&mut state.timers),
                state.pump.take(),
            )
        };

        for timer in timers {
            timer.abort();
        }
        if let Some(subscription) = subscription {
            SessionConnector::new(self.core.clone())
                .teardown(subscription)
                .await;
        }
        self.core.widget.dispose();
        if let Some(pump) = pump {
            pump.abort();
        }

        let mut state = self.core.lock();
        self.core.set_phase(&mut state, Phase::Unmounted);
        tracing::debug!(instance = %self.core.instance, "Terminal view unmounted");
    }

    /// Re-runs the screen fit, e.g. on a layout tick. Returns the new size,
    /// or `None` if the layout is not ready yet.
    pub fn relayout(&self) -> Option<Dimensions> {
        let layout = {
            let state = self.core.lock();
            if matches!(state.phase, Phase::Disposing | Phase::Unmounted) {
                return None;
            }
            state.options.layout(state.fullscreen)
        };
        self.core.fitter.fit(&self.core.widget, layout)
    }

    pub fn set_fullscreen(&self, fullscreen: bool) -> Option<Dimensions> {
        {
            let mut state = self.core.lock();
            if matches!(state.phase, Phase::Disposing | Phase::Unmounted) {
                return None;
            }
            state.fullscreen = fullscreen;
        }
        self.relayout()
    }

    /// Keyboard affordance: focuses the widget directly when the virtual
    /// keyboard is disabled, otherwise asks the host for it.
    pub fn open_keyboard(&self) {
        if self.options().disable_virtual_keyboard {
            self.core.schedule_focus();
        } else {
            self.core.host.request_keyboard();
        }
    }

    pub fn focus_terminal(&self) {
        self.core.schedule_focus();
    }

    /// Maps a directional-pad press to an arrow key. Returns `false` when
    /// d-pad mapping is disabled and the press was not consumed.
    pub async fn handle_dpad(&self, direction: DpadDirection) -> BindResult<bool> {
        let (enabled, fullscreen) = {
            let state = self.core.lock();
            (state.options.use_dpad, state.fullscreen)
        };
        if !enabled {
            return Ok(false);
        }
        self.send_key(direction.symbol()).await?;
        if !fullscreen {
            self.core.schedule_focus();
        }
        Ok(true)
    }

    pub async fn send_key(&self, symbol: KeySymbol) -> BindResult<()> {
        let bytes = keys::bytes_for(symbol);
        if bytes.is_empty() {
            return Ok(());
        }
        let id = self.core.input_target().ok_or_else(|| {
            ApiError::new(ErrorCode::InvalidArgument, "No session is attached")
        })?;
        self.core.backend.send_terminal_input(&id, bytes).await
    }

    pub fn phase(&self) -> Phase {
        self.core.lock().phase.clone()
    }

    pub fn watch_phase(&self) -> watch::Receiver<Phase> {
        self.core.phase_tx.subscribe()
    }

    pub fn title(&self) -> Option<String> {
        self.core.lock().title.clone()
    }

    pub fn options(&self) -> TerminalOptions {
        self.core.lock().options
    }

    pub fn is_fullscreen(&self) -> bool {
        self.core.lock().fullscreen
    }

    /// Id of the live subscription, if any.
    pub fn subscribed_session(&self) -> Option<String> {
        self.core
            .lock()
            .subscription
            .as_ref()
            .map(|handle| handle.id.clone())
    }
}
