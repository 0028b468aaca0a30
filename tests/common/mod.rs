#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use ptybind::backend::{BackendEvent, SessionMetadata, TerminalBackend};
use ptybind::error::{ApiError, BindResult, ErrorCode};
use ptybind::host::HostShell;
use ptybind::widget::{
    Dimensions, FitProposal, TerminalWidget, WidgetEvent, WidgetEvents,
};
use serde_json::{Value, json};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Notify, broadcast};

/// In-memory backend that records every call in order.
pub struct FakeBackend {
    calls: Mutex<Vec<String>>,
    config: Mutex<Value>,
    terminals: Mutex<HashMap<String, SessionMetadata>>,
    subscribed: Mutex<BTreeSet<String>>,
    inputs: Mutex<Vec<(String, Vec<u8>)>>,
    sizes: Mutex<Vec<(String, u16, u16)>>,
    titles: Mutex<Vec<(String, String)>>,
    gates: Mutex<HashMap<String, Arc<Notify>>>,
    events: Mutex<Option<broadcast::Sender<BackendEvent>>>,
    pub fail_config: AtomicBool,
    pub fail_buffer: AtomicBool,
    pub fail_subscribe: AtomicBool,
    /// Drops the event stream while `subscribe_terminal` is in flight.
    pub close_on_subscribe: AtomicBool,
}

impl FakeBackend {
    pub fn new() -> Arc<Self> {
        let (events, _) = broadcast::channel(64);
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            config: Mutex::new(json!({ "__version__": 1, "font_size": 16 })),
            terminals: Mutex::new(HashMap::new()),
            subscribed: Mutex::new(BTreeSet::new()),
            inputs: Mutex::new(Vec::new()),
            sizes: Mutex::new(Vec::new()),
            titles: Mutex::new(Vec::new()),
            gates: Mutex::new(HashMap::new()),
            events: Mutex::new(Some(events)),
            fail_config: AtomicBool::new(false),
            fail_buffer: AtomicBool::new(false),
            fail_subscribe: AtomicBool::new(false),
            close_on_subscribe: AtomicBool::new(false),
        })
    }

    pub fn with_terminal(self: Arc<Self>, id: &str, title: Option<&str>) -> Arc<Self> {
        self.terminals.lock().unwrap().insert(
            id.to_string(),
            SessionMetadata {
                title: title.map(str::to_string),
            },
        );
        self
    }

    pub fn set_config(&self, config: Value) {
        *self.config.lock().unwrap() = config;
    }

    /// Holds the call logged as `call` (e.g. `"get_terminal:a"`) until the
    /// returned gate is notified.
    pub fn hold(&self, call: &str) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.gates
            .lock()
            .unwrap()
            .insert(call.to_string(), gate.clone());
        gate
    }

    async fn pass_gate(&self, call: &str) {
        let gate = self.gates.lock().unwrap().get(call).cloned();
        if let Some(gate) = gate {
            gate.notified().await;
        }
    }

    pub fn emit_output(&self, id: &str, data: &[u8]) {
        if let Some(sender) = self.events.lock().unwrap().as_ref() {
            let _ = sender.send(BackendEvent::Output {
                id: id.to_string(),
                data: Bytes::copy_from_slice(data),
            });
        }
    }

    pub fn emit_title(&self, id: &str, title: &str) {
        if let Some(sender) = self.events.lock().unwrap().as_ref() {
            let _ = sender.send(BackendEvent::TitleChanged {
                id: id.to_string(),
                title: title.to_string(),
            });
        }
    }

    pub fn close_events(&self) {
        self.events.lock().unwrap().take();
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn called(&self, call: &str) -> bool {
        self.calls().iter().any(|c| c == call)
    }

    pub fn count(&self, call: &str) -> usize {
        self.calls().iter().filter(|c| *c == call).count()
    }

    pub fn position(&self, call: &str) -> Option<usize> {
        self.calls().iter().position(|c| c == call)
    }

    pub fn subscribed(&self) -> Vec<String> {
        self.subscribed.lock().unwrap().iter().cloned().collect()
    }

    pub fn inputs(&self) -> Vec<(String, Vec<u8>)> {
        self.inputs.lock().unwrap().clone()
    }

    pub fn sizes(&self) -> Vec<(String, u16, u16)> {
        self.sizes.lock().unwrap().clone()
    }

    pub fn titles(&self) -> Vec<(String, String)> {
        self.titles.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl TerminalBackend for FakeBackend {
    async fn get_config(&self) -> BindResult<Value> {
        self.record("get_config".to_string());
        tokio::task::yield_now().await;
        if self.fail_config.load(Ordering::SeqCst) {
            return Err(ApiError::new(ErrorCode::TransportFailure, "config unavailable").into());
        }
        Ok(self.config.lock().unwrap().clone())
    }

    async fn get_terminal(&self, id: &str) -> BindResult<Option<SessionMetadata>> {
        let call = format!("get_terminal:{id}");
        self.record(call.clone());
        self.pass_gate(&call).await;
        tokio::task::yield_now().await;
        Ok(self.terminals.lock().unwrap().get(id).cloned())
    }

    async fn set_terminal_title(&self, id: &str, title: &str) -> BindResult<()> {
        self.record(format!("set_title:{id}"));
        self.titles
            .lock()
            .unwrap()
            .push((id.to_string(), title.to_string()));
        Ok(())
    }

    async fn subscribe_terminal(&self, id: &str) -> BindResult<()> {
        let call = format!("subscribe:{id}");
        self.record(call.clone());
        self.pass_gate(&call).await;
        if self.close_on_subscribe.load(Ordering::SeqCst) {
            self.close_events();
        }
        tokio::task::yield_now().await;
        if self.fail_subscribe.load(Ordering::SeqCst) {
            return Err(ApiError::new(ErrorCode::TransportFailure, "subscribe rejected").into());
        }
        self.subscribed.lock().unwrap().insert(id.to_string());
        Ok(())
    }

    async fn unsubscribe_terminal(&self, id: &str) -> BindResult<()> {
        self.record(format!("unsubscribe:{id}"));
        self.subscribed.lock().unwrap().remove(id);
        Ok(())
    }

    async fn send_terminal_input(&self, id: &str, data: &[u8]) -> BindResult<()> {
        self.inputs
            .lock()
            .unwrap()
            .push((id.to_string(), data.to_vec()));
        Ok(())
    }

    async fn send_terminal_buffer(&self, id: &str) -> BindResult<()> {
        self.record(format!("buffer:{id}"));
        if self.fail_buffer.load(Ordering::SeqCst) {
            return Err(ApiError::new(ErrorCode::RemoteError, "no buffer").into());
        }
        Ok(())
    }

    async fn change_terminal_window_size(&self, id: &str, rows: u16, cols: u16) -> BindResult<()> {
        self.record(format!("size:{id}:{cols}x{rows}"));
        self.sizes.lock().unwrap().push((id.to_string(), rows, cols));
        Ok(())
    }

    fn events(&self) -> broadcast::Receiver<BackendEvent> {
        self.record("events".to_string());
        match self.events.lock().unwrap().as_ref() {
            Some(sender) => sender.subscribe(),
            None => broadcast::channel(1).1,
        }
    }
}

/// What a [`FakeWidget`] saw, shared with the test.
#[derive(Default)]
pub struct WidgetLog {
    pub written: Vec<u8>,
    pub resizes: Vec<Dimensions>,
    pub opens: usize,
    pub clears: usize,
    pub focuses: usize,
    pub disposes: usize,
    pub font_family: Option<String>,
    pub font_size: f64,
    pub proposal: Option<FitProposal>,
    pub dims: Option<Dimensions>,
    events: Option<WidgetEvents>,
}

#[derive(Clone)]
pub struct WidgetView(Arc<Mutex<WidgetLog>>);

impl WidgetView {
    pub fn log(&self) -> std::sync::MutexGuard<'_, WidgetLog> {
        self.0.lock().unwrap()
    }

    pub fn written(&self) -> String {
        String::from_utf8_lossy(&self.log().written).into_owned()
    }

    pub fn set_proposal(&self, rows: u16, cols: u16) {
        self.log().proposal = Some(FitProposal { rows, cols });
    }

    /// Simulates user activity inside the widget.
    pub fn emit(&self, event: WidgetEvent) {
        let events = self.log().events.clone();
        events
            .expect("widget not opened")
            .send(event)
            .expect("controller gone");
    }
}

pub struct FakeWidget(Arc<Mutex<WidgetLog>>);

impl FakeWidget {
    pub fn new() -> (Box<dyn TerminalWidget>, WidgetView) {
        let log = Arc::new(Mutex::new(WidgetLog {
            font_size: 16.0,
            proposal: Some(FitProposal { rows: 24, cols: 80 }),
            ..WidgetLog::default()
        }));
        (Box::new(FakeWidget(log.clone())), WidgetView(log))
    }

    fn log(&self) -> std::sync::MutexGuard<'_, WidgetLog> {
        self.0.lock().unwrap()
    }
}

impl TerminalWidget for FakeWidget {
    fn open(&mut self, events: WidgetEvents) -> BindResult<()> {
        let mut log = self.log();
        log.opens += 1;
        log.events = Some(events);
        Ok(())
    }

    fn write(&mut self, data: &[u8]) {
        self.log().written.extend_from_slice(data);
    }

    fn resize(&mut self, dims: Dimensions) {
        let mut log = self.log();
        log.resizes.push(dims);
        if log.dims == Some(dims) {
            return;
        }
        log.dims = Some(dims);
        if let Some(events) = &log.events {
            let _ = events.send(WidgetEvent::Resize(dims));
        }
    }

    fn dimensions(&self) -> Option<Dimensions> {
        self.log().dims
    }

    fn propose_dimensions(&self) -> Option<FitProposal> {
        self.log().proposal
    }

    fn font_size(&self) -> f64 {
        self.log().font_size
    }

    fn set_font_size(&mut self, size: f64) {
        self.log().font_size = size;
    }

    fn set_font_family(&mut self, family: &str) {
        self.log().font_family = Some(family.to_string());
    }

    fn focus(&mut self) {
        self.log().focuses += 1;
    }

    fn clear(&mut self) {
        let mut log = self.log();
        log.clears += 1;
        log.written.clear();
    }

    fn dispose(&mut self) {
        let mut log = self.log();
        log.disposes += 1;
        log.events = None;
    }
}

#[derive(Default)]
pub struct FakeHost {
    pub back: AtomicUsize,
    pub keyboard: AtomicUsize,
}

impl FakeHost {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn back_count(&self) -> usize {
        self.back.load(Ordering::SeqCst)
    }

    pub fn keyboard_count(&self) -> usize {
        self.keyboard.load(Ordering::SeqCst)
    }
}

impl HostShell for FakeHost {
    fn navigate_back(&self) {
        self.back.fetch_add(1, Ordering::SeqCst);
    }

    fn request_keyboard(&self) {
        self.keyboard.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn dims(rows: u16, cols: u16) -> Dimensions {
    Dimensions::new(rows, cols).expect("non-empty dims")
}

/// Polls `condition` until it holds, failing the test after two seconds.
pub async fn wait_for(what: &str, condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Lets spawned tasks run for a short while.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}
