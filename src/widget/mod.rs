//! The local terminal-rendering surface.
//!
//! Rendering is external: anything implementing [`TerminalWidget`] can be bound
//! to a remote session. Widget callbacks (data, resize, title change) arrive as
//! [`WidgetEvent`]s on the channel handed to [`TerminalWidget::open`].

mod stdio;

use crate::error::BindResult;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

pub use stdio::StdioWidget;

/// Terminal size in character cells. Both axes are always non-zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    rows: u16,
    cols: u16,
}

impl Dimensions {
    pub fn new(rows: u16, cols: u16) -> Option<Self> {
        if rows == 0 || cols == 0 {
            return None;
        }
        Some(Self { rows, cols })
    }

    pub fn rows(&self) -> u16 {
        self.rows
    }

    pub fn cols(&self) -> u16 {
        self.cols
    }
}

impl fmt::Display for Dimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.cols, self.rows)
    }
}

/// Raw best-fit proposal from the widget; zero on either axis means "not ready".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FitProposal {
    pub rows: u16,
    pub cols: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WidgetEvent {
    /// Bytes typed or pasted into the widget.
    Data(Vec<u8>),
    /// The widget's grid changed size.
    Resize(Dimensions),
    /// The running program set a new title (OSC 0/2).
    TitleChange(String),
}

pub type WidgetEvents = mpsc::UnboundedSender<WidgetEvent>;

pub trait TerminalWidget: Send {
    /// Attach the widget to its container. Events are delivered on `events`
    /// for as long as the widget lives.
    fn open(&mut self, events: WidgetEvents) -> BindResult<()>;
    fn write(&mut self, data: &[u8]);
    /// Resize the grid. Implementations emit a [`WidgetEvent::Resize`] when the
    /// size actually changes.
    fn resize(&mut self, dims: Dimensions);
    fn dimensions(&self) -> Option<Dimensions>;
    fn propose_dimensions(&self) -> Option<FitProposal>;
    fn font_size(&self) -> f64;
    fn set_font_size(&mut self, size: f64);
    fn set_font_family(&mut self, family: &str);
    fn focus(&mut self);
    fn clear(&mut self);
    fn dispose(&mut self);
}

/// Shared, disposable reference to the mounted widget.
///
/// The controller owns the only strong intent to dispose it; every other
/// holder goes through these methods, which become no-ops once disposed.
#[derive(Clone)]
pub struct WidgetHandle {
    inner: Arc<Mutex<WidgetSlot>>,
}

struct WidgetSlot {
    widget: Option<Box<dyn TerminalWidget>>,
    opened: bool,
}

impl WidgetHandle {
    pub fn new(widget: Box<dyn TerminalWidget>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(WidgetSlot {
                widget: Some(widget),
                opened: false,
            })),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, WidgetSlot> {
        self.inner.lock().expect("widget mutex poisoned")
    }

    /// Runs `f` against the live widget, or returns `None` after dispose.
    pub fn with<R>(&self, f: impl FnOnce(&mut dyn TerminalWidget) -> R) -> Option<R> {
        let mut slot = self.lock();
        slot.widget.as_mut().map(|widget| f(widget.as_mut()))
    }

    /// Opens the widget once; later calls succeed without re-opening.
    pub fn ensure_open(&self, events: &WidgetEvents) -> BindResult<()> {
        let mut slot = self.lock();
        if slot.opened {
            return Ok(());
        }
        if let Some(widget) = slot.widget.as_deref_mut() {
            widget.open(events.clone())?;
            slot.opened = true;
        }
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        let slot = self.lock();
        slot.opened && slot.widget.is_some()
    }

    pub fn is_disposed(&self) -> bool {
        self.lock().widget.is_none()
    }

    pub fn write(&self, data: &[u8]) {
        self.with(|widget| widget.write(data));
    }

    pub fn write_notice(&self, text: &str) {
        self.write(text.as_bytes());
    }

    /// Takes the widget out of the handle and disposes it. Returns `false` if
    /// it was already gone.
    pub fn dispose(&self) -> bool {
        let taken = {
            let mut slot = self.lock();
            slot.opened = false;
            slot.widget.take()
        };
        match taken {
            Some(mut widget) => {
                widget.dispose();
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dimensions_reject_zero_axes() {
        assert!(Dimensions::new(0, 80).is_none());
        assert!(Dimensions::new(24, 0).is_none());
        let dims = Dimensions::new(24, 80).expect("dims");
        assert_eq!((dims.rows(), dims.cols()), (24, 80));
        assert_eq!(dims.to_string(), "80x24");
    }
}
