use super::{Dimensions, FitProposal, TerminalWidget, WidgetEvent, WidgetEvents};
use crate::error::{ApiError, BindResult, ErrorCode};
use std::io::{Read, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

/// A widget backed by the controlling tty of this process.
///
/// Stdin is switched to raw mode while the widget is open and every byte read
/// is reported as [`WidgetEvent::Data`]. Output goes straight to stdout.
///
/// A tty measures in cells, so [`font_size`](TerminalWidget::font_size)
/// reports 0 and no pixel chrome correction applies. Requested font settings
/// are only recorded.
pub struct StdioWidget {
    original_termios: Option<libc::termios>,
    events: Option<WidgetEvents>,
    stop: Arc<AtomicBool>,
    dims: Option<Dimensions>,
    requested_font_size: Option<f64>,
    font_family: String,
}

impl StdioWidget {
    pub fn new() -> Self {
        Self {
            original_termios: None,
            events: None,
            stop: Arc::new(AtomicBool::new(false)),
            dims: None,
            requested_font_size: None,
            font_family: String::new(),
        }
    }

    pub fn font_family(&self) -> &str {
        &self.font_family
    }

    pub fn requested_font_size(&self) -> Option<f64> {
        self.requested_font_size
    }

    fn enter_raw_mode(&mut self) -> BindResult<()> {
        let mut termios = unsafe { std::mem::zeroed::<libc::termios>() };
        let ret = unsafe { libc::tcgetattr(libc::STDIN_FILENO, &mut termios) };
        if ret == -1 {
            return Err(ApiError::new(ErrorCode::IoError, "stdin is not a terminal")
                .with_details(std::io::Error::last_os_error().to_string())
                .into());
        }
        let original = termios;
        unsafe { libc::cfmakeraw(&mut termios) };
        let ret = unsafe { libc::tcsetattr(libc::STDIN_FILENO, libc::TCSANOW, &termios) };
        if ret == -1 {
            return Err(ApiError::new(ErrorCode::IoError, "Failed to enter raw mode")
                .with_details(std::io::Error::last_os_error().to_string())
                .into());
        }
        self.original_termios = Some(original);
        Ok(())
    }

    fn restore_mode(&mut self) {
        if let Some(original) = self.original_termios.take() {
            unsafe { libc::tcsetattr(libc::STDIN_FILENO, libc::TCSANOW, &original) };
        }
    }
}

impl Default for StdioWidget {
    fn default() -> Self {
        Self::new()
    }
}

impl TerminalWidget for StdioWidget {
    fn open(&mut self, events: WidgetEvents) -> BindResult<()> {
        self.enter_raw_mode()?;
        self.events = Some(events.clone());
        let stop = self.stop.clone();
        thread::spawn(move || {
            let mut stdin = std::io::stdin();
            let mut buffer = [0u8; 1024];
            while !stop.load(Ordering::SeqCst) {
                match stdin.read(&mut buffer) {
                    Ok(0) => break,
                    Ok(n) => {
                        if events.send(WidgetEvent::Data(buffer[..n].to_vec())).is_err() {
                            break;
                        }
                    }
                    Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
                    Err(err) => {
                        tracing::warn!(error = %err, "stdin read failed");
                        break;
                    }
                }
            }
        });
        Ok(())
    }

    fn write(&mut self, data: &[u8]) {
        let mut stdout = std::io::stdout().lock();
        if let Err(err) = stdout.write_all(data).and_then(|_| stdout.flush()) {
            tracing::warn!(error = %err, "stdout write failed");
        }
    }

    fn resize(&mut self, dims: Dimensions) {
        if self.dims == Some(dims) {
            return;
        }
        self.dims = Some(dims);
        if let Some(events) = &self.events {
            let _ = events.send(WidgetEvent::Resize(dims));
        }
    }

    fn dimensions(&self) -> Option<Dimensions> {
        self.dims
    }

    fn propose_dimensions(&self) -> Option<FitProposal> {
        let mut ws = libc::winsize {
            ws_row: 0,
            ws_col: 0,
            ws_xpixel: 0,
            ws_ypixel: 0,
        };
        let ret = unsafe { libc::ioctl(libc::STDOUT_FILENO, libc::TIOCGWINSZ, &mut ws) };
        if ret == -1 {
            return None;
        }
        Some(FitProposal {
            rows: ws.ws_row,
            cols: ws.ws_col,
        })
    }

    fn font_size(&self) -> f64 {
        0.0
    }

    fn set_font_size(&mut self, size: f64) {
        self.requested_font_size = Some(size);
    }

    fn set_font_family(&mut self, family: &str) {
        self.font_family = family.to_string();
    }

    // The tty always has focus.
    fn focus(&mut self) {}

    fn clear(&mut self) {
        self.write(b"\x1b[2J\x1b[H");
    }

    fn dispose(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        self.events = None;
        self.restore_mode();
    }
}

impl Drop for StdioWidget {
    fn drop(&mut self) {
        self.restore_mode();
    }
}
