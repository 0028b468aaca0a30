use clap::Parser;
use ptybind::backend::SocketBackend;
use ptybind::config::{self, AttachArgs, Cli, Command, KeysArgs};
use ptybind::controller::{ControllerSettings, FailureReason, Phase, TerminalController};
use ptybind::error::{BindError, BindResult, ErrorCode};
use ptybind::host::HostShell;
use ptybind::keys::{self, KeySymbol};
use ptybind::widget::{
    Dimensions, FitProposal, StdioWidget, TerminalWidget, WidgetEvent, WidgetEvents,
};
use std::sync::Arc;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::mpsc;

/// Ctrl-] detaches, as in telnet.
const DETACH_BYTE: u8 = 0x1d;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    match cli.command {
        Command::Attach(args) => run_attach(args).await?,
        Command::Keys(args) => run_keys(args),
    }
    Ok(())
}

fn init_logging(logging: &config::LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::new(logging.level.clone());
    if logging.format == "json" {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Exit {
    Detached,
    NavigateBack,
    Disconnected,
}

struct ChannelHost {
    exits: mpsc::UnboundedSender<Exit>,
}

impl HostShell for ChannelHost {
    fn navigate_back(&self) {
        let _ = self.exits.send(Exit::NavigateBack);
    }

    // A tty has no on-screen keyboard; the physical one is always there.
    fn request_keyboard(&self) {}
}

/// Wraps a widget and turns the detach byte into an exit request instead of
/// forwarding it to the remote.
struct DetachKeyWidget {
    inner: Box<dyn TerminalWidget>,
    exits: mpsc::UnboundedSender<Exit>,
}

impl TerminalWidget for DetachKeyWidget {
    fn open(&mut self, events: WidgetEvents) -> BindResult<()> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        self.inner.open(tx)?;
        let exits = self.exits.clone();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let event = match event {
                    WidgetEvent::Data(data) => match data.iter().position(|b| *b == DETACH_BYTE) {
                        Some(pos) => {
                            if pos > 0 {
                                let _ = events.send(WidgetEvent::Data(data[..pos].to_vec()));
                            }
                            let _ = exits.send(Exit::Detached);
                            break;
                        }
                        None => WidgetEvent::Data(data),
                    },
                    other => other,
                };
                if events.send(event).is_err() {
                    break;
                }
            }
        });
        Ok(())
    }

    fn write(&mut self, data: &[u8]) {
        self.inner.write(data);
    }

    fn resize(&mut self, dims: Dimensions) {
        self.inner.resize(dims);
    }

    fn dimensions(&self) -> Option<Dimensions> {
        self.inner.dimensions()
    }

    fn propose_dimensions(&self) -> Option<FitProposal> {
        self.inner.propose_dimensions()
    }

    fn font_size(&self) -> f64 {
        self.inner.font_size()
    }

    fn set_font_size(&mut self, size: f64) {
        self.inner.set_font_size(size);
    }

    fn set_font_family(&mut self, family: &str) {
        self.inner.set_font_family(family);
    }

    fn focus(&mut self) {
        self.inner.focus();
    }

    fn clear(&mut self) {
        self.inner.clear();
    }

    fn dispose(&mut self) {
        self.inner.dispose();
    }
}

async fn run_attach(args: AttachArgs) -> BindResult<()> {
    let config = config::Config::load(&args)?;
    init_logging(&config.logging);

    let session_id = args.session_id.trim().to_string();
    if session_id.is_empty() {
        eprintln!("Missing session id.");
        eprintln!("Usage: ptybind attach <SESSION_ID>");
        std::process::exit(2);
    }

    let backend = match SocketBackend::connect(
        &config.transport.socket_path,
        config.transport.request_timeout_ms,
    )
    .await
    {
        Ok(backend) => Arc::new(backend),
        Err(err) => {
            print_socket_hint(&config.transport.socket_path, &err);
            std::process::exit(1);
        }
    };

    let (exits_tx, mut exits_rx) = mpsc::unbounded_channel();
    let widget = DetachKeyWidget {
        inner: Box::new(StdioWidget::new()),
        exits: exits_tx.clone(),
    };
    let host = Arc::new(ChannelHost { exits: exits_tx });
    let controller = TerminalController::mount(
        Box::new(widget),
        backend,
        host,
        ControllerSettings::from(&config),
    );
    let mut phases = controller.watch_phase();
    let mut winch = signal(SignalKind::window_change())?;

    controller.set_fullscreen(args.fullscreen);
    controller.set_session(session_id.as_str());

    let exit = loop {
        tokio::select! {
            Some(exit) = exits_rx.recv() => break exit,
            Some(()) = winch.recv() => {
                if let Some(dims) = controller.relayout() {
                    tracing::debug!(size = %dims, "Relayout after window change");
                }
            }
            changed = phases.changed() => {
                if changed.is_err() {
                    break Exit::Disconnected;
                }
                let phase = phases.borrow_and_update().clone();
                if let Phase::Connected(_) = phase {
                    // Window changes during connect resize the widget before
                    // a session is there to receive them; refit so the remote
                    // ends up with the current tty size.
                    controller.relayout();
                }
                if let Phase::Failed { reason: FailureReason::Disconnected, .. } = phase {
                    break Exit::Disconnected;
                }
            }
        }
    };

    controller.unmount().await;
    match exit {
        Exit::NavigateBack => {
            eprintln!("Terminal {session_id} not found or already closed.");
            std::process::exit(2);
        }
        Exit::Disconnected => {
            eprintln!("Terminal {session_id} disconnected.");
            std::process::exit(1);
        }
        Exit::Detached => {}
    }
    Ok(())
}

fn run_keys(args: KeysArgs) {
    let mut unknown = false;
    for name in &args.names {
        match KeySymbol::parse(name) {
            Some(symbol) => {
                let escaped: String = keys::bytes_for(symbol)
                    .iter()
                    .flat_map(|b| std::ascii::escape_default(*b))
                    .map(char::from)
                    .collect();
                println!("{name}\t{escaped}");
            }
            None => {
                eprintln!("Unknown key: {name}");
                unknown = true;
            }
        }
    }
    if unknown {
        std::process::exit(2);
    }
}

fn print_socket_hint(socket_path: &str, err: &BindError) {
    eprintln!("Failed to connect backend socket: {socket_path}");
    eprintln!("Use `--socket` or `PTYBIND_SOCKET` to point at the correct socket.");
    if let BindError::Api(api) = err
        && api.error_code == ErrorCode::TransportFailure
        && let Some(details) = &api.details
    {
        eprintln!("Details: {details}");
    }
}
