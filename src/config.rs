use crate::error::{ApiError, BindResult, ErrorCode};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub transport: TransportConfig,
    pub fit: FitConfig,
    pub input: InputConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub socket_path: String,
    pub request_timeout_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            request_timeout_ms: 10_000,
        }
    }
}

fn default_socket_path() -> String {
    if let Ok(dir) = env::var("XDG_RUNTIME_DIR")
        && is_dir(&dir)
    {
        return format!("{}/ptybind.sock", dir);
    }

    let uid = unsafe { libc::geteuid() };
    format!("/tmp/ptybind-{}.sock", uid)
}

fn is_dir(path: &str) -> bool {
    fs::metadata(path)
        .map(|meta| meta.is_dir())
        .unwrap_or(false)
}

/// Chrome calibration for the screen fitter. The defaults were tuned against
/// one host's chrome; other hosts should measure their own.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FitConfig {
    pub chrome_margin_px: f64,
    pub fullscreen_row_trim: u16,
    pub aux_control_rows: u16,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            chrome_margin_px: 30.0,
            fullscreen_row_trim: 1,
            aux_control_rows: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    pub focus_delay_ms: u64,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            focus_delay_ms: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, clap::Subcommand)]
pub enum Command {
    /// Bind this terminal to a remote session.
    Attach(AttachArgs),
    /// Print the escape bytes sent for a key name.
    Keys(KeysArgs),
}

#[derive(Debug, Parser, Clone)]
pub struct AttachArgs {
    #[arg(value_name = "SESSION_ID")]
    pub session_id: String,
    #[arg(long)]
    pub config: Option<PathBuf>,
    #[arg(long)]
    pub socket: Option<String>,
    #[arg(long)]
    pub log_level: Option<String>,
    #[arg(long)]
    pub fullscreen: bool,
}

#[derive(Debug, Parser, Clone)]
pub struct KeysArgs {
    #[arg(value_name = "NAME")]
    pub names: Vec<String>,
}

impl Config {
    pub fn load(args: &AttachArgs) -> BindResult<Self> {
        let mut config = if let Some(path) = &args.config {
            Self::from_file(path)?
        } else if Path::new("ptybind.toml").exists() {
            Self::from_file(Path::new("ptybind.toml"))?
        } else {
            Self::default()
        };

        config.apply_env();
        config.apply_cli(args);
        Ok(config)
    }

    pub fn from_file(path: &Path) -> BindResult<Self> {
        let content = fs::read_to_string(path).map_err(|err| {
            ApiError::new(ErrorCode::IoError, "Failed to read config file")
                .with_details(err.to_string())
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> BindResult<Self> {
        let parsed: Self = toml::from_str(content).map_err(|err| {
            ApiError::new(ErrorCode::InvalidArgument, "Failed to parse config file")
                .with_details(err.to_string())
        })?;
        Ok(parsed)
    }

    fn apply_env(&mut self) {
        if let Ok(value) = env::var("PTYBIND_SOCKET") {
            self.transport.socket_path = value;
        }
        if let Ok(value) = env::var("PTYBIND_LOG_LEVEL") {
            self.logging.level = value;
        }
        if let Ok(value) = env::var("PTYBIND_REQUEST_TIMEOUT_MS")
            && let Ok(ms) = value.trim().parse::<u64>()
        {
            self.transport.request_timeout_ms = ms;
        }
    }

    fn apply_cli(&mut self, args: &AttachArgs) {
        if let Some(socket) = &args.socket {
            self.transport.socket_path = socket.clone();
        }
        if let Some(level) = &args.log_level {
            self.logging.level = level.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = Config::from_toml(
            r#"
[fit]
chrome_margin_px = 0.0

[logging]
format = "json"
"#,
        )
        .expect("parse");
        assert_eq!(config.fit.chrome_margin_px, 0.0);
        assert_eq!(config.fit.fullscreen_row_trim, 1);
        assert_eq!(config.fit.aux_control_rows, 3);
        assert_eq!(config.logging.format, "json");
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.input.focus_delay_ms, 100);
        assert_eq!(config.transport.request_timeout_ms, 10_000);
    }

    #[test]
    fn malformed_toml_is_invalid_argument() {
        let err = Config::from_toml("[fit\nchrome").expect_err("should fail");
        assert_eq!(err.code(), ErrorCode::InvalidArgument);
    }

    #[test]
    fn cli_overrides_file() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        writeln!(file, "[transport]\nsocket_path = \"/from/file.sock\"").expect("write");
        let args = AttachArgs {
            session_id: "abc".to_string(),
            config: Some(file.path().to_path_buf()),
            socket: Some("/from/cli.sock".to_string()),
            log_level: Some("debug".to_string()),
            fullscreen: false,
        };
        let config = Config::load(&args).expect("load");
        assert_eq!(config.transport.socket_path, "/from/cli.sock");
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = Config::from_file(Path::new("/nonexistent/ptybind.toml")).expect_err("missing");
        assert_eq!(err.code(), ErrorCode::IoError);
    }
}
