//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{net::SocketAddr, path::PathBuf, str::FromStr, time::Duration};

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "specchio";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_HTTP_PORT: u16 = 8765;
const DEFAULT_PUSH_PORT: u16 = 8766;
const DEFAULT_QUIET_WINDOW_MS: u64 = 300;
const DEFAULT_BASE_DIR: &str = ".";

/// Command-line arguments for the Specchio binary.
#[derive(Debug, Parser)]
#[command(name = "specchio", version, about = "Live markdown preview server")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(
        long = "config-file",
        env = "SPECCHIO_CONFIG_FILE",
        value_name = "PATH"
    )]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the preview server (the default).
    Serve(Box<ServeArgs>),
    /// Render a markdown file once and print the HTML to stdout.
    Render(RenderArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    /// Override the listener host for both channels.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the request-handling listener port.
    #[arg(long = "server-http-port", value_name = "PORT")]
    pub http_port: Option<u16>,

    /// Override the push-channel listener port.
    #[arg(long = "server-push-port", value_name = "PORT")]
    pub push_port: Option<u16>,

    /// Override the base directory used to resolve inclusion targets.
    #[arg(long = "preview-base-dir", value_name = "PATH")]
    pub base_dir: Option<PathBuf>,

    /// Override the debounce quiet window in milliseconds.
    #[arg(long = "preview-quiet-window-ms", value_name = "MILLIS")]
    pub quiet_window_ms: Option<u64>,

    /// Override the path of the HTML shell template.
    #[arg(long = "preview-template", value_name = "PATH")]
    pub template: Option<PathBuf>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,
}

#[derive(Debug, Args, Clone)]
pub struct RenderArgs {
    /// Markdown file to render.
    #[arg(value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub file: PathBuf,

    /// Override the base directory used to resolve inclusion targets.
    #[arg(long = "preview-base-dir", value_name = "PATH")]
    pub base_dir: Option<PathBuf>,

    /// Disable wiki-link and inclusion processing.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub no_wikilinks: bool,

    /// Disable LaTeX span processing.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub no_latex: bool,
}

/// Fully-resolved deployment settings after precedence resolution and
/// validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub preview: PreviewSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub http_addr: SocketAddr,
    pub push_addr: SocketAddr,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct PreviewSettings {
    pub base_dir: PathBuf,
    pub quiet_window: Duration,
    pub template: Option<PathBuf>,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix("SPECCHIO").separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Render(args)) => raw.apply_render_overrides(args),
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both
/// for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    preview: RawPreviewSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.http_port {
            self.server.http_port = Some(port);
        }
        if let Some(port) = overrides.push_port {
            self.server.push_port = Some(port);
        }
        if let Some(dir) = overrides.base_dir.as_ref() {
            self.preview.base_dir = Some(dir.clone());
        }
        if let Some(window) = overrides.quiet_window_ms {
            self.preview.quiet_window_ms = Some(window);
        }
        if let Some(template) = overrides.template.as_ref() {
            self.preview.template = Some(template.clone());
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
    }

    fn apply_render_overrides(&mut self, args: &RenderArgs) {
        if let Some(dir) = args.base_dir.as_ref() {
            self.preview.base_dir = Some(dir.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            preview,
        } = raw;

        Ok(Self {
            server: build_server_settings(server)?,
            logging: build_logging_settings(logging)?,
            preview: build_preview_settings(preview)?,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());

    let http_port = server.http_port.unwrap_or(DEFAULT_HTTP_PORT);
    if http_port == 0 {
        return Err(LoadError::invalid(
            "server.http_port",
            "port must be greater than zero",
        ));
    }

    let push_port = server.push_port.unwrap_or(DEFAULT_PUSH_PORT);
    if push_port == 0 {
        return Err(LoadError::invalid(
            "server.push_port",
            "port must be greater than zero",
        ));
    }

    if http_port == push_port {
        return Err(LoadError::invalid(
            "server.push_port",
            "push port must differ from the http port",
        ));
    }

    let http_addr = parse_socket_addr(&host, http_port)
        .map_err(|reason| LoadError::invalid("server.http_addr", reason))?;
    let push_addr = parse_socket_addr(&host, push_port)
        .map_err(|reason| LoadError::invalid("server.push_addr", reason))?;

    Ok(ServerSettings {
        http_addr,
        push_addr,
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_preview_settings(preview: RawPreviewSettings) -> Result<PreviewSettings, LoadError> {
    let base_dir = preview
        .base_dir
        .unwrap_or_else(|| PathBuf::from(DEFAULT_BASE_DIR));
    if base_dir.as_os_str().is_empty() {
        return Err(LoadError::invalid(
            "preview.base_dir",
            "path must not be empty",
        ));
    }

    let quiet_window_ms = preview.quiet_window_ms.unwrap_or(DEFAULT_QUIET_WINDOW_MS);
    if quiet_window_ms == 0 {
        return Err(LoadError::invalid(
            "preview.quiet_window_ms",
            "must be greater than zero",
        ));
    }

    Ok(PreviewSettings {
        base_dir,
        quiet_window: Duration::from_millis(quiet_window_ms),
        template: preview.template,
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    http_port: Option<u16>,
    push_port: Option<u16>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawPreviewSettings {
    base_dir: Option<PathBuf>,
    quiet_window_ms: Option<u64>,
    template: Option<PathBuf>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}
