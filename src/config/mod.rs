//! Configuration layer: typed settings with layered precedence (file → env → CLI).

mod cli;

use std::{
    net::SocketAddr,
    num::NonZeroUsize,
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

pub use cli::{CliArgs, Command, OptimizeArgs, PassOverrides, ServeArgs, ServeOverrides};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "pagewright";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_UPSTREAM_URL: &str = "http://127.0.0.1:8000";
const DEFAULT_UPSTREAM_TIMEOUT_SECS: u64 = 30;
const DEFAULT_MAX_BODY_BYTES: u64 = 8 * 1024 * 1024;
const DEFAULT_ASSET_ROOT: &str = "public";
const DEFAULT_OUTPUT_DIR: &str = "/tmp/pagewright-combined";
const DEFAULT_PUBLIC_PREFIX: &str = "/_pagewright/combined";
const DEFAULT_BUNDLE_MAX_AGE_DAYS: u64 = 30;
const SECONDS_PER_DAY: u64 = 24 * 60 * 60;
const DEFAULT_SESSION_COOKIE_PREFIX: &str = "wordpress_logged_in_";

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub upstream: UpstreamSettings,
    pub logging: LoggingSettings,
    pub optimizer: OptimizerSettings,
    pub minify: MinifySettings,
    pub combine: CombineSettings,
    pub dns_prefetch: DnsPrefetchSettings,
    pub auth: AuthSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
}

#[derive(Debug, Clone)]
pub struct UpstreamSettings {
    pub url: Url,
    pub timeout: Duration,
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

/// Pass switches plus the capture size ceiling.
#[derive(Debug, Clone)]
pub struct OptimizerSettings {
    pub optimize_html: bool,
    pub combine_css: bool,
    pub combine_javascript: bool,
    pub combine_google_fonts: bool,
    pub dns_prefetch: bool,
    pub max_body_bytes: NonZeroUsize,
}

#[derive(Debug, Clone)]
pub struct MinifySettings {
    pub keep_comments: bool,
}

#[derive(Debug, Clone)]
pub struct CombineSettings {
    pub asset_root: PathBuf,
    pub output_dir: PathBuf,
    pub public_prefix: String,
    pub site_host: Option<String>,
    pub css_exclude: Vec<String>,
    pub js_exclude: Vec<String>,
    /// Bundles unused for longer than this are deleted; `None` keeps them forever.
    pub bundle_max_age: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct DnsPrefetchSettings {
    pub hosts: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct AuthSettings {
    pub session_cookie_prefixes: Vec<String>,
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

    builder = builder.add_source(Environment::with_prefix("PAGEWRIGHT").separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Optimize(args)) => raw.apply_optimize_overrides(args),
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    upstream: RawUpstreamSettings,
    logging: RawLoggingSettings,
    optimizer: RawOptimizerSettings,
    minify: RawMinifySettings,
    combine: RawCombineSettings,
    dns_prefetch: RawDnsPrefetchSettings,
    auth: RawAuthSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(url) = overrides.upstream_url.as_ref() {
            self.upstream.url = Some(url.clone());
        }
        if let Some(seconds) = overrides.upstream_timeout_seconds {
            self.upstream.timeout_seconds = Some(seconds);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(limit) = overrides.max_body_bytes {
            self.optimizer.max_body_bytes = Some(limit);
        }

        self.apply_pass_overrides(&overrides.passes);
    }

    fn apply_optimize_overrides(&mut self, args: &OptimizeArgs) {
        if let Some(root) = args.asset_root.as_ref() {
            self.combine.asset_root = Some(root.clone());
        }

        self.apply_pass_overrides(&args.passes);
    }

    fn apply_pass_overrides(&mut self, overrides: &PassOverrides) {
        if let Some(value) = overrides.optimize_html {
            self.optimizer.optimize_html = Some(value);
        }
        if let Some(value) = overrides.combine_css {
            self.optimizer.combine_css = Some(value);
        }
        if let Some(value) = overrides.combine_javascript {
            self.optimizer.combine_javascript = Some(value);
        }
        if let Some(value) = overrides.combine_google_fonts {
            self.optimizer.combine_google_fonts = Some(value);
        }
        if let Some(value) = overrides.dns_prefetch {
            self.optimizer.dns_prefetch = Some(value);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            upstream,
            logging,
            optimizer,
            minify,
            combine,
            dns_prefetch,
            auth,
        } = raw;

        Ok(Self {
            server: build_server_settings(server)?,
            upstream: build_upstream_settings(upstream)?,
            logging: build_logging_settings(logging)?,
            optimizer: build_optimizer_settings(optimizer)?,
            minify: MinifySettings {
                keep_comments: minify.keep_comments.unwrap_or(false),
            },
            combine: build_combine_settings(combine)?,
            dns_prefetch: DnsPrefetchSettings {
                hosts: trimmed_list(dns_prefetch.hosts),
            },
            auth: build_auth_settings(auth),
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());
    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }

    let addr = parse_socket_addr(&host, port)
        .map_err(|reason| LoadError::invalid("server.addr", reason))?;

    Ok(ServerSettings { addr })
}

fn build_upstream_settings(upstream: RawUpstreamSettings) -> Result<UpstreamSettings, LoadError> {
    let raw_url = upstream
        .url
        .unwrap_or_else(|| DEFAULT_UPSTREAM_URL.to_string());
    let url = Url::parse(raw_url.trim())
        .map_err(|err| LoadError::invalid("upstream.url", format!("failed to parse: {err}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(LoadError::invalid(
            "upstream.url",
            "scheme must be http or https",
        ));
    }

    let timeout_secs = upstream
        .timeout_seconds
        .unwrap_or(DEFAULT_UPSTREAM_TIMEOUT_SECS);
    if timeout_secs == 0 {
        return Err(LoadError::invalid(
            "upstream.timeout_seconds",
            "must be greater than zero",
        ));
    }

    Ok(UpstreamSettings {
        url,
        timeout: Duration::from_secs(timeout_secs),
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

fn build_optimizer_settings(
    optimizer: RawOptimizerSettings,
) -> Result<OptimizerSettings, LoadError> {
    let max_body_value = optimizer.max_body_bytes.unwrap_or(DEFAULT_MAX_BODY_BYTES);
    let max_body_usize = usize::try_from(max_body_value).map_err(|_| {
        LoadError::invalid(
            "optimizer.max_body_bytes",
            "value exceeds supported range for usize",
        )
    })?;
    let max_body_bytes = NonZeroUsize::new(max_body_usize).ok_or_else(|| {
        LoadError::invalid("optimizer.max_body_bytes", "must be greater than zero")
    })?;

    Ok(OptimizerSettings {
        optimize_html: optimizer.optimize_html.unwrap_or(false),
        combine_css: optimizer.combine_css.unwrap_or(false),
        combine_javascript: optimizer.combine_javascript.unwrap_or(false),
        combine_google_fonts: optimizer.combine_google_fonts.unwrap_or(false),
        dns_prefetch: optimizer.dns_prefetch.unwrap_or(false),
        max_body_bytes,
    })
}

fn build_combine_settings(combine: RawCombineSettings) -> Result<CombineSettings, LoadError> {
    let asset_root = combine
        .asset_root
        .unwrap_or_else(|| PathBuf::from(DEFAULT_ASSET_ROOT));
    if asset_root.as_os_str().is_empty() {
        return Err(LoadError::invalid(
            "combine.asset_root",
            "path must not be empty",
        ));
    }

    let output_dir = combine
        .output_dir
        .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR));
    if output_dir.as_os_str().is_empty() {
        return Err(LoadError::invalid(
            "combine.output_dir",
            "path must not be empty",
        ));
    }

    let public_prefix = combine
        .public_prefix
        .unwrap_or_else(|| DEFAULT_PUBLIC_PREFIX.to_string());
    let public_prefix = public_prefix.trim().trim_end_matches('/').to_string();
    if !public_prefix.starts_with('/') || public_prefix.len() < 2 {
        return Err(LoadError::invalid(
            "combine.public_prefix",
            "must be an absolute path such as `/_pagewright/combined`",
        ));
    }

    let site_host = combine.site_host.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_ascii_lowercase())
    });

    let max_age_days = combine
        .bundle_max_age_days
        .unwrap_or(DEFAULT_BUNDLE_MAX_AGE_DAYS);
    let bundle_max_age = match max_age_days {
        0 => None,
        days => Some(Duration::from_secs(
            days.checked_mul(SECONDS_PER_DAY).ok_or_else(|| {
                LoadError::invalid("combine.bundle_max_age_days", "value is too large")
            })?,
        )),
    };

    Ok(CombineSettings {
        asset_root,
        output_dir,
        public_prefix,
        site_host,
        css_exclude: trimmed_list(combine.css_exclude),
        js_exclude: trimmed_list(combine.js_exclude),
        bundle_max_age,
    })
}

fn build_auth_settings(auth: RawAuthSettings) -> AuthSettings {
    let session_cookie_prefixes = match auth.session_cookie_prefixes {
        Some(prefixes) => trimmed_list(prefixes),
        None => vec![DEFAULT_SESSION_COOKIE_PREFIX.to_string()],
    };
    AuthSettings {
        session_cookie_prefixes,
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawUpstreamSettings {
    url: Option<String>,
    timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawOptimizerSettings {
    optimize_html: Option<bool>,
    combine_css: Option<bool>,
    combine_javascript: Option<bool>,
    combine_google_fonts: Option<bool>,
    dns_prefetch: Option<bool>,
    max_body_bytes: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawMinifySettings {
    keep_comments: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCombineSettings {
    asset_root: Option<PathBuf>,
    output_dir: Option<PathBuf>,
    public_prefix: Option<String>,
    site_host: Option<String>,
    css_exclude: Vec<String>,
    js_exclude: Vec<String>,
    bundle_max_age_days: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawDnsPrefetchSettings {
    hosts: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawAuthSettings {
    session_cookie_prefixes: Option<Vec<String>>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn trimmed_list(values: Vec<String>) -> Vec<String> {
    values
        .into_iter()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .collect()
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[cfg(test)]
mod tests;
