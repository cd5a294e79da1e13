use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};

/// Command-line arguments for the pagewright binary.
#[derive(Debug, Parser)]
#[command(name = "pagewright", version, about = "HTML response optimizer")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "PAGEWRIGHT_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the optimizing reverse proxy.
    Serve(Box<ServeArgs>),
    /// Optimize a single HTML file and write the result.
    Optimize(OptimizeArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

/// Per-pass toggles shared by every command that runs the optimizer.
#[derive(Debug, Args, Default, Clone)]
pub struct PassOverrides {
    /// Toggle HTML minification.
    #[arg(long = "optimize-html", value_name = "BOOL", value_parser = BoolishValueParser::new())]
    pub optimize_html: Option<bool>,

    /// Toggle stylesheet combination.
    #[arg(long = "combine-css", value_name = "BOOL", value_parser = BoolishValueParser::new())]
    pub combine_css: Option<bool>,

    /// Toggle script combination.
    #[arg(
        long = "combine-javascript",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub combine_javascript: Option<bool>,

    /// Toggle Google Fonts link combination.
    #[arg(
        long = "combine-google-fonts",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub combine_google_fonts: Option<bool>,

    /// Toggle DNS prefetch hint injection.
    #[arg(long = "dns-prefetch", value_name = "BOOL", value_parser = BoolishValueParser::new())]
    pub dns_prefetch: Option<bool>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    #[command(flatten)]
    pub passes: PassOverrides,

    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the origin the proxy forwards to.
    #[arg(long = "upstream-url", value_name = "URL")]
    pub upstream_url: Option<String>,

    /// Override the origin request timeout.
    #[arg(long = "upstream-timeout-seconds", value_name = "SECONDS")]
    pub upstream_timeout_seconds: Option<u64>,

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

    /// Override the largest page body that is buffered for optimization.
    #[arg(long = "optimizer-max-body-bytes", value_name = "BYTES")]
    pub max_body_bytes: Option<u64>,
}

#[derive(Debug, Args, Clone)]
pub struct OptimizeArgs {
    #[command(flatten)]
    pub passes: PassOverrides,

    /// Override the directory local stylesheets and scripts are read from.
    #[arg(long = "asset-root", value_name = "PATH", value_hint = ValueHint::DirPath)]
    pub asset_root: Option<PathBuf>,

    /// Write the optimized page here instead of standard output.
    #[arg(long, short, value_name = "PATH", value_hint = ValueHint::FilePath)]
    pub output: Option<PathBuf>,

    /// Print a JSON report of the AMP decision and applied passes to standard error.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub report: bool,

    /// HTML file to optimize.
    #[arg(value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub file: PathBuf,
}
