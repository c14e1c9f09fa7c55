//! Command-line argument parsing

use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "copilot-server",
    about = "AutoArr media-automation gateway",
    version,
    long_about = "Orchestrates download, *arr, and media-library upstreams behind a single \
                  tool-call surface, with background monitoring and automated failure recovery."
)]
pub struct Args {
    /// Path to configuration file (advisory; configuration is sourced from GATEWAY__ env vars)
    #[arg(
        short,
        long,
        env = "CONFIG_PATH",
        default_value = "config/default.toml"
    )]
    pub config: PathBuf,

    /// HTTP server port
    #[arg(short, long, env = "PORT", default_value = "8080")]
    pub port: u16,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        short,
        long,
        env = "LOG_LEVEL",
        default_value = "info",
        value_parser = ["trace", "debug", "info", "warn", "error"]
    )]
    pub log_level: String,

    /// Environment (dev, staging, prod)
    #[arg(
        short,
        long,
        env = "ENVIRONMENT",
        default_value = "dev",
        value_parser = ["dev", "staging", "prod"]
    )]
    pub env: String,

    /// Enable JSON log format (useful for production)
    #[arg(long, env = "JSON_LOGS")]
    pub json_logs: bool,

    /// Enable the OpenTelemetry OTLP exporter
    #[arg(long, env = "ENABLE_OTLP")]
    pub enable_otlp: bool,

    /// OTLP collector endpoint
    #[arg(long, env = "OTLP_ENDPOINT", default_value = "http://localhost:4317")]
    pub otlp_endpoint: String,
}

impl Args {
    /// Validate the arguments
    pub fn validate(&self) -> anyhow::Result<()> {
        // Config file is optional; the gateway falls back to env-sourced defaults.
        Ok(())
    }
}
