//! Telemetry initialization (logging and tracing), delegated to the shared
//! `copilot-observability` setup so every binary in the workspace configures
//! tracing the same way.

use anyhow::{Context, Result};
use copilot_observability::tracing_setup::{init_tracing_simple, init_tracing_with_otlp, TracingConfig, TracingGuard};

use crate::cli::Args;

/// Guards that must be kept alive for the duration of the program. Holds the
/// OpenTelemetry tracer guard when OTLP export is enabled.
pub struct TelemetryGuards {
    _otlp: Option<TracingGuard>,
}

/// Initialize telemetry stack (logging, optionally OTLP tracing).
pub fn init_telemetry(args: &Args) -> Result<TelemetryGuards> {
    let config = TracingConfig {
        service_name: "autoarr-gateway".to_string(),
        service_version: env!("CARGO_PKG_VERSION").to_string(),
        environment: args.env.clone(),
        enable_otlp: args.enable_otlp,
        otlp_endpoint: args.otlp_endpoint.clone(),
        log_level: args.log_level.clone(),
        json_logs: args.json_logs,
        span_events: false,
        colored_output: !args.json_logs,
        sample_rate: if args.env == "prod" { 0.1 } else { 1.0 },
    };

    if config.enable_otlp {
        let guard = init_tracing_with_otlp(&config).context("failed to initialize OTLP tracing")?;
        Ok(TelemetryGuards { _otlp: Some(guard) })
    } else {
        init_tracing_simple(&config).context("failed to initialize tracing")?;
        Ok(TelemetryGuards { _otlp: None })
    }
}
