//! Ambient observability for the gateway: tracing/OTLP setup and
//! correlation-context propagation shared by every component.

pub mod correlation;
pub mod tracing_setup;

pub use correlation::*;
pub use tracing_setup::*;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ObservabilityError {
    #[error("Tracing initialization failed: {0}")]
    TracingInit(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

pub type Result<T> = std::result::Result<T, ObservabilityError>;
