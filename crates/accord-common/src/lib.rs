//! # accord-common
//!
//! Cross-cutting infrastructure: configuration loading and tracing setup.

pub mod config;
pub mod telemetry;

pub use config::{ClientConfig, ConfigError, ReconnectPolicy};
pub use telemetry::{init_tracing, try_init_tracing, TracingConfig};
