//! Structured logging setup.
//!
//! The library only emits `tracing` events. Applications that want them on
//! stdout call [`init_logging`] once at startup; `RUST_LOG` overrides the
//! configured level when set.

use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;
use crate::error::{DriverError, Result};

/// Install a global fmt subscriber. Fails if one is already installed.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = build_filter(config);

    let installed = if config.json_format {
        let layer = tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(true)
            .with_target(config.with_target);
        tracing_subscriber::registry().with(filter).with(layer).try_init()
    } else {
        let layer = tracing_subscriber::fmt::layer()
            .with_target(config.with_target)
            .with_line_number(true);
        tracing_subscriber::registry().with(filter).with(layer).try_init()
    };

    installed.map_err(|e| DriverError::ConfigError(format!("logging already initialized: {e}")))
}

fn build_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::default().add_directive(LevelFilter::from_level(config.log_level).into())
    })
}
