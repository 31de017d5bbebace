//! Tracing subscriber setup and timing helpers.

use crate::config::{LogConfig, LogFormat};
use crate::errors::ConfigError;
use std::time::Instant;
use tracing::Subscriber;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Default filter when neither the config nor `RUST_LOG` sets one.
const DEFAULT_FILTER: &str = "info";

/// A type-erased subscriber built from a [`LogConfig`].
pub type BoxSubscriber = Box<dyn Subscriber + Send + Sync + 'static>;

/// Builds the subscriber described by `config` without installing it.
///
/// Useful for scoping it with [`tracing::subscriber::with_default`].
pub fn build_subscriber(config: &LogConfig) -> Result<BoxSubscriber, ConfigError> {
    let filter = match &config.filter {
        Some(directive) => EnvFilter::try_new(directive).map_err(|e| ConfigError::Logging(e.to_string()))?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER)),
    };

    let registry = tracing_subscriber::registry().with(filter);
    Ok(match config.format {
        LogFormat::Text => Box::new(registry.with(fmt::layer().with_target(true))),
        LogFormat::Json => Box::new(
            registry.with(fmt::layer().json().with_current_span(true).with_span_list(false)),
        ),
    })
}

/// Installs a global tracing subscriber described by `config`.
///
/// Fails if the filter directive is invalid or a global subscriber is
/// already installed.
pub fn init_tracing(config: &LogConfig) -> Result<(), ConfigError> {
    let subscriber = build_subscriber(config)?;
    tracing::subscriber::set_global_default(subscriber).map_err(|e| ConfigError::Logging(e.to_string()))
}

/// Measures how long an operator call takes.
#[derive(Debug)]
pub struct SpanTimer {
    start: Instant,
    name: String,
}

impl SpanTimer {
    /// Starts a new timer.
    #[must_use]
    pub fn start(name: impl Into<String>) -> Self {
        Self {
            start: Instant::now(),
            name: name.into(),
        }
    }

    /// Returns the elapsed time in milliseconds.
    #[must_use]
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }

    /// Returns the name of what is being timed.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stops the timer and returns the duration in milliseconds.
    #[must_use]
    pub fn finish(self) -> f64 {
        self.elapsed_ms()
    }
}
