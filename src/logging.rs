//! Structured logging setup.
//!
//! Installs a `tracing-subscriber` pipeline configured from
//! [`ApplicationSettings`]: the log level becomes the default env-filter
//! directive (overridable through `RUST_LOG`), and the output format is one of
//! `pretty`, `compact` or `json`.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::ApplicationSettings;
use crate::error::{CoreError, CoreResult};

/// Initializes the global tracing subscriber. Call once, early in `main`.
pub fn init(settings: &ApplicationSettings) -> CoreResult<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.log_level.clone()));

    let result = match settings.log_format.as_str() {
        "json" => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_thread_names(true))
            .try_init(),
        "compact" => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().compact().with_ansi(false))
            .try_init(),
        _ => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_thread_names(true))
            .try_init(),
    };

    result.map_err(|err| {
        CoreError::Configuration(format!("failed to install tracing subscriber: {err}"))
    })
}
