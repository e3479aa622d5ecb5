use thiserror::Error;
use tracing_subscriber::EnvFilter;

use crate::bootstrap::config::{LogFormat, LogSettings};

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("invalid log filter `{directive}`")]
    Filter {
        directive: String,
        #[source]
        source: tracing_subscriber::filter::ParseError,
    },
    #[error("failed to install tracing subscriber: {0}")]
    Install(String),
}

/// Filter directives for the configured level. Our own crate and the HTTP
/// stack follow `log.level`; everything else stays at `warn`.
pub fn default_directives(level: &str) -> String {
    format!("warn,service_template={level},tower_http={level},axum={level},sqlx=warn")
}

/// Installs the global subscriber. `RUST_LOG`, when set, replaces the
/// filter derived from `log.level`.
pub fn init(log: &LogSettings) -> Result<(), TelemetryError> {
    let directive = std::env::var("RUST_LOG")
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default_directives(&log.level));
    let filter = EnvFilter::try_new(&directive).map_err(|source| TelemetryError::Filter {
        directive: directive.clone(),
        source,
    })?;

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let installed = match log.format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().with_current_span(false).try_init(),
    };
    installed.map_err(|e| TelemetryError::Install(e.to_string()))
}
