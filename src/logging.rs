//! Tracing subscriber setup.

use tracing_subscriber::EnvFilter;

use crate::error::{AppResult, GonioError};

/// Output format for log lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable, coloured when the terminal supports it.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

/// Build the filter: `RUST_LOG` if set, otherwise `level`.
pub fn env_filter(level: &str) -> AppResult<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(level)
            .map_err(|e| GonioError::Configuration(format!("Invalid log level '{level}': {e}"))),
    }
}

/// Install the global subscriber.
///
/// Calling this more than once is harmless; later calls leave the first
/// subscriber in place.
pub fn init(level: &str, format: LogFormat) -> AppResult<()> {
    let filter = env_filter(level)?;
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);
    let installed = match format {
        LogFormat::Pretty => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    if installed.is_err() {
        tracing::debug!("Global subscriber already installed");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_filter_accepts_levels() {
        if std::env::var("RUST_LOG").is_err() {
            assert!(env_filter("warn").is_ok());
            assert!(env_filter("brdf_gonio=trace").is_ok());
        }
    }
}
