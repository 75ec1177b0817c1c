//! Tracing subscriber bootstrap driven by [`LoggingConfig`].

use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;
use crate::error::{DstError, DstResult};

/// Install a global fmt subscriber.
///
/// `RUST_LOG` takes precedence over `config.level`. Supported formats are
/// `pretty`, `compact` and `json`.
pub fn init_logging(config: &LoggingConfig) -> DstResult<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| DstError::ConfigError(format!("Invalid log level '{}': {}", config.level, e)))?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_file(config.include_location)
        .with_line_number(config.include_location);

    let result = match config.format.as_str() {
        "pretty" => builder.pretty().try_init(),
        "compact" => builder.compact().try_init(),
        "json" => builder.json().try_init(),
        other => {
            return Err(DstError::ConfigError(format!(
                "Unknown logging.format '{}', expected pretty, compact or json",
                other
            )))
        }
    };

    result.map_err(|e| DstError::ConfigError(format!("Failed to install subscriber: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_format_rejected() {
        let config = LoggingConfig {
            format: "xml".to_string(),
            ..Default::default()
        };
        let err = init_logging(&config).unwrap_err();
        assert!(err.to_string().contains("xml"));
    }
}
