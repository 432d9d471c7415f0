use tracing_subscriber::{fmt, EnvFilter};

/// Output format for the subscriber. JSON is what the studio's log
/// shipper ingests; human format is for local runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Human,
    Json,
}

impl LogFormat {
    /// Resolve from `MF_LOG_FORMAT` (`json` or `human`), defaulting to
    /// human-readable output.
    pub fn from_env() -> Self {
        match std::env::var("MF_LOG_FORMAT").as_deref() {
            Ok("json") => LogFormat::Json,
            _ => LogFormat::Human,
        }
    }
}

/// Initialize the global tracing subscriber.
///
/// `RUST_LOG` wins when set; `default_level` (e.g. "info",
/// "mf_engine=debug,warn") applies otherwise. Safe to call repeatedly,
/// so tests and the daemon can share it; later calls are no-ops.
pub fn init(service_name: &str, default_level: &str, format: LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let builder = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(true)
        .with_line_number(true);
    let initialized = match format {
        LogFormat::Human => builder.try_init().is_ok(),
        LogFormat::Json => builder.json().try_init().is_ok(),
    };

    if initialized {
        tracing::info!(service = service_name, ?format, "logging initialised");
    }
}

/// Convenience wrapper: format taken from the environment.
pub fn init_logging(service_name: &str, default_level: &str) {
    init(service_name, default_level, LogFormat::from_env());
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_defaults_to_human() {
        // The env var is unset in the test environment.
        assert_eq!(LogFormat::from_env(), LogFormat::Human);
    }

    #[test]
    fn repeated_init_is_safe() {
        init("test", "info", LogFormat::Human);
        init("test", "info", LogFormat::Human);
    }
}
