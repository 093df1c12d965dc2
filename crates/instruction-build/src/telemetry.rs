//! Tracing subscriber setup for the `ibuild` binary and embedding services.
//!
//! [`init_tracing`] installs a global subscriber once per process; later
//! calls are no-ops, which keeps it usable from tests.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Environment variable selecting the log format (`json` or `text`).
pub const LOG_FORMAT_ENV: &str = "IBUILD_LOG_FORMAT";

/// Output format of the log stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    /// Newline-delimited JSON, one object per event.
    Json,
}

impl LogFormat {
    /// Read [`LOG_FORMAT_ENV`], falling back to `Text` when unset or unknown.
    pub fn from_env() -> Self {
        match std::env::var(LOG_FORMAT_ENV) {
            Ok(value) if value.eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Text,
        }
    }
}

/// Install the global subscriber.
///
/// `RUST_LOG` wins when set; otherwise `level` is the default filter.
/// Logs go to stderr so command output on stdout stays machine-readable.
pub fn init_tracing(format: LogFormat, level: Level) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Json => registry
            .with(fmt::layer().with_writer(std::io::stderr).with_target(false).json())
            .try_init()
            .ok(),
        LogFormat::Text => registry
            .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
            .try_init()
            .ok(),
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_twice_is_harmless() {
        init_tracing(LogFormat::Text, Level::WARN);
        init_tracing(LogFormat::Json, Level::DEBUG);
    }

    #[test]
    fn default_format_is_text() {
        assert_eq!(LogFormat::default(), LogFormat::Text);
    }
}
