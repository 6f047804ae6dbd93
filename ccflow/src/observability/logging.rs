//! Tracing subscriber installation and verbosity resolution.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::errors::ConfigError;

/// An explicit log level, overriding verbosity flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Errors only.
    Error,
    /// Warnings and errors.
    Warn,
    /// Lifecycle messages.
    Info,
    /// Rendered commands.
    Debug,
    /// Everything.
    Trace,
}

impl LogLevel {
    fn as_str(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }
}

/// Log line format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human readable lines.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

/// Resolves the filter directive from the CLI verbosity flags.
///
/// An explicit level wins, then `quiet`, then the `-v` count. The default is
/// `warn` so a clean build prints only its report.
#[must_use]
pub fn filter_directive(verbose: u8, quiet: bool, level: Option<LogLevel>) -> &'static str {
    if let Some(level) = level {
        return level.as_str();
    }
    if quiet {
        return "error";
    }
    match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

/// Installs the global subscriber, writing to stderr.
///
/// `RUST_LOG` is ignored; the directive comes from [`filter_directive`].
///
/// # Errors
///
/// Returns an error if a global subscriber is already installed.
pub fn init_logging(directive: &str, format: LogFormat) -> Result<(), ConfigError> {
    let filter = EnvFilter::try_new(directive)
        .map_err(|e| ConfigError::new(format!("invalid log filter '{directive}': {e}")))?;

    let formatter = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .with_level(true);

    let installed = match format {
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(formatter)
            .with(filter)
            .try_init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(formatter.json())
            .with(filter)
            .try_init(),
    };
    installed.map_err(|e| ConfigError::new(format!("cannot install logger: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_level_wins() {
        assert_eq!(filter_directive(3, true, Some(LogLevel::Info)), "info");
    }

    #[test]
    fn test_quiet_over_verbose() {
        assert_eq!(filter_directive(2, true, None), "error");
    }

    #[test]
    fn test_verbosity_steps() {
        let levels: Vec<&str> = (0..5).map(|v| filter_directive(v, false, None)).collect();
        assert_eq!(levels, vec!["warn", "info", "debug", "trace", "trace"]);
    }
}
