use crate::diagnostics::Severity;
use crate::error::{ConfigError, ValidationError};
use tracing::{error, info, warn};

/// Logs the outcome of a validation run through `tracing`.
///
/// A failure is logged as its headline at error level, followed by every
/// attached diagnostic at its own severity.
#[derive(Debug, Clone, Default)]
pub struct ErrorReporter;

impl ErrorReporter {
    pub fn new() -> Self {
        Self
    }

    pub fn report_success(&self, document: &str, schema: &str) {
        info!("{}", Self::success_message(document, schema));
    }

    /// Report a validation error
    pub fn report_failure(&self, failure: &ValidationError) {
        for (severity, line) in Self::failure_lines(failure) {
            match severity {
                Severity::Warning => warn!("{}", line),
                Severity::Error | Severity::Fatal => error!("{}", line),
            }
        }
    }

    /// Report a configuration error
    pub fn report_config_error(&self, failure: &ConfigError) {
        error!("Configuration error: {}", failure);
        info!("{}", Self::config_help(failure));
    }

    pub fn success_message(document: &str, schema: &str) -> String {
        format!("XML {} is valid against schema {}", document, schema)
    }

    /// The lines logged for `failure`, headline first.
    pub fn failure_lines(failure: &ValidationError) -> Vec<(Severity, String)> {
        let mut lines = vec![(Severity::Fatal, failure.headline())];
        if let Some(report) = failure.report() {
            lines.extend(
                report
                    .iter()
                    .map(|diagnostic| (diagnostic.severity, diagnostic.to_string())),
            );
        }
        lines
    }

    /// Get helpful suggestions for configuration errors
    fn config_help(failure: &ConfigError) -> String {
        match failure {
            ConfigError::FileNotFound { path } => {
                format!("Check the configuration path: {}", path.display())
            }
            ConfigError::InvalidFormat { .. } => {
                "Check the configuration file syntax (TOML/JSON format expected)".to_string()
            }
            ConfigError::InvalidValue { field, reason, .. } => {
                format!("Fix the value for '{}': {}", field, reason)
            }
            ConfigError::Read { path, .. } => {
                format!("Make sure {} is readable", path.display())
            }
        }
    }
}
