use std::path::PathBuf;

use thiserror::Error;

use crate::diagnostics::DiagnosticReport;

/// Every way a well-formedness check, doctype injection or validation can fail.
///
/// Variants carrying a [`DiagnosticReport`] render the primary message followed
/// by one line per diagnostic (warnings, then errors, then fatal errors).
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Input stream is not well-formed: {details}")]
    WellFormedness { details: String },

    #[error("XML parser configuration error: {details}")]
    ParserConfiguration { details: String },

    #[error("Error while loading schema: {schema}{}", render_report(.report))]
    SchemaLoad {
        schema: String,
        report: DiagnosticReport,
    },

    #[error("Error while parsing schema: {schema}{}", render_report(.report))]
    SchemaParse {
        schema: String,
        report: DiagnosticReport,
    },

    #[error("Bad reference for catalog {catalog}: {reason}")]
    CatalogResolution { catalog: String, reason: String },

    #[error(transparent)]
    DoctypeInjection(#[from] DoctypeInjectionError),

    #[error("{}{}", invalid_headline(.schema), render_report(.report))]
    Invalid {
        schema: String,
        report: DiagnosticReport,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

// Callers match on both phrasings, so the headline carries both.
fn invalid_headline(schema: &str) -> String {
    format!(
        "XML invalid against model {}: document is not valid against model {}",
        schema, schema
    )
}

fn render_report(report: &DiagnosticReport) -> String {
    if report.is_empty() {
        String::new()
    } else {
        format!("\n{}", report)
    }
}

impl ValidationError {
    /// The diagnostics attached to this failure, if any.
    pub fn report(&self) -> Option<&DiagnosticReport> {
        match self {
            ValidationError::SchemaLoad { report, .. }
            | ValidationError::SchemaParse { report, .. }
            | ValidationError::Invalid { report, .. } => Some(report),
            _ => None,
        }
    }

    /// First line of the rendered message, without the diagnostic listing.
    pub fn headline(&self) -> String {
        match self {
            ValidationError::SchemaLoad { schema, .. } => {
                format!("Error while loading schema: {}", schema)
            }
            ValidationError::SchemaParse { schema, .. } => {
                format!("Error while parsing schema: {}", schema)
            }
            ValidationError::Invalid { schema, .. } => invalid_headline(schema),
            other => other.to_string(),
        }
    }
}

/// Failures of the doctype injector.
#[derive(Error, Debug)]
pub enum DoctypeInjectionError {
    #[error("Input stream cannot be null")]
    NullInput,

    #[error("Problem while reading input stream: {0}")]
    Read(#[source] std::io::Error),

    #[error("Input stream is not well-formed: {details}")]
    Malformed { details: String },

    #[error("Problem while adding doctype: {details}")]
    Serialization { details: String },
}

/// A RELAX NG compact syntax grammar that could not be translated.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("line {line}: {message}")]
pub struct CompactSyntaxError {
    pub line: u32,
    pub message: String,
}

/// Bundled resource lookup failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResourceError {
    #[error("Resource not found: {name}")]
    NotFound { name: String },

    #[error("Invalid resource name: {name} - {reason}")]
    InvalidName { name: String, reason: String },
}

/// Configuration-specific error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Invalid configuration format: {details}")]
    InvalidFormat { details: String },

    #[error("Invalid configuration value: {field} = {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Failed to read configuration file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// LibXML2-specific error types
///
/// These describe misuse or exhaustion of the library itself, never a problem
/// with the document or the schema.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LibXml2Error {
    #[error("Failed to create {context}")]
    ContextCreationFailed { context: &'static str },

    #[error("Memory allocation failed in libxml2")]
    MemoryAllocation,

    #[error("Input of {size} bytes exceeds what libxml2 can address")]
    BufferTooLarge { size: usize },

    #[error("String passed to libxml2 contains an interior NUL byte: {value:?}")]
    InvalidString { value: String },

    #[error("Failed to register the resource input handler")]
    CallbackRegistration,

    #[error("Document has no root element")]
    MissingRoot,
}

impl From<LibXml2Error> for ValidationError {
    fn from(err: LibXml2Error) -> Self {
        ValidationError::ParserConfiguration {
            details: err.to_string(),
        }
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, ValidationError>;

/// Configuration result type alias
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// LibXML2 result type alias
pub type LibXml2Result<T> = std::result::Result<T, LibXml2Error>;
