//! # xml-model-validator Library
//!
//! Validates XML documents against DTD, W3C XML Schema, RELAX NG (XML and
//! compact syntax), Schematron and NVDL models through libxml2. Models and
//! XML catalogs can be shipped as bundled resources and referenced with
//! `cp:/` URIs.
//!
//! ```no_run
//! use xml_model_validator::{ResourceLocator, XmlValidator};
//!
//! let validator = XmlValidator::new(ResourceLocator::new(["resources"]));
//! let xml = std::fs::read("book.xml")?;
//! validator.validate(&xml, "cp:/grammars/book.rng", None)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod cli;
pub mod compact;
pub mod config;
pub mod content_model;
pub mod diagnostics;
pub mod doctype;
pub mod error;
pub mod error_reporter;
pub mod libxml2;
pub mod nvdl;
pub mod resolver;
pub mod resource;
pub mod schema_loader;
pub mod validator;

pub use cli::Cli;
pub use config::{Config, ConfigManager, ResourceConfig};
pub use diagnostics::{Diagnostic, DiagnosticCollector, DiagnosticReport, Severity};
pub use doctype::{check_well_formed, inject_doctype};
pub use error::{
    CompactSyntaxError, ConfigError, DoctypeInjectionError, ResourceError, Result, ValidationError,
};
pub use error_reporter::ErrorReporter;
pub use libxml2::{LibXml2Wrapper, ValidationResult};
pub use resource::{RESOURCE_SCHEME, ResourceLocator};
pub use nvdl::NvdlSchema;
pub use schema_loader::{Schema, SchemaLanguage, SchemaLoader, SchemaSource};
pub use validator::{DTD_EXTENSION, SchemaKind, XmlValidator};
