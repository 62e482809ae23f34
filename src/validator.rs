//! Schema dispatcher
//!
//! A schema reference ending in `.dtd` is validated by injecting it as the
//! document's DOCTYPE and re-parsing with DTD validation. Every other
//! reference is loaded as a grammar or NVDL script whose language is detected
//! from its root element, optionally with XML catalogs for the references it
//! makes.
//!
//! Each call runs in its own [`ResolutionScope`] and [`DiagnosticCollector`],
//! so concurrent calls on different threads never share mutable state.

use std::io::Read;
use std::sync::Arc;

use libc::c_int;
use tracing::{debug, info};

use crate::diagnostics::DiagnosticCollector;
use crate::doctype;
use crate::error::{LibXml2Result, Result, ValidationError};
use crate::libxml2::{
    DiagnosticSink, LibXml2Wrapper, ValidationResult, XML_PARSE_DTDLOAD, XML_PARSE_NONET,
};
use crate::resolver::{self, ResolutionScope};
use crate::resource::ResourceLocator;
use crate::schema_loader::{SchemaLoad, SchemaLoader};

/// Suffix that routes a schema reference to DTD validation (ASCII case-insensitive).
pub const DTD_EXTENSION: &str = ".dtd";

// External subsets load so that the injected or catalog-mapped declarations
// apply; general entities stay unexpanded.
const DOCUMENT_OPTIONS: c_int = XML_PARSE_DTDLOAD | XML_PARSE_NONET;

/// Which validation branch a schema reference takes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaKind {
    Dtd,
    Grammar,
}

impl SchemaKind {
    pub fn classify(schema_ref: &str) -> Self {
        let bytes = schema_ref.as_bytes();
        let suffix = DTD_EXTENSION.as_bytes();
        if bytes.len() >= suffix.len()
            && bytes[bytes.len() - suffix.len()..].eq_ignore_ascii_case(suffix)
        {
            SchemaKind::Dtd
        } else {
            SchemaKind::Grammar
        }
    }
}

enum Outcome {
    Valid,
    SchemaUnavailable,
    SchemaRejected { reason: Option<String> },
    DocumentInvalid,
}

impl From<ValidationResult> for Outcome {
    fn from(result: ValidationResult) -> Self {
        match result {
            ValidationResult::Valid => Outcome::Valid,
            ValidationResult::Invalid { .. } => Outcome::DocumentInvalid,
            // The engine could not run the grammar, so the document was never judged.
            ValidationResult::InternalError { code } => Outcome::SchemaRejected {
                reason: Some(format!("validation engine stopped with internal error {}", code)),
            },
        }
    }
}

/// Validates XML documents against DTD, W3C XML Schema, RELAX NG (both
/// syntaxes), Schematron and NVDL models.
pub struct XmlValidator {
    locator: Arc<ResourceLocator>,
    libxml2: LibXml2Wrapper,
}

impl XmlValidator {
    /// Create a validator resolving `cp:` references and catalogs through `locator`.
    pub fn new(locator: ResourceLocator) -> Self {
        Self {
            locator: Arc::new(locator),
            libxml2: LibXml2Wrapper::new(),
        }
    }

    pub fn locator(&self) -> &ResourceLocator {
        &self.locator
    }

    /// See [`doctype::check_well_formed`].
    pub fn check_well_formed(&self, xml: &[u8]) -> Result<()> {
        doctype::check_well_formed(xml)
    }

    /// See [`doctype::inject_doctype`].
    pub fn inject_doctype<R: Read>(&self, input: Option<R>, system_id: &str) -> Result<Vec<u8>> {
        doctype::inject_doctype(input, system_id)
    }

    /// Validate `xml` against the model named by `schema_ref`.
    ///
    /// `catalogs` names bundled XML catalogs used to resolve the references a
    /// grammar makes; they are ignored for DTDs. A catalog that cannot be
    /// found fails the call before the schema is touched.
    pub fn validate(
        &self,
        xml: &[u8],
        schema_ref: &str,
        catalogs: Option<&[String]>,
    ) -> Result<()> {
        let kind = SchemaKind::classify(schema_ref);
        debug!(schema = %schema_ref, kind = ?kind, "dispatching validation");

        let result = match kind {
            SchemaKind::Dtd => self.validate_with_dtd(xml, schema_ref),
            SchemaKind::Grammar => self.validate_with_grammar(xml, schema_ref, catalogs),
        };

        match &result {
            Ok(()) => info!(schema = %schema_ref, "document is valid"),
            Err(err) => debug!(schema = %schema_ref, error = %err.headline(), "validation failed"),
        }
        result
    }

    fn validate_with_dtd(&self, xml: &[u8], schema_ref: &str) -> Result<()> {
        let with_doctype = doctype::inject_doctype_bytes(xml, schema_ref)?;
        let scope = ResolutionScope::resolving(Arc::clone(&self.locator), Vec::new())?;

        let mut collector = DiagnosticCollector::new();
        let outcome = {
            let _sink = DiagnosticSink::install(&mut collector);
            self.run_dtd_validation(&with_doctype, &scope)
        }?;

        // Fatal errors located in the DTD itself mean the model is broken,
        // not the document.
        let outcome = match outcome {
            Outcome::DocumentInvalid
                if collector
                    .snapshot()
                    .fatals()
                    .iter()
                    .any(|d| d.file.as_deref() == Some(schema_ref)) =>
            {
                Outcome::SchemaRejected { reason: None }
            }
            other => other,
        };
        conclude(schema_ref, outcome, collector)
    }

    fn run_dtd_validation(&self, xml: &[u8], scope: &ResolutionScope) -> LibXml2Result<Outcome> {
        let Some(doc) = self.libxml2.parse_memory(xml, DOCUMENT_OPTIONS)? else {
            return Ok(Outcome::DocumentInvalid);
        };
        if !scope.failed_loads().is_empty() {
            return Ok(Outcome::SchemaUnavailable);
        }
        Ok(self.libxml2.validate_dtd(&doc)?.into())
    }

    fn validate_with_grammar(
        &self,
        xml: &[u8],
        schema_ref: &str,
        catalogs: Option<&[String]>,
    ) -> Result<()> {
        let catalogs = resolver::load_catalogs(&self.locator, catalogs.unwrap_or_default())?;
        let scope = ResolutionScope::resolving(Arc::clone(&self.locator), catalogs)?;
        let loader = SchemaLoader::new(&self.libxml2);

        let mut collector = DiagnosticCollector::new();
        let outcome = {
            let sink = DiagnosticSink::install(&mut collector);
            self.run_grammar_validation(xml, schema_ref, &loader, &scope, &sink)
        }?;
        conclude(schema_ref, outcome, collector)
    }

    fn run_grammar_validation(
        &self,
        xml: &[u8],
        schema_ref: &str,
        loader: &SchemaLoader<'_>,
        scope: &ResolutionScope,
        sink: &DiagnosticSink<'_>,
    ) -> LibXml2Result<Outcome> {
        let schema = match loader.load(schema_ref, scope, sink)? {
            SchemaLoad::Compiled { schema, language } => {
                debug!(schema = %schema_ref, language = language.name(), "schema compiled");
                schema
            }
            SchemaLoad::Unavailable => return Ok(Outcome::SchemaUnavailable),
            SchemaLoad::Rejected { reason } => return Ok(Outcome::SchemaRejected { reason }),
        };

        let Some(doc) = self.libxml2.parse_memory(xml, DOCUMENT_OPTIONS)? else {
            return Ok(Outcome::DocumentInvalid);
        };
        Ok(schema.validate(&self.libxml2, &doc, sink)?.into())
    }
}

fn conclude(schema_ref: &str, outcome: Outcome, mut collector: DiagnosticCollector) -> Result<()> {
    let schema = schema_ref.to_string();
    match outcome {
        Outcome::Valid => Ok(()),
        Outcome::SchemaUnavailable => Err(ValidationError::SchemaLoad {
            schema,
            report: collector.into_report(),
        }),
        Outcome::SchemaRejected { reason } => {
            if let Some(reason) = reason {
                collector.fatal(reason);
            }
            Err(ValidationError::SchemaParse {
                schema,
                report: collector.into_report(),
            })
        }
        Outcome::DocumentInvalid => Err(ValidationError::Invalid {
            schema,
            report: collector.into_report(),
        }),
    }
}
