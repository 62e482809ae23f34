//! Well-formedness checking and doctype injection.
//!
//! Both operations parse with every external load refused: a document is
//! judged on its own bytes, and a DOCTYPE in the input never reaches the
//! network or the filesystem.

use std::io::Read;

use libc::c_int;
use tracing::debug;

use crate::diagnostics::DiagnosticCollector;
use crate::error::{DoctypeInjectionError, LibXml2Error, Result, ValidationError};
use crate::libxml2::{DiagnosticSink, LibXml2Wrapper, XML_PARSE_NOENT, XML_PARSE_NONET};
use crate::resolver::ResolutionScope;

const WELL_FORMEDNESS_OPTIONS: c_int = XML_PARSE_NONET;

// Internal entities are expanded so the output no longer depends on the
// declarations of the replaced doctype.
const INJECTION_OPTIONS: c_int = XML_PARSE_NOENT | XML_PARSE_NONET;

/// Check that `xml` parses as a well-formed XML document.
///
/// Fails with [`ValidationError::WellFormedness`] carrying the first fatal
/// parser message.
pub fn check_well_formed(xml: &[u8]) -> Result<()> {
    let libxml2 = LibXml2Wrapper::new();
    let _scope = ResolutionScope::isolated()?;

    let mut collector = DiagnosticCollector::new();
    let parsed = {
        let _sink = DiagnosticSink::install(&mut collector);
        libxml2.parse_memory(xml, WELL_FORMEDNESS_OPTIONS)?
    };

    match parsed {
        Some(_) => Ok(()),
        None => Err(ValidationError::WellFormedness {
            details: first_failure(&collector),
        }),
    }
}

/// Return `input` with its document type declaration replaced by
/// `<!DOCTYPE root SYSTEM "system_id">`, where `root` is the qualified name of
/// the document element.
///
/// Any existing internal or external subset is dropped. The result is
/// serialized as UTF-8 with an XML declaration.
pub fn inject_doctype<R: Read>(input: Option<R>, system_id: &str) -> Result<Vec<u8>> {
    let mut input = input.ok_or(DoctypeInjectionError::NullInput)?;
    let mut xml = Vec::new();
    input
        .read_to_end(&mut xml)
        .map_err(DoctypeInjectionError::Read)?;

    inject_doctype_bytes(&xml, system_id)
}

pub(crate) fn inject_doctype_bytes(xml: &[u8], system_id: &str) -> Result<Vec<u8>> {
    let libxml2 = LibXml2Wrapper::new();
    let _scope = ResolutionScope::isolated()?;

    let mut collector = DiagnosticCollector::new();
    let parsed = {
        let _sink = DiagnosticSink::install(&mut collector);
        libxml2.parse_memory(xml, INJECTION_OPTIONS)?
    };
    let Some(mut doc) = parsed else {
        return Err(DoctypeInjectionError::Malformed {
            details: first_failure(&collector),
        }
        .into());
    };

    doc.replace_doctype(system_id)
        .and_then(|()| doc.to_utf8())
        .map_err(|err| serialization_error(&err))
        .inspect(|bytes| {
            debug!(system_id, size = bytes.len(), "injected doctype");
        })
}

fn serialization_error(err: &LibXml2Error) -> ValidationError {
    DoctypeInjectionError::Serialization {
        details: err.to_string(),
    }
    .into()
}

fn first_failure(collector: &DiagnosticCollector) -> String {
    collector
        .first_failure()
        .map(ToString::to_string)
        .unwrap_or_else(|| "document could not be parsed".to_string())
}
