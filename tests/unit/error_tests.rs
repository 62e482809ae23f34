//! Error type tests
//!
//! Rendered messages are part of the observable contract: callers match on
//! their leading phrases.

use xml_model_validator::{DiagnosticCollector, DoctypeInjectionError, ValidationError};

#[test]
fn test_io_error_conversion() {
    let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "File not found");
    let validation_error: ValidationError = io_error.into();

    assert!(matches!(validation_error, ValidationError::Io(_)));
    assert!(validation_error.to_string().contains("File not found"));
}

#[test]
fn test_stable_phrases() {
    let empty = || DiagnosticCollector::new().into_report();

    let cases = [
        (
            ValidationError::WellFormedness {
                details: "x".to_string(),
            },
            "not well-formed",
        ),
        (
            ValidationError::SchemaLoad {
                schema: "a.xsd".to_string(),
                report: empty(),
            },
            "Error while loading schema: a.xsd",
        ),
        (
            ValidationError::SchemaParse {
                schema: "a.xsd".to_string(),
                report: empty(),
            },
            "Error while parsing schema: a.xsd",
        ),
        (
            ValidationError::CatalogResolution {
                catalog: "c.xml".to_string(),
                reason: "missing".to_string(),
            },
            "Bad reference for catalog c.xml",
        ),
        (
            ValidationError::Invalid {
                schema: "a.xsd".to_string(),
                report: empty(),
            },
            "XML invalid against model a.xsd",
        ),
        (
            ValidationError::Invalid {
                schema: "a.xsd".to_string(),
                report: empty(),
            },
            "is not valid against model a.xsd",
        ),
        (
            DoctypeInjectionError::NullInput.into(),
            "Input stream cannot be null",
        ),
    ];

    for (error, phrase) in cases {
        assert!(
            error.to_string().contains(phrase),
            "{:?} does not mention {:?}",
            error,
            phrase
        );
    }
}

#[test]
fn test_empty_report_renders_headline_only() {
    let error = ValidationError::Invalid {
        schema: "a.rng".to_string(),
        report: DiagnosticCollector::new().into_report(),
    };

    assert_eq!(
        error.to_string(),
        "XML invalid against model a.rng: document is not valid against model a.rng"
    );
    assert_eq!(error.headline(), error.to_string());
}

#[test]
fn test_report_lines_follow_headline() {
    let mut collector = DiagnosticCollector::new();
    collector.error("Element book: missing child author");
    let error = ValidationError::Invalid {
        schema: "a.rng".to_string(),
        report: collector.into_report(),
    };

    let rendered = error.to_string();
    let mut lines = rendered.lines();
    assert_eq!(
        lines.next(),
        Some("XML invalid against model a.rng: document is not valid against model a.rng")
    );
    assert_eq!(lines.next(), Some("Element book: missing child author"));
    assert_eq!(lines.next(), None);
}
