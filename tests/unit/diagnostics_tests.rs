//! Diagnostic report tests

use xml_model_validator::{Diagnostic, DiagnosticCollector, Severity};

#[test]
fn test_report_renders_buckets_in_severity_order() {
    let mut collector = DiagnosticCollector::new();
    collector.fatal("third");
    collector.error("second");
    collector.warning("first");

    let report = collector.into_report();

    assert_eq!(report.to_string(), "first\nsecond\nthird");
    assert_eq!(report.len(), 3);
    assert!(report.has_errors());
}

#[test]
fn test_warnings_alone_are_not_errors() {
    let mut collector = DiagnosticCollector::new();
    collector.warning("only a warning");

    let report = collector.into_report();

    assert!(!report.has_errors());
    assert_eq!(report.warnings().len(), 1);
    assert!(report.errors().is_empty());
    assert!(report.fatals().is_empty());
}

#[test]
fn test_locations_are_rendered() {
    let mut collector = DiagnosticCollector::new();
    collector.record(
        Diagnostic::new(Severity::Error, "Element author missing")
            .with_location(Some("book.xml".to_string()), Some(3)),
    );

    let report = collector.into_report();

    assert!(report.contains("Element author missing"));
    assert_eq!(report.to_string(), "book.xml:3: Element author missing");
}

#[test]
fn test_snapshot_leaves_collector_usable() {
    let mut collector = DiagnosticCollector::new();
    collector.error("before");
    let snapshot = collector.snapshot();
    collector.error("after");

    assert_eq!(snapshot.len(), 1);
    assert_eq!(collector.into_report().len(), 2);
}
