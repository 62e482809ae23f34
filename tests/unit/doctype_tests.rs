//! Well-formedness and doctype injection tests against the fixture documents

use crate::common::test_helpers::TestFixtures;
use xml_model_validator::{
    DoctypeInjectionError, ValidationError, check_well_formed, inject_doctype,
};

#[test]
fn test_fixture_documents_well_formedness() {
    let fixtures = TestFixtures::new();

    assert!(check_well_formed(&fixtures.read_document("book.xml")).is_ok());
    assert!(check_well_formed(&fixtures.read_document("book-with-doctype.xml")).is_ok());

    let err = check_well_formed(&fixtures.read_document("not-well-formed.xml")).unwrap_err();
    assert!(matches!(err, ValidationError::WellFormedness { .. }));
    assert!(err.to_string().contains("not well-formed"));
}

#[test]
fn test_inject_from_file() {
    let fixtures = TestFixtures::new();
    let file = std::fs::File::open(fixtures.document("book-with-doctype.xml")).unwrap();

    let out = inject_doctype(Some(file), "cp:/grammars/dtd/book.dtd").unwrap();
    let out = String::from_utf8(out).unwrap();

    assert!(out.contains(r#"<!DOCTYPE book SYSTEM "cp:/grammars/dtd/book.dtd">"#));
    assert!(!out.contains("legacy.dtd"));
    assert!(out.contains(r#"encoding="UTF-8""#));
}

#[test]
fn test_inject_is_idempotent() {
    let fixtures = TestFixtures::new();
    let system_id = "cp:/grammars/dtd/book.dtd";

    let once = inject_doctype(Some(fixtures.read_document("book.xml").as_slice()), system_id)
        .unwrap();
    let twice = inject_doctype(Some(once.as_slice()), system_id).unwrap();

    assert_eq!(once, twice);
}

#[test]
fn test_inject_without_input() {
    let err = inject_doctype(None::<std::fs::File>, "book.dtd").unwrap_err();

    assert!(matches!(
        err,
        ValidationError::DoctypeInjection(DoctypeInjectionError::NullInput)
    ));
}

#[test]
fn test_inject_malformed_document() {
    let fixtures = TestFixtures::new();
    let input = fixtures.read_document("not-well-formed.xml");

    let err = inject_doctype(Some(input.as_slice()), "book.dtd").unwrap_err();
    assert!(matches!(
        err,
        ValidationError::DoctypeInjection(DoctypeInjectionError::Malformed { .. })
    ));
}
