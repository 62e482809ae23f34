//! End-to-end validation against the bundled fixture grammars

mod common;

use common::test_helpers::TestFixtures;
use xml_model_validator::ValidationError;

fn validate(document: &str, schema: &str) -> Result<(), ValidationError> {
    let fixtures = TestFixtures::new();
    fixtures
        .validator()
        .validate(&fixtures.read_document(document), schema, None)
}

#[test]
fn test_valid_book_against_every_language() {
    for schema in [
        "cp:/grammars/dtd/book.dtd",
        "cp:/grammars/xsd/book.xsd",
        "cp:/grammars/rng/book.rng",
        "cp:/grammars/rnc/book.rnc",
        "cp:/grammars/sch/book.sch",
        "cp:/grammars/sch/book-1.5.sch",
        "cp:/grammars/nvdl/book.nvdl",
    ] {
        let result = validate("book.xml", schema);
        assert!(result.is_ok(), "{}: {:?}", schema, result);
    }
}

#[test]
fn test_book_without_author_is_invalid_everywhere() {
    for schema in [
        "cp:/grammars/dtd/book.dtd",
        "cp:/grammars/xsd/book.xsd",
        "cp:/grammars/rng/book.rng",
        "cp:/grammars/rnc/book.rnc",
        "cp:/grammars/sch/book.sch",
        "cp:/grammars/sch/book-1.5.sch",
        "cp:/grammars/nvdl/book.nvdl",
    ] {
        let err = validate("book-without-author.xml", schema).unwrap_err();

        assert!(
            matches!(err, ValidationError::Invalid { .. }),
            "{}: {:?}",
            schema,
            err
        );
        assert!(
            err.to_string()
                .starts_with(&format!("XML invalid against model {}", schema))
        );
    }
}

#[test]
fn test_invalid_report_carries_engine_messages() {
    for schema in [
        "cp:/grammars/rng/book.rng",
        "cp:/grammars/rnc/book.rnc",
        "cp:/grammars/nvdl/book.nvdl",
    ] {
        let err = validate("book-without-author.xml", schema).unwrap_err();

        let report = err.report().expect("invalid documents carry a report");
        assert!(report.has_errors());
        assert!(err.to_string().lines().count() > 1);
        assert!(report.contains("author"), "{}: {}", schema, report);
    }
}

#[test]
fn test_grammar_selection_is_by_content_not_name() {
    // Only a title is required here, so the author-less book passes.
    assert!(validate("book-without-author.xml", "cp:/grammars/rng/simple-book.rng").is_ok());
}

#[test]
fn test_existing_doctype_is_replaced_for_dtd_validation() {
    // The document names an unreachable DTD; validation uses the given one.
    assert!(validate("book-with-doctype.xml", "cp:/grammars/dtd/book.dtd").is_ok());
}

#[test]
fn test_relative_includes_resolve_inside_resources() {
    assert!(validate("book.xml", "cp:/grammars/xsd/book-with-include.xsd").is_ok());
    assert!(validate("book.xml", "cp:/grammars/rng/book-with-include.rng").is_ok());

    let err = validate("book-without-author.xml", "cp:/grammars/rng/book-with-include.rng")
        .unwrap_err();
    assert!(matches!(err, ValidationError::Invalid { .. }));
}

#[test]
fn test_malformed_document() {
    let err = validate("not-well-formed.xml", "cp:/grammars/dtd/book.dtd").unwrap_err();
    assert!(err.to_string().contains("not well-formed"));

    let err = validate("not-well-formed.xml", "cp:/grammars/rng/book.rng").unwrap_err();
    assert!(matches!(err, ValidationError::Invalid { .. }));
}

#[test]
fn test_missing_schema_is_a_load_error() {
    for schema in ["cp:/grammars/missing.rng", "cp:/grammars/missing.dtd"] {
        let err = validate("book.xml", schema).unwrap_err();
        assert!(
            matches!(err, ValidationError::SchemaLoad { .. }),
            "{}: {:?}",
            schema,
            err
        );
        assert!(err.to_string().contains("Error while loading schema"));
    }
}

#[test]
fn test_broken_dtd_fails() {
    let err = validate("book.xml", "cp:/grammars/dtd/broken.dtd").unwrap_err();
    assert!(err.to_string().contains("broken.dtd"));
}

#[test]
fn test_broken_grammar_is_a_parse_error() {
    let err = validate("book.xml", "cp:/grammars/broken/bad-grammar.rng").unwrap_err();

    assert!(matches!(err, ValidationError::SchemaParse { .. }), "{:?}", err);
    assert!(err.report().unwrap().has_errors());
}

#[test]
fn test_unknown_schema_language_is_named() {
    let err = validate("book.xml", "cp:/grammars/broken/not-a-schema.xml").unwrap_err();

    assert!(matches!(err, ValidationError::SchemaParse { .. }), "{:?}", err);
    assert!(
        err.to_string().contains("{urn:example:library}library"),
        "{}",
        err
    );
}

#[test]
fn test_broken_compact_syntax_is_a_parse_error() {
    let err = validate("book.xml", "cp:/grammars/broken/bad-syntax.rnc").unwrap_err();

    assert!(matches!(err, ValidationError::SchemaParse { .. }), "{:?}", err);
    assert!(
        err.to_string().contains("cp:/grammars/broken/bad-syntax.rnc: line 3"),
        "{}",
        err
    );
}

#[test]
fn test_plain_filesystem_schema_paths() {
    let fixtures = TestFixtures::new();
    let schema = fixtures
        .resources_dir()
        .join("grammars")
        .join("xsd")
        .join("book.xsd");

    let result = fixtures.validator().validate(
        &fixtures.read_document("book.xml"),
        &schema.to_string_lossy(),
        None,
    );
    assert!(result.is_ok(), "{:?}", result);
}
