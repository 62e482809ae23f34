//! Schema reference classification tests

use std::path::PathBuf;

use xml_model_validator::{SchemaKind, SchemaLanguage, SchemaSource};

#[test]
fn test_fixture_extensions_map_to_languages() {
    let cases = [
        ("cp:/grammars/xsd/book.xsd", Some(SchemaLanguage::XmlSchema)),
        ("cp:/grammars/rng/book.rng", Some(SchemaLanguage::RelaxNg)),
        ("cp:/grammars/rnc/book.rnc", Some(SchemaLanguage::RelaxNgCompact)),
        ("cp:/grammars/sch/book.sch", Some(SchemaLanguage::Schematron)),
        ("cp:/grammars/nvdl/book.nvdl", Some(SchemaLanguage::Nvdl)),
        ("cp:/grammars/dtd/book.dtd", None),
    ];

    for (schema_ref, expected) in cases {
        assert_eq!(SchemaLanguage::from_extension(schema_ref), expected, "{}", schema_ref);
    }
}

#[test]
fn test_language_names_are_human_readable() {
    assert_eq!(SchemaLanguage::XmlSchema.name(), "W3C XML Schema");
    assert_eq!(SchemaLanguage::Nvdl.name(), "NVDL");
}

#[test]
fn test_only_dtd_suffix_selects_dtd_path() {
    assert_eq!(SchemaKind::classify("cp:/grammars/dtd/book.dtd"), SchemaKind::Dtd);
    assert_eq!(SchemaKind::classify("/models/Book.DTD"), SchemaKind::Dtd);
    assert_eq!(SchemaKind::classify("cp:/grammars/xsd/book.xsd"), SchemaKind::Grammar);
    assert_eq!(SchemaKind::classify("cp:/grammars/dtd"), SchemaKind::Grammar);
    assert_eq!(SchemaKind::classify(""), SchemaKind::Grammar);
}

#[test]
fn test_schema_sources() {
    assert!(matches!(
        SchemaSource::classify("cp:/grammars/rng/book.rng"),
        SchemaSource::Resource(_)
    ));
    assert!(matches!(
        SchemaSource::classify("http://example.org/schemas/book.xsd"),
        SchemaSource::Remote(_)
    ));
    assert_eq!(
        SchemaSource::classify("models/book.xsd"),
        SchemaSource::Local(PathBuf::from("models/book.xsd"))
    );
}
