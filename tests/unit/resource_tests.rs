//! Bundled resource lookup tests

use crate::common::test_helpers::{TestFixtures, scratch_resources};
use xml_model_validator::{ResourceError, ResourceLocator};

#[test]
fn test_fixture_grammars_are_located() {
    let fixtures = TestFixtures::new();
    let locator = fixtures.locator();

    let path = locator.resolve("cp:/grammars/rng/book.rng").unwrap();
    assert!(path.ends_with("grammars/rng/book.rng"));
    assert!(path.starts_with(fixtures.resources_dir()));

    assert_eq!(locator.resolve("grammars/rng/book.rng").unwrap(), path);
}

#[test]
fn test_earlier_roots_win() {
    let first = scratch_resources(&[("shared.xsd", "<first/>")]);
    let second = scratch_resources(&[("shared.xsd", "<second/>"), ("only.xsd", "<x/>")]);
    let locator = ResourceLocator::new([first.path(), second.path()]);

    assert!(
        locator
            .locate("shared.xsd")
            .unwrap()
            .starts_with(first.path())
    );
    assert!(locator.locate("only.xsd").unwrap().starts_with(second.path()));
}

#[test]
fn test_missing_resource() {
    let locator = TestFixtures::new().locator();

    assert_eq!(
        locator.resolve("cp:/grammars/none.xsd"),
        Err(ResourceError::NotFound {
            name: "grammars/none.xsd".to_string()
        })
    );
}

#[test]
fn test_names_cannot_escape_roots() {
    let locator = TestFixtures::new().locator();

    assert!(matches!(
        locator.locate("../documents/book.xml"),
        Err(ResourceError::InvalidName { .. })
    ));
    assert!(matches!(
        locator.resolve("cp:/"),
        Err(ResourceError::InvalidName { .. })
    ));
}

#[test]
fn test_scheme_detection() {
    assert!(ResourceLocator::is_resource_uri("cp:/a.xsd"));
    assert!(ResourceLocator::is_resource_uri("CP:/a.xsd"));
    assert!(!ResourceLocator::is_resource_uri("file:///a.xsd"));
    assert!(!ResourceLocator::is_resource_uri("a.xsd"));
    assert_eq!(ResourceLocator::resource_name("cp:///a/b.xsd"), Some("a/b.xsd"));
}
