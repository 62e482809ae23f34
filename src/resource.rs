//! Bundled resource lookup and the `cp:` pseudo-protocol.
//!
//! Schemas and catalogs shipped with the program live under one or more
//! resource roots. A reference such as `cp:/grammars/book.rng` names a file
//! relative to those roots; the first root holding the file wins.

use std::path::{Component, Path, PathBuf};

use crate::error::ResourceError;

/// Scheme of the bundled-resource pseudo-protocol.
pub const RESOURCE_SCHEME: &str = "cp";

/// Finds bundled resources by name across an ordered list of roots.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceLocator {
    search_path: Vec<PathBuf>,
}

impl ResourceLocator {
    pub fn new<I, P>(search_path: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            search_path: search_path.into_iter().map(Into::into).collect(),
        }
    }

    pub fn search_path(&self) -> &[PathBuf] {
        &self.search_path
    }

    /// Whether `uri` uses the bundled-resource scheme (case-insensitive).
    pub fn is_resource_uri(uri: &str) -> bool {
        Self::strip_scheme(uri).is_some()
    }

    /// The resource name carried by a `cp:` URI, without leading slashes.
    pub fn resource_name(uri: &str) -> Option<&str> {
        Self::strip_scheme(uri).map(|rest| rest.trim_start_matches('/'))
    }

    fn strip_scheme(uri: &str) -> Option<&str> {
        let (scheme, rest) = uri.split_once(':')?;
        scheme
            .eq_ignore_ascii_case(RESOURCE_SCHEME)
            .then_some(rest)
    }

    /// Locate a resource by its plain relative name.
    ///
    /// Names may not escape the resource roots: absolute names and `..`
    /// segments are rejected.
    pub fn locate(&self, name: &str) -> Result<PathBuf, ResourceError> {
        let relative = sanitize(name)?;

        let found = self
            .search_path
            .iter()
            .map(|root| root.join(&relative))
            .find(|candidate| candidate.is_file());

        match found {
            Some(path) => {
                tracing::trace!(name, path = %path.display(), "located bundled resource");
                Ok(path)
            }
            None => Err(ResourceError::NotFound {
                name: name.to_string(),
            }),
        }
    }

    /// Resolve either a `cp:` URI or a plain resource name.
    pub fn resolve(&self, identifier: &str) -> Result<PathBuf, ResourceError> {
        match Self::resource_name(identifier) {
            Some(name) => self.locate(name),
            None => self.locate(identifier),
        }
    }
}

fn sanitize(name: &str) -> Result<PathBuf, ResourceError> {
    let invalid = |reason: &str| ResourceError::InvalidName {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    if name.trim().is_empty() {
        return Err(invalid("empty name"));
    }

    let path = Path::new(name);
    let mut relative = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::CurDir => {}
            Component::ParentDir => return Err(invalid("parent directory segments are not allowed")),
            Component::RootDir | Component::Prefix(_) => {
                return Err(invalid("absolute names are not allowed"));
            }
        }
    }

    if relative.as_os_str().is_empty() {
        return Err(invalid("empty name"));
    }
    Ok(relative)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn root_with(files: &[&str]) -> TempDir {
        let dir = TempDir::new().unwrap();
        for file in files {
            let path = dir.path().join(file);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(&path, "<grammar/>").unwrap();
        }
        dir
    }

    #[test]
    fn test_resource_uri_detection() {
        assert!(ResourceLocator::is_resource_uri("cp:/grammars/book.rng"));
        assert!(ResourceLocator::is_resource_uri("CP:/grammars/book.rng"));
        assert!(!ResourceLocator::is_resource_uri("grammars/book.rng"));
        assert!(!ResourceLocator::is_resource_uri("file:///tmp/book.rng"));

        assert_eq!(
            ResourceLocator::resource_name("cp:/grammars/book.rng"),
            Some("grammars/book.rng")
        );
        assert_eq!(ResourceLocator::resource_name("cp:book.rng"), Some("book.rng"));
        assert_eq!(ResourceLocator::resource_name("http://x/book.rng"), None);
    }

    #[test]
    fn test_locate_first_root_wins() {
        let first = root_with(&["grammars/book.rng"]);
        let second = root_with(&["grammars/book.rng", "grammars/other.rng"]);
        let locator = ResourceLocator::new([first.path(), second.path()]);

        assert_eq!(
            locator.locate("grammars/book.rng").unwrap(),
            first.path().join("grammars/book.rng")
        );
        assert_eq!(
            locator.resolve("cp:/grammars/other.rng").unwrap(),
            second.path().join("grammars/other.rng")
        );
    }

    #[test]
    fn test_locate_missing_resource() {
        let root = root_with(&[]);
        let locator = ResourceLocator::new([root.path()]);

        let err = locator.resolve("cp:/nope.xsd").unwrap_err();
        assert_eq!(
            err,
            ResourceError::NotFound {
                name: "nope.xsd".to_string()
            }
        );
    }

    #[test]
    fn test_locate_rejects_escaping_names() {
        let root = root_with(&["book.dtd"]);
        let locator = ResourceLocator::new([root.path().join("nested")]);

        assert!(matches!(
            locator.locate("../book.dtd"),
            Err(ResourceError::InvalidName { .. })
        ));
        assert!(matches!(
            locator.locate("/etc/passwd"),
            Err(ResourceError::InvalidName { .. })
        ));
        assert!(matches!(
            locator.locate("  "),
            Err(ResourceError::InvalidName { .. })
        ));
    }

    #[test]
    fn test_directories_are_not_resources() {
        let root = root_with(&["grammars/book.rng"]);
        let locator = ResourceLocator::new([root.path()]);

        assert!(locator.locate("grammars").is_err());
    }
}
