use std::path::{Path, PathBuf};

use tempfile::TempDir;
use xml_model_validator::{ResourceLocator, XmlValidator};

/// Test fixture paths
pub struct TestFixtures {
    pub fixtures_dir: PathBuf,
}

impl TestFixtures {
    pub fn new() -> Self {
        let fixtures_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .join("tests")
            .join("fixtures");

        Self { fixtures_dir }
    }

    /// Root of the bundled `cp:/` resources
    pub fn resources_dir(&self) -> PathBuf {
        self.fixtures_dir.join("resources")
    }

    pub fn documents_dir(&self) -> PathBuf {
        self.fixtures_dir.join("documents")
    }

    pub fn document(&self, name: &str) -> PathBuf {
        self.documents_dir().join(name)
    }

    pub fn read_document(&self, name: &str) -> Vec<u8> {
        std::fs::read(self.document(name)).unwrap()
    }

    pub fn locator(&self) -> ResourceLocator {
        ResourceLocator::new([self.resources_dir()])
    }

    pub fn validator(&self) -> XmlValidator {
        XmlValidator::new(self.locator())
    }
}

impl Default for TestFixtures {
    fn default() -> Self {
        Self::new()
    }
}

/// The one catalog shipped with the fixture resources
pub fn fixture_catalogs() -> Vec<String> {
    vec!["catalogs/catalog.xml".to_string()]
}

/// Create a scratch resource root holding `files`
pub fn scratch_resources(files: &[(&str, &str)]) -> TempDir {
    let dir = TempDir::new().unwrap();
    for (name, content) in files {
        write_file(dir.path(), name, content);
    }
    dir
}

pub fn write_file(root: &Path, name: &str, content: &str) -> PathBuf {
    let path = root.join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, content).unwrap();
    path
}
