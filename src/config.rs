use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{ConfigError, ConfigResult as Result};
use crate::resource::{RESOURCE_SCHEME, ResourceLocator};

/// Names searched for in the working directory and the user config directory
pub const CONFIG_FILE_NAMES: [&str; 2] = ["xml-model-validator.toml", "xml-model-validator.json"];

/// Explicit configuration file path
pub const CONFIG_ENV: &str = "XML_MODEL_VALIDATOR_CONFIG";

/// Resource search path, in the platform's path-list syntax
pub const RESOURCE_PATH_ENV: &str = "XML_MODEL_VALIDATOR_RESOURCE_PATH";

/// Comma separated catalog references
pub const CATALOGS_ENV: &str = "XML_MODEL_VALIDATOR_CATALOGS";

const RESOURCE_DIR: &str = "resources";

/// Trait for abstracting environment variable access
pub trait EnvProvider {
    fn get(&self, key: &str) -> Option<String>;
}

/// System environment variable provider for production use
pub struct SystemEnvProvider;

impl EnvProvider for SystemEnvProvider {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub resources: ResourceConfig,
    /// Catalog references handed to every validation
    pub catalogs: Vec<String>,
}

/// Where bundled `cp:/` resources are looked up
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ResourceConfig {
    /// Resource roots, searched in order
    pub search_path: Vec<PathBuf>,
}

impl Default for ResourceConfig {
    fn default() -> Self {
        let mut search_path = Vec::new();
        if let Some(exe_dir) = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf))
        {
            search_path.push(exe_dir.join(RESOURCE_DIR));
        }
        search_path.push(PathBuf::from(RESOURCE_DIR));

        Self { search_path }
    }
}

impl Config {
    /// Build the resource locator described by this configuration
    pub fn locator(&self) -> ResourceLocator {
        ResourceLocator::new(self.resources.search_path.iter().cloned())
    }
}

/// Configuration manager for loading and merging configurations
pub struct ConfigManager;

impl ConfigManager {
    /// Load configuration with precedence: defaults, then file, then
    /// environment
    pub fn load_config() -> Result<Config> {
        Self::load_config_with(&SystemEnvProvider)
    }

    /// Load configuration reading the environment through `env`
    pub fn load_config_with(env: &impl EnvProvider) -> Result<Config> {
        let mut config = Config::default();

        let file_config = match env.get(CONFIG_ENV) {
            Some(path) => Some(Self::load_from_file(Path::new(&path))?),
            None => Self::find_config_file()?,
        };
        if let Some(file_config) = file_config {
            config = Self::merge_configs(config, file_config);
        }

        config = Self::apply_environment_overrides_with(env, config)?;

        Self::validate_config(&config)?;

        debug!(
            search_path = ?config.resources.search_path,
            catalogs = ?config.catalogs,
            "configuration loaded"
        );
        Ok(config)
    }

    /// Load configuration from a file (TOML or JSON)
    pub fn load_from_file(path: &Path) -> Result<Config> {
        if !path.is_file() {
            return Err(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => toml::from_str(&content).map_err(|err| ConfigError::InvalidFormat {
                details: format!("{}: {}", path.display(), err),
            }),
            Some("json") => {
                serde_json::from_str(&content).map_err(|err| ConfigError::InvalidFormat {
                    details: format!("{}: {}", path.display(), err),
                })
            }
            other => Err(ConfigError::InvalidFormat {
                details: format!(
                    "unsupported configuration file extension {:?} for {}",
                    other.unwrap_or(""),
                    path.display()
                ),
            }),
        }
    }

    /// Find configuration file in standard locations
    pub fn find_config_file() -> Result<Option<Config>> {
        let mut dirs_to_search = vec![PathBuf::from(".")];
        if let Some(config_dir) = dirs::config_dir() {
            dirs_to_search.push(config_dir.join("xml-model-validator"));
        }

        Self::find_config_file_in(&dirs_to_search)
    }

    /// Load the first known configuration file found in `dirs_to_search`
    pub fn find_config_file_in(dirs_to_search: &[PathBuf]) -> Result<Option<Config>> {
        for dir in dirs_to_search {
            for name in CONFIG_FILE_NAMES {
                let path = dir.join(name);
                if path.is_file() {
                    debug!(path = %path.display(), "using configuration file");
                    return Self::load_from_file(&path).map(Some);
                }
            }
        }

        Ok(None)
    }

    /// Apply environment variable overrides with a custom environment provider
    pub fn apply_environment_overrides_with(
        env: &impl EnvProvider,
        mut config: Config,
    ) -> Result<Config> {
        if let Some(search_path) = env.get(RESOURCE_PATH_ENV) {
            config.resources.search_path = std::env::split_paths(&search_path).collect();
        }

        if let Some(catalogs) = env.get(CATALOGS_ENV) {
            config.catalogs = catalogs
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }

        Ok(config)
    }

    /// Merge two configurations; non-empty values of the second win
    pub fn merge_configs(mut base: Config, override_config: Config) -> Config {
        if !override_config.resources.search_path.is_empty() {
            base.resources.search_path = override_config.resources.search_path;
        }
        if !override_config.catalogs.is_empty() {
            base.catalogs = override_config.catalogs;
        }

        base
    }

    /// Validate configuration values
    pub fn validate_config(config: &Config) -> Result<()> {
        if let Some(index) = config
            .resources
            .search_path
            .iter()
            .position(|entry| entry.as_os_str().is_empty())
        {
            return Err(ConfigError::InvalidValue {
                field: format!("resources.search_path[{}]", index),
                value: String::new(),
                reason: "search path entries cannot be empty".to_string(),
            });
        }

        for catalog in &config.catalogs {
            if catalog.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "catalogs".to_string(),
                    value: catalog.clone(),
                    reason: "catalog references cannot be empty".to_string(),
                });
            }
            if ResourceLocator::is_resource_uri(catalog) {
                return Err(ConfigError::InvalidValue {
                    field: "catalogs".to_string(),
                    value: catalog.clone(),
                    reason: format!(
                        "catalogs are plain paths, the {}: scheme is not supported",
                        RESOURCE_SCHEME
                    ),
                });
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::fs;
    use tempfile::TempDir;

    /// Mock environment variable provider for testing
    #[derive(Default)]
    struct MockEnvProvider {
        vars: HashMap<String, String>,
    }

    impl MockEnvProvider {
        fn new() -> Self {
            Self::default()
        }

        fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
            self.vars.insert(key.into(), value.into());
        }
    }

    impl EnvProvider for MockEnvProvider {
        fn get(&self, key: &str) -> Option<String> {
            self.vars.get(key).cloned()
        }
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert!(config.catalogs.is_empty());
        assert_eq!(
            config.resources.search_path.last(),
            Some(&PathBuf::from("resources"))
        );
        assert!(
            config
                .resources
                .search_path
                .iter()
                .all(|p| p.ends_with("resources"))
        );
    }

    #[test]
    fn test_load_toml_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("xml-model-validator.toml");
        fs::write(
            &config_path,
            r#"
catalogs = ["catalogs/catalog.xml"]

[resources]
search_path = ["/opt/models", "vendor/models"]
"#,
        )
        .unwrap();

        let config = ConfigManager::load_from_file(&config_path).unwrap();

        assert_eq!(
            config.resources.search_path,
            vec![PathBuf::from("/opt/models"), PathBuf::from("vendor/models")]
        );
        assert_eq!(config.catalogs, vec!["catalogs/catalog.xml"]);
    }

    #[test]
    fn test_load_json_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("xml-model-validator.json");
        fs::write(
            &config_path,
            r#"{ "resources": { "search_path": ["models"] } }"#,
        )
        .unwrap();

        let config = ConfigManager::load_from_file(&config_path).unwrap();

        assert_eq!(config.resources.search_path, vec![PathBuf::from("models")]);
        assert!(config.catalogs.is_empty());
    }

    #[test]
    fn test_missing_section_takes_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("partial.toml");
        fs::write(&config_path, r#"catalogs = ["a.xml"]"#).unwrap();

        let config = ConfigManager::load_from_file(&config_path).unwrap();

        assert_eq!(config.resources, ResourceConfig::default());
        assert_eq!(config.catalogs, vec!["a.xml"]);
    }

    #[test]
    fn test_unsupported_file_format() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.yaml");
        fs::write(&config_path, "catalogs: []").unwrap();

        let result = ConfigManager::load_from_file(&config_path);
        assert!(matches!(result, Err(ConfigError::InvalidFormat { .. })));
    }

    #[test]
    fn test_invalid_toml() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        fs::write(&config_path, "catalogs = [unterminated").unwrap();

        let result = ConfigManager::load_from_file(&config_path);
        assert!(matches!(result, Err(ConfigError::InvalidFormat { .. })));
    }

    #[test]
    fn test_invalid_json() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.json");
        fs::write(&config_path, r#"{ "catalogs": 3 }"#).unwrap();

        let result = ConfigManager::load_from_file(&config_path);
        assert!(matches!(result, Err(ConfigError::InvalidFormat { .. })));
    }

    #[test]
    fn test_missing_file() {
        let result = ConfigManager::load_from_file(Path::new("/definitely/not/here.toml"));
        assert!(matches!(result, Err(ConfigError::FileNotFound { .. })));
    }

    #[test]
    fn test_find_config_file_in_order() {
        let first = TempDir::new().unwrap();
        let second = TempDir::new().unwrap();
        fs::write(
            second.path().join("xml-model-validator.json"),
            r#"{ "catalogs": ["second.xml"] }"#,
        )
        .unwrap();

        let dirs = vec![first.path().to_path_buf(), second.path().to_path_buf()];
        let found = ConfigManager::find_config_file_in(&dirs).unwrap().unwrap();
        assert_eq!(found.catalogs, vec!["second.xml"]);

        fs::write(
            first.path().join("xml-model-validator.toml"),
            r#"catalogs = ["first.xml"]"#,
        )
        .unwrap();
        let found = ConfigManager::find_config_file_in(&dirs).unwrap().unwrap();
        assert_eq!(found.catalogs, vec!["first.xml"]);
    }

    #[test]
    fn test_find_config_file_not_found() {
        let empty = TempDir::new().unwrap();
        let found = ConfigManager::find_config_file_in(&[empty.path().to_path_buf()]).unwrap();
        assert!(found.is_none());
    }

    #[test]
    fn test_environment_overrides() {
        let mut env = MockEnvProvider::new();
        let joined = std::env::join_paths(["/opt/a", "/opt/b"]).unwrap();
        env.set(RESOURCE_PATH_ENV, joined.to_string_lossy());
        env.set(CATALOGS_ENV, " one.xml, ,two.xml ");

        let config =
            ConfigManager::apply_environment_overrides_with(&env, Config::default()).unwrap();

        assert_eq!(
            config.resources.search_path,
            vec![PathBuf::from("/opt/a"), PathBuf::from("/opt/b")]
        );
        assert_eq!(config.catalogs, vec!["one.xml", "two.xml"]);
    }

    #[test]
    fn test_environment_absent_keeps_config() {
        let env = MockEnvProvider::new();
        let base = Config {
            resources: ResourceConfig {
                search_path: vec![PathBuf::from("models")],
            },
            catalogs: vec!["c.xml".to_string()],
        };

        let config = ConfigManager::apply_environment_overrides_with(&env, base.clone()).unwrap();
        assert_eq!(config, base);
    }

    #[test]
    fn test_merge_configs() {
        let base = Config {
            resources: ResourceConfig {
                search_path: vec![PathBuf::from("base")],
            },
            catalogs: vec!["base.xml".to_string()],
        };
        let override_config = Config {
            resources: ResourceConfig {
                search_path: Vec::new(),
            },
            catalogs: vec!["override.xml".to_string()],
        };

        let merged = ConfigManager::merge_configs(base, override_config);

        assert_eq!(merged.resources.search_path, vec![PathBuf::from("base")]);
        assert_eq!(merged.catalogs, vec!["override.xml"]);
    }

    #[test]
    fn test_config_validation() {
        assert!(ConfigManager::validate_config(&Config::default()).is_ok());

        let mut config = Config::default();
        config.resources.search_path.push(PathBuf::new());
        assert!(matches!(
            ConfigManager::validate_config(&config),
            Err(ConfigError::InvalidValue { .. })
        ));

        let config = Config {
            catalogs: vec!["cp:/catalogs/catalog.xml".to_string()],
            ..Config::default()
        };
        let err = ConfigManager::validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("cp:"));
    }

    #[test]
    fn test_load_config_from_env_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("custom.toml");
        fs::write(
            &config_path,
            r#"
catalogs = ["from-file.xml"]

[resources]
search_path = ["from-file"]
"#,
        )
        .unwrap();

        let mut env = MockEnvProvider::new();
        env.set(CONFIG_ENV, config_path.to_string_lossy());
        env.set(CATALOGS_ENV, "from-env.xml");

        let config = ConfigManager::load_config_with(&env).unwrap();

        assert_eq!(config.resources.search_path, vec![PathBuf::from("from-file")]);
        assert_eq!(config.catalogs, vec!["from-env.xml"]);
    }

    #[test]
    fn test_load_config_rejects_invalid_env_catalog() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("empty.toml");
        fs::write(&config_path, "").unwrap();

        let mut env = MockEnvProvider::new();
        env.set(CONFIG_ENV, config_path.to_string_lossy());
        env.set(CATALOGS_ENV, "cp:/catalogs/catalog.xml");

        assert!(ConfigManager::load_config_with(&env).is_err());
    }

    #[test]
    fn test_locator_uses_search_path() {
        let config = Config {
            resources: ResourceConfig {
                search_path: vec![PathBuf::from("a"), PathBuf::from("b")],
            },
            catalogs: Vec::new(),
        };

        assert_eq!(
            config.locator().search_path(),
            &[PathBuf::from("a"), PathBuf::from("b")]
        );
    }
}
