//! Configuration loading and root folder resolution

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable overriding the root folder
pub const ROOT_FOLDER_ENV: &str = "QUORUM_ROOT_FOLDER";

/// Database file name inside the root folder
pub const DATABASE_FILE: &str = "quorum.db";

/// Logging section of the TOML file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when RUST_LOG is not set (e.g. "info", "quorum_pub=debug")
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Contents of `config.toml`
///
/// Every field is optional so a partial file (or no file) is valid.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TomlConfig {
    /// Folder holding the SQLite database
    pub root_folder: Option<String>,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Base URL of the external corpus API (e.g. "https://corpus.example.org/api/v1/")
    pub corpus_api_url: Option<String>,
    /// Token sent in the Authorization header
    pub corpus_api_token: Option<String>,
    /// Outgoing request budget for the corpus API
    pub requests_per_second: Option<u32>,
}

/// Load a TOML configuration file
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read TOML failed ({}): {}", path.display(), e)))?;
    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse TOML failed ({}): {}", path.display(), e)))
}

/// Load the platform configuration file, falling back to defaults when absent
///
/// A file that exists but does not parse is still an error.
pub fn load_default_toml_config() -> Result<TomlConfig> {
    match default_config_path() {
        Some(path) => {
            tracing::debug!("Loading configuration from {}", path.display());
            load_toml_config(&path)
        }
        None => {
            tracing::debug!("No configuration file found, using defaults");
            Ok(TomlConfig::default())
        }
    }
}

/// Locate the configuration file for the platform
///
/// Tries `<config_dir>/quorum/config.toml` then `/etc/quorum/config.toml`.
pub fn default_config_path() -> Option<PathBuf> {
    let user_config = dirs::config_dir().map(|d| d.join("quorum").join("config.toml"));
    if let Some(path) = user_config {
        if path.exists() {
            return Some(path);
        }
    }

    let system_config = PathBuf::from("/etc/quorum/config.toml");
    if cfg!(unix) && system_config.exists() {
        return Some(system_config);
    }

    None
}

/// Root folder resolution, in priority order:
/// 1. Command-line argument
/// 2. Environment variable
/// 3. TOML config file
/// 4. OS-dependent default
pub fn resolve_root_folder(cli_arg: Option<&str>, toml_config: &TomlConfig) -> PathBuf {
    if let Some(path) = cli_arg {
        return PathBuf::from(path);
    }

    if let Ok(path) = std::env::var(ROOT_FOLDER_ENV) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }

    if let Some(path) = &toml_config.root_folder {
        return PathBuf::from(path);
    }

    default_root_folder()
}

/// Database path inside a root folder
pub fn database_path(root_folder: &Path) -> PathBuf {
    root_folder.join(DATABASE_FILE)
}

fn default_root_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("quorum"))
        .unwrap_or_else(|| PathBuf::from("./quorum_data"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    #[test]
    fn test_load_partial_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "corpus_api_url = \"https://corpus.test/api/v1/\"").unwrap();
        writeln!(file, "[logging]").unwrap();
        writeln!(file, "level = \"debug\"").unwrap();

        let config = load_toml_config(file.path()).unwrap();
        assert_eq!(config.corpus_api_url.as_deref(), Some("https://corpus.test/api/v1/"));
        assert_eq!(config.logging.level, "debug");
        assert!(config.corpus_api_token.is_none());
        assert!(config.root_folder.is_none());
    }

    #[test]
    fn test_load_invalid_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "requests_per_second = \"many\"").unwrap();

        let err = load_toml_config(file.path()).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    #[serial]
    fn test_root_folder_cli_wins() {
        std::env::set_var(ROOT_FOLDER_ENV, "/from/env");
        let config = TomlConfig {
            root_folder: Some("/from/toml".to_string()),
            ..Default::default()
        };

        assert_eq!(resolve_root_folder(Some("/from/cli"), &config), PathBuf::from("/from/cli"));
        std::env::remove_var(ROOT_FOLDER_ENV);
    }

    #[test]
    #[serial]
    fn test_root_folder_env_before_toml() {
        std::env::set_var(ROOT_FOLDER_ENV, "/from/env");
        let config = TomlConfig {
            root_folder: Some("/from/toml".to_string()),
            ..Default::default()
        };

        assert_eq!(resolve_root_folder(None, &config), PathBuf::from("/from/env"));
        std::env::remove_var(ROOT_FOLDER_ENV);

        assert_eq!(resolve_root_folder(None, &config), PathBuf::from("/from/toml"));
    }

    #[test]
    fn test_database_path() {
        assert_eq!(
            database_path(Path::new("/data/quorum")),
            PathBuf::from("/data/quorum/quorum.db")
        );
    }
}
