use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::import::{
    ChunkPolicy, DuplicatePolicy, ExtensionClassifier, FileManagerConfig, FingerprintAlgorithm, HashEngine,
    ManagementMode,
};

const CONFIG_FILE: &str = "config.toml";

// Define error types for config loading
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

// Result type alias for config operations
pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Paths {
    pub library_root: String,
    pub log_directory: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Import {
    pub management_mode: String,       // "organized" or "leave_in_place"
    pub duplicate_policy: String,      // "skip", "overwrite" or "prompt"
    pub fingerprint_algorithm: String, // "xxh64" or "blake3"
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Hashing {
    /// Bytes per chunk, 0 selects adaptive sizing
    pub chunk_size: usize,
    pub progress_step_percent: u8,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Organization {
    pub fallback_category: String,
    /// Extension to category folder, merged over the built-in mapping
    #[serde(default)]
    pub categories: BTreeMap<String, String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Logging {
    pub log_level: String,
    pub log_format: String,
    pub log_to_terminal: bool,
    pub log_to_file: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct AppConfig {
    pub paths: Paths,
    pub import: Import,
    pub hashing: Hashing,
    pub organization: Organization,
    pub logging: Logging,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            paths: Paths {
                library_root: "./library".to_string(),
                log_directory: "./logs".to_string(),
            },
            import: Import {
                management_mode: "organized".to_string(),
                duplicate_policy: "skip".to_string(),
                fingerprint_algorithm: "xxh64".to_string(),
            },
            hashing: Hashing {
                chunk_size: 0,
                progress_step_percent: 5,
            },
            organization: Organization {
                fallback_category: "other".to_string(),
                categories: BTreeMap::new(),
            },
            logging: Logging {
                log_level: "info".to_string(),
                log_format: "json".to_string(),
                log_to_terminal: false,
                log_to_file: true,
            },
        }
    }
}

impl AppConfig {
    pub fn management_mode(&self) -> ManagementMode {
        ManagementMode::from_config_string(&self.import.management_mode)
    }

    pub fn duplicate_policy(&self) -> DuplicatePolicy {
        DuplicatePolicy::from_config_string(&self.import.duplicate_policy)
    }

    pub fn library_root(&self) -> PathBuf {
        PathBuf::from(&self.paths.library_root)
    }

    pub fn hash_engine(&self) -> HashEngine {
        HashEngine::new(
            FingerprintAlgorithm::from_config_string(&self.import.fingerprint_algorithm),
            ChunkPolicy::from_config_value(self.hashing.chunk_size),
        )
        .with_progress_step(self.hashing.progress_step_percent)
    }

    pub fn classifier(&self) -> ExtensionClassifier {
        self.organization
            .categories
            .iter()
            .fold(
                ExtensionClassifier::default().with_fallback(&self.organization.fallback_category),
                |classifier, (ext, folder)| classifier.with_category(ext, folder),
            )
    }

    /// Library settings for `FileManager::new`
    pub fn file_manager_config(&self) -> FileManagerConfig {
        FileManagerConfig {
            hash_engine: self.hash_engine(),
            classifier: Arc::new(self.classifier()),
        }
    }

    /// Reject values that parse but cannot work
    pub fn validate(&self) -> ConfigResult<()> {
        if self.hashing.progress_step_percent == 0 || self.hashing.progress_step_percent > 100 {
            return Err(ConfigError::Invalid(format!(
                "hashing.progress_step_percent must be between 1 and 100, got {}",
                self.hashing.progress_step_percent
            )));
        }
        if self.paths.log_directory.trim().is_empty() && self.logging.log_to_file {
            return Err(ConfigError::Invalid(
                "paths.log_directory is required when logging.log_to_file is enabled".to_string(),
            ));
        }
        Ok(())
    }
}

// Config manager to handle the configuration file
pub struct ConfigManager {
    app_config: RwLock<AppConfig>,
    config_dir: PathBuf,
}

impl ConfigManager {
    // Create a new ConfigManager instance
    pub fn new(config_dir: impl AsRef<Path>) -> ConfigResult<Self> {
        let config_dir = config_dir.as_ref().to_path_buf();

        if !config_dir.exists() {
            info!("Creating config directory: {}", config_dir.display());
            fs::create_dir_all(&config_dir)?;
        }

        let app_config = Self::load_app_config(&config_dir)?;
        app_config.validate()?;

        let manager = Self {
            app_config: RwLock::new(app_config),
            config_dir,
        };
        manager.create_default_config()?;

        Ok(manager)
    }

    // Load app config from config.toml
    fn load_app_config(config_dir: &Path) -> ConfigResult<AppConfig> {
        let config_path = config_dir.join(CONFIG_FILE);

        if !config_path.exists() {
            warn!("Config file not found: {}", config_path.display());
            return Ok(AppConfig::default());
        }

        let content = fs::read_to_string(&config_path)?;
        match toml::from_str(&content) {
            Ok(config) => Ok(config),
            Err(e) => {
                error!("Failed to parse {}: {}", CONFIG_FILE, e);
                info!("Backing up old config and creating new one with default values");

                if let Err(backup_err) = fs::rename(&config_path, config_path.with_extension("toml.backup")) {
                    warn!("Failed to backup old config: {}", backup_err);
                }

                let default_config = AppConfig::default();
                match toml::to_string_pretty(&default_config) {
                    Ok(toml_string) => {
                        if let Err(write_err) = fs::write(&config_path, toml_string) {
                            error!("Failed to write new config file: {}", write_err);
                        } else {
                            info!("Created new {} with default values", CONFIG_FILE);
                        }
                    }
                    Err(ser_err) => error!("Failed to serialize default config: {}", ser_err),
                }

                Ok(default_config)
            }
        }
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn config_path(&self) -> PathBuf {
        self.config_dir.join(CONFIG_FILE)
    }

    // Get a snapshot of the app config
    pub fn get_app_config(&self) -> AppConfig {
        self.app_config.read().clone()
    }

    // Save app config to file
    pub fn save_app_config(&self, config: &AppConfig) -> ConfigResult<()> {
        config.validate()?;
        let toml_string = toml::to_string_pretty(config)?;
        fs::write(self.config_path(), toml_string)?;

        *self.app_config.write() = config.clone();
        Ok(())
    }

    // Write the in-memory config out if no file exists yet
    fn create_default_config(&self) -> ConfigResult<()> {
        let config_path = self.config_path();
        if !config_path.exists() {
            let toml_string = toml::to_string_pretty(&*self.app_config.read())?;
            fs::write(&config_path, toml_string)?;
            info!("Created default config file: {}", config_path.display());
        }
        Ok(())
    }
}

// Helper function to create a ConfigManager instance
pub fn init_config(config_dir: impl AsRef<Path>) -> ConfigResult<ConfigManager> {
    ConfigManager::new(config_dir)
}
