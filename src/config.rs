use std::path::PathBuf;

use color_eyre::Result;
use color_eyre::eyre::{Context, eyre};
use serde::{Deserialize, Serialize};

/// OAuth client id/secret pair registered with a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderCredentials {
    pub client_id: String,
    pub client_secret: String,
}

/// Apple Music developer token material. The token is minted by an external
/// capability (signed JWT) and handed to us opaque, with its own expiry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppleConfig {
    pub developer_token: String,
    pub developer_token_expiry: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Config {
    pub spotify: ProviderCredentials,
    pub google: ProviderCredentials,
    #[serde(default)]
    pub apple: Option<AppleConfig>,
    #[serde(default)]
    database: Option<String>,
}

impl Config {
    /// Load config from a TOML file
    pub fn from_file(path: &PathBuf) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .context(format!("Failed to read config file: {}", path.display()))?;
        Self::from_toml(&contents)
            .context(format!("Failed to parse config file: {}", path.display()))
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|path| path.join("medley").join("config.toml"))
    }

    /// Load config from the platform config dir
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path().ok_or(eyre!("Config file not found"))?;
        Self::from_file(&config_path)
    }

    /// Database path, defaulting next to the config file
    pub fn database_path(&self) -> PathBuf {
        if let Some(ref db) = self.database {
            return PathBuf::from(db);
        }
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("medley")
            .join("medley.db")
    }
}
