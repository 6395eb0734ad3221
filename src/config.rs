use crate::error::{CheckerError, Result};
use crate::listing::DEFAULT_LISTING_URL;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_FILE: &str = "bnf-map-checker.toml";

/// Run settings; every field has a default so the file itself is optional
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub listing_url: String,
    pub map_dir: Option<PathBuf>,
    pub warehouse: PathBuf,
    pub cache_path: PathBuf,
    pub use_cache: bool,
    pub user_agent: String,
    pub timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            listing_url: DEFAULT_LISTING_URL.to_string(),
            map_dir: None,
            warehouse: PathBuf::from("data").join("warehouse.db"),
            cache_path: PathBuf::from("data").join("items_df.csv"),
            use_cache: true,
            user_agent: format!("bnf-map-checker/{}", env!("CARGO_PKG_VERSION")),
            timeout_secs: 30,
        }
    }
}

impl Config {
    /// Load from `path`, or from the default file if it exists, or fall back to defaults
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::from_file(p),
            None => {
                let default_path = Path::new(DEFAULT_CONFIG_FILE);
                if default_path.exists() {
                    Self::from_file(default_path)
                } else {
                    Ok(Config::default())
                }
            }
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            CheckerError::Config(format!("Failed to read config file '{}': {}", path.display(), e))
        })?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.map_dir.is_none() && self.listing_url.trim().is_empty() {
            return Err(CheckerError::Config(
                "either listing_url or map_dir must be set".to_string(),
            ));
        }
        if self.timeout_secs == 0 {
            return Err(CheckerError::Config("timeout_secs must be positive".to_string()));
        }
        Ok(())
    }
}
