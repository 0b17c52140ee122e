use std::collections::HashSet;
use std::path::{Path, PathBuf};

use foliochat_common::{Error, Result};
use tracing::{debug, info, warn};

use crate::model::AppConfig;

const CONFIG_DIR_NAME: &str = ".foliochat";
const DEFAULT_CONFIG_FILE: &str = "config.yml";
const DEFAULT_DB_FILE: &str = "sessions.db";

/// Loads `AppConfig` from YAML or TOML and resolves credentials from the environment.
pub struct ConfigLoader {
    config_dir: PathBuf,
    config_path: PathBuf,
}

impl ConfigLoader {
    /// Loader rooted at `~/.foliochat/config.yml`.
    pub fn new() -> Result<Self> {
        let home = dirs::home_dir()
            .ok_or_else(|| Error::Config("could not determine home directory".into()))?;
        let config_dir = home.join(CONFIG_DIR_NAME);
        let config_path = config_dir.join(DEFAULT_CONFIG_FILE);
        Ok(Self {
            config_dir,
            config_path,
        })
    }

    /// Loader for an explicit config file; its directory becomes the config dir.
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        let config_path = path.into();
        let config_dir = config_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Self {
            config_dir,
            config_path,
        }
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Default SQLite location for session state.
    pub fn default_db_path(&self) -> PathBuf {
        self.config_dir.join(DEFAULT_DB_FILE)
    }

    /// Read the config file (defaults when missing), load `.env`, resolve
    /// credentials and validate.
    pub fn load(&self) -> Result<AppConfig> {
        if dotenvy::dotenv().is_ok() {
            debug!("loaded environment overrides from .env");
        }

        let mut config = if self.config_path.exists() {
            info!("loading config from {}", self.config_path.display());
            let raw = std::fs::read_to_string(&self.config_path)?;
            parse_config(&self.config_path, &raw)?
        } else {
            warn!(
                "config file {} not found, using defaults",
                self.config_path.display()
            );
            AppConfig::default()
        };

        resolve_credentials(&mut config, |name| std::env::var(name).ok());
        validate(&config)?;
        Ok(config)
    }
}

fn parse_config(path: &Path, raw: &str) -> Result<AppConfig> {
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));

    if is_toml {
        toml::from_str(raw).map_err(|e| Error::Config(format!("invalid TOML config: {e}")))
    } else {
        serde_yaml::from_str(raw).map_err(|e| Error::Config(format!("invalid YAML config: {e}")))
    }
}

/// Fill `api_key` from `api_key_env` wherever an inline key is absent.
pub fn resolve_credentials(config: &mut AppConfig, lookup: impl Fn(&str) -> Option<String>) {
    for provider in &mut config.providers {
        if provider.api_key.is_none() {
            if let Some(var) = &provider.api_key_env {
                provider.api_key = lookup(var);
                if provider.api_key.is_none() {
                    warn!(
                        "provider '{}': environment variable {} is not set",
                        provider.name, var
                    );
                }
            }
        }
    }
    for fetcher in &mut config.fetchers {
        if fetcher.api_key.is_none() {
            if let Some(var) = &fetcher.api_key_env {
                fetcher.api_key = lookup(var);
            }
        }
    }
}

pub fn validate(config: &AppConfig) -> Result<()> {
    let mut names = HashSet::new();
    for provider in &config.providers {
        if provider.name.trim().is_empty() {
            return Err(Error::Config("provider name must not be empty".into()));
        }
        if !names.insert(provider.name.as_str()) {
            return Err(Error::Config(format!(
                "duplicate provider name '{}'",
                provider.name
            )));
        }
        if provider.model.trim().is_empty() {
            return Err(Error::Config(format!(
                "provider '{}' has no model",
                provider.name
            )));
        }
        let endpoint = provider.endpoint_or_default();
        url::Url::parse(&endpoint).map_err(|e| {
            Error::Config(format!(
                "provider '{}' has an invalid endpoint '{}': {e}",
                provider.name, endpoint
            ))
        })?;
    }

    for fetcher in &config.fetchers {
        url::Url::parse(&fetcher.base_url).map_err(|e| {
            Error::Config(format!(
                "fetcher '{}' has an invalid base_url '{}': {e}",
                fetcher.name, fetcher.base_url
            ))
        })?;
    }

    if config.invoker.max_attempts == 0 {
        return Err(Error::Config("invoker.max_attempts must be at least 1".into()));
    }
    if config.invoker.stream_buffer == 0 {
        return Err(Error::Config("invoker.stream_buffer must be at least 1".into()));
    }
    Ok(())
}
