//! TOML configuration with environment overrides.
//!
//! Every section and key is optional; a missing config file means "all
//! defaults". After the file is parsed, a fixed set of `IBOT_*` environment
//! variables override the index and server keys (see [`ENV_OVERRIDES`]).
//!
//! ```toml
//! [index]
//! backend_type = "simple_dict"
//! storage_path = "./index.json"
//! response_mode = "answer_only"
//!
//! [server]
//! bind = "127.0.0.1:8080"
//! ```

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::ConfigurationError;
use crate::models::Settings;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub index: IndexConfig,
    pub chunking: ChunkingConfig,
    pub settings: Settings,
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct IndexConfig {
    /// Index structure tag. `None` resolves to the default backend.
    pub backend_type: Option<String>,
    /// Persisted index to load at startup. `None` starts empty.
    pub storage_path: Option<PathBuf>,
    /// JSON file of extra retrieval parameters.
    pub query_kwargs_path: Option<PathBuf>,
    pub response_mode: Option<String>,
    /// Where the index is written at shutdown.
    pub persist_path: PathBuf,
    /// Write to a temp file and rename instead of overwriting in place.
    pub persist_atomic: bool,
    pub query_timeout_secs: u64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            backend_type: None,
            storage_path: None,
            query_kwargs_path: None,
            response_mode: None,
            persist_path: PathBuf::from("./index.json"),
            persist_atomic: false,
            query_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ChunkingConfig {
    pub max_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self { max_tokens: 700 }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
        }
    }
}

/// Environment variables read by [`Config::apply_env_overrides`].
pub const ENV_OVERRIDES: [&str; 6] = [
    "IBOT_BACKEND_TYPE",
    "IBOT_STORAGE_PATH",
    "IBOT_QUERY_KWARGS_PATH",
    "IBOT_RESPONSE_MODE",
    "IBOT_PERSIST_PATH",
    "IBOT_BIND",
];

impl Config {
    /// Override keys from `lookup` (normally the process environment).
    /// Empty values are ignored.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("IBOT_BACKEND_TYPE") {
            self.index.backend_type = Some(v);
        }
        if let Some(v) = get("IBOT_STORAGE_PATH") {
            self.index.storage_path = Some(PathBuf::from(v));
        }
        if let Some(v) = get("IBOT_QUERY_KWARGS_PATH") {
            self.index.query_kwargs_path = Some(PathBuf::from(v));
        }
        if let Some(v) = get("IBOT_RESPONSE_MODE") {
            self.index.response_mode = Some(v);
        }
        if let Some(v) = get("IBOT_PERSIST_PATH") {
            self.index.persist_path = PathBuf::from(v);
        }
        if let Some(v) = get("IBOT_BIND") {
            self.server.bind = v;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.chunking.max_tokens == 0 {
            return Err(ConfigurationError::Invalid(
                "chunking.max_tokens must be > 0".to_string(),
            ));
        }
        if self.index.query_timeout_secs == 0 {
            return Err(ConfigurationError::Invalid(
                "index.query_timeout_secs must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Parse a config from TOML text.
pub fn parse_config(content: &str, path: &Path) -> Result<Config, ConfigurationError> {
    toml::from_str(content).map_err(|source| ConfigurationError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Load `path` (defaults if it does not exist), apply environment
/// overrides, and validate.
pub fn load_config(path: &Path) -> Result<Config, ConfigurationError> {
    let mut config = if path.exists() {
        let content =
            std::fs::read_to_string(path).map_err(|source| ConfigurationError::Read {
                path: path.to_path_buf(),
                source,
            })?;
        parse_config(&content, path)?
    } else {
        tracing::debug!(path = %path.display(), "config file not found, using defaults");
        Config::default()
    };

    config.apply_env_overrides(|key| std::env::var(key).ok());
    config.validate()?;
    Ok(config)
}
