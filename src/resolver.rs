//! Startup resolution of the index backend and response options.
//!
//! [`resolve`] is a pure function of the `[index]` config section and the
//! backend registry. It never touches the filesystem; loading the index and
//! the query kwargs file happens afterwards.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::backend::{BackendRegistry, IndexStructType, QueryParams, RegistryEntry};
use crate::config::IndexConfig;
use crate::error::{ConfigurationError, LoadError};

/// How much of a backend response is sent back to the user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResponseMode {
    /// The answer text only.
    #[default]
    AnswerOnly,
    /// The answer text followed by the ids of the documents it came from.
    WithSources,
}

impl FromStr for ResponseMode {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "answer_only" => Ok(ResponseMode::AnswerOnly),
            "with_sources" => Ok(ResponseMode::WithSources),
            other => Err(ConfigurationError::UnknownResponseMode(other.to_string())),
        }
    }
}

impl fmt::Display for ResponseMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseMode::AnswerOnly => f.write_str("answer_only"),
            ResponseMode::WithSources => f.write_str("with_sources"),
        }
    }
}

/// The validated outcome of [`resolve`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub backend_type: IndexStructType,
    pub storage_path: Option<PathBuf>,
    pub query_kwargs_path: Option<PathBuf>,
    pub response_mode: ResponseMode,
}

/// Pick and validate the backend and response mode.
///
/// Fails if the backend tag is unknown to `registry`, if it names an
/// externally managed vector store, or if the response mode is unknown.
pub fn resolve(
    config: &IndexConfig,
    registry: &BackendRegistry,
) -> Result<Resolution, ConfigurationError> {
    let backend_type = match config.backend_type.as_deref() {
        None => IndexStructType::default(),
        Some(tag) => tag
            .parse::<IndexStructType>()
            .map_err(ConfigurationError::UnknownBackend)?,
    };

    match registry.get(backend_type) {
        None => {
            return Err(ConfigurationError::UnknownBackend(
                backend_type.to_string(),
            ))
        }
        Some(RegistryEntry::ExternalVectorStore) => {
            return Err(ConfigurationError::ExternalVectorStore(backend_type))
        }
        Some(RegistryEntry::Local { .. }) => {}
    }

    let response_mode = match config.response_mode.as_deref() {
        None => ResponseMode::default(),
        Some(mode) => mode.parse()?,
    };

    Ok(Resolution {
        backend_type,
        storage_path: config.storage_path.clone(),
        query_kwargs_path: config.query_kwargs_path.clone(),
        response_mode,
    })
}

/// Read the query kwargs JSON file, or default parameters when no path is set.
pub fn load_query_params(path: Option<&Path>) -> Result<QueryParams, LoadError> {
    let Some(path) = path else {
        return Ok(QueryParams::default());
    };
    let content = std::fs::read_to_string(path).map_err(|source| LoadError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&content).map_err(|source| LoadError::Parse {
        path: path.to_path_buf(),
        source,
    })
}
