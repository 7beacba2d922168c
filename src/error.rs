//! Error types for each failure class the bot distinguishes.
//!
//! Startup failures ([`ConfigurationError`], [`LoadError`]) are fatal and
//! keep the process from serving. [`QueryError`] never leaves the handler;
//! it becomes an error event on the response stream. [`PersistError`] is
//! reported to the operator at shutdown.

use std::path::PathBuf;

use thiserror::Error;

use crate::backend::IndexStructType;

#[derive(Error, Debug)]
pub enum ConfigurationError {
    #[error("Unknown index type: '{0}'")]
    UnknownBackend(String),
    #[error(
        "Index type '{0}' needs an externally managed vector store; use that vector store directly"
    )]
    ExternalVectorStore(IndexStructType),
    #[error("Unknown response mode: '{0}'. Must be answer_only or with_sources.")]
    UnknownResponseMode(String),
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("{path} holds a '{found}' index, expected '{expected}'")]
    Incompatible {
        path: PathBuf,
        expected: IndexStructType,
        found: String,
    },
}

/// Anything that can stop [`crate::handler::ConversationHandler::initialize`].
#[derive(Error, Debug)]
pub enum InitError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error(transparent)]
    Load(#[from] LoadError),
}

#[derive(Error, Debug)]
pub enum QueryError {
    #[error("No message to answer")]
    EmptyQuery,
    #[error("Bot is not serving requests")]
    NotServing,
    #[error("Backend error: {0}")]
    Backend(String),
    #[error("Query timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("Query worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

impl QueryError {
    /// Whether retrying the same query could succeed.
    pub fn allow_retry(&self) -> bool {
        !matches!(self, QueryError::EmptyQuery | QueryError::NotServing)
    }
}

#[derive(Error, Debug)]
pub enum HandlerError {
    #[error("Bot is not serving requests")]
    NotServing,
    #[error("Ingestion worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

#[derive(Error, Debug)]
pub enum PersistError {
    #[error("Failed to serialize index: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Persist worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
    #[error("Bot has already shut down")]
    AlreadyShutDown,
}
