//! Creating, loading, and persisting the index.
//!
//! The persisted file is a JSON envelope around the backend's own snapshot:
//!
//! ```json
//! {
//!   "index_struct_type": "simple_dict",
//!   "saved_at": "2024-01-01T00:00:00Z",
//!   "data": { "...": "backend-defined" }
//! }
//! ```
//!
//! [`PersistMode::Overwrite`] writes the target file in place. If the process
//! dies mid-write the file can be left truncated; [`PersistMode::Atomic`]
//! avoids that by writing a sibling temp file and renaming it over the target.

use std::io::Write;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::backend::{BackendRegistry, IndexBackend, IndexStructType, RegistryEntry};
use crate::error::{ConfigurationError, InitError, LoadError, PersistError};

#[derive(Debug, Serialize, Deserialize)]
struct PersistedIndex {
    index_struct_type: String,
    saved_at: DateTime<Utc>,
    data: serde_json::Value,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PersistMode {
    #[default]
    Overwrite,
    Atomic,
}

/// Builds indexes through a [`BackendRegistry`] and writes them to disk.
#[derive(Clone)]
pub struct IndexStore {
    registry: BackendRegistry,
    mode: PersistMode,
}

impl IndexStore {
    pub fn new(registry: BackendRegistry, mode: PersistMode) -> Self {
        Self { registry, mode }
    }

    /// A new empty index when `storage_path` is `None`, otherwise the index
    /// persisted at that path.
    pub fn create_or_load(
        &self,
        backend_type: IndexStructType,
        storage_path: Option<&Path>,
    ) -> Result<Box<dyn IndexBackend>, InitError> {
        let (create, load) = match self.registry.get(backend_type) {
            Some(RegistryEntry::Local { create, load }) => (*create, *load),
            Some(RegistryEntry::ExternalVectorStore) => {
                return Err(ConfigurationError::ExternalVectorStore(backend_type).into())
            }
            None => return Err(ConfigurationError::UnknownBackend(backend_type.to_string()).into()),
        };

        let Some(path) = storage_path else {
            tracing::info!(backend = %backend_type, "creating empty index");
            return Ok(create());
        };

        let content = std::fs::read(path).map_err(|source| LoadError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let persisted: PersistedIndex =
            serde_json::from_slice(&content).map_err(|source| LoadError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        if persisted.index_struct_type != backend_type.as_str() {
            return Err(LoadError::Incompatible {
                path: path.to_path_buf(),
                expected: backend_type,
                found: persisted.index_struct_type,
            }
            .into());
        }
        let index = load(persisted.data).map_err(|source| LoadError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        tracing::info!(
            backend = %backend_type,
            path = %path.display(),
            nodes = index.node_count(),
            saved_at = %persisted.saved_at,
            "loaded persisted index"
        );
        Ok(index)
    }

    /// Serialize the whole index to `path`, replacing whatever is there.
    pub fn persist(&self, index: &dyn IndexBackend, path: &Path) -> Result<(), PersistError> {
        let persisted = PersistedIndex {
            index_struct_type: index.kind().as_str().to_string(),
            saved_at: Utc::now(),
            data: index.snapshot()?,
        };
        let bytes = serde_json::to_vec_pretty(&persisted)?;
        let write_err = |source| PersistError::Write {
            path: path.to_path_buf(),
            source,
        };

        let parent = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(parent).map_err(write_err)?;

        match self.mode {
            PersistMode::Overwrite => std::fs::write(path, &bytes).map_err(write_err)?,
            PersistMode::Atomic => {
                let mut tmp = tempfile::NamedTempFile::new_in(parent).map_err(write_err)?;
                tmp.write_all(&bytes).map_err(write_err)?;
                tmp.as_file().sync_all().map_err(write_err)?;
                tmp.persist(path).map_err(|e| write_err(e.error))?;
            }
        }

        tracing::info!(
            path = %path.display(),
            nodes = index.node_count(),
            bytes = bytes.len(),
            mode = ?self.mode,
            "persisted index"
        );
        Ok(())
    }
}

impl Default for IndexStore {
    fn default() -> Self {
        Self::new(BackendRegistry::with_builtins(), PersistMode::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::QueryParams;
    use crate::chunk::chunk_document;
    use crate::models::Document;
    use tempfile::TempDir;

    fn filled(store: &IndexStore, kind: IndexStructType) -> Box<dyn IndexBackend> {
        let mut index = store.create_or_load(kind, None).unwrap();
        index.insert(chunk_document(
            &Document::new("d1", "Cats are great pets."),
            700,
        ));
        index.insert(chunk_document(
            &Document::new("d2", "Rust has no garbage collector."),
            700,
        ));
        index
    }

    #[test]
    fn test_create_without_path_is_empty() {
        let index = IndexStore::default()
            .create_or_load(IndexStructType::SimpleDict, None)
            .unwrap();
        assert_eq!(index.node_count(), 0);
        assert_eq!(index.kind(), IndexStructType::SimpleDict);
    }

    #[test]
    fn test_round_trip_every_local_backend() {
        let tmp = TempDir::new().unwrap();
        for mode in [PersistMode::Overwrite, PersistMode::Atomic] {
            let store = IndexStore::new(BackendRegistry::with_builtins(), mode);
            for kind in [
                IndexStructType::SimpleDict,
                IndexStructType::List,
                IndexStructType::KeywordTable,
            ] {
                let path = tmp.path().join(format!("{kind}-{mode:?}.json"));
                let index = filled(&store, kind);
                store.persist(index.as_ref(), &path).unwrap();

                let loaded = store.create_or_load(kind, Some(&path)).unwrap();
                assert_eq!(loaded.doc_ids(), index.doc_ids());
                assert_eq!(loaded.node_count(), index.node_count());
                let params = QueryParams::default();
                assert_eq!(
                    loaded.query("cats", &params).unwrap().text,
                    index.query("cats", &params).unwrap().text
                );
            }
        }
    }

    #[test]
    fn test_persist_overwrites_and_creates_dirs() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested/dir/index.json");
        let store = IndexStore::default();

        let first = filled(&store, IndexStructType::List);
        store.persist(first.as_ref(), &path).unwrap();
        let empty = store.create_or_load(IndexStructType::List, None).unwrap();
        store.persist(empty.as_ref(), &path).unwrap();

        let loaded = store
            .create_or_load(IndexStructType::List, Some(&path))
            .unwrap();
        assert_eq!(loaded.node_count(), 0);
    }

    #[test]
    fn test_missing_file_is_load_error() {
        let tmp = TempDir::new().unwrap();
        let err = IndexStore::default()
            .create_or_load(
                IndexStructType::SimpleDict,
                Some(&tmp.path().join("nope.json")),
            )
            .unwrap_err();
        assert!(matches!(err, InitError::Load(LoadError::Read { .. })));
    }

    #[test]
    fn test_garbage_file_is_parse_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("index.json");
        std::fs::write(&path, "{ not json").unwrap();
        let err = IndexStore::default()
            .create_or_load(IndexStructType::SimpleDict, Some(&path))
            .unwrap_err();
        assert!(matches!(err, InitError::Load(LoadError::Parse { .. })));
    }

    #[test]
    fn test_wrong_payload_shape_is_parse_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("index.json");
        std::fs::write(
            &path,
            r#"{"index_struct_type":"list","saved_at":"2024-01-01T00:00:00Z","data":{"nodes":7}}"#,
        )
        .unwrap();
        let err = IndexStore::default()
            .create_or_load(IndexStructType::List, Some(&path))
            .unwrap_err();
        assert!(matches!(err, InitError::Load(LoadError::Parse { .. })));
    }

    #[test]
    fn test_other_backend_file_is_incompatible() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("index.json");
        let store = IndexStore::default();
        let index = filled(&store, IndexStructType::KeywordTable);
        store.persist(index.as_ref(), &path).unwrap();

        let err = store
            .create_or_load(IndexStructType::SimpleDict, Some(&path))
            .unwrap_err();
        match err {
            InitError::Load(LoadError::Incompatible {
                expected, found, ..
            }) => {
                assert_eq!(expected, IndexStructType::SimpleDict);
                assert_eq!(found, "keyword_table");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_external_backend_cannot_be_created() {
        let err = IndexStore::default()
            .create_or_load(IndexStructType::Pinecone, None)
            .unwrap_err();
        assert!(matches!(
            err,
            InitError::Configuration(ConfigurationError::ExternalVectorStore(_))
        ));
    }
}
