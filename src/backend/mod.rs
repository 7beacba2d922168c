//! Index backend abstraction.
//!
//! The [`IndexBackend`] trait is the only thing the rest of the bot knows
//! about retrieval: insert nodes, answer a query, and produce a serializable
//! snapshot. Backends are selected at startup by an [`IndexStructType`] tag
//! looked up in a [`BackendRegistry`].
//!
//! # Built-in backends
//!
//! | Tag | Type | Retrieval |
//! |-----|------|-----------|
//! | `simple_dict` | [`SimpleDictIndex`] | term-vector cosine similarity (default) |
//! | `list` | [`ListIndex`] | every node, in insertion order |
//! | `keyword_table` | [`KeywordTableIndex`] | keyword → node table lookup |
//!
//! The tags `dict`, `weaviate`, `pinecone`, `qdrant`, `chroma`, and
//! `vector_store` are registered as [`RegistryEntry::ExternalVectorStore`]:
//! they are recognized, but refused at startup.
//!
//! Implementations are called from blocking worker threads and must be
//! `Send + Sync`.

pub mod keyword_table;
pub mod list;
pub mod simple_dict;

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::models::{Node, Response, ScoredNode};

pub use keyword_table::KeywordTableIndex;
pub use list::ListIndex;
pub use simple_dict::SimpleDictIndex;

/// Answer text used when no node matches a query.
pub const EMPTY_RESPONSE: &str = "Empty Response";

/// Default number of nodes the ranked backends keep per query.
pub const DEFAULT_SIMILARITY_TOP_K: usize = 2;

/// Tag naming an index structure.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexStructType {
    #[default]
    SimpleDict,
    List,
    KeywordTable,
    Dict,
    Weaviate,
    Pinecone,
    Qdrant,
    Chroma,
    VectorStore,
}

impl IndexStructType {
    pub const ALL: [IndexStructType; 9] = [
        IndexStructType::SimpleDict,
        IndexStructType::List,
        IndexStructType::KeywordTable,
        IndexStructType::Dict,
        IndexStructType::Weaviate,
        IndexStructType::Pinecone,
        IndexStructType::Qdrant,
        IndexStructType::Chroma,
        IndexStructType::VectorStore,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            IndexStructType::SimpleDict => "simple_dict",
            IndexStructType::List => "list",
            IndexStructType::KeywordTable => "keyword_table",
            IndexStructType::Dict => "dict",
            IndexStructType::Weaviate => "weaviate",
            IndexStructType::Pinecone => "pinecone",
            IndexStructType::Qdrant => "qdrant",
            IndexStructType::Chroma => "chroma",
            IndexStructType::VectorStore => "vector_store",
        }
    }

    /// Tags whose nodes live in a vector store this process does not manage.
    pub fn is_external_vector_store(self) -> bool {
        matches!(
            self,
            IndexStructType::Dict
                | IndexStructType::Weaviate
                | IndexStructType::Pinecone
                | IndexStructType::Qdrant
                | IndexStructType::Chroma
                | IndexStructType::VectorStore
        )
    }
}

impl fmt::Display for IndexStructType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IndexStructType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tag = s.trim();
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == tag)
            .ok_or_else(|| tag.to_string())
    }
}

/// Extra retrieval parameters, read from the optional query kwargs file.
///
/// Keys the built-in backends do not understand are kept in `extra` so a
/// custom backend can read them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryParams {
    #[serde(default)]
    pub similarity_top_k: Option<usize>,
    #[serde(default)]
    pub required_keywords: Vec<String>,
    #[serde(default)]
    pub exclude_keywords: Vec<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl QueryParams {
    /// Whether `text` satisfies the required/excluded keyword filters.
    pub fn admits(&self, text: &str) -> bool {
        let lower = text.to_lowercase();
        self.required_keywords
            .iter()
            .all(|k| lower.contains(&k.to_lowercase()))
            && !self
                .exclude_keywords
                .iter()
                .any(|k| lower.contains(&k.to_lowercase()))
    }

    pub fn top_k_or(&self, default: usize) -> usize {
        self.similarity_top_k.unwrap_or(default)
    }
}

/// A retrieval structure over a set of nodes.
pub trait IndexBackend: fmt::Debug + Send + Sync {
    /// The tag this backend is registered under.
    fn kind(&self) -> IndexStructType;

    /// Add nodes. Nodes are never removed once inserted.
    fn insert(&mut self, nodes: Vec<Node>);

    /// Answer `text` from the indexed nodes.
    fn query(&self, text: &str, params: &QueryParams) -> anyhow::Result<Response>;

    fn node_count(&self) -> usize;

    /// Distinct document ids with at least one indexed node.
    fn doc_ids(&self) -> BTreeSet<String>;

    /// Backend-defined persisted payload, read back by the registry loader.
    fn snapshot(&self) -> serde_json::Result<serde_json::Value>;
}

/// Persisted payload of the built-in backends. Only the nodes are stored;
/// lookup tables derived from them are rebuilt on load.
#[derive(Deserialize)]
pub struct NodeSnapshot {
    pub nodes: Vec<Node>,
}

pub type CreateFn = fn() -> Box<dyn IndexBackend>;
pub type LoadFn = fn(serde_json::Value) -> serde_json::Result<Box<dyn IndexBackend>>;

/// How a tag is backed in a [`BackendRegistry`].
#[derive(Clone, Copy)]
pub enum RegistryEntry {
    /// Built in this process: `create` makes an empty index, `load` restores
    /// one from a [`IndexBackend::snapshot`] payload.
    Local { create: CreateFn, load: LoadFn },
    /// Recognized, but requires a vector store managed outside this process.
    ExternalVectorStore,
}

impl RegistryEntry {
    pub fn local<B>() -> Self
    where
        B: IndexBackend + Default + DeserializeOwned + 'static,
    {
        RegistryEntry::Local {
            create: create_local::<B>,
            load: load_local::<B>,
        }
    }
}

fn create_local<B: IndexBackend + Default + 'static>() -> Box<dyn IndexBackend> {
    Box::new(B::default())
}

fn load_local<B: IndexBackend + DeserializeOwned + 'static>(
    value: serde_json::Value,
) -> serde_json::Result<Box<dyn IndexBackend>> {
    Ok(Box::new(serde_json::from_value::<B>(value)?))
}

/// Maps index tags to the code that builds them.
#[derive(Clone, Default)]
pub struct BackendRegistry {
    entries: HashMap<IndexStructType, RegistryEntry>,
}

impl BackendRegistry {
    /// An empty registry; every tag is unknown.
    pub fn new() -> Self {
        Self::default()
    }

    /// The three local backends plus the external vector store tags.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(
            IndexStructType::SimpleDict,
            RegistryEntry::local::<SimpleDictIndex>(),
        );
        registry.register(IndexStructType::List, RegistryEntry::local::<ListIndex>());
        registry.register(
            IndexStructType::KeywordTable,
            RegistryEntry::local::<KeywordTableIndex>(),
        );
        for tag in IndexStructType::ALL {
            if tag.is_external_vector_store() {
                registry.register(tag, RegistryEntry::ExternalVectorStore);
            }
        }
        registry
    }

    /// Add or replace the entry for `tag`.
    pub fn register(&mut self, tag: IndexStructType, entry: RegistryEntry) {
        self.entries.insert(tag, entry);
    }

    pub fn get(&self, tag: IndexStructType) -> Option<&RegistryEntry> {
        self.entries.get(&tag)
    }

    pub fn contains(&self, tag: IndexStructType) -> bool {
        self.entries.contains_key(&tag)
    }
}

const STOP_WORDS: &[&str] = &[
    "a", "about", "an", "and", "are", "as", "at", "be", "by", "can", "do", "does", "for", "from",
    "how", "i", "in", "is", "it", "me", "of", "on", "or", "that", "the", "this", "to", "was",
    "what", "when", "where", "which", "who", "why", "with", "you",
];

/// Lowercased alphanumeric terms of `text`, stop words removed and a
/// trailing plural `s` folded (`cats` → `cat`).
pub(crate) fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .filter(|w| !STOP_WORDS.contains(&w.as_str()))
        .map(|w| fold_plural(&w).to_string())
        .collect()
}

fn fold_plural(word: &str) -> &str {
    if word.len() > 3 && word.ends_with('s') && !word.ends_with("ss") {
        &word[..word.len() - 1]
    } else {
        word
    }
}

/// Build a response from ranked nodes: their texts joined by blank lines,
/// or [`EMPTY_RESPONSE`] when nothing matched.
pub(crate) fn synthesize(source_nodes: Vec<ScoredNode>) -> Response {
    if source_nodes.is_empty() {
        return Response {
            text: EMPTY_RESPONSE.to_string(),
            source_nodes,
        };
    }
    let text = source_nodes
        .iter()
        .map(|sn| sn.node.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");
    Response { text, source_nodes }
}
