//! The conversation handler: one per process, shared by every request.
//!
//! [`ConversationHandler`] owns the live index and implements the four
//! protocol operations plus shutdown persistence. The hosting adapter talks
//! to it through the [`BotHandler`] trait.
//!
//! # Concurrency
//!
//! The index sits behind a `tokio::sync::RwLock`:
//!
//! - queries take a read guard, so any number run at once;
//! - ingestion takes the write guard for the whole insert;
//! - shutdown takes the write guard before persisting, which waits for every
//!   in-flight query and insert to finish.
//!
//! Backend calls (`query`, `insert`) and chunking run on blocking worker
//! threads via `spawn_blocking`. The guard moves into the worker and is
//! released when the worker returns.
//!
//! # Lifecycle
//!
//! Constructing the handler ([`ConversationHandler::initialize`] or
//! [`ConversationHandler::from_index`]) puts it in [`Phase::Serving`].
//! [`ConversationHandler::shutdown`] moves it to [`Phase::ShuttingDown`];
//! after that, queries produce an error event and ingestion is refused.
//!
//! Shutdown waits for work that already holds the index lock. Work still
//! queued for the lock when shutdown starts is rejected, including an
//! `add_documents` call waiting behind a running query: the caller gets
//! [`HandlerError::NotServing`] and none of its documents are inserted or
//! persisted.
//!
//! If persisting fails the handler stays in [`Phase::ShuttingDown`] and
//! `shutdown` may be called again to retry the write.

use std::path::PathBuf;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::Stream;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::backend::{BackendRegistry, IndexBackend, QueryParams};
use crate::chunk::chunk_documents;
use crate::config::Config;
use crate::error::{HandlerError, InitError, PersistError, QueryError};
use crate::models::{
    AddDocumentsRequest, Feedback, QueryRequest, Response, ResponseEvent, Settings,
};
use crate::resolver::{load_query_params, resolve, ResponseMode};
use crate::store::{IndexStore, PersistMode};

/// A finite, single-use stream of response events.
pub type ResponseStream = Pin<Box<dyn Stream<Item = ResponseEvent> + Send>>;

type SharedIndex = Arc<RwLock<Box<dyn IndexBackend>>>;

/// The operations a hosting protocol adapter drives.
#[async_trait]
pub trait BotHandler: Send + Sync {
    /// Answer the last message of `query`. The returned stream does no work
    /// until polled.
    fn get_response(&self, query: QueryRequest) -> ResponseStream;

    /// Record user feedback. Never fails.
    async fn on_feedback(&self, feedback: Feedback);

    async fn get_settings(&self) -> Settings;

    /// Ingest documents; the acknowledgement is the current [`Settings`].
    async fn add_documents(&self, request: AddDocumentsRequest) -> Result<Settings, HandlerError>;

    /// Called once after the adapter stops accepting requests.
    async fn on_shutdown(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Serving,
    ShuttingDown,
}

/// Everything besides the index that shapes the handler's behavior.
#[derive(Debug, Clone)]
pub struct HandlerOptions {
    pub settings: Settings,
    pub response_mode: ResponseMode,
    pub query_params: QueryParams,
    pub persist_path: PathBuf,
    pub persist_mode: PersistMode,
    pub max_tokens: usize,
    pub query_timeout: Duration,
}

impl Default for HandlerOptions {
    fn default() -> Self {
        Self {
            settings: Settings::default(),
            response_mode: ResponseMode::default(),
            query_params: QueryParams::default(),
            persist_path: PathBuf::from("./index.json"),
            persist_mode: PersistMode::default(),
            max_tokens: 700,
            query_timeout: Duration::from_secs(30),
        }
    }
}

pub struct ConversationHandler {
    index: SharedIndex,
    store: IndexStore,
    shutting_down: Arc<AtomicBool>,
    persisted: Arc<AtomicBool>,
    query_params: Arc<QueryParams>,
    settings: Settings,
    response_mode: ResponseMode,
    persist_path: PathBuf,
    max_tokens: usize,
    query_timeout: Duration,
}

impl ConversationHandler {
    /// Resolve the backend from `config`, load the query parameters, and
    /// create or load the index. Any error here means the bot must not serve.
    pub fn initialize(config: &Config, registry: BackendRegistry) -> Result<Self, InitError> {
        config.validate()?;
        let resolution = resolve(&config.index, &registry)?;
        let query_params = load_query_params(resolution.query_kwargs_path.as_deref())?;

        let persist_mode = if config.index.persist_atomic {
            PersistMode::Atomic
        } else {
            PersistMode::Overwrite
        };
        let store = IndexStore::new(registry, persist_mode);
        let index =
            store.create_or_load(resolution.backend_type, resolution.storage_path.as_deref())?;

        info!(
            backend = %resolution.backend_type,
            response_mode = %resolution.response_mode,
            nodes = index.node_count(),
            "conversation handler ready"
        );

        let options = HandlerOptions {
            settings: config.settings,
            response_mode: resolution.response_mode,
            query_params,
            persist_path: config.index.persist_path.clone(),
            persist_mode,
            max_tokens: config.chunking.max_tokens,
            query_timeout: Duration::from_secs(config.index.query_timeout_secs),
        };
        Ok(Self::with_store(index, store, options))
    }

    /// Serve an index that was built elsewhere.
    pub fn from_index(index: Box<dyn IndexBackend>, options: HandlerOptions) -> Self {
        let store = IndexStore::new(BackendRegistry::with_builtins(), options.persist_mode);
        Self::with_store(index, store, options)
    }

    fn with_store(index: Box<dyn IndexBackend>, store: IndexStore, options: HandlerOptions) -> Self {
        Self {
            index: Arc::new(RwLock::new(index)),
            store,
            shutting_down: Arc::new(AtomicBool::new(false)),
            persisted: Arc::new(AtomicBool::new(false)),
            query_params: Arc::new(options.query_params),
            settings: options.settings,
            response_mode: options.response_mode,
            persist_path: options.persist_path,
            max_tokens: options.max_tokens,
            query_timeout: options.query_timeout,
        }
    }

    pub fn phase(&self) -> Phase {
        if self.shutting_down.load(Ordering::SeqCst) {
            Phase::ShuttingDown
        } else {
            Phase::Serving
        }
    }

    /// Answer the last message in `query` with exactly one event.
    ///
    /// Backend failures, timeouts, an empty message list, and calls after
    /// shutdown become a single [`ResponseEvent::Error`]. Dropping the
    /// stream before polling it runs nothing.
    pub fn handle_query(&self, query: QueryRequest) -> ResponseStream {
        let index = Arc::clone(&self.index);
        let shutting_down = Arc::clone(&self.shutting_down);
        let params = Arc::clone(&self.query_params);
        let mode = self.response_mode;
        let limit = self.query_timeout;

        Box::pin(async_stream::stream! {
            let result = match query.last_content() {
                Some(content) => {
                    let content = content.to_string();
                    match tokio::time::timeout(
                        limit,
                        run_query(index, shutting_down, params, content),
                    )
                    .await
                    {
                        Ok(result) => result,
                        Err(_) => Err(QueryError::Timeout(limit)),
                    }
                }
                None => Err(QueryError::EmptyQuery),
            };

            yield match result {
                Ok(response) => {
                    debug!(
                        conversation_id = query.conversation_id.as_deref().unwrap_or(""),
                        sources = response.source_nodes.len(),
                        "answered query"
                    );
                    ResponseEvent::Text {
                        text: render(response, mode),
                    }
                }
                Err(e) => {
                    warn!(error = %e, "query failed");
                    ResponseEvent::Error {
                        allow_retry: e.allow_retry(),
                        text: e.to_string(),
                    }
                }
            };
        })
    }

    /// Log the feedback. Touches neither the index nor the settings.
    pub fn handle_feedback(&self, feedback: &Feedback) {
        info!(
            target: "feedback",
            user_id = %feedback.user_id,
            conversation_id = %feedback.conversation_id,
            message_id = %feedback.message_id,
            feedback_type = %feedback.feedback_type,
            "user feedback"
        );
    }

    pub fn get_settings(&self) -> Settings {
        self.settings
    }

    /// Chunk `request.documents` and insert the nodes under the write lock.
    pub async fn add_documents(
        &self,
        request: AddDocumentsRequest,
    ) -> Result<Settings, HandlerError> {
        self.ensure_serving()?;
        let mut guard = Arc::clone(&self.index).write_owned().await;
        // Shutdown may have started while we waited for the lock.
        self.ensure_serving()?;

        let doc_count = request.documents.len();
        let max_tokens = self.max_tokens;
        let node_count = tokio::task::spawn_blocking(move || {
            let nodes = chunk_documents(&request.documents, max_tokens);
            let n = nodes.len();
            guard.insert(nodes);
            n
        })
        .await?;

        info!(documents = doc_count, nodes = node_count, "added documents");
        Ok(self.settings)
    }

    /// Stop serving, wait for in-flight work, and persist the index to the
    /// configured path.
    ///
    /// A failed write leaves the handler shut down but unpersisted, so the
    /// call can be retried. Once the index has been written, further calls
    /// return [`PersistError::AlreadyShutDown`].
    pub async fn shutdown(&self) -> Result<(), PersistError> {
        if self.persisted.load(Ordering::SeqCst) {
            return Err(PersistError::AlreadyShutDown);
        }
        if !self.shutting_down.swap(true, Ordering::SeqCst) {
            info!(path = %self.persist_path.display(), "shutting down, waiting for in-flight requests");
        }

        let guard = Arc::clone(&self.index).write_owned().await;
        if self.persisted.load(Ordering::SeqCst) {
            return Err(PersistError::AlreadyShutDown);
        }
        let store = self.store.clone();
        let path = self.persist_path.clone();
        let persisted = Arc::clone(&self.persisted);
        tokio::task::spawn_blocking(move || {
            store.persist(&**guard, &path)?;
            // Set while the write guard is still held.
            persisted.store(true, Ordering::SeqCst);
            Ok::<_, PersistError>(())
        })
        .await??;
        Ok(())
    }

    /// Number of nodes currently indexed. Waits for any running insert.
    pub async fn node_count(&self) -> usize {
        self.index.read().await.node_count()
    }

    fn ensure_serving(&self) -> Result<(), HandlerError> {
        match self.phase() {
            Phase::Serving => Ok(()),
            Phase::ShuttingDown => {
                warn!("rejected request after shutdown");
                Err(HandlerError::NotServing)
            }
        }
    }
}

async fn run_query(
    index: SharedIndex,
    shutting_down: Arc<AtomicBool>,
    params: Arc<QueryParams>,
    content: String,
) -> Result<Response, QueryError> {
    if shutting_down.load(Ordering::SeqCst) {
        return Err(QueryError::NotServing);
    }
    let guard = index.read_owned().await;
    if shutting_down.load(Ordering::SeqCst) {
        return Err(QueryError::NotServing);
    }
    tokio::task::spawn_blocking(move || guard.query(&content, &params))
        .await?
        .map_err(|e| QueryError::Backend(format!("{e:#}")))
}

fn render(response: Response, mode: ResponseMode) -> String {
    match mode {
        ResponseMode::AnswerOnly => response.text,
        ResponseMode::WithSources => {
            let mut doc_ids: Vec<&str> = Vec::new();
            for sn in &response.source_nodes {
                if !doc_ids.contains(&sn.node.doc_id.as_str()) {
                    doc_ids.push(&sn.node.doc_id);
                }
            }
            if doc_ids.is_empty() {
                return response.text;
            }
            let sources = doc_ids
                .iter()
                .map(|id| format!("- {id}"))
                .collect::<Vec<_>>()
                .join("\n");
            format!("{}\n\nSources:\n{}", response.text, sources)
        }
    }
}

#[async_trait]
impl BotHandler for ConversationHandler {
    fn get_response(&self, query: QueryRequest) -> ResponseStream {
        self.handle_query(query)
    }

    async fn on_feedback(&self, feedback: Feedback) {
        self.handle_feedback(&feedback);
    }

    async fn get_settings(&self) -> Settings {
        ConversationHandler::get_settings(self)
    }

    async fn add_documents(&self, request: AddDocumentsRequest) -> Result<Settings, HandlerError> {
        ConversationHandler::add_documents(self, request).await
    }

    async fn on_shutdown(&self) -> anyhow::Result<()> {
        self.shutdown().await?;
        Ok(())
    }
}
