//! HTTP adapter for the bot protocol.
//!
//! Every protocol call is a `POST /` whose JSON body carries a `type` tag.
//! Queries are answered as server-sent events; everything else is plain JSON.
//!
//! # Endpoints
//!
//! | Method | Path | Body `type` | Response |
//! |--------|------|-------------|----------|
//! | `POST` | `/` | `query` | SSE: `text` or `error`, then `done` |
//! | `POST` | `/` | `settings` | `Settings` JSON |
//! | `POST` | `/` | `report_feedback` | `{}` |
//! | `POST` | `/` | `add_documents` | `Settings` JSON (acknowledgement) |
//! | `GET`  | `/health` | | `{"status":"ok","version":...}` |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "not_serving", "message": "Bot is not serving requests" } }
//! ```
//!
//! Error codes: `not_serving` (503), `internal` (500). Bodies that fail to
//! parse are rejected by the JSON extractor with a 4xx.
//!
//! # Shutdown
//!
//! On SIGINT/SIGTERM the server stops accepting connections, lets in-flight
//! requests finish, then calls [`BotHandler::on_shutdown`], which persists
//! the index.

use std::future::Future;
use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures::{stream, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use crate::error::HandlerError;
use crate::handler::{BotHandler, ResponseStream};
use crate::models::{AddDocumentsRequest, Feedback, QueryRequest, ResponseEvent};

#[derive(Clone)]
struct AppState {
    bot: Arc<dyn BotHandler>,
}

/// Settings requests carry protocol metadata this bot does not use.
#[derive(Debug, Default, Deserialize)]
pub struct SettingsRequest {}

/// A protocol request, discriminated by its `type` field.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProtocolRequest {
    Query(QueryRequest),
    Settings(SettingsRequest),
    ReportFeedback(Feedback),
    AddDocuments(AddDocumentsRequest),
}

/// Routes for `bot`, without binding a socket.
pub fn router(bot: Arc<dyn BotHandler>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", post(handle_protocol))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(AppState { bot })
}

/// Bind `bind_addr` and serve until SIGINT/SIGTERM, then shut the bot down.
pub async fn run_server(bind_addr: &str, bot: Arc<dyn BotHandler>) -> anyhow::Result<()> {
    let listener = TcpListener::bind(bind_addr).await?;
    serve(listener, bot, shutdown_signal()).await
}

/// Serve on an already-bound listener until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, bot: Arc<dyn BotHandler>, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    info!(addr = %listener.local_addr()?, "bot server listening");
    axum::serve(listener, router(Arc::clone(&bot)))
        .with_graceful_shutdown(shutdown)
        .await?;

    info!("server stopped accepting requests");
    if let Err(e) = bot.on_shutdown().await {
        error!(error = %e, "failed to persist index at shutdown");
        return Err(e);
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<HandlerError> for AppError {
    fn from(err: HandlerError) -> Self {
        match err {
            HandlerError::NotServing => AppError {
                status: StatusCode::SERVICE_UNAVAILABLE,
                code: "not_serving",
                message: err.to_string(),
            },
            HandlerError::Worker(_) => AppError {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                code: "internal",
                message: err.to_string(),
            },
        }
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

// ============ POST / ============

async fn handle_protocol(
    State(state): State<AppState>,
    Json(request): Json<ProtocolRequest>,
) -> Result<Response, AppError> {
    match request {
        ProtocolRequest::Query(query) => Ok(sse_response(state.bot.get_response(query)).into_response()),
        ProtocolRequest::Settings(_) => Ok(Json(state.bot.get_settings().await).into_response()),
        ProtocolRequest::ReportFeedback(feedback) => {
            state.bot.on_feedback(feedback).await;
            Ok(Json(serde_json::json!({})).into_response())
        }
        ProtocolRequest::AddDocuments(request) => {
            let ack = state.bot.add_documents(request).await?;
            Ok(Json(ack).into_response())
        }
    }
}

fn sse_response(events: ResponseStream) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let done = stream::once(async { Ok(Event::default().event("done").data("{}")) });
    Sse::new(events.map(|ev| to_sse_event(&ev)).chain(done)).keep_alive(KeepAlive::default())
}

fn to_sse_event(event: &ResponseEvent) -> Result<Event, axum::Error> {
    Event::default().event(event.name()).json_data(event)
}
