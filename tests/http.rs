use std::sync::Arc;

use index_bot::backend::IndexStructType;
use index_bot::handler::{BotHandler, ConversationHandler, HandlerOptions, Phase};
use index_bot::server::serve;
use index_bot::store::IndexStore;
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

struct TestServer {
    base: String,
    handler: Arc<ConversationHandler>,
    stop: oneshot::Sender<()>,
    task: JoinHandle<anyhow::Result<()>>,
    tmp: TempDir,
}

async fn start_server() -> TestServer {
    let tmp = TempDir::new().unwrap();
    let store = IndexStore::default();
    let index = store
        .create_or_load(IndexStructType::SimpleDict, None)
        .unwrap();
    let options = HandlerOptions {
        persist_path: tmp.path().join("index.json"),
        ..HandlerOptions::default()
    };
    let handler = Arc::new(ConversationHandler::from_index(index, options));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let (stop, stopped) = oneshot::channel::<()>();
    let bot: Arc<dyn BotHandler> = handler.clone();
    let task = tokio::spawn(serve(listener, bot, async {
        let _ = stopped.await;
    }));

    TestServer {
        base,
        handler,
        stop,
        task,
        tmp,
    }
}

fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .build()
        .unwrap()
}

/// `(event, data)` pairs from an SSE body.
fn parse_sse(body: &str) -> Vec<(String, Value)> {
    let mut events = Vec::new();
    let mut name = None;
    for line in body.lines() {
        if let Some(ev) = line.strip_prefix("event:") {
            name = Some(ev.trim().to_string());
        } else if let Some(data) = line.strip_prefix("data:") {
            let data: Value = serde_json::from_str(data.trim()).unwrap();
            events.push((name.take().unwrap_or_default(), data));
        }
    }
    events
}

async fn post(client: &reqwest::Client, base: &str, body: Value) -> reqwest::Response {
    client.post(format!("{base}/")).json(&body).send().await.unwrap()
}

#[tokio::test]
async fn test_protocol_round_trip_and_persist_on_shutdown() {
    let server = start_server().await;
    let client = client();

    let health: Value = client
        .get(format!("{}/health", server.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");

    let resp = post(
        &client,
        &server.base,
        json!({
            "type": "add_documents",
            "documents": [
                {"doc_id": "d1", "text": "Cats are great pets."},
                {"doc_id": "d2", "text": "Rust has no garbage collector."}
            ]
        }),
    )
    .await;
    assert_eq!(resp.status(), 200);
    let ack: Value = resp.json().await.unwrap();
    assert_eq!(ack["context_clear_window_secs"], 3600);

    let resp = post(
        &client,
        &server.base,
        json!({
            "type": "query",
            "version": "1.0",
            "conversation_id": "c1",
            "query": [{"role": "user", "content": "Tell me about cats"}]
        }),
    )
    .await;
    assert_eq!(resp.status(), 200);
    assert!(resp
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap()
        .starts_with("text/event-stream"));
    let events = parse_sse(&resp.text().await.unwrap());
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].0, "text");
    assert!(events[0].1["text"].as_str().unwrap().contains("Cats are great pets."));
    assert_eq!(events[1].0, "done");

    let settings: Value = post(&client, &server.base, json!({"type": "settings"}))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(settings["allow_user_context_clear"], true);

    let resp = post(
        &client,
        &server.base,
        json!({
            "type": "report_feedback",
            "user_id": "u1",
            "conversation_id": "c1",
            "message_id": "m1",
            "feedback_type": "like"
        }),
    )
    .await;
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.json::<Value>().await.unwrap(), json!({}));

    drop(client);
    server.stop.send(()).unwrap();
    server.task.await.unwrap().unwrap();
    assert_eq!(server.handler.phase(), Phase::ShuttingDown);

    let persist_path = server.tmp.path().join("index.json");
    let reloaded = IndexStore::default()
        .create_or_load(IndexStructType::SimpleDict, Some(&persist_path))
        .unwrap();
    assert_eq!(reloaded.node_count(), 2);
}

#[tokio::test]
async fn test_empty_query_streams_error_then_done() {
    let server = start_server().await;
    let client = client();

    let resp = post(&client, &server.base, json!({"type": "query", "query": []})).await;
    let events = parse_sse(&resp.text().await.unwrap());
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].0, "error");
    assert_eq!(events[0].1["allow_retry"], false);
    assert_eq!(events[1].0, "done");

    drop(client);
    server.stop.send(()).unwrap();
    server.task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_malformed_request_is_rejected() {
    let server = start_server().await;
    let client = client();

    let resp = post(&client, &server.base, json!({"type": "launch_rockets"})).await;
    assert!(resp.status().is_client_error());

    drop(client);
    server.stop.send(()).unwrap();
    server.task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_add_documents_after_shutdown_is_503() {
    let server = start_server().await;
    let client = client();

    server.handler.shutdown().await.unwrap();

    let resp = post(
        &client,
        &server.base,
        json!({"type": "add_documents", "documents": [{"doc_id": "d1", "text": "late"}]}),
    )
    .await;
    assert_eq!(resp.status(), 503);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "not_serving");

    let resp = post(
        &client,
        &server.base,
        json!({"type": "query", "query": [{"role": "user", "content": "cats"}]}),
    )
    .await;
    let events = parse_sse(&resp.text().await.unwrap());
    assert_eq!(events[0].0, "error");

    drop(client);
    server.stop.send(()).unwrap();
    // The index was already persisted, so the server's own shutdown step fails.
    assert!(server.task.await.unwrap().is_err());
}
