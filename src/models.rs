//! Core data models used throughout index-bot.
//!
//! These types represent the documents, nodes, protocol requests, and
//! responses that flow between the hosting protocol, the conversation
//! handler, and the index backend.

use serde::{Deserialize, Serialize};

/// A unit of raw content submitted for ingestion.
///
/// `doc_id` uniqueness is the caller's responsibility; nothing deduplicates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub text: String,
    pub doc_id: String,
}

impl Document {
    pub fn new(doc_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            doc_id: doc_id.into(),
        }
    }
}

/// A chunk of a document's text, produced by [`crate::chunk::chunk_document`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub node_id: String,
    pub doc_id: String,
    pub index: i64,
    pub text: String,
    pub hash: String,
}

/// A node paired with the score a backend assigned it for one query.
#[derive(Debug, Clone)]
pub struct ScoredNode {
    pub node: Node,
    pub score: f64,
}

/// A backend's answer to a query.
#[derive(Debug, Clone)]
pub struct Response {
    /// Synthesized answer text.
    pub text: String,
    /// Nodes the answer was built from, best first.
    pub source_nodes: Vec<ScoredNode>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Bot,
}

/// One turn of a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// A query from the hosting protocol.
///
/// Only the content of the last message is used for retrieval. Earlier
/// turns are accepted and ignored.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryRequest {
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub message_id: Option<String>,
    pub query: Vec<Message>,
}

impl QueryRequest {
    /// Build a request holding a single user message.
    pub fn from_text(content: impl Into<String>) -> Self {
        Self {
            query: vec![Message::user(content)],
            ..Default::default()
        }
    }

    /// Content of the most recent message, if any.
    pub fn last_content(&self) -> Option<&str> {
        self.query.last().map(|m| m.content.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackType {
    Like,
    Dislike,
}

impl std::fmt::Display for FeedbackType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FeedbackType::Like => f.write_str("like"),
            FeedbackType::Dislike => f.write_str("dislike"),
        }
    }
}

/// User feedback on a previous answer. Logged, never applied to the index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Feedback {
    pub user_id: String,
    pub conversation_id: String,
    pub message_id: String,
    pub feedback_type: FeedbackType,
}

/// Behavioral limits reported to every caller. Fixed at process start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub context_clear_window_secs: u64,
    pub allow_user_context_clear: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            context_clear_window_secs: 60 * 60,
            allow_user_context_clear: true,
        }
    }
}

/// Request body for document ingestion.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AddDocumentsRequest {
    pub documents: Vec<Document>,
}

/// A single event on a query's response stream.
///
/// Serializes to the event payload only (`{"text"}` or
/// `{"text","allow_retry"}`); the event name comes from [`ResponseEvent::name`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ResponseEvent {
    Text { text: String },
    Error { text: String, allow_retry: bool },
}

impl ResponseEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ResponseEvent::Text { .. } => "text",
            ResponseEvent::Error { .. } => "error",
        }
    }

    pub fn text(&self) -> &str {
        match self {
            ResponseEvent::Text { text } | ResponseEvent::Error { text, .. } => text,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, ResponseEvent::Error { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_content_uses_final_message() {
        let req = QueryRequest {
            query: vec![
                Message::user("first question"),
                Message {
                    role: Role::Bot,
                    content: "an answer".to_string(),
                },
                Message::user("follow-up"),
            ],
            ..Default::default()
        };
        assert_eq!(req.last_content(), Some("follow-up"));
        assert_eq!(QueryRequest::default().last_content(), None);
    }

    #[test]
    fn test_feedback_parses_protocol_shape() {
        let fb: Feedback = serde_json::from_str(
            r#"{"user_id":"u1","conversation_id":"c1","message_id":"m1","feedback_type":"dislike"}"#,
        )
        .unwrap();
        assert_eq!(fb.feedback_type, FeedbackType::Dislike);
        assert_eq!(fb.feedback_type.to_string(), "dislike");
    }

    #[test]
    fn test_response_event_payloads() {
        let text = ResponseEvent::Text {
            text: "hi".to_string(),
        };
        assert_eq!(text.name(), "text");
        assert_eq!(serde_json::to_value(&text).unwrap(), serde_json::json!({"text": "hi"}));

        let error = ResponseEvent::Error {
            text: "boom".to_string(),
            allow_retry: true,
        };
        assert_eq!(error.name(), "error");
        assert_eq!(
            serde_json::to_value(&error).unwrap(),
            serde_json::json!({"text": "boom", "allow_retry": true})
        );
    }

    #[test]
    fn test_default_settings() {
        let s = Settings::default();
        assert_eq!(s.context_clear_window_secs, 3600);
        assert!(s.allow_user_context_clear);
    }
}
