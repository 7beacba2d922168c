//! Paragraph-boundary document chunker.
//!
//! Turns a [`Document`] into the [`Node`]s that get inserted into the index.
//! Text is split on blank lines (`\n\n`), paragraphs are packed together up
//! to `max_tokens` (approximated as 4 chars per token), and paragraphs that
//! are too long on their own are cut at the last newline or space that fits.
//!
//! Whitespace-only documents produce no nodes.
//!
//! ```rust
//! use index_bot::chunk::chunk_document;
//! use index_bot::models::Document;
//!
//! let doc = Document::new("d1", "Hello world.\n\nSecond paragraph.");
//! let nodes = chunk_document(&doc, 700);
//! assert_eq!(nodes.len(), 1);
//! assert_eq!(nodes[0].doc_id, "d1");
//! ```

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::models::{Document, Node};

/// Rough chars-per-token ratio used to size chunks.
const CHARS_PER_TOKEN: usize = 4;

/// Chunk every document in order, concatenating the resulting nodes.
pub fn chunk_documents(docs: &[Document], max_tokens: usize) -> Vec<Node> {
    docs.iter()
        .flat_map(|doc| chunk_document(doc, max_tokens))
        .collect()
}

/// Split one document into nodes with contiguous indices starting at 0.
pub fn chunk_document(doc: &Document, max_tokens: usize) -> Vec<Node> {
    let max_chars = max_tokens.max(1) * CHARS_PER_TOKEN;
    let mut out = NodeSink::new(&doc.doc_id);
    let mut buf = String::new();

    for para in doc.text.split("\n\n").map(str::trim) {
        if para.is_empty() {
            continue;
        }

        let joined_len = if buf.is_empty() {
            para.len()
        } else {
            buf.len() + 2 + para.len()
        };
        if joined_len > max_chars && !buf.is_empty() {
            out.push(&buf);
            buf.clear();
        }

        if para.len() > max_chars {
            for piece in hard_split(para, max_chars) {
                out.push(piece);
            }
            continue;
        }

        if !buf.is_empty() {
            buf.push_str("\n\n");
        }
        buf.push_str(para);
    }

    if !buf.is_empty() {
        out.push(&buf);
    }
    out.nodes
}

/// Cut an oversized paragraph into pieces no longer than `max_chars` bytes,
/// preferring to break after a newline or space.
fn hard_split(text: &str, max_chars: usize) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut rest = text;

    while !rest.is_empty() {
        if rest.len() <= max_chars {
            pieces.push(rest.trim());
            break;
        }
        let limit = floor_char_boundary(rest, max_chars);
        let cut = rest[..limit]
            .rfind(['\n', ' '])
            .map(|pos| pos + 1)
            .unwrap_or(limit);
        // Always make progress, even when one char is wider than the limit.
        let cut = if cut == 0 {
            rest.chars().next().map(char::len_utf8).unwrap_or(rest.len())
        } else {
            cut
        };
        let (head, tail) = rest.split_at(cut);
        pieces.push(head.trim());
        rest = tail;
    }

    pieces.retain(|p| !p.is_empty());
    pieces
}

/// Largest char boundary `<= index`.
fn floor_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

struct NodeSink<'a> {
    doc_id: &'a str,
    nodes: Vec<Node>,
}

impl<'a> NodeSink<'a> {
    fn new(doc_id: &'a str) -> Self {
        Self {
            doc_id,
            nodes: Vec::new(),
        }
    }

    fn push(&mut self, text: &str) {
        let hash = format!("{:x}", Sha256::digest(text.as_bytes()));
        self.nodes.push(Node {
            node_id: Uuid::new_v4().to_string(),
            doc_id: self.doc_id.to_string(),
            index: self.nodes.len() as i64,
            text: text.to_string(),
            hash,
        });
    }
}
