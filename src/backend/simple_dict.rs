//! Term-vector index kept entirely in memory.
//!
//! Each node gets a sparse term-frequency vector at insert time. A query is
//! tokenized the same way and nodes are ranked by cosine similarity; nodes
//! with no shared term are never returned. Ties keep insertion order.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use super::{
    synthesize, tokenize, IndexBackend, IndexStructType, NodeSnapshot, QueryParams,
    DEFAULT_SIMILARITY_TOP_K,
};
use crate::models::{Node, Response, ScoredNode};

type TermVector = HashMap<String, f32>;

/// Persists as `{"nodes": [...]}`; term vectors are recomputed on load.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(from = "NodeSnapshot")]
pub struct SimpleDictIndex {
    nodes: Vec<Node>,
    /// node id → term vector.
    #[serde(skip)]
    embedding_dict: HashMap<String, TermVector>,
}

impl From<NodeSnapshot> for SimpleDictIndex {
    fn from(snapshot: NodeSnapshot) -> Self {
        let mut index = Self::default();
        index.insert(snapshot.nodes);
        index
    }
}

fn term_vector(text: &str) -> TermVector {
    let mut tv = TermVector::new();
    for term in tokenize(text) {
        *tv.entry(term).or_insert(0.0) += 1.0;
    }
    tv
}

fn cosine_sim(a: &TermVector, b: &TermVector) -> f32 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let dot: f32 = a
        .iter()
        .filter_map(|(term, x)| b.get(term).map(|y| x * y))
        .sum();
    let mag_a: f32 = a.values().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.values().map(|x| x * x).sum::<f32>().sqrt();
    if mag_a < f32::EPSILON || mag_b < f32::EPSILON {
        0.0
    } else {
        dot / (mag_a * mag_b)
    }
}

impl IndexBackend for SimpleDictIndex {
    fn kind(&self) -> IndexStructType {
        IndexStructType::SimpleDict
    }

    fn insert(&mut self, nodes: Vec<Node>) {
        for node in nodes {
            self.embedding_dict
                .insert(node.node_id.clone(), term_vector(&node.text));
            self.nodes.push(node);
        }
    }

    fn query(&self, text: &str, params: &QueryParams) -> anyhow::Result<Response> {
        let query_vec = term_vector(text);
        let mut ranked: Vec<ScoredNode> = self
            .nodes
            .iter()
            .filter(|node| params.admits(&node.text))
            .filter_map(|node| {
                let tv = self.embedding_dict.get(&node.node_id)?;
                let score = cosine_sim(&query_vec, tv) as f64;
                (score > 0.0).then(|| ScoredNode {
                    node: node.clone(),
                    score,
                })
            })
            .collect();
        ranked.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        ranked.truncate(params.top_k_or(DEFAULT_SIMILARITY_TOP_K));
        Ok(synthesize(ranked))
    }

    fn node_count(&self) -> usize {
        self.nodes.len()
    }

    fn doc_ids(&self) -> BTreeSet<String> {
        self.nodes.iter().map(|n| n.doc_id.clone()).collect()
    }

    fn snapshot(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(self)
    }
}
