//! Keyword table index.
//!
//! Maintains a table from keyword to the ids of the nodes containing it.
//! A query's keywords are looked up in the table and nodes are ranked by
//! how many distinct query keywords they contain.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use super::{
    synthesize, tokenize, IndexBackend, IndexStructType, NodeSnapshot, QueryParams,
    DEFAULT_SIMILARITY_TOP_K,
};
use crate::models::{Node, Response, ScoredNode};

/// Persists as `{"nodes": [...]}`; the keyword table is rebuilt on load.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(from = "NodeSnapshot")]
pub struct KeywordTableIndex {
    nodes: Vec<Node>,
    #[serde(skip)]
    table: BTreeMap<String, BTreeSet<String>>,
}

impl From<NodeSnapshot> for KeywordTableIndex {
    fn from(snapshot: NodeSnapshot) -> Self {
        let mut index = Self::default();
        index.insert(snapshot.nodes);
        index
    }
}

impl IndexBackend for KeywordTableIndex {
    fn kind(&self) -> IndexStructType {
        IndexStructType::KeywordTable
    }

    fn insert(&mut self, nodes: Vec<Node>) {
        for node in nodes {
            for keyword in tokenize(&node.text) {
                self.table
                    .entry(keyword)
                    .or_default()
                    .insert(node.node_id.clone());
            }
            self.nodes.push(node);
        }
    }

    fn query(&self, text: &str, params: &QueryParams) -> anyhow::Result<Response> {
        let keywords: BTreeSet<String> = tokenize(text).into_iter().collect();
        if keywords.is_empty() {
            return Ok(synthesize(Vec::new()));
        }

        let mut hits: HashMap<&str, usize> = HashMap::new();
        for keyword in &keywords {
            if let Some(ids) = self.table.get(keyword) {
                for id in ids {
                    *hits.entry(id.as_str()).or_insert(0) += 1;
                }
            }
        }

        // Walking `nodes` keeps insertion order for equal hit counts.
        let mut ranked: Vec<(usize, &Node)> = self
            .nodes
            .iter()
            .filter_map(|node| hits.get(node.node_id.as_str()).map(|h| (*h, node)))
            .filter(|(_, node)| params.admits(&node.text))
            .collect();
        ranked.sort_by(|a, b| b.0.cmp(&a.0));
        ranked.truncate(params.top_k_or(DEFAULT_SIMILARITY_TOP_K));

        let total = keywords.len() as f64;
        Ok(synthesize(
            ranked
                .into_iter()
                .map(|(h, node)| ScoredNode {
                    node: node.clone(),
                    score: h as f64 / total,
                })
                .collect(),
        ))
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
