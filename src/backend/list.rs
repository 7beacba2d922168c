//! Sequential index: every node answers every query.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::{synthesize, IndexBackend, IndexStructType, QueryParams};
use crate::models::{Node, Response, ScoredNode};

/// Nodes in insertion order. Queries return all nodes that pass the keyword
/// filters, cut to `similarity_top_k` only when one is given.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ListIndex {
    nodes: Vec<Node>,
}

impl IndexBackend for ListIndex {
    fn kind(&self) -> IndexStructType {
        IndexStructType::List
    }

    fn insert(&mut self, nodes: Vec<Node>) {
        self.nodes.extend(nodes);
    }

    fn query(&self, _text: &str, params: &QueryParams) -> anyhow::Result<Response> {
        let mut selected: Vec<ScoredNode> = self
            .nodes
            .iter()
            .filter(|node| params.admits(&node.text))
            .map(|node| ScoredNode {
                node: node.clone(),
                score: 1.0,
            })
            .collect();
        if let Some(k) = params.similarity_top_k {
            selected.truncate(k);
        }
        Ok(synthesize(selected))
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
