//! Item-item relation graph used for embedding regularization.
use std::collections::HashMap;

use indexmap::IndexMap;
use serde_json::Value;

use crate::{ExternalItemId, ItemId};

/// A raw, directed relation record from the graph source.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RelationRecord {
    /// Relation type tag.
    #[serde(rename = "edgeType", default)]
    pub edge_type: Value,
    /// Source node reference, e.g. `"anime:1535"`.
    #[serde(default)]
    pub source: Value,
    /// Target node reference.
    #[serde(default)]
    pub target: Value,
    /// Relation weight; may be negative.
    #[serde(default)]
    pub weight: Value,
}

/// An undirected, weighted edge between two items, with `a < b`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    /// Smaller item index.
    pub a: ItemId,
    /// Larger item index.
    pub b: ItemId,
    /// Non-negative edge weight.
    pub weight: f32,
}

/// Which relation records become item-item edges.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EdgeFilter {
    edge_type: String,
    node_prefix: String,
    min_abs_weight: f64,
}

impl Default for EdgeFilter {
    fn default() -> Self {
        EdgeFilter {
            edge_type: "anime-anime".to_owned(),
            node_prefix: "anime".to_owned(),
            min_abs_weight: 0.0,
        }
    }
}

impl EdgeFilter {
    /// Set the relation type tag marking item-item relations.
    pub fn edge_type(mut self, edge_type: &str) -> Self {
        self.edge_type = edge_type.to_owned();
        self
    }

    /// Set the namespace of item node references (the part before `:`).
    pub fn node_prefix(mut self, node_prefix: &str) -> Self {
        self.node_prefix = node_prefix.to_owned();
        self
    }

    /// Drop relations whose absolute weight is below this threshold.
    pub fn min_abs_weight(mut self, min_abs_weight: f64) -> Self {
        self.min_abs_weight = min_abs_weight;
        self
    }
}

/// Extract the item id from a `"<prefix>:<id>"` node reference.
pub fn parse_node_id(node: &str, prefix: &str) -> Option<ExternalItemId> {
    node.strip_prefix(prefix)?
        .strip_prefix(':')?
        .trim()
        .parse()
        .ok()
}

/// Build the deduplicated, undirected edge list over item indices.
///
/// Relations of another type, self-relations, non-finite or too small
/// weights and references to items outside `item_index` are dropped.
/// Parallel relations on the same unordered pair are merged into one
/// edge carrying the mean of their absolute weights. Edges come out in
/// the order their pair was first seen.
pub fn build_item_edges(
    records: &[RelationRecord],
    item_index: &HashMap<ExternalItemId, ItemId>,
    filter: &EdgeFilter,
) -> Vec<Edge> {
    let mut pair_weights: IndexMap<(ItemId, ItemId), (f64, usize)> = IndexMap::new();

    for record in records {
        if record.edge_type.as_str() != Some(filter.edge_type.as_str()) {
            continue;
        }

        let source = record
            .source
            .as_str()
            .and_then(|node| parse_node_id(node, &filter.node_prefix));
        let target = record
            .target
            .as_str()
            .and_then(|node| parse_node_id(node, &filter.node_prefix));
        let (source, target) = match (source, target) {
            (Some(source), Some(target)) if source != target => (source, target),
            _ => continue,
        };

        let weight = match record.weight.as_f64() {
            Some(weight) if weight.is_finite() => weight.abs(),
            _ => continue,
        };
        if weight < filter.min_abs_weight {
            continue;
        }

        let (source_idx, target_idx) = match (item_index.get(&source), item_index.get(&target)) {
            (Some(&source_idx), Some(&target_idx)) => (source_idx, target_idx),
            _ => continue,
        };

        let key = if source_idx < target_idx {
            (source_idx, target_idx)
        } else {
            (target_idx, source_idx)
        };
        let entry = pair_weights.entry(key).or_insert((0.0, 0));
        entry.0 += weight;
        entry.1 += 1;
    }

    let edges: Vec<Edge> = pair_weights
        .into_iter()
        .map(|((a, b), (total, count))| Edge {
            a,
            b,
            weight: (total / count as f64) as f32,
        })
        .collect();

    debug!(edges = edges.len(), "built item graph");

    edges
}
