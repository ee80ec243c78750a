//! Versioned JSON envelope for persisting the index.
//!
//! Envelope version 2. Deserialization rejects any other version; future
//! fields must be additive or bump the integer.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::hnsw::{HnswConfig, HnswIndex, HnswNode, Metric};
use crate::error::{Error, Result};

/// Current envelope version.
pub const ENVELOPE_VERSION: u32 = 2;

#[derive(Debug, Serialize, Deserialize)]
struct ConfigEnvelope {
    m: usize,
    ef_construction: usize,
    ef_search: usize,
    metric: Metric,
    #[serde(default)]
    quantized: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    rerank_candidates: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
struct NodeEnvelope {
    id: String,
    level: usize,
    /// Adjacency per layer, sets flattened to vectors for stable JSON
    neighbors: Vec<Vec<String>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct VectorEnvelope {
    id: String,
    values: Vec<f32>,
}

#[derive(Debug, Serialize, Deserialize)]
struct IndexEnvelope {
    version: u32,
    dimension: usize,
    config: ConfigEnvelope,
    entry_point_id: Option<String>,
    max_level: usize,
    nodes: Vec<NodeEnvelope>,
    vectors: Vec<VectorEnvelope>,
}

/// Serialize an index to its JSON envelope.
pub fn to_json(index: &HnswIndex) -> Result<String> {
    let (config, nodes, vectors, entry_point, max_level) = index.parts();

    let mut node_envelopes: Vec<NodeEnvelope> = nodes
        .values()
        .map(|node| {
            let mut neighbors: Vec<Vec<String>> = node
                .neighbors
                .iter()
                .map(|set| {
                    let mut layer: Vec<String> = set.iter().cloned().collect();
                    layer.sort();
                    layer
                })
                .collect();
            if neighbors.is_empty() {
                neighbors.push(Vec::new());
            }
            NodeEnvelope {
                id: node.id.clone(),
                level: node.level,
                neighbors,
            }
        })
        .collect();
    node_envelopes.sort_by(|a, b| a.id.cmp(&b.id));

    let mut vector_envelopes: Vec<VectorEnvelope> = vectors
        .iter()
        .map(|(id, values)| VectorEnvelope {
            id: id.clone(),
            values: values.clone(),
        })
        .collect();
    vector_envelopes.sort_by(|a, b| a.id.cmp(&b.id));

    let envelope = IndexEnvelope {
        version: ENVELOPE_VERSION,
        dimension: config.dimension,
        config: ConfigEnvelope {
            m: config.m,
            ef_construction: config.ef_construction,
            ef_search: config.ef_search,
            metric: config.metric,
            quantized: config.quantized,
            rerank_candidates: config.rerank_candidates,
        },
        entry_point_id: entry_point.map(str::to_string),
        max_level,
        nodes: node_envelopes,
        vectors: vector_envelopes,
    };
    Ok(serde_json::to_string(&envelope)?)
}

/// Rebuild an index from its JSON envelope.
pub fn from_json(json: &str) -> Result<HnswIndex> {
    let envelope: IndexEnvelope = serde_json::from_str(json)?;
    if envelope.version != ENVELOPE_VERSION {
        return Err(Error::Validation(format!(
            "unsupported index envelope version {} (expected {ENVELOPE_VERSION})",
            envelope.version
        )));
    }

    let config = HnswConfig {
        dimension: envelope.dimension,
        m: envelope.config.m,
        ef_construction: envelope.config.ef_construction,
        ef_search: envelope.config.ef_search,
        metric: envelope.config.metric,
        quantized: envelope.config.quantized,
        rerank_candidates: envelope.config.rerank_candidates,
        seed: None,
    };

    let nodes: HashMap<String, HnswNode> = envelope
        .nodes
        .into_iter()
        .map(|n| {
            let node = HnswNode {
                id: n.id.clone(),
                level: n.level,
                neighbors: n.neighbors.into_iter().map(|l| l.into_iter().collect()).collect(),
            };
            (n.id, node)
        })
        .collect();
    let vectors: HashMap<String, Vec<f32>> = envelope
        .vectors
        .into_iter()
        .map(|v| (v.id, v.values))
        .collect();

    Ok(HnswIndex::from_parts(
        config,
        nodes,
        vectors,
        envelope.entry_point_id,
        envelope.max_level,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::normalize;
    use rand::rngs::StdRng;
    use rand::{RngExt, SeedableRng};

    const DIM: usize = 8;

    fn sample_index(count: usize) -> (HnswIndex, Vec<Vec<f32>>) {
        let config = HnswConfig {
            seed: Some(9),
            ..HnswConfig::new(DIM)
        };
        let mut index = HnswIndex::new(config);
        let mut rng = StdRng::seed_from_u64(21);
        let vectors: Vec<Vec<f32>> = (0..count)
            .map(|_| {
                let mut v: Vec<f32> = (0..DIM).map(|_| rng.random_range(-1.0..1.0)).collect();
                normalize(&mut v);
                v
            })
            .collect();
        for (i, v) in vectors.iter().enumerate() {
            index.add(&format!("v{i}"), v.clone()).unwrap();
        }
        (index, vectors)
    }

    #[test]
    fn round_trip_preserves_search_results() {
        let (index, vectors) = sample_index(60);
        let json = to_json(&index).unwrap();
        let restored = from_json(&json).unwrap();

        assert_eq!(restored.len(), index.len());
        assert_eq!(restored.max_level(), index.max_level());
        assert_eq!(restored.entry_point(), index.entry_point());

        for query in vectors.iter().step_by(7) {
            let before = index.search(query, 5).unwrap();
            let after = restored.search(query, 5).unwrap();
            assert_eq!(before.len(), after.len());
            for (a, b) in before.iter().zip(after.iter()) {
                assert_eq!(a.id, b.id);
                assert!((a.distance - b.distance).abs() < 1e-7);
            }
        }
    }

    #[test]
    fn version_mismatch_is_rejected() {
        let (index, _) = sample_index(5);
        let json = to_json(&index).unwrap();
        let tampered = json.replacen("\"version\":2", "\"version\":1", 1);
        let err = from_json(&tampered).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn corrupt_json_is_a_serialization_error() {
        assert!(matches!(
            from_json("{not json"),
            Err(Error::Serialization(_))
        ));
    }
}
