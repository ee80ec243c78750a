//! Provenance graph: sources, derivation steps, and L-Scores.
//!
//! Episodes and patterns cite the sources and steps they derive from.
//! The graph is meant to be a DAG, but parent chains can accidentally
//! close a cycle; traversal keeps a visited set and breaks on revisit
//! with a warning rather than following the loop.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use tracing::warn;
use uuid::Uuid;

/// Depth penalty per derivation level.
const DEPTH_DECAY: f64 = 0.9;

/// What a provenance node represents.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum NodeKind {
    /// An external source with a relevance weight
    Source { relevance: f64 },
    /// A derivation step with a confidence
    Step { confidence: f64 },
}

/// One node in the provenance graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvenanceNode {
    pub id: Uuid,
    pub label: String,
    #[serde(flatten)]
    pub kind: NodeKind,
    /// Nodes this one derives from
    pub parents: Vec<Uuid>,
}

/// A provenance DAG with cycle-safe scoring.
#[derive(Debug, Default)]
pub struct ProvenanceGraph {
    nodes: HashMap<Uuid, ProvenanceNode>,
}

impl ProvenanceGraph {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Add a source node.
    pub fn add_source(&mut self, label: impl Into<String>, relevance: f64) -> Uuid {
        let id = Uuid::new_v4();
        self.nodes.insert(
            id,
            ProvenanceNode {
                id,
                label: label.into(),
                kind: NodeKind::Source {
                    relevance: relevance.clamp(0.0, 1.0),
                },
                parents: Vec::new(),
            },
        );
        id
    }

    /// Add a derivation step over existing parents.
    pub fn add_step(
        &mut self,
        label: impl Into<String>,
        confidence: f64,
        parents: Vec<Uuid>,
    ) -> Uuid {
        let id = Uuid::new_v4();
        self.nodes.insert(
            id,
            ProvenanceNode {
                id,
                label: label.into(),
                kind: NodeKind::Step {
                    confidence: confidence.clamp(0.0, 1.0),
                },
                parents,
            },
        );
        id
    }

    #[must_use]
    pub fn get(&self, id: &Uuid) -> Option<&ProvenanceNode> {
        self.nodes.get(id)
    }

    /// Force an edge; used to model the accidental cycles the walker
    /// must survive.
    pub fn add_parent(&mut self, child: &Uuid, parent: Uuid) {
        if let Some(node) = self.nodes.get_mut(child) {
            node.parents.push(parent);
        }
    }

    /// Composite credibility score for a node.
    ///
    /// Combines the geometric mean of step confidences along the
    /// ancestry, the mean relevance of reachable sources, and a decay
    /// per derivation level. Cycles terminate the walk at the revisited
    /// node.
    #[must_use]
    pub fn l_score(&self, id: &Uuid) -> Option<f64> {
        let start = self.nodes.get(id)?;

        let mut visited: HashSet<Uuid> = HashSet::new();
        let mut queue: VecDeque<(Uuid, usize)> = VecDeque::new();
        visited.insert(start.id);
        queue.push_back((start.id, 0));

        let mut confidence_product = 1.0f64;
        let mut step_count = 0usize;
        let mut relevance_sum = 0.0f64;
        let mut source_count = 0usize;
        let mut max_depth = 0usize;

        while let Some((node_id, depth)) = queue.pop_front() {
            let Some(node) = self.nodes.get(&node_id) else {
                continue;
            };
            max_depth = max_depth.max(depth);
            match node.kind {
                NodeKind::Source { relevance } => {
                    relevance_sum += relevance;
                    source_count += 1;
                }
                NodeKind::Step { confidence } => {
                    confidence_product *= confidence;
                    step_count += 1;
                }
            }
            for parent in &node.parents {
                if visited.insert(*parent) {
                    queue.push_back((*parent, depth + 1));
                } else {
                    warn!(node = %node_id, parent = %parent, "provenance cycle detected, breaking walk");
                }
            }
        }

        let step_factor = if step_count == 0 {
            1.0
        } else {
            confidence_product.powf(1.0 / step_count as f64)
        };
        let source_factor = if source_count == 0 {
            1.0
        } else {
            relevance_sum / source_count as f64
        };
        Some(step_factor * source_factor * DEPTH_DECAY.powi(max_depth as i32))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_score_is_its_relevance() {
        let mut graph = ProvenanceGraph::new();
        let source = graph.add_source("paper", 0.8);
        let score = graph.l_score(&source).unwrap();
        assert!((score - 0.8).abs() < 1e-9);
    }

    #[test]
    fn deeper_chains_score_lower() {
        let mut graph = ProvenanceGraph::new();
        let source = graph.add_source("paper", 1.0);
        let step1 = graph.add_step("summarize", 1.0, vec![source]);
        let step2 = graph.add_step("expand", 1.0, vec![step1]);
        let shallow = graph.l_score(&step1).unwrap();
        let deep = graph.l_score(&step2).unwrap();
        assert!(deep < shallow);
    }

    #[test]
    fn low_confidence_steps_drag_the_score() {
        let mut graph = ProvenanceGraph::new();
        let source = graph.add_source("paper", 1.0);
        let confident = graph.add_step("good", 0.9, vec![source]);
        let shaky = graph.add_step("bad", 0.3, vec![source]);
        assert!(graph.l_score(&shaky).unwrap() < graph.l_score(&confident).unwrap());
    }

    #[test]
    fn cycles_terminate_instead_of_looping() {
        let mut graph = ProvenanceGraph::new();
        let a = graph.add_step("a", 0.9, vec![]);
        let b = graph.add_step("b", 0.9, vec![a]);
        // Accidental back edge: a now derives from b.
        graph.add_parent(&a, b);
        let score = graph.l_score(&b).unwrap();
        assert!(score > 0.0 && score <= 1.0);
    }

    #[test]
    fn unknown_node_scores_none() {
        let graph = ProvenanceGraph::new();
        assert!(graph.l_score(&Uuid::new_v4()).is_none());
    }
}
