use hashbrown::{HashMap, HashSet};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::record::WaveDef;

/// Node id of the synthetic stage root.
pub const ROOT_NODE_ID: &str = "stage_root";

/// What a graph node stands for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NodePayload {
    /// The stage itself; every chain starts here.
    Root,
    /// One wave.
    Wave(WaveDef),
}

/// A node of the wave graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaveNode {
    /// Stable node id, unique within the graph.
    pub id: String,
    /// Position along the chain; 0 for the root, 1-based for waves.
    pub ordinal: usize,
    /// Summary shown on the node.
    pub enemy_count: usize,
    /// Root marker or the wave itself.
    pub payload: NodePayload,
}

impl WaveNode {
    /// The stage root node.
    pub fn root() -> Self {
        Self {
            id: ROOT_NODE_ID.to_string(),
            ordinal: 0,
            enemy_count: 0,
            payload: NodePayload::Root,
        }
    }

    /// A wave node with the given id.
    pub fn wave(id: impl Into<String>, wave: WaveDef) -> Self {
        Self {
            id: id.into(),
            ordinal: 0,
            enemy_count: wave.enemy_count(),
            payload: NodePayload::Wave(wave),
        }
    }

    /// True for the stage root.
    pub fn is_root(&self) -> bool {
        matches!(self.payload, NodePayload::Root)
    }

    /// The wave carried by this node, if any.
    pub fn wave_def(&self) -> Option<&WaveDef> {
        match &self.payload {
            NodePayload::Wave(w) => Some(w),
            NodePayload::Root => None,
        }
    }
}

/// Directed predecessor → successor link.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WaveEdge {
    /// `edge_{source}_{target}`.
    pub id: String,
    /// Node that runs first.
    pub source: String,
    /// Node that runs directly after `source`.
    pub target: String,
}

impl WaveEdge {
    /// Edge from `source` to `target` with a derived id.
    pub fn between(source: impl Into<String>, target: impl Into<String>) -> Self {
        let source = source.into();
        let target = target.into();
        Self {
            id: format!("edge_{source}_{target}"),
            source,
            target,
        }
    }
}

/// Node/edge view of a stage's waves.
///
/// A valid graph is a single chain: one root, and edges forming exactly one
/// simple path from the root through every wave node.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct WaveGraph {
    /// Nodes, root first when produced by [`to_graph`].
    pub nodes: Vec<WaveNode>,
    /// Chain links, one per non-root node in a valid graph.
    pub edges: Vec<WaveEdge>,
}

impl WaveGraph {
    /// Looks up a node by id.
    pub fn node(&self, id: &str) -> Option<&WaveNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Node following `id` along the edges, if any.
    pub fn successor(&self, id: &str) -> Option<&WaveNode> {
        let edge = self.edges.iter().find(|e| e.source == id)?;
        self.node(&edge.target)
    }
}

/// Violations of the single-chain invariant.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StructuralError {
    /// More than one edge leaves `node`.
    #[error("node {node} has more than one successor")]
    Branching {
        /// Offending node.
        node: String,
    },
    /// More than one edge enters `node`.
    #[error("node {node} has more than one predecessor")]
    Merging {
        /// Offending node.
        node: String,
    },
    /// The edges contain a cycle.
    #[error("wave sequence contains a cycle through {node}")]
    Cycle {
        /// A node on the cycle.
        node: String,
    },
    /// Nodes not reachable from the root.
    #[error("waves not connected to the stage: {}", nodes.join(", "))]
    Disconnected {
        /// Unreachable node ids, in node order.
        nodes: Vec<String>,
    },
    /// No root node.
    #[error("graph has no stage root")]
    MissingRoot,
    /// A second root node.
    #[error("graph has a second stage root {node}")]
    ExtraRoot {
        /// The extra root.
        node: String,
    },
    /// Two nodes share an id.
    #[error("duplicate node id {node}")]
    DuplicateNode {
        /// Repeated id.
        node: String,
    },
    /// An edge or argument names a node that does not exist.
    #[error("unknown node {node}")]
    UnknownNode {
        /// Missing id.
        node: String,
    },
    /// The root cannot be removed or moved.
    #[error("the stage root cannot be removed or moved")]
    RootImmovable,
}

/// Builds the chain graph of an ordered wave list.
///
/// Node ids derive from wave ids where present (`wave_{id}`), otherwise from
/// list position (`wave_{n}`), and are made unique with a numeric suffix.
pub fn to_graph(waves: &[WaveDef]) -> WaveGraph {
    let mut used: HashSet<String> = HashSet::new();
    used.insert(ROOT_NODE_ID.to_string());

    let mut nodes = Vec::with_capacity(waves.len() + 1);
    nodes.push(WaveNode::root());
    for (idx, wave) in waves.iter().enumerate() {
        let id = unique_node_id(&mut used, wave, idx + 1);
        nodes.push(WaveNode::wave(id, wave.clone()));
    }
    chain(nodes)
}

/// Validates the chain invariant and returns the waves in chain order.
pub fn from_graph(graph: &WaveGraph) -> Result<Vec<WaveDef>, StructuralError> {
    let order = walk(graph)?;
    Ok(order
        .into_iter()
        .filter_map(|idx| graph.nodes[idx].wave_def().cloned())
        .collect())
}

/// Checks the chain invariant without converting.
pub fn validate(graph: &WaveGraph) -> Result<(), StructuralError> {
    walk(graph).map(|_| ())
}

/// Returns node indices in chain order, root first.
pub(crate) fn walk(graph: &WaveGraph) -> Result<Vec<usize>, StructuralError> {
    let mut index: HashMap<&str, usize> = HashMap::with_capacity(graph.nodes.len());
    let mut root = None;
    for (idx, node) in graph.nodes.iter().enumerate() {
        if index.insert(node.id.as_str(), idx).is_some() {
            return Err(StructuralError::DuplicateNode {
                node: node.id.clone(),
            });
        }
        if node.is_root() {
            if root.is_some() {
                return Err(StructuralError::ExtraRoot {
                    node: node.id.clone(),
                });
            }
            root = Some(idx);
        }
    }
    let root = root.ok_or(StructuralError::MissingRoot)?;

    let mut next: Vec<Option<usize>> = vec![None; graph.nodes.len()];
    let mut has_pred = vec![false; graph.nodes.len()];
    for edge in &graph.edges {
        let src = *index
            .get(edge.source.as_str())
            .ok_or_else(|| StructuralError::UnknownNode {
                node: edge.source.clone(),
            })?;
        let dst = *index
            .get(edge.target.as_str())
            .ok_or_else(|| StructuralError::UnknownNode {
                node: edge.target.clone(),
            })?;
        if next[src].is_some() {
            return Err(StructuralError::Branching {
                node: edge.source.clone(),
            });
        }
        if has_pred[dst] {
            return Err(StructuralError::Merging {
                node: edge.target.clone(),
            });
        }
        next[src] = Some(dst);
        has_pred[dst] = true;
    }

    let mut visited = vec![false; graph.nodes.len()];
    let mut order = Vec::with_capacity(graph.nodes.len());
    let mut cursor = Some(root);
    while let Some(idx) = cursor {
        if visited[idx] {
            return Err(StructuralError::Cycle {
                node: graph.nodes[idx].id.clone(),
            });
        }
        visited[idx] = true;
        order.push(idx);
        cursor = next[idx];
    }

    if order.len() == graph.nodes.len() {
        return Ok(order);
    }

    // With in/out degree at most one, an unreachable component is either a
    // dangling path or a ring. Report rings as cycles.
    for start in 0..graph.nodes.len() {
        if visited[start] {
            continue;
        }
        let mut seen = HashSet::new();
        let mut cursor = Some(start);
        while let Some(idx) = cursor {
            if visited[idx] {
                break;
            }
            if !seen.insert(idx) {
                return Err(StructuralError::Cycle {
                    node: graph.nodes[idx].id.clone(),
                });
            }
            cursor = next[idx];
        }
    }

    Err(StructuralError::Disconnected {
        nodes: graph
            .nodes
            .iter()
            .zip(&visited)
            .filter(|(_, v)| !**v)
            .map(|(n, _)| n.id.clone())
            .collect(),
    })
}

/// Assigns ordinals and links `nodes` root→…→last in the given order.
pub(crate) fn chain(mut nodes: Vec<WaveNode>) -> WaveGraph {
    for (ordinal, node) in nodes.iter_mut().enumerate() {
        node.ordinal = ordinal;
    }
    let edges = nodes
        .windows(2)
        .map(|pair| WaveEdge::between(pair[0].id.clone(), pair[1].id.clone()))
        .collect();
    WaveGraph { nodes, edges }
}

pub(crate) fn unique_node_id(used: &mut HashSet<String>, wave: &WaveDef, position: usize) -> String {
    let base = match wave.id.as_deref().filter(|id| !id.is_empty()) {
        Some(id) => format!("wave_{id}"),
        None => format!("wave_{position}"),
    };
    let mut candidate = base.clone();
    let mut suffix = 2;
    while used.contains(&candidate) {
        candidate = format!("{base}_{suffix}");
        suffix += 1;
    }
    used.insert(candidate.clone());
    candidate
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wave(id: &str) -> WaveDef {
        WaveDef {
            id: Some(id.to_string()),
            ..WaveDef::default()
        }
    }

    #[test]
    fn duplicate_wave_ids_get_unique_nodes() {
        let g = to_graph(&[wave("a"), wave("a"), WaveDef::default()]);
        let ids: Vec<_> = g.nodes.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec![ROOT_NODE_ID, "wave_a", "wave_a_2", "wave_3"]);
        assert_eq!(from_graph(&g).expect("valid").len(), 3);
    }

    #[test]
    fn empty_list_is_root_only() {
        let g = to_graph(&[]);
        assert_eq!(g.nodes.len(), 1);
        assert!(g.edges.is_empty());
        assert_eq!(from_graph(&g), Ok(vec![]));
    }

    #[test]
    fn detached_ring_reports_cycle() {
        let mut g = to_graph(&[wave("a"), wave("b"), wave("c")]);
        g.edges = vec![
            WaveEdge::between(ROOT_NODE_ID, "wave_a"),
            WaveEdge::between("wave_b", "wave_c"),
            WaveEdge::between("wave_c", "wave_b"),
        ];
        assert!(matches!(from_graph(&g), Err(StructuralError::Cycle { .. })));
    }
}
