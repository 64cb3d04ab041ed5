use hashbrown::HashSet;

use crate::{
    patch::StagePatch,
    record::{StageWaves, WaveDef},
};

use super::graph::{StructuralError, WaveEdge, WaveGraph, WaveNode, chain, from_graph, unique_node_id, walk};

/// Inserts `wave` directly after node `after` (the root inserts at the front).
///
/// Existing node ids are kept.
pub fn insert_after(graph: &WaveGraph, after: &str, wave: WaveDef) -> Result<WaveGraph, StructuralError> {
    let mut nodes = ordered_nodes(graph)?;
    let pos = position(&nodes, after)?;

    let mut used: HashSet<String> = nodes.iter().map(|n| n.id.clone()).collect();
    let id = unique_node_id(&mut used, &wave, nodes.len());
    nodes.insert(pos + 1, WaveNode::wave(id, wave));
    Ok(chain(nodes))
}

/// Removes a wave node, linking its predecessor to its successor.
pub fn remove(graph: &WaveGraph, node: &str) -> Result<WaveGraph, StructuralError> {
    let mut nodes = ordered_nodes(graph)?;
    let pos = position(&nodes, node)?;
    if nodes[pos].is_root() {
        return Err(StructuralError::RootImmovable);
    }
    nodes.remove(pos);
    Ok(chain(nodes))
}

/// Applies a user-drawn connection `source → target`.
///
/// The target wave moves to directly follow the source; the rest of the
/// chain keeps its order. Connecting a node to itself, or into the root,
/// would break the chain and fails.
pub fn reconnect(graph: &WaveGraph, edge: &WaveEdge) -> Result<WaveGraph, StructuralError> {
    let mut nodes = ordered_nodes(graph)?;
    let src = position(&nodes, &edge.source)?;
    let dst = position(&nodes, &edge.target)?;
    if nodes[dst].is_root() {
        return Err(StructuralError::RootImmovable);
    }
    if src == dst {
        return Err(StructuralError::Cycle {
            node: edge.source.clone(),
        });
    }
    if dst == src + 1 {
        return Ok(chain(nodes));
    }

    let moved = nodes.remove(dst);
    let src = if dst < src { src - 1 } else { src };
    nodes.insert(src + 1, moved);
    Ok(chain(nodes))
}

/// Validated, renumbered stage patch replacing the record's waves.
pub fn waves_patch(graph: &WaveGraph) -> Result<StagePatch, StructuralError> {
    let waves = StageWaves(from_graph(graph)?).renumbered();
    Ok(StagePatch {
        waves: Some(waves),
        ..StagePatch::default()
    })
}

fn ordered_nodes(graph: &WaveGraph) -> Result<Vec<WaveNode>, StructuralError> {
    Ok(walk(graph)?
        .into_iter()
        .map(|idx| graph.nodes[idx].clone())
        .collect())
}

fn position(nodes: &[WaveNode], id: &str) -> Result<usize, StructuralError> {
    nodes
        .iter()
        .position(|n| n.id == id)
        .ok_or_else(|| StructuralError::UnknownNode { node: id.to_string() })
}
