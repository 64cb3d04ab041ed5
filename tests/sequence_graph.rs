use proptest::prelude::*;
use serde_json::json;

use defsync::{
    record::{DefinitionRecord, EnemySpawnEntry, WaveDef},
    sequence::{
        edit::{insert_after, reconnect, remove, waves_patch},
        graph::{ROOT_NODE_ID, StructuralError, WaveEdge, WaveNode, from_graph, to_graph, validate},
    },
};

fn wave(id: &str) -> WaveDef {
    WaveDef {
        id: Some(id.to_string()),
        ..WaveDef::default()
    }
}

fn ids(waves: &[WaveDef]) -> Vec<String> {
    waves.iter().map(|w| w.id.clone().unwrap_or_default()).collect()
}

fn wave_strategy() -> impl Strategy<Value = WaveDef> {
    (
        prop::option::of("[a-c]{1,2}"),
        prop::option::of(1i64..20),
        prop::collection::vec((0i64..6, 1i64..4), 0..3),
        prop::option::of(prop_oneof![Just("time".to_string()), Just("all_dead".to_string())]),
    )
        .prop_map(|(id, wave_number, enemies, trigger_condition)| WaveDef {
            id,
            wave_number,
            enemies: enemies
                .into_iter()
                .map(|(character, count)| EnemySpawnEntry {
                    character_id: Some(format!("enemy_{character}")),
                    count: Some(count),
                    ..EnemySpawnEntry::default()
                })
                .collect(),
            trigger_condition,
            ..WaveDef::default()
        })
}

#[test]
fn three_wave_chain_and_removal() {
    let graph = to_graph(&[wave("A"), wave("B"), wave("C")]);

    let node_ids: Vec<_> = graph.nodes.iter().map(|n| n.id.as_str()).collect();
    assert_eq!(node_ids, vec![ROOT_NODE_ID, "wave_A", "wave_B", "wave_C"]);
    let edges: Vec<_> = graph
        .edges
        .iter()
        .map(|e| (e.source.as_str(), e.target.as_str()))
        .collect();
    assert_eq!(
        edges,
        vec![
            (ROOT_NODE_ID, "wave_A"),
            ("wave_A", "wave_B"),
            ("wave_B", "wave_C"),
        ]
    );

    let trimmed = remove(&graph, "wave_B").expect("remove");
    assert_eq!(ids(&from_graph(&trimmed).expect("valid")), vec!["A", "C"]);
    assert_eq!(trimmed.successor("wave_A").map(|n| n.id.as_str()), Some("wave_C"));
    // the input graph is untouched
    assert_eq!(graph.nodes.len(), 4);
}

#[test]
fn branching_is_rejected() {
    let mut graph = to_graph(&[wave("A"), wave("B"), wave("C")]);
    graph.edges.push(WaveEdge::between("wave_A", "wave_C"));
    assert_eq!(
        from_graph(&graph),
        Err(StructuralError::Branching {
            node: "wave_A".to_string()
        })
    );
}

#[test]
fn merging_is_rejected() {
    let mut graph = to_graph(&[wave("A"), wave("B"), wave("C")]);
    graph.edges.push(WaveEdge::between(ROOT_NODE_ID, "wave_C"));
    assert!(matches!(from_graph(&graph), Err(StructuralError::Branching { .. })));

    let mut graph = to_graph(&[wave("A"), wave("B"), wave("C")]);
    graph.edges.retain(|e| e.source != "wave_B");
    graph.edges.push(WaveEdge::between("wave_B", "wave_A"));
    assert!(matches!(from_graph(&graph), Err(StructuralError::Merging { .. })));
}

#[test]
fn cycle_is_rejected() {
    let mut graph = to_graph(&[wave("A"), wave("B")]);
    graph.edges.push(WaveEdge::between("wave_B", ROOT_NODE_ID));
    assert!(matches!(from_graph(&graph), Err(StructuralError::Merging { .. }) | Err(StructuralError::Cycle { .. })));

    let mut graph = to_graph(&[wave("A")]);
    graph.edges.push(WaveEdge::between("wave_A", "wave_A"));
    assert!(matches!(from_graph(&graph), Err(StructuralError::Merging { .. }) | Err(StructuralError::Cycle { .. })));
}

#[test]
fn disconnected_node_is_rejected_not_dropped() {
    let mut graph = to_graph(&[wave("A"), wave("B")]);
    graph.nodes.push(WaveNode::wave("wave_orphan", wave("orphan")));
    assert_eq!(
        from_graph(&graph),
        Err(StructuralError::Disconnected {
            nodes: vec!["wave_orphan".to_string()]
        })
    );
}

#[test]
fn malformed_node_sets_are_rejected() {
    let mut graph = to_graph(&[wave("A")]);
    graph.nodes.retain(|n| !n.is_root());
    graph.edges.clear();
    assert_eq!(from_graph(&graph), Err(StructuralError::MissingRoot));

    let mut graph = to_graph(&[wave("A")]);
    graph.edges.push(WaveEdge::between("wave_A", "wave_missing"));
    assert_eq!(
        validate(&graph),
        Err(StructuralError::UnknownNode {
            node: "wave_missing".to_string()
        })
    );

    let mut graph = to_graph(&[wave("A")]);
    graph.nodes.push(WaveNode::wave("wave_A", wave("A")));
    assert!(matches!(validate(&graph), Err(StructuralError::DuplicateNode { .. })));
}

#[test]
fn insert_after_keeps_existing_ids() {
    let graph = to_graph(&[wave("A"), wave("C")]);
    let grown = insert_after(&graph, "wave_A", wave("B")).expect("insert");
    assert_eq!(ids(&from_graph(&grown).expect("valid")), vec!["A", "B", "C"]);
    assert_eq!(grown.node("wave_C").map(|n| n.ordinal), Some(3));

    let front = insert_after(&graph, ROOT_NODE_ID, WaveDef::default()).expect("insert at root");
    assert_eq!(front.nodes[1].id, "wave_3");
    assert_eq!(from_graph(&front).expect("valid").len(), 3);

    assert!(matches!(
        insert_after(&graph, "nope", wave("X")),
        Err(StructuralError::UnknownNode { .. })
    ));
}

#[test]
fn reconnect_moves_target_after_source() {
    let graph = to_graph(&[wave("A"), wave("B"), wave("C"), wave("D")]);

    let moved = reconnect(&graph, &WaveEdge::between("wave_A", "wave_D")).expect("reconnect");
    assert_eq!(ids(&from_graph(&moved).expect("valid")), vec!["A", "D", "B", "C"]);

    let moved = reconnect(&graph, &WaveEdge::between("wave_D", "wave_A")).expect("reconnect");
    assert_eq!(ids(&from_graph(&moved).expect("valid")), vec!["B", "C", "D", "A"]);

    let same = reconnect(&graph, &WaveEdge::between("wave_B", "wave_C")).expect("noop");
    assert_eq!(same, graph);

    assert_eq!(
        reconnect(&graph, &WaveEdge::between("wave_B", ROOT_NODE_ID)),
        Err(StructuralError::RootImmovable)
    );
    assert!(matches!(
        reconnect(&graph, &WaveEdge::between("wave_B", "wave_B")),
        Err(StructuralError::Cycle { .. })
    ));
}

#[test]
fn root_cannot_be_removed() {
    let graph = to_graph(&[wave("A")]);
    assert_eq!(remove(&graph, ROOT_NODE_ID), Err(StructuralError::RootImmovable));
}

#[test]
fn mutators_refuse_invalid_input() {
    let mut graph = to_graph(&[wave("A"), wave("B")]);
    graph.edges.push(WaveEdge::between("wave_A", "wave_A"));
    assert!(remove(&graph, "wave_B").is_err());
    assert!(insert_after(&graph, "wave_A", wave("C")).is_err());
}

#[test]
fn waves_patch_renumbers_for_save() {
    let graph = to_graph(&[wave("A"), wave("B"), wave("C")]);
    let swapped = reconnect(&graph, &WaveEdge::between(ROOT_NODE_ID, "wave_C")).expect("reconnect");

    let patch = waves_patch(&swapped).expect("patch");
    let mut stage = DefinitionRecord::from_value(json!({"id": "stage_1", "name": "Stage 1"})).expect("object");
    patch.apply_to(&mut stage).expect("apply");

    let waves = stage.waves().expect("waves");
    assert_eq!(ids(waves.as_slice()), vec!["C", "A", "B"]);
    let numbers: Vec<_> = waves.as_slice().iter().map(|w| w.wave_number).collect();
    assert_eq!(numbers, vec![Some(1), Some(2), Some(3)]);
}

proptest! {
    #[test]
    fn list_graph_round_trip(waves in prop::collection::vec(wave_strategy(), 0..24)) {
        let graph = to_graph(&waves);
        prop_assert_eq!(graph.nodes.len(), waves.len() + 1);
        prop_assert_eq!(graph.edges.len(), waves.len());
        prop_assert_eq!(from_graph(&graph), Ok(waves));
    }

    #[test]
    fn extra_edge_never_silently_drops_nodes(
        waves in prop::collection::vec(wave_strategy(), 2..12),
        from in 0usize..12,
        to in 0usize..12,
    ) {
        let mut graph = to_graph(&waves);
        let from = graph.nodes[from % graph.nodes.len()].id.clone();
        let to = graph.nodes[to % graph.nodes.len()].id.clone();
        graph.edges.push(WaveEdge::between(from, to));
        prop_assert!(from_graph(&graph).is_err());
    }

    #[test]
    fn removal_preserves_relative_order(
        waves in prop::collection::vec(wave_strategy(), 1..16),
        pick in 0usize..16,
    ) {
        let graph = to_graph(&waves);
        let idx = pick % waves.len();
        let node = graph.nodes[idx + 1].id.clone();

        let trimmed = remove(&graph, &node).expect("remove");
        let mut expected = waves.clone();
        expected.remove(idx);
        prop_assert_eq!(from_graph(&trimmed), Ok(expected));
    }
}
