//! Integration tests for graph snapshots and structural queries.
//!
//! These tests load `GraphView` snapshots from a real store and verify:
//! - Transitive traversal and build ordering
//! - Cycle detection and its interaction with ordering
//! - Snapshot filters and ceilings

use keystone::{
    EntityFilter, EntityId, Error, GraphView, NewEntity, NewRelation, PathLimits, RelationType,
    SnapshotLimits, SnapshotOptions, Store,
};

fn store_with(names: &[&str], edges: &[(&str, &str)]) -> Store {
    let store = Store::open_in_memory().expect("store should open");
    for name in names {
        store
            .create_entity(&NewEntity::new("task", *name))
            .expect("entity should be created");
    }
    for (source, target) in edges {
        store
            .create_relation(&NewRelation::new(
                id(source),
                id(target),
                RelationType::Requires,
            ))
            .expect("relation should be created");
    }
    store
}

fn id(name: &str) -> EntityId {
    keystone::id::entity_id("task", name, None)
}

fn position(order: &[EntityId], name: &str) -> usize {
    order
        .iter()
        .position(|e| *e == id(name))
        .expect("entity should be in order")
}

/// Dependency graph:
/// ```text
///      A
///     / \
///    v   v
///    B   D
///    |
///    v
///    C
/// ```
fn tree_view() -> GraphView {
    let store = store_with(&["A", "B", "C", "D"], &[("A", "B"), ("B", "C"), ("A", "D")]);
    GraphView::load(&store, &SnapshotOptions::default()).expect("snapshot should load")
}

#[test]
fn tree_transitive_dependents() {
    let view = tree_view();

    let reached = view
        .transitive_dependents(&id("A"), None)
        .expect("A exists");

    let mut ids: Vec<_> = reached.iter().map(|r| r.id.clone()).collect();
    ids.sort();
    let mut expected = vec![id("B"), id("C"), id("D")];
    expected.sort();
    assert_eq!(ids, expected);

    let c = reached.iter().find(|r| r.id == id("C")).expect("C reached");
    assert_eq!(c.depth, 2);
    assert!(reached.windows(2).all(|w| w[0].depth <= w[1].depth));
}

#[test]
fn tree_topological_order() {
    let view = tree_view();

    let order = view.topological_sort().expect("tree is acyclic");

    assert_eq!(order.len(), 4);
    assert!(position(&order, "A") < position(&order, "B"));
    assert!(position(&order, "A") < position(&order, "D"));
    assert!(position(&order, "B") < position(&order, "C"));
    assert!(view.find_circular_dependencies().is_empty());
}

#[test]
fn tree_reachability_and_paths() {
    let view = tree_view();

    assert!(view.is_reachable(&id("A"), &id("C")).expect("ids exist"));
    assert!(!view.is_reachable(&id("C"), &id("A")).expect("ids exist"));
    assert!(!view.is_reachable(&id("D"), &id("C")).expect("ids exist"));

    let path = view
        .find_path(&id("A"), &id("C"))
        .expect("ids exist")
        .expect("A reaches C");
    assert_eq!(path, vec![id("A"), id("B"), id("C")]);

    let all = view
        .find_all_paths(&id("A"), &id("C"), &PathLimits::default())
        .expect("ids exist");
    assert_eq!(all, vec![path]);

    let upstream = view
        .transitive_dependencies(&id("C"), None)
        .expect("C exists");
    assert_eq!(upstream.len(), 2);
}

#[test]
fn mutual_dependency_is_one_cycle() {
    let store = store_with(&["X", "Y"], &[("X", "Y"), ("Y", "X")]);
    let view = GraphView::load(&store, &SnapshotOptions::default()).expect("snapshot should load");

    let mut pair = vec![id("X"), id("Y")];
    pair.sort();

    assert_eq!(view.find_circular_dependencies(), vec![pair.clone()]);

    let err = view.topological_sort().unwrap_err();
    match err {
        Error::CycleDetected { cycle } => assert_eq!(cycle, pair),
        other => panic!("expected CycleDetected, got {other:?}"),
    }
}

#[test]
fn snapshot_filter_drops_edges_to_excluded_entities() {
    let store = store_with(&["A", "B"], &[("A", "B")]);
    store
        .create_entity(&NewEntity::new("npm", "lib"))
        .expect("entity should be created");
    store
        .create_relation(&NewRelation::new(
            keystone::id::entity_id("npm", "lib", None),
            id("A"),
            RelationType::Requires,
        ))
        .expect("relation should be created");

    let options = SnapshotOptions::default().with_filter(EntityFilter::default().domain("task"));
    let view = GraphView::load(&store, &options).expect("snapshot should load");

    assert_eq!(view.node_count(), 2);
    assert_eq!(view.edge_count(), 1);
    assert_eq!(view.in_degree(&id("A")).expect("A exists"), 0);
}

#[test]
fn snapshot_relation_type_restriction() {
    let store = store_with(&["A", "B", "C"], &[("A", "B")]);
    store
        .create_relation(&NewRelation::new(id("B"), id("C"), RelationType::Precedes))
        .expect("relation should be created");

    let options = SnapshotOptions::default().with_relation_type(RelationType::Precedes);
    let view = GraphView::load(&store, &options).expect("snapshot should load");

    assert_eq!(view.edge_count(), 1);
    assert_eq!(view.direct_dependents(&id("B")).expect("B exists"), vec![id("C")]);
}

#[test]
fn snapshot_ceilings_are_enforced() {
    let store = store_with(&["A", "B", "C"], &[("A", "B"), ("B", "C")]);

    let too_few_nodes = SnapshotOptions::default().with_limits(SnapshotLimits {
        max_nodes: Some(2),
        max_edges: None,
    });
    assert!(matches!(
        GraphView::load(&store, &too_few_nodes),
        Err(Error::LimitExceeded(_))
    ));

    let too_few_edges = SnapshotOptions::default().with_limits(SnapshotLimits {
        max_nodes: None,
        max_edges: Some(1),
    });
    assert!(matches!(
        GraphView::load(&store, &too_few_edges),
        Err(Error::LimitExceeded(_))
    ));

    let exact = SnapshotOptions::default().with_limits(SnapshotLimits {
        max_nodes: Some(3),
        max_edges: Some(2),
    });
    assert!(GraphView::load(&store, &exact).is_ok());
}

#[test]
fn views_are_independent_of_later_writes() {
    let store = store_with(&["A", "B"], &[]);
    let before = GraphView::load(&store, &SnapshotOptions::default()).expect("snapshot should load");

    store
        .create_relation(&NewRelation::new(id("A"), id("B"), RelationType::Requires))
        .expect("relation should be created");
    let after = GraphView::load(&store, &SnapshotOptions::default()).expect("snapshot should load");

    assert_eq!(before.edge_count(), 0);
    assert_eq!(after.edge_count(), 1);
    assert!(before.entity(&id("A")).expect("A in view").dependents.is_empty());
}
