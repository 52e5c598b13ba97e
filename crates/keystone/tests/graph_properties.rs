//! Property tests for graph algorithms and risk scoring over random graphs.

use std::collections::BTreeSet;

use chrono::Utc;
use keystone::{
    Entity, EntityId, EntityMetadata, GraphView, ImpactAnalyzer, Provenance, Relation,
    RelationMetadata, RelationType, Resolution, RiskConfig,
};
use proptest::prelude::*;

const MAX_NODES: usize = 12;

fn entity(index: usize) -> Entity {
    let now = Utc::now();
    let name = format!("n{index}");
    Entity {
        id: keystone::id::entity_id("prop", &name, None),
        domain: "prop".to_string(),
        identifier: name,
        version: None,
        metadata: EntityMetadata::default(),
        dependencies: Vec::new(),
        dependents: Vec::new(),
        resolution: Resolution::default(),
        provenance: Provenance::default(),
        created_at: now,
        updated_at: now,
    }
}

fn relation(source: &Entity, target: &Entity) -> Relation {
    let now = Utc::now();
    Relation {
        id: keystone::id::relation_id(&source.id, &target.id, RelationType::Requires),
        source: source.id.clone(),
        target: target.id.clone(),
        relation_type: RelationType::Requires,
        constraints: Vec::new(),
        metadata: RelationMetadata::default(),
        provenance: Provenance::default(),
        created_at: now,
        updated_at: now,
    }
}

fn view(nodes: usize, edges: &BTreeSet<(usize, usize)>) -> GraphView {
    let entities: Vec<Entity> = (0..nodes).map(entity).collect();
    let relations: Vec<Relation> = edges
        .iter()
        .map(|&(s, t)| relation(&entities[s], &entities[t]))
        .collect();
    GraphView::from_parts(entities, relations).expect("generated graph should build")
}

/// Node count plus a set of distinct, non-self edges.
fn any_graph() -> impl Strategy<Value = (usize, BTreeSet<(usize, usize)>)> {
    (1..=MAX_NODES).prop_flat_map(|n| {
        let pairs = proptest::collection::vec((0..n, 0..n), 0..(n * 2));
        (
            Just(n),
            pairs.prop_map(|pairs| pairs.into_iter().filter(|(s, t)| s != t).collect()),
        )
    })
}

/// Like `any_graph`, but every edge goes from a lower to a higher index.
fn acyclic_graph() -> impl Strategy<Value = (usize, BTreeSet<(usize, usize)>)> {
    any_graph().prop_map(|(n, edges)| {
        let forward = edges
            .into_iter()
            .map(|(s, t)| (s.min(t), s.max(t)))
            .collect();
        (n, forward)
    })
}

proptest! {
    #[test]
    fn topological_order_respects_every_edge((n, edges) in acyclic_graph()) {
        let graph = view(n, &edges);

        let order = graph.topological_sort().expect("forward edges are acyclic");
        prop_assert_eq!(order.len(), n);

        let position = |id: &EntityId| order.iter().position(|e| e == id);
        for relation in graph.relations() {
            prop_assert!(position(&relation.source) < position(&relation.target));
        }
    }

    #[test]
    fn topological_sort_succeeds_iff_no_cycles((n, edges) in any_graph()) {
        let graph = view(n, &edges);

        let sorted = graph.topological_sort().is_ok();
        let cyclic = !graph.find_circular_dependencies().is_empty();

        prop_assert_eq!(sorted, !cyclic);
        prop_assert_eq!(sorted, graph.is_acyclic());
    }

    #[test]
    fn adding_an_edge_never_shrinks_blast_radius(
        (n, edges) in any_graph(),
        u in 0..MAX_NODES,
        v in 0..MAX_NODES,
    ) {
        let (u, v) = (u % n, v % n);
        prop_assume!(u != v);
        let before = view(n, &edges);
        let mut extended = edges.clone();
        extended.insert((u, v));
        let after = view(n, &extended);

        for x in 0..n {
            let id = entity(x).id;
            let reaches_u = x == u || before.is_reachable(&id, &entity(u).id).expect("ids exist");
            if !reaches_u {
                continue;
            }
            let old: BTreeSet<_> = before
                .transitive_dependents(&id, None)
                .expect("id exists")
                .into_iter()
                .map(|r| r.id)
                .collect();
            let new: BTreeSet<_> = after
                .transitive_dependents(&id, None)
                .expect("id exists")
                .into_iter()
                .map(|r| r.id)
                .collect();
            prop_assert!(old.is_subset(&new));
        }
    }

    #[test]
    fn risk_scores_stay_in_unit_interval((n, edges) in any_graph()) {
        let graph = view(n, &edges);
        let config = RiskConfig {
            blast_radius_normalizer: 2.0,
            hub_threshold: 1,
            ..RiskConfig::default()
        };
        let analyzer = ImpactAnalyzer::new(&graph, config);

        for x in 0..n {
            let id = entity(x).id;
            let impact = analyzer.analyze_change_impact(&id).expect("id exists");
            prop_assert!((0.0..=1.0).contains(&impact.risk_score));
            if impact.metrics.direct_dependents == 0 && impact.metrics.direct_dependencies == 0 {
                prop_assert!(impact.risk_score.abs() < f64::EPSILON);
                prop_assert!(impact.is_safe_to_change());
            }
        }
    }
}
