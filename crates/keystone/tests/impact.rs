//! Integration tests for change-impact analysis.
//!
//! These tests build graphs through the store and verify the analyzer's
//! metrics, risk scoring and recommendations end to end.

use keystone::{
    Config, EntityId, GraphView, ImpactAnalyzer, NewEntity, NewRelation, RelationType,
    RiskConfig, RiskWeights, Severity, SnapshotOptions, Store,
};

fn id(name: &str) -> EntityId {
    keystone::id::entity_id("svc", name, None)
}

fn build(names: &[String], edges: &[(String, String)]) -> Store {
    let store = Store::open_in_memory().expect("store should open");
    for name in names {
        store
            .create_entity(&NewEntity::new("svc", name.as_str()))
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

fn snapshot(store: &Store) -> GraphView {
    GraphView::load(store, &SnapshotOptions::default()).expect("snapshot should load")
}

/// `auth` with `count` direct dependents `client0..client{count-1}`.
fn hub_store(count: usize) -> Store {
    let mut names = vec!["auth".to_string()];
    let mut edges = Vec::new();
    for i in 0..count {
        let client = format!("client{i}");
        edges.push(("auth".to_string(), client.clone()));
        names.push(client);
    }
    build(&names, &edges)
}

#[test]
fn tree_blast_radius_is_minimal() {
    let names: Vec<String> = ["A", "B", "C", "D"].iter().map(ToString::to_string).collect();
    let edges = vec![
        ("A".to_string(), "B".to_string()),
        ("B".to_string(), "C".to_string()),
        ("A".to_string(), "D".to_string()),
    ];
    let store = build(&names, &edges);
    let view = snapshot(&store);
    let analyzer = ImpactAnalyzer::new(&view, RiskConfig::default());

    let metrics = analyzer.calculate_impact_metrics(&id("A")).expect("A exists");

    assert_eq!(metrics.blast_radius(), 3);
    assert_eq!(metrics.severity, Severity::Minimal);
    assert_eq!(metrics.direct_dependents, 2);
    assert_eq!(metrics.deployment_depth, 2);
    assert!(!metrics.in_cycle());

    let radius = analyzer.find_blast_radius(&id("A")).expect("A exists");
    assert_eq!(radius.len(), 3);
    assert!(radius.contains(&id("C")));
}

#[test]
fn hub_with_fifteen_dependents() {
    let store = hub_store(15);
    let view = snapshot(&store);
    let analyzer = ImpactAnalyzer::new(&view, RiskConfig::default());

    let impact = analyzer
        .analyze_change_impact(&id("auth"))
        .expect("auth exists");

    assert!(impact.metrics.is_hub());
    assert_eq!(impact.metrics.severity, Severity::Low);
    assert!(impact.requires_coordination());
    assert!(impact
        .recommendations
        .iter()
        .any(|r| r.contains("coordinate rollout with dependent owners")));
    assert!((impact.breakdown.hub - 0.1).abs() < 1e-9);
    assert!((0.0..=1.0).contains(&impact.risk_score));

    let bottlenecks = analyzer.find_bottlenecks(10);
    assert_eq!(bottlenecks.len(), 1);
    assert_eq!(bottlenecks[0].id, id("auth"));
    assert_eq!(bottlenecks[0].dependents, 15);
}

#[test]
fn hub_threshold_comes_from_config() {
    let store = hub_store(5);
    let view = snapshot(&store);
    let config = RiskConfig {
        hub_threshold: 4,
        ..RiskConfig::default()
    };
    let analyzer = ImpactAnalyzer::new(&view, config);

    let metrics = analyzer
        .calculate_impact_metrics(&id("auth"))
        .expect("auth exists");

    assert!(metrics.is_hub());
}

#[test]
fn isolated_entity_scores_zero() {
    let names: Vec<String> = ["lone", "a", "b"].iter().map(ToString::to_string).collect();
    let store = build(&names, &[("a".to_string(), "b".to_string())]);
    let view = snapshot(&store);
    let analyzer = ImpactAnalyzer::new(&view, RiskConfig::default());

    let impact = analyzer
        .analyze_change_impact(&id("lone"))
        .expect("lone exists");

    assert!(impact.risk_score.abs() < f64::EPSILON);
    assert!(impact.is_safe_to_change());
    assert!(impact.affected.is_empty());
    assert!(impact.metrics.is_leaf());
}

#[test]
fn critical_path_of_diamond_with_tail() {
    // a -> b -> d -> e, a -> c -> d
    let names: Vec<String> = ["a", "b", "c", "d", "e"].iter().map(ToString::to_string).collect();
    let edges: Vec<(String, String)> = [("a", "b"), ("b", "d"), ("a", "c"), ("c", "d"), ("d", "e")]
        .iter()
        .map(|(s, t)| ((*s).to_string(), (*t).to_string()))
        .collect();
    let store = build(&names, &edges);
    let view = snapshot(&store);
    let analyzer = ImpactAnalyzer::new(&view, RiskConfig::default());

    let path = analyzer.find_critical_path().expect("graph is acyclic");

    assert_eq!(path.len(), 4);
    assert_eq!(path.edge_count(), 3);
    assert_eq!(path.chain.first(), Some(&id("a")));
    assert_eq!(path.chain.last(), Some(&id("e")));
    // d has two dependencies, every other member at most one
    assert_eq!(path.bottleneck, id("d"));

    let impact = analyzer.analyze_change_impact(&id("d")).expect("d exists");
    assert!(impact.metrics.on_critical_path);
    assert!(impact.critical_path.is_some());
    assert!(impact
        .recommendations
        .iter()
        .any(|r| r.contains("bottleneck overall completion")));
}

#[test]
fn cycle_members_share_depths_and_block_critical_path() {
    let names: Vec<String> = ["root", "x", "y", "leaf"].iter().map(ToString::to_string).collect();
    let edges: Vec<(String, String)> = [("root", "x"), ("x", "y"), ("y", "x"), ("y", "leaf")]
        .iter()
        .map(|(s, t)| ((*s).to_string(), (*t).to_string()))
        .collect();
    let store = build(&names, &edges);
    let view = snapshot(&store);
    let analyzer = ImpactAnalyzer::new(&view, RiskConfig::default());

    assert!(analyzer.find_critical_path().is_none());

    let x = analyzer.calculate_impact_metrics(&id("x")).expect("x exists");
    let y = analyzer.calculate_impact_metrics(&id("y")).expect("y exists");
    assert_eq!(x.deployment_depth, y.deployment_depth);
    assert_eq!(x.dependency_depth, 1);

    let impact = analyzer.analyze_change_impact(&id("x")).expect("x exists");
    assert!(!impact.is_safe_to_change());
    assert!(impact
        .recommendations
        .iter()
        .any(|r| r.contains("resolve the cycle before proceeding")));
}

#[test]
fn large_blast_radius_saturates() {
    let store = hub_store(600);
    let view = snapshot(&store);
    let config = RiskConfig {
        blast_radius_normalizer: 500.0,
        ..RiskConfig::default()
    };
    let analyzer = ImpactAnalyzer::new(&view, config);

    let impact = analyzer
        .analyze_change_impact(&id("auth"))
        .expect("auth exists");

    assert_eq!(impact.metrics.severity, Severity::Critical);
    assert!((impact.breakdown.blast_radius - 0.4).abs() < 1e-9);
    assert!(impact.risk_score <= 1.0);
    assert!(impact
        .recommendations
        .iter()
        .any(|r| r.contains("staged rollout")));
}

#[test]
fn custom_weights_change_the_score() {
    let store = hub_store(15);
    let view = snapshot(&store);
    let config = RiskConfig {
        weights: RiskWeights {
            blast_radius: 0.0,
            circular: 0.0,
            critical_path: 0.0,
            hub: 1.0,
        },
        ..RiskConfig::default()
    };
    config.validate().expect("weights are valid");
    let analyzer = ImpactAnalyzer::new(&view, config);

    let impact = analyzer
        .analyze_change_impact(&id("auth"))
        .expect("auth exists");

    assert!((impact.risk_score - 1.0).abs() < 1e-9);
}

#[test]
fn metrics_for_all_matches_single_calls() {
    let store = hub_store(8);
    let view = snapshot(&store);
    let analyzer = ImpactAnalyzer::new(&view, Config::default().risk);

    let all = analyzer.metrics_for_all().expect("metrics should compute");

    assert_eq!(all.len(), 9);
    for metrics in &all {
        let single = analyzer
            .calculate_impact_metrics(&metrics.entity)
            .expect("entity exists");
        assert_eq!(*metrics, single);
    }
}
