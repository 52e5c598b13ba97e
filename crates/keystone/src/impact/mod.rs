//! Change-impact analysis over a graph snapshot.
//!
//! An [`ImpactAnalyzer`] borrows a [`GraphView`] and answers "what breaks if
//! X changes?": blast radius, severity, cycle involvement, critical path
//! membership and a composite risk score with recommendations.
//!
//! Cycle groups, the depth table and the critical path are computed once per
//! analyzer and cached, so analyzing many entities costs one pass for each.

mod types;

pub use types::{Bottleneck, ChangeImpact, CriticalPath, ImpactMetrics, RiskBreakdown, Severity};

use std::collections::{BTreeSet, HashMap};
use std::sync::OnceLock;

use petgraph::Direction;
use petgraph::algo::{condensation, toposort};
use rayon::prelude::*;

use crate::config::RiskConfig;
use crate::error::Result;
use crate::graph::GraphView;
use crate::types::EntityId;

/// Longest-path lengths per entity, counted over the SCC condensation.
#[derive(Debug, Default)]
struct DepthTable {
    /// Longest chain of dependents below each entity
    deployment: HashMap<EntityId, usize>,
    /// Longest chain of dependencies above each entity
    dependency: HashMap<EntityId, usize>,
}

/// Impact analysis over one immutable snapshot.
#[derive(Debug)]
pub struct ImpactAnalyzer<'g> {
    view: &'g GraphView,
    config: RiskConfig,
    cycles: OnceLock<Vec<Vec<EntityId>>>,
    depths: OnceLock<DepthTable>,
    critical_path: OnceLock<Option<CriticalPath>>,
}

impl<'g> ImpactAnalyzer<'g> {
    /// Create an analyzer over `view`.
    #[must_use]
    pub fn new(view: &'g GraphView, config: RiskConfig) -> Self {
        Self {
            view,
            config,
            cycles: OnceLock::new(),
            depths: OnceLock::new(),
            critical_path: OnceLock::new(),
        }
    }

    /// The snapshot being analyzed.
    #[must_use]
    pub fn view(&self) -> &'g GraphView {
        self.view
    }

    /// Metrics for one entity.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` if the entity is not in the view.
    pub fn calculate_impact_metrics(&self, id: &EntityId) -> Result<ImpactMetrics> {
        let direct_dependencies = self.view.in_degree(id)?;
        let direct_dependents = self.view.out_degree(id)?;
        let transitive_dependencies = self.view.transitive_dependencies(id, None)?.len();
        let transitive_dependents = self.view.transitive_dependents(id, None)?.len();

        let circular_groups = self
            .cycles()
            .iter()
            .filter(|group| group.contains(id))
            .count();
        let on_critical_path = self.find_critical_path().is_some_and(|path| path.contains(id));

        let depths = self.depths();
        Ok(ImpactMetrics {
            entity: id.clone(),
            direct_dependencies,
            transitive_dependencies,
            direct_dependents,
            transitive_dependents,
            severity: Severity::from_blast_radius(transitive_dependents),
            circular_groups,
            on_critical_path,
            deployment_depth: depths.deployment.get(id).copied().unwrap_or(0),
            dependency_depth: depths.dependency.get(id).copied().unwrap_or(0),
            hub_threshold: self.config.hub_threshold,
        })
    }

    /// Metrics for every entity in the view, in id order.
    ///
    /// # Errors
    ///
    /// Propagates the first per-entity failure.
    pub fn metrics_for_all(&self) -> Result<Vec<ImpactMetrics>> {
        // Fill the shared caches before fanning out
        self.cycles();
        self.depths();
        self.find_critical_path();

        let ids: Vec<&EntityId> = self.view.entity_ids().collect();
        ids.into_par_iter()
            .map(|id| self.calculate_impact_metrics(id))
            .collect()
    }

    /// The longest dependency chain.
    ///
    /// `None` for an empty or edge-less view, or when the view has cycles.
    #[must_use]
    pub fn find_critical_path(&self) -> Option<&CriticalPath> {
        self.critical_path
            .get_or_init(|| self.compute_critical_path())
            .as_ref()
    }

    /// Full change-impact report for `id`.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` if the entity is not in the view.
    pub fn analyze_change_impact(&self, id: &EntityId) -> Result<ChangeImpact> {
        let metrics = self.calculate_impact_metrics(id)?;
        let affected = self.find_blast_radius(id)?;

        let circular_groups: Vec<Vec<EntityId>> = self
            .cycles()
            .iter()
            .filter(|group| group.contains(id))
            .cloned()
            .collect();
        let critical_path = self
            .find_critical_path()
            .filter(|path| path.contains(id))
            .cloned();

        let breakdown = self.risk_breakdown(&metrics);
        let risk_score = breakdown.total();
        let recommendations = recommendations(&metrics);

        tracing::debug!(
            entity = %id,
            affected = affected.len(),
            risk_score,
            "Analyzed change impact"
        );

        Ok(ChangeImpact {
            entity: id.clone(),
            metrics,
            affected,
            circular_groups,
            critical_path,
            risk_score,
            breakdown,
            recommendations,
            safe_threshold: self.config.safe_threshold,
        })
    }

    /// Entities with at least `min_dependents` direct dependents, highest first.
    #[must_use]
    pub fn find_bottlenecks(&self, min_dependents: usize) -> Vec<Bottleneck> {
        let mut bottlenecks: Vec<Bottleneck> = self
            .view
            .entity_ids()
            .filter_map(|id| {
                let dependents = self.view.out_degree(id).ok()?;
                (dependents >= min_dependents).then(|| Bottleneck {
                    id: id.clone(),
                    dependents,
                })
            })
            .collect();
        bottlenecks.sort_by(|a, b| b.dependents.cmp(&a.dependents).then_with(|| a.id.cmp(&b.id)));
        bottlenecks
    }

    /// Every entity a change to `id` can reach.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` if the entity is not in the view.
    pub fn find_blast_radius(&self, id: &EntityId) -> Result<BTreeSet<EntityId>> {
        Ok(self
            .view
            .transitive_dependents(id, None)?
            .into_iter()
            .map(|reached| reached.id)
            .collect())
    }

    // === Cached tables ===

    fn cycles(&self) -> &[Vec<EntityId>] {
        self.cycles
            .get_or_init(|| self.view.find_circular_dependencies())
    }

    fn depths(&self) -> &DepthTable {
        self.depths.get_or_init(|| compute_depths(self.view))
    }

    fn compute_critical_path(&self) -> Option<CriticalPath> {
        if self.view.edge_count() == 0 || !self.cycles().is_empty() {
            return None;
        }
        let depth_of = |id: &EntityId| self.depths().dependency.get(id).copied().unwrap_or(0);

        // Chain end: deepest entity, smallest id on ties
        let mut end: Option<(&EntityId, usize)> = None;
        for id in self.view.entity_ids() {
            let depth = depth_of(id);
            if end.is_none_or(|(_, best)| depth > best) {
                end = Some((id, depth));
            }
        }
        let (end, _) = end?;

        let mut chain = vec![end.clone()];
        let mut current = end.clone();
        while depth_of(&current) > 0 {
            let wanted = depth_of(&current) - 1;
            let previous = self
                .view
                .direct_dependencies(&current)
                .ok()?
                .into_iter()
                .find(|dep| depth_of(dep) == wanted)?;
            chain.push(previous.clone());
            current = previous;
        }
        chain.reverse();

        let mut bottleneck: Option<(&EntityId, usize)> = None;
        for id in &chain {
            let fan_in = self.view.in_degree(id).ok()?;
            if bottleneck.is_none_or(|(_, best)| fan_in > best) {
                bottleneck = Some((id, fan_in));
            }
        }
        let bottleneck = bottleneck?.0.clone();

        Some(CriticalPath { chain, bottleneck })
    }

    fn risk_breakdown(&self, metrics: &ImpactMetrics) -> RiskBreakdown {
        let weights = &self.config.weights;
        #[allow(clippy::cast_precision_loss)]
        let fraction =
            (metrics.blast_radius() as f64 / self.config.blast_radius_normalizer).min(1.0);
        let weight_if = |fired: bool, weight: f64| if fired { weight } else { 0.0 };
        RiskBreakdown {
            blast_radius: fraction * weights.blast_radius,
            circular: weight_if(metrics.in_cycle(), weights.circular),
            critical_path: weight_if(metrics.on_critical_path, weights.critical_path),
            hub: weight_if(metrics.is_hub(), weights.hub),
        }
    }
}

/// Longest-path DP in both directions over the topological order of the
/// condensation; members of one SCC share their component's values.
fn compute_depths(view: &GraphView) -> DepthTable {
    let condensed = condensation(view.graph().clone(), true);
    // The condensation is acyclic, so the sort cannot fail
    let order = toposort(&condensed, None).unwrap_or_default();

    let mut down = vec![0usize; condensed.node_count()];
    for &component in order.iter().rev() {
        down[component.index()] = condensed
            .neighbors_directed(component, Direction::Outgoing)
            .map(|next| down[next.index()] + 1)
            .max()
            .unwrap_or(0);
    }

    let mut up = vec![0usize; condensed.node_count()];
    for &component in &order {
        up[component.index()] = condensed
            .neighbors_directed(component, Direction::Incoming)
            .map(|prev| up[prev.index()] + 1)
            .max()
            .unwrap_or(0);
    }

    let mut table = DepthTable::default();
    for component in condensed.node_indices() {
        for id in &condensed[component] {
            table.deployment.insert(id.clone(), down[component.index()]);
            table.dependency.insert(id.clone(), up[component.index()]);
        }
    }
    table
}

fn recommendations(metrics: &ImpactMetrics) -> Vec<String> {
    let mut recs = Vec::new();
    if metrics.is_hub() {
        recs.push(format!(
            "{} direct dependents: coordinate rollout with dependent owners",
            metrics.direct_dependents
        ));
    }
    if metrics.in_cycle() {
        recs.push(format!(
            "involved in {} circular dependency group(s): resolve the cycle before proceeding",
            metrics.circular_groups
        ));
    }
    if metrics.on_critical_path {
        recs.push(
            "on the critical path: delay here will bottleneck overall completion".to_string(),
        );
    }
    if metrics.severity.is_high() {
        recs.push(format!(
            "{} severity ({} affected): use a staged rollout behind feature flags",
            metrics.severity,
            metrics.blast_radius()
        ));
    }
    if metrics.severity == Severity::Minimal && recs.is_empty() {
        recs.push("low impact change, safe to proceed".to_string());
    }
    recs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{chain, entity, relation};
    use crate::types::RelationType;
    use rstest::rstest;

    fn hub_view(dependents: usize) -> (GraphView, EntityId) {
        let hub = entity("hub");
        let leaves: Vec<_> = (0..dependents).map(|i| entity(&format!("leaf{i}"))).collect();
        let edges: Vec<_> = leaves
            .iter()
            .map(|leaf| relation(&hub, leaf, RelationType::Requires))
            .collect();
        let id = hub.id.clone();
        let mut nodes = leaves;
        nodes.push(hub);
        (GraphView::from_parts(nodes, edges).expect("view should build"), id)
    }

    #[rstest]
    #[case(0, Severity::Minimal)]
    #[case(4, Severity::Minimal)]
    #[case(5, Severity::Low)]
    #[case(20, Severity::Low)]
    #[case(21, Severity::Medium)]
    #[case(100, Severity::Medium)]
    #[case(101, Severity::High)]
    #[case(500, Severity::High)]
    #[case(501, Severity::Critical)]
    fn severity_boundaries(#[case] blast_radius: usize, #[case] expected: Severity) {
        assert_eq!(Severity::from_blast_radius(blast_radius), expected);
    }

    #[test]
    fn chain_depths_and_critical_path() {
        let (view, ids) = chain(4);
        let analyzer = ImpactAnalyzer::new(&view, RiskConfig::default());

        let first = analyzer.calculate_impact_metrics(&ids[0]).expect("id exists");
        assert_eq!(first.transitive_dependents, 3);
        assert_eq!(first.deployment_depth, 3);
        assert_eq!(first.dependency_depth, 0);

        let last = analyzer.calculate_impact_metrics(&ids[3]).expect("id exists");
        assert!(last.is_leaf());
        assert_eq!(last.dependency_depth, 3);

        let path = analyzer.find_critical_path().expect("chain is acyclic");
        assert_eq!(path.chain, ids);
        assert_eq!(path.edge_count(), 3);
        assert_eq!(path.bottleneck, ids[1]);
    }

    #[test]
    fn hub_requires_coordination() {
        let (view, hub) = hub_view(15);
        let analyzer = ImpactAnalyzer::new(&view, RiskConfig::default());

        let impact = analyzer.analyze_change_impact(&hub).expect("hub exists");

        assert!(impact.metrics.is_hub());
        assert_eq!(impact.affected.len(), 15);
        assert!(impact.requires_coordination());
        assert!(impact
            .recommendations
            .iter()
            .any(|r| r.contains("coordinate rollout")));
    }

    #[test]
    fn isolated_entity_is_safe() {
        let lone = entity("lone");
        let a = entity("a");
        let b = entity("b");
        let edge = relation(&a, &b, RelationType::Requires);
        let view = GraphView::from_parts(vec![lone.clone(), a, b], vec![edge])
            .expect("view should build");
        let analyzer = ImpactAnalyzer::new(&view, RiskConfig::default());

        let impact = analyzer.analyze_change_impact(&lone.id).expect("id exists");

        assert!(impact.risk_score.abs() < f64::EPSILON);
        assert!(impact.is_safe_to_change());
        assert!(!impact.requires_coordination());
        assert_eq!(
            impact.recommendations,
            vec!["low impact change, safe to proceed".to_string()]
        );
    }

    #[test]
    fn cycle_members_are_not_safe() {
        let x = entity("x");
        let y = entity("y");
        let view = GraphView::from_parts(
            vec![x.clone(), y.clone()],
            vec![
                relation(&x, &y, RelationType::Requires),
                relation(&y, &x, RelationType::Requires),
            ],
        )
        .expect("view should build");
        let analyzer = ImpactAnalyzer::new(&view, RiskConfig::default());

        let impact = analyzer.analyze_change_impact(&x.id).expect("id exists");

        assert!(impact.metrics.in_cycle());
        assert_eq!(impact.circular_groups.len(), 1);
        assert!(!impact.is_safe_to_change());
        assert!(analyzer.find_critical_path().is_none());
        assert!((impact.breakdown.circular - 0.3).abs() < 1e-9);
    }

    #[test]
    fn bottlenecks_ranked_by_dependents() {
        let (view, hub) = hub_view(3);
        let analyzer = ImpactAnalyzer::new(&view, RiskConfig::default());

        let ranked = analyzer.find_bottlenecks(1);
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].id, hub);
        assert_eq!(ranked[0].dependents, 3);
        assert!(analyzer.find_bottlenecks(4).is_empty());
    }

    #[test]
    fn metrics_for_all_covers_every_entity() {
        let (view, ids) = chain(5);
        let analyzer = ImpactAnalyzer::new(&view, RiskConfig::default());

        let all = analyzer.metrics_for_all().expect("all ids exist");

        assert_eq!(all.len(), ids.len());
        assert!(all.iter().all(|m| m.on_critical_path));
    }

    #[test]
    fn edgeless_view_has_no_critical_path() {
        let view = GraphView::from_parts(vec![entity("a")], Vec::new()).expect("view should build");
        let analyzer = ImpactAnalyzer::new(&view, RiskConfig::default());

        assert!(analyzer.find_critical_path().is_none());
    }
}
