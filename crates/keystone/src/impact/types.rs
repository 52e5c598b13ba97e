//! Result types produced by the impact analyzer.

use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;

use crate::types::EntityId;

/// Severity class of a change, by blast radius.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Fewer than 5 entities affected
    Minimal,
    /// 5 to 20 entities affected
    Low,
    /// 21 to 100 entities affected
    Medium,
    /// 101 to 500 entities affected
    High,
    /// More than 500 entities affected
    Critical,
}

impl Severity {
    /// Classify a blast radius.
    #[must_use]
    pub fn from_blast_radius(blast_radius: usize) -> Self {
        match blast_radius {
            0..=4 => Self::Minimal,
            5..=20 => Self::Low,
            21..=100 => Self::Medium,
            101..=500 => Self::High,
            _ => Self::Critical,
        }
    }

    /// `High` or `Critical`.
    #[must_use]
    pub fn is_high(self) -> bool {
        matches!(self, Self::High | Self::Critical)
    }

    /// Lowercase name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Minimal => "minimal",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Quantified impact of changing one entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImpactMetrics {
    /// The entity analyzed
    pub entity: EntityId,
    /// Entities it depends on directly
    pub direct_dependencies: usize,
    /// Entities it depends on, directly or transitively
    pub transitive_dependencies: usize,
    /// Entities depending on it directly
    pub direct_dependents: usize,
    /// Entities depending on it, directly or transitively
    pub transitive_dependents: usize,
    /// Severity class of the blast radius
    pub severity: Severity,
    /// Number of circular dependency groups containing the entity
    pub circular_groups: usize,
    /// Whether the entity lies on the critical path
    pub on_critical_path: bool,
    /// Longest chain of dependents below the entity
    pub deployment_depth: usize,
    /// Longest chain of dependencies above the entity
    pub dependency_depth: usize,
    #[serde(skip)]
    pub(crate) hub_threshold: usize,
}

impl ImpactMetrics {
    /// Number of entities a change can reach.
    #[must_use]
    pub fn blast_radius(&self) -> usize {
        self.transitive_dependents
    }

    /// More direct dependents than the configured hub threshold.
    #[must_use]
    pub fn is_hub(&self) -> bool {
        self.direct_dependents > self.hub_threshold
    }

    /// Nothing depends on the entity.
    #[must_use]
    pub fn is_leaf(&self) -> bool {
        self.direct_dependents == 0
    }

    /// The entity belongs to at least one circular dependency group.
    #[must_use]
    pub fn in_cycle(&self) -> bool {
        self.circular_groups > 0
    }
}

/// The longest dependency chain in an acyclic graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CriticalPath {
    /// Chain members, dependencies first
    pub chain: Vec<EntityId>,
    /// Chain member with the most dependencies (earliest on ties)
    pub bottleneck: EntityId,
}

impl CriticalPath {
    /// Number of entities on the chain.
    #[must_use]
    pub fn len(&self) -> usize {
        self.chain.len()
    }

    /// Always false; a critical path has at least one edge.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chain.is_empty()
    }

    /// Number of edges on the chain.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.chain.len().saturating_sub(1)
    }

    /// Whether `id` is on the chain.
    #[must_use]
    pub fn contains(&self, id: &EntityId) -> bool {
        self.chain.contains(id)
    }
}

/// Weighted contribution of each risk factor to a risk score.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct RiskBreakdown {
    /// Blast radius fraction times its weight
    pub blast_radius: f64,
    /// Circular involvement weight, or 0
    pub circular: f64,
    /// Critical path weight, or 0
    pub critical_path: f64,
    /// Hub weight, or 0
    pub hub: f64,
}

impl RiskBreakdown {
    /// Sum of the contributions, clamped to `[0, 1]`.
    #[must_use]
    pub fn total(&self) -> f64 {
        (self.blast_radius + self.circular + self.critical_path + self.hub).clamp(0.0, 1.0)
    }
}

/// Complete impact report for a proposed change.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangeImpact {
    /// The entity being changed
    pub entity: EntityId,
    /// Metrics for the entity
    pub metrics: ImpactMetrics,
    /// Every entity the change reaches
    pub affected: BTreeSet<EntityId>,
    /// Circular dependency groups containing the entity
    pub circular_groups: Vec<Vec<EntityId>>,
    /// The critical path, when the entity lies on it
    pub critical_path: Option<CriticalPath>,
    /// Composite risk in `[0, 1]`
    pub risk_score: f64,
    /// Per-factor contributions to `risk_score`
    pub breakdown: RiskBreakdown,
    /// Human-readable advice
    pub recommendations: Vec<String>,
    #[serde(skip)]
    pub(crate) safe_threshold: f64,
}

impl ChangeImpact {
    /// Risk below the safe threshold and no cycle involvement.
    #[must_use]
    pub fn is_safe_to_change(&self) -> bool {
        self.risk_score < self.safe_threshold && self.circular_groups.is_empty()
    }

    /// The change touches a hub or the critical path.
    #[must_use]
    pub fn requires_coordination(&self) -> bool {
        self.metrics.is_hub() || self.metrics.on_critical_path
    }
}

/// An entity with many direct dependents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Bottleneck {
    /// The entity
    pub id: EntityId,
    /// Number of direct dependents
    pub dependents: usize,
}
