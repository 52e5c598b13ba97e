//! # Keystone: Dependency Graph Store with Change-Impact Analysis
//!
//! Keystone persists typed entities and the directed, typed relations between
//! them in `SQLite`, and answers two kinds of questions about the graph:
//!
//! - **Structural** - is it acyclic, what is a valid build order, is B
//!   reachable from A?
//! - **Risk** - if X changes, what is affected, how badly, and is it safe to
//!   proceed?
//!
//! ## Design Philosophy
//!
//! - **Store is the source of truth** - graph algorithms run on immutable snapshots
//! - **Deterministic ids** - re-ingesting the same fact yields the same id
//! - **Embeddable** - Library first, CLI second
//! - **Single writer** - one connection behind a mutex, transactions hold the lock
//!
//! An edge `source -> target` means the target depends on the source.
//!
//! ## Quick Start
//!
//! ```no_run
//! use keystone::{GraphView, ImpactAnalyzer, NewEntity, NewRelation, RelationType};
//! use keystone::{RiskConfig, SnapshotOptions, Store};
//!
//! let store = Store::open_in_memory()?;
//! let core = store.create_entity(&NewEntity::new("npm", "core"))?;
//! let app = store.create_entity(&NewEntity::new("npm", "app"))?;
//! store.create_relation(&NewRelation::new(
//!     core.id.clone(),
//!     app.id.clone(),
//!     RelationType::Requires,
//! ))?;
//!
//! let view = GraphView::load(&store, &SnapshotOptions::default())?;
//! let analyzer = ImpactAnalyzer::new(&view, RiskConfig::default());
//! let impact = analyzer.analyze_change_impact(&core.id)?;
//! println!("{} affected, risk {:.2}", impact.affected.len(), impact.risk_score);
//! # Ok::<(), keystone::Error>(())
//! ```

pub mod config;
pub mod db;
pub mod error;
pub mod graph;
pub mod id;
pub mod impact;
pub mod types;

pub use config::{Config, PathLimits, RiskConfig, RiskWeights, SnapshotLimits};
pub use db::{
    BatchOperation, BatchOutcome, EntityFilter, GraphData, IntegrityFix, IntegrityIssue,
    IntegrityIssueKind, IntegrityReport, RelationFilter, Store, StoreStats, Transaction,
};
pub use error::{BatchErrorKind, BatchFailure, Error, Result};
pub use graph::{GraphView, Reached, SnapshotOptions};
pub use impact::{
    Bottleneck, ChangeImpact, CriticalPath, ImpactAnalyzer, ImpactMetrics, RiskBreakdown,
    Severity,
};
pub use types::{
    AdjacentRef, Conflict, Constraint, ConstraintCategory, ConstraintPriority, Entity,
    EntityId, EntityMetadata, EntityPatch, Metadata, MetadataValue, NewEntity, NewRelation,
    Provenance, ProvenanceSource, Relation, RelationId, RelationMetadata, RelationPatch,
    RelationType, Resolution, ResolutionStatus, Stability,
};

/// Record builders shared by the unit tests.
#[cfg(test)]
pub(crate) mod test_support {
    use chrono::Utc;

    use crate::graph::GraphView;
    use crate::id;
    use crate::types::{
        Entity, EntityId, EntityMetadata, Provenance, Relation, RelationMetadata,
        RelationType, Resolution,
    };

    /// A `task` entity named `name`, not persisted.
    pub fn entity(name: &str) -> Entity {
        let now = Utc::now();
        Entity {
            id: id::entity_id("task", name, None),
            domain: "task".to_string(),
            identifier: name.to_string(),
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

    /// An edge `source -> target`, not persisted.
    pub fn relation(source: &Entity, target: &Entity, relation_type: RelationType) -> Relation {
        let now = Utc::now();
        Relation {
            id: id::relation_id(&source.id, &target.id, relation_type),
            source: source.id.clone(),
            target: target.id.clone(),
            relation_type,
            constraints: Vec::new(),
            metadata: RelationMetadata::default(),
            provenance: Provenance::default(),
            created_at: now,
            updated_at: now,
        }
    }

    /// A view over `n0 -> n1 -> ... -> n{len-1}`, with the ids in chain order.
    pub fn chain(len: usize) -> (GraphView, Vec<EntityId>) {
        let nodes: Vec<Entity> = (0..len).map(|i| entity(&format!("n{i}"))).collect();
        let edges: Vec<Relation> = nodes
            .windows(2)
            .map(|pair| relation(&pair[0], &pair[1], RelationType::Requires))
            .collect();
        let ids = nodes.iter().map(|e| e.id.clone()).collect();
        let view = GraphView::from_parts(nodes, edges).expect("chain view should build");
        (view, ids)
    }
}
