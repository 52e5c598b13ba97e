//! Types for graph snapshots and traversal results.

use serde::{Deserialize, Serialize};

use crate::config::SnapshotLimits;
use crate::db::EntityFilter;
use crate::types::{EntityId, RelationType};

/// An entity reached by a transitive traversal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Reached {
    /// The entity reached
    pub id: EntityId,
    /// Number of hops from the start entity (at least 1)
    pub depth: usize,
}

/// What to load into a [`super::GraphView`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotOptions {
    /// Only entities matching this filter (all when `None`)
    pub filter: Option<EntityFilter>,
    /// Only edges of these types (all when empty)
    pub relation_types: Vec<RelationType>,
    /// Node and edge ceilings
    pub limits: SnapshotLimits,
}

impl SnapshotOptions {
    /// Restrict the snapshot to entities matching `filter`.
    #[must_use]
    pub fn with_filter(mut self, filter: EntityFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Restrict the snapshot to one more edge type.
    #[must_use]
    pub fn with_relation_type(mut self, relation_type: RelationType) -> Self {
        self.relation_types.push(relation_type);
        self
    }

    /// Apply node and edge ceilings.
    #[must_use]
    pub fn with_limits(mut self, limits: SnapshotLimits) -> Self {
        self.limits = limits;
        self
    }
}
