//! In-memory graph snapshots and structural algorithms.
//!
//! A [`GraphView`] is an immutable petgraph snapshot of (part of) the store.
//! It answers the structural questions:
//! - Is the graph acyclic, and which entities form cycles?
//! - What is a valid build order?
//! - Is B reachable from A, and along which paths?
//! - What depends on X, directly and transitively?
//!
//! ## Design
//!
//! - Edges point from the depended-upon entity to its dependent, matching
//!   the stored relations (`source -> target`)
//! - Nodes are inserted in id order so snapshots are deterministic
//! - Mutating helpers (`with_entity`, `with_relation`, `subgraph`) build new views
//! - Views are `Send + Sync` and read-only, so analyses may fan out with rayon

mod algorithms;
mod types;

pub use types::{Reached, SnapshotOptions};

use std::collections::{BTreeMap, BTreeSet, HashMap};

use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};

use crate::db::{RelationFilter, Store};
use crate::error::{Error, Result};
use crate::types::{Entity, EntityId, Relation, RelationId, RelationType};

/// Immutable dependency graph snapshot.
#[derive(Debug, Clone)]
pub struct GraphView {
    graph: DiGraph<EntityId, RelationType>,
    node_map: HashMap<EntityId, NodeIndex>,
    entities: BTreeMap<EntityId, Entity>,
    relations: BTreeMap<RelationId, Relation>,
}

impl GraphView {
    /// Snapshot the store.
    ///
    /// Only edges whose endpoints both pass the entity filter are loaded.
    ///
    /// # Errors
    ///
    /// Returns `Error::LimitExceeded` when the snapshot would exceed a node
    /// or edge ceiling, or any store error.
    pub fn load(store: &Store, options: &SnapshotOptions) -> Result<Self> {
        let mut filter = options.filter.clone().unwrap_or_default();
        if let Some(max_nodes) = options.limits.max_nodes {
            // Fetch one extra row to detect the overflow without loading everything
            let cap = max_nodes.saturating_add(1);
            filter.limit = Some(filter.limit.map_or(cap, |limit| limit.min(cap)));
        }

        let entities = store.query_entities(&filter)?;
        if let Some(max_nodes) = options.limits.max_nodes {
            if entities.len() > max_nodes {
                tracing::warn!(max_nodes, "Snapshot node ceiling exceeded");
                return Err(Error::LimitExceeded(format!(
                    "snapshot exceeds {max_nodes} entities"
                )));
            }
        }

        let members: BTreeSet<&EntityId> = entities.iter().map(|e| &e.id).collect();
        let relation_filter = RelationFilter {
            types: options.relation_types.clone(),
            ..RelationFilter::default()
        };
        let relations: Vec<Relation> = store
            .query_relations(&relation_filter)?
            .into_iter()
            .filter(|r| members.contains(&r.source) && members.contains(&r.target))
            .collect();
        if let Some(max_edges) = options.limits.max_edges {
            if relations.len() > max_edges {
                tracing::warn!(max_edges, "Snapshot edge ceiling exceeded");
                return Err(Error::LimitExceeded(format!(
                    "snapshot exceeds {max_edges} relations"
                )));
            }
        }

        tracing::debug!(
            entities = entities.len(),
            relations = relations.len(),
            "Loaded graph snapshot"
        );
        Self::from_parts(entities, relations)
    }

    /// Build a view from entity and relation records.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` if an edge references an entity that is not
    /// part of `entities`, and `Error::ConstraintViolation` for a self-loop.
    pub fn from_parts(
        entities: impl IntoIterator<Item = Entity>,
        relations: impl IntoIterator<Item = Relation>,
    ) -> Result<Self> {
        let entities: BTreeMap<EntityId, Entity> =
            entities.into_iter().map(|e| (e.id.clone(), e)).collect();
        let relations: BTreeMap<RelationId, Relation> =
            relations.into_iter().map(|r| (r.id.clone(), r)).collect();
        Self::build(entities, relations)
    }

    fn build(
        entities: BTreeMap<EntityId, Entity>,
        relations: BTreeMap<RelationId, Relation>,
    ) -> Result<Self> {
        let mut graph = DiGraph::with_capacity(entities.len(), relations.len());
        let mut node_map = HashMap::with_capacity(entities.len());
        for id in entities.keys() {
            node_map.insert(id.clone(), graph.add_node(id.clone()));
        }

        for relation in relations.values() {
            if relation.source == relation.target {
                return Err(Error::ConstraintViolation(format!(
                    "self-referencing relation {} on {}",
                    relation.id, relation.source
                )));
            }
            let source = lookup(&node_map, &relation.source)?;
            let target = lookup(&node_map, &relation.target)?;
            graph.add_edge(source, target, relation.relation_type);
        }

        Ok(Self {
            graph,
            node_map,
            entities,
            relations,
        })
    }

    /// A new view with `entity` added (or replaced).
    #[must_use]
    pub fn with_entity(&self, entity: Entity) -> Self {
        let mut view = self.clone();
        if !view.node_map.contains_key(&entity.id) {
            let node = view.graph.add_node(entity.id.clone());
            view.node_map.insert(entity.id.clone(), node);
        }
        view.entities.insert(entity.id.clone(), entity);
        view
    }

    /// A new view with `relation` added (or replaced).
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` if an endpoint is not in the view.
    pub fn with_relation(&self, relation: Relation) -> Result<Self> {
        let mut relations = self.relations.clone();
        relations.insert(relation.id.clone(), relation);
        Self::build(self.entities.clone(), relations)
    }

    /// A new view restricted to `ids` and the edges among them.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` for an id not in the view.
    pub fn subgraph(&self, ids: &[EntityId]) -> Result<Self> {
        let mut entities = BTreeMap::new();
        for id in ids {
            let entity = self
                .entities
                .get(id)
                .ok_or_else(|| Error::NotFound(format!("entity {id} in graph view")))?;
            entities.insert(id.clone(), entity.clone());
        }
        let relations = self
            .relations
            .iter()
            .filter(|(_, r)| entities.contains_key(&r.source) && entities.contains_key(&r.target))
            .map(|(id, r)| (id.clone(), r.clone()))
            .collect();
        Self::build(entities, relations)
    }

    // === Accessors ===

    /// Number of entities.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Number of edges.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Whether the view has no entities.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Whether the entity is part of the view.
    #[must_use]
    pub fn contains(&self, id: &EntityId) -> bool {
        self.node_map.contains_key(id)
    }

    /// The entity record, if present.
    #[must_use]
    pub fn entity(&self, id: &EntityId) -> Option<&Entity> {
        self.entities.get(id)
    }

    /// All entity ids, in id order.
    pub fn entity_ids(&self) -> impl Iterator<Item = &EntityId> {
        self.entities.keys()
    }

    /// All relation records, in id order.
    pub fn relations(&self) -> impl Iterator<Item = &Relation> {
        self.relations.values()
    }

    /// Entities the given one depends on (sources of its incoming edges), in id order.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` if the entity is not in the view.
    pub fn direct_dependencies(&self, id: &EntityId) -> Result<Vec<EntityId>> {
        Ok(self.neighbours(self.node(id)?, Direction::Incoming))
    }

    /// Entities depending on the given one (targets of its outgoing edges), in id order.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` if the entity is not in the view.
    pub fn direct_dependents(&self, id: &EntityId) -> Result<Vec<EntityId>> {
        Ok(self.neighbours(self.node(id)?, Direction::Outgoing))
    }

    /// Number of distinct entities this one depends on.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` if the entity is not in the view.
    pub fn in_degree(&self, id: &EntityId) -> Result<usize> {
        Ok(self.direct_dependencies(id)?.len())
    }

    /// Number of distinct entities depending on this one.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` if the entity is not in the view.
    pub fn out_degree(&self, id: &EntityId) -> Result<usize> {
        Ok(self.direct_dependents(id)?.len())
    }

    // === Internal helpers ===

    pub(crate) fn graph(&self) -> &DiGraph<EntityId, RelationType> {
        &self.graph
    }

    pub(crate) fn node(&self, id: &EntityId) -> Result<NodeIndex> {
        lookup(&self.node_map, id)
    }

    /// Distinct neighbours in one direction, sorted by id.
    pub(crate) fn neighbours(&self, node: NodeIndex, direction: Direction) -> Vec<EntityId> {
        let unique: BTreeSet<&EntityId> = self
            .graph
            .neighbors_directed(node, direction)
            .map(|n| &self.graph[n])
            .collect();
        unique.into_iter().cloned().collect()
    }

    /// Distinct neighbour nodes in one direction, sorted by entity id.
    pub(crate) fn neighbour_nodes(&self, node: NodeIndex, direction: Direction) -> Vec<NodeIndex> {
        let mut nodes: Vec<NodeIndex> = self.graph.neighbors_directed(node, direction).collect();
        nodes.sort_by(|a, b| self.graph[*a].cmp(&self.graph[*b]));
        nodes.dedup();
        nodes
    }
}

fn lookup(node_map: &HashMap<EntityId, NodeIndex>, id: &EntityId) -> Result<NodeIndex> {
    node_map
        .get(id)
        .copied()
        .ok_or_else(|| Error::NotFound(format!("entity {id} in graph view")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{entity, relation};

    #[test]
    fn from_parts_rejects_dangling_edges() {
        let a = entity("a");
        let b = entity("b");
        let edge = relation(&a, &b, RelationType::Requires);

        let err = GraphView::from_parts(vec![a], vec![edge]).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn parallel_edges_count_once_for_degrees() {
        let a = entity("a");
        let b = entity("b");
        let requires = relation(&a, &b, RelationType::Requires);
        let precedes = relation(&a, &b, RelationType::Precedes);

        let view = GraphView::from_parts(vec![a.clone(), b.clone()], vec![requires, precedes])
            .expect("view should build");

        assert_eq!(view.edge_count(), 2);
        assert_eq!(view.out_degree(&a.id).expect("a exists"), 1);
        assert_eq!(view.direct_dependencies(&b.id).expect("b exists"), vec![a.id]);
    }

    #[test]
    fn with_relation_returns_new_view() {
        let a = entity("a");
        let b = entity("b");
        let view = GraphView::from_parts(vec![a.clone(), b.clone()], Vec::new())
            .expect("view should build");

        let extended = view
            .with_relation(relation(&a, &b, RelationType::Requires))
            .expect("endpoints exist");

        assert_eq!(view.edge_count(), 0);
        assert_eq!(extended.edge_count(), 1);
    }

    #[test]
    fn subgraph_keeps_internal_edges_only() {
        let a = entity("a");
        let b = entity("b");
        let c = entity("c");
        let view = GraphView::from_parts(
            vec![a.clone(), b.clone(), c.clone()],
            vec![
                relation(&a, &b, RelationType::Requires),
                relation(&b, &c, RelationType::Requires),
            ],
        )
        .expect("view should build");

        let sub = view
            .subgraph(&[a.id.clone(), b.id.clone()])
            .expect("ids exist");

        assert_eq!(sub.node_count(), 2);
        assert_eq!(sub.edge_count(), 1);
        assert!(!sub.contains(&c.id));
        assert!(view.subgraph(&[EntityId::from("ent-missing")]).is_err());
    }
}
