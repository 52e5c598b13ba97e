//! Batch execution, import and export.
//!
//! Each batch item runs under its own savepoint inside the enclosing
//! transaction. A failed item is rolled back to its savepoint and recorded;
//! the remaining items still run and the transaction commits at the end.

use std::collections::BTreeSet;

use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use super::filters::{EntityFilter, RelationFilter, query_entities, query_relations};
use super::{entities, relations};
use crate::error::{BatchFailure, Error, Result};
use crate::types::{
    Entity, EntityId, EntityPatch, NewEntity, NewRelation, Relation, RelationId, RelationPatch,
};

const SAVEPOINT: &str = "keystone_batch_item";

/// Ids bound into one `IN (...)` list, well under `SQLite`'s variable limit.
const EXPORT_CHUNK: usize = 500;

/// One mutation inside a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum BatchOperation {
    /// Create an entity
    CreateEntity(NewEntity),
    /// Patch an entity
    UpdateEntity {
        /// Entity to patch
        id: EntityId,
        /// Fields to change
        patch: EntityPatch,
    },
    /// Create or update an entity
    UpsertEntity(NewEntity),
    /// Delete an entity
    DeleteEntity {
        /// Entity to delete
        id: EntityId,
        /// Also delete referencing edges
        #[serde(default)]
        cascade: bool,
    },
    /// Create an edge
    CreateRelation(NewRelation),
    /// Patch an edge
    UpdateRelation {
        /// Edge to patch
        id: RelationId,
        /// Fields to change
        patch: RelationPatch,
    },
    /// Create or update an edge
    UpsertRelation(NewRelation),
    /// Delete an edge
    DeleteRelation {
        /// Edge to delete
        id: RelationId,
    },
}

/// What a successful batch item did.
enum Applied {
    Entity,
    Relation,
    Deleted,
}

/// Tally of a batch or import.
#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    /// Number of operations that succeeded
    pub succeeded: usize,
    /// Entities created or updated
    pub entities_written: usize,
    /// Relations created or updated
    pub relations_written: usize,
    /// Entities or relations deleted
    pub deleted: usize,
    /// Operations that failed, by position
    pub failures: Vec<BatchFailure>,
}

impl BatchOutcome {
    /// Number of operations attempted.
    #[must_use]
    pub fn total(&self) -> usize {
        self.succeeded + self.failures.len()
    }

    /// Whether every operation succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    fn record(&mut self, applied: Applied) {
        self.succeeded += 1;
        match applied {
            Applied::Entity => self.entities_written += 1,
            Applied::Relation => self.relations_written += 1,
            Applied::Deleted => self.deleted += 1,
        }
    }
}

/// Entities and edges in exchange form (JSON on disk).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphData {
    /// Entity records
    pub entities: Vec<Entity>,
    /// Edge records
    pub relations: Vec<Relation>,
}

impl GraphData {
    /// Whether there is nothing to exchange.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.relations.is_empty()
    }
}

/// Run `f` under a savepoint, rolling back to it on error.
///
/// The outer `Result` fails only when the savepoint statements themselves fail.
fn in_savepoint<T>(
    conn: &Connection,
    f: impl FnOnce(&Connection) -> Result<T>,
) -> Result<Result<T>> {
    conn.execute_batch(&format!("SAVEPOINT {SAVEPOINT}"))?;
    let result = f(conn);
    if result.is_err() {
        conn.execute_batch(&format!("ROLLBACK TO {SAVEPOINT}"))?;
    }
    conn.execute_batch(&format!("RELEASE {SAVEPOINT}"))?;
    Ok(result)
}

fn apply_operation(conn: &Connection, operation: &BatchOperation) -> Result<Applied> {
    match operation {
        BatchOperation::CreateEntity(new) => {
            entities::insert_entity(conn, new).map(|_| Applied::Entity)
        }
        BatchOperation::UpdateEntity { id, patch } => {
            entities::apply_entity_patch(conn, id, patch).map(|_| Applied::Entity)
        }
        BatchOperation::UpsertEntity(new) => {
            entities::upsert_entity(conn, new).map(|_| Applied::Entity)
        }
        BatchOperation::DeleteEntity { id, cascade } => {
            entities::delete_entity(conn, id, *cascade).map(|()| Applied::Deleted)
        }
        BatchOperation::CreateRelation(new) => {
            relations::insert_relation(conn, new).map(|_| Applied::Relation)
        }
        BatchOperation::UpdateRelation { id, patch } => {
            relations::apply_relation_patch(conn, id, patch).map(|_| Applied::Relation)
        }
        BatchOperation::UpsertRelation(new) => {
            relations::upsert_relation(conn, new).map(|_| Applied::Relation)
        }
        BatchOperation::DeleteRelation { id } => {
            relations::delete_relation(conn, id).map(|()| Applied::Deleted)
        }
    }
}

fn record_result(outcome: &mut BatchOutcome, index: usize, result: Result<Applied>) {
    match result {
        Ok(applied) => outcome.record(applied),
        Err(e) => {
            tracing::warn!(index, error = %e, "Batch operation failed");
            outcome.failures.push(BatchFailure::new(index, &e));
        }
    }
}

/// Run every operation in order, each under its own savepoint.
pub(crate) fn run_batch(conn: &Connection, operations: &[BatchOperation]) -> Result<BatchOutcome> {
    let mut outcome = BatchOutcome::default();
    for (index, operation) in operations.iter().enumerate() {
        let result = in_savepoint(conn, |conn| apply_operation(conn, operation))?;
        record_result(&mut outcome, index, result);
    }

    tracing::debug!(
        succeeded = outcome.succeeded,
        failed = outcome.failures.len(),
        "Batch executed"
    );
    Ok(outcome)
}

/// Insert entities then relations as exact records, each create-or-fail.
///
/// Failure indices count entities first, then relations.
pub(crate) fn import_graph(conn: &Connection, data: &GraphData) -> Result<BatchOutcome> {
    let mut outcome = BatchOutcome::default();

    for (index, entity) in data.entities.iter().enumerate() {
        let result = in_savepoint(conn, |conn| {
            entities::insert_entity_record(conn, entity).map(|_| Applied::Entity)
        })?;
        record_result(&mut outcome, index, result);
    }

    let offset = data.entities.len();
    for (index, relation) in data.relations.iter().enumerate() {
        let result = in_savepoint(conn, |conn| {
            relations::insert_relation_record(conn, relation).map(|_| Applied::Relation)
        })?;
        record_result(&mut outcome, offset + index, result);
    }

    tracing::info!(
        entities = outcome.entities_written,
        relations = outcome.relations_written,
        failed = outcome.failures.len(),
        "Import finished"
    );
    Ok(outcome)
}

/// Export the given entities (all when `None`) and every edge between them.
pub(crate) fn export_graph(conn: &Connection, ids: Option<&[EntityId]>) -> Result<GraphData> {
    let Some(ids) = ids else {
        return Ok(GraphData {
            entities: query_entities(conn, &EntityFilter::default())?,
            relations: query_relations(conn, &RelationFilter::default())?,
        });
    };

    let wanted: BTreeSet<&EntityId> = ids.iter().collect();
    let mut exported = Vec::with_capacity(wanted.len());
    for id in &wanted {
        let entity = entities::fetch_entity(conn, id)?
            .ok_or_else(|| Error::NotFound(format!("entity {id}")))?;
        exported.push(entity);
    }

    // Chunks cover ascending source ranges, so the concatenation keeps the
    // (source, target, type) order of a single query.
    let sources: Vec<EntityId> = wanted.iter().map(|id| (*id).clone()).collect();
    let mut edges = Vec::new();
    for chunk in sources.chunks(EXPORT_CHUNK) {
        let filter = RelationFilter {
            sources: chunk.to_vec(),
            ..RelationFilter::default()
        };
        edges.extend(
            query_relations(conn, &filter)?
                .into_iter()
                .filter(|relation| wanted.contains(&relation.target)),
        );
    }

    Ok(GraphData {
        entities: exported,
        relations: edges,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Store;
    use crate::types::RelationType;

    #[test]
    fn subset_export_spans_several_chunks() {
        let conn = Connection::open_in_memory().expect("in-memory database should open");
        Store::initialize(&conn).expect("schema should apply");

        let count = EXPORT_CHUNK * 2 + 3;
        let mut ids = Vec::with_capacity(count);
        for i in 0..count {
            let entity = entities::insert_entity(&conn, &NewEntity::new("task", format!("t{i}")))
                .expect("entity should be created");
            ids.push(entity.id);
        }
        for pair in ids.windows(2) {
            relations::insert_relation(
                &conn,
                &NewRelation::new(pair[0].clone(), pair[1].clone(), RelationType::Requires),
            )
            .expect("relation should be created");
        }

        let full = export_graph(&conn, None).expect("full export should run");
        let subset = export_graph(&conn, Some(&ids)).expect("subset export should run");

        assert_eq!(subset.relations.len(), count - 1);
        assert_eq!(subset.relations, full.relations);

        // Dropping one end entity drops its single edge
        let trimmed = export_graph(&conn, Some(&ids[1..])).expect("subset export should run");
        assert_eq!(trimmed.entities.len(), count - 1);
        assert_eq!(trimmed.relations.len(), count - 2);
    }
}
