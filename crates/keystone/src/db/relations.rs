//! Relation CRUD operations and cached adjacency maintenance.
//!
//! Every edge write re-derives the cached `dependencies` / `dependents` lists
//! of both endpoints from the relations table before returning, so the caches
//! change in the same transaction as the edge.

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};

use super::entities::entity_exists;
use super::helpers::{RELATION_COLUMNS, format_timestamp, row_to_relation, to_json};
use crate::error::{Error, Result};
use crate::id;
use crate::types::{
    AdjacentRef, EntityId, NewRelation, Relation, RelationId, RelationPatch, RelationType,
    merge_properties,
};

/// Fetch a relation by id.
pub(crate) fn fetch_relation(conn: &Connection, id: &RelationId) -> Result<Option<Relation>> {
    let sql = format!("SELECT {RELATION_COLUMNS} FROM relations r WHERE r.id = ?1");
    let relation = conn
        .query_row(&sql, [id.as_str()], row_to_relation)
        .optional()?;
    Ok(relation)
}

/// Fetch a relation by id, failing with `NotFound` when it is absent.
pub(crate) fn require_relation(conn: &Connection, id: &RelationId) -> Result<Relation> {
    fetch_relation(conn, id)?.ok_or_else(|| Error::NotFound(format!("relation {id}")))
}

/// Fetch the edge of the given type between two entities.
pub(crate) fn fetch_relation_between(
    conn: &Connection,
    source: &EntityId,
    target: &EntityId,
    relation_type: RelationType,
) -> Result<Option<Relation>> {
    let sql = format!(
        "SELECT {RELATION_COLUMNS} FROM relations r \
         WHERE r.source = ?1 AND r.target = ?2 AND r.relation_type = ?3"
    );
    let relation = conn
        .query_row(
            &sql,
            params![source.as_str(), target.as_str(), relation_type.as_str()],
            row_to_relation,
        )
        .optional()?;
    Ok(relation)
}

/// Every edge with the entity at either end.
pub(crate) fn touching_relations(conn: &Connection, id: &EntityId) -> Result<Vec<Relation>> {
    let sql = format!(
        "SELECT {RELATION_COLUMNS} FROM relations r \
         WHERE r.source = ?1 OR r.target = ?1 ORDER BY r.id"
    );
    let mut stmt = conn.prepare(&sql)?;
    let relations = stmt
        .query_map([id.as_str()], row_to_relation)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(relations)
}

/// Create an edge from caller input.
pub(crate) fn insert_relation(conn: &Connection, new: &NewRelation) -> Result<Relation> {
    new.validate()?;

    let now = Utc::now();
    let record = Relation {
        id: new.id(),
        source: new.source.clone(),
        target: new.target.clone(),
        relation_type: new.relation_type,
        constraints: new.constraints.clone(),
        metadata: new.metadata.clone(),
        provenance: new.provenance.clone().unwrap_or_default(),
        created_at: now,
        updated_at: now,
    };

    insert_relation_record(conn, &record)
}

/// Insert a complete relation record, keeping its id and timestamps.
pub(crate) fn insert_relation_record(conn: &Connection, relation: &Relation) -> Result<Relation> {
    if !id::is_valid_id(relation.id.as_str(), id::RELATION_PREFIX) {
        return Err(Error::InvalidInput(format!(
            "malformed relation id {:?}",
            relation.id.as_str()
        )));
    }
    if relation.source == relation.target {
        return Err(Error::ConstraintViolation(format!(
            "self-referencing relation on {} is not allowed",
            relation.source
        )));
    }
    relation.provenance.validate()?;

    if !entity_exists(conn, &relation.source)? {
        return Err(Error::NotFound(format!(
            "source entity {} of relation",
            relation.source
        )));
    }
    if !entity_exists(conn, &relation.target)? {
        return Err(Error::NotFound(format!(
            "target entity {} of relation",
            relation.target
        )));
    }
    if fetch_relation(conn, &relation.id)?.is_some() {
        return Err(Error::AlreadyExists(format!("relation {}", relation.id)));
    }
    if let Some(existing) =
        fetch_relation_between(conn, &relation.source, &relation.target, relation.relation_type)?
    {
        return Err(Error::AlreadyExists(format!(
            "relation {} already links {} -> {} as {}",
            existing.id, relation.source, relation.target, relation.relation_type
        )));
    }

    conn.execute(
        "INSERT INTO relations (
            id, source, target, relation_type, constraints, optional, development, peer,
            scope, properties, provenance, created_at, updated_at
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            relation.id.as_str(),
            relation.source.as_str(),
            relation.target.as_str(),
            relation.relation_type.as_str(),
            to_json(&relation.constraints)?,
            relation.metadata.optional,
            relation.metadata.development,
            relation.metadata.peer,
            relation.metadata.scope,
            to_json(&relation.metadata.properties)?,
            to_json(&relation.provenance)?,
            format_timestamp(&relation.created_at),
            format_timestamp(&relation.updated_at),
        ],
    )?;
    sync_adjacency(conn, &relation.source)?;
    sync_adjacency(conn, &relation.target)?;

    tracing::debug!(
        relation_id = %relation.id,
        source = %relation.source,
        target = %relation.target,
        relation_type = %relation.relation_type,
        "Created relation"
    );

    require_relation(conn, &relation.id)
}

/// Apply a partial update to a relation. Endpoints and type never change.
pub(crate) fn apply_relation_patch(
    conn: &Connection,
    id: &RelationId,
    patch: &RelationPatch,
) -> Result<Relation> {
    let mut relation = require_relation(conn, id)?;

    if let Some(constraints) = &patch.constraints {
        relation.constraints.clone_from(constraints);
    }
    if let Some(optional) = patch.optional {
        relation.metadata.optional = optional;
    }
    if let Some(development) = patch.development {
        relation.metadata.development = development;
    }
    if let Some(peer) = patch.peer {
        relation.metadata.peer = peer;
    }
    if let Some(scope) = &patch.scope {
        relation.metadata.scope.clone_from(scope);
    }
    merge_properties(
        &mut relation.metadata.properties,
        &patch.properties,
        &patch.remove_properties,
    );
    if let Some(provenance) = &patch.provenance {
        provenance.validate()?;
        relation.provenance = provenance.clone();
    }
    relation.updated_at = Utc::now();

    conn.execute(
        "UPDATE relations SET
            constraints = ?2, optional = ?3, development = ?4, peer = ?5, scope = ?6,
            properties = ?7, provenance = ?8, updated_at = ?9
         WHERE id = ?1",
        params![
            relation.id.as_str(),
            to_json(&relation.constraints)?,
            relation.metadata.optional,
            relation.metadata.development,
            relation.metadata.peer,
            relation.metadata.scope,
            to_json(&relation.metadata.properties)?,
            to_json(&relation.provenance)?,
            format_timestamp(&relation.updated_at),
        ],
    )?;

    tracing::debug!(relation_id = %relation.id, "Updated relation");

    require_relation(conn, &relation.id)
}

/// Replace the edge between the same endpoints with the same type, or create it.
pub(crate) fn upsert_relation(conn: &Connection, new: &NewRelation) -> Result<Relation> {
    new.validate()?;

    match fetch_relation_between(conn, &new.source, &new.target, new.relation_type)? {
        Some(existing) => {
            let patch = RelationPatch::from_upsert(new, &existing.metadata.properties);
            apply_relation_patch(conn, &existing.id, &patch)
        }
        None => insert_relation(conn, new),
    }
}

/// Delete a relation and repair both endpoints' caches.
pub(crate) fn delete_relation(conn: &Connection, id: &RelationId) -> Result<()> {
    let relation = require_relation(conn, id)?;

    delete_relation_row(conn, id)?;
    sync_adjacency(conn, &relation.source)?;
    sync_adjacency(conn, &relation.target)?;

    tracing::debug!(
        relation_id = %id,
        source = %relation.source,
        target = %relation.target,
        "Deleted relation"
    );
    Ok(())
}

/// Remove the row only; the caller repairs adjacency.
pub(crate) fn delete_relation_row(conn: &Connection, id: &RelationId) -> Result<()> {
    conn.execute("DELETE FROM relations WHERE id = ?1", [id.as_str()])?;
    Ok(())
}

// ============================================================================
// Cached adjacency
// ============================================================================

/// Adjacency lists derived from the relations table: `(dependencies, dependents)`.
///
/// Both lists are ordered by the entity at the other end, then by relation id.
pub(crate) fn expected_adjacency(
    conn: &Connection,
    id: &EntityId,
) -> Result<(Vec<AdjacentRef>, Vec<AdjacentRef>)> {
    let dependencies = adjacent_refs(
        conn,
        "SELECT id, source FROM relations WHERE target = ?1 ORDER BY source, id",
        id,
    )?;
    let dependents = adjacent_refs(
        conn,
        "SELECT id, target FROM relations WHERE source = ?1 ORDER BY target, id",
        id,
    )?;
    Ok((dependencies, dependents))
}

fn adjacent_refs(conn: &Connection, sql: &str, id: &EntityId) -> Result<Vec<AdjacentRef>> {
    let mut stmt = conn.prepare_cached(sql)?;
    let refs = stmt
        .query_map([id.as_str()], |row| {
            Ok(AdjacentRef {
                relation: RelationId::from(row.get::<_, String>(0)?),
                entity: EntityId::from(row.get::<_, String>(1)?),
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(refs)
}

/// Rewrite an entity's cached lists from the relations table.
///
/// A missing entity is a no-op (the edge may reference a deleted endpoint
/// during cascade).
pub(crate) fn sync_adjacency(conn: &Connection, id: &EntityId) -> Result<()> {
    let (dependencies, dependents) = expected_adjacency(conn, id)?;
    conn.execute(
        "UPDATE entities SET dependencies = ?2, dependents = ?3 WHERE id = ?1",
        params![id.as_str(), to_json(&dependencies)?, to_json(&dependents)?],
    )?;
    Ok(())
}

/// An entity whose stored adjacency disagrees with the relations table.
#[derive(Debug)]
pub(crate) struct AdjacencyDrift {
    pub(crate) entity: EntityId,
    pub(crate) dependencies: Vec<AdjacentRef>,
    pub(crate) dependents: Vec<AdjacentRef>,
}

/// Find every entity whose cached lists are out of sync.
pub(crate) fn find_adjacency_drift(conn: &Connection) -> Result<Vec<AdjacencyDrift>> {
    let mut stmt = conn.prepare("SELECT id, dependencies, dependents FROM entities ORDER BY id")?;
    let stored = stmt
        .query_map([], |row| {
            Ok((
                EntityId::from(row.get::<_, String>(0)?),
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut drift = Vec::new();
    for (entity, stored_dependencies, stored_dependents) in stored {
        let (dependencies, dependents) = expected_adjacency(conn, &entity)?;
        // Unparseable caches count as drift rather than failing the scan
        let matches_dependencies = serde_json::from_str::<Vec<AdjacentRef>>(&stored_dependencies)
            .is_ok_and(|cached| sorted(cached) == sorted(dependencies.clone()));
        let matches_dependents = serde_json::from_str::<Vec<AdjacentRef>>(&stored_dependents)
            .is_ok_and(|cached| sorted(cached) == sorted(dependents.clone()));

        if !(matches_dependencies && matches_dependents) {
            drift.push(AdjacencyDrift {
                entity,
                dependencies,
                dependents,
            });
        }
    }
    Ok(drift)
}

fn sorted(mut refs: Vec<AdjacentRef>) -> Vec<AdjacentRef> {
    refs.sort();
    refs
}

/// Recompute every drifted cache. Returns the number of entities repaired.
pub(crate) fn rebuild_all_adjacency(conn: &Connection) -> Result<usize> {
    let drift = find_adjacency_drift(conn)?;
    for entry in &drift {
        conn.execute(
            "UPDATE entities SET dependencies = ?2, dependents = ?3 WHERE id = ?1",
            params![
                entry.entity.as_str(),
                to_json(&entry.dependencies)?,
                to_json(&entry.dependents)?
            ],
        )?;
    }
    Ok(drift.len())
}
