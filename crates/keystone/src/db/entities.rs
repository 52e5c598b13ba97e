//! Entity CRUD operations.
//!
//! Every function works on a borrowed connection so the same code runs inside
//! a `Transaction`, inside a batch savepoint, or during import.

use std::collections::BTreeSet;

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};

use super::helpers::{ENTITY_COLUMNS, format_timestamp, row_to_entity, to_json};
use super::relations::{
    delete_relation_row, insert_relation_record, sync_adjacency, touching_relations,
};
use crate::error::{Error, Result};
use crate::id;
use crate::types::{
    AdjacentRef, Entity, EntityId, EntityPatch, NewEntity, Relation, merge_properties,
    validate_identity,
};

/// Fetch an entity by id.
pub(crate) fn fetch_entity(conn: &Connection, id: &EntityId) -> Result<Option<Entity>> {
    let sql = format!("SELECT {ENTITY_COLUMNS} FROM entities e WHERE e.id = ?1");
    let entity = conn
        .query_row(&sql, [id.as_str()], row_to_entity)
        .optional()?;
    Ok(entity)
}

/// Fetch an entity by id, failing with `NotFound` when it is absent.
pub(crate) fn require_entity(conn: &Connection, id: &EntityId) -> Result<Entity> {
    fetch_entity(conn, id)?.ok_or_else(|| Error::NotFound(format!("entity {id}")))
}

/// Whether an entity with this id exists.
pub(crate) fn entity_exists(conn: &Connection, id: &EntityId) -> Result<bool> {
    let exists = conn
        .query_row("SELECT 1 FROM entities WHERE id = ?1", [id.as_str()], |_| {
            Ok(())
        })
        .optional()?
        .is_some();
    Ok(exists)
}

/// Fetch an entity by its `(domain, identifier, version)` identity.
pub(crate) fn fetch_entity_by_identity(
    conn: &Connection,
    domain: &str,
    identifier: &str,
    version: Option<&str>,
) -> Result<Option<Entity>> {
    let sql = format!(
        "SELECT {ENTITY_COLUMNS} FROM entities e \
         WHERE e.domain = ?1 AND e.identifier = ?2 AND e.version = ?3"
    );
    let entity = conn
        .query_row(
            &sql,
            params![domain, identifier, version.unwrap_or("")],
            row_to_entity,
        )
        .optional()?;
    Ok(entity)
}

/// Create an entity from caller input, filling defaults.
pub(crate) fn insert_entity(conn: &Connection, new: &NewEntity) -> Result<Entity> {
    new.validate()?;

    let now = Utc::now();
    let record = Entity {
        id: new.id(),
        domain: new.domain.clone(),
        identifier: new.identifier.clone(),
        version: new.normalized_version().map(str::to_string),
        metadata: new.metadata.clone(),
        dependencies: Vec::new(),
        dependents: Vec::new(),
        resolution: new.resolution.clone().unwrap_or_default(),
        provenance: new.provenance.clone().unwrap_or_default(),
        created_at: now,
        updated_at: now,
    };

    insert_entity_record(conn, &record)
}

/// Insert a complete entity record, keeping its id and timestamps.
///
/// Cached adjacency is not taken from the record; it is derived from the
/// relations table as edges are inserted.
pub(crate) fn insert_entity_record(conn: &Connection, entity: &Entity) -> Result<Entity> {
    if !id::is_valid_id(entity.id.as_str(), id::ENTITY_PREFIX) {
        return Err(Error::InvalidInput(format!("malformed entity id {:?}", entity.id.as_str())));
    }
    validate_identity(&entity.domain, &entity.identifier)?;
    entity.provenance.validate()?;

    if entity_exists(conn, &entity.id)? {
        return Err(Error::AlreadyExists(format!("entity {}", entity.id)));
    }
    let version = entity.version.as_deref().filter(|v| !v.is_empty());
    if let Some(existing) =
        fetch_entity_by_identity(conn, &entity.domain, &entity.identifier, version)?
    {
        return Err(Error::AlreadyExists(format!(
            "entity {} already holds identity {}",
            existing.id,
            existing.display_name()
        )));
    }

    conn.execute(
        "INSERT INTO entities (
            id, domain, identifier, version, properties, deprecated, deprecation_message,
            stability, dependencies, dependents, resolution_status, resolution_constraints,
            conflicts, last_validated, provenance, created_at, updated_at
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, '[]', '[]', ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
        params![
            entity.id.as_str(),
            entity.domain,
            entity.identifier,
            version.unwrap_or(""),
            to_json(&entity.metadata.properties)?,
            entity.metadata.deprecated,
            entity.metadata.deprecation_message,
            entity.metadata.stability.map(|s| s.as_str()),
            entity.resolution.status.as_str(),
            to_json(&entity.resolution.constraints)?,
            to_json(&entity.resolution.conflicts)?,
            entity.resolution.last_validated.as_ref().map(format_timestamp),
            to_json(&entity.provenance)?,
            format_timestamp(&entity.created_at),
            format_timestamp(&entity.updated_at),
        ],
    )?;
    replace_tags(conn, &entity.id, &entity.metadata.tags)?;

    tracing::debug!(
        entity_id = %entity.id,
        domain = %entity.domain,
        identifier = %entity.identifier,
        "Created entity"
    );

    require_entity(conn, &entity.id)
}

/// Apply a partial update to an entity.
///
/// An identity change moves the entity to the id derived from the new
/// identity, so the returned entity may carry a different id than `id`.
pub(crate) fn apply_entity_patch(
    conn: &Connection,
    id: &EntityId,
    patch: &EntityPatch,
) -> Result<Entity> {
    let mut entity = require_entity(conn, id)?;
    let old_identity = (
        entity.domain.clone(),
        entity.identifier.clone(),
        entity.version.clone(),
    );

    if let Some(domain) = &patch.domain {
        entity.domain.clone_from(domain);
    }
    if let Some(identifier) = &patch.identifier {
        entity.identifier.clone_from(identifier);
    }
    if let Some(version) = &patch.version {
        entity.version = version.clone().filter(|v| !v.is_empty());
    }
    validate_identity(&entity.domain, &entity.identifier)?;

    let identity_changed = old_identity.0 != entity.domain
        || old_identity.1 != entity.identifier
        || old_identity.2 != entity.version;
    if identity_changed {
        let collision = fetch_entity_by_identity(
            conn,
            &entity.domain,
            &entity.identifier,
            entity.version.as_deref(),
        )?;
        if let Some(other) = collision.filter(|other| other.id != entity.id) {
            return Err(Error::AlreadyExists(format!(
                "entity {} already holds identity {}",
                other.id,
                other.display_name()
            )));
        }

        let derived = id::entity_id(&entity.domain, &entity.identifier, entity.version.as_deref());
        if derived != entity.id {
            if entity_exists(conn, &derived)? {
                return Err(Error::AlreadyExists(format!("entity {derived}")));
            }
            rekey_entity(conn, &entity, &derived)?;
            entity.id = derived;
        }
    }

    if let Some(tags) = &patch.tags {
        entity.metadata.tags.clone_from(tags);
    }
    merge_properties(
        &mut entity.metadata.properties,
        &patch.properties,
        &patch.remove_properties,
    );
    if let Some(deprecated) = patch.deprecated {
        entity.metadata.deprecated = deprecated;
    }
    if let Some(message) = &patch.deprecation_message {
        entity.metadata.deprecation_message.clone_from(message);
    }
    if let Some(stability) = patch.stability {
        entity.metadata.stability = stability;
    }
    if let Some(resolution) = &patch.resolution {
        entity.resolution = resolution.clone();
    }
    if let Some(provenance) = &patch.provenance {
        provenance.validate()?;
        entity.provenance = provenance.clone();
    }
    entity.updated_at = Utc::now();

    conn.execute(
        "UPDATE entities SET
            domain = ?2, identifier = ?3, version = ?4, properties = ?5, deprecated = ?6,
            deprecation_message = ?7, stability = ?8, resolution_status = ?9,
            resolution_constraints = ?10, conflicts = ?11, last_validated = ?12,
            provenance = ?13, updated_at = ?14
         WHERE id = ?1",
        params![
            entity.id.as_str(),
            entity.domain,
            entity.identifier,
            entity.version.as_deref().unwrap_or(""),
            to_json(&entity.metadata.properties)?,
            entity.metadata.deprecated,
            entity.metadata.deprecation_message,
            entity.metadata.stability.map(|s| s.as_str()),
            entity.resolution.status.as_str(),
            to_json(&entity.resolution.constraints)?,
            to_json(&entity.resolution.conflicts)?,
            entity.resolution.last_validated.as_ref().map(format_timestamp),
            to_json(&entity.provenance)?,
            format_timestamp(&entity.updated_at),
        ],
    )?;
    if patch.tags.is_some() {
        replace_tags(conn, &entity.id, &entity.metadata.tags)?;
    }

    tracing::debug!(entity_id = %entity.id, identity_changed, "Updated entity");

    require_entity(conn, &entity.id)
}

/// Replace the entity holding this identity, or create it.
///
/// An existing entity keeps only its id, `created_at` and the adjacency
/// derived from its edges; everything else comes from `new` over defaults.
pub(crate) fn upsert_entity(conn: &Connection, new: &NewEntity) -> Result<Entity> {
    new.validate()?;

    match fetch_entity_by_identity(conn, &new.domain, &new.identifier, new.normalized_version())? {
        Some(existing) => {
            let patch = EntityPatch::from_upsert(new, &existing.metadata.properties);
            apply_entity_patch(conn, &existing.id, &patch)
        }
        None => insert_entity(conn, new),
    }
}

/// Move an entity row, its tags and every touching edge to a new id.
///
/// Edges are re-inserted under ids derived from their new endpoints, which
/// re-derives the cached adjacency of every neighbour.
fn rekey_entity(conn: &Connection, entity: &Entity, new_id: &EntityId) -> Result<()> {
    let old_id = &entity.id;
    let edges = touching_relations(conn, old_id)?;
    for edge in &edges {
        delete_relation_row(conn, &edge.id)?;
    }

    conn.execute("DELETE FROM entity_tags WHERE entity_id = ?1", [old_id.as_str()])?;
    conn.execute(
        "UPDATE entities SET id = ?2, dependencies = '[]', dependents = '[]' WHERE id = ?1",
        params![old_id.as_str(), new_id.as_str()],
    )?;
    replace_tags(conn, new_id, &entity.metadata.tags)?;

    let now = Utc::now();
    let moved = edges.len();
    for edge in edges {
        let remap = |end: &EntityId| {
            if end == old_id {
                new_id.clone()
            } else {
                end.clone()
            }
        };
        let source = remap(&edge.source);
        let target = remap(&edge.target);
        insert_relation_record(
            conn,
            &Relation {
                id: id::relation_id(&source, &target, edge.relation_type),
                source,
                target,
                updated_at: now,
                ..edge
            },
        )?;
    }

    tracing::debug!(
        old_id = %old_id,
        new_id = %new_id,
        moved_relations = moved,
        "Re-keyed entity"
    );
    Ok(())
}

/// Delete an entity, optionally removing every edge that references it.
pub(crate) fn delete_entity(conn: &Connection, id: &EntityId, cascade: bool) -> Result<()> {
    if !entity_exists(conn, id)? {
        return Err(Error::NotFound(format!("entity {id}")));
    }

    let edges = touching_relations(conn, id)?;
    if !edges.is_empty() && !cascade {
        return Err(Error::ConstraintViolation(format!(
            "entity {id} is referenced by {} relation(s); delete with cascade to remove them",
            edges.len()
        )));
    }

    let mut neighbours = BTreeSet::new();
    for edge in &edges {
        delete_relation_row(conn, &edge.id)?;
        let other = if &edge.source == id {
            &edge.target
        } else {
            &edge.source
        };
        neighbours.insert(other.clone());
    }

    conn.execute("DELETE FROM entities WHERE id = ?1", [id.as_str()])?;
    for neighbour in &neighbours {
        sync_adjacency(conn, neighbour)?;
    }

    tracing::debug!(
        entity_id = %id,
        removed_relations = edges.len(),
        "Deleted entity"
    );
    Ok(())
}

/// Entities this one depends on, from the cached adjacency list.
pub(crate) fn dependencies_of(conn: &Connection, id: &EntityId) -> Result<Vec<Entity>> {
    let entity = require_entity(conn, id)?;
    resolve_refs(conn, &entity.dependencies)
}

/// Entities depending on this one, from the cached adjacency list.
pub(crate) fn dependents_of(conn: &Connection, id: &EntityId) -> Result<Vec<Entity>> {
    let entity = require_entity(conn, id)?;
    resolve_refs(conn, &entity.dependents)
}

fn resolve_refs(conn: &Connection, refs: &[AdjacentRef]) -> Result<Vec<Entity>> {
    let mut seen = BTreeSet::new();
    let mut entities = Vec::new();
    for adjacent in refs {
        if !seen.insert(&adjacent.entity) {
            continue;
        }
        match fetch_entity(conn, &adjacent.entity)? {
            Some(entity) => entities.push(entity),
            None => tracing::warn!(
                entity_id = %adjacent.entity,
                relation_id = %adjacent.relation,
                "Cached adjacency points at a missing entity"
            ),
        }
    }
    Ok(entities)
}

fn replace_tags(conn: &Connection, id: &EntityId, tags: &BTreeSet<String>) -> Result<()> {
    conn.execute("DELETE FROM entity_tags WHERE entity_id = ?1", [id.as_str()])?;
    let mut stmt = conn.prepare_cached("INSERT INTO entity_tags (entity_id, tag) VALUES (?1, ?2)")?;
    for tag in tags {
        stmt.execute(params![id.as_str(), tag])?;
    }
    Ok(())
}
