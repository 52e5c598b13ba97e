//! Helper functions for database row conversion and parsing.
//!
//! These utilities convert between database representations and domain types.
//! Also provides SQL column list constants so every query decodes rows the same way.

use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::Result;
use crate::types::{
    AdjacentRef, Entity, EntityId, EntityMetadata, Relation, RelationId, RelationMetadata,
    Resolution,
};

/// SQL column list for the entities table (aliased `e`).
///
/// Use with `row_to_entity` for consistent column ordering. The last column
/// aggregates the entity's tags into a JSON array.
pub(crate) const ENTITY_COLUMNS: &str = "e.id, e.domain, e.identifier, e.version, e.properties, \
     e.deprecated, e.deprecation_message, e.stability, e.dependencies, e.dependents, \
     e.resolution_status, e.resolution_constraints, e.conflicts, e.last_validated, \
     e.provenance, e.created_at, e.updated_at, \
     (SELECT json_group_array(t.tag) FROM entity_tags t WHERE t.entity_id = e.id)";

/// SQL column list for the relations table (aliased `r`).
///
/// Use with `row_to_relation` for consistent column ordering.
pub(crate) const RELATION_COLUMNS: &str = "r.id, r.source, r.target, r.relation_type, \
     r.constraints, r.optional, r.development, r.peer, r.scope, r.properties, r.provenance, \
     r.created_at, r.updated_at";

/// Parse a vocabulary value stored as text.
///
/// Returns an error for unrecognized values, indicating possible database corruption.
pub(crate) fn parse_column<T>(idx: usize, text: &str) -> rusqlite::Result<T>
where
    T: FromStr<Err = crate::error::Error>,
{
    text.parse::<T>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Text,
            format!("{e} in database. Database may be corrupted or from a newer version.").into(),
        )
    })
}

/// Decode a JSON text column.
fn json_column<T: DeserializeOwned>(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<T> {
    let text: String = row.get(idx)?;
    serde_json::from_str(&text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Decode an RFC 3339 timestamp column.
fn timestamp_column(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let text: String = row.get(idx)?;
    parse_timestamp(idx, &text)
}

fn parse_timestamp(idx: usize, text: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Encode a timestamp for storage.
pub(crate) fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Encode a value as JSON text for storage.
pub(crate) fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

/// Convert a database row to an Entity.
pub(crate) fn row_to_entity(row: &rusqlite::Row) -> rusqlite::Result<Entity> {
    let version: String = row.get(3)?;
    let tags: Vec<String> = json_column(row, 17)?;

    Ok(Entity {
        id: EntityId::from(row.get::<_, String>(0)?),
        domain: row.get(1)?,
        identifier: row.get(2)?,
        version: (!version.is_empty()).then_some(version),
        metadata: EntityMetadata {
            tags: tags.into_iter().collect(),
            properties: json_column(row, 4)?,
            deprecated: row.get(5)?,
            deprecation_message: row.get(6)?,
            stability: row
                .get::<_, Option<String>>(7)?
                .map(|s| parse_column(7, &s))
                .transpose()?,
        },
        dependencies: json_column::<Vec<AdjacentRef>>(row, 8)?,
        dependents: json_column::<Vec<AdjacentRef>>(row, 9)?,
        resolution: Resolution {
            status: parse_column(10, &row.get::<_, String>(10)?)?,
            constraints: json_column(row, 11)?,
            conflicts: json_column(row, 12)?,
            last_validated: row
                .get::<_, Option<String>>(13)?
                .map(|s| parse_timestamp(13, &s))
                .transpose()?,
        },
        provenance: json_column(row, 14)?,
        created_at: timestamp_column(row, 15)?,
        updated_at: timestamp_column(row, 16)?,
    })
}

/// Convert a database row to a Relation.
pub(crate) fn row_to_relation(row: &rusqlite::Row) -> rusqlite::Result<Relation> {
    Ok(Relation {
        id: RelationId::from(row.get::<_, String>(0)?),
        source: EntityId::from(row.get::<_, String>(1)?),
        target: EntityId::from(row.get::<_, String>(2)?),
        relation_type: parse_column(3, &row.get::<_, String>(3)?)?,
        constraints: json_column(row, 4)?,
        metadata: RelationMetadata {
            optional: row.get(5)?,
            development: row.get(6)?,
            peer: row.get(7)?,
            scope: row.get(8)?,
            properties: json_column(row, 9)?,
        },
        provenance: json_column(row, 10)?,
        created_at: timestamp_column(row, 11)?,
        updated_at: timestamp_column(row, 12)?,
    })
}
