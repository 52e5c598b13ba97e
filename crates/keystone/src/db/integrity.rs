//! Integrity validation.
//!
//! Hard errors describe states the store should never be in and come with a
//! machine-applicable fix. Warnings flag data that is valid but suspicious.

use rusqlite::Connection;
use serde::Serialize;

use super::relations::find_adjacency_drift;
use crate::error::Result;
use crate::types::ResolutionStatus;

/// Confidence below which unverified provenance is flagged.
pub const LOW_CONFIDENCE_THRESHOLD: f64 = 0.5;

/// Category of an integrity finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrityIssueKind {
    /// An edge references an entity that does not exist
    OrphanRelation,
    /// Cached adjacency disagrees with the relations table
    AdjacencyDrift,
    /// Deprecated entity without a deprecation message
    DeprecatedWithoutMessage,
    /// Entity records conflicts but is not marked resolved
    UnresolvedConflict,
    /// Unverified provenance with confidence below the threshold
    LowConfidence,
}

/// How to repair a hard error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrityFix {
    /// Execute this SQL statement
    Sql(String),
    /// Call [`crate::Store::rebuild_adjacency`]
    RebuildAdjacency,
}

/// A single finding.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IntegrityIssue {
    /// Category
    pub kind: IntegrityIssueKind,
    /// Id of the entity or relation concerned
    pub subject: String,
    /// Human-readable description
    pub message: String,
    /// Repair, for hard errors
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fix: Option<IntegrityFix>,
}

/// Result of [`crate::Store::validate_integrity`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IntegrityReport {
    /// Hard errors
    pub errors: Vec<IntegrityIssue>,
    /// Soft warnings
    pub warnings: Vec<IntegrityIssue>,
}

impl IntegrityReport {
    /// No hard errors were found.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.errors.is_empty()
    }
}

pub(crate) fn validate_integrity(conn: &Connection) -> Result<IntegrityReport> {
    let mut report = IntegrityReport::default();

    check_orphan_relations(conn, &mut report)?;
    check_adjacency(conn, &mut report)?;
    check_warnings(conn, &mut report)?;

    for issue in &report.errors {
        tracing::warn!(kind = ?issue.kind, subject = %issue.subject, "{}", issue.message);
    }
    tracing::info!(
        errors = report.errors.len(),
        warnings = report.warnings.len(),
        "Integrity check finished"
    );
    Ok(report)
}

fn check_orphan_relations(conn: &Connection, report: &mut IntegrityReport) -> Result<()> {
    let mut stmt = conn.prepare(
        "SELECT r.id, r.source, r.target,
                s.id IS NULL AS missing_source, t.id IS NULL AS missing_target
         FROM relations r
         LEFT JOIN entities s ON s.id = r.source
         LEFT JOIN entities t ON t.id = r.target
         WHERE s.id IS NULL OR t.id IS NULL
         ORDER BY r.id",
    )?;
    let orphans = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, bool>(3)?,
                row.get::<_, bool>(4)?,
            ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    for (id, source, target, missing_source, missing_target) in orphans {
        let missing = match (missing_source, missing_target) {
            (true, true) => format!("source {source} and target {target}"),
            (true, false) => format!("source {source}"),
            _ => format!("target {target}"),
        };
        report.errors.push(IntegrityIssue {
            kind: IntegrityIssueKind::OrphanRelation,
            message: format!("relation {id} references missing {missing}"),
            fix: Some(IntegrityFix::Sql(format!(
                "DELETE FROM relations WHERE id = {};",
                sql_literal(&id)
            ))),
            subject: id,
        });
    }
    Ok(())
}

/// Quote a value as an `SQLite` string literal.
fn sql_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn check_adjacency(conn: &Connection, report: &mut IntegrityReport) -> Result<()> {
    for drift in find_adjacency_drift(conn)? {
        report.errors.push(IntegrityIssue {
            kind: IntegrityIssueKind::AdjacencyDrift,
            message: format!(
                "cached adjacency of entity {} is out of sync with the relations table",
                drift.entity
            ),
            subject: drift.entity.to_string(),
            fix: Some(IntegrityFix::RebuildAdjacency),
        });
    }
    Ok(())
}

fn check_warnings(conn: &Connection, report: &mut IntegrityReport) -> Result<()> {
    let mut stmt = conn.prepare(
        "SELECT id FROM entities
         WHERE deprecated = 1 AND (deprecation_message IS NULL OR deprecation_message = '')
         ORDER BY id",
    )?;
    for id in stmt.query_map([], |row| row.get::<_, String>(0))? {
        let id = id?;
        report.warnings.push(IntegrityIssue {
            kind: IntegrityIssueKind::DeprecatedWithoutMessage,
            message: format!("entity {id} is deprecated without a deprecation message"),
            subject: id,
            fix: None,
        });
    }

    let mut stmt = conn.prepare(
        "SELECT id, json_array_length(conflicts) FROM entities
         WHERE json_array_length(conflicts) > 0 AND resolution_status != ?1
         ORDER BY id",
    )?;
    let rows = stmt.query_map([ResolutionStatus::Resolved.as_str()], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
    })?;
    for row in rows {
        let (id, count) = row?;
        report.warnings.push(IntegrityIssue {
            kind: IntegrityIssueKind::UnresolvedConflict,
            message: format!("entity {id} has {count} unresolved conflict(s)"),
            subject: id,
            fix: None,
        });
    }

    for (table, noun) in [("entities", "entity"), ("relations", "relation")] {
        let sql = format!(
            "SELECT id, json_extract(provenance, '$.confidence') FROM {table}
             WHERE json_extract(provenance, '$.verified') = 0
               AND json_extract(provenance, '$.confidence') < ?1
             ORDER BY id"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([LOW_CONFIDENCE_THRESHOLD], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
        })?;
        for row in rows {
            let (id, confidence) = row?;
            report.warnings.push(IntegrityIssue {
                kind: IntegrityIssueKind::LowConfidence,
                message: format!(
                    "{noun} {id} has unverified provenance with confidence {confidence:.2}"
                ),
                subject: id,
                fix: None,
            });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::relations::rebuild_all_adjacency;
    use crate::db::{Store, entities, relations};
    use crate::types::{EntityId, NewEntity, NewRelation, RelationType};

    fn open() -> Connection {
        let conn = Connection::open_in_memory().expect("in-memory database should open");
        Store::initialize(&conn).expect("schema should apply");
        conn
    }

    /// `core -> app`, returning both ids.
    fn linked(conn: &Connection) -> (EntityId, EntityId) {
        let core = entities::insert_entity(conn, &NewEntity::new("npm", "core"))
            .expect("entity should be created")
            .id;
        let app = entities::insert_entity(conn, &NewEntity::new("npm", "app"))
            .expect("entity should be created")
            .id;
        relations::insert_relation(
            conn,
            &NewRelation::new(core.clone(), app.clone(), RelationType::Requires),
        )
        .expect("relation should be created");
        (core, app)
    }

    #[test]
    fn consistent_store_is_healthy() {
        let conn = open();
        linked(&conn);

        let report = validate_integrity(&conn).expect("validation should run");

        assert!(report.is_healthy());
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn stale_cache_is_drift_until_rebuilt() {
        let conn = open();
        let (core, _) = linked(&conn);
        conn.execute(
            "UPDATE entities SET dependents = '[]' WHERE id = ?1",
            [core.as_str()],
        )
        .expect("raw update should run");

        let report = validate_integrity(&conn).expect("validation should run");

        assert_eq!(report.errors.len(), 1);
        let issue = &report.errors[0];
        assert_eq!(issue.kind, IntegrityIssueKind::AdjacencyDrift);
        assert_eq!(issue.subject, core.as_str());
        assert_eq!(issue.fix, Some(IntegrityFix::RebuildAdjacency));

        assert_eq!(rebuild_all_adjacency(&conn).expect("rebuild should run"), 1);
        assert!(validate_integrity(&conn).expect("validation should run").is_healthy());
        assert_eq!(rebuild_all_adjacency(&conn).expect("rebuild should run"), 0);
    }

    #[test]
    fn unparseable_cache_counts_as_drift() {
        let conn = open();
        let (_, app) = linked(&conn);
        conn.execute(
            "UPDATE entities SET dependencies = 'not json' WHERE id = ?1",
            [app.as_str()],
        )
        .expect("raw update should run");

        let report = validate_integrity(&conn).expect("validation should run");

        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].subject, app.as_str());
        assert_eq!(rebuild_all_adjacency(&conn).expect("rebuild should run"), 1);
    }

    #[test]
    fn orphan_relation_fix_deletes_it() {
        let conn = open();
        let (core, _) = linked(&conn);
        conn.pragma_update(None, "foreign_keys", "OFF")
            .expect("pragma should apply");
        conn.execute(
            "INSERT INTO relations (id, source, target, relation_type, provenance, created_at, updated_at)
             VALUES ('rel-it''s', ?1, 'ent-ghost', 'requires', '{}',
                     '2024-01-01T00:00:00Z', '2024-01-01T00:00:00Z')",
            [core.as_str()],
        )
        .expect("raw insert should run");
        conn.pragma_update(None, "foreign_keys", "ON")
            .expect("pragma should apply");

        let report = validate_integrity(&conn).expect("validation should run");

        let orphan = report
            .errors
            .iter()
            .find(|issue| issue.kind == IntegrityIssueKind::OrphanRelation)
            .expect("orphan should be reported");
        assert_eq!(orphan.subject, "rel-it's");
        assert!(orphan.message.contains("target ent-ghost"));
        let Some(IntegrityFix::Sql(sql)) = &orphan.fix else {
            panic!("orphan fix should be SQL, got {:?}", orphan.fix);
        };
        assert_eq!(sql, "DELETE FROM relations WHERE id = 'rel-it''s';");

        conn.execute_batch(sql).expect("suggested fix should run");

        let remaining: i64 = conn
            .query_row("SELECT COUNT(*) FROM relations WHERE id = 'rel-it''s'", [], |row| {
                row.get(0)
            })
            .expect("count should run");
        assert_eq!(remaining, 0);
        assert!(validate_integrity(&conn).expect("validation should run").is_healthy());
    }

    #[test]
    fn literal_quoting_doubles_single_quotes() {
        assert_eq!(sql_literal("rel-abc"), "'rel-abc'");
        assert_eq!(sql_literal("a'; DROP TABLE entities; --"), "'a''; DROP TABLE entities; --'");
    }
}
