//! `SQLite` storage layer for Keystone.
//!
//! This module manages the `SQLite` database that stores entities, relations
//! and their metadata. `SQLite` is the source of truth for all persistent data.
//! See the `graph` module for in-memory algorithms built on snapshots of it.
//!
//! ## Module Structure
//!
//! - `schema` - Database schema (DDL)
//! - `helpers` - Row conversion and parsing utilities
//! - `entities` - Entity CRUD operations
//! - `relations` - Relation CRUD operations and cached adjacency
//! - `filters` - Entity and relation query filters
//! - `transaction` - Explicit transactions
//! - `batch` - Batch execution, import and export
//! - `integrity` - Integrity validation

mod batch;
mod entities;
mod filters;
mod helpers;
mod integrity;
mod relations;
mod schema;
mod transaction;

pub use batch::{BatchOperation, BatchOutcome, GraphData};
pub use filters::{EntityFilter, RelationFilter};
pub use integrity::{
    IntegrityFix, IntegrityIssue, IntegrityIssueKind, IntegrityReport, LOW_CONFIDENCE_THRESHOLD,
};
pub use transaction::Transaction;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use rusqlite::{Connection, DatabaseName};
use serde::Serialize;

use crate::error::{Error, Result};
use crate::types::{
    Entity, EntityId, EntityPatch, NewEntity, NewRelation, Relation, RelationId, RelationPatch,
    RelationType,
};
use schema::SCHEMA;

/// Statistics about the store contents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    /// Number of entities
    pub entity_count: usize,
    /// Number of relations
    pub relation_count: usize,
    /// Entity count per domain
    pub entities_by_domain: BTreeMap<String, usize>,
    /// Relation count per type
    pub relations_by_type: BTreeMap<RelationType, usize>,
    /// Entities with status `resolved`
    pub resolved: usize,
    /// Entities with status `unresolved`
    pub unresolved: usize,
    /// Entities with status `conflict`
    pub conflict: usize,
    /// Database size (`page_count * page_size`)
    pub storage_bytes: u64,
    /// Number of declared indexes
    pub index_count: usize,
    /// Number of distinct tags
    pub tag_count: usize,
}

/// Embedded graph store backed by a single `SQLite` connection.
///
/// The connection is wrapped in a `Mutex` so a [`Transaction`] can hold it
/// exclusively for its lifetime. The inner `Option` is `None` after
/// [`Store::close`].
///
/// Calling a `Store` method while a transaction from the same store is alive
/// on the same thread blocks forever; use the transaction instead.
pub struct Store {
    conn: Mutex<Option<Connection>>,
    path: Option<PathBuf>,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store").field("path", &self.path).finish_non_exhaustive()
    }
}

impl Store {
    /// Open or create the store database.
    ///
    /// Creates parent directories, enables WAL and foreign keys, and applies
    /// the schema (idempotent).
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if the directory cannot be created and
    /// `Error::Database` if `SQLite` fails to open or migrate the file.
    pub fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::initialize(&conn)?;

        tracing::debug!(path = %path.display(), "Opened store");
        Ok(Self {
            conn: Mutex::new(Some(conn)),
            path: Some(path.to_path_buf()),
        })
    }

    /// Open a private in-memory store.
    ///
    /// # Errors
    ///
    /// Returns `Error::Database` if the schema cannot be applied.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::initialize(&conn)?;
        Ok(Self {
            conn: Mutex::new(Some(conn)),
            path: None,
        })
    }

    fn initialize(conn: &Connection) -> Result<()> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    /// Path of the database file, `None` for in-memory stores.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Close the connection. Every later call fails with `Error::Connection`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Connection` if the store is already closed and
    /// `Error::Database` if `SQLite` refuses to close.
    pub fn close(&self) -> Result<()> {
        let mut guard = self.lock()?;
        let conn = guard
            .take()
            .ok_or_else(|| Error::Connection("store is already closed".to_string()))?;
        conn.close().map_err(|(_, e)| Error::Database(e))?;
        tracing::debug!("Closed store");
        Ok(())
    }

    /// Whether [`Store::close`] has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.conn.lock().map_or(true, |guard| guard.is_none())
    }

    /// Acquire the connection lock.
    fn lock(&self) -> Result<MutexGuard<'_, Option<Connection>>> {
        self.conn.lock().map_err(|e| {
            Error::Internal(format!(
                "store connection mutex poisoned (a thread panicked while holding the lock): {e}"
            ))
        })
    }

    /// Run a read against the open connection.
    fn read<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let guard = self.lock()?;
        let conn = guard
            .as_ref()
            .ok_or_else(|| Error::Connection("store is closed".to_string()))?;
        f(conn)
    }

    // === Transactions ===

    /// Start an explicit transaction holding the connection lock.
    ///
    /// # Errors
    ///
    /// Returns `Error::Connection` if the store is closed.
    pub fn begin_transaction(&self) -> Result<Transaction<'_>> {
        Transaction::begin(self.lock()?)
    }

    /// Run `f` in a transaction: commit on `Ok`, roll back on `Err`.
    ///
    /// # Errors
    ///
    /// Returns the error from `f`, or from beginning or committing.
    pub fn with_transaction<T>(
        &self,
        f: impl FnOnce(&mut Transaction<'_>) -> Result<T>,
    ) -> Result<T> {
        let mut tx = self.begin_transaction()?;
        match f(&mut tx) {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            Err(e) => {
                if tx.is_active() {
                    if let Err(rollback_err) = tx.rollback() {
                        tracing::warn!(error = %rollback_err, "Rollback after failure also failed");
                    }
                }
                Err(e)
            }
        }
    }

    // === Entities ===

    /// Create an entity. Fails with `AlreadyExists` when the derived id or
    /// the identity is taken.
    ///
    /// # Errors
    ///
    /// `InvalidInput` for bad input, `AlreadyExists` on collision.
    pub fn create_entity(&self, new: &NewEntity) -> Result<Entity> {
        self.with_transaction(|tx| tx.create_entity(new))
    }

    /// Fetch an entity by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is closed or the row fails to decode.
    pub fn get_entity(&self, id: &EntityId) -> Result<Option<Entity>> {
        self.read(|conn| entities::fetch_entity(conn, id))
    }

    /// Fetch an entity by `(domain, identifier, version)`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is closed or the row fails to decode.
    pub fn get_entity_by_identity(
        &self,
        domain: &str,
        identifier: &str,
        version: Option<&str>,
    ) -> Result<Option<Entity>> {
        self.read(|conn| entities::fetch_entity_by_identity(conn, domain, identifier, version))
    }

    /// Partially update an entity.
    ///
    /// Changing the domain, identifier or version re-keys the entity to the id
    /// derived from its new identity; its edges are re-keyed with it.
    ///
    /// # Errors
    ///
    /// `NotFound` if absent, `AlreadyExists` if the new identity or id is taken.
    pub fn update_entity(&self, id: &EntityId, patch: &EntityPatch) -> Result<Entity> {
        self.with_transaction(|tx| tx.update_entity(id, patch))
    }

    /// Replace the entity with this identity, or create it.
    ///
    /// A replaced entity keeps its id, creation time and edges. Every other
    /// field is taken from `new`, with defaults for what it omits.
    ///
    /// # Errors
    ///
    /// `InvalidInput` for bad input.
    pub fn upsert_entity(&self, new: &NewEntity) -> Result<Entity> {
        self.with_transaction(|tx| tx.upsert_entity(new))
    }

    /// Delete an entity. Without `cascade`, any referencing edge blocks the delete.
    ///
    /// # Errors
    ///
    /// `NotFound` if absent, `ConstraintViolation` if referenced and not cascading.
    pub fn delete_entity(&self, id: &EntityId, cascade: bool) -> Result<()> {
        self.with_transaction(|tx| tx.delete_entity(id, cascade))
    }

    /// Query entities. All set predicates are AND-ed.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is closed or a row fails to decode.
    pub fn query_entities(&self, filter: &EntityFilter) -> Result<Vec<Entity>> {
        self.read(|conn| filters::query_entities(conn, filter))
    }

    /// Entities the given one depends on.
    ///
    /// # Errors
    ///
    /// `NotFound` if the entity is absent.
    pub fn dependencies_of(&self, id: &EntityId) -> Result<Vec<Entity>> {
        self.read(|conn| entities::dependencies_of(conn, id))
    }

    /// Entities depending on the given one.
    ///
    /// # Errors
    ///
    /// `NotFound` if the entity is absent.
    pub fn dependents_of(&self, id: &EntityId) -> Result<Vec<Entity>> {
        self.read(|conn| entities::dependents_of(conn, id))
    }

    // === Relations ===

    /// Create an edge. Both endpoints must exist.
    ///
    /// # Errors
    ///
    /// `NotFound` for a missing endpoint, `ConstraintViolation` for a
    /// self-loop, `AlreadyExists` for a duplicate edge.
    pub fn create_relation(&self, new: &NewRelation) -> Result<Relation> {
        self.with_transaction(|tx| tx.create_relation(new))
    }

    /// Fetch an edge by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is closed or the row fails to decode.
    pub fn get_relation(&self, id: &RelationId) -> Result<Option<Relation>> {
        self.read(|conn| relations::fetch_relation(conn, id))
    }

    /// Fetch the edge of a type between two entities.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is closed or the row fails to decode.
    pub fn get_relation_between(
        &self,
        source: &EntityId,
        target: &EntityId,
        relation_type: RelationType,
    ) -> Result<Option<Relation>> {
        self.read(|conn| relations::fetch_relation_between(conn, source, target, relation_type))
    }

    /// Partially update an edge.
    ///
    /// # Errors
    ///
    /// `NotFound` if absent.
    pub fn update_relation(&self, id: &RelationId, patch: &RelationPatch) -> Result<Relation> {
        self.with_transaction(|tx| tx.update_relation(id, patch))
    }

    /// Replace the edge between the same endpoints with the same type, or create it.
    ///
    /// # Errors
    ///
    /// Same as [`Store::create_relation`].
    pub fn upsert_relation(&self, new: &NewRelation) -> Result<Relation> {
        self.with_transaction(|tx| tx.upsert_relation(new))
    }

    /// Delete an edge and repair both endpoints' caches.
    ///
    /// # Errors
    ///
    /// `NotFound` if absent.
    pub fn delete_relation(&self, id: &RelationId) -> Result<()> {
        self.with_transaction(|tx| tx.delete_relation(id))
    }

    /// Query edges. All set predicates are AND-ed.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is closed or a row fails to decode.
    pub fn query_relations(&self, filter: &RelationFilter) -> Result<Vec<Relation>> {
        self.read(|conn| filters::query_relations(conn, filter))
    }

    // === Batch and exchange ===

    /// Run mixed operations in one transaction, one savepoint per item.
    ///
    /// # Errors
    ///
    /// Per-item failures are reported in the outcome; an `Err` means the
    /// transaction itself failed.
    pub fn execute_batch(&self, operations: &[BatchOperation]) -> Result<BatchOutcome> {
        self.with_transaction(|tx| tx.execute_batch(operations))
    }

    /// Import entities then relations, each create-or-fail.
    ///
    /// # Errors
    ///
    /// Per-record failures are reported in the outcome; an `Err` means the
    /// transaction itself failed.
    pub fn import(&self, data: &GraphData) -> Result<BatchOutcome> {
        let mut tx = self.begin_transaction()?;
        let outcome = batch::import_graph(tx.conn()?, data)?;
        tx.commit()?;
        Ok(outcome)
    }

    /// Export the given entities (all when `None`) plus the edges between them.
    ///
    /// # Errors
    ///
    /// `NotFound` if a requested entity is absent.
    pub fn export(&self, ids: Option<&[EntityId]>) -> Result<GraphData> {
        self.read(|conn| batch::export_graph(conn, ids))
    }

    // === Maintenance ===

    /// Check for orphan edges, adjacency drift and suspicious data.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is closed or a query fails.
    pub fn validate_integrity(&self) -> Result<IntegrityReport> {
        self.read(integrity::validate_integrity)
    }

    /// Recompute cached adjacency from the relations table.
    ///
    /// Returns the number of entities whose caches were repaired.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is closed or a write fails.
    pub fn rebuild_adjacency(&self) -> Result<usize> {
        let mut tx = self.begin_transaction()?;
        let repaired = relations::rebuild_all_adjacency(tx.conn()?)?;
        tx.commit()?;
        tracing::info!(repaired, "Rebuilt adjacency caches");
        Ok(repaired)
    }

    /// Update query planner statistics and compact the file.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is closed or `SQLite` fails.
    pub fn optimize(&self) -> Result<()> {
        tracing::info!("Optimizing store");
        self.read(|conn| {
            conn.execute_batch("ANALYZE; PRAGMA optimize; VACUUM;")?;
            Ok(())
        })
    }

    /// Copy the live database to `dest` with the online backup API.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if the destination directory cannot be created and
    /// `Error::Database` if the backup fails.
    pub fn backup(&self, dest: &Path) -> Result<()> {
        if let Some(parent) = dest.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        self.read(|conn| {
            conn.backup(DatabaseName::Main, dest, None)?;
            Ok(())
        })?;
        tracing::info!(dest = %dest.display(), "Backed up store");
        Ok(())
    }

    /// Replace the live database with the contents of `src`.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` if `src` does not exist and
    /// `Error::Database` if the restore fails.
    pub fn restore(&self, src: &Path) -> Result<()> {
        if !src.exists() {
            return Err(Error::NotFound(format!("backup file {}", src.display())));
        }
        let mut guard = self.lock()?;
        let conn = guard
            .as_mut()
            .ok_or_else(|| Error::Connection("store is closed".to_string()))?;
        conn.restore(
            DatabaseName::Main,
            src,
            None::<fn(rusqlite::backup::Progress)>,
        )?;
        Self::initialize(conn)?;
        tracing::info!(src = %src.display(), "Restored store");
        Ok(())
    }

    /// Gather counts and storage figures.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is closed or a query fails.
    pub fn stats(&self) -> Result<StoreStats> {
        self.read(|conn| {
            let mut stats = StoreStats {
                entity_count: count(conn, "SELECT COUNT(*) FROM entities")?,
                relation_count: count(conn, "SELECT COUNT(*) FROM relations")?,
                index_count: count(
                    conn,
                    "SELECT COUNT(*) FROM sqlite_master \
                     WHERE type = 'index' AND name NOT LIKE 'sqlite_%'",
                )?,
                tag_count: count(conn, "SELECT COUNT(DISTINCT tag) FROM entity_tags")?,
                ..StoreStats::default()
            };

            let mut stmt =
                conn.prepare("SELECT domain, COUNT(*) FROM entities GROUP BY domain ORDER BY domain")?;
            for row in stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, to_count(row.get::<_, i64>(1)?)))
            })? {
                let (domain, n) = row?;
                stats.entities_by_domain.insert(domain, n);
            }

            let mut stmt = conn.prepare(
                "SELECT relation_type, COUNT(*) FROM relations GROUP BY relation_type",
            )?;
            for row in stmt.query_map([], |row| {
                Ok((
                    helpers::parse_column::<RelationType>(0, &row.get::<_, String>(0)?)?,
                    to_count(row.get::<_, i64>(1)?),
                ))
            })? {
                let (relation_type, n) = row?;
                stats.relations_by_type.insert(relation_type, n);
            }

            let mut stmt = conn
                .prepare("SELECT resolution_status, COUNT(*) FROM entities GROUP BY resolution_status")?;
            for row in stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, to_count(row.get::<_, i64>(1)?)))
            })? {
                let (status, n) = row?;
                match status.as_str() {
                    "resolved" => stats.resolved = n,
                    "conflict" => stats.conflict = n,
                    _ => stats.unresolved += n,
                }
            }

            let page_count: i64 = conn.query_row("PRAGMA page_count", [], |row| row.get(0))?;
            let page_size: i64 = conn.query_row("PRAGMA page_size", [], |row| row.get(0))?;
            stats.storage_bytes = u64::try_from(page_count.saturating_mul(page_size)).unwrap_or(0);

            Ok(stats)
        })
    }
}

fn count(conn: &Connection, sql: &str) -> Result<usize> {
    let n: i64 = conn.query_row(sql, [], |row| row.get(0))?;
    Ok(to_count(n))
}

/// `COUNT(*)` is never negative.
fn to_count(n: i64) -> usize {
    usize::try_from(n).unwrap_or_default()
}
