//! Explicit transactions over the store connection.
//!
//! A `Transaction` holds the connection lock for its whole lifetime, so other
//! callers of the same `Store` block until it commits or rolls back. Dropping
//! an active transaction rolls it back.

use std::sync::MutexGuard;

use rusqlite::Connection;

use super::batch::{BatchOperation, BatchOutcome, run_batch};
use super::filters::{EntityFilter, RelationFilter, query_entities, query_relations};
use super::{entities, relations};
use crate::error::{Error, Result};
use crate::types::{
    Entity, EntityId, EntityPatch, NewEntity, NewRelation, Relation, RelationId, RelationPatch,
    RelationType,
};

/// An open write transaction.
///
/// Exposes the same CRUD and query surface as [`crate::Store`]. Every call
/// after `commit` or `rollback` fails with [`Error::Transaction`].
pub struct Transaction<'s> {
    guard: MutexGuard<'s, Option<Connection>>,
    active: bool,
}

impl<'s> Transaction<'s> {
    /// Start a transaction on the locked connection.
    pub(crate) fn begin(guard: MutexGuard<'s, Option<Connection>>) -> Result<Self> {
        let conn = guard
            .as_ref()
            .ok_or_else(|| Error::Connection("store is closed".to_string()))?;
        conn.execute_batch("BEGIN IMMEDIATE")?;
        tracing::trace!("Transaction started");
        Ok(Self {
            guard,
            active: true,
        })
    }

    /// Whether the transaction can still be used.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active
    }

    pub(crate) fn conn(&self) -> Result<&Connection> {
        if !self.active {
            return Err(Error::Transaction(
                "transaction has already been committed or rolled back".to_string(),
            ));
        }
        self.guard
            .as_ref()
            .ok_or_else(|| Error::Connection("store is closed".to_string()))
    }

    /// Make every change since `begin` durable.
    ///
    /// # Errors
    ///
    /// Returns `Error::Transaction` if the transaction already finished, or
    /// `Error::Database` if `SQLite` refuses the commit.
    pub fn commit(&mut self) -> Result<()> {
        self.conn()?.execute_batch("COMMIT")?;
        self.active = false;
        tracing::trace!("Transaction committed");
        Ok(())
    }

    /// Discard every change since `begin`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Transaction` if the transaction already finished.
    pub fn rollback(&mut self) -> Result<()> {
        let result = self.conn()?.execute_batch("ROLLBACK");
        self.active = false;
        result?;
        tracing::trace!("Transaction rolled back");
        Ok(())
    }

    // === Entities ===

    /// See [`crate::Store::create_entity`].
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction finished or the create fails.
    pub fn create_entity(&mut self, new: &NewEntity) -> Result<Entity> {
        entities::insert_entity(self.conn()?, new)
    }

    /// See [`crate::Store::get_entity`].
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction finished or the query fails.
    pub fn get_entity(&self, id: &EntityId) -> Result<Option<Entity>> {
        entities::fetch_entity(self.conn()?, id)
    }

    /// See [`crate::Store::get_entity_by_identity`].
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction finished or the query fails.
    pub fn get_entity_by_identity(
        &self,
        domain: &str,
        identifier: &str,
        version: Option<&str>,
    ) -> Result<Option<Entity>> {
        entities::fetch_entity_by_identity(self.conn()?, domain, identifier, version)
    }

    /// See [`crate::Store::update_entity`].
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction finished or the update fails.
    pub fn update_entity(&mut self, id: &EntityId, patch: &EntityPatch) -> Result<Entity> {
        entities::apply_entity_patch(self.conn()?, id, patch)
    }

    /// See [`crate::Store::upsert_entity`].
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction finished or the write fails.
    pub fn upsert_entity(&mut self, new: &NewEntity) -> Result<Entity> {
        entities::upsert_entity(self.conn()?, new)
    }

    /// See [`crate::Store::delete_entity`].
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction finished or the delete fails.
    pub fn delete_entity(&mut self, id: &EntityId, cascade: bool) -> Result<()> {
        entities::delete_entity(self.conn()?, id, cascade)
    }

    /// See [`crate::Store::query_entities`].
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction finished or the query fails.
    pub fn query_entities(&self, filter: &EntityFilter) -> Result<Vec<Entity>> {
        query_entities(self.conn()?, filter)
    }

    /// See [`crate::Store::dependencies_of`].
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction finished or the entity is missing.
    pub fn dependencies_of(&self, id: &EntityId) -> Result<Vec<Entity>> {
        entities::dependencies_of(self.conn()?, id)
    }

    /// See [`crate::Store::dependents_of`].
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction finished or the entity is missing.
    pub fn dependents_of(&self, id: &EntityId) -> Result<Vec<Entity>> {
        entities::dependents_of(self.conn()?, id)
    }

    // === Relations ===

    /// See [`crate::Store::create_relation`].
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction finished or the create fails.
    pub fn create_relation(&mut self, new: &NewRelation) -> Result<Relation> {
        relations::insert_relation(self.conn()?, new)
    }

    /// See [`crate::Store::get_relation`].
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction finished or the query fails.
    pub fn get_relation(&self, id: &RelationId) -> Result<Option<Relation>> {
        relations::fetch_relation(self.conn()?, id)
    }

    /// See [`crate::Store::get_relation_between`].
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction finished or the query fails.
    pub fn get_relation_between(
        &self,
        source: &EntityId,
        target: &EntityId,
        relation_type: RelationType,
    ) -> Result<Option<Relation>> {
        relations::fetch_relation_between(self.conn()?, source, target, relation_type)
    }

    /// See [`crate::Store::update_relation`].
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction finished or the update fails.
    pub fn update_relation(&mut self, id: &RelationId, patch: &RelationPatch) -> Result<Relation> {
        relations::apply_relation_patch(self.conn()?, id, patch)
    }

    /// See [`crate::Store::upsert_relation`].
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction finished or the write fails.
    pub fn upsert_relation(&mut self, new: &NewRelation) -> Result<Relation> {
        relations::upsert_relation(self.conn()?, new)
    }

    /// See [`crate::Store::delete_relation`].
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction finished or the delete fails.
    pub fn delete_relation(&mut self, id: &RelationId) -> Result<()> {
        relations::delete_relation(self.conn()?, id)
    }

    /// See [`crate::Store::query_relations`].
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction finished or the query fails.
    pub fn query_relations(&self, filter: &RelationFilter) -> Result<Vec<Relation>> {
        query_relations(self.conn()?, filter)
    }

    // === Batch ===

    /// Run a batch inside this transaction, one savepoint per operation.
    ///
    /// # Errors
    ///
    /// Returns an error only if the transaction finished or a savepoint
    /// statement itself fails; per-operation failures land in the outcome.
    pub fn execute_batch(&mut self, operations: &[BatchOperation]) -> Result<BatchOutcome> {
        run_batch(self.conn()?, operations)
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if !self.active {
            return;
        }
        if let Some(conn) = self.guard.as_ref() {
            match conn.execute_batch("ROLLBACK") {
                Ok(()) => tracing::debug!("Rolled back transaction dropped without commit"),
                Err(e) => tracing::warn!(error = %e, "Failed to roll back dropped transaction"),
            }
        }
    }
}
