//! CLI command implementations.

mod display;

pub mod bottlenecks;
pub mod check;
pub mod critical_path;
pub mod cycles;
pub mod export;
pub mod impact;
pub mod import;
pub mod maintenance;
pub mod order;
pub mod path;
pub mod stats;

use std::path::{Path, PathBuf};

use keystone::id::{ENTITY_PREFIX, is_valid_id};
use keystone::{Config, EntityId, Error, GraphView, Result, SnapshotOptions, Store};

/// Settings shared by every command.
pub struct Context {
    db: PathBuf,
    config: Config,
}

impl Context {
    /// Resolve the database path and load the configuration file if present.
    pub fn new(db: PathBuf, config_path: &Path) -> Result<Self> {
        let config = Config::load_or_default(config_path)?;
        Ok(Self { db, config })
    }

    pub fn db_path(&self) -> &Path {
        &self.db
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Open (or create) the store.
    pub fn open_store(&self) -> Result<Store> {
        Store::open(&self.db)
    }

    /// Snapshot the whole store within the configured ceilings.
    pub fn load_view(&self, store: &Store) -> Result<GraphView> {
        let options = SnapshotOptions::default().with_limits(self.config.snapshot);
        GraphView::load(store, &options)
    }
}

/// An entity named on the command line.
#[derive(Debug, PartialEq, Eq)]
enum EntityRef<'a> {
    Id(&'a str),
    Identity {
        domain: &'a str,
        identifier: &'a str,
        version: Option<&'a str>,
    },
}

/// Parse `ent-...` or `domain:identifier[@version]`.
fn parse_reference(reference: &str) -> Result<EntityRef<'_>> {
    if is_valid_id(reference, ENTITY_PREFIX) {
        return Ok(EntityRef::Id(reference));
    }
    let Some((domain, rest)) = reference.split_once(':') else {
        return Err(Error::InvalidInput(format!(
            "'{reference}' is neither an entity id nor domain:identifier[@version]"
        )));
    };
    let (identifier, version) = match rest.rsplit_once('@') {
        Some((identifier, version)) if !identifier.is_empty() => (identifier, Some(version)),
        _ => (rest, None),
    };
    if domain.is_empty() || identifier.is_empty() {
        return Err(Error::InvalidInput(format!(
            "'{reference}' is missing a domain or identifier"
        )));
    }
    Ok(EntityRef::Identity {
        domain,
        identifier,
        version: version.filter(|v| !v.is_empty()),
    })
}

/// Resolve a command-line reference to the id of a stored entity.
pub fn resolve_entity(store: &Store, reference: &str) -> Result<EntityId> {
    let entity = match parse_reference(reference)? {
        EntityRef::Id(id) => store.get_entity(&EntityId::from(id))?,
        EntityRef::Identity {
            domain,
            identifier,
            version,
        } => store.get_entity_by_identity(domain, identifier, version)?,
    };
    entity
        .map(|e| e.id)
        .ok_or_else(|| Error::NotFound(format!("entity {reference}")))
}

/// Human-readable name for an id, falling back to the id itself.
pub fn display_name(view: &GraphView, id: &EntityId) -> String {
    view.entity(id)
        .map_or_else(|| id.to_string(), keystone::Entity::display_name)
}
