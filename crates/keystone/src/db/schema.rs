//! Database schema definition for Keystone.
//!
//! Structured metadata (properties, constraints, provenance, cached adjacency)
//! is stored as JSON text and queried with the `SQLite` JSON1 functions.
//! Unversioned entities store `''` as their version so the identity index
//! treats them as one value.

/// Database schema definition.
pub(crate) const SCHEMA: &str = r"
-- Entities (graph nodes)
CREATE TABLE IF NOT EXISTS entities (
    id TEXT PRIMARY KEY,
    domain TEXT NOT NULL,
    identifier TEXT NOT NULL,
    version TEXT NOT NULL DEFAULT '',
    properties TEXT NOT NULL DEFAULT '{}',
    deprecated INTEGER NOT NULL DEFAULT 0,
    deprecation_message TEXT,
    stability TEXT,
    dependencies TEXT NOT NULL DEFAULT '[]',
    dependents TEXT NOT NULL DEFAULT '[]',
    resolution_status TEXT NOT NULL DEFAULT 'unresolved',
    resolution_constraints TEXT NOT NULL DEFAULT '[]',
    conflicts TEXT NOT NULL DEFAULT '[]',
    last_validated TEXT,
    provenance TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE(domain, identifier, version)
);

CREATE INDEX IF NOT EXISTS idx_entities_domain ON entities(domain);
CREATE INDEX IF NOT EXISTS idx_entities_identifier ON entities(identifier);

-- Entity tags (join table)
CREATE TABLE IF NOT EXISTS entity_tags (
    entity_id TEXT NOT NULL REFERENCES entities(id) ON DELETE CASCADE,
    tag TEXT NOT NULL,
    PRIMARY KEY (entity_id, tag)
);

CREATE INDEX IF NOT EXISTS idx_entity_tags_tag ON entity_tags(tag);

-- Relations (directed edges, source -> target means target depends on source)
CREATE TABLE IF NOT EXISTS relations (
    id TEXT PRIMARY KEY,
    source TEXT NOT NULL REFERENCES entities(id) ON DELETE CASCADE,
    target TEXT NOT NULL REFERENCES entities(id) ON DELETE CASCADE,
    relation_type TEXT NOT NULL,
    constraints TEXT NOT NULL DEFAULT '[]',
    optional INTEGER NOT NULL DEFAULT 0,
    development INTEGER NOT NULL DEFAULT 0,
    peer INTEGER NOT NULL DEFAULT 0,
    scope TEXT,
    properties TEXT NOT NULL DEFAULT '{}',
    provenance TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE(source, target, relation_type)
);

CREATE INDEX IF NOT EXISTS idx_relations_source ON relations(source);
CREATE INDEX IF NOT EXISTS idx_relations_target ON relations(target);
CREATE INDEX IF NOT EXISTS idx_relations_type ON relations(relation_type);
";
