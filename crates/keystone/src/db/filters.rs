//! Query filters for entities and relations.
//!
//! Filters are plain structs with builder methods. Every predicate that is set
//! is AND-ed into a single SQL statement with positional parameters.

use rusqlite::Connection;
use rusqlite::types::Value;
use serde::{Deserialize, Serialize};

use super::helpers::{ENTITY_COLUMNS, RELATION_COLUMNS, row_to_entity, row_to_relation};
use crate::error::Result;
use crate::types::{
    ConstraintCategory, Entity, EntityId, Relation, RelationType, ResolutionStatus, Stability,
};

/// Predicates for [`crate::Store::query_entities`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EntityFilter {
    /// Entity domain is one of these
    pub domains: Vec<String>,
    /// Exact identifier, or a glob when it contains `*` or `?`
    pub identifier: Option<String>,
    /// Exact version
    pub version: Option<String>,
    /// Entity carries this tag
    pub tag: Option<String>,
    /// Deprecated flag
    pub deprecated: Option<bool>,
    /// Stability level
    pub stability: Option<Stability>,
    /// Resolution status is one of these
    pub statuses: Vec<ResolutionStatus>,
    /// Some touching edge carries constraints
    pub has_constraints: Option<bool>,
    /// Resolution conflict list is non-empty
    pub has_conflicts: Option<bool>,
    /// Maximum number of results
    pub limit: Option<usize>,
}

impl EntityFilter {
    /// Match a single domain.
    #[must_use]
    pub fn domain(mut self, domain: impl Into<String>) -> Self {
        self.domains.push(domain.into());
        self
    }

    /// Match an identifier exactly or by glob pattern.
    #[must_use]
    pub fn identifier(mut self, pattern: impl Into<String>) -> Self {
        self.identifier = Some(pattern.into());
        self
    }

    /// Match an exact version.
    #[must_use]
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Require a tag.
    #[must_use]
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    /// Match the deprecated flag.
    #[must_use]
    pub fn deprecated(mut self, deprecated: bool) -> Self {
        self.deprecated = Some(deprecated);
        self
    }

    /// Match a stability level.
    #[must_use]
    pub fn stability(mut self, stability: Stability) -> Self {
        self.stability = Some(stability);
        self
    }

    /// Match a resolution status.
    #[must_use]
    pub fn status(mut self, status: ResolutionStatus) -> Self {
        self.statuses.push(status);
        self
    }

    /// Require (or exclude) constrained edges.
    #[must_use]
    pub fn has_constraints(mut self, value: bool) -> Self {
        self.has_constraints = Some(value);
        self
    }

    /// Require (or exclude) recorded conflicts.
    #[must_use]
    pub fn has_conflicts(mut self, value: bool) -> Self {
        self.has_conflicts = Some(value);
        self
    }

    /// Cap the number of results.
    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Predicates for [`crate::Store::query_relations`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelationFilter {
    /// Source is one of these
    pub sources: Vec<EntityId>,
    /// Target is one of these
    pub targets: Vec<EntityId>,
    /// Relation type is one of these
    pub types: Vec<RelationType>,
    /// Optional flag
    pub optional: Option<bool>,
    /// Development flag
    pub development: Option<bool>,
    /// Exact scope
    pub scope: Option<String>,
    /// Some constraint has this category
    pub constraint_category: Option<ConstraintCategory>,
    /// Some constraint has this kind (same constraint as the category when both are set)
    pub constraint_kind: Option<String>,
    /// Maximum number of results
    pub limit: Option<usize>,
}

impl RelationFilter {
    /// Match a source entity.
    #[must_use]
    pub fn source(mut self, id: EntityId) -> Self {
        self.sources.push(id);
        self
    }

    /// Match a target entity.
    #[must_use]
    pub fn target(mut self, id: EntityId) -> Self {
        self.targets.push(id);
        self
    }

    /// Match a relation type.
    #[must_use]
    pub fn relation_type(mut self, relation_type: RelationType) -> Self {
        self.types.push(relation_type);
        self
    }

    /// Match the optional flag.
    #[must_use]
    pub fn optional(mut self, optional: bool) -> Self {
        self.optional = Some(optional);
        self
    }

    /// Match the development flag.
    #[must_use]
    pub fn development(mut self, development: bool) -> Self {
        self.development = Some(development);
        self
    }

    /// Match an exact scope.
    #[must_use]
    pub fn scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    /// Require a constraint of this category.
    #[must_use]
    pub fn constraint_category(mut self, category: ConstraintCategory) -> Self {
        self.constraint_category = Some(category);
        self
    }

    /// Require a constraint of this kind.
    #[must_use]
    pub fn constraint_kind(mut self, kind: impl Into<String>) -> Self {
        self.constraint_kind = Some(kind.into());
        self
    }

    /// Cap the number of results.
    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Accumulates `WHERE` clauses and their positional parameters.
#[derive(Default)]
struct QueryBuilder {
    clauses: Vec<String>,
    params: Vec<Value>,
}

impl QueryBuilder {
    fn push(&mut self, clause: impl Into<String>, params: impl IntoIterator<Item = Value>) {
        self.clauses.push(clause.into());
        self.params.extend(params);
    }

    fn push_in(&mut self, column: &str, values: Vec<Value>) {
        if values.is_empty() {
            return;
        }
        let placeholders = vec!["?"; values.len()].join(", ");
        self.push(format!("{column} IN ({placeholders})"), values);
    }

    fn finish(mut self, select: &str, order_by: &str, limit: Option<usize>) -> (String, Vec<Value>) {
        let mut sql = select.to_string();
        if !self.clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&self.clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY ");
        sql.push_str(order_by);
        if let Some(limit) = limit {
            sql.push_str(" LIMIT ?");
            self.params
                .push(Value::Integer(i64::try_from(limit).unwrap_or(i64::MAX)));
        }
        (sql, self.params)
    }
}

fn text(value: &str) -> Value {
    Value::Text(value.to_string())
}

fn flag(value: bool) -> Value {
    Value::Integer(i64::from(value))
}

/// Translate a `*`/`?` pattern to `SQLite` GLOB syntax, escaping `[`.
fn glob_pattern(pattern: &str) -> String {
    pattern.replace('[', "[[]")
}

fn is_pattern(identifier: &str) -> bool {
    identifier.contains(['*', '?'])
}

/// Run an entity query. Results are ordered by `(domain, identifier, version)`.
pub(crate) fn query_entities(conn: &Connection, filter: &EntityFilter) -> Result<Vec<Entity>> {
    let mut query = QueryBuilder::default();

    query.push_in("e.domain", filter.domains.iter().map(|d| text(d)).collect());
    if let Some(identifier) = &filter.identifier {
        if is_pattern(identifier) {
            query.push("e.identifier GLOB ?", [text(&glob_pattern(identifier))]);
        } else {
            query.push("e.identifier = ?", [text(identifier)]);
        }
    }
    if let Some(version) = &filter.version {
        query.push("e.version = ?", [text(version)]);
    }
    if let Some(tag) = &filter.tag {
        query.push(
            "EXISTS (SELECT 1 FROM entity_tags t WHERE t.entity_id = e.id AND t.tag = ?)",
            [text(tag)],
        );
    }
    if let Some(deprecated) = filter.deprecated {
        query.push("e.deprecated = ?", [flag(deprecated)]);
    }
    if let Some(stability) = filter.stability {
        query.push("e.stability = ?", [text(stability.as_str())]);
    }
    query.push_in(
        "e.resolution_status",
        filter.statuses.iter().map(|s| text(s.as_str())).collect(),
    );
    if let Some(has_constraints) = filter.has_constraints {
        let exists = "EXISTS (SELECT 1 FROM relations r \
                      WHERE (r.source = e.id OR r.target = e.id) \
                      AND json_array_length(r.constraints) > 0)";
        if has_constraints {
            query.push(exists, []);
        } else {
            query.push(format!("NOT {exists}"), []);
        }
    }
    if let Some(has_conflicts) = filter.has_conflicts {
        let clause = if has_conflicts {
            "json_array_length(e.conflicts) > 0"
        } else {
            "json_array_length(e.conflicts) = 0"
        };
        query.push(clause, []);
    }

    let select = format!("SELECT {ENTITY_COLUMNS} FROM entities e");
    let (sql, params) = query.finish(&select, "e.domain, e.identifier, e.version", filter.limit);

    let mut stmt = conn.prepare(&sql)?;
    let entities = stmt
        .query_map(rusqlite::params_from_iter(params), row_to_entity)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(entities)
}

/// Run a relation query. Results are ordered by `(source, target, relation_type)`.
pub(crate) fn query_relations(conn: &Connection, filter: &RelationFilter) -> Result<Vec<Relation>> {
    let mut query = QueryBuilder::default();

    query.push_in(
        "r.source",
        filter.sources.iter().map(|id| text(id.as_str())).collect(),
    );
    query.push_in(
        "r.target",
        filter.targets.iter().map(|id| text(id.as_str())).collect(),
    );
    query.push_in(
        "r.relation_type",
        filter.types.iter().map(|t| text(t.as_str())).collect(),
    );
    if let Some(optional) = filter.optional {
        query.push("r.optional = ?", [flag(optional)]);
    }
    if let Some(development) = filter.development {
        query.push("r.development = ?", [flag(development)]);
    }
    if let Some(scope) = &filter.scope {
        query.push("r.scope = ?", [text(scope)]);
    }

    let mut constraint_clauses = Vec::new();
    let mut constraint_params = Vec::new();
    if let Some(category) = filter.constraint_category {
        constraint_clauses.push("json_extract(c.value, '$.category') = ?");
        constraint_params.push(text(category.as_str()));
    }
    if let Some(kind) = &filter.constraint_kind {
        constraint_clauses.push("json_extract(c.value, '$.kind') = ?");
        constraint_params.push(text(kind));
    }
    if !constraint_clauses.is_empty() {
        query.push(
            format!(
                "EXISTS (SELECT 1 FROM json_each(r.constraints) c WHERE {})",
                constraint_clauses.join(" AND ")
            ),
            constraint_params,
        );
    }

    let select = format!("SELECT {RELATION_COLUMNS} FROM relations r");
    let (sql, params) = query.finish(&select, "r.source, r.target, r.relation_type", filter.limit);

    let mut stmt = conn.prepare(&sql)?;
    let relations = stmt
        .query_map(rusqlite::params_from_iter(params), row_to_relation)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(relations)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::plain("react", false)]
    #[case::star("react-*", true)]
    #[case::question("v?", true)]
    fn detects_glob_patterns(#[case] identifier: &str, #[case] expected: bool) {
        assert_eq!(is_pattern(identifier), expected);
    }

    #[test]
    fn glob_escapes_bracket() {
        assert_eq!(glob_pattern("a[1]*"), "a[[]1]*");
    }

    #[test]
    fn builder_joins_clauses_and_appends_limit() {
        let mut query = QueryBuilder::default();
        query.push_in("x.a", vec![text("1"), text("2")]);
        query.push("x.b = ?", [flag(true)]);
        query.push_in("x.c", Vec::new());

        let (sql, params) = query.finish("SELECT * FROM x", "x.a", Some(5));

        assert_eq!(
            sql,
            "SELECT * FROM x WHERE x.a IN (?, ?) AND x.b = ? ORDER BY x.a LIMIT ?"
        );
        assert_eq!(params.len(), 4);
        assert_eq!(params[3], Value::Integer(5));
    }
}
