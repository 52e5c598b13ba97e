//! Domain types for the Keystone graph store.
//!
//! These types represent the core domain model:
//! - **Records**: `Entity`, `Relation` (stored in the database)
//! - **Inputs**: `NewEntity`, `EntityPatch`, `NewRelation`, `RelationPatch`
//! - **Attached facts**: `Provenance`, `Resolution`, `Constraint`
//!
//! ## Design Decisions
//!
//! | Decision | Choice | Rationale |
//! |----------|--------|-----------|
//! | Ids | Content-derived strings | Re-ingesting a fact yields the same id |
//! | Metadata | Closed scalar union | Queryable, no free dynamic typing |
//! | Adjacency | Cached on both endpoints | Direct neighbours without an edge scan |
//! | Vocabularies | Enums, stored as `snake_case` text | Typos fail at decode time |

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ============================================================================
// Strongly-typed ID wrappers
// ============================================================================

/// A strongly-typed entity id (`ent-` followed by 13 base36 characters).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    /// Borrow the raw id string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for EntityId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for EntityId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A strongly-typed relation id (`rel-` followed by 13 base36 characters).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RelationId(String);

impl RelationId {
    /// Borrow the raw id string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for RelationId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for RelationId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl fmt::Display for RelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Metadata
// ============================================================================

/// A single metadata value. Only scalars are allowed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    /// Boolean flag
    Bool(bool),
    /// Signed integer
    Int(i64),
    /// Floating point number
    Float(f64),
    /// Free text
    Text(String),
}

impl fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl From<bool> for MetadataValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for MetadataValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for MetadataValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

/// Ordered key/value property map attached to entities, relations and constraints.
pub type Metadata = BTreeMap<String, MetadataValue>;

// ============================================================================
// Enums
// ============================================================================

/// Implements `as_str`, `Display` and `FromStr` for a `snake_case` vocabulary enum.
macro_rules! vocabulary {
    ($name:ident, $label:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            /// All members of the vocabulary.
            pub const ALL: &'static [Self] = &[$(Self::$variant),+];

            /// Convert to database string representation.
            #[must_use]
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(Error::InvalidInput(format!(
                        "unknown {} '{}'", $label, other
                    ))),
                }
            }
        }
    };
}

/// Maturity of an entity's interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stability {
    /// May change or disappear without notice
    Experimental,
    /// Usable but still changing
    Unstable,
    /// Changes follow a deprecation cycle
    Stable,
    /// Frozen
    Locked,
}

vocabulary!(Stability, "stability", {
    Experimental => "experimental",
    Unstable => "unstable",
    Stable => "stable",
    Locked => "locked",
});

/// Whether an entity's constraints have been checked and satisfied.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStatus {
    /// Not yet checked
    #[default]
    Unresolved,
    /// All constraints satisfied
    Resolved,
    /// At least one conflict recorded
    Conflict,
}

vocabulary!(ResolutionStatus, "resolution status", {
    Unresolved => "unresolved",
    Resolved => "resolved",
    Conflict => "conflict",
});

/// Where a fact came from.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ProvenanceSource {
    /// Entered by hand
    #[default]
    UserInput,
    /// Extracted from documentation
    DocImport,
    /// Observed by measurement
    Measurement,
    /// Instantiated from a template
    Template,
    /// Contributed by the community
    Community,
    /// Derived from other facts
    Inferred,
    /// Fetched from an external API
    ExternalApi,
}

vocabulary!(ProvenanceSource, "provenance source", {
    UserInput => "user_input",
    DocImport => "doc_import",
    Measurement => "measurement",
    Template => "template",
    Community => "community",
    Inferred => "inferred",
    ExternalApi => "external_api",
});

/// Kind of a directed edge between two entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationType {
    /// Target needs the source to exist
    Requires,
    /// Source makes the target possible
    Enables,
    /// Source blocks the target until resolved
    Blocks,
    /// The two cannot coexist
    IncompatibleWith,
    /// Source must happen before the target
    Precedes,
    /// Source follows the target in sequence
    Follows,
    /// Source and target happen together
    Concurrent,
    /// Source contains the target
    Contains,
    /// Source is part of the target
    PartOf,
    /// Source supersedes the target
    Replaces,
}

vocabulary!(RelationType, "relation type", {
    Requires => "requires",
    Enables => "enables",
    Blocks => "blocks",
    IncompatibleWith => "incompatible_with",
    Precedes => "precedes",
    Follows => "follows",
    Concurrent => "concurrent",
    Contains => "contains",
    PartOf => "part_of",
    Replaces => "replaces",
});

/// Family of a constraint attached to an edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintCategory {
    /// Ordering and timing
    Temporal,
    /// Capacity, cost or availability
    Resource,
    /// Boolean conditions
    Logical,
    /// Shape of the graph around the edge
    Structural,
    /// Version ranges
    Version,
}

vocabulary!(ConstraintCategory, "constraint category", {
    Temporal => "temporal",
    Resource => "resource",
    Logical => "logical",
    Structural => "structural",
    Version => "version",
});

/// How strictly a constraint must hold.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintPriority {
    /// Must hold
    #[default]
    Hard,
    /// Should hold
    Soft,
    /// Nice to have
    Preference,
}

vocabulary!(ConstraintPriority, "constraint priority", {
    Hard => "hard",
    Soft => "soft",
    Preference => "preference",
});

// ============================================================================
// Attached facts
// ============================================================================

/// Origin and trust of an entity or relation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Provenance {
    /// Where the fact came from
    pub source: ProvenanceSource,
    /// Identifier within the source (document id, URL, ...)
    pub source_id: Option<String>,
    /// When the fact was discovered
    pub discovered_at: DateTime<Utc>,
    /// Who or what discovered it
    pub discovered_by: String,
    /// Confidence in `[0, 1]`
    pub confidence: f64,
    /// Whether a human confirmed it
    pub verified: bool,
}

impl Default for Provenance {
    fn default() -> Self {
        Self {
            source: ProvenanceSource::UserInput,
            source_id: None,
            discovered_at: Utc::now(),
            discovered_by: "unknown".to_string(),
            confidence: 1.0,
            verified: false,
        }
    }
}

impl Provenance {
    /// Provenance from the given source with every other field defaulted.
    #[must_use]
    pub fn from_source(source: ProvenanceSource) -> Self {
        Self {
            source,
            ..Self::default()
        }
    }

    /// Set the confidence.
    #[must_use]
    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    /// Set who discovered the fact.
    #[must_use]
    pub fn discovered_by(mut self, who: impl Into<String>) -> Self {
        self.discovered_by = who.into();
        self
    }

    /// Mark as verified.
    #[must_use]
    pub fn verified(mut self) -> Self {
        self.verified = true;
        self
    }

    /// Reject confidence outside `[0, 1]` (including NaN).
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidInput` for an out-of-range confidence.
    pub fn validate(&self) -> Result<()> {
        if (0.0..=1.0).contains(&self.confidence) {
            Ok(())
        } else {
            Err(Error::InvalidInput(format!(
                "provenance confidence must be within [0, 1], got {}",
                self.confidence
            )))
        }
    }
}

/// A recorded conflict between an entity and something else.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conflict {
    /// The other entity involved, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity: Option<EntityId>,
    /// Why they conflict
    pub reason: String,
}

/// Constraint-checking state of an entity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Resolution {
    /// Current status
    pub status: ResolutionStatus,
    /// References to the constraints that apply
    pub constraints: Vec<String>,
    /// Known conflicts
    pub conflicts: Vec<Conflict>,
    /// Last time the constraints were checked
    pub last_validated: Option<DateTime<Utc>>,
}

impl Resolution {
    /// Whether the entity has been validated at least once.
    #[must_use]
    pub fn is_validated(&self) -> bool {
        self.last_validated.is_some()
    }

    /// Whether any conflict is recorded.
    #[must_use]
    pub fn has_conflicts(&self) -> bool {
        !self.conflicts.is_empty()
    }
}

/// A rule attached to an edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Constraint {
    /// Family the constraint belongs to
    pub category: ConstraintCategory,
    /// Type within the category (`precedence`, `version_range`, ...)
    pub kind: String,
    /// How strictly it must hold
    #[serde(default)]
    pub priority: ConstraintPriority,
    /// Constraint arguments
    #[serde(default)]
    pub parameters: Metadata,
}

impl Constraint {
    /// A hard constraint with no parameters.
    #[must_use]
    pub fn new(category: ConstraintCategory, kind: impl Into<String>) -> Self {
        Self {
            category,
            kind: kind.into(),
            priority: ConstraintPriority::Hard,
            parameters: Metadata::new(),
        }
    }

    /// Set the priority.
    #[must_use]
    pub fn with_priority(mut self, priority: ConstraintPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Add a parameter.
    #[must_use]
    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }
}

// ============================================================================
// Entities
// ============================================================================

/// Descriptive metadata of an entity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EntityMetadata {
    /// Free-form labels
    pub tags: BTreeSet<String>,
    /// Scalar properties
    pub properties: Metadata,
    /// Whether the entity is deprecated
    pub deprecated: bool,
    /// Why, and what to use instead
    pub deprecation_message: Option<String>,
    /// Interface maturity
    pub stability: Option<Stability>,
}

/// One cached adjacency entry: the edge and the entity at its other end.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AdjacentRef {
    /// The edge
    pub relation: RelationId,
    /// The entity at the other end
    pub entity: EntityId,
}

/// A stored entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Content-derived id; follows the identity when it changes
    pub id: EntityId,
    /// Vocabulary the entity comes from (`npm`, `task`, ...)
    pub domain: String,
    /// Name within the domain
    pub identifier: String,
    /// Optional version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Descriptive metadata
    #[serde(default)]
    pub metadata: EntityMetadata,
    /// Incoming edges: the entities this one depends on
    #[serde(default)]
    pub dependencies: Vec<AdjacentRef>,
    /// Outgoing edges: the entities depending on this one
    #[serde(default)]
    pub dependents: Vec<AdjacentRef>,
    /// Constraint-checking state
    #[serde(default)]
    pub resolution: Resolution,
    /// Origin of the entity
    #[serde(default)]
    pub provenance: Provenance,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last modification time
    pub updated_at: DateTime<Utc>,
}

impl Entity {
    /// `domain:identifier[@version]`, the human-facing reference form.
    #[must_use]
    pub fn display_name(&self) -> String {
        match &self.version {
            Some(version) => format!("{}:{}@{}", self.domain, self.identifier, version),
            None => format!("{}:{}", self.domain, self.identifier),
        }
    }
}

/// Input for creating (or upserting) an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewEntity {
    /// Vocabulary the entity comes from
    pub domain: String,
    /// Name within the domain
    pub identifier: String,
    /// Optional version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Descriptive metadata
    #[serde(default)]
    pub metadata: EntityMetadata,
    /// Initial resolution state (defaults to unresolved)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<Resolution>,
    /// Origin (defaults to user input, confidence 1.0)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provenance: Option<Provenance>,
}

impl NewEntity {
    /// An unversioned entity with default metadata.
    #[must_use]
    pub fn new(domain: impl Into<String>, identifier: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            identifier: identifier.into(),
            version: None,
            metadata: EntityMetadata::default(),
            resolution: None,
            provenance: None,
        }
    }

    /// Set the version.
    #[must_use]
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Add a tag.
    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.metadata.tags.insert(tag.into());
        self
    }

    /// Add a property.
    #[must_use]
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        self.metadata.properties.insert(key.into(), value.into());
        self
    }

    /// Set the stability.
    #[must_use]
    pub fn with_stability(mut self, stability: Stability) -> Self {
        self.metadata.stability = Some(stability);
        self
    }

    /// Mark as deprecated.
    #[must_use]
    pub fn deprecated(mut self, message: Option<&str>) -> Self {
        self.metadata.deprecated = true;
        self.metadata.deprecation_message = message.map(str::to_string);
        self
    }

    /// Set the resolution state.
    #[must_use]
    pub fn with_resolution(mut self, resolution: Resolution) -> Self {
        self.resolution = Some(resolution);
        self
    }

    /// Set the provenance.
    #[must_use]
    pub fn with_provenance(mut self, provenance: Provenance) -> Self {
        self.provenance = Some(provenance);
        self
    }

    /// The id this entity will be stored under.
    #[must_use]
    pub fn id(&self) -> EntityId {
        crate::id::entity_id(&self.domain, &self.identifier, self.normalized_version())
    }

    /// The version, treating an empty string as no version.
    #[must_use]
    pub fn normalized_version(&self) -> Option<&str> {
        self.version.as_deref().filter(|v| !v.is_empty())
    }

    /// Reject empty identity parts and out-of-range confidence.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidInput` describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        validate_identity(&self.domain, &self.identifier)?;
        if let Some(provenance) = &self.provenance {
            provenance.validate()?;
        }
        Ok(())
    }
}

pub(crate) fn validate_identity(domain: &str, identifier: &str) -> Result<()> {
    if domain.trim().is_empty() {
        return Err(Error::InvalidInput("entity domain must not be empty".to_string()));
    }
    if identifier.trim().is_empty() {
        return Err(Error::InvalidInput(
            "entity identifier must not be empty".to_string(),
        ));
    }
    Ok(())
}

/// Partial update of an entity. Unset fields are left untouched.
///
/// Properties merge key-by-key; tags are replaced only when supplied.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EntityPatch {
    /// New domain
    pub domain: Option<String>,
    /// New identifier
    pub identifier: Option<String>,
    /// New version (`Some(None)` clears it)
    pub version: Option<Option<String>>,
    /// Replacement tag set
    pub tags: Option<BTreeSet<String>>,
    /// Properties to insert or overwrite
    pub properties: Metadata,
    /// Property keys to remove
    pub remove_properties: Vec<String>,
    /// New deprecated flag
    pub deprecated: Option<bool>,
    /// New deprecation message (`Some(None)` clears it)
    pub deprecation_message: Option<Option<String>>,
    /// New stability (`Some(None)` clears it)
    pub stability: Option<Option<Stability>>,
    /// Replacement resolution state
    pub resolution: Option<Resolution>,
    /// Replacement provenance
    pub provenance: Option<Provenance>,
}

impl EntityPatch {
    /// Replace the tag set.
    #[must_use]
    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = Some(tags.into_iter().map(Into::into).collect());
        self
    }

    /// Insert or overwrite a property.
    #[must_use]
    pub fn set_property(mut self, key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Remove a property.
    #[must_use]
    pub fn remove_property(mut self, key: impl Into<String>) -> Self {
        self.remove_properties.push(key.into());
        self
    }

    /// Set the version.
    #[must_use]
    pub fn version(mut self, version: Option<&str>) -> Self {
        self.version = Some(version.map(str::to_string));
        self
    }

    /// Deprecate with an optional message.
    #[must_use]
    pub fn deprecate(mut self, message: Option<&str>) -> Self {
        self.deprecated = Some(true);
        self.deprecation_message = Some(message.map(str::to_string));
        self
    }

    /// Replace the resolution state.
    #[must_use]
    pub fn resolution(mut self, resolution: Resolution) -> Self {
        self.resolution = Some(resolution);
        self
    }

    /// Replace the provenance.
    #[must_use]
    pub fn provenance(mut self, provenance: Provenance) -> Self {
        self.provenance = Some(provenance);
        self
    }

    /// Upsert semantics: the stored state becomes `new` laid over defaults.
    ///
    /// Every stored property absent from `new` is removed, and omitted
    /// resolution or provenance resets to the default.
    pub(crate) fn from_upsert(new: &NewEntity, stored: &Metadata) -> Self {
        Self {
            domain: None,
            identifier: None,
            version: None,
            tags: Some(new.metadata.tags.clone()),
            properties: new.metadata.properties.clone(),
            remove_properties: stale_keys(stored, &new.metadata.properties),
            deprecated: Some(new.metadata.deprecated),
            deprecation_message: Some(new.metadata.deprecation_message.clone()),
            stability: Some(new.metadata.stability),
            resolution: Some(new.resolution.clone().unwrap_or_default()),
            provenance: Some(new.provenance.clone().unwrap_or_default()),
        }
    }
}

// ============================================================================
// Relations
// ============================================================================

/// Flags and properties of an edge.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelationMetadata {
    /// The dependency can be absent
    pub optional: bool,
    /// Only needed during development
    pub development: bool,
    /// Expected to be supplied by the consumer
    pub peer: bool,
    /// Free-form scope (`build`, `runtime`, ...)
    pub scope: Option<String>,
    /// Scalar properties
    pub properties: Metadata,
}

/// A stored edge. `source -> target` means the target depends on the source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relation {
    /// Content-derived id
    pub id: RelationId,
    /// The entity depended upon
    pub source: EntityId,
    /// The dependent entity
    pub target: EntityId,
    /// Kind of edge
    pub relation_type: RelationType,
    /// Rules attached to the edge, in order
    #[serde(default)]
    pub constraints: Vec<Constraint>,
    /// Flags and properties
    #[serde(default)]
    pub metadata: RelationMetadata,
    /// Origin of the edge
    #[serde(default)]
    pub provenance: Provenance,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last modification time
    pub updated_at: DateTime<Utc>,
}

/// Input for creating (or upserting) an edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewRelation {
    /// The entity depended upon
    pub source: EntityId,
    /// The dependent entity
    pub target: EntityId,
    /// Kind of edge
    pub relation_type: RelationType,
    /// Rules attached to the edge
    #[serde(default)]
    pub constraints: Vec<Constraint>,
    /// Flags and properties
    #[serde(default)]
    pub metadata: RelationMetadata,
    /// Origin (defaults to user input, confidence 1.0)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provenance: Option<Provenance>,
}

impl NewRelation {
    /// An edge with no constraints and default metadata.
    #[must_use]
    pub fn new(source: EntityId, target: EntityId, relation_type: RelationType) -> Self {
        Self {
            source,
            target,
            relation_type,
            constraints: Vec::new(),
            metadata: RelationMetadata::default(),
            provenance: None,
        }
    }

    /// Attach a constraint.
    #[must_use]
    pub fn with_constraint(mut self, constraint: Constraint) -> Self {
        self.constraints.push(constraint);
        self
    }

    /// Replace the metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: RelationMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Set the provenance.
    #[must_use]
    pub fn with_provenance(mut self, provenance: Provenance) -> Self {
        self.provenance = Some(provenance);
        self
    }

    /// The id this edge will be stored under.
    #[must_use]
    pub fn id(&self) -> RelationId {
        crate::id::relation_id(&self.source, &self.target, self.relation_type)
    }

    /// Reject self-loops and out-of-range confidence.
    ///
    /// # Errors
    ///
    /// Returns `Error::ConstraintViolation` for a self-loop and
    /// `Error::InvalidInput` for bad provenance.
    pub fn validate(&self) -> Result<()> {
        if self.source == self.target {
            return Err(Error::ConstraintViolation(format!(
                "self-referencing relation on {} is not allowed",
                self.source
            )));
        }
        if let Some(provenance) = &self.provenance {
            provenance.validate()?;
        }
        Ok(())
    }
}

/// Partial update of an edge. Unset fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelationPatch {
    /// Replacement constraint list
    pub constraints: Option<Vec<Constraint>>,
    /// New optional flag
    pub optional: Option<bool>,
    /// New development flag
    pub development: Option<bool>,
    /// New peer flag
    pub peer: Option<bool>,
    /// New scope (`Some(None)` clears it)
    pub scope: Option<Option<String>>,
    /// Properties to insert or overwrite
    pub properties: Metadata,
    /// Property keys to remove
    pub remove_properties: Vec<String>,
    /// Replacement provenance
    pub provenance: Option<Provenance>,
}

impl RelationPatch {
    /// Replace the constraint list.
    #[must_use]
    pub fn constraints(mut self, constraints: Vec<Constraint>) -> Self {
        self.constraints = Some(constraints);
        self
    }

    /// Set the optional flag.
    #[must_use]
    pub fn optional(mut self, optional: bool) -> Self {
        self.optional = Some(optional);
        self
    }

    /// Set the scope.
    #[must_use]
    pub fn scope(mut self, scope: Option<&str>) -> Self {
        self.scope = Some(scope.map(str::to_string));
        self
    }

    /// Insert or overwrite a property.
    #[must_use]
    pub fn set_property(mut self, key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Remove a property.
    #[must_use]
    pub fn remove_property(mut self, key: impl Into<String>) -> Self {
        self.remove_properties.push(key.into());
        self
    }

    /// Replace the provenance.
    #[must_use]
    pub fn provenance(mut self, provenance: Provenance) -> Self {
        self.provenance = Some(provenance);
        self
    }

    /// Upsert semantics: the stored edge becomes `new` laid over defaults.
    pub(crate) fn from_upsert(new: &NewRelation, stored: &Metadata) -> Self {
        Self {
            constraints: Some(new.constraints.clone()),
            optional: Some(new.metadata.optional),
            development: Some(new.metadata.development),
            peer: Some(new.metadata.peer),
            scope: Some(new.metadata.scope.clone()),
            properties: new.metadata.properties.clone(),
            remove_properties: stale_keys(stored, &new.metadata.properties),
            provenance: Some(new.provenance.clone().unwrap_or_default()),
        }
    }
}

/// Stored property keys that `incoming` does not carry.
fn stale_keys(stored: &Metadata, incoming: &Metadata) -> Vec<String> {
    stored
        .keys()
        .filter(|key| !incoming.contains_key(*key))
        .cloned()
        .collect()
}

/// Apply a key-by-key property merge followed by removals.
pub(crate) fn merge_properties(target: &mut Metadata, updates: &Metadata, removals: &[String]) {
    for (key, value) in updates {
        target.insert(key.clone(), value.clone());
    }
    for key in removals {
        target.remove(key);
    }
}
