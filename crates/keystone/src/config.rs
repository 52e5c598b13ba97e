//! Configuration for analysis thresholds and traversal ceilings.
//!
//! The configuration lives in a YAML file (by default `.keystone/config.yaml`).
//! Every field has a default, so an empty file or a partial file is valid:
//!
//! ```yaml
//! risk:
//!   weights:
//!     blast_radius: 0.4
//!     circular: 0.3
//!     critical_path: 0.2
//!     hub: 0.1
//!   blast_radius_normalizer: 1000
//!   safe_threshold: 0.3
//!   hub_threshold: 10
//! snapshot:
//!   max_nodes: 100000
//! paths:
//!   max_paths: 10
//!   max_expansions: 100000
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default location of the configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = ".keystone/config.yaml";

/// Default location of the database, relative to the working directory.
pub const DEFAULT_DB_PATH: &str = ".keystone/graph.db";

/// Top-level configuration file structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Risk scoring section
    pub risk: RiskConfig,
    /// Snapshot ceilings
    pub snapshot: SnapshotLimits,
    /// Path enumeration limits
    pub paths: PathLimits,
}

impl Config {
    /// Load configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if the file cannot be read and `Error::Config` if
    /// it does not parse or fails validation.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&content).map_err(|e| {
            Error::Config(format!("failed to parse {}: {e}", path.display()))
        })?;
        config.validate()?;
        tracing::debug!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Load the file if it exists, otherwise fall back to defaults.
    ///
    /// # Errors
    ///
    /// Same as [`Config::load`] when the file exists.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            tracing::debug!(path = %path.display(), "No configuration file, using defaults");
            Ok(Self::default())
        }
    }

    /// Save configuration to a YAML file, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if serialization fails and `Error::Io` if the
    /// file cannot be written.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            serde_yaml::to_string(self).map_err(|e| Error::Config(format!("YAML error: {e}")))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Check every section for out-of-range values.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        self.risk.validate()?;
        self.paths.validate()?;
        self.snapshot.validate()
    }
}

/// Weights of the four risk components. Each is in `[0, 1]`, and they sum to at most 1.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskWeights {
    /// Weight of the normalized blast radius
    pub blast_radius: f64,
    /// Weight of circular dependency involvement
    pub circular: f64,
    /// Weight of sitting on the critical path
    pub critical_path: f64,
    /// Weight of being a hub
    pub hub: f64,
}

impl Default for RiskWeights {
    fn default() -> Self {
        Self {
            blast_radius: 0.4,
            circular: 0.3,
            critical_path: 0.2,
            hub: 0.1,
        }
    }
}

impl RiskWeights {
    fn total(&self) -> f64 {
        self.blast_radius + self.circular + self.critical_path + self.hub
    }
}

/// Thresholds used by the impact analyzer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    /// Component weights
    pub weights: RiskWeights,
    /// Blast radius at which the blast component saturates
    pub blast_radius_normalizer: f64,
    /// Scores strictly below this are safe (absent cycle involvement)
    pub safe_threshold: f64,
    /// More direct dependents than this makes an entity a hub
    pub hub_threshold: usize,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            weights: RiskWeights::default(),
            blast_radius_normalizer: 1000.0,
            safe_threshold: 0.3,
            hub_threshold: 10,
        }
    }
}

impl RiskConfig {
    /// Check weights, normalizer and threshold ranges.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` naming the offending field.
    pub fn validate(&self) -> Result<()> {
        let weights = [
            ("blast_radius", self.weights.blast_radius),
            ("circular", self.weights.circular),
            ("critical_path", self.weights.critical_path),
            ("hub", self.weights.hub),
        ];
        for (name, weight) in weights {
            if !(0.0..=1.0).contains(&weight) {
                return Err(Error::Config(format!(
                    "risk.weights.{name} must be within [0, 1], got {weight}"
                )));
            }
        }

        // Allow for float rounding in hand-written weights
        let total = self.weights.total();
        if total > 1.0 + 1e-9 {
            return Err(Error::Config(format!(
                "risk weights must sum to at most 1, got {total}"
            )));
        }

        if !(self.blast_radius_normalizer > 0.0 && self.blast_radius_normalizer.is_finite()) {
            return Err(Error::Config(format!(
                "risk.blast_radius_normalizer must be positive, got {}",
                self.blast_radius_normalizer
            )));
        }

        if !(self.safe_threshold > 0.0 && self.safe_threshold <= 1.0) {
            return Err(Error::Config(format!(
                "risk.safe_threshold must be within (0, 1], got {}",
                self.safe_threshold
            )));
        }

        Ok(())
    }
}

/// Ceilings applied when loading a graph snapshot. `None` means unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotLimits {
    /// Maximum number of entities in a snapshot
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_nodes: Option<usize>,
    /// Maximum number of edges in a snapshot
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_edges: Option<usize>,
}

impl SnapshotLimits {
    fn validate(self) -> Result<()> {
        if self.max_nodes == Some(0) || self.max_edges == Some(0) {
            return Err(Error::Config(
                "snapshot ceilings must be positive when set".to_string(),
            ));
        }
        Ok(())
    }
}

/// Bounds for path enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathLimits {
    /// Stop after this many paths
    pub max_paths: usize,
    /// Stop after this many DFS expansions
    pub max_expansions: usize,
}

impl Default for PathLimits {
    fn default() -> Self {
        Self {
            max_paths: 10,
            max_expansions: 100_000,
        }
    }
}

impl PathLimits {
    /// Limits with the given path count and the default expansion budget.
    #[must_use]
    pub fn with_max_paths(max_paths: usize) -> Self {
        Self {
            max_paths,
            ..Self::default()
        }
    }

    /// Reject zero bounds.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if either bound is zero.
    pub fn validate(self) -> Result<()> {
        if self.max_paths == 0 || self.max_expansions == 0 {
            return Err(Error::Config(
                "paths.max_paths and paths.max_expansions must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use tempfile::tempdir;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();

        assert!(config.validate().is_ok());
        assert!((config.risk.weights.blast_radius - 0.4).abs() < f64::EPSILON);
        assert!((config.risk.blast_radius_normalizer - 1000.0).abs() < f64::EPSILON);
        assert_eq!(config.risk.hub_threshold, 10);
        assert_eq!(config.paths.max_paths, 10);
        assert_eq!(config.paths.max_expansions, 100_000);
        assert!(config.snapshot.max_nodes.is_none());
    }

    #[test]
    fn partial_yaml_fills_defaults() {
        let config: Config = serde_yaml::from_str("risk:\n  hub_threshold: 3\n")
            .expect("partial config should parse");

        assert_eq!(config.risk.hub_threshold, 3);
        assert!((config.risk.safe_threshold - 0.3).abs() < f64::EPSILON);
        assert_eq!(config.paths, PathLimits::default());
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempdir().expect("should create temp dir");
        let path = dir.path().join("nested").join("config.yaml");

        let mut config = Config::default();
        config.snapshot.max_nodes = Some(500);
        config.risk.weights.hub = 0.05;
        config.save(&path).expect("should save config");

        let loaded = Config::load(&path).expect("should load config");
        assert_eq!(loaded, config);
    }

    #[test]
    fn load_or_default_without_file() {
        let dir = tempdir().expect("should create temp dir");
        let config =
            Config::load_or_default(&dir.path().join("missing.yaml")).expect("should default");
        assert_eq!(config, Config::default());
    }

    #[test]
    fn malformed_yaml_is_config_error() {
        let dir = tempdir().expect("should create temp dir");
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "risk: [not, a, map]").expect("should write file");

        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[rstest]
    #[case::negative_weight("risk:\n  weights:\n    hub: -0.1\n", "risk.weights.hub")]
    #[case::weights_over_one("risk:\n  weights:\n    blast_radius: 0.9\n", "sum to at most 1")]
    #[case::zero_normalizer("risk:\n  blast_radius_normalizer: 0\n", "normalizer")]
    #[case::zero_threshold("risk:\n  safe_threshold: 0\n", "safe_threshold")]
    #[case::zero_paths("paths:\n  max_paths: 0\n", "max_paths")]
    #[case::zero_ceiling("snapshot:\n  max_edges: 0\n", "ceilings")]
    fn invalid_values_are_rejected(#[case] yaml: &str, #[case] expected: &str) {
        let config: Config = serde_yaml::from_str(yaml).expect("yaml should parse");
        let err = config.validate().unwrap_err();
        assert!(
            err.to_string().contains(expected),
            "expected '{expected}' in '{err}'"
        );
    }
}
