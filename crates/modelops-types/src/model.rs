//! Model registry types.
//!
//! A [`ModelVersion`] is one registered artifact of a model family. Its
//! [`ModelStage`] label says whether it is serving production traffic.
//! Within a family at most one version carries [`ModelStage::Production`].

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier of a model version: family key plus per-family version number.
///
/// Rendered as `<family>:v<n>` (e.g. `crop-disease:v3`) and serialized as
/// that string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VersionId {
    pub family: String,
    pub version: u32,
}

impl VersionId {
    pub fn new(family: impl Into<String>, version: u32) -> Self {
        Self {
            family: family.into(),
            version,
        }
    }
}

impl fmt::Display for VersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:v{}", self.family, self.version)
    }
}

impl FromStr for VersionId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (family, version) = s
            .rsplit_once(":v")
            .ok_or_else(|| format!("invalid version id (expected <family>:v<n>): {s}"))?;
        if family.is_empty() {
            return Err(format!("invalid version id (empty family): {s}"));
        }
        let version = version
            .parse::<u32>()
            .map_err(|_| format!("invalid version number in version id: {s}"))?;
        if version == 0 {
            return Err(format!("version numbers start at 1: {s}"));
        }
        Ok(Self::new(family, version))
    }
}

impl TryFrom<String> for VersionId {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<VersionId> for String {
    fn from(id: VersionId) -> Self {
        id.to_string()
    }
}

/// Registry stage label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelStage {
    /// Registered, not under consideration.
    #[default]
    None,
    /// Passed the registration quality bar; awaiting the A/B decision.
    Staging,
    /// The version serving production traffic.
    Production,
    /// A former production version.
    Archived,
}

impl fmt::Display for ModelStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::None => "NONE",
            Self::Staging => "STAGING",
            Self::Production => "PRODUCTION",
            Self::Archived => "ARCHIVED",
        };
        f.write_str(s)
    }
}

/// Detection-quality metrics from one evaluation.
///
/// Immutable once written; attached to exactly one [`ModelVersion`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EvaluationMetrics {
    /// Mean average precision at IoU 0.5.
    pub map50: f64,

    /// Mean average precision averaged over IoU 0.5..0.95.
    #[serde(default, alias = "map")]
    pub map50_95: f64,

    #[serde(default)]
    pub precision: f64,

    #[serde(default)]
    pub recall: f64,

    #[serde(default, alias = "f1_score")]
    pub f1: f64,

    /// Number of evaluated detections backing these numbers.
    #[serde(default)]
    pub sample_size: u64,
}

impl EvaluationMetrics {
    /// Build metrics, deriving F1 from precision and recall.
    pub fn new(map50: f64, map50_95: f64, precision: f64, recall: f64, sample_size: u64) -> Self {
        Self {
            map50,
            map50_95,
            precision,
            recall,
            f1: f1_score(precision, recall),
            sample_size,
        }
    }

    /// Fill in F1 when the producer did not report it.
    pub fn with_derived_f1(mut self) -> Self {
        if self.f1 == 0.0 {
            self.f1 = f1_score(self.precision, self.recall);
        }
        self
    }

    /// Check that every rate lies in `[0, 1]` and is finite.
    pub fn validate(&self) -> Result<(), String> {
        let rates = [
            ("map50", self.map50),
            ("map50_95", self.map50_95),
            ("precision", self.precision),
            ("recall", self.recall),
            ("f1", self.f1),
        ];
        for (name, value) in rates {
            if !value.is_finite() || !(0.0..=1.0).contains(&value) {
                return Err(format!("{name} must be in [0, 1], got {value}"));
            }
        }
        Ok(())
    }
}

/// Harmonic mean of precision and recall; 0 when both are 0.
pub fn f1_score(precision: f64, recall: f64) -> f64 {
    let denom = precision + recall;
    if denom <= 0.0 {
        0.0
    } else {
        2.0 * precision * recall / denom
    }
}

/// A registered model artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelVersion {
    pub id: VersionId,

    /// Opaque reference into the artifact store. Never dereferenced here.
    pub artifact_ref: String,

    /// Snapshot of the evaluation metrics at registration time.
    pub metrics: EvaluationMetrics,

    #[serde(default)]
    pub stage: ModelStage,

    /// Pipeline run that produced this version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,

    /// Free-form annotations (`quality`, `trained_at`, `promoted_at`, ...).
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

impl ModelVersion {
    pub fn version(&self) -> u32 {
        self.id.version
    }
}
