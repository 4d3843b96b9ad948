//! Promotion decision types.
//!
//! A [`PromotionDecision`] is the append-only audit record of one A/B
//! comparison between a candidate version and the family's current
//! production version.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::VersionId;

/// Outcome of the decision engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Promote,
    Reject,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Promote => f.write_str("PROMOTE"),
            Self::Reject => f.write_str("REJECT"),
        }
    }
}

/// Why a candidate was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    /// Candidate mAP50 did not exceed the absolute minimum.
    QualityGateFailed,
    /// Candidate did not beat the baseline by the required relative margin.
    InsufficientImprovement,
    /// Either side had too few evaluated samples for a significance test.
    InsufficientSampleSize,
    /// Samples were adequate but the improvement was not significant.
    NotSignificant,
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::QualityGateFailed => "QualityGateFailed",
            Self::InsufficientImprovement => "InsufficientImprovement",
            Self::InsufficientSampleSize => "InsufficientSampleSize",
            Self::NotSignificant => "NotSignificant",
        };
        f.write_str(s)
    }
}

/// The numbers a decision was based on.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DecisionEvidence {
    pub candidate_map50: f64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baseline_map50: Option<f64>,

    /// `(candidate - baseline) / baseline`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relative_gain: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub z_score: Option<f64>,

    /// One-sided p-value of the significance test.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub p_value: Option<f64>,
}

/// Append-only audit record of one promotion decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromotionDecision {
    /// Run that requested the decision, if any (dry runs have none).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,

    pub candidate: VersionId,

    /// Production version at decision time; `None` in the bootstrap case.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baseline: Option<VersionId>,

    pub verdict: Verdict,

    /// Every gate that failed. Empty iff the verdict is PROMOTE.
    #[serde(default)]
    pub reasons: Vec<ReasonCode>,

    #[serde(default)]
    pub evidence: DecisionEvidence,

    pub computed_at: DateTime<Utc>,
}

impl PromotionDecision {
    pub fn family(&self) -> &str {
        &self.candidate.family
    }

    pub fn is_promote(&self) -> bool {
        self.verdict == Verdict::Promote
    }

    /// `"PROMOTE"` or `"REJECT (QualityGateFailed, ...)"`.
    pub fn describe(&self) -> String {
        if self.reasons.is_empty() {
            return self.verdict.to_string();
        }
        let reasons: Vec<String> = self.reasons.iter().map(ToString::to_string).collect();
        format!("{} ({})", self.verdict, reasons.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn describe_includes_reasons() {
        let decision = PromotionDecision {
            run_id: None,
            candidate: VersionId::new("detector", 2),
            baseline: Some(VersionId::new("detector", 1)),
            verdict: Verdict::Reject,
            reasons: vec![ReasonCode::InsufficientImprovement],
            evidence: DecisionEvidence::default(),
            computed_at: Utc::now(),
        };
        assert_eq!(decision.describe(), "REJECT (InsufficientImprovement)");
        assert_eq!(decision.family(), "detector");
        assert!(!decision.is_promote());
    }

    #[test]
    fn reason_codes_serialize_snake_case() {
        let json = serde_json::to_string(&ReasonCode::InsufficientSampleSize).unwrap();
        assert_eq!(json, "\"insufficient_sample_size\"");
    }

    #[test]
    fn decision_json_shape() {
        let decision = PromotionDecision {
            run_id: Some("run-1".into()),
            candidate: VersionId::new("detector", 1),
            baseline: None,
            verdict: Verdict::Promote,
            reasons: vec![],
            evidence: DecisionEvidence {
                candidate_map50: 0.75,
                ..Default::default()
            },
            computed_at: Utc::now(),
        };
        let value = serde_json::to_value(&decision).unwrap();
        assert_eq!(value["candidate"], "detector:v1");
        assert_eq!(value["verdict"], "promote");
        assert!(value.get("baseline").is_none());
        assert!(value["evidence"].get("p_value").is_none());
    }
}
