//! A/B promotion decisions.
//!
//! [`DecisionEngine::evaluate`] applies four gates in order, each
//! short-circuiting to REJECT with its reason code:
//!
//! 1. Absolute quality: candidate mAP50 must exceed `min_map50`.
//! 2. Bootstrap: with no production baseline, a candidate that passed
//!    gate 1 is promoted.
//! 3. Relative improvement: `candidate >= baseline * (1 + improvement_margin)`.
//! 4. Significance: both sides need `min_sample_size` samples, and the
//!    one-sided two-proportion z-test must reject at `confidence_level`.
//!
//! The engine is a pure function of its inputs and thresholds.

pub mod log;
pub mod stats;

use chrono::{DateTime, Utc};

use modelops_types::config::DecisionConfig;
use modelops_types::decision::{DecisionEvidence, PromotionDecision, ReasonCode, Verdict};
use modelops_types::model::{EvaluationMetrics, VersionId};

use stats::two_proportion_z_test;

/// Verdict, reasons and evidence for one candidate/baseline pair.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub verdict: Verdict,
    pub reasons: Vec<ReasonCode>,
    pub evidence: DecisionEvidence,
}

impl Evaluation {
    fn promote(evidence: DecisionEvidence) -> Self {
        Self {
            verdict: Verdict::Promote,
            reasons: Vec::new(),
            evidence,
        }
    }

    fn reject(reason: ReasonCode, evidence: DecisionEvidence) -> Self {
        Self {
            verdict: Verdict::Reject,
            reasons: vec![reason],
            evidence,
        }
    }
}

/// Promotion gate evaluator.
#[derive(Debug, Clone)]
pub struct DecisionEngine {
    config: DecisionConfig,
}

impl DecisionEngine {
    pub fn new(config: DecisionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DecisionConfig {
        &self.config
    }

    /// Run the gates over a candidate and the optional production baseline.
    pub fn evaluate(
        &self,
        candidate: &EvaluationMetrics,
        baseline: Option<&EvaluationMetrics>,
    ) -> Evaluation {
        let cfg = &self.config;
        let mut evidence = DecisionEvidence {
            candidate_map50: candidate.map50,
            ..Default::default()
        };

        if !(candidate.map50 > cfg.min_map50) {
            return Evaluation::reject(ReasonCode::QualityGateFailed, evidence);
        }

        let Some(baseline) = baseline else {
            return Evaluation::promote(evidence);
        };

        evidence.baseline_map50 = Some(baseline.map50);
        if baseline.map50 > 0.0 {
            evidence.relative_gain = Some((candidate.map50 - baseline.map50) / baseline.map50);
        }
        if candidate.map50 < baseline.map50 * (1.0 + cfg.improvement_margin) {
            return Evaluation::reject(ReasonCode::InsufficientImprovement, evidence);
        }

        if candidate.sample_size < cfg.min_sample_size || baseline.sample_size < cfg.min_sample_size
        {
            return Evaluation::reject(ReasonCode::InsufficientSampleSize, evidence);
        }

        let test = two_proportion_z_test(
            candidate.map50,
            candidate.sample_size,
            baseline.map50,
            baseline.sample_size,
        );
        if let Some(t) = test {
            evidence.z_score = Some(t.z);
            evidence.p_value = Some(t.p_value);
        }
        if !test.is_some_and(|t| t.is_significant(cfg.confidence_level)) {
            return Evaluation::reject(ReasonCode::NotSignificant, evidence);
        }

        Evaluation::promote(evidence)
    }

    /// Build the audit record for a candidate version.
    ///
    /// `computed_at` is supplied by the caller so identical inputs produce
    /// identical records.
    pub fn decide(
        &self,
        run_id: Option<&str>,
        candidate: (&VersionId, &EvaluationMetrics),
        baseline: Option<(&VersionId, &EvaluationMetrics)>,
        computed_at: DateTime<Utc>,
    ) -> PromotionDecision {
        let evaluation = self.evaluate(candidate.1, baseline.map(|(_, m)| m));
        PromotionDecision {
            run_id: run_id.map(str::to_string),
            candidate: candidate.0.clone(),
            baseline: baseline.map(|(id, _)| id.clone()),
            verdict: evaluation.verdict,
            reasons: evaluation.reasons,
            evidence: evaluation.evidence,
            computed_at,
        }
    }
}
