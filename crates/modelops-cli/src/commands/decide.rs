//! `mops decide` -- evaluate the promotion gates offline.
//!
//! Applies the configured decision thresholds to a candidate and an
//! optional baseline without touching any store.
//!
//! ```text
//! mops decide --candidate 0.76:500 --baseline 0.70:500
//! ```

use std::str::FromStr;

use clap::Args;

use modelops_services::decision::DecisionEngine;
use modelops_types::config::Config;
use modelops_types::model::EvaluationMetrics;

use super::format_rate;

/// Arguments for the `decide` subcommand.
#[derive(Args)]
pub struct DecideArgs {
    /// Candidate metrics as `MAP50[:SAMPLES]`.
    #[arg(long)]
    pub candidate: MetricsArg,

    /// Production baseline as `MAP50[:SAMPLES]`. Omit for a first model.
    #[arg(long)]
    pub baseline: Option<MetricsArg>,
}

/// `MAP50[:SAMPLES]`; samples default to 0.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricsArg {
    pub map50: f64,
    pub sample_size: u64,
}

impl FromStr for MetricsArg {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (map50, samples) = match s.split_once(':') {
            Some((m, n)) => (m, Some(n)),
            None => (s, None),
        };
        let map50: f64 = map50
            .trim()
            .parse()
            .map_err(|_| format!("invalid mAP50 '{map50}'"))?;
        if !(0.0..=1.0).contains(&map50) {
            return Err(format!("mAP50 must be in [0, 1], got {map50}"));
        }
        let sample_size = match samples {
            Some(n) => n
                .trim()
                .parse()
                .map_err(|_| format!("invalid sample size '{n}'"))?,
            None => 0,
        };
        Ok(Self { map50, sample_size })
    }
}

impl MetricsArg {
    fn metrics(self) -> EvaluationMetrics {
        EvaluationMetrics {
            map50: self.map50,
            map50_95: 0.0,
            precision: 0.0,
            recall: 0.0,
            f1: 0.0,
            sample_size: self.sample_size,
        }
    }
}

pub fn run(args: DecideArgs, config: &Config) -> anyhow::Result<()> {
    let engine = DecisionEngine::new(config.decision.clone());
    let candidate = args.candidate.metrics();
    let baseline = args.baseline.map(MetricsArg::metrics);
    let evaluation = engine.evaluate(&candidate, baseline.as_ref());

    let reasons: Vec<String> = evaluation.reasons.iter().map(ToString::to_string).collect();
    println!("Verdict:  {}", evaluation.verdict);
    if !reasons.is_empty() {
        println!("Reasons:  {}", reasons.join(", "));
    }
    let ev = &evaluation.evidence;
    println!("Candidate mAP50: {:.3}", ev.candidate_map50);
    println!("Baseline mAP50:  {}", format_rate(ev.baseline_map50));
    if let Some(gain) = ev.relative_gain {
        println!("Relative gain:   {:+.1}%", gain * 100.0);
    }
    println!("z:               {}", format_rate(ev.z_score));
    println!("p:               {}", format_rate(ev.p_value));
    Ok(())
}
