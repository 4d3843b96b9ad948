//! `mops decisions` -- inspect recorded promotion decisions.

use modelops_platform::Platform;
use modelops_types::config::Config;

use super::{format_rate, format_ts, open_decisions, table};

pub async fn decisions_list<P: Platform>(config: &Config, platform: &P, family: Option<&str>) -> anyhow::Result<()> {
    let decisions = open_decisions(config, platform).await?.list(family).await?;
    if decisions.is_empty() {
        println!("No decisions recorded.");
        return Ok(());
    }

    let mut table = table();
    table.set_header(["CANDIDATE", "BASELINE", "VERDICT", "GAIN", "Z", "P", "COMPUTED"]);
    for d in &decisions {
        table.add_row([
            d.candidate.to_string(),
            d.baseline
                .as_ref()
                .map_or_else(|| "-".to_string(), ToString::to_string),
            d.describe(),
            d.evidence
                .relative_gain
                .map_or_else(|| "-".to_string(), |g| format!("{:+.1}%", g * 100.0)),
            format_rate(d.evidence.z_score),
            format_rate(d.evidence.p_value),
            format_ts(Some(d.computed_at)),
        ]);
    }
    println!("{table}");
    Ok(())
}
