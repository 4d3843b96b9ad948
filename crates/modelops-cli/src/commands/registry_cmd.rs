//! `mops registry` -- inspect registered model versions.

use modelops_platform::Platform;
use modelops_types::config::Config;

use super::{format_rate, format_ts, open_registry, table};

/// List every version of a family, oldest first.
pub async fn registry_list<P: Platform>(config: &Config, platform: &P, family: &str) -> anyhow::Result<()> {
    let versions = open_registry(config, platform).await?.list(family).await?;
    if versions.is_empty() {
        println!("No versions registered for {family}.");
        return Ok(());
    }

    let mut table = table();
    table.set_header(["VERSION", "STAGE", "mAP50", "mAP50-95", "F1", "SAMPLES", "RUN", "UPDATED"]);
    for v in &versions {
        table.add_row([
            v.id.to_string(),
            v.stage.to_string(),
            format_rate(Some(v.metrics.map50)),
            format_rate(Some(v.metrics.map50_95)),
            format_rate(Some(v.metrics.f1)),
            v.metrics.sample_size.to_string(),
            v.run_id.clone().unwrap_or_else(|| "-".into()),
            format_ts(Some(v.updated_at)),
        ]);
    }
    println!("{table}");
    Ok(())
}

/// Show the family's PRODUCTION version.
pub async fn registry_production<P: Platform>(config: &Config, platform: &P, family: &str) -> anyhow::Result<()> {
    let registry = open_registry(config, platform).await?;
    let Some(version) = registry.current_production(family).await? else {
        println!("No production version for {family}.");
        return Ok(());
    };

    println!("Version:  {}", version.id);
    println!("Artifact: {}", version.artifact_ref);
    println!("mAP50:    {:.3}", version.metrics.map50);
    println!("Samples:  {}", version.metrics.sample_size);
    for (key, value) in &version.tags {
        println!("  {key}: {value}");
    }
    Ok(())
}
