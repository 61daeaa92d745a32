//! `nomad verify`: compares on-disk migrations against the applied ledger.

use console::style;
use nomad_core::Result;

use super::context;

pub async fn run(config_path: &str, json: bool) -> Result<()> {
    let ctx = context::load(config_path, false).await?;
    let report = ctx.migrator.verify(&ctx.migrations).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report).unwrap_or_default());
        return Ok(());
    }

    if report.valid {
        println!("{} no drift detected", style("ok").green());
    } else {
        println!(
            "{} {} migration(s) drifted: {:?}",
            style("drift").red(),
            report.drift_count,
            report.drifted_migrations
        );
    }
    Ok(())
}
