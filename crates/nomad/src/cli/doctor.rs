//! `nomad doctor`: a read-only composition of `status` and `verify`;
//! `--fix` only creates a missing migrations table.

use console::style;
use nomad_core::Result;

use super::context;

pub async fn run(config_path: &str, fix: bool) -> Result<()> {
    let ctx = context::load(config_path, false).await?;

    if fix {
        ctx.migrator.ensure_table().await?;
        println!("{} migrations table present", style("fix").green());
    }

    let status = ctx.migrator.status(&ctx.migrations).await?;
    let pending = status.iter().filter(|s| !s.applied).count();
    let missing = status.iter().filter(|s| s.is_missing).count();
    let legacy = status.iter().filter(|s| s.has_legacy_checksum).count();

    println!("{} migrations discovered, {pending} pending, {missing} missing, {legacy} legacy checksum", status.len());

    match ctx.migrator.verify(&ctx.migrations).await {
        Ok(report) if report.valid => println!("{} no drift detected", style("ok").green()),
        Ok(report) => println!(
            "{} {} migration(s) drifted: {:?}",
            style("drift").red(),
            report.drift_count,
            report.drifted_migrations
        ),
        Err(err) => println!("{} {err}", style("error").red()),
    }

    Ok(())
}
