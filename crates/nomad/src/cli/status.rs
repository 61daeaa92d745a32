//! `nomad status`: prints the applied/pending/drift state of every migration.

use console::style;
use nomad_core::Result;

use super::context;

pub async fn run(config_path: &str, json: bool) -> Result<()> {
    let ctx = context::load(config_path, false).await?;
    let entries = ctx.migrator.status(&ctx.migrations).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&entries).unwrap_or_default());
        return Ok(());
    }

    for entry in &entries {
        let marker = if entry.is_missing {
            style("missing").red()
        } else if entry.has_drift {
            style("drift").red()
        } else if entry.applied {
            style("applied").green()
        } else {
            style("pending").yellow()
        };
        println!("{:>14}  {:<12} {}", entry.version, marker, entry.name);
    }

    Ok(())
}
