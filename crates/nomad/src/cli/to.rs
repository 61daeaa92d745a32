//! `nomad to <version>`: migrates forward or backward to a target version.

use console::style;
use nomad_core::Result;

use super::{context, print_plan};

pub async fn run(config_path: &str, events_json: bool, version: u64) -> Result<()> {
    let ctx = context::load(config_path, events_json).await?;
    let plan = ctx.migrator.to(&ctx.migrations, version).await?;
    print_plan(&plan);
    println!("{} now at {version}", style("done").green());
    Ok(())
}
