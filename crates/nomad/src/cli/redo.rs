//! `nomad redo <version>`: rolls back one migration and reapplies it.

use console::style;
use nomad_core::Result;

use super::{context, print_plan};

pub async fn run(config_path: &str, events_json: bool, version: u64) -> Result<()> {
    let ctx = context::load(config_path, events_json).await?;
    let (down_plan, up_plan) = ctx.migrator.redo(&ctx.migrations, version).await?;
    print_plan(&down_plan);
    print_plan(&up_plan);
    println!("{} {version}", style("redone").green());
    Ok(())
}
