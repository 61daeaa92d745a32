//! `nomad up`: applies pending migrations forward.

use console::style;
use nomad_core::Result;

use super::{context, print_plan, ApplyArgs};

pub async fn run(config_path: &str, events_json: bool, args: ApplyArgs) -> Result<()> {
    let ctx = context::load(config_path, events_json).await?;
    let config_auto_notx = ctx.config.auto_notx;
    let plan = ctx
        .migrator
        .up(&ctx.migrations, args.into_options(config_auto_notx))
        .await?;
    print_plan(&plan);
    println!("{}", style("up complete").green());
    Ok(())
}
