//! `nomad plan`: computes a plan without applying it.

use nomad_core::Result;

use super::{context, print_plan, PlanTarget};

pub async fn run(config_path: &str, target: PlanTarget) -> Result<()> {
    let ctx = context::load(config_path, false).await?;

    let config_auto_notx = ctx.config.auto_notx;
    let plan = match target {
        PlanTarget::Up(args) => {
            ctx.migrator
                .plan_up(&ctx.migrations, args.into_options(config_auto_notx))
                .await?
        }
        PlanTarget::Down(args) => {
            ctx.migrator
                .plan_down(&ctx.migrations, args.into_options(config_auto_notx))
                .await?
        }
        PlanTarget::To { version } => ctx.migrator.plan_to(&ctx.migrations, version).await?,
    };

    print_plan(&plan);
    Ok(())
}
