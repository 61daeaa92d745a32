//! Command-line surface: one module per subcommand, dispatched from a
//! `clap` derive tree.

mod context;
mod create;
mod doctor;
mod down;
mod init_config;
mod plan;
mod redo;
mod status;
mod to;
mod up;
mod verify;

use clap::{Parser, Subcommand};
use console::style;
use nomad_core::plan::{Plan as PlanResult, TagFilter};
use nomad_core::Result;

#[derive(Parser, Debug)]
#[command(name = "nomad", about = "SQL schema migration engine", version)]
pub struct Cli {
    /// Path to the migrator's TOML config file.
    #[arg(long, global = true, default_value = "nomad.toml", env = "NOMAD_CONFIG")]
    pub config: String,

    /// Force NDJSON event emission to stdout regardless of the config file.
    #[arg(long, global = true)]
    pub events_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Write a starter config file.
    InitConfig {
        #[arg(long, default_value = "nomad.toml")]
        path: String,
    },
    /// Scaffold a new migration file.
    Create { name: String },
    /// Print the applied/pending/drift state of every migration.
    Status {
        #[arg(long)]
        json: bool,
    },
    /// Preview a plan without applying it.
    Plan {
        #[command(subcommand)]
        target: PlanTarget,
    },
    /// Apply pending migrations forward.
    Up(ApplyArgs),
    /// Roll migrations back.
    Down(RollbackArgs),
    /// Migrate forward or backward to a specific version.
    To {
        version: u64,
    },
    /// Roll back one migration and reapply it.
    Redo {
        version: u64,
    },
    /// Compare on-disk migrations against the applied ledger.
    Verify {
        #[arg(long)]
        json: bool,
    },
    /// Read-only composition of status and verify, with an optional fix.
    Doctor {
        #[arg(long)]
        fix: bool,
    },
}

#[derive(Subcommand, Debug)]
pub enum PlanTarget {
    Up(ApplyArgs),
    Down(RollbackArgs),
    To { version: u64 },
}

#[derive(clap::Args, Debug, Clone, Default)]
pub struct ApplyArgs {
    #[arg(long)]
    pub limit: Option<usize>,
    #[arg(long = "tag")]
    pub tags: Vec<String>,
    #[arg(long)]
    pub include_ancestors: bool,
    #[arg(long)]
    pub auto_notx: bool,
}

#[derive(clap::Args, Debug, Clone, Default)]
pub struct RollbackArgs {
    #[arg(long)]
    pub count: Option<usize>,
    #[arg(long = "tag")]
    pub tags: Vec<String>,
    #[arg(long)]
    pub auto_notx: bool,
}

impl ApplyArgs {
    /// `config_auto_notx` is the configured default; the CLI flag only ever
    /// turns auto-notx on, never off.
    fn into_options(self, config_auto_notx: bool) -> nomad_core::plan::PlanOptions {
        nomad_core::plan::PlanOptions {
            limit: self.limit,
            filter: filter_from_tags(self.tags),
            include_ancestors: self.include_ancestors,
            auto_notx: self.auto_notx || config_auto_notx,
            ..Default::default()
        }
    }
}

impl RollbackArgs {
    fn into_options(self, config_auto_notx: bool) -> nomad_core::plan::PlanOptions {
        nomad_core::plan::PlanOptions {
            count: self.count,
            filter: filter_from_tags(self.tags),
            auto_notx: self.auto_notx || config_auto_notx,
            ..Default::default()
        }
    }
}

fn filter_from_tags(tags: Vec<String>) -> Option<TagFilter> {
    if tags.is_empty() {
        None
    } else {
        Some(TagFilter { tags })
    }
}

pub async fn dispatch(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::InitConfig { path } => init_config::run(&path),
        Commands::Create { name } => create::run(&cli.config, &name),
        Commands::Status { json } => status::run(&cli.config, json).await,
        Commands::Plan { target } => plan::run(&cli.config, target).await,
        Commands::Up(args) => up::run(&cli.config, cli.events_json, args).await,
        Commands::Down(args) => down::run(&cli.config, cli.events_json, args).await,
        Commands::To { version } => to::run(&cli.config, cli.events_json, version).await,
        Commands::Redo { version } => redo::run(&cli.config, cli.events_json, version).await,
        Commands::Verify { json } => verify::run(&cli.config, json).await,
        Commands::Doctor { fix } => doctor::run(&cli.config, fix).await,
    }
}

/// Shared human-readable plan rendering used by `plan`, `up`, `down`, and `to`.
pub(crate) fn print_plan(plan: &PlanResult) {
    if plan.migrations.is_empty() {
        println!("{}", style("nothing to do").dim());
        return;
    }
    for m in &plan.migrations {
        let tx = if m.transaction {
            style("tx").green()
        } else {
            style("notx").yellow()
        };
        println!("{:>14}  {:<5} {:<4} {}", m.version, format!("{:?}", m.direction), tx, m.name);
        if !m.hazards.is_empty() {
            for hazard in &m.hazards {
                println!("                  {} {} at {}:{}", style("hazard").red(), hazard.kind, hazard.line, hazard.column);
            }
        }
    }
    for warning in &plan.warnings {
        println!("{} {warning}", style("warn").yellow());
    }
    println!(
        "{} total, {} transactional, {} non-transactional, {} hazard(s)",
        plan.summary.total, plan.summary.transactional, plan.summary.non_transactional, plan.summary.hazard_count
    );
}
