//! The migrator: the one place that sequences file state, database state,
//! and transaction policy into an actual run.

use std::collections::BTreeSet;
use std::sync::Arc;

use nomad_core::config::Config;
use nomad_core::model::{
    AppliedMigrationRow, Direction, LockKey, MigrationFile, MigrationStatus, PlannedMigration,
    VerifyReport,
};
use nomad_core::plan::{self, Plan, PlanOptions};
use nomad_core::{NomadError, Result};

use crate::driver::Driver;
use crate::events::{Event, EventSink, NullSink};

pub struct Migrator {
    driver: Arc<dyn Driver>,
    config: Config,
    sink: Arc<dyn EventSink>,
}

impl Migrator {
    pub fn new(driver: Arc<dyn Driver>, config: Config) -> Self {
        Self {
            driver,
            config,
            sink: Arc::new(NullSink),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    fn lock_key(&self) -> LockKey {
        LockKey::derive(
            &self.config.url,
            self.config.effective_schema().unwrap_or(""),
            &self.config.table,
            &self.config.dir,
        )
    }

    async fn fetch_applied(&self) -> Result<Vec<AppliedMigrationRow>> {
        let mut conn = self.driver.connect().await?;
        conn.ensure_migrations_table().await?;
        let rows = conn.fetch_applied_migrations().await?;
        conn.dispose().await;
        Ok(rows)
    }

    /// Create the migrations (and, for sqlite, lock) table if it is missing,
    /// without touching applied rows. Used by `doctor --fix`.
    pub async fn ensure_table(&self) -> Result<()> {
        let mut conn = self.driver.connect().await?;
        conn.ensure_migrations_table().await?;
        conn.dispose().await;
        Ok(())
    }

    /// Applied rows that have no corresponding file on disk, in version order.
    fn missing_versions(migrations: &[MigrationFile], applied: &[AppliedMigrationRow]) -> Vec<u64> {
        let on_disk: BTreeSet<u64> = migrations.iter().map(|m| m.version).collect();
        applied
            .iter()
            .filter(|row| row.is_currently_applied() && !on_disk.contains(&row.version))
            .map(|row| row.version)
            .collect()
    }

    pub async fn status(&self, migrations: &[MigrationFile]) -> Result<Vec<MigrationStatus>> {
        let applied = self.fetch_applied().await?;
        let by_version: std::collections::HashMap<u64, &AppliedMigrationRow> =
            applied.iter().map(|r| (r.version, r)).collect();

        let mut entries: Vec<MigrationStatus> = migrations
            .iter()
            .map(|file| {
                let row = by_version.get(&file.version);
                let applied = row.map(|r| r.is_currently_applied()).unwrap_or(false);
                let has_drift = row
                    .and_then(|r| r.checksum.as_deref())
                    .map(|recorded| applied && !file.checksum.eq_ignore_ascii_case(recorded))
                    .unwrap_or(false);
                let has_legacy_checksum = row.map(|r| applied && r.checksum.is_none()).unwrap_or(false);
                MigrationStatus {
                    version: file.version,
                    name: file.name.clone(),
                    applied,
                    applied_at: row.and_then(|r| r.applied_at),
                    has_drift,
                    is_missing: false,
                    has_legacy_checksum,
                }
            })
            .collect();

        for version in Self::missing_versions(migrations, &applied) {
            let row = by_version[&version];
            entries.push(MigrationStatus {
                version,
                name: row.name.clone(),
                applied: true,
                applied_at: row.applied_at,
                has_drift: false,
                is_missing: true,
                has_legacy_checksum: row.checksum.is_none(),
            });
        }

        entries.sort_by_key(|s| s.version);
        Ok(entries)
    }

    pub async fn verify(&self, migrations: &[MigrationFile]) -> Result<VerifyReport> {
        self.sink.emit(&Event::VerifyStart);
        let applied = self.fetch_applied().await?;

        let missing = Self::missing_versions(migrations, &applied);
        if let Some(&version) = missing.first() {
            self.sink.emit(&Event::VerifyEnd { drift_count: 0 });
            return Err(NomadError::MissingFile(version));
        }

        let by_version: std::collections::HashMap<u64, &AppliedMigrationRow> =
            applied.iter().map(|r| (r.version, r)).collect();

        let drifted_migrations: Vec<u64> = migrations
            .iter()
            .filter_map(|file| {
                let row = by_version.get(&file.version)?;
                if !row.is_currently_applied() {
                    return None;
                }
                let recorded = row.checksum.as_deref().unwrap_or("");
                if file.checksum.eq_ignore_ascii_case(recorded) {
                    None
                } else {
                    Some(file.version)
                }
            })
            .collect();

        let report = VerifyReport {
            valid: drifted_migrations.is_empty(),
            drift_count: drifted_migrations.len(),
            drifted_migrations,
        };
        self.sink.emit(&Event::VerifyEnd {
            drift_count: report.drift_count,
        });

        if !report.valid && !self.config.allow_drift {
            return Err(NomadError::Drift(report.drift_count));
        }
        Ok(report)
    }

    pub async fn plan_up(&self, migrations: &[MigrationFile], options: PlanOptions) -> Result<Plan> {
        let applied = self.fetch_applied().await?;
        let applied_versions: BTreeSet<u64> = applied
            .iter()
            .filter(|r| r.is_currently_applied())
            .map(|r| r.version)
            .collect();
        let pending: Vec<&MigrationFile> = migrations
            .iter()
            .filter(|m| !applied_versions.contains(&m.version))
            .collect();
        plan::plan_up(&pending, &options)
    }

    pub async fn plan_down(&self, migrations: &[MigrationFile], options: PlanOptions) -> Result<Plan> {
        let applied = self.fetch_applied().await?;
        let applied_versions: BTreeSet<u64> = applied
            .iter()
            .filter(|r| r.is_currently_applied())
            .map(|r| r.version)
            .collect();
        let applied_files: Vec<&MigrationFile> = migrations
            .iter()
            .filter(|m| applied_versions.contains(&m.version))
            .collect();
        plan::plan_down(&applied_files, &options)
    }

    /// `target` honors the configured auto-notx default; there is no
    /// per-call override for `to`/`redo` since they take no other flags.
    pub async fn plan_to(&self, migrations: &[MigrationFile], target: u64) -> Result<Plan> {
        let applied = self.fetch_applied().await?;
        let applied_versions: BTreeSet<u64> = applied
            .iter()
            .filter(|r| r.is_currently_applied())
            .map(|r| r.version)
            .collect();
        let all: Vec<&MigrationFile> = migrations.iter().collect();
        let options = PlanOptions {
            auto_notx: self.config.auto_notx,
            ..Default::default()
        };
        plan::plan_to(&all, &applied_versions, target, &options)
    }

    pub async fn up(&self, migrations: &[MigrationFile], options: PlanOptions) -> Result<Plan> {
        let plan = self.plan_up(migrations, options).await?;
        self.execute(migrations, &plan).await?;
        Ok(plan)
    }

    pub async fn down(&self, migrations: &[MigrationFile], options: PlanOptions) -> Result<Plan> {
        let plan = self.plan_down(migrations, options).await?;
        self.execute(migrations, &plan).await?;
        Ok(plan)
    }

    pub async fn to(&self, migrations: &[MigrationFile], target: u64) -> Result<Plan> {
        let plan = self.plan_to(migrations, target).await?;
        self.execute(migrations, &plan).await?;
        Ok(plan)
    }

    pub async fn redo(&self, migrations: &[MigrationFile], version: u64) -> Result<(Plan, Plan)> {
        let down_options = PlanOptions {
            count: Some(1),
            auto_notx: self.config.auto_notx,
            ..Default::default()
        };
        let down_plan = self.plan_down(migrations, down_options).await?;
        if down_plan.migrations.first().map(|m| m.version) != Some(version) {
            return Err(NomadError::MissingFile(version));
        }
        self.execute(migrations, &down_plan).await?;

        let up_options = PlanOptions {
            limit: Some(1),
            auto_notx: self.config.auto_notx,
            ..Default::default()
        };
        let up_plan = self.plan_up(migrations, up_options).await?;
        self.execute(migrations, &up_plan).await?;
        Ok((down_plan, up_plan))
    }

    /// Run a previously computed plan under the cross-process lock, honoring
    /// each migration's transaction policy and remaining safe to interrupt
    /// mid-run.
    async fn execute(&self, migrations: &[MigrationFile], plan: &Plan) -> Result<()> {
        if plan.migrations.is_empty() {
            return Ok(());
        }

        let lock_key = self.lock_key();
        let mut lock_conn = self.driver.connect().await?;
        let acquired = lock_conn
            .acquire_lock(lock_key.as_hex(), self.config.lock_timeout_ms)
            .await?;
        if !acquired {
            lock_conn.dispose().await;
            return Err(NomadError::LockTimeout(self.config.lock_timeout_ms));
        }
        self.sink.emit(&Event::LockAcquired {
            key: lock_key.as_hex().to_string(),
            waited_ms: 0,
        });

        let guard = LockReleaseGuard {
            conn: Some(lock_conn),
            key: lock_key.as_hex().to_string(),
            sink: self.sink.clone(),
        };

        let result = tokio::select! {
            res = self.run_plan(migrations, plan) => res,
            _ = wait_for_shutdown_signal() => {
                Err(NomadError::Connection("interrupted before completion".to_string()))
            }
        };

        guard.release().await;
        result
    }

    async fn run_plan(&self, migrations: &[MigrationFile], plan: &Plan) -> Result<()> {
        let by_version: std::collections::HashMap<u64, &MigrationFile> =
            migrations.iter().map(|m| (m.version, m)).collect();

        for planned in &plan.migrations {
            let file = by_version
                .get(&planned.version)
                .ok_or(NomadError::MissingFile(planned.version))?;
            self.apply_one(file, planned).await?;
        }
        Ok(())
    }

    async fn apply_one(&self, file: &MigrationFile, planned: &PlannedMigration) -> Result<()> {
        self.sink.emit(&Event::ApplyStart {
            version: planned.version,
            name: planned.name.clone(),
            direction: planned.direction,
        });

        let mut conn = self.driver.connect().await?;
        let statements = &planned.statements;
        let use_transaction = planned.transaction && self.driver.capabilities().supports_transactional_ddl;

        let outcome: Result<()> = async {
            if use_transaction {
                conn.begin_transaction().await?;
            }
            for (index, stmt) in statements.iter().enumerate() {
                self.sink.emit(&Event::StmtRun {
                    version: planned.version,
                    index,
                    total: statements.len(),
                });
                if let Err(err) = conn.run_statement(stmt).await {
                    if use_transaction {
                        let _ = conn.rollback_transaction().await;
                    }
                    let line = planned.statement_lines.get(index).copied().unwrap_or(0);
                    return Err(err.with_origin(&file.filepath, line, 1, stmt));
                }
            }
            if use_transaction {
                conn.commit_transaction().await?;
            }
            Ok(())
        }
        .await;

        if outcome.is_ok() {
            match planned.direction {
                Direction::Up => {
                    conn.mark_migration_applied(planned.version, &planned.name, &file.checksum)
                        .await?;
                }
                Direction::Down => {
                    conn.mark_migration_rolled_back(planned.version).await?;
                }
            }
        }

        self.sink.emit(&Event::ApplyEnd {
            version: planned.version,
            name: planned.name.clone(),
            direction: planned.direction,
            ok: outcome.is_ok(),
        });

        conn.dispose().await;
        outcome
    }
}

/// Waits for either SIGINT or (on unix) SIGTERM. Used to race against the
/// in-flight apply loop so the advisory lock is always released, even on a
/// signal mid-run.
async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

/// RAII-style backstop: releases the advisory/named lock on every exit path
/// from `execute`, including the interrupted-by-signal branch.
struct LockReleaseGuard {
    conn: Option<Box<dyn crate::driver::Connection>>,
    key: String,
    sink: Arc<dyn EventSink>,
}

impl LockReleaseGuard {
    async fn release(mut self) {
        if let Some(mut conn) = self.conn.take() {
            let _ = conn.release_lock(&self.key).await;
            self.sink.emit(&Event::LockReleased {
                key: self.key.clone(),
            });
            conn.dispose().await;
        }
    }
}
