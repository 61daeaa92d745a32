//! End-to-end lifecycle test against an in-memory sqlite database, driving
//! the same `Migrator` the CLI uses.

use std::sync::Arc;

use nomad_core::config::{Config, DriverKind};
use nomad_core::plan::PlanOptions;
use nomad_db::driver::sqlite::SqliteDriver;
use nomad_db::{Driver, Migrator};

fn write_migration(dir: &std::path::Path, version: u64, name: &str, up: &str, down: &str) {
    let path = dir.join(format!("{version}_{name}.sql"));
    std::fs::write(path, format!("-- +nomad Up\n{up}\n-- +nomad Down\n{down}\n")).unwrap();
}

fn config(dir: &std::path::Path) -> Config {
    Config {
        driver: DriverKind::Sqlite,
        url: "sqlite::memory:".to_string(),
        dir: dir.to_string_lossy().into_owned(),
        table: "nomad_migrations".to_string(),
        schema: None,
        allow_drift: false,
        auto_notx: false,
        lock_timeout_ms: 5_000,
        events_json: false,
    }
}

#[tokio::test]
async fn up_then_status_then_down_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    write_migration(
        dir.path(),
        1,
        "create_users",
        "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL);",
        "DROP TABLE users;",
    );
    write_migration(
        dir.path(),
        2,
        "create_posts",
        "CREATE TABLE posts (id INTEGER PRIMARY KEY, user_id INTEGER NOT NULL);",
        "DROP TABLE posts;",
    );

    let config = config(dir.path());
    let migrations = nomad::fsops::load_migrations(&config.dir).unwrap();
    assert_eq!(migrations.len(), 2);

    let driver: Arc<dyn Driver> = Arc::new(
        SqliteDriver::connect(&config.url, &config.table)
            .await
            .unwrap(),
    );
    let migrator = Migrator::new(driver, config.clone());

    let up_plan = migrator.up(&migrations, PlanOptions::default()).await.unwrap();
    assert_eq!(up_plan.migrations.len(), 2);

    let status = migrator.status(&migrations).await.unwrap();
    assert!(status.iter().all(|s| s.applied));
    assert!(status.iter().all(|s| !s.has_drift && !s.is_missing));

    let report = migrator.verify(&migrations).await.unwrap();
    assert!(report.valid);

    let down_plan = migrator
        .down(
            &migrations,
            PlanOptions {
                count: Some(1),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(down_plan.migrations.len(), 1);
    assert_eq!(down_plan.migrations[0].version, 2);

    let status_after_down = migrator.status(&migrations).await.unwrap();
    let posts_status = status_after_down.iter().find(|s| s.version == 2).unwrap();
    assert!(!posts_status.applied);
}

#[tokio::test]
async fn drift_is_detected_after_file_content_changes() {
    let dir = tempfile::tempdir().unwrap();
    write_migration(dir.path(), 1, "seed", "CREATE TABLE t (id INTEGER);", "DROP TABLE t;");

    let config = config(dir.path());
    let migrations = nomad::fsops::load_migrations(&config.dir).unwrap();

    let driver: Arc<dyn Driver> = Arc::new(
        SqliteDriver::connect(&config.url, &config.table)
            .await
            .unwrap(),
    );
    let migrator = Migrator::new(driver, config.clone());
    migrator.up(&migrations, PlanOptions::default()).await.unwrap();

    write_migration(
        dir.path(),
        1,
        "seed",
        "CREATE TABLE t (id INTEGER, extra TEXT);",
        "DROP TABLE t;",
    );
    let changed_migrations = nomad::fsops::load_migrations(&config.dir).unwrap();

    let err = migrator.verify(&changed_migrations).await.unwrap_err();
    assert_eq!(err.exit_code(), 2);
}

#[tokio::test]
async fn plan_to_target_version_applies_forward_then_back() {
    let dir = tempfile::tempdir().unwrap();
    write_migration(dir.path(), 1, "a", "CREATE TABLE a (id INTEGER);", "DROP TABLE a;");
    write_migration(dir.path(), 2, "b", "CREATE TABLE b (id INTEGER);", "DROP TABLE b;");
    write_migration(dir.path(), 3, "c", "CREATE TABLE c (id INTEGER);", "DROP TABLE c;");

    let config = config(dir.path());
    let migrations = nomad::fsops::load_migrations(&config.dir).unwrap();

    let driver: Arc<dyn Driver> = Arc::new(
        SqliteDriver::connect(&config.url, &config.table)
            .await
            .unwrap(),
    );
    let migrator = Migrator::new(driver, config.clone());

    let plan = migrator.to(&migrations, 2).await.unwrap();
    assert_eq!(plan.migrations.len(), 2);

    let status = migrator.status(&migrations).await.unwrap();
    assert!(status.iter().find(|s| s.version == 1).unwrap().applied);
    assert!(status.iter().find(|s| s.version == 2).unwrap().applied);
    assert!(!status.iter().find(|s| s.version == 3).unwrap().applied);

    let back_plan = migrator.to(&migrations, 0).await.unwrap();
    assert_eq!(back_plan.migrations.len(), 2);
    let status_after = migrator.status(&migrations).await.unwrap();
    assert!(status_after.iter().all(|s| !s.applied));
}
