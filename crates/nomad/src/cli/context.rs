//! Shared setup: load config, build the driver for the configured
//! dialect, and assemble a `Migrator`.

use std::sync::Arc;

use nomad_core::config::{Config, DriverKind};
use nomad_core::model::MigrationFile;
use nomad_core::{NomadError, Result};
use nomad_db::driver::mysql::MySqlDriver;
use nomad_db::driver::postgres::PostgresDriver;
use nomad_db::driver::sqlite::SqliteDriver;
use nomad_db::events::{EventSink, NdjsonSink, NullSink};
use nomad_db::{Driver, Migrator};

use crate::fsops;

pub struct Context {
    pub config: Config,
    pub migrations: Vec<MigrationFile>,
    pub migrator: Migrator,
}

pub async fn load(config_path: &str, events_json_override: bool) -> Result<Context> {
    let mut config = Config::from_file(config_path)?;
    if events_json_override {
        config.events_json = true;
    }

    let migrations = fsops::load_migrations(&config.dir)?;

    let driver: Arc<dyn Driver> = match config.driver {
        DriverKind::Postgres => Arc::new(
            PostgresDriver::connect(
                &config.url,
                config.effective_schema().unwrap_or("public"),
                &config.table,
            )
            .await?,
        ),
        DriverKind::Mysql => Arc::new(MySqlDriver::connect(&config.url, &config.table).await?),
        DriverKind::Sqlite => Arc::new(SqliteDriver::connect(&config.url, &config.table).await?),
    };

    let sink: Arc<dyn EventSink> = if config.events_json {
        Arc::new(NdjsonSink::new(std::io::stdout()))
    } else {
        Arc::new(NullSink)
    };

    let migrator = Migrator::new(driver, config.clone()).with_sink(sink);

    Ok(Context {
        config,
        migrations,
        migrator,
    })
}

pub fn parse_version(raw: &str) -> Result<u64> {
    raw.parse()
        .map_err(|_| NomadError::ParseConfig(format!("invalid migration version: {raw}")))
}
