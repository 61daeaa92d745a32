//! SQLite driver. DDL here is never transactional, so
//! `Capabilities::supports_transactional_ddl` always reports `false`.
//!
//! SQLite has no connection pool in the Postgres/MySQL sense: a `:memory:`
//! database only survives on the connection that opened it, so the driver
//! holds exactly one `SqliteConnection` for its whole lifetime and hands out
//! shared, mutex-serialized access to it rather than acquiring a fresh
//! connection per call.

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteRow};
use sqlx::{ConnectOptions, Row};
use tokio::sync::Mutex;

use nomad_core::model::AppliedMigrationRow;
use nomad_core::{NomadError, Result};

use crate::driver::{Capabilities, Connection, Driver};

pub struct SqliteDriver {
    conn: Arc<Mutex<sqlx::SqliteConnection>>,
    table: String,
}

impl SqliteDriver {
    pub async fn connect(url: &str, table: &str) -> Result<Self> {
        let options = resolve_options(url)?;
        let conn = options.connect().await.map_err(map_error)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            table: table.to_string(),
        })
    }
}

fn resolve_options(url: &str) -> Result<SqliteConnectOptions> {
    if url == ":memory:" || url == "sqlite::memory:" {
        return Ok(SqliteConnectOptions::new().in_memory(true));
    }
    let path = url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .trim_start_matches("file:");
    Ok(SqliteConnectOptions::new().filename(path).create_if_missing(true))
}

fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

#[async_trait]
impl Driver for SqliteDriver {
    async fn connect(&self) -> Result<Box<dyn Connection>> {
        Ok(Box::new(SqliteConnectionHandle {
            conn: self.conn.clone(),
            table: self.table.clone(),
        }))
    }

    async fn close(&self) {
        // The shared connection is dropped along with the driver; sqlite has
        // no separate pool-level resource to release.
    }

    fn quote_ident(&self, ident: &str) -> String {
        quote_ident(ident)
    }

    fn now_expression(&self) -> &'static str {
        "CURRENT_TIMESTAMP"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            supports_transactional_ddl: false,
        }
    }

    async fn probe_connection(&self) -> Result<()> {
        let mut guard = self.conn.lock().await;
        sqlx::query("SELECT 1").execute(&mut *guard).await.map_err(map_error)?;
        Ok(())
    }
}

pub struct SqliteConnectionHandle {
    conn: Arc<Mutex<sqlx::SqliteConnection>>,
    table: String,
}

impl SqliteConnectionHandle {
    fn table(&self) -> String {
        quote_ident(&self.table)
    }
}

#[async_trait]
impl Connection for SqliteConnectionHandle {
    async fn ensure_migrations_table(&mut self) -> Result<()> {
        let table = self.table();
        let mut guard = self.conn.lock().await;
        let ddl = format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                version INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                checksum TEXT NOT NULL,
                applied_at TEXT,
                rolled_back_at TEXT
            )"
        );
        sqlx::query(&ddl).execute(&mut *guard).await.map_err(map_error)?;
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS nomad_lock (
                lock_name TEXT PRIMARY KEY,
                acquired_at TEXT NOT NULL
            )",
        )
        .execute(&mut *guard)
        .await
        .map_err(map_error)?;
        Ok(())
    }

    async fn fetch_applied_migrations(&mut self) -> Result<Vec<AppliedMigrationRow>> {
        let table = self.table();
        let mut guard = self.conn.lock().await;
        let rows: Vec<SqliteRow> = sqlx::query(&format!(
            "SELECT version, name, checksum, applied_at, rolled_back_at FROM {table}
             WHERE applied_at IS NOT NULL ORDER BY version ASC"
        ))
        .fetch_all(&mut *guard)
        .await
        .map_err(map_error)?;

        rows.into_iter()
            .map(|row| {
                let applied_at: Option<String> = row.try_get("applied_at").map_err(map_error)?;
                let rolled_back_at: Option<String> = row.try_get("rolled_back_at").map_err(map_error)?;
                Ok(AppliedMigrationRow {
                    version: row.try_get::<i64, _>("version").map_err(map_error)? as u64,
                    name: row.try_get("name").map_err(map_error)?,
                    checksum: row.try_get("checksum").map_err(map_error)?,
                    applied_at: applied_at.and_then(|s| parse_timestamp(&s)),
                    rolled_back_at: rolled_back_at.and_then(|s| parse_timestamp(&s)),
                })
            })
            .collect()
    }

    async fn mark_migration_applied(&mut self, version: u64, name: &str, checksum: &str) -> Result<()> {
        let table = self.table();
        let mut guard = self.conn.lock().await;
        sqlx::query(&format!(
            "INSERT INTO {table} (version, name, checksum, applied_at, rolled_back_at)
             VALUES (?, ?, ?, CURRENT_TIMESTAMP, NULL)
             ON CONFLICT (version) DO UPDATE SET
               name = excluded.name,
               checksum = excluded.checksum,
               applied_at = CURRENT_TIMESTAMP,
               rolled_back_at = NULL"
        ))
        .bind(version as i64)
        .bind(name)
        .bind(checksum)
        .execute(&mut *guard)
        .await
        .map_err(map_error)?;
        Ok(())
    }

    async fn mark_migration_rolled_back(&mut self, version: u64) -> Result<()> {
        let table = self.table();
        let mut guard = self.conn.lock().await;
        sqlx::query(&format!(
            "UPDATE {table} SET rolled_back_at = CURRENT_TIMESTAMP WHERE version = ?"
        ))
        .bind(version as i64)
        .execute(&mut *guard)
        .await
        .map_err(map_error)?;
        Ok(())
    }

    async fn acquire_lock(&mut self, hex_key: &str, _timeout_ms: u64) -> Result<bool> {
        let mut guard = self.conn.lock().await;
        let result = sqlx::query(
            "INSERT OR IGNORE INTO nomad_lock (lock_name, acquired_at) VALUES (?, CURRENT_TIMESTAMP)",
        )
        .bind(hex_key)
        .execute(&mut *guard)
        .await
        .map_err(map_error)?;
        Ok(result.rows_affected() == 1)
    }

    async fn release_lock(&mut self, hex_key: &str) -> Result<()> {
        let mut guard = self.conn.lock().await;
        sqlx::query("DELETE FROM nomad_lock WHERE lock_name = ?")
            .bind(hex_key)
            .execute(&mut *guard)
            .await
            .map_err(map_error)?;
        Ok(())
    }

    async fn begin_transaction(&mut self) -> Result<()> {
        let mut guard = self.conn.lock().await;
        sqlx::query("BEGIN IMMEDIATE").execute(&mut *guard).await.map_err(map_error)?;
        Ok(())
    }

    async fn commit_transaction(&mut self) -> Result<()> {
        let mut guard = self.conn.lock().await;
        sqlx::query("COMMIT").execute(&mut *guard).await.map_err(map_error)?;
        Ok(())
    }

    async fn rollback_transaction(&mut self) -> Result<()> {
        let mut guard = self.conn.lock().await;
        sqlx::query("ROLLBACK").execute(&mut *guard).await.map_err(map_error)?;
        Ok(())
    }

    async fn run_statement(&mut self, sql: &str) -> Result<()> {
        let mut guard = self.conn.lock().await;
        sqlx::query(sql).execute(&mut *guard).await.map_err(map_error)?;
        Ok(())
    }

    async fn dispose(self: Box<Self>) {
        drop(self);
    }
}

fn parse_timestamp(raw: &str) -> Option<chrono::DateTime<chrono::Utc>> {
    chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|naive| chrono::DateTime::from_naive_utc_and_offset(naive, chrono::Utc))
}

pub fn map_error(err: sqlx::Error) -> NomadError {
    if let sqlx::Error::Database(db_err) = &err {
        let message = db_err.message().to_ascii_lowercase();
        if message.contains("unable to open database file") || message.contains("database is locked") {
            return NomadError::Connection(err.to_string());
        }
        return NomadError::sql(err.to_string());
    }
    NomadError::Connection(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quote_ident_doubles_internal_quotes() {
        assert_eq!(quote_ident(r#"weird"name"#), r#""weird""name""#);
    }
}
