//! MySQL driver.

use async_trait::async_trait;
use sqlx::mysql::{MySqlPool, MySqlPoolOptions, MySqlRow};
use sqlx::Row;

use nomad_core::model::AppliedMigrationRow;
use nomad_core::{NomadError, Result};

use crate::driver::{Capabilities, Connection, Driver};

pub struct MySqlDriver {
    pool: MySqlPool,
    table: String,
    owns_pool: bool,
}

impl MySqlDriver {
    pub async fn connect(url: &str, table: &str) -> Result<Self> {
        let pool = MySqlPoolOptions::new()
            .max_connections(5)
            .connect(url)
            .await
            .map_err(map_error)?;
        Ok(Self {
            pool,
            table: table.to_string(),
            owns_pool: true,
        })
    }

    pub fn from_pool(pool: MySqlPool, table: &str) -> Self {
        Self {
            pool,
            table: table.to_string(),
            owns_pool: false,
        }
    }
}

fn quote_ident(ident: &str) -> String {
    format!("`{}`", ident.replace('`', "``"))
}

#[async_trait]
impl Driver for MySqlDriver {
    async fn connect(&self) -> Result<Box<dyn Connection>> {
        let conn = self.pool.acquire().await.map_err(map_error)?;
        Ok(Box::new(MySqlConnection {
            conn,
            table: self.table.clone(),
        }))
    }

    async fn close(&self) {
        if self.owns_pool {
            self.pool.close().await;
        }
    }

    fn quote_ident(&self, ident: &str) -> String {
        quote_ident(ident)
    }

    fn now_expression(&self) -> &'static str {
        "CURRENT_TIMESTAMP(3)"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            supports_transactional_ddl: false,
        }
    }

    async fn probe_connection(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(map_error)?;
        Ok(())
    }
}

pub struct MySqlConnection {
    conn: sqlx::pool::PoolConnection<sqlx::MySql>,
    table: String,
}

impl MySqlConnection {
    fn table(&self) -> String {
        quote_ident(&self.table)
    }
}

#[async_trait]
impl Connection for MySqlConnection {
    async fn ensure_migrations_table(&mut self) -> Result<()> {
        let table = self.table();
        let ddl = format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                version BIGINT PRIMARY KEY,
                name VARCHAR(255) NOT NULL,
                checksum CHAR(64) NOT NULL,
                applied_at DATETIME(3) NULL,
                rolled_back_at DATETIME(3) NULL
            ) ENGINE=InnoDB"
        );
        sqlx::query(&ddl).execute(&mut *self.conn).await.map_err(map_error)?;
        Ok(())
    }

    async fn fetch_applied_migrations(&mut self) -> Result<Vec<AppliedMigrationRow>> {
        let table = self.table();
        let rows: Vec<MySqlRow> = sqlx::query(&format!(
            "SELECT version, name, checksum, applied_at, rolled_back_at FROM {table}
             WHERE applied_at IS NOT NULL ORDER BY version ASC"
        ))
        .fetch_all(&mut *self.conn)
        .await
        .map_err(map_error)?;

        rows.into_iter()
            .map(|row| {
                Ok(AppliedMigrationRow {
                    version: row.try_get::<i64, _>("version").map_err(map_error)? as u64,
                    name: row.try_get("name").map_err(map_error)?,
                    checksum: row.try_get("checksum").map_err(map_error)?,
                    applied_at: row.try_get("applied_at").map_err(map_error)?,
                    rolled_back_at: row.try_get("rolled_back_at").map_err(map_error)?,
                })
            })
            .collect()
    }

    async fn mark_migration_applied(&mut self, version: u64, name: &str, checksum: &str) -> Result<()> {
        let table = self.table();
        sqlx::query(&format!(
            "INSERT INTO {table} (version, name, checksum, applied_at, rolled_back_at)
             VALUES (?, ?, ?, CURRENT_TIMESTAMP(3), NULL)
             ON DUPLICATE KEY UPDATE
               name = VALUES(name),
               checksum = VALUES(checksum),
               applied_at = CURRENT_TIMESTAMP(3),
               rolled_back_at = NULL"
        ))
        .bind(version as i64)
        .bind(name)
        .bind(checksum)
        .execute(&mut *self.conn)
        .await
        .map_err(map_error)?;
        Ok(())
    }

    async fn mark_migration_rolled_back(&mut self, version: u64) -> Result<()> {
        let table = self.table();
        sqlx::query(&format!(
            "UPDATE {table} SET rolled_back_at = CURRENT_TIMESTAMP(3) WHERE version = ?"
        ))
        .bind(version as i64)
        .execute(&mut *self.conn)
        .await
        .map_err(map_error)?;
        Ok(())
    }

    async fn acquire_lock(&mut self, hex_key: &str, timeout_ms: u64) -> Result<bool> {
        let name = &hex_key[..32.min(hex_key.len())];
        let timeout_secs = ((timeout_ms + 999) / 1000).max(1);
        let acquired: Option<i64> = sqlx::query_scalar("SELECT GET_LOCK(?, ?)")
            .bind(name)
            .bind(timeout_secs as i64)
            .fetch_one(&mut *self.conn)
            .await
            .map_err(map_error)?;
        Ok(acquired == Some(1))
    }

    async fn release_lock(&mut self, hex_key: &str) -> Result<()> {
        let name = &hex_key[..32.min(hex_key.len())];
        sqlx::query("SELECT RELEASE_LOCK(?)")
            .bind(name)
            .execute(&mut *self.conn)
            .await
            .map_err(map_error)?;
        Ok(())
    }

    async fn begin_transaction(&mut self) -> Result<()> {
        sqlx::query("START TRANSACTION")
            .execute(&mut *self.conn)
            .await
            .map_err(map_error)?;
        Ok(())
    }

    async fn commit_transaction(&mut self) -> Result<()> {
        sqlx::query("COMMIT").execute(&mut *self.conn).await.map_err(map_error)?;
        Ok(())
    }

    async fn rollback_transaction(&mut self) -> Result<()> {
        sqlx::query("ROLLBACK").execute(&mut *self.conn).await.map_err(map_error)?;
        Ok(())
    }

    async fn run_statement(&mut self, sql: &str) -> Result<()> {
        sqlx::query(sql).execute(&mut *self.conn).await.map_err(map_error)?;
        Ok(())
    }

    async fn dispose(self: Box<Self>) {
        drop(self);
    }
}

/// MySQL has no stable SQLSTATE-only story across versions; classify on the
/// driver error code plus message substrings.
pub fn map_error(err: sqlx::Error) -> NomadError {
    if let sqlx::Error::Database(db_err) = &err {
        let message = db_err.message().to_ascii_lowercase();
        let code = db_err.code().map(|c| c.to_string()).unwrap_or_default();

        if code == "HY000" || code == "08S01" {
            return NomadError::Connection(err.to_string());
        }
        if message.contains("access denied") || message.contains("unknown database") {
            return NomadError::Connection(err.to_string());
        }
        return NomadError::sql(err.to_string());
    }

    let text = err.to_string().to_ascii_lowercase();
    if text.contains("connection refused")
        || text.contains("could not connect")
        || text.contains("broken pipe")
        || text.contains("timed out")
    {
        return NomadError::Connection(err.to_string());
    }
    NomadError::Connection(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quote_ident_doubles_backticks() {
        assert_eq!(quote_ident("weird`name"), "`weird``name`");
    }
}
