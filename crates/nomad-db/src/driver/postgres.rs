//! PostgreSQL driver.

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tokio::time::{sleep, Duration, Instant};

use nomad_core::model::AppliedMigrationRow;
use nomad_core::{NomadError, Result};

use crate::driver::{Capabilities, Connection, Driver};

pub struct PostgresDriver {
    pool: PgPool,
    schema: String,
    table: String,
    owns_pool: bool,
}

impl PostgresDriver {
    pub async fn connect(url: &str, schema: &str, table: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(url)
            .await
            .map_err(map_error)?;
        Ok(Self {
            pool,
            schema: schema.to_string(),
            table: table.to_string(),
            owns_pool: true,
        })
    }

    /// Wrap an externally-constructed pool. A driver must never close a pool
    /// it did not create.
    pub fn from_pool(pool: PgPool, schema: &str, table: &str) -> Self {
        Self {
            pool,
            schema: schema.to_string(),
            table: table.to_string(),
            owns_pool: false,
        }
    }

    fn qualified_table(&self) -> String {
        format!(
            "{}.{}",
            quote_ident(&self.schema),
            quote_ident(&self.table)
        )
    }
}

fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Derive a 31-bit positive integer advisory-lock key from the first 4
/// bytes of a hex digest.
fn derive_lock_id(hex_key: &str) -> i64 {
    let bytes = hex::decode(&hex_key[..8.min(hex_key.len())]).unwrap_or_default();
    let mut buf = [0u8; 4];
    for (i, b) in bytes.iter().take(4).enumerate() {
        buf[i] = *b;
    }
    let value = u32::from_be_bytes(buf);
    ((value % 2_147_483_647) + 1) as i64
}

#[async_trait]
impl Driver for PostgresDriver {
    async fn connect(&self) -> Result<Box<dyn Connection>> {
        let conn = self.pool.acquire().await.map_err(map_error)?;
        Ok(Box::new(PostgresConnection {
            conn,
            schema: self.schema.clone(),
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
        "NOW()"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            supports_transactional_ddl: true,
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

pub struct PostgresConnection {
    conn: sqlx::pool::PoolConnection<sqlx::Postgres>,
    schema: String,
    table: String,
}

impl PostgresConnection {
    fn qualified_table(&self) -> String {
        format!(
            "{}.{}",
            quote_ident(&self.schema),
            quote_ident(&self.table)
        )
    }
}

#[async_trait]
impl Connection for PostgresConnection {
    async fn ensure_migrations_table(&mut self) -> Result<()> {
        let table = self.qualified_table();
        let schema_ident = quote_ident(&self.schema);
        sqlx::query(&format!("CREATE SCHEMA IF NOT EXISTS {schema_ident}"))
            .execute(&mut *self.conn)
            .await
            .map_err(map_error)?;
        let ddl = format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                version BIGINT PRIMARY KEY,
                name TEXT NOT NULL,
                checksum TEXT NOT NULL,
                applied_at TIMESTAMPTZ,
                rolled_back_at TIMESTAMPTZ
            )"
        );
        sqlx::query(&ddl).execute(&mut *self.conn).await.map_err(map_error)?;
        Ok(())
    }

    async fn fetch_applied_migrations(&mut self) -> Result<Vec<AppliedMigrationRow>> {
        let table = self.qualified_table();
        let rows: Vec<PgRow> = sqlx::query(&format!(
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
        let table = self.qualified_table();
        sqlx::query(&format!(
            "INSERT INTO {table} (version, name, checksum, applied_at, rolled_back_at)
             VALUES ($1, $2, $3, NOW(), NULL)
             ON CONFLICT (version) DO UPDATE SET
               name = EXCLUDED.name,
               checksum = EXCLUDED.checksum,
               applied_at = NOW(),
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
        let table = self.qualified_table();
        sqlx::query(&format!(
            "UPDATE {table} SET rolled_back_at = NOW() WHERE version = $1"
        ))
        .bind(version as i64)
        .execute(&mut *self.conn)
        .await
        .map_err(map_error)?;
        Ok(())
    }

    async fn acquire_lock(&mut self, hex_key: &str, timeout_ms: u64) -> Result<bool> {
        let lock_id = derive_lock_id(hex_key);
        let deadline = Instant::now() + Duration::from_millis(timeout_ms);
        loop {
            let acquired: bool = sqlx::query_scalar("SELECT pg_try_advisory_lock($1)")
                .bind(lock_id)
                .fetch_one(&mut *self.conn)
                .await
                .map_err(map_error)?;
            if acquired {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            sleep(Duration::from_millis(200)).await;
        }
    }

    async fn release_lock(&mut self, hex_key: &str) -> Result<()> {
        let lock_id = derive_lock_id(hex_key);
        sqlx::query("SELECT pg_advisory_unlock($1)")
            .bind(lock_id)
            .execute(&mut *self.conn)
            .await
            .map_err(map_error)?;
        Ok(())
    }

    async fn begin_transaction(&mut self) -> Result<()> {
        sqlx::query("BEGIN").execute(&mut *self.conn).await.map_err(map_error)?;
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

/// Classify a raw `sqlx::Error` into the nomad taxonomy. This is the only
/// place Postgres SQLSTATEs or message text are inspected.
pub fn map_error(err: sqlx::Error) -> NomadError {
    if let sqlx::Error::Database(db_err) = &err {
        let code = db_err.code().map(|c| c.to_string()).unwrap_or_default();
        let message = db_err.message().to_ascii_lowercase();

        match code.as_str() {
            "08001" | "08004" | "08006" | "57P03" => return NomadError::Connection(err.to_string()),
            "28P01" | "28000" => return NomadError::Connection(err.to_string()),
            "3D000" => return NomadError::Connection(err.to_string()),
            _ => {}
        }
        if message.contains("does not exist") && message.contains("database") {
            return NomadError::Connection(err.to_string());
        }
        return NomadError::sql(err.to_string());
    }

    let text = err.to_string().to_ascii_lowercase();
    if text.contains("econnrefused")
        || text.contains("enotfound")
        || text.contains("etimedout")
        || text.contains("connection refused")
        || text.contains("could not connect")
        || text.contains("invalid port")
    {
        return NomadError::Connection(err.to_string());
    }
    if text.contains("invalid url") || text.contains("relative url") || text.contains("parse error") {
        return NomadError::ParseConfig(err.to_string());
    }
    NomadError::Connection(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_lock_id_is_positive_and_deterministic() {
        let key = "a1b2c3d4e5f60718293a4b5c6d7e8f90123456789abcdef0123456789abcdef";
        let a = derive_lock_id(key);
        let b = derive_lock_id(key);
        assert_eq!(a, b);
        assert!(a > 0);
        assert!(a <= 2_147_483_647);
    }

    #[test]
    fn quote_ident_doubles_internal_quotes() {
        assert_eq!(quote_ident(r#"weird"name"#), r#""weird""name""#);
    }
}
