//! Driver abstraction: a narrow, dialect-neutral contract that the migrator
//! drives without ever inspecting a raw SQLSTATE or errno itself.

pub mod mysql;
pub mod postgres;
pub mod sqlite;

use async_trait::async_trait;
use nomad_core::model::AppliedMigrationRow;
use nomad_core::Result;

/// Capabilities advertised by a driver; used only to decide transaction
/// policy, never to change the shape of the `Connection` contract.
#[derive(Debug, Clone, Copy)]
pub struct Capabilities {
    pub supports_transactional_ddl: bool,
}

/// Pool-level resource owner. Implementations construct their concrete
/// `sqlx` pool from a URL and hand out single physical connections via
/// `connect()` — the migrator never shares one `Connection` across two
/// concurrent operations.
#[async_trait]
pub trait Driver: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn Connection>>;

    /// Release pool-level resources. A no-op for pools this driver does
    /// not own.
    async fn close(&self);

    fn quote_ident(&self, ident: &str) -> String;

    fn now_expression(&self) -> &'static str;

    fn capabilities(&self) -> Capabilities;

    async fn probe_connection(&self) -> Result<()>;
}

/// A single physical connection, owned exclusively by the caller for the
/// duration of one migrator operation.
#[async_trait]
pub trait Connection: Send {
    async fn ensure_migrations_table(&mut self) -> Result<()>;

    /// Rows where `applied_at IS NOT NULL`, ordered by version ascending.
    async fn fetch_applied_migrations(&mut self) -> Result<Vec<AppliedMigrationRow>>;

    /// Upsert that refreshes `applied_at` and clears `rolled_back_at`.
    async fn mark_migration_applied(&mut self, version: u64, name: &str, checksum: &str) -> Result<()>;

    /// Sets `rolled_back_at` to now.
    async fn mark_migration_rolled_back(&mut self, version: u64) -> Result<()>;

    async fn acquire_lock(&mut self, hex_key: &str, timeout_ms: u64) -> Result<bool>;

    async fn release_lock(&mut self, hex_key: &str) -> Result<()>;

    async fn begin_transaction(&mut self) -> Result<()>;

    async fn commit_transaction(&mut self) -> Result<()>;

    async fn rollback_transaction(&mut self) -> Result<()>;

    async fn run_statement(&mut self, sql: &str) -> Result<()>;

    async fn dispose(self: Box<Self>);
}
