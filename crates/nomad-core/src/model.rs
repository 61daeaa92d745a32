//! Core data model.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// A single migration file discovered on disk.
#[derive(Debug, Clone)]
pub struct MigrationFile {
    /// 64-bit version derived from the leading numeric timestamp in the filename.
    pub version: u64,
    /// Basename with the version prefix and `.sql` suffix stripped.
    pub name: String,
    pub filepath: String,
    pub content: String,
    /// 64-char lowercase hex SHA-256 of the normalized content.
    pub checksum: String,
    pub parsed: ParsedMigration,
}

/// One half (up or down) of a parsed migration file.
#[derive(Debug, Clone, Default)]
pub struct Section {
    pub statements: Vec<String>,
    /// File line each entry in `statements` starts on, same length/order.
    pub statement_lines: Vec<u32>,
    pub notx: bool,
}

/// The parsed form of a migration file's body.
#[derive(Debug, Clone, Default)]
pub struct ParsedMigration {
    pub up: Section,
    pub down: Section,
    pub tags: Option<BTreeSet<String>>,
    /// File-level `notx` alias; true if either section carries it or the
    /// file declared it outside any section.
    pub no_transaction: bool,
}

/// A transaction-incompatible statement found by the hazard detector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Hazard {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub line: u32,
    pub column: u32,
    pub statement: String,
}

/// Direction a planned migration step runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
}

/// One migration decorated with its execution plan.
#[derive(Debug, Clone)]
pub struct PlannedMigration {
    pub version: u64,
    pub name: String,
    pub direction: Direction,
    pub transaction: bool,
    pub reason: Option<&'static str>,
    pub statements: Vec<String>,
    /// File line each entry in `statements` starts on, for error-origin
    /// reporting when a statement fails to apply.
    pub statement_lines: Vec<u32>,
    pub hazards: Vec<Hazard>,
    pub warnings: Vec<String>,
}

/// A row in the persisted migrations table.
#[derive(Debug, Clone)]
pub struct AppliedMigrationRow {
    pub version: u64,
    pub name: String,
    /// `None` signals a legacy row applied before checksums were tracked.
    pub checksum: Option<String>,
    pub applied_at: Option<DateTime<Utc>>,
    pub rolled_back_at: Option<DateTime<Utc>>,
}

impl AppliedMigrationRow {
    /// A migration is currently applied if it has an `applied_at` and has
    /// not since been rolled back.
    pub fn is_currently_applied(&self) -> bool {
        self.applied_at.is_some() && self.rolled_back_at.is_none()
    }
}

/// Deterministic cross-process lock identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockKey(pub String);

impl LockKey {
    pub fn derive(url: &str, schema: &str, table: &str, dir: &str) -> Self {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(url.as_bytes());
        hasher.update(b"|");
        hasher.update(schema.as_bytes());
        hasher.update(b"|");
        hasher.update(table.as_bytes());
        hasher.update(b"|");
        hasher.update(dir.as_bytes());
        LockKey(hex::encode(hasher.finalize()))
    }

    pub fn as_hex(&self) -> &str {
        &self.0
    }
}

/// Per-version reconciliation report produced by `status()`.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationStatus {
    pub version: u64,
    pub name: String,
    pub applied: bool,
    pub applied_at: Option<DateTime<Utc>>,
    pub has_drift: bool,
    pub is_missing: bool,
    pub has_legacy_checksum: bool,
}

/// Result of `verify()`.
#[derive(Debug, Clone, Serialize)]
pub struct VerifyReport {
    pub valid: bool,
    pub drift_count: usize,
    pub drifted_migrations: Vec<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_key_is_deterministic_and_dialect_independent() {
        let a = LockKey::derive("postgres://x", "public", "nomad_migrations", "migrations");
        let b = LockKey::derive("postgres://x", "public", "nomad_migrations", "migrations");
        assert_eq!(a, b);
        assert_eq!(a.as_hex().len(), 64);
    }

    #[test]
    fn lock_key_differs_by_any_component() {
        let base = LockKey::derive("url", "public", "t", "dir");
        let diff_url = LockKey::derive("url2", "public", "t", "dir");
        let diff_dir = LockKey::derive("url", "public", "t", "dir2");
        assert_ne!(base, diff_url);
        assert_ne!(base, diff_dir);
    }

    #[test]
    fn currently_applied_requires_no_rollback() {
        let mut row = AppliedMigrationRow {
            version: 1,
            name: "x".into(),
            checksum: Some("c".into()),
            applied_at: Some(Utc::now()),
            rolled_back_at: None,
        };
        assert!(row.is_currently_applied());
        row.rolled_back_at = Some(Utc::now());
        assert!(!row.is_currently_applied());
    }
}
