//! Configuration record consumed by the migrator: TOML on disk, with
//! `${VAR}`/`$VAR` environment substitution and per-driver defaults.

use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{NomadError, Result};

/// Supported database backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriverKind {
    Postgres,
    Mysql,
    Sqlite,
}

/// Root migrator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub driver: DriverKind,
    pub url: String,
    pub dir: String,

    #[serde(default = "default_table")]
    pub table: String,

    #[serde(default)]
    pub schema: Option<String>,

    #[serde(default)]
    pub allow_drift: bool,

    #[serde(default)]
    pub auto_notx: bool,

    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,

    #[serde(default)]
    pub events_json: bool,
}

fn default_table() -> String {
    "nomad_migrations".to_string()
}

fn default_lock_timeout_ms() -> u64 {
    30_000
}

impl Config {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::parse_toml(&content)
    }

    pub fn parse_toml(content: &str) -> Result<Self> {
        let substituted = substitute_env_vars(content);
        let mut config: Config = toml::from_str(&substituted)
            .map_err(|e| NomadError::ParseConfig(format!("invalid config: {e}")))?;

        if config.driver == DriverKind::Postgres && config.schema.is_none() {
            config.schema = Some("public".to_string());
        }

        Ok(config)
    }

    /// Effective schema, defaulting per-driver (postgres: `public`;
    /// mysql/sqlite: none).
    pub fn effective_schema(&self) -> Option<&str> {
        self.schema.as_deref()
    }
}

/// Expand `${VAR}` and bare `$VAR` references from the process environment.
/// Unset variables are left untouched.
fn substitute_env_vars(content: &str) -> String {
    static BRACED: OnceLock<Regex> = OnceLock::new();
    static BARE: OnceLock<Regex> = OnceLock::new();

    let braced = BRACED.get_or_init(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap());
    let bare = BARE.get_or_init(|| Regex::new(r"\$([A-Za-z_][A-Za-z0-9_]*)").unwrap());

    let after_braced = braced.replace_all(content, |caps: &regex::Captures| {
        std::env::var(&caps[1]).unwrap_or_else(|_| caps[0].to_string())
    });

    bare.replace_all(&after_braced, |caps: &regex::Captures| {
        std::env::var(&caps[1]).unwrap_or_else(|_| caps[0].to_string())
    })
    .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_postgres_config_with_schema_default() {
        let toml = r#"
            driver = "postgres"
            url = "postgres://localhost/test"
            dir = "migrations"
        "#;
        let config = Config::parse_toml(toml).unwrap();
        assert_eq!(config.table, "nomad_migrations");
        assert_eq!(config.lock_timeout_ms, 30_000);
        assert_eq!(config.effective_schema(), Some("public"));
    }

    #[test]
    fn sqlite_config_has_no_schema_by_default() {
        let toml = r#"
            driver = "sqlite"
            url = "sqlite://./db.sqlite"
            dir = "migrations"
        "#;
        let config = Config::parse_toml(toml).unwrap();
        assert_eq!(config.effective_schema(), None);
    }

    #[test]
    fn braced_and_bare_env_vars_are_substituted() {
        std::env::set_var("NOMAD_TEST_URL", "postgres://u:p@localhost/db");
        std::env::set_var("NOMAD_TEST_DIR", "migrations");
        let toml = r#"
            driver = "postgres"
            url = "${NOMAD_TEST_URL}"
            dir = "$NOMAD_TEST_DIR"
        "#;
        let config = Config::parse_toml(toml).unwrap();
        assert_eq!(config.url, "postgres://u:p@localhost/db");
        assert_eq!(config.dir, "migrations");
        std::env::remove_var("NOMAD_TEST_URL");
        std::env::remove_var("NOMAD_TEST_DIR");
    }

    #[test]
    fn unset_env_var_is_left_untouched() {
        let toml = r#"
            driver = "sqlite"
            url = "${DEFINITELY_NOT_SET_XYZ}"
            dir = "migrations"
        "#;
        let config = Config::parse_toml(toml).unwrap();
        assert_eq!(config.url, "${DEFINITELY_NOT_SET_XYZ}");
    }
}
