//! `nomad init-config`: writes a starter config file.

use console::style;
use nomad_core::Result;

const SKELETON: &str = r#"driver = "postgres"
url = "${DATABASE_URL}"
dir = "migrations"
table = "nomad_migrations"
schema = "public"
allow_drift = false
auto_notx = false
lock_timeout_ms = 30000
events_json = false
"#;

pub fn run(path: &str) -> Result<()> {
    if std::path::Path::new(path).exists() {
        println!("{} {path} already exists", style("skip").yellow());
        return Ok(());
    }
    std::fs::write(path, SKELETON)?;
    println!("{} wrote {path}", style("created").green());
    Ok(())
}
