//! Migration directory enumeration. Reading files and walking directories
//! lives here so `nomad-core` stays IO-free.

use std::path::Path;

use nomad_core::checksum;
use nomad_core::model::MigrationFile;
use nomad_core::parse;
use nomad_core::{NomadError, Result};

/// Load and parse every `*.sql` file directly inside `dir`, sorted by
/// version ascending. Filenames must start with a numeric version prefix
/// followed by an underscore, e.g. `20260115093000_add_users.sql`.
pub fn load_migrations(dir: impl AsRef<Path>) -> Result<Vec<MigrationFile>> {
    let dir = dir.as_ref();
    let mut files = Vec::new();

    let entries = std::fs::read_dir(dir).map_err(NomadError::Io)?;
    for entry in entries {
        let entry = entry.map_err(NomadError::Io)?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("sql") {
            continue;
        }

        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| NomadError::ParseConfig(format!("non-utf8 filename: {}", path.display())))?;

        let (version, name) = split_filename(filename)
            .ok_or_else(|| NomadError::ParseConfig(format!("malformed migration filename: {filename}")))?;

        let content = std::fs::read_to_string(&path).map_err(NomadError::Io)?;
        let parsed = parse::parse(&content)?;
        let digest = checksum::calculate(&content);

        files.push(MigrationFile {
            version,
            name,
            filepath: path.to_string_lossy().into_owned(),
            content,
            checksum: digest,
            parsed,
        });
    }

    files.sort_by_key(|f| f.version);
    Ok(files)
}

/// Split `20260115093000_add_users.sql` into `(20260115093000, "add_users")`.
fn split_filename(filename: &str) -> Option<(u64, String)> {
    let stem = filename.strip_suffix(".sql")?;
    let (version_str, name) = stem.split_once('_')?;
    let version: u64 = version_str.parse().ok()?;
    if name.is_empty() {
        return None;
    }
    Some((version, name.to_string()))
}

/// Current time in milliseconds since the epoch, used as the version prefix
/// for newly scaffolded migration files.
pub fn now_version() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Slugify a human-provided migration name: lowercase, non-alphanumeric
/// runs collapsed to a single underscore, trimmed of leading/trailing
/// underscores.
pub fn slugify(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut last_was_sep = false;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
            last_was_sep = false;
        } else if !last_was_sep {
            out.push('_');
            last_was_sep = true;
        }
    }
    out.trim_matches('_').to_string()
}

/// Write a new migration skeleton file into `dir`, returning its path.
pub fn scaffold(dir: impl AsRef<Path>, name: &str) -> Result<std::path::PathBuf> {
    let dir = dir.as_ref();
    std::fs::create_dir_all(dir).map_err(NomadError::Io)?;

    let version = now_version();
    let slug = slugify(name);
    let filename = format!("{version}_{slug}.sql");
    let path = dir.join(&filename);

    let skeleton = "-- +nomad Up\n\n\n-- +nomad Down\n\n";
    std::fs::write(&path, skeleton).map_err(NomadError::Io)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn split_filename_extracts_version_and_name() {
        assert_eq!(
            split_filename("20260115093000_add_users.sql"),
            Some((20260115093000, "add_users".to_string()))
        );
    }

    #[test]
    fn split_filename_rejects_non_numeric_prefix() {
        assert_eq!(split_filename("add_users.sql"), None);
    }

    #[test]
    fn slugify_collapses_and_lowercases() {
        assert_eq!(slugify("Add Users  Table!!"), "add_users_table");
    }

    #[test]
    fn load_migrations_sorts_by_version_ascending() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join("2_second.sql"),
            "-- +nomad Up\nSELECT 2;\n-- +nomad Down\nSELECT 2;\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("1_first.sql"),
            "-- +nomad Up\nSELECT 1;\n-- +nomad Down\nSELECT 1;\n",
        )
        .unwrap();

        let files = load_migrations(dir.path()).unwrap();
        let versions: Vec<u64> = files.iter().map(|f| f.version).collect();
        assert_eq!(versions, vec![1, 2]);
    }

    #[test]
    fn scaffold_writes_a_directive_skeleton() {
        let dir = tempdir().unwrap();
        let path = scaffold(dir.path(), "Add Users").unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("-- +nomad Up"));
        assert!(content.contains("-- +nomad Down"));
        assert!(path.file_name().unwrap().to_str().unwrap().ends_with("_add_users.sql"));
    }
}
