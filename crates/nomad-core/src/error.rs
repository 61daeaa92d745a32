use thiserror::Error;

/// Top-level error type for nomad operations.
///
/// Every variant carries a stable process exit code so the
/// CLI layer never has to re-derive one from the error's shape.
#[derive(Error, Debug)]
pub enum NomadError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("{message}")]
    Sql {
        message: String,
        file: Option<String>,
        line: Option<u32>,
        column: Option<u32>,
        sql: Option<String>,
    },

    #[error("drift detected in {0} migration(s)")]
    Drift(usize),

    #[error("timed out acquiring migration lock after {0}ms")]
    LockTimeout(u64),

    #[error("{0}")]
    ParseConfig(String),

    #[error("migration file for version {0} is missing on disk")]
    MissingFile(u64),

    #[error("checksum mismatch for version {version}: expected {expected}, found {found}")]
    ChecksumMismatch {
        version: u64,
        expected: String,
        found: String,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl NomadError {
    /// The stable process exit code for this error kind.
    pub fn exit_code(&self) -> i32 {
        match self {
            NomadError::Sql { .. } => 1,
            NomadError::Drift(_) => 2,
            NomadError::LockTimeout(_) => 3,
            NomadError::ParseConfig(_) => 4,
            NomadError::MissingFile(_) => 5,
            NomadError::ChecksumMismatch { .. } => 6,
            NomadError::Connection(_) => 7,
            NomadError::Io(_) => 1,
        }
    }

    pub fn sql(message: impl Into<String>) -> Self {
        NomadError::Sql {
            message: message.into(),
            file: None,
            line: None,
            column: None,
            sql: None,
        }
    }

    /// Annotate a `Sql` error with the source coordinates of the statement
    /// that failed. This annotation only ever happens in the migrator,
    /// never inside a driver.
    pub fn with_origin(mut self, file: &str, line: u32, column: u32, sql: &str) -> Self {
        if let NomadError::Sql {
            file: f,
            line: l,
            column: c,
            sql: s,
            ..
        } = &mut self
        {
            *f = Some(file.to_string());
            *l = Some(line);
            *c = Some(column);
            *s = Some(sql.to_string());
        }
        self
    }

    /// `file:line:column` prefix for errors annotated via `with_origin`.
    pub fn origin_prefix(&self) -> Option<String> {
        match self {
            NomadError::Sql {
                file: Some(f),
                line: Some(l),
                column: Some(c),
                ..
            } => Some(format!("{f}:{l}:{c}")),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, NomadError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_match_taxonomy() {
        assert_eq!(NomadError::sql("x").exit_code(), 1);
        assert_eq!(NomadError::Drift(3).exit_code(), 2);
        assert_eq!(NomadError::LockTimeout(30_000).exit_code(), 3);
        assert_eq!(NomadError::ParseConfig("bad".into()).exit_code(), 4);
        assert_eq!(NomadError::MissingFile(1).exit_code(), 5);
        assert_eq!(
            NomadError::ChecksumMismatch {
                version: 1,
                expected: "a".into(),
                found: "b".into()
            }
            .exit_code(),
            6
        );
        assert_eq!(NomadError::Connection("down".into()).exit_code(), 7);
    }

    #[test]
    fn with_origin_annotates_sql_error() {
        let err = NomadError::sql("syntax error").with_origin("001_x.sql", 3, 5, "DROP TABLE x;");
        match err {
            NomadError::Sql {
                file, line, column, ..
            } => {
                assert_eq!(file.as_deref(), Some("001_x.sql"));
                assert_eq!(line, Some(3));
                assert_eq!(column, Some(5));
            }
            _ => panic!("expected Sql variant"),
        }
    }
}
