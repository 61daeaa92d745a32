//! Transaction-hazard detection over code segments.

use std::sync::OnceLock;

use regex::Regex;

use crate::error::{NomadError, Result};
use crate::model::Hazard;
use crate::segment::segment;

struct Pattern {
    kind: &'static str,
    re: fn() -> &'static Regex,
}

macro_rules! pattern {
    ($name:ident, $kind:expr, $re:expr) => {
        fn $name() -> &'static Regex {
            static RE: OnceLock<Regex> = OnceLock::new();
            RE.get_or_init(|| Regex::new($re).unwrap())
        }
    };
}

pattern!(
    re_create_index_concurrently,
    "CREATE_INDEX_CONCURRENTLY",
    r"(?i)\bCREATE\s+(?:UNIQUE\s+)?INDEX\s+CONCURRENTLY\b"
);
pattern!(
    re_drop_index_concurrently,
    "DROP_INDEX_CONCURRENTLY",
    r"(?i)\bDROP\s+INDEX\s+CONCURRENTLY\b"
);
pattern!(re_reindex, "REINDEX", r"(?i)\bREINDEX\b");
pattern!(re_vacuum, "VACUUM", r"(?i)\bVACUUM\b");
pattern!(re_cluster, "CLUSTER", r"(?i)\bCLUSTER\b");
pattern!(
    re_refresh_matview_concurrently,
    "REFRESH_MATERIALIZED_VIEW_CONCURRENTLY",
    r"(?i)\bREFRESH\s+MATERIALIZED\s+VIEW\s+CONCURRENTLY\b"
);
pattern!(re_alter_type, "ALTER_TYPE", r"(?i)\bALTER\s+TYPE\b");
pattern!(re_alter_system, "ALTER_SYSTEM", r"(?i)\bALTER\s+SYSTEM\b");
pattern!(re_create_database, "CREATE_DATABASE", r"(?i)\bCREATE\s+DATABASE\b");
pattern!(re_drop_database, "DROP_DATABASE", r"(?i)\bDROP\s+DATABASE\b");
pattern!(
    re_create_tablespace,
    "CREATE_TABLESPACE",
    r"(?i)\bCREATE\s+TABLESPACE\b"
);
pattern!(re_drop_tablespace, "DROP_TABLESPACE", r"(?i)\bDROP\s+TABLESPACE\b");
pattern!(
    re_alter_tablespace,
    "ALTER_TABLESPACE",
    r"(?i)\bALTER\s+TABLESPACE\b"
);
pattern!(re_lock_tables, "LOCK_TABLES", r"(?i)\bLOCK\s+TABLES\b");
pattern!(
    re_load_data_infile,
    "LOAD_DATA_INFILE",
    r"(?i)\bLOAD\s+DATA\s+(?:LOCAL\s+)?INFILE\b"
);
pattern!(
    re_alter_table_algorithm_lock,
    "ALTER_TABLE_ALGORITHM_OR_LOCK",
    r"(?is)\bALTER\s+TABLE\b.*?\b(?:ALGORITHM\s*=|LOCK\s*=)"
);
pattern!(
    re_optimize_analyze_repair,
    "OPTIMIZE_ANALYZE_REPAIR_TABLE",
    r"(?i)\b(?:OPTIMIZE|ANALYZE|REPAIR)\s+TABLE\b"
);

fn catalog() -> &'static [Pattern] {
    static CATALOG: OnceLock<Vec<Pattern>> = OnceLock::new();
    CATALOG.get_or_init(|| {
        vec![
            Pattern { kind: "CREATE_INDEX_CONCURRENTLY", re: re_create_index_concurrently },
            Pattern { kind: "DROP_INDEX_CONCURRENTLY", re: re_drop_index_concurrently },
            Pattern { kind: "REINDEX", re: re_reindex },
            Pattern { kind: "VACUUM", re: re_vacuum },
            Pattern { kind: "CLUSTER", re: re_cluster },
            Pattern {
                kind: "REFRESH_MATERIALIZED_VIEW_CONCURRENTLY",
                re: re_refresh_matview_concurrently,
            },
            Pattern { kind: "ALTER_TYPE", re: re_alter_type },
            Pattern { kind: "ALTER_SYSTEM", re: re_alter_system },
            Pattern { kind: "CREATE_DATABASE", re: re_create_database },
            Pattern { kind: "DROP_DATABASE", re: re_drop_database },
            Pattern { kind: "CREATE_TABLESPACE", re: re_create_tablespace },
            Pattern { kind: "DROP_TABLESPACE", re: re_drop_tablespace },
            Pattern { kind: "ALTER_TABLESPACE", re: re_alter_tablespace },
            Pattern { kind: "LOCK_TABLES", re: re_lock_tables },
            Pattern { kind: "LOAD_DATA_INFILE", re: re_load_data_infile },
            Pattern {
                kind: "ALTER_TABLE_ALGORITHM_OR_LOCK",
                re: re_alter_table_algorithm_lock,
            },
            Pattern {
                kind: "OPTIMIZE_ANALYZE_REPAIR_TABLE",
                re: re_optimize_analyze_repair,
            },
        ]
    })
    .as_slice()
}

/// Scan `sql` for hazardous statements, returning them in document order
/// with line/column re-projected onto the original source.
pub fn detect(sql: &str) -> Vec<Hazard> {
    let mut hits: Vec<Hazard> = Vec::new();

    for seg in segment(sql).into_iter().filter(|s| s.is_code) {
        let mut matches: Vec<(usize, &'static str)> = Vec::new();
        for pattern in catalog() {
            for m in pattern.re().find_iter(&seg.content) {
                matches.push((m.start(), pattern.kind));
            }
        }
        matches.sort_by_key(|(pos, _)| *pos);

        for (pos, kind) in matches {
            let (line, column) = project_position(&seg.content, pos, seg.start_line, seg.start_column);
            let statement = excerpt(&seg.content, pos);
            hits.push(Hazard {
                kind,
                line,
                column,
                statement,
            });
        }
    }

    hits
}

/// Map a byte offset within a segment to (line, column) in the original
/// document, given the segment's own starting coordinates.
fn project_position(segment_text: &str, offset: usize, start_line: u32, start_column: u32) -> (u32, u32) {
    let mut line = start_line;
    let mut column = start_column;
    for ch in segment_text[..offset].chars() {
        if ch == '\n' {
            line += 1;
            column = 1;
        } else {
            column += 1;
        }
    }
    (line, column)
}

/// Raw text from `offset` up to (but not including) the next `;` or
/// newline, trimmed.
fn excerpt(segment_text: &str, offset: usize) -> String {
    let rest = &segment_text[offset..];
    let end = rest.find([';', '\n']).unwrap_or(rest.len());
    rest[..end].trim().to_string()
}

/// Transaction-policy resolution.
pub struct PolicyDecision {
    pub skip_transaction: bool,
    pub warning: Option<String>,
}

pub fn validate_hazards(
    hazards: &[Hazard],
    has_notx: bool,
    auto_notx: bool,
    strict: bool,
) -> Result<PolicyDecision> {
    if hazards.is_empty() {
        return Ok(PolicyDecision {
            skip_transaction: has_notx,
            warning: None,
        });
    }

    if has_notx {
        return Ok(PolicyDecision {
            skip_transaction: true,
            warning: None,
        });
    }

    if auto_notx {
        let listing = describe(hazards);
        return Ok(PolicyDecision {
            skip_transaction: true,
            warning: Some(format!("auto-notx applied due to hazardous operations: {listing}")),
        });
    }

    if strict {
        let listing = describe(hazards);
        return Err(NomadError::ParseConfig(format!(
            "hazardous operations require -- +nomad notx or --auto-notx: {listing}"
        )));
    }

    Ok(PolicyDecision {
        skip_transaction: false,
        warning: None,
    })
}

fn describe(hazards: &[Hazard]) -> String {
    hazards
        .iter()
        .map(|h| format!("{} at {}:{}", h.kind, h.line, h.column))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_create_index_concurrently() {
        let hazards = detect("CREATE INDEX CONCURRENTLY idx ON t(id);");
        assert_eq!(hazards.len(), 1);
        assert_eq!(hazards[0].kind, "CREATE_INDEX_CONCURRENTLY");
        assert_eq!(hazards[0].line, 1);
        assert_eq!(hazards[0].column, 1);
    }

    #[test]
    fn never_reports_hazards_inside_comments_or_strings() {
        let sql = "-- CREATE INDEX CONCURRENTLY idx ON t(id);\nSELECT 'VACUUM FULL';";
        assert!(detect(sql).is_empty());
    }

    #[test]
    fn mysql_algorithm_lock_pattern_is_dot_all() {
        let sql = "ALTER TABLE t\nADD COLUMN c INT,\nALGORITHM=INPLACE, LOCK=NONE;";
        let hazards = detect(sql);
        assert_eq!(hazards.len(), 1);
        assert_eq!(hazards[0].kind, "ALTER_TABLE_ALGORITHM_OR_LOCK");
    }

    #[test]
    fn multiple_hazards_sorted_in_document_order() {
        let sql = "VACUUM;\nREINDEX;\n";
        let hazards = detect(sql);
        assert_eq!(hazards.len(), 2);
        assert_eq!(hazards[0].kind, "VACUUM");
        assert_eq!(hazards[1].kind, "REINDEX");
    }

    #[test]
    fn no_hazards_and_no_notx_keeps_transaction() {
        let decision = validate_hazards(&[], false, false, false).unwrap();
        assert!(!decision.skip_transaction);
    }

    #[test]
    fn hazards_with_notx_skip_transaction_silently() {
        let hazards = detect("VACUUM;");
        let decision = validate_hazards(&hazards, true, false, false).unwrap();
        assert!(decision.skip_transaction);
        assert!(decision.warning.is_none());
    }

    #[test]
    fn hazards_with_auto_notx_skip_and_warn() {
        let hazards = detect("VACUUM;");
        let decision = validate_hazards(&hazards, false, true, false).unwrap();
        assert!(decision.skip_transaction);
        assert!(decision.warning.is_some());
    }

    #[test]
    fn hazards_with_strict_policy_fail_parse() {
        let hazards = detect("CREATE INDEX CONCURRENTLY idx ON t(id);");
        let err = validate_hazards(&hazards, false, false, true).unwrap_err();
        match err {
            NomadError::ParseConfig(msg) => {
                assert!(msg.contains("CREATE_INDEX_CONCURRENTLY"));
                assert!(msg.contains("1:1"));
            }
            _ => panic!("expected ParseConfig error"),
        }
    }
}
