//! Migration file parser.

use std::collections::BTreeSet;
use std::sync::OnceLock;

use regex::Regex;

use crate::error::{NomadError, Result};
use crate::model::{ParsedMigration, Section};
use crate::segment::segment;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DirectiveKind {
    Up,
    Down,
    Notx,
    Tags,
    Block,
    EndBlock,
}

fn directive_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^\s*--\s*\+nomad\s+(up|down|notx|block|endblock|tags)\s*(?::\s*(.*))?\s*$")
            .unwrap()
    })
}

struct Directive {
    kind: DirectiveKind,
    arg: Option<String>,
}

fn parse_directive_line(line: &str) -> Option<Directive> {
    let caps = directive_re().captures(line)?;
    let kind = match caps[1].to_ascii_lowercase().as_str() {
        "up" => DirectiveKind::Up,
        "down" => DirectiveKind::Down,
        "notx" => DirectiveKind::Notx,
        "tags" => DirectiveKind::Tags,
        "block" => DirectiveKind::Block,
        "endblock" => DirectiveKind::EndBlock,
        _ => return None,
    };
    Some(Directive {
        kind,
        arg: caps.get(2).map(|m| m.as_str().trim().to_string()),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CurrentSection {
    None,
    Up,
    Down,
}

/// Parse a complete migration file body into its `ParsedMigration`.
///
/// Files lacking a `-- +nomad Up` directive are rejected rather than
/// treated as an implicit single up-only statement.
pub fn parse(content: &str) -> Result<ParsedMigration> {
    if !has_up_directive(content) {
        return Err(NomadError::ParseConfig(
            "migration file has no `-- +nomad Up` directive".to_string(),
        ));
    }

    let mut current = CurrentSection::None;
    let mut up_lines: Vec<(u32, &str)> = Vec::new();
    let mut down_lines: Vec<(u32, &str)> = Vec::new();
    let mut up_notx = false;
    let mut down_notx = false;
    let mut tags: Option<BTreeSet<String>> = None;
    let mut in_block = false;

    for (idx, line) in content.lines().enumerate() {
        let line_no = idx as u32 + 1;
        if let Some(directive) = parse_directive_line(line) {
            match directive.kind {
                DirectiveKind::Up => {
                    current = CurrentSection::Up;
                    continue;
                }
                DirectiveKind::Down => {
                    current = CurrentSection::Down;
                    continue;
                }
                DirectiveKind::Notx => {
                    match current {
                        CurrentSection::Up => up_notx = true,
                        CurrentSection::Down => down_notx = true,
                        CurrentSection::None => {}
                    }
                    continue;
                }
                DirectiveKind::Tags => {
                    let set: BTreeSet<String> = directive
                        .arg
                        .unwrap_or_default()
                        .split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect();
                    tags = Some(set);
                    continue;
                }
                DirectiveKind::Block => {
                    in_block = true;
                    match current {
                        CurrentSection::Up => up_lines.push((line_no, "\0BLOCK_START\0")),
                        CurrentSection::Down => down_lines.push((line_no, "\0BLOCK_START\0")),
                        CurrentSection::None => {}
                    }
                    continue;
                }
                DirectiveKind::EndBlock => {
                    in_block = false;
                    match current {
                        CurrentSection::Up => up_lines.push((line_no, "\0BLOCK_END\0")),
                        CurrentSection::Down => down_lines.push((line_no, "\0BLOCK_END\0")),
                        CurrentSection::None => {}
                    }
                    continue;
                }
            }
        }

        let _ = in_block;
        match current {
            CurrentSection::Up => up_lines.push((line_no, line)),
            CurrentSection::Down => down_lines.push((line_no, line)),
            CurrentSection::None => {}
        }
    }

    let up = build_section(&up_lines, up_notx);
    let down = build_section(&down_lines, down_notx);
    let no_transaction = up.notx || down.notx;

    Ok(ParsedMigration {
        up,
        down,
        tags,
        no_transaction,
    })
}

fn has_up_directive(content: &str) -> bool {
    content
        .lines()
        .any(|l| matches!(parse_directive_line(l), Some(d) if d.kind == DirectiveKind::Up))
}

/// Build a `Section` from its raw lines, honoring `block`/`endblock`
/// escapes (verbatim, single statement, no semicolon splitting) and
/// splitting everything else on top-level `;`. Each statement keeps the
/// 1-based file line it starts on, for error-origin reporting.
fn build_section(lines: &[(u32, &str)], notx: bool) -> Section {
    let mut statements = Vec::new();
    let mut statement_lines = Vec::new();
    let mut plain: Vec<(u32, &str)> = Vec::new();
    let mut i = 0;

    let flush_plain = |plain: &mut Vec<(u32, &str)>, statements: &mut Vec<String>, statement_lines: &mut Vec<u32>| {
        if !plain.is_empty() {
            let text = plain.iter().map(|(_, s)| *s).collect::<Vec<_>>().join("\n");
            let run_lines: Vec<u32> = plain.iter().map(|(n, _)| *n).collect();
            for (stmt, line) in split_statements_with_lines(&text, &run_lines) {
                statements.push(stmt);
                statement_lines.push(line);
            }
            plain.clear();
        }
    };

    while i < lines.len() {
        if lines[i].1 == "\0BLOCK_START\0" {
            flush_plain(&mut plain, &mut statements, &mut statement_lines);

            let mut block_lines: Vec<(u32, &str)> = Vec::new();
            i += 1;
            while i < lines.len() && lines[i].1 != "\0BLOCK_END\0" {
                block_lines.push(lines[i]);
                i += 1;
            }
            // skip the BLOCK_END marker itself, if present
            if i < lines.len() {
                i += 1;
            }
            let start_line = block_lines.first().map(|(n, _)| *n).unwrap_or(1);
            let block_text = block_lines
                .iter()
                .map(|(_, s)| *s)
                .collect::<Vec<_>>()
                .join("\n")
                .trim()
                .to_string();
            if !block_text.is_empty() {
                statements.push(block_text);
                statement_lines.push(start_line);
            }
            continue;
        }

        plain.push(lines[i]);
        i += 1;
    }

    flush_plain(&mut plain, &mut statements, &mut statement_lines);

    Section {
        statements,
        statement_lines,
        notx,
    }
}

/// Split a blob of SQL into top-level statements on `;`, respecting the
/// same comment/string/dollar-quote rules as the segmenter.
pub fn split_statements(sql: &str) -> Vec<String> {
    let placeholder_lines: Vec<u32> = sql.lines().enumerate().map(|(i, _)| i as u32 + 1).collect();
    split_statements_with_lines(sql, &placeholder_lines)
        .into_iter()
        .map(|(stmt, _)| stmt)
        .collect()
}

fn line_for(run_lines: &[u32], newline_count: usize) -> u32 {
    run_lines
        .get(newline_count)
        .copied()
        .or_else(|| run_lines.last().copied())
        .unwrap_or(1)
}

fn push_if_nonempty(
    current: &str,
    newlines_before_current: usize,
    run_lines: &[u32],
    statements: &mut Vec<(String, u32)>,
) {
    let leading_ws_len = current.len() - current.trim_start().len();
    let leading_newlines = current[..leading_ws_len].matches('\n').count();
    let trimmed = current.trim();
    if !trimmed.is_empty() {
        statements.push((
            trimmed.to_string(),
            line_for(run_lines, newlines_before_current + leading_newlines),
        ));
    }
}

/// Like `split_statements`, but maps each returned statement to the file
/// line it starts on. `run_lines[n]` is the real file line number of the
/// text's n-th source line (joined with `\n` to build `sql`).
fn split_statements_with_lines(sql: &str, run_lines: &[u32]) -> Vec<(String, u32)> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut running_newlines = 0usize;
    let mut newlines_before_current = 0usize;

    for seg in segment(sql) {
        if !seg.is_code {
            current.push_str(&seg.content);
            running_newlines += seg.content.matches('\n').count();
            continue;
        }
        let mut rest = seg.content.as_str();
        while let Some(idx) = rest.find(';') {
            current.push_str(&rest[..idx]);
            running_newlines += rest[..idx].matches('\n').count();
            push_if_nonempty(&current, newlines_before_current, run_lines, &mut statements);
            current.clear();
            newlines_before_current = running_newlines;
            rest = &rest[idx + 1..];
        }
        current.push_str(rest);
        running_newlines += rest.matches('\n').count();
    }

    push_if_nonempty(&current, newlines_before_current, run_lines, &mut statements);

    statements
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_up_and_down_sections() {
        let content = "-- +nomad Up\nCREATE TABLE t(id int);\n-- +nomad Down\nDROP TABLE t;\n";
        let parsed = parse(content).unwrap();
        assert_eq!(parsed.up.statements, vec!["CREATE TABLE t(id int)"]);
        assert_eq!(parsed.down.statements, vec!["DROP TABLE t"]);
    }

    #[test]
    fn missing_up_directive_fails_parse() {
        let content = "CREATE TABLE t(id int);\n";
        assert!(parse(content).is_err());
    }

    #[test]
    fn up_only_file_has_empty_down() {
        let content = "-- +nomad Up\nCREATE TABLE t(id int);\n";
        let parsed = parse(content).unwrap();
        assert!(parsed.down.statements.is_empty());
    }

    #[test]
    fn notx_directive_marks_section() {
        let content = "-- +nomad Up\n-- +nomad notx\nVACUUM;\n-- +nomad Down\nSELECT 1;\n";
        let parsed = parse(content).unwrap();
        assert!(parsed.up.notx);
        assert!(!parsed.down.notx);
        assert!(parsed.no_transaction);
    }

    #[test]
    fn tags_directive_parses_deduplicated_set() {
        let content = "-- +nomad tags: a, b, a, c\n-- +nomad Up\nSELECT 1;\n";
        let parsed = parse(content).unwrap();
        let tags = parsed.tags.unwrap();
        assert_eq!(tags.len(), 3);
        assert!(tags.contains("a"));
    }

    #[test]
    fn block_directive_is_kept_verbatim_as_one_statement() {
        let content = "-- +nomad Up\n-- +nomad block\nCREATE FUNCTION f() RETURNS void AS $$\nBEGIN\n  SELECT 1; SELECT 2;\nEND;\n$$ LANGUAGE plpgsql;\n-- +nomad endblock\n";
        let parsed = parse(content).unwrap();
        assert_eq!(parsed.up.statements.len(), 1);
        assert!(parsed.up.statements[0].contains("SELECT 1; SELECT 2;"));
    }

    #[test]
    fn statement_splitting_respects_dollar_quotes() {
        let sql = "CREATE FUNCTION f() RETURNS void AS $$\nBEGIN\n  SELECT 1;\nEND;\n$$ LANGUAGE plpgsql;\nSELECT 2;";
        let stmts = split_statements(sql);
        assert_eq!(stmts.len(), 2);
        assert!(stmts[0].contains("BEGIN"));
        assert_eq!(stmts[1], "SELECT 2");
    }

    #[test]
    fn blank_statements_are_dropped() {
        let stmts = split_statements("SELECT 1;;; SELECT 2;");
        assert_eq!(stmts, vec!["SELECT 1", "SELECT 2"]);
    }

    #[test]
    fn final_unterminated_statement_is_kept() {
        let stmts = split_statements("SELECT 1;\nSELECT 2");
        assert_eq!(stmts, vec!["SELECT 1", "SELECT 2"]);
    }

    #[test]
    fn directive_matching_is_case_insensitive_and_tolerates_leading_whitespace() {
        let content = "   -- +NOMAD UP\nSELECT 1;\n  -- +nomad Down\nSELECT 2;\n";
        let parsed = parse(content).unwrap();
        assert_eq!(parsed.up.statements, vec!["SELECT 1"]);
        assert_eq!(parsed.down.statements, vec!["SELECT 2"]);
    }
}
