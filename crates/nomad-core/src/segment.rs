//! Hand-rolled SQL segmenter.
//!
//! Deliberately not regex-driven: dollar-quoted bodies and `E'...'`
//! strings nest delimiters in ways a single regex sweep cannot track
//! correctly.

use regex::Regex;
use std::sync::OnceLock;

/// A contiguous run of the source that is either executable SQL (`is_code`)
/// or a comment/string/dollar-quoted body/COPY payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub content: String,
    pub is_code: bool,
    pub start_line: u32,
    pub start_column: u32,
}

fn copy_stdin_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)^\s*COPY\s+[^;]+FROM\s+stdin[^;]*;?").unwrap())
}

/// Partition `sql` into code and non-code segments, tracking 1-based
/// line/column coordinates byte-by-byte (really char-by-char; nomad
/// migration files are UTF-8 text).
pub fn segment(sql: &str) -> Vec<Segment> {
    let chars: Vec<char> = sql.chars().collect();
    let mut segments = Vec::new();

    let mut i = 0usize;
    let mut line = 1u32;
    let mut col = 1u32;

    // Buffer for the current run plus where it started.
    let mut buf = String::new();
    let mut buf_is_code = true;
    let mut buf_line = 1u32;
    let mut buf_col = 1u32;

    // Tracks only the current top-level statement (reset on every top-level
    // `;`), independent of `buf`'s segment-spanning accumulation, so the
    // COPY-header check below looks at the current statement's own code
    // rather than everything since the last comment/string.
    let mut stmt_buf = String::new();

    macro_rules! advance {
        ($ch:expr) => {{
            if $ch == '\n' {
                line += 1;
                col = 1;
            } else {
                col += 1;
            }
        }};
    }

    macro_rules! flush {
        () => {
            if !buf.is_empty() {
                segments.push(Segment {
                    content: std::mem::take(&mut buf),
                    is_code: buf_is_code,
                    start_line: buf_line,
                    start_column: buf_col,
                });
            }
        };
    }

    macro_rules! push_nocode {
        ($content:expr, $start_line:expr, $start_col:expr) => {{
            flush!();
            segments.push(Segment {
                content: $content,
                is_code: false,
                start_line: $start_line,
                start_column: $start_col,
            });
            buf_is_code = true;
            buf_line = line;
            buf_col = col;
        }};
    }

    while i < chars.len() {
        let c = chars[i];

        // -- line comment
        if c == '-' && chars.get(i + 1) == Some(&'-') {
            let start_line = line;
            let start_col = col;
            let mut content = String::new();
            while i < chars.len() && chars[i] != '\n' {
                content.push(chars[i]);
                advance!(chars[i]);
                i += 1;
            }
            push_nocode!(content, start_line, start_col);
            continue;
        }

        // /* block comment */
        if c == '/' && chars.get(i + 1) == Some(&'*') {
            let start_line = line;
            let start_col = col;
            let mut content = String::from("/*");
            advance!('/');
            i += 1;
            advance!('*');
            i += 1;
            while i < chars.len() {
                if chars[i] == '*' && chars.get(i + 1) == Some(&'/') {
                    content.push('*');
                    content.push('/');
                    advance!('*');
                    i += 1;
                    advance!('/');
                    i += 1;
                    break;
                }
                content.push(chars[i]);
                advance!(chars[i]);
                i += 1;
            }
            push_nocode!(content, start_line, start_col);
            continue;
        }

        // Dollar-quoted body: $[ident]$ ... $[ident]$
        if c == '$' {
            if let Some((tag_len, tag)) = try_match_dollar_tag(&chars, i) {
                let start_line = line;
                let start_col = col;
                let mut content = String::new();
                for _ in 0..tag_len {
                    content.push(chars[i]);
                    advance!(chars[i]);
                    i += 1;
                }
                // Find the matching closing tag.
                loop {
                    if i >= chars.len() {
                        break;
                    }
                    if chars[i] == '$' && matches_at(&chars, i, &tag) {
                        for ch in tag.chars() {
                            content.push(ch);
                            advance!(ch);
                            i += 1;
                        }
                        break;
                    }
                    content.push(chars[i]);
                    advance!(chars[i]);
                    i += 1;
                }
                push_nocode!(content, start_line, start_col);
                continue;
            }
        }

        // Quoted strings: '...'  E'...'  U&'...'  B'...'  X'...'
        if let Some(prefix_len) = string_opener_len(&chars, i) {
            let start_line = line;
            let start_col = col;
            let is_e_string = prefix_len == 2 && chars[i].eq_ignore_ascii_case(&'e');
            let mut content = String::new();
            for _ in 0..prefix_len {
                content.push(chars[i]);
                advance!(chars[i]);
                i += 1;
            }
            loop {
                if i >= chars.len() {
                    break;
                }
                if is_e_string && chars[i] == '\\' && i + 1 < chars.len() {
                    content.push(chars[i]);
                    advance!(chars[i]);
                    i += 1;
                    content.push(chars[i]);
                    advance!(chars[i]);
                    i += 1;
                    continue;
                }
                if chars[i] == '\'' {
                    if chars.get(i + 1) == Some(&'\'') {
                        content.push('\'');
                        content.push('\'');
                        advance!('\'');
                        i += 1;
                        advance!('\'');
                        i += 1;
                        continue;
                    }
                    content.push('\'');
                    advance!('\'');
                    i += 1;
                    break;
                }
                content.push(chars[i]);
                advance!(chars[i]);
                i += 1;
            }
            push_nocode!(content, start_line, start_col);
            continue;
        }

        // Ordinary code character; check for a completed COPY ... FROM stdin
        // statement right after we emit a top-level semicolon.
        buf.push(c);
        if buf.len() == 1 {
            buf_line = line;
            buf_col = col;
        }
        stmt_buf.push(c);
        advance!(c);
        i += 1;

        if c == ';' {
            if let Some(m) = copy_stdin_re().find(&stmt_buf) {
                if m.end() == stmt_buf.len() {
                    // The current top-level statement is a COPY ... FROM
                    // stdin header; everything after belongs to the payload.
                    let start_line = line;
                    let start_col = col;
                    flush_code(&mut segments, &mut buf, buf_is_code, buf_line, buf_col);
                    buf_line = start_line;
                    buf_col = start_col;
                    let (mut content, consumed_to) = consume_copy_payload(&chars, i);
                    for ch in content.chars() {
                        advance!(ch);
                    }
                    i = consumed_to;
                    push_nocode!(std::mem::take(&mut content), start_line, start_col);
                }
            }
            stmt_buf.clear();
        }
    }

    flush_code(&mut segments, &mut buf, buf_is_code, buf_line, buf_col);
    segments
}

fn flush_code(
    segments: &mut Vec<Segment>,
    buf: &mut String,
    is_code: bool,
    line: u32,
    col: u32,
) {
    if !buf.is_empty() {
        segments.push(Segment {
            content: std::mem::take(buf),
            is_code,
            start_line: line,
            start_column: col,
        });
    }
}

/// Consume a COPY ... FROM stdin payload starting right after the statement's
/// terminating `;`, through the `\.` terminator (inclusive) and an optional
/// trailing newline. Returns the consumed text and the new cursor index.
fn consume_copy_payload(chars: &[char], start: usize) -> (String, usize) {
    let mut i = start;
    let mut content = String::new();
    while i < chars.len() {
        // A line consisting of just `\.` terminates the payload.
        if chars[i] == '\\' && chars.get(i + 1) == Some(&'.') {
            let line_start_is_fresh = i == start || chars[i - 1] == '\n';
            let at_line_end = matches!(chars.get(i + 2), None | Some('\n') | Some('\r'));
            if line_start_is_fresh && at_line_end {
                content.push('\\');
                content.push('.');
                i += 2;
                if chars.get(i) == Some(&'\n') {
                    content.push('\n');
                    i += 1;
                }
                break;
            }
        }
        content.push(chars[i]);
        i += 1;
    }
    (content, i)
}

/// Try to match a dollar-quote opening tag `\$[^$]*\$` starting at `i`.
/// Returns the tag's length in chars and its text.
fn try_match_dollar_tag(chars: &[char], i: usize) -> Option<(usize, String)> {
    let mut j = i + 1;
    while j < chars.len() && chars[j] != '$' {
        if !(chars[j].is_alphanumeric() || chars[j] == '_') {
            return None;
        }
        j += 1;
    }
    if j >= chars.len() || chars[j] != '$' {
        return None;
    }
    let tag: String = chars[i..=j].iter().collect();
    Some((tag.chars().count(), tag))
}

fn matches_at(chars: &[char], i: usize, tag: &str) -> bool {
    let tag_chars: Vec<char> = tag.chars().collect();
    if i + tag_chars.len() > chars.len() {
        return false;
    }
    chars[i..i + tag_chars.len()] == tag_chars[..]
}

/// Length (in chars) of a string opener at position `i`, if any: `'`,
/// `E'`, `U&'`, `B'`, `X'` (case-insensitive prefixes).
fn string_opener_len(chars: &[char], i: usize) -> Option<usize> {
    if chars[i] == '\'' {
        return Some(1);
    }
    let c0 = chars[i];
    if (c0.eq_ignore_ascii_case(&'e')
        || c0.eq_ignore_ascii_case(&'b')
        || c0.eq_ignore_ascii_case(&'x'))
        && chars.get(i + 1) == Some(&'\'')
    {
        return Some(2);
    }
    if c0.eq_ignore_ascii_case(&'u')
        && chars.get(i + 1) == Some(&'&')
        && chars.get(i + 2) == Some(&'\'')
    {
        return Some(3);
    }
    None
}
