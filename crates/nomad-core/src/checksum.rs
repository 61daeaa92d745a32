//! Content-addressed checksum of migration files.

use sha2::{Digest, Sha256};

/// Strip a leading BOM and normalize line endings to `\n`.
pub fn canonicalize(content: &str) -> String {
    let content = content.strip_prefix('\u{feff}').unwrap_or(content);

    let mut out = String::with_capacity(content.len());
    let mut chars = content.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\r' {
            if chars.peek() == Some(&'\n') {
                chars.next();
            }
            out.push('\n');
        } else {
            out.push(c);
        }
    }
    out
}

/// Compute the 64-char lowercase hex SHA-256 digest of normalized content.
pub fn calculate(content: &str) -> String {
    let normalized = canonicalize(content);
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    hex::encode(hasher.finalize())
}

/// Case-insensitive comparison against a recomputed digest.
pub fn verify(content: &str, expected: &str) -> bool {
    calculate(content).eq_ignore_ascii_case(expected)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn produces_64_char_lowercase_hex() {
        let digest = calculate("CREATE TABLE t(id int);\n");
        assert_eq!(digest.len(), 64);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn strips_bom() {
        let with_bom = format!("\u{feff}{}", "SELECT 1;\n");
        let without_bom = "SELECT 1;\n";
        assert_eq!(calculate(&with_bom), calculate(without_bom));
    }

    #[test]
    fn normalizes_crlf_and_lone_cr() {
        let lf = "a\nb\nc\n";
        let crlf = "a\r\nb\r\nc\r\n";
        let cr = "a\rb\rc\r";
        assert_eq!(calculate(lf), calculate(crlf));
        assert_eq!(calculate(lf), calculate(cr));
    }

    #[test]
    fn is_deterministic() {
        assert_eq!(calculate("x;\n"), calculate("x;\n"));
    }

    #[test]
    fn verify_is_case_insensitive() {
        let digest = calculate("SELECT 1;\n");
        assert!(verify("SELECT 1;\n", &digest.to_uppercase()));
    }

    #[test]
    fn handles_unicode_content() {
        let content = "-- comment: café, naïve, 日本語\nSELECT 1;\n";
        let digest = calculate(content);
        assert_eq!(digest.len(), 64);
        assert_eq!(digest, calculate(content));
    }

    #[test]
    fn large_content_is_fast() {
        let stmt = "INSERT INTO t (a) VALUES (1);\n";
        let big = stmt.repeat(400_000); // ~12 MB
        let start = std::time::Instant::now();
        let _ = calculate(&big);
        assert!(start.elapsed().as_secs() < 1);
    }
}
