//! JSONL (JSON Lines) mirror codec.
//!
//! One complete JSON object per line, UTF-8, LF-terminated. Encoding is
//! deterministic -- records sort by (created_at, id) -- so that identical
//! logical contents produce byte-identical files and clean VCS diffs.

use std::io::{self, BufRead, Write};

use crate::issue::Issue;

/// Error type for JSONL operations.
#[derive(Debug, thiserror::Error)]
pub enum JsonlError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("parse error at line {line}: {reason}")]
    Parse { line: usize, reason: String },

    #[error("record at line {line} is missing required field {field:?}")]
    MissingField { line: usize, field: &'static str },
}

/// Result alias for JSONL operations.
pub type Result<T> = std::result::Result<T, JsonlError>;

/// A non-fatal problem encountered while decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeWarning {
    pub line: usize,
    pub message: String,
}

/// Sorts issues into canonical export order: (created_at, id) ascending.
pub fn sort_for_export(issues: &mut [Issue]) {
    issues.sort_by(|a, b| {
        a.created_at
            .cmp(&b.created_at)
            .then_with(|| a.id.cmp(&b.id))
    });
}

/// Writes issues as JSONL to the given writer in canonical order.
pub fn write_jsonl<W: Write>(writer: &mut W, issues: &[Issue]) -> Result<()> {
    let mut ordered: Vec<Issue> = issues.to_vec();
    sort_for_export(&mut ordered);

    for issue in &ordered {
        let line = serde_json::to_string(issue).map_err(|e| JsonlError::Parse {
            line: 0,
            reason: e.to_string(),
        })?;
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    Ok(())
}

/// Encodes issues to a byte buffer in canonical order.
pub fn encode(issues: &[Issue]) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    write_jsonl(&mut buf, issues)?;
    Ok(buf)
}

/// Decodes a JSONL mirror.
///
/// Blank lines are skipped. A line that fails to parse, or a record missing
/// its `id` or `title`, aborts the decode with the offending line number.
/// Recoverable oddities (e.g. a record with no timestamps) are returned as
/// warnings.
pub fn decode<R: BufRead>(reader: R) -> Result<(Vec<Issue>, Vec<DecodeWarning>)> {
    let mut issues = Vec::new();
    let mut warnings = Vec::new();

    for (idx, line) in reader.lines().enumerate() {
        let line_no = idx + 1;
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let mut issue: Issue =
            serde_json::from_str(trimmed).map_err(|e| JsonlError::Parse {
                line: line_no,
                reason: e.to_string(),
            })?;

        if issue.id.is_empty() {
            return Err(JsonlError::MissingField {
                line: line_no,
                field: "id",
            });
        }
        if issue.title.trim().is_empty() {
            return Err(JsonlError::MissingField {
                line: line_no,
                field: "title",
            });
        }

        issue.set_defaults();

        if issue.updated_at < issue.created_at {
            warnings.push(DecodeWarning {
                line: line_no,
                message: format!("{}: updated_at precedes created_at", issue.id),
            });
        }

        issues.push(issue);
    }

    Ok((issues, warnings))
}

/// Decodes a byte buffer.
pub fn decode_bytes(bytes: &[u8]) -> Result<(Vec<Issue>, Vec<DecodeWarning>)> {
    decode(io::BufReader::new(bytes))
}
