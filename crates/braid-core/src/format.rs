//! Mirror format detection, conflict-marker scanning, and the compact
//! columnar codec.
//!
//! Two on-disk formats are understood: line-delimited JSON records
//! ([`crate::jsonl`]) and a compact `|`-separated columnar form. Export
//! always writes JSONL; import accepts either.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::enums::{IssueType, Status};
use crate::issue::Issue;
use crate::jsonl::{self, DecodeWarning, JsonlError};

/// Header line that introduces a columnar mirror.
pub const COLUMNAR_HEADER: &str =
    "#braid:columns id|title|status|priority|issue_type|created_at|updated_at";

/// Detected mirror file format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MirrorFormat {
    Jsonl,
    Columnar,
    Unknown,
}

/// Error type for format-level operations.
#[derive(Debug, thiserror::Error)]
pub enum FormatError {
    #[error("file contains unresolved merge conflict markers")]
    ConflictMarkers,

    #[error("unrecognized mirror format")]
    UnknownFormat,

    #[error(transparent)]
    Jsonl(#[from] JsonlError),

    #[error("columnar parse error at line {line}: {reason}")]
    Columnar { line: usize, reason: String },
}

impl FormatError {
    /// Stable machine-readable kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ConflictMarkers => "conflict_markers_present",
            Self::UnknownFormat => "unknown_format",
            Self::Jsonl(_) | Self::Columnar { .. } => "parse_error",
        }
    }
}

/// Sniffs the format of a mirror file from its first non-empty line.
pub fn detect_format(bytes: &[u8]) -> MirrorFormat {
    let text = String::from_utf8_lossy(bytes);
    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if trimmed.starts_with('{') {
            return MirrorFormat::Jsonl;
        }
        if trimmed.starts_with("#braid:columns") {
            return MirrorFormat::Columnar;
        }
        return MirrorFormat::Unknown;
    }
    // An empty file decodes as an empty JSONL mirror.
    MirrorFormat::Jsonl
}

/// Returns `true` if the bytes contain unresolved VCS merge conflict markers.
///
/// Only markers at the start of a line count; `=======` inside a JSON string
/// does not trip the scan.
pub fn has_conflict_markers(bytes: &[u8]) -> bool {
    let text = String::from_utf8_lossy(bytes);
    text.lines().any(|line| {
        line.starts_with("<<<<<<<") || line.starts_with("=======") || line.starts_with(">>>>>>>")
    })
}

/// Decodes a mirror file of either format.
///
/// Refuses input with conflict markers before attempting a parse.
pub fn decode_any(bytes: &[u8]) -> Result<(Vec<Issue>, Vec<DecodeWarning>), FormatError> {
    if has_conflict_markers(bytes) {
        return Err(FormatError::ConflictMarkers);
    }
    match detect_format(bytes) {
        MirrorFormat::Jsonl => Ok(jsonl::decode_bytes(bytes)?),
        MirrorFormat::Columnar => decode_columnar(bytes),
        MirrorFormat::Unknown => Err(FormatError::UnknownFormat),
    }
}

/// Counts the records in a mirror file without fully materializing them.
///
/// Used by the fresh-clone guide; parse failures are counted as records so
/// the guide still reports a useful magnitude.
pub fn count_records(bytes: &[u8]) -> usize {
    let text = String::from_utf8_lossy(bytes);
    text.lines()
        .filter(|line| {
            let t = line.trim();
            !t.is_empty() && !t.starts_with('#')
        })
        .count()
}

// ---------------------------------------------------------------------------
// Columnar codec
// ---------------------------------------------------------------------------

/// Encodes issues in the compact columnar form (core fields only).
pub fn encode_columnar(issues: &[Issue]) -> Vec<u8> {
    let mut ordered: Vec<Issue> = issues.to_vec();
    jsonl::sort_for_export(&mut ordered);

    let mut out = String::new();
    out.push_str(COLUMNAR_HEADER);
    out.push('\n');
    for issue in &ordered {
        let row = [
            escape_cell(&issue.id),
            escape_cell(&issue.title),
            escape_cell(issue.status.as_str()),
            issue.priority.to_string(),
            escape_cell(issue.issue_type.as_str()),
            issue.created_at.to_rfc3339(),
            issue.updated_at.to_rfc3339(),
        ]
        .join("|");
        out.push_str(&row);
        out.push('\n');
    }
    out.into_bytes()
}

fn decode_columnar(bytes: &[u8]) -> Result<(Vec<Issue>, Vec<DecodeWarning>), FormatError> {
    let text = String::from_utf8_lossy(bytes);
    let mut issues = Vec::new();
    let mut warnings = Vec::new();

    for (idx, line) in text.lines().enumerate() {
        let line_no = idx + 1;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let cells = split_row(trimmed);
        if cells.len() != 7 {
            return Err(FormatError::Columnar {
                line: line_no,
                reason: format!("expected 7 columns, got {}", cells.len()),
            });
        }
        if cells[0].is_empty() {
            return Err(FormatError::Columnar {
                line: line_no,
                reason: "missing id".into(),
            });
        }
        if cells[1].is_empty() {
            return Err(FormatError::Columnar {
                line: line_no,
                reason: "missing title".into(),
            });
        }

        let priority: i32 = cells[3].parse().map_err(|_| FormatError::Columnar {
            line: line_no,
            reason: format!("bad priority {:?}", cells[3]),
        })?;

        let created_at = parse_ts(&cells[5], line_no, &mut warnings);
        let updated_at = parse_ts(&cells[6], line_no, &mut warnings);

        let mut issue = Issue::default();
        issue.id = cells[0].clone();
        issue.title = cells[1].clone();
        issue.status = Status::from(cells[2].as_str());
        issue.priority = priority;
        issue.issue_type = IssueType::from(cells[4].as_str());
        issue.created_at = created_at;
        issue.updated_at = updated_at;
        issue.extra = BTreeMap::new();
        issues.push(issue);
    }

    Ok((issues, warnings))
}

fn parse_ts(cell: &str, line: usize, warnings: &mut Vec<DecodeWarning>) -> DateTime<Utc> {
    match DateTime::parse_from_rfc3339(cell) {
        Ok(dt) => dt.with_timezone(&Utc),
        Err(_) => {
            warnings.push(DecodeWarning {
                line,
                message: format!("unparseable timestamp {:?}, substituting now", cell),
            });
            Utc::now()
        }
    }
}

fn escape_cell(s: &str) -> String {
    s.replace('\\', "\\\\").replace('|', "\\|").replace('\n', "\\n")
}

fn split_row(row: &str) -> Vec<String> {
    let mut cells = Vec::new();
    let mut current = String::new();
    let mut chars = row.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some('|') => current.push('|'),
                Some('\\') => current.push('\\'),
                Some('n') => current.push('\n'),
                Some(other) => {
                    current.push('\\');
                    current.push(other);
                }
                None => current.push('\\'),
            },
            '|' => {
                cells.push(std::mem::take(&mut current));
            }
            other => current.push(other),
        }
    }
    cells.push(current);
    cells
}
