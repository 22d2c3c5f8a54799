use std::path::Path;

use csvflow_protocol::constants::CSV_CONTENT_TYPE;

use crate::types::{CandidateFile, SourceFile};

/// A candidate file was rejected before any network activity.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("please select a CSV file (got {declared:?})")]
    NotCsv { declared: String },
}

/// Accepts a candidate whose declared content type is `text/csv`.
///
/// Only the declared type is checked; the content itself is the service's
/// concern.
pub fn validate_source(candidate: CandidateFile) -> Result<SourceFile, ValidationError> {
    if !is_csv_type(&candidate.content_type) {
        return Err(ValidationError::NotCsv {
            declared: candidate.content_type,
        });
    }
    Ok(SourceFile::new(candidate))
}

/// Returns `true` if the MIME essence is `text/csv`, ignoring case and
/// parameters such as `charset`.
pub fn is_csv_type(content_type: &str) -> bool {
    let essence = content_type.split(';').next().unwrap_or_default().trim();
    essence.eq_ignore_ascii_case(CSV_CONTENT_TYPE)
}

/// Guesses a declared content type from a file name's extension.
pub fn detect_content_type(path: &str) -> Option<&'static str> {
    let ext = Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase());

    match ext.as_deref() {
        Some("csv") => Some(CSV_CONTENT_TYPE),
        Some("tsv") => Some("text/tab-separated-values"),
        Some("txt") => Some("text/plain"),
        Some("json") => Some("application/json"),
        Some("xlsx") => Some("application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"),
        _ => None,
    }
}
