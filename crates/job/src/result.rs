//! Materializes processed results into artifacts.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use csvflow_protocol::constants::{CSV_CONTENT_TYPE, DEFAULT_RESULT_NAME};
use csvflow_protocol::messages::FileReadyPayload;

/// A processed file as delivered by the service.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultPayload {
    pub filename: String,
    pub bytes: Vec<u8>,
}

impl From<FileReadyPayload> for ResultPayload {
    fn from(p: FileReadyPayload) -> Self {
        Self {
            filename: p.filename,
            bytes: p.data,
        }
    }
}

/// The locally materialized result of a job.
#[derive(Debug, Clone, PartialEq)]
pub struct Artifact {
    pub filename: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl Artifact {
    /// Writes the artifact into `dir` and returns the written path.
    ///
    /// Only the final component of the filename is used, so a hostile name
    /// cannot escape `dir`.
    pub async fn save_to(&self, dir: &Path) -> std::io::Result<PathBuf> {
        let path = dir.join(sanitize_filename(&self.filename));
        tokio::fs::write(&path, &self.bytes).await?;
        info!(path = %path.display(), bytes = self.bytes.len(), "artifact saved");
        Ok(path)
    }
}

/// Builds [`Artifact`]s from result payloads.
#[derive(Debug, Clone)]
pub struct ResultHandler {
    default_name: String,
}

impl Default for ResultHandler {
    fn default() -> Self {
        Self::new(DEFAULT_RESULT_NAME)
    }
}

impl ResultHandler {
    /// `default_name` is used when the payload carries no filename.
    pub fn new(default_name: impl Into<String>) -> Self {
        Self {
            default_name: default_name.into(),
        }
    }

    /// Tags the payload bytes as CSV.
    ///
    /// The bytes are kept exactly as received, whatever their text
    /// encoding.
    pub fn materialize(&self, payload: ResultPayload) -> Artifact {
        let filename = if payload.filename.trim().is_empty() {
            self.default_name.clone()
        } else {
            payload.filename
        };
        debug!(%filename, bytes = payload.bytes.len(), "result materialized");

        Artifact {
            filename,
            content_type: CSV_CONTENT_TYPE.to_string(),
            bytes: payload.bytes,
        }
    }
}

/// Strips directory components from a service-supplied filename.
fn sanitize_filename(name: &str) -> String {
    let last = name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();
    if last.is_empty() || last == "." || last == ".." {
        DEFAULT_RESULT_NAME.to_string()
    } else {
        last.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(filename: &str, bytes: &[u8]) -> ResultPayload {
        ResultPayload {
            filename: filename.into(),
            bytes: bytes.to_vec(),
        }
    }

    #[test]
    fn materialize_keeps_bytes_exactly() {
        let bytes = "\u{feff}id;name\r\n1;Ёж\r\n".as_bytes();
        let artifact = ResultHandler::default()
            .materialize(payload("out.csv", bytes));
        assert_eq!(artifact.filename, "out.csv");
        assert_eq!(artifact.content_type, "text/csv");
        assert_eq!(artifact.bytes, bytes);
    }

    #[test]
    fn materialize_uses_default_name() {
        let handler = ResultHandler::new("result.csv");
        let artifact = handler.materialize(payload("  ", b"a,b"));
        assert_eq!(artifact.filename, "result.csv");
    }

    #[test]
    fn materialize_keeps_legacy_encodings() {
        // "Оценка;1" in Windows-1251.
        let bytes = [0xCE, 0xF6, 0xE5, 0xED, 0xEA, 0xE0, b';', b'1', b'\n'];
        let artifact = ResultHandler::default().materialize(payload("scores.csv", &bytes));
        assert_eq!(artifact.filename, "scores.csv");
        assert_eq!(artifact.bytes, bytes);
    }

    #[test]
    fn empty_result_is_valid() {
        let artifact = ResultHandler::default()
            .materialize(payload("empty.csv", b""));
        assert!(artifact.bytes.is_empty());
    }

    #[test]
    fn from_file_ready_payload() {
        let p = ResultPayload::from(FileReadyPayload {
            filename: "x.csv".into(),
            data: vec![1, 2],
        });
        assert_eq!(p.filename, "x.csv");
        assert_eq!(p.bytes, vec![1, 2]);
    }

    #[test]
    fn sanitize_strips_paths() {
        assert_eq!(sanitize_filename("out.csv"), "out.csv");
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("C:\\tmp\\x.csv"), "x.csv");
        assert_eq!(sanitize_filename("dir/"), DEFAULT_RESULT_NAME);
        assert_eq!(sanitize_filename(".."), DEFAULT_RESULT_NAME);
    }

    #[tokio::test]
    async fn save_to_writes_inside_dir() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = Artifact {
            filename: "../escape.csv".into(),
            content_type: CSV_CONTENT_TYPE.into(),
            bytes: b"a;b\n".to_vec(),
        };

        let path = artifact.save_to(dir.path()).await.unwrap();
        assert_eq!(path, dir.path().join("escape.csv"));
        assert_eq!(std::fs::read(&path).unwrap(), b"a;b\n");
    }
}
