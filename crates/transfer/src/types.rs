use std::fmt;
use std::path::Path;
use std::sync::Arc;

use crate::TransferError;
use crate::validation::detect_content_type;

/// Fallback declared type for files whose extension is not recognised.
const OCTET_STREAM: &str = "application/octet-stream";

/// A file offered by the caller, not yet validated.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateFile {
    pub name: String,
    pub content_type: String,
    pub data: Vec<u8>,
}

impl CandidateFile {
    pub fn new(name: impl Into<String>, content_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            content_type: content_type.into(),
            data,
        }
    }

    /// Reads a file from disk and declares its type from the extension,
    /// the way a file picker does.
    pub async fn from_path(path: &Path) -> Result<Self, TransferError> {
        let data = tokio::fs::read(path).await?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let content_type = detect_content_type(&name).unwrap_or(OCTET_STREAM);
        Ok(Self::new(name, content_type, data))
    }
}

/// A validated CSV file, held by the orchestrator for one job.
///
/// Cloning is cheap: the bytes are shared, so a transfer in flight and the
/// orchestrator can both hold the file while the job runs.
#[derive(Clone, PartialEq)]
pub struct SourceFile {
    name: String,
    content_type: String,
    data: Arc<[u8]>,
}

impl SourceFile {
    pub(crate) fn new(candidate: CandidateFile) -> Self {
        Self {
            name: candidate.name,
            content_type: candidate.content_type,
            data: candidate.data.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Shared handle to the bytes.
    pub fn shared_data(&self) -> Arc<[u8]> {
        Arc::clone(&self.data)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl fmt::Debug for SourceFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceFile")
            .field("name", &self.name)
            .field("content_type", &self.content_type)
            .field("len", &self.data.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn from_path_detects_csv() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Data.CSV");
        std::fs::write(&path, b"a;b\n1;2\n").unwrap();

        let candidate = CandidateFile::from_path(&path).await.unwrap();
        assert_eq!(candidate.name, "Data.CSV");
        assert_eq!(candidate.content_type, "text/csv");
        assert_eq!(candidate.data, b"a;b\n1;2\n");
    }

    #[tokio::test]
    async fn from_path_unknown_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blob.bin");
        std::fs::write(&path, [0u8, 1, 2]).unwrap();

        let candidate = CandidateFile::from_path(&path).await.unwrap();
        assert_eq!(candidate.content_type, OCTET_STREAM);
    }

    #[tokio::test]
    async fn from_path_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = CandidateFile::from_path(&dir.path().join("nope.csv"))
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::Io(_)));
    }

    #[test]
    fn source_file_clone_shares_bytes() {
        let file = SourceFile::new(CandidateFile::new("a.csv", "text/csv", vec![1, 2, 3]));
        let copy = file.clone();
        assert!(Arc::ptr_eq(&file.shared_data(), &copy.shared_data()));
        assert_eq!(copy.len(), 3);
    }

    #[test]
    fn source_file_debug_hides_bytes() {
        let file = SourceFile::new(CandidateFile::new("a.csv", "text/csv", vec![7; 10]));
        let dbg = format!("{file:?}");
        assert!(dbg.contains("len: 10"));
        assert!(!dbg.contains("7, 7"));
    }
}
