//! HTTP transfer of a source file to the processing service.
//!
//! Async client using `reqwest` multipart uploads.

use percent_encoding::percent_decode_str;
use reqwest::header::CONTENT_DISPOSITION;
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use csvflow_protocol::constants::{
    MULTIPART_FILE_FIELD, PROCESS_CSV_PATH, TRANSFER_INACTIVITY_TIMEOUT, UPLOAD_CSV_PATH,
    UPLOAD_CHUNK_SIZE,
};

use crate::TransferError;
use crate::progress::{ProgressSender, counting_stream};
use crate::types::SourceFile;

/// How the request body is produced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferMode {
    /// One buffered body; only the terminal outcome is observable.
    Buffered,
    /// Chunked body stream reporting upload percentages.
    #[default]
    Instrumented,
}

/// Service endpoint a file is posted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    /// `POST /process-csv`: the response body is the processed CSV.
    ProcessCsv,
    /// `POST /upload-csv`: acknowledgment only.
    UploadCsv,
}

impl Endpoint {
    pub fn path(self) -> &'static str {
        match self {
            Self::ProcessCsv => PROCESS_CSV_PATH,
            Self::UploadCsv => UPLOAD_CSV_PATH,
        }
    }
}

/// A successful (2xx) response.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferResponse {
    pub status: u16,
    pub body: Vec<u8>,
    /// Filename hint from `Content-Disposition`, if any.
    pub filename: Option<String>,
}

/// Posts source files to the processing service.
pub struct HttpTransfer {
    http: reqwest::Client,
    base_url: String,
    mode: TransferMode,
    chunk_size: usize,
}

impl HttpTransfer {
    /// Creates a transfer client for the service at `base_url`.
    pub fn new(base_url: &str, mode: TransferMode) -> Result<Self, TransferError> {
        let parsed =
            reqwest::Url::parse(base_url).map_err(|e| TransferError::InvalidUrl(e.to_string()))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(TransferError::InvalidUrl(format!(
                "unsupported scheme: {}",
                parsed.scheme()
            )));
        }

        let http = reqwest::Client::builder()
            .connect_timeout(TRANSFER_INACTIVITY_TIMEOUT)
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            mode,
            chunk_size: UPLOAD_CHUNK_SIZE,
        })
    }

    /// Overrides the body chunk size used in instrumented mode.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Sends `file` as multipart field `file` and waits for the response.
    ///
    /// In instrumented mode, upload percentages go to `progress_tx` while
    /// the body is handed to the connection. Any status outside 2xx fails
    /// with [`TransferError::Server`] carrying the response body verbatim.
    pub async fn send(
        &self,
        endpoint: Endpoint,
        file: &SourceFile,
        progress_tx: Option<ProgressSender>,
    ) -> Result<TransferResponse, TransferError> {
        let url = format!("{}{}", self.base_url, endpoint.path());
        let len = file.len() as u64;

        let part = match (self.mode, progress_tx) {
            (TransferMode::Instrumented, Some(tx)) => {
                let body = reqwest::Body::wrap_stream(counting_stream(
                    file.shared_data(),
                    self.chunk_size,
                    tx,
                ));
                Part::stream_with_length(body, len)
            }
            _ => Part::bytes(file.data().to_vec()),
        };
        let part = part
            .file_name(file.name().to_string())
            .mime_str(file.content_type())?;
        let form = Form::new().part(MULTIPART_FILE_FIELD, part);

        debug!(%url, bytes = len, mode = ?self.mode, "posting file");

        let resp = self.http.post(&url).multipart(form).send().await?;
        let status = resp.status();

        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(TransferError::Server {
                status: status.as_u16(),
                body,
            });
        }

        let filename = resp
            .headers()
            .get(CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
            .and_then(filename_from_disposition);
        let body = resp.bytes().await?.to_vec();

        info!(%url, status = status.as_u16(), response_bytes = body.len(), "transfer complete");

        Ok(TransferResponse {
            status: status.as_u16(),
            body,
            filename,
        })
    }
}

/// Extracts the filename from a `Content-Disposition` value.
///
/// `filename*` (RFC 5987, percent-encoded) takes precedence over `filename`.
fn filename_from_disposition(value: &str) -> Option<String> {
    let mut plain = None;

    for param in value.split(';').map(str::trim) {
        if let Some(ext) = strip_prefix_ignore_case(param, "filename*=") {
            let encoded = ext.splitn(3, '\'').nth(2).unwrap_or(ext);
            if let Ok(decoded) = percent_decode_str(encoded.trim_matches('"')).decode_utf8()
                && !decoded.is_empty()
            {
                return Some(decoded.into_owned());
            }
        } else if let Some(v) = strip_prefix_ignore_case(param, "filename=") {
            plain = Some(v.trim_matches('"').to_string());
        }
    }

    plain.filter(|n| !n.is_empty())
}

fn strip_prefix_ignore_case<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    let head = s.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix)
        .then(|| &s[prefix.len()..])
}
