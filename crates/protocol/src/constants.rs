use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Request/response endpoint: the response body is the processed CSV.
pub const PROCESS_CSV_PATH: &str = "/process-csv";

/// Two-phase endpoint: acknowledges receipt only.
pub const UPLOAD_CSV_PATH: &str = "/upload-csv";

/// Multipart field carrying the file bytes.
pub const MULTIPART_FILE_FIELD: &str = "file";

/// Declared content type of source files and materialized results.
pub const CSV_CONTENT_TYPE: &str = "text/csv";

/// File name used when the service gives no filename hint.
pub const DEFAULT_RESULT_NAME: &str = "processed.csv";

/// Inactivity allowed before a transfer is abandoned.
pub const TRANSFER_INACTIVITY_TIMEOUT: Duration = Duration::from_secs(30);

/// Time allowed for the response once the whole body has been sent. The
/// request/response endpoint processes the file before answering.
pub const TRANSFER_RESPONSE_TIMEOUT: Duration = Duration::from_secs(300);

/// Body chunk size for instrumented uploads (64 KiB).
pub const UPLOAD_CHUNK_SIZE: usize = 64 * 1024;

/// Time to wait for any incoming frame before the event channel is
/// considered dead.
pub const WS_PONG_WAIT: Duration = Duration::from_secs(60);

/// How often the event channel sends keepalive pings.
pub const WS_PING_PERIOD: Duration = Duration::from_secs(20);

/// Maximum event channel message size (128 MiB).
///
/// Byte arrays travel as JSON integer lists, roughly four characters per
/// byte, so this leaves room for ~30 MiB results.
pub const WS_MAX_MESSAGE_SIZE: usize = 128 * 1024 * 1024;

/// Event channel message type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    // Commands from client to service
    #[serde(rename = "upload_file")]
    UploadFile,
    #[serde(rename = "process_csv")]
    ProcessCsv,

    // Push events from service to client
    #[serde(rename = "progress")]
    Progress,
    #[serde(rename = "file_ready")]
    FileReady,
    #[serde(rename = "processed_file")]
    ProcessedFile,
    #[serde(rename = "error")]
    Error,

    /// Forward compatibility: unknown event names deserialize here.
    #[serde(other)]
    Unknown,
}
