use thiserror::Error;

/// A request line that could not be turned into a command.
///
/// Recoverable: the connection keeps reading the next line, except for
/// [`ProtocolError::LineTooLong`] where framing is lost.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("missing cmd field")]
    MissingCommand,

    #[error("unknown command")]
    UnknownCommand(String),

    #[error("invalid {cmd} request: {detail}")]
    InvalidBody { cmd: &'static str, detail: String },

    #[error("unknown db: {0}")]
    UnknownDb(String),

    #[error("invalid file name: {0:?}")]
    InvalidName(String),

    #[error("command line exceeds {limit} bytes")]
    LineTooLong { limit: usize },

    #[error("request is not valid UTF-8")]
    NotUtf8,
}

/// Raw payload of a `receive_file` did not arrive in full.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("incomplete transfer: expected {expected} bytes, received {received}")]
    Incomplete { expected: u64, received: u64 },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A reconciliation attempt failed; the local store keeps whatever state the
/// deletion and download passes reached.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("sync not configured")]
    NotConfigured,

    #[error("sync already in progress")]
    AlreadyRunning,

    #[error("failed to connect to {address}: {detail}")]
    Connect { address: String, detail: String },

    #[error("login failed: {0}")]
    Login(String),

    #[error("failed to list remote directory: {0}")]
    Listing(String),

    #[error("failed to download {name}: {detail}")]
    Transfer { name: String, detail: String },

    #[error("local store error: {0}")]
    Local(#[from] std::io::Error),

    #[error("sync cancelled")]
    Cancelled,
}

/// Persistence of a metadata table failed. The in-memory maps stay
/// authoritative for the session.
#[derive(Debug, Error)]
pub enum CacheIoError {
    #[error("failed to open cache database {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("cache write failed: {0}")]
    Write(#[from] rusqlite::Error),
}
