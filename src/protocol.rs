//! Wire types of the control protocol: one JSON object per line in each
//! direction.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;
use crate::events::SyncStatus;
use crate::store;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Db {
    Location,
    History,
}

impl Db {
    fn parse(raw: &str) -> Result<Self, ProtocolError> {
        match raw {
            "location" => Ok(Self::Location),
            "history" => Ok(Self::History),
            other => Err(ProtocolError::UnknownDb(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    ListFiles,
    DeleteFile { name: String },
    ReceiveFile { name: String, size: u64 },
    GetDb { db: Db },
    ClearDb { db: Db },
    DeleteAllFiles,
    GetDeviceInfo,
    StartSync,
    SyncStatus,
    ClearSyncError,
    MarkShown { name: String },
}

#[derive(Deserialize)]
struct NameBody {
    name: String,
}

#[derive(Deserialize)]
struct ReceiveBody {
    name: String,
    size: i64,
}

#[derive(Deserialize)]
struct DbBody {
    db: String,
}

impl Command {
    pub const fn name(&self) -> &'static str {
        match self {
            Self::ListFiles => "list_files",
            Self::DeleteFile { .. } => "delete_file",
            Self::ReceiveFile { .. } => "receive_file",
            Self::GetDb { .. } => "get_db",
            Self::ClearDb { .. } => "clear_db",
            Self::DeleteAllFiles => "delete_all_files",
            Self::GetDeviceInfo => "get_device_info",
            Self::StartSync => "start_sync",
            Self::SyncStatus => "sync_status",
            Self::ClearSyncError => "clear_sync_error",
            Self::MarkShown { .. } => "mark_shown",
        }
    }

    /// Parse one request line. File names are validated here so a bad
    /// `receive_file` is refused before any payload is invited.
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let value: Value = serde_json::from_str(line)?;
        let cmd = value
            .get("cmd")
            .and_then(Value::as_str)
            .ok_or(ProtocolError::MissingCommand)?
            .to_string();
        match cmd.as_str() {
            "list_files" => Ok(Self::ListFiles),
            "delete_file" => {
                let NameBody { name } = body("delete_file", value)?;
                store::validate_plain_name(&name)?;
                Ok(Self::DeleteFile { name })
            }
            "receive_file" => {
                let ReceiveBody { name, size } = body("receive_file", value)?;
                store::validate_name(&name)?;
                let size = u64::try_from(size).map_err(|_| ProtocolError::InvalidBody {
                    cmd: "receive_file",
                    detail: format!("size must not be negative, got {size}"),
                })?;
                Ok(Self::ReceiveFile { name, size })
            }
            "get_db" => {
                let DbBody { db } = body("get_db", value)?;
                Ok(Self::GetDb { db: Db::parse(&db)? })
            }
            "clear_db" => {
                let DbBody { db } = body("clear_db", value)?;
                Ok(Self::ClearDb { db: Db::parse(&db)? })
            }
            "delete_all_files" => Ok(Self::DeleteAllFiles),
            "get_device_info" => Ok(Self::GetDeviceInfo),
            "start_sync" => Ok(Self::StartSync),
            "sync_status" => Ok(Self::SyncStatus),
            "clear_sync_error" => Ok(Self::ClearSyncError),
            "mark_shown" => {
                let NameBody { name } = body("mark_shown", value)?;
                store::validate_name(&name)?;
                Ok(Self::MarkShown { name })
            }
            _ => Err(ProtocolError::UnknownCommand(cmd)),
        }
    }
}

fn body<T: DeserializeOwned>(cmd: &'static str, value: Value) -> Result<T, ProtocolError> {
    serde_json::from_value(value).map_err(|err| ProtocolError::InvalidBody {
        cmd,
        detail: err.to_string(),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Ok,
    Error,
    Ready,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum DbEntry {
    Location {
        #[serde(rename = "fileName")]
        file_name: String,
        location: String,
    },
    History {
        #[serde(rename = "fileName")]
        file_name: String,
        #[serde(rename = "lastShown")]
        last_shown: i64,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncReply {
    pub state: &'static str,
    pub progress: Option<String>,
    pub last_error: Option<String>,
}

impl From<SyncStatus> for SyncReply {
    fn from(status: SyncStatus) -> Self {
        Self {
            state: status.state(),
            progress: status.progress.map(|p| p.to_string()),
            last_error: status.last_error,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Response {
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub files: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Vec<DbEntry>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sync: Option<SyncReply>,
}

impl Response {
    fn with_status(status: Status) -> Self {
        Self {
            status,
            message: None,
            files: None,
            data: None,
            width: None,
            height: None,
            sync: None,
        }
    }

    pub fn ok() -> Self {
        Self::with_status(Status::Ok)
    }

    pub fn ready() -> Self {
        Self::with_status(Status::Ready)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::with_status(Status::Error).message(message)
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn files(files: Vec<String>) -> Self {
        Self {
            files: Some(files),
            ..Self::ok()
        }
    }

    pub fn data(entries: Vec<DbEntry>) -> Self {
        Self {
            data: Some(entries),
            ..Self::ok()
        }
    }

    pub fn device(width: u32, height: u32) -> Self {
        Self {
            width: Some(width),
            height: Some(height),
            ..Self::ok()
        }
    }

    pub fn sync(status: SyncStatus) -> Self {
        Self {
            sync: Some(status.into()),
            ..Self::ok()
        }
    }

    /// Serialized form including the terminating newline.
    pub fn to_line(&self) -> serde_json::Result<Vec<u8>> {
        let mut line = serde_json::to_vec(self)?;
        line.push(b'\n');
        Ok(line)
    }
}

impl From<&ProtocolError> for Response {
    fn from(err: &ProtocolError) -> Self {
        Self::error(err.to_string())
    }
}
