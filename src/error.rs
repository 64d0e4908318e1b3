use std::fmt;
use std::io;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Dump,
    Upload,
    Cleanup,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Dump => write!(f, "dump"),
            Stage::Upload => write!(f, "upload"),
            Stage::Cleanup => write!(f, "cleanup"),
        }
    }
}

#[derive(Debug)]
pub enum BackupError {
    ConfigInvalid { field: String, reason: String },
    DumpFailed(String),
    UploadFailed(String),
    Auth(String),
    Database(String),
    Cancelled,
    Io(io::Error),
    Serialization(String),
}

impl BackupError {
    pub fn config_invalid(field: &str, reason: impl Into<String>) -> Self {
        BackupError::ConfigInvalid {
            field: field.to_string(),
            reason: reason.into(),
        }
    }

    /// Cause text without the category prefix, as reported next to a stage.
    pub fn cause(&self) -> String {
        match self {
            BackupError::ConfigInvalid { field, reason } => format!("{}: {}", field, reason),
            BackupError::DumpFailed(msg)
            | BackupError::UploadFailed(msg)
            | BackupError::Auth(msg)
            | BackupError::Database(msg)
            | BackupError::Serialization(msg) => msg.clone(),
            BackupError::Cancelled => "cancelled".to_string(),
            BackupError::Io(err) => err.to_string(),
        }
    }
}

impl fmt::Display for BackupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackupError::ConfigInvalid { field, reason } => {
                write!(f, "Invalid configuration field '{}': {}", field, reason)
            }
            BackupError::DumpFailed(msg) => write!(f, "Database dump failed: {}", msg),
            BackupError::UploadFailed(msg) => write!(f, "Upload failed: {}", msg),
            BackupError::Auth(msg) => write!(f, "Authentication error: {}", msg),
            BackupError::Database(msg) => write!(f, "Database error: {}", msg),
            BackupError::Cancelled => write!(f, "Run cancelled"),
            BackupError::Io(err) => write!(f, "IO error: {}", err),
            BackupError::Serialization(msg) => write!(f, "Serialization error: {}", msg),
        }
    }
}

impl std::error::Error for BackupError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BackupError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for BackupError {
    fn from(err: io::Error) -> Self {
        BackupError::Io(err)
    }
}

impl From<toml::de::Error> for BackupError {
    fn from(err: toml::de::Error) -> Self {
        BackupError::Serialization(err.to_string())
    }
}

impl From<toml::ser::Error> for BackupError {
    fn from(err: toml::ser::Error) -> Self {
        BackupError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for BackupError {
    fn from(err: serde_json::Error) -> Self {
        BackupError::Serialization(err.to_string())
    }
}

impl From<mysql_async::Error> for BackupError {
    fn from(err: mysql_async::Error) -> Self {
        BackupError::Database(err.to_string())
    }
}

impl From<reqwest::Error> for BackupError {
    fn from(err: reqwest::Error) -> Self {
        BackupError::UploadFailed(err.to_string())
    }
}

impl From<dialoguer::Error> for BackupError {
    fn from(err: dialoguer::Error) -> Self {
        BackupError::Io(io::Error::new(io::ErrorKind::Other, err.to_string()))
    }
}

pub type Result<T> = std::result::Result<T, BackupError>;

/// Non-fatal failure to remove a local artifact. Logged, never propagated.
#[derive(Debug)]
pub struct CleanupWarning {
    pub path: PathBuf,
    pub cause: io::Error,
}

impl fmt::Display for CleanupWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Failed to delete local backup file {}: {}",
            self.path.display(),
            self.cause
        )
    }
}
