pub mod auth;
pub mod backup;
pub mod cli;
pub mod config;
pub mod database;
pub mod error;
pub mod log;
pub mod shutdown;
pub mod upload;

pub use backup::{BackupArtifact, BackupWorkflow, DumpExecutor, WorkflowResult};
pub use config::{AppConfig, DatabaseConfig};
pub use error::{BackupError, Result, Stage};
pub use upload::{RemoteClient, RemoteDestination, RemoteUploader, UploadResult};
