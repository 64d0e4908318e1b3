use crate::config::RemoteConfig;
use crate::error::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};

pub const SQL_MIME_TYPE: &str = "application/sql";

/// An already-authenticated handle on the remote store. Identifiers are opaque.
#[async_trait]
pub trait RemoteClient: Send + Sync {
    /// Ids of non-trashed folders named exactly `name`.
    async fn find_folders(&self, name: &str) -> Result<Vec<String>>;
    async fn create_folder(&self, name: &str) -> Result<String>;
    async fn upload_file(
        &self,
        path: &Path,
        name: &str,
        parent_id: &str,
        mime_type: &str,
    ) -> Result<String>;
    fn name(&self) -> &'static str;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteDestination {
    FolderId(String),
    FolderName(String),
}

impl RemoteDestination {
    pub fn from_config(config: &RemoteConfig) -> Self {
        match config.folder_id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => RemoteDestination::FolderId(id.to_string()),
            _ => RemoteDestination::FolderName(config.folder_name.clone()),
        }
    }
}

impl std::fmt::Display for RemoteDestination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RemoteDestination::FolderId(id) => write!(f, "folder id {}", id),
            RemoteDestination::FolderName(name) => write!(f, "folder '{}'", name),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UploadResult {
    pub remote_id: String,
    pub folder_id: String,
    pub file_name: String,
    pub local_path: PathBuf,
}
