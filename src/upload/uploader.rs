use super::remote::{RemoteClient, RemoteDestination, UploadResult, SQL_MIME_TYPE};
use crate::error::{BackupError, Result};
use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info};

pub struct RemoteUploader {
    client: Arc<dyn RemoteClient>,
    folder_name: String,
    timeout: Duration,
    folders: Mutex<HashMap<String, String>>,
}

impl RemoteUploader {
    pub fn new(client: Arc<dyn RemoteClient>, folder_name: String, timeout: Duration) -> Self {
        Self {
            client,
            folder_name,
            timeout,
            folders: Mutex::new(HashMap::new()),
        }
    }

    pub fn remote_name(&self) -> &'static str {
        self.client.name()
    }

    /// Looks the folder up by name and creates it when absent. Resolved ids are
    /// cached per name. Two processes resolving the same name at the same time
    /// can still both create a folder; set an explicit folder id in that case.
    pub async fn resolve_folder(&self, name: &str) -> Result<String> {
        if let Some(id) = self.cached_folder(name) {
            debug!("Using cached folder '{}': {}", name, id);
            return Ok(id);
        }

        let existing = self.client.find_folders(name).await?;
        let id = match existing.into_iter().next() {
            Some(id) => {
                debug!("Found existing folder '{}': {}", name, id);
                id
            }
            None => {
                info!("Creating backup folder '{}' on {}", name, self.client.name());
                self.client.create_folder(name).await?
            }
        };

        if let Ok(mut folders) = self.folders.lock() {
            folders.insert(name.to_string(), id.clone());
        }
        Ok(id)
    }

    fn cached_folder(&self, name: &str) -> Option<String> {
        self.folders
            .lock()
            .ok()
            .and_then(|folders| folders.get(name).cloned())
    }

    /// Uploads `path` under `folder_id`, or under the default folder (looked up
    /// or created) when no id is given. Never touches the local file.
    pub async fn upload_file(&self, path: &Path, folder_id: Option<&str>) -> Result<UploadResult> {
        self.bounded(self.upload_inner(path, folder_id, &self.folder_name))
            .await
    }

    /// Folder resolution and transfer share one timeout.
    pub async fn upload_to(&self, path: &Path, destination: &RemoteDestination) -> Result<UploadResult> {
        match destination {
            RemoteDestination::FolderId(id) => self.upload_file(path, Some(id)).await,
            RemoteDestination::FolderName(name) => {
                self.bounded(self.upload_inner(path, None, name)).await
            }
        }
    }

    async fn bounded<F>(&self, upload: F) -> Result<UploadResult>
    where
        F: Future<Output = Result<UploadResult>>,
    {
        match tokio::time::timeout(self.timeout, upload).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(BackupError::UploadFailed(msg))) => Err(BackupError::UploadFailed(msg)),
            Ok(Err(e)) => Err(BackupError::UploadFailed(e.to_string())),
            Err(_) => Err(BackupError::UploadFailed(format!(
                "timed out after {}s",
                self.timeout.as_secs()
            ))),
        }
    }

    async fn upload_inner(
        &self,
        path: &Path,
        folder_id: Option<&str>,
        folder_name: &str,
    ) -> Result<UploadResult> {
        let folder_id = match folder_id {
            Some(id) => id.to_string(),
            None => self.resolve_folder(folder_name).await?,
        };

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| {
                BackupError::UploadFailed(format!("{} has no file name", path.display()))
            })?;

        info!(
            "Uploading {} to {} backup folder...",
            path.display(),
            self.client.name()
        );
        let remote_id = self
            .client
            .upload_file(path, &file_name, &folder_id, SQL_MIME_TYPE)
            .await?;

        if remote_id.trim().is_empty() {
            return Err(BackupError::UploadFailed(
                "remote store returned an empty file id".to_string(),
            ));
        }

        info!("File uploaded successfully. File ID: {}", remote_id);
        Ok(UploadResult {
            remote_id,
            folder_id,
            file_name,
            local_path: path.to_path_buf(),
        })
    }
}
