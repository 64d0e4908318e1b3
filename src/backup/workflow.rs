use crate::backup::artifact::BackupArtifact;
use crate::backup::dump::DumpExecutor;
use crate::config::DatabaseConfig;
use crate::error::{BackupError, CleanupWarning, Stage};
use crate::shutdown::CancelSignal;
use crate::upload::{RemoteDestination, RemoteUploader};
use std::fmt;
use std::fs;
use std::io;
use std::time::Instant;
use tracing::{error, info, warn};

#[derive(Debug)]
pub enum WorkflowResult {
    Completed { remote_id: Option<String> },
    Failed { stage: Stage, cause: BackupError },
}

impl WorkflowResult {
    pub fn is_completed(&self) -> bool {
        matches!(self, WorkflowResult::Completed { .. })
    }

    pub fn remote_id(&self) -> Option<&str> {
        match self {
            WorkflowResult::Completed { remote_id } => remote_id.as_deref(),
            WorkflowResult::Failed { .. } => None,
        }
    }

    pub fn failed_stage(&self) -> Option<Stage> {
        match self {
            WorkflowResult::Completed { .. } => None,
            WorkflowResult::Failed { stage, .. } => Some(*stage),
        }
    }

    pub fn exit_code(&self) -> i32 {
        if self.is_completed() {
            0
        } else {
            1
        }
    }
}

impl fmt::Display for WorkflowResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkflowResult::Completed { remote_id: Some(id) } => {
                write!(f, "Backup completed and uploaded (file id {})", id)
            }
            WorkflowResult::Completed { remote_id: None } => {
                write!(f, "Backup completed, kept locally (no remote destination)")
            }
            WorkflowResult::Failed { stage, cause } => {
                write!(f, "Backup failed at {} stage: {}", stage, cause.cause())
            }
        }
    }
}

pub struct BackupWorkflow {
    dump: DumpExecutor,
    uploader: Option<RemoteUploader>,
}

impl BackupWorkflow {
    pub fn new(dump: DumpExecutor, uploader: Option<RemoteUploader>) -> Self {
        Self { dump, uploader }
    }

    pub async fn run(
        &self,
        config: &DatabaseConfig,
        destination: Option<&RemoteDestination>,
        cancel: &CancelSignal,
    ) -> WorkflowResult {
        let start = Instant::now();
        info!("Starting database backup process");

        // A cancelled dump drops its future, which kills the child and removes the partial file.
        let artifact = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return failed(Stage::Dump, BackupError::Cancelled);
            }
            result = self.dump.create_backup(config) => match result {
                Ok(artifact) => artifact,
                Err(e) => return failed(Stage::Dump, e),
            },
        };

        let destination = match destination {
            Some(destination) => destination,
            None => {
                info!(
                    "No remote destination configured, keeping {}",
                    artifact.path.display()
                );
                info!("Backup process completed successfully in {} sec", start.elapsed().as_secs());
                return WorkflowResult::Completed { remote_id: None };
            }
        };

        let uploader = match &self.uploader {
            Some(uploader) => uploader,
            None => {
                discard(&artifact);
                return failed(
                    Stage::Upload,
                    BackupError::config_invalid("remote", "destination given but no uploader configured"),
                );
            }
        };

        info!("Uploading backup to {} ({})...", uploader.remote_name(), destination);
        let upload = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(BackupError::Cancelled),
            result = uploader.upload_to(&artifact.path, destination) => result,
        };

        match upload {
            Ok(result) => {
                info!(
                    "Backup uploaded successfully to {}. File ID: {}",
                    uploader.remote_name(),
                    result.remote_id
                );
                discard(&artifact);
                info!("Backup process completed successfully in {} sec", start.elapsed().as_secs());
                WorkflowResult::Completed {
                    remote_id: Some(result.remote_id),
                }
            }
            Err(e) => {
                discard(&artifact);
                failed(Stage::Upload, e)
            }
        }
    }
}

fn failed(stage: Stage, cause: BackupError) -> WorkflowResult {
    error!("Backup failed at {} stage: {}", stage, cause);
    WorkflowResult::Failed { stage, cause }
}

/// Best-effort removal of the local artifact. Failures are downgraded to a warning.
fn discard(artifact: &BackupArtifact) -> Option<CleanupWarning> {
    match fs::remove_file(&artifact.path) {
        Ok(()) => {
            info!("Local backup file deleted: {}", artifact.path.display());
            None
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => None,
        Err(e) => {
            let warning = CleanupWarning {
                path: artifact.path.clone(),
                cause: e,
            };
            warn!("{}", warning);
            Some(warning)
        }
    }
}
