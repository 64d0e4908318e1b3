mod drive;
mod remote;
mod uploader;

pub use drive::{folder_query, DriveClient, CHUNK_ALIGNMENT, DRIVE_API_BASE, DRIVE_UPLOAD_BASE, FOLDER_MIME_TYPE};
pub use remote::{RemoteClient, RemoteDestination, UploadResult, SQL_MIME_TYPE};
pub use uploader::RemoteUploader;

use crate::auth::{
    ClientSecrets, OAuthTokenProvider, StaticTokenProvider, TokenProvider, ACCESS_TOKEN_ENV,
};
use crate::config::RemoteConfig;
use crate::error::Result;
use std::sync::Arc;
use tracing::info;

/// Builds the Google Drive uploader for `config`. An access token in
/// `SQL_DRIVE_BACKUP_ACCESS_TOKEN` takes precedence over the stored OAuth token.
pub fn create_drive_uploader(config: &RemoteConfig) -> Result<RemoteUploader> {
    let tokens: Arc<dyn TokenProvider> = match std::env::var(ACCESS_TOKEN_ENV) {
        Ok(token) if !token.trim().is_empty() => {
            info!("Using access token from {}", ACCESS_TOKEN_ENV);
            Arc::new(StaticTokenProvider::new(token.trim().to_string()))
        }
        _ => {
            let secrets = ClientSecrets::load(&config.credentials_path)?;
            Arc::new(OAuthTokenProvider::new(secrets, config.token_path.clone())?)
        }
    };

    let chunk_size = config.chunk_size_mb as usize * 1024 * 1024;
    let client = DriveClient::new(tokens, chunk_size)?;

    Ok(RemoteUploader::new(
        Arc::new(client),
        config.folder_name.clone(),
        config.upload_timeout(),
    ))
}

#[cfg(test)]
pub(crate) use uploader::tests::MemoryRemote;
