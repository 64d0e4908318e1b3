use super::remote::RemoteClient;
use crate::auth::TokenProvider;
use crate::error::{BackupError, Result};
use async_trait::async_trait;
use reqwest::header::{CONTENT_LENGTH, CONTENT_RANGE, LOCATION, RANGE};
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::io::SeekFrom;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::{debug, info, warn};

pub const DRIVE_API_BASE: &str = "https://www.googleapis.com/drive/v3";
pub const DRIVE_UPLOAD_BASE: &str = "https://www.googleapis.com/upload/drive/v3";
pub const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";

/// Drive requires every chunk but the last to be a multiple of 256 KiB.
pub const CHUNK_ALIGNMENT: usize = 256 * 1024;
const MAX_RESUME_ATTEMPTS: u32 = 3;

#[derive(Debug, Deserialize)]
struct DriveFile {
    id: String,
}

#[derive(Debug, Deserialize)]
struct FileList {
    #[serde(default)]
    files: Vec<DriveFile>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FileMetadata<'a> {
    name: &'a str,
    mime_type: &'a str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    parents: Vec<&'a str>,
}

enum ChunkOutcome {
    Done(String),
    Continue(u64),
}

pub struct DriveClient {
    http: Client,
    tokens: Arc<dyn TokenProvider>,
    api_base: String,
    upload_base: String,
    chunk_size: usize,
}

impl DriveClient {
    pub fn new(tokens: Arc<dyn TokenProvider>, chunk_size: usize) -> Result<Self> {
        let http = Client::builder()
            .user_agent(concat!("sql-drive-backup/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(30))
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        Ok(Self {
            http,
            tokens,
            api_base: DRIVE_API_BASE.to_string(),
            upload_base: DRIVE_UPLOAD_BASE.to_string(),
            chunk_size: align_chunk_size(chunk_size),
        })
    }

    pub fn with_endpoints(mut self, api_base: &str, upload_base: &str) -> Self {
        self.api_base = api_base.trim_end_matches('/').to_string();
        self.upload_base = upload_base.trim_end_matches('/').to_string();
        self
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    async fn bearer(&self) -> Result<String> {
        self.tokens.access_token().await
    }

    async fn start_session(&self, name: &str, parent_id: &str, mime_type: &str, total: u64) -> Result<String> {
        let url = format!("{}/files?uploadType=resumable&fields=id", self.upload_base);
        let metadata = FileMetadata {
            name,
            mime_type,
            parents: vec![parent_id],
        };

        let response = self
            .http
            .post(&url)
            .bearer_auth(self.bearer().await?)
            .header("X-Upload-Content-Type", mime_type)
            .header("X-Upload-Content-Length", total.to_string())
            .json(&metadata)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(api_error("Failed to start resumable upload", response).await);
        }

        response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| {
                BackupError::UploadFailed("resumable session response had no Location header".to_string())
            })
    }

    async fn send_chunk(&self, session: &str, file: &mut File, offset: u64, total: u64) -> Result<ChunkOutcome> {
        let len = (total - offset).min(self.chunk_size as u64) as usize;
        let mut buffer = vec![0u8; len];
        file.seek(SeekFrom::Start(offset)).await?;
        file.read_exact(&mut buffer).await?;

        let content_range = if len == 0 {
            format!("bytes */{}", total)
        } else {
            format!("bytes {}-{}/{}", offset, offset + len as u64 - 1, total)
        };
        debug!("Uploading chunk {}", content_range);

        let response = self
            .http
            .put(session)
            .bearer_auth(self.bearer().await?)
            .header(CONTENT_RANGE, content_range)
            .body(buffer)
            .send()
            .await?;

        chunk_outcome(response).await
    }

    async fn query_session(&self, session: &str, total: u64) -> Result<ChunkOutcome> {
        let response = self
            .http
            .put(session)
            .bearer_auth(self.bearer().await?)
            .header(CONTENT_LENGTH, 0)
            .header(CONTENT_RANGE, format!("bytes */{}", total))
            .send()
            .await?;

        chunk_outcome(response).await
    }

    async fn transfer(&self, session: &str, path: &Path, total: u64) -> Result<String> {
        let mut file = File::open(path).await?;
        let mut offset = 0u64;
        let mut resumes = 0u32;

        loop {
            match self.send_chunk(session, &mut file, offset, total).await {
                Ok(ChunkOutcome::Done(id)) => return Ok(id),
                Ok(ChunkOutcome::Continue(next)) => offset = acknowledged(next, total)?,
                Err(BackupError::UploadFailed(msg)) if resumes < MAX_RESUME_ATTEMPTS => {
                    resumes += 1;
                    warn!(
                        "Chunk at offset {} failed ({}), resuming upload (attempt {}/{})",
                        offset, msg, resumes, MAX_RESUME_ATTEMPTS
                    );
                    match self.query_session(session, total).await? {
                        ChunkOutcome::Done(id) => return Ok(id),
                        ChunkOutcome::Continue(next) => offset = acknowledged(next, total)?,
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn align_chunk_size(requested: usize) -> usize {
    let chunks = requested.div_ceil(CHUNK_ALIGNMENT).max(1);
    chunks * CHUNK_ALIGNMENT
}

fn escape_query_value(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

pub fn folder_query(name: &str) -> String {
    format!(
        "name='{}' and mimeType='{}' and trashed=false",
        escape_query_value(name),
        FOLDER_MIME_TYPE
    )
}

/// The server can never hold more bytes than the file has.
fn acknowledged(next: u64, total: u64) -> Result<u64> {
    if next > total {
        return Err(BackupError::UploadFailed(format!(
            "server acknowledged {} bytes of {}",
            next, total
        )));
    }
    Ok(next)
}

/// Next offset from a `Range: bytes=0-N` header; absent means nothing stored yet.
fn next_offset(response: &Response) -> Result<u64> {
    let range = match response.headers().get(RANGE) {
        Some(value) => value,
        None => return Ok(0),
    };
    let last = range
        .to_str()
        .ok()
        .and_then(|r| r.strip_prefix("bytes="))
        .and_then(|r| r.split('-').nth(1))
        .and_then(|end| end.parse::<u64>().ok())
        .ok_or_else(|| BackupError::UploadFailed(format!("unparseable Range header: {:?}", range)))?;
    Ok(last + 1)
}

async fn chunk_outcome(response: Response) -> Result<ChunkOutcome> {
    let status = response.status();
    if status == StatusCode::PERMANENT_REDIRECT {
        return Ok(ChunkOutcome::Continue(next_offset(&response)?));
    }
    if status.is_success() {
        let file: DriveFile = response.json().await?;
        return Ok(ChunkOutcome::Done(file.id));
    }
    Err(api_error("Chunk upload rejected", response).await)
}

async fn api_error(context: &str, response: Response) -> BackupError {
    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    BackupError::UploadFailed(format!("{}: {} - {}", context, status, text))
}

#[async_trait]
impl RemoteClient for DriveClient {
    async fn find_folders(&self, name: &str) -> Result<Vec<String>> {
        let url = format!("{}/files", self.api_base);
        let query = folder_query(name);

        let response = self
            .http
            .get(&url)
            .bearer_auth(self.bearer().await?)
            .query(&[
                ("q", query.as_str()),
                ("spaces", "drive"),
                ("fields", "files(id)"),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(api_error("Failed to list folders", response).await);
        }

        let list: FileList = response.json().await?;
        Ok(list.files.into_iter().map(|f| f.id).collect())
    }

    async fn create_folder(&self, name: &str) -> Result<String> {
        let url = format!("{}/files?fields=id", self.api_base);
        let metadata = FileMetadata {
            name,
            mime_type: FOLDER_MIME_TYPE,
            parents: Vec::new(),
        };

        let response = self
            .http
            .post(&url)
            .bearer_auth(self.bearer().await?)
            .json(&metadata)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(api_error("Failed to create folder", response).await);
        }

        let folder: DriveFile = response.json().await?;
        info!("Created Drive folder: {} ({})", name, folder.id);
        Ok(folder.id)
    }

    async fn upload_file(&self, path: &Path, name: &str, parent_id: &str, mime_type: &str) -> Result<String> {
        let total = tokio::fs::metadata(path).await?.len();
        let session = self.start_session(name, parent_id, mime_type, total).await?;
        debug!("Resumable session opened for {} ({} bytes)", name, total);
        self.transfer(&session, path, total).await
    }

    fn name(&self) -> &'static str {
        "Google Drive"
    }
}
