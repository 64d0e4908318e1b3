mod consent;
mod token;

pub use consent::{authorize, pkce_challenge};
pub use token::{ClientSecrets, OAuthTokenProvider, StaticTokenProvider, StoredToken};

use crate::error::Result;
use async_trait::async_trait;

/// Only files created by this application are visible to it.
pub const DRIVE_FILE_SCOPE: &str = "https://www.googleapis.com/auth/drive.file";

/// Environment variable holding an externally managed access token. When set,
/// the stored OAuth token is not consulted.
pub const ACCESS_TOKEN_ENV: &str = "SQL_DRIVE_BACKUP_ACCESS_TOKEN";

#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn access_token(&self) -> Result<String>;
}
