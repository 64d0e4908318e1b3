use super::TokenProvider;
use crate::error::{BackupError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info};

const GOOGLE_AUTH_URI: &str = "https://accounts.google.com/o/oauth2/auth";
const GOOGLE_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const EXPIRY_SKEW_SECS: i64 = 60;

fn default_auth_uri() -> String {
    GOOGLE_AUTH_URI.to_string()
}

fn default_token_uri() -> String {
    GOOGLE_TOKEN_URI.to_string()
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ClientSecrets {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default = "default_auth_uri")]
    pub auth_uri: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

#[derive(Debug, Deserialize)]
struct SecretsFile {
    installed: Option<ClientSecrets>,
    web: Option<ClientSecrets>,
}

impl ClientSecrets {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| {
            BackupError::Auth(format!(
                "cannot read OAuth client secrets {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::parse(&contents)
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let file: SecretsFile = serde_json::from_str(contents)?;
        file.installed.or(file.web).ok_or_else(|| {
            BackupError::Auth(
                "client secrets file has neither an 'installed' nor a 'web' section".to_string(),
            )
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredToken {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub scope: Option<String>,
}

impl StoredToken {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expires_at) => now + Duration::seconds(EXPIRY_SKEW_SECS) >= expires_at,
            None => false,
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| {
            BackupError::Auth(format!(
                "no stored token at {} ({}); run `sql-drive-backup authorize` first",
                path.display(),
                e
            ))
        })?;
        serde_json::from_str(&contents).map_err(|e| {
            BackupError::Auth(format!(
                "stored token {} is invalid ({}); run `sql-drive-backup authorize` again",
                path.display(),
                e
            ))
        })
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
        }
        debug!("Token saved to {}", path.display());
        Ok(())
    }

    pub(crate) fn from_response(
        response: TokenResponse,
        previous_refresh: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            access_token: response.access_token,
            refresh_token: response.refresh_token.or(previous_refresh),
            expires_at: response
                .expires_in
                .map(|secs| now + Duration::seconds(secs)),
            scope: response.scope,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
}

pub(crate) async fn request_token(
    http: &Client,
    token_uri: &str,
    form: &[(&str, &str)],
) -> Result<TokenResponse> {
    let response = http
        .post(token_uri)
        .form(form)
        .send()
        .await
        .map_err(|e| BackupError::Auth(format!("token request failed: {}", e)))?;

    if !response.status().is_success() {
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        return Err(BackupError::Auth(format!(
            "token endpoint returned {} - {}",
            status, text
        )));
    }

    response
        .json()
        .await
        .map_err(|e| BackupError::Auth(format!("invalid token response: {}", e)))
}

/// Loads the persisted token and refreshes it when it is about to expire.
pub struct OAuthTokenProvider {
    http: Client,
    secrets: ClientSecrets,
    token_path: PathBuf,
    current: Mutex<Option<StoredToken>>,
}

impl OAuthTokenProvider {
    pub fn new(secrets: ClientSecrets, token_path: PathBuf) -> Result<Self> {
        let http = Client::builder()
            .user_agent(concat!("sql-drive-backup/", env!("CARGO_PKG_VERSION")))
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| BackupError::Auth(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            secrets,
            token_path,
            current: Mutex::new(None),
        })
    }

    async fn refresh(&self, token: &StoredToken) -> Result<StoredToken> {
        let refresh_token = token.refresh_token.clone().ok_or_else(|| {
            BackupError::Auth(
                "access token expired and no refresh token is stored; run `sql-drive-backup authorize`"
                    .to_string(),
            )
        })?;

        info!("Refreshing expired access token");
        let response = request_token(
            &self.http,
            &self.secrets.token_uri,
            &[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token.as_str()),
                ("client_id", self.secrets.client_id.as_str()),
                ("client_secret", self.secrets.client_secret.as_str()),
            ],
        )
        .await?;

        let refreshed = StoredToken::from_response(response, Some(refresh_token), Utc::now());
        refreshed.save(&self.token_path)?;
        Ok(refreshed)
    }
}

#[async_trait]
impl TokenProvider for OAuthTokenProvider {
    async fn access_token(&self) -> Result<String> {
        let mut current = self.current.lock().await;

        let token = match current.take() {
            Some(token) => token,
            None => StoredToken::load(&self.token_path)?,
        };

        let token = if token.is_expired(Utc::now()) {
            self.refresh(&token).await?
        } else {
            token
        };

        let access_token = token.access_token.clone();
        *current = Some(token);
        Ok(access_token)
    }
}

/// A token obtained and refreshed by something outside this process.
pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    pub fn new(token: String) -> Self {
        Self { token }
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn access_token(&self) -> Result<String> {
        Ok(self.token.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{routing::post, Form, Json, Router};
    use std::collections::HashMap;
    use tempfile::tempdir;
    use tokio::net::TcpListener;

    #[test]
    fn test_parse_installed_secrets() {
        let secrets = ClientSecrets::parse(
            r#"{"installed":{"client_id":"id.apps.googleusercontent.com","client_secret":"shh",
                "auth_uri":"https://accounts.google.com/o/oauth2/auth",
                "token_uri":"https://oauth2.googleapis.com/token",
                "redirect_uris":["http://localhost"]}}"#,
        )
        .unwrap();
        assert_eq!(secrets.client_id, "id.apps.googleusercontent.com");
        assert_eq!(secrets.token_uri, GOOGLE_TOKEN_URI);
    }

    #[test]
    fn test_parse_rejects_unknown_layout() {
        assert!(matches!(
            ClientSecrets::parse(r#"{"other":{}}"#),
            Err(BackupError::Auth(_))
        ));
    }

    #[test]
    fn test_expiry_uses_skew() {
        let now = Utc::now();
        let token = StoredToken {
            access_token: "a".to_string(),
            refresh_token: None,
            expires_at: Some(now + Duration::seconds(30)),
            scope: None,
        };
        assert!(token.is_expired(now));

        let token = StoredToken {
            expires_at: Some(now + Duration::seconds(3600)),
            ..token
        };
        assert!(!token.is_expired(now));
    }

    #[test]
    fn test_missing_token_file_points_to_authorize() {
        let dir = tempdir().unwrap();
        let err = StoredToken::load(&dir.path().join("token.json")).unwrap_err();
        assert!(err.to_string().contains("authorize"));
    }

    #[tokio::test]
    async fn test_valid_token_is_used_without_refresh() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("token.json");
        StoredToken {
            access_token: "still-good".to_string(),
            refresh_token: Some("r".to_string()),
            expires_at: Some(Utc::now() + Duration::hours(1)),
            scope: None,
        }
        .save(&path)
        .unwrap();

        let secrets = ClientSecrets {
            client_id: "id".to_string(),
            client_secret: "secret".to_string(),
            auth_uri: default_auth_uri(),
            token_uri: "http://127.0.0.1:9/unreachable".to_string(),
        };
        let provider = OAuthTokenProvider::new(secrets, path).unwrap();
        assert_eq!(provider.access_token().await.unwrap(), "still-good");
    }

    #[tokio::test]
    async fn test_expired_token_is_refreshed_and_persisted() {
        let app = Router::new().route(
            "/token",
            post(|Form(form): Form<HashMap<String, String>>| async move {
                assert_eq!(form.get("grant_type").map(String::as_str), Some("refresh_token"));
                assert_eq!(form.get("refresh_token").map(String::as_str), Some("refresh-1"));
                Json(serde_json::json!({
                    "access_token": "fresh-access",
                    "expires_in": 3599,
                    "scope": "https://www.googleapis.com/auth/drive.file",
                    "token_type": "Bearer"
                }))
            }),
        );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let dir = tempdir().unwrap();
        let path = dir.path().join("token.json");
        StoredToken {
            access_token: "stale".to_string(),
            refresh_token: Some("refresh-1".to_string()),
            expires_at: Some(Utc::now() - Duration::minutes(5)),
            scope: None,
        }
        .save(&path)
        .unwrap();

        let secrets = ClientSecrets {
            client_id: "id".to_string(),
            client_secret: "secret".to_string(),
            auth_uri: default_auth_uri(),
            token_uri: format!("http://{}/token", addr),
        };
        let provider = OAuthTokenProvider::new(secrets, path.clone()).unwrap();

        assert_eq!(provider.access_token().await.unwrap(), "fresh-access");

        let saved = StoredToken::load(&path).unwrap();
        assert_eq!(saved.access_token, "fresh-access");
        assert_eq!(saved.refresh_token.as_deref(), Some("refresh-1"));
        assert!(!saved.is_expired(Utc::now()));
    }
}
