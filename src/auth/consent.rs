use super::token::{request_token, ClientSecrets, StoredToken};
use super::DRIVE_FILE_SCOPE;
use crate::error::{BackupError, Result};
use axum::extract::{Query, State};
use axum::response::Html;
use axum::routing::get;
use axum::Router;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use rand::distributions::Alphanumeric;
use rand::Rng;
use reqwest::{Client, Url};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tracing::{info, warn};

const CONSENT_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Default, Deserialize)]
struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
}

type CallbackSender = Arc<Mutex<Option<oneshot::Sender<CallbackParams>>>>;

fn random_string(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

pub fn pkce_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

fn consent_url(secrets: &ClientSecrets, redirect_uri: &str, challenge: &str, state: &str) -> Result<Url> {
    Url::parse_with_params(
        &secrets.auth_uri,
        &[
            ("client_id", secrets.client_id.as_str()),
            ("redirect_uri", redirect_uri),
            ("response_type", "code"),
            ("scope", DRIVE_FILE_SCOPE),
            ("code_challenge", challenge),
            ("code_challenge_method", "S256"),
            ("state", state),
            ("access_type", "offline"),
            ("prompt", "consent"),
        ],
    )
    .map_err(|e| BackupError::Auth(format!("invalid auth_uri '{}': {}", secrets.auth_uri, e)))
}

fn authorization_code(params: CallbackParams, expected_state: &str) -> Result<String> {
    if let Some(error) = params.error {
        return Err(BackupError::Auth(format!("consent was not granted: {}", error)));
    }
    if params.state.as_deref() != Some(expected_state) {
        return Err(BackupError::Auth(
            "state mismatch in OAuth callback".to_string(),
        ));
    }
    params
        .code
        .filter(|c| !c.is_empty())
        .ok_or_else(|| BackupError::Auth("OAuth callback carried no code".to_string()))
}

async fn callback_handler(
    State(sender): State<CallbackSender>,
    Query(params): Query<CallbackParams>,
) -> Html<&'static str> {
    let message = if params.error.is_some() {
        "<h1>Authorization failed</h1><p>You can close this window.</p>"
    } else {
        "<h1>Authorization complete</h1><p>You can close this window.</p>"
    };

    if let Ok(mut slot) = sender.lock() {
        if let Some(tx) = slot.take() {
            let _ = tx.send(params);
        }
    }
    Html(message)
}

/// Runs the installed-app consent flow with a loopback redirect and persists
/// the resulting token at `token_path`.
pub async fn authorize(secrets: &ClientSecrets, token_path: &Path) -> Result<StoredToken> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let redirect_uri = format!("http://127.0.0.1:{}/", listener.local_addr()?.port());

    let verifier = random_string(64);
    let state = random_string(24);
    let url = consent_url(secrets, &redirect_uri, &pkce_challenge(&verifier), &state)?;

    let (code_tx, code_rx) = oneshot::channel();
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let sender: CallbackSender = Arc::new(Mutex::new(Some(code_tx)));
    let app = Router::new()
        .route("/", get(callback_handler))
        .with_state(sender);

    let server = tokio::spawn(async move {
        let shutdown = async move {
            let _ = stop_rx.await;
        };
        if let Err(e) = axum::serve(listener, app).with_graceful_shutdown(shutdown).await {
            warn!("OAuth callback server error: {}", e);
        }
    });

    println!("\nOpen this URL in a browser to authorize Google Drive access:\n\n{}\n", url);
    info!("Waiting for OAuth callback on {}", redirect_uri);

    let received = tokio::time::timeout(CONSENT_TIMEOUT, code_rx).await;
    let _ = stop_tx.send(());
    // A browser may keep its connection open and stall the graceful shutdown.
    if tokio::time::timeout(Duration::from_secs(5), server).await.is_err() {
        warn!("OAuth callback server did not stop in time");
    }

    let params = match received {
        Ok(Ok(params)) => params,
        Ok(Err(_)) => return Err(BackupError::Auth("OAuth callback server stopped".to_string())),
        Err(_) => {
            return Err(BackupError::Auth(format!(
                "no authorization received within {}s",
                CONSENT_TIMEOUT.as_secs()
            )))
        }
    };
    let code = authorization_code(params, &state)?;

    let http = Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .map_err(|e| BackupError::Auth(format!("failed to create HTTP client: {}", e)))?;
    let response = request_token(
        &http,
        &secrets.token_uri,
        &[
            ("grant_type", "authorization_code"),
            ("code", code.as_str()),
            ("redirect_uri", redirect_uri.as_str()),
            ("client_id", secrets.client_id.as_str()),
            ("client_secret", secrets.client_secret.as_str()),
            ("code_verifier", verifier.as_str()),
        ],
    )
    .await?;

    let token = StoredToken::from_response(response, None, Utc::now());
    if token.refresh_token.is_none() {
        warn!("Token endpoint returned no refresh token; scheduled runs will stop working once it expires");
    }
    token.save(token_path)?;
    info!("Authorization stored at {}", token_path.display());
    Ok(token)
}
