use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde_json::{json, Value};
use sql_drive_backup::auth::StaticTokenProvider;
use sql_drive_backup::upload::{DriveClient, RemoteUploader, CHUNK_ALIGNMENT, SQL_MIME_TYPE};
use sql_drive_backup::{BackupError, RemoteClient};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::tempdir;

const TOKEN: &str = "test-token";

#[derive(Default)]
struct FakeDrive {
    base: String,
    folders: Vec<(String, String)>,
    queries: Vec<String>,
    metadata: Option<Value>,
    received: Vec<u8>,
    ranges: Vec<String>,
    fail_chunk_at: Option<u64>,
    failures_left: u32,
    failures_served: u32,
    acknowledge_through: Option<u64>,
}

type Shared = Arc<Mutex<FakeDrive>>;

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        == Some("Bearer test-token")
}

async fn list_folders(
    State(state): State<Shared>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let mut drive = state.lock().unwrap();
    let q = params.get("q").cloned().unwrap_or_default();
    drive.queries.push(q.clone());

    let files: Vec<Value> = drive
        .folders
        .iter()
        .filter(|(_, name)| q.starts_with(&format!("name='{}'", name.replace('\'', "\\'"))))
        .map(|(id, _)| json!({ "id": id }))
        .collect();
    Json(json!({ "files": files })).into_response()
}

async fn create_folder(State(state): State<Shared>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let mut drive = state.lock().unwrap();
    let id = format!("folder-{}", drive.folders.len() + 1);
    let name = body["name"].as_str().unwrap_or_default().to_string();
    drive.folders.push((id.clone(), name));
    Json(json!({ "id": id })).into_response()
}

async fn start_session(
    State(state): State<Shared>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
    Json(body): Json<Value>,
) -> Response {
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    if params.get("uploadType").map(String::as_str) != Some("resumable") {
        return StatusCode::BAD_REQUEST.into_response();
    }
    let mut drive = state.lock().unwrap();
    drive.metadata = Some(body);
    let location = format!("{}/upload/session", drive.base);
    (StatusCode::OK, [(header::LOCATION, location)]).into_response()
}

async fn put_chunk(State(state): State<Shared>, headers: HeaderMap, body: Bytes) -> Response {
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let range = headers
        .get(header::CONTENT_RANGE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let mut drive = state.lock().unwrap();
    drive.ranges.push(range.clone());

    if let Some(last) = drive.acknowledge_through {
        return (
            StatusCode::PERMANENT_REDIRECT,
            [(header::RANGE, format!("bytes=0-{}", last))],
        )
            .into_response();
    }

    let (span, total) = range
        .strip_prefix("bytes ")
        .and_then(|r| r.split_once('/'))
        .unwrap();
    let total: u64 = total.parse().unwrap();

    if span != "*" {
        let start: u64 = span.split_once('-').unwrap().0.parse().unwrap();
        if drive.fail_chunk_at == Some(start) && drive.failures_left > 0 {
            drive.failures_left -= 1;
            drive.failures_served += 1;
            return (StatusCode::SERVICE_UNAVAILABLE, "backend error").into_response();
        }
        if start != drive.received.len() as u64 {
            return StatusCode::BAD_REQUEST.into_response();
        }
        drive.received.extend_from_slice(&body);
    }

    let stored = drive.received.len() as u64;
    if stored == total {
        return Json(json!({ "id": "1AbCuploaded" })).into_response();
    }
    if stored == 0 {
        return StatusCode::PERMANENT_REDIRECT.into_response();
    }
    (
        StatusCode::PERMANENT_REDIRECT,
        [(header::RANGE, format!("bytes=0-{}", stored - 1))],
    )
        .into_response()
}

async fn spawn_drive(drive: FakeDrive) -> (Shared, DriveClient) {
    let state: Shared = Arc::new(Mutex::new(drive));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    state.lock().unwrap().base = base.clone();

    let app = Router::new()
        .route("/drive/v3/files", get(list_folders).post(create_folder))
        .route("/upload/drive/v3/files", post(start_session))
        .route("/upload/session", put(put_chunk))
        .with_state(state.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let tokens = Arc::new(StaticTokenProvider::new(TOKEN.to_string()));
    let client = DriveClient::new(tokens, CHUNK_ALIGNMENT)
        .unwrap()
        .with_endpoints(&format!("{}/drive/v3", base), &format!("{}/upload/drive/v3", base));
    (state, client)
}

fn dump_bytes(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

#[tokio::test]
async fn folder_is_looked_up_before_it_is_created() {
    let (state, client) = spawn_drive(FakeDrive::default()).await;
    let uploader = RemoteUploader::new(
        Arc::new(client),
        "Database Backups".to_string(),
        Duration::from_secs(10),
    );

    let first = uploader.resolve_folder("Database Backups").await.unwrap();
    let second = uploader.resolve_folder("Database Backups").await.unwrap();

    assert_eq!(first, "folder-1");
    assert_eq!(second, "folder-1");
    let drive = state.lock().unwrap();
    assert_eq!(drive.folders.len(), 1);
    assert_eq!(
        drive.queries,
        vec![
            "name='Database Backups' and mimeType='application/vnd.google-apps.folder' and trashed=false"
                .to_string()
        ]
    );
}

#[tokio::test]
async fn existing_folder_with_quote_is_found() {
    let (state, client) = spawn_drive(FakeDrive {
        folders: vec![("0BxOps".to_string(), "Ops' Backups".to_string())],
        ..FakeDrive::default()
    })
    .await;

    let found = client.find_folders("Ops' Backups").await.unwrap();

    assert_eq!(found, vec!["0BxOps".to_string()]);
    assert_eq!(state.lock().unwrap().folders.len(), 1);
}

#[tokio::test]
async fn resumable_upload_sends_aligned_chunks() {
    let (state, client) = spawn_drive(FakeDrive::default()).await;
    assert_eq!(client.chunk_size(), 262_144);
    let dir = tempdir().unwrap();
    let path = dir.path().join("backup_orders_20240115_020000.sql");
    let contents = dump_bytes(600_000);
    std::fs::write(&path, &contents).unwrap();

    let id = client
        .upload_file(&path, "backup_orders_20240115_020000.sql", "folder-1", SQL_MIME_TYPE)
        .await
        .unwrap();

    assert_eq!(id, "1AbCuploaded");
    let drive = state.lock().unwrap();
    assert_eq!(drive.received, contents);
    assert_eq!(
        drive.ranges,
        vec![
            "bytes 0-262143/600000".to_string(),
            "bytes 262144-524287/600000".to_string(),
            "bytes 524288-599999/600000".to_string(),
        ]
    );
    let metadata = drive.metadata.clone().unwrap();
    assert_eq!(metadata["name"], "backup_orders_20240115_020000.sql");
    assert_eq!(metadata["mimeType"], "application/sql");
    assert_eq!(metadata["parents"], json!(["folder-1"]));
    assert!(path.exists());
}

#[tokio::test]
async fn interrupted_chunk_resumes_from_server_offset() {
    let (state, client) = spawn_drive(FakeDrive {
        fail_chunk_at: Some(262_144),
        failures_left: 1,
        ..FakeDrive::default()
    })
    .await;
    let dir = tempdir().unwrap();
    let path = dir.path().join("backup.sql");
    let contents = dump_bytes(600_000);
    std::fs::write(&path, &contents).unwrap();

    let id = client
        .upload_file(&path, "backup.sql", "folder-1", SQL_MIME_TYPE)
        .await
        .unwrap();

    assert_eq!(id, "1AbCuploaded");
    let drive = state.lock().unwrap();
    assert_eq!(drive.failures_served, 1);
    assert_eq!(drive.received, contents);
    assert!(drive.ranges.contains(&"bytes */600000".to_string()));
}

#[tokio::test]
async fn persistent_rejection_gives_up() {
    let (state, client) = spawn_drive(FakeDrive {
        fail_chunk_at: Some(0),
        failures_left: u32::MAX,
        ..FakeDrive::default()
    })
    .await;
    let dir = tempdir().unwrap();
    let path = dir.path().join("backup.sql");
    std::fs::write(&path, dump_bytes(1_000)).unwrap();

    let err = client
        .upload_file(&path, "backup.sql", "folder-1", SQL_MIME_TYPE)
        .await
        .unwrap_err();

    match err {
        BackupError::UploadFailed(msg) => assert!(msg.contains("503")),
        other => panic!("unexpected error: {}", other),
    }
    assert_eq!(state.lock().unwrap().failures_served, 4);
}

#[tokio::test]
async fn uploader_resolves_default_folder_then_uploads() {
    let (state, client) = spawn_drive(FakeDrive::default()).await;
    let uploader = RemoteUploader::new(
        Arc::new(client),
        "Database Backups".to_string(),
        Duration::from_secs(10),
    );
    let dir = tempdir().unwrap();
    let path = dir.path().join("backup_orders_20240115_020000.sql");
    std::fs::write(&path, b"-- Dump completed\n").unwrap();

    let result = uploader.upload_file(&path, None).await.unwrap();

    assert_eq!(result.remote_id, "1AbCuploaded");
    assert_eq!(result.folder_id, "folder-1");
    assert_eq!(result.file_name, "backup_orders_20240115_020000.sql");
    assert_eq!(state.lock().unwrap().folders.len(), 1);
}

#[tokio::test]
async fn range_past_end_of_file_is_rejected() {
    let (state, client) = spawn_drive(FakeDrive {
        acknowledge_through: Some(4_999),
        ..FakeDrive::default()
    })
    .await;
    let dir = tempdir().unwrap();
    let path = dir.path().join("backup.sql");
    std::fs::write(&path, dump_bytes(1_000)).unwrap();

    let err = client
        .upload_file(&path, "backup.sql", "folder-1", SQL_MIME_TYPE)
        .await
        .unwrap_err();

    match err {
        BackupError::UploadFailed(msg) => assert_eq!(msg, "server acknowledged 5000 bytes of 1000"),
        other => panic!("unexpected error: {}", other),
    }
    assert_eq!(state.lock().unwrap().ranges, vec!["bytes 0-999/1000".to_string()]);
    assert!(path.exists());
}
