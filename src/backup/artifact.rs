use crate::error::{BackupError, Result};
use chrono::NaiveDateTime;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

pub const FILENAME_TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Trailer line mariadb-dump and mysqldump write once the dump ran to the end.
pub const COMPLETION_MARKER: &[u8] = b"-- Dump completed";

const TAIL_WINDOW: u64 = 4 * 1024;

#[derive(Debug, Clone, PartialEq)]
pub struct BackupArtifact {
    pub path: PathBuf,
    pub database: String,
    pub created_at: NaiveDateTime,
    pub size_bytes: u64,
    pub sha256: String,
}

impl BackupArtifact {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| backup_file_name(&self.database, &self.created_at))
    }

    pub fn size_mb(&self) -> f64 {
        self.size_bytes as f64 / 1024.0 / 1024.0
    }
}

pub fn backup_file_name(database: &str, timestamp: &NaiveDateTime) -> String {
    format!(
        "backup_{}_{}.sql",
        database,
        timestamp.format(FILENAME_TIMESTAMP_FORMAT)
    )
}

pub fn calculate_sha256(file_path: &Path) -> Result<String> {
    use sha2::{Digest, Sha256};

    let file = File::open(file_path)?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; 64 * 1024];

    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Checks a freshly written dump: it must exist, be non-empty and, when
/// `require_marker` is set, carry the completion trailer near its end.
/// Returns the file size.
pub fn verify_dump_file(path: &Path, require_marker: bool) -> Result<u64> {
    let size = match std::fs::metadata(path) {
        Ok(meta) => meta.len(),
        Err(e) => {
            return Err(BackupError::DumpFailed(format!(
                "dump finished but {} is unreadable: {}",
                path.display(),
                e
            )))
        }
    };

    if size == 0 {
        return Err(BackupError::DumpFailed(format!(
            "dump produced an empty file: {}",
            path.display()
        )));
    }

    if require_marker && !tail_contains_marker(path, size)? {
        return Err(BackupError::DumpFailed(format!(
            "dump file {} has no completion marker, output is likely truncated",
            path.display()
        )));
    }

    Ok(size)
}

fn tail_contains_marker(path: &Path, size: u64) -> Result<bool> {
    let mut file = File::open(path)?;
    let start = size.saturating_sub(TAIL_WINDOW);
    file.seek(SeekFrom::Start(start))?;

    let mut tail = Vec::with_capacity((size - start) as usize);
    file.read_to_end(&mut tail)?;

    Ok(tail
        .windows(COMPLETION_MARKER.len())
        .any(|w| w == COMPLETION_MARKER))
}
