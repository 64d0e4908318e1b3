use crate::error::{BackupError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DatabaseConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    3306
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            user: "root".to_string(),
            password: String::new(),
            database: String::new(),
        }
    }
}

impl DatabaseConfig {
    pub fn validate(&self) -> Result<()> {
        let fields = [
            ("database.host", &self.host),
            ("database.user", &self.user),
            ("database.password", &self.password),
            ("database.database", &self.database),
        ];
        for (field, value) in fields {
            if value.trim().is_empty() {
                return Err(BackupError::config_invalid(field, "must not be empty"));
            }
        }
        if self.port == 0 {
            return Err(BackupError::config_invalid(
                "database.port",
                "must be a positive integer",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DumpSettings {
    pub executable: String,
    pub local_backup_dir: PathBuf,
    pub ssl_verify_server_cert: bool,
    pub verify_completion: bool,
    /// Hand the password to the dump process through `MYSQL_PWD` instead of argv.
    pub password_from_env: bool,
    pub extra_args: Vec<String>,
}

impl Default for DumpSettings {
    fn default() -> Self {
        Self {
            executable: "mariadb-dump".to_string(),
            local_backup_dir: PathBuf::from("backups"),
            ssl_verify_server_cert: false,
            verify_completion: true,
            password_from_env: false,
            extra_args: Vec::new(),
        }
    }
}

pub const DEFAULT_FOLDER_NAME: &str = "Database Backups";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RemoteConfig {
    pub enabled: bool,
    pub folder_id: Option<String>,
    pub folder_name: String,
    pub upload_timeout_secs: u64,
    pub chunk_size_mb: u32,
    pub credentials_path: PathBuf,
    pub token_path: PathBuf,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            folder_id: None,
            folder_name: DEFAULT_FOLDER_NAME.to_string(),
            upload_timeout_secs: 600,
            chunk_size_mb: 8,
            credentials_path: PathBuf::from("credentials.json"),
            token_path: PathBuf::from("token.json"),
        }
    }
}

impl RemoteConfig {
    pub fn upload_timeout(&self) -> Duration {
        Duration::from_secs(self.upload_timeout_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.upload_timeout_secs == 0 {
            return Err(BackupError::config_invalid(
                "remote.upload_timeout_secs",
                "must be greater than zero",
            ));
        }
        if self.chunk_size_mb == 0 {
            return Err(BackupError::config_invalid(
                "remote.chunk_size_mb",
                "must be greater than zero",
            ));
        }
        let has_folder_id = self
            .folder_id
            .as_deref()
            .map_or(false, |id| !id.trim().is_empty());
        if !has_folder_id && self.folder_name.trim().is_empty() {
            return Err(BackupError::config_invalid(
                "remote.folder_name",
                "must not be empty when no folder_id is set",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LogSettings {
    pub level: String,
    pub dir: Option<PathBuf>,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            dir: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub dump: DumpSettings,
    #[serde(default)]
    pub remote: Option<RemoteConfig>,
    #[serde(default)]
    pub logging: LogSettings,
}

impl AppConfig {
    pub fn validate(&self) -> Result<()> {
        self.database.validate()?;
        if self.dump.executable.trim().is_empty() {
            return Err(BackupError::config_invalid(
                "dump.executable",
                "must not be empty",
            ));
        }
        if let Some(remote) = self.active_remote() {
            remote.validate()?;
        }
        Ok(())
    }

    /// The remote section, if present and enabled. `None` means local-only mode.
    pub fn active_remote(&self) -> Option<&RemoteConfig> {
        self.remote.as_ref().filter(|r| r.enabled)
    }

    /// Rewrites relative paths so they are anchored at `base` (the config directory).
    pub fn resolve_paths(&mut self, base: &Path) {
        self.dump.local_backup_dir = anchor(base, &self.dump.local_backup_dir);
        if let Some(remote) = self.remote.as_mut() {
            remote.credentials_path = anchor(base, &remote.credentials_path);
            remote.token_path = anchor(base, &remote.token_path);
        }
        if let Some(dir) = self.logging.dir.take() {
            self.logging.dir = Some(anchor(base, &dir));
        }
    }
}

fn anchor(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}
