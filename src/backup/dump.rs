use crate::backup::artifact::{backup_file_name, calculate_sha256, verify_dump_file, BackupArtifact};
use crate::config::{DatabaseConfig, DumpSettings};
use crate::error::{BackupError, Result};
use async_trait::async_trait;
use chrono::{Local, NaiveDateTime};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;
use tracing::{debug, error, info, warn};

/// Environment variable the MySQL and MariaDB clients read the password from.
pub const PASSWORD_ENV: &str = "MYSQL_PWD";

#[derive(Clone, PartialEq)]
pub struct DumpInvocation {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub output_path: PathBuf,
}

impl DumpInvocation {
    pub fn build(settings: &DumpSettings, config: &DatabaseConfig, output_path: &Path) -> Self {
        let mut args = vec![
            format!("--host={}", config.host),
            format!("--user={}", config.user),
        ];
        let mut env = Vec::new();
        if settings.password_from_env {
            env.push((PASSWORD_ENV.to_string(), config.password.clone()));
        } else {
            args.push(format!("--password={}", config.password));
        }
        args.extend([
            format!("--port={}", config.port),
            "--single-transaction".to_string(),
            "--quick".to_string(),
            "--compress".to_string(),
            "--routines".to_string(),
            "--triggers".to_string(),
            "--events".to_string(),
        ]);
        if !settings.ssl_verify_server_cert {
            args.push("--ssl-verify-server-cert=false".to_string());
        }
        args.extend(settings.extra_args.iter().cloned());
        args.push(config.database.clone());
        args.push(format!("--result-file={}", output_path.display()));

        Self {
            program: settings.executable.clone(),
            args,
            env,
            output_path: output_path.to_path_buf(),
        }
    }

    /// Arguments safe to log.
    pub fn redacted_args(&self) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| {
                if arg.starts_with("--password=") {
                    "--password=***".to_string()
                } else {
                    arg.clone()
                }
            })
            .collect()
    }
}

impl fmt::Debug for DumpInvocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let env_keys: Vec<&str> = self.env.iter().map(|(key, _)| key.as_str()).collect();
        f.debug_struct("DumpInvocation")
            .field("program", &self.program)
            .field("args", &self.redacted_args())
            .field("env", &env_keys)
            .field("output_path", &self.output_path)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DumpOutput {
    pub exit_code: Option<i32>,
    pub stderr: String,
}

impl DumpOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    fn failure_cause(&self) -> String {
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            return stderr.to_string();
        }
        match self.exit_code {
            Some(code) => format!("dump process exited with code {}", code),
            None => "dump process was terminated by a signal".to_string(),
        }
    }
}

/// Runs the external dump utility. Blocks the caller until the process exits.
#[async_trait]
pub trait DumpRunner: Send + Sync {
    async fn run(&self, invocation: &DumpInvocation) -> Result<DumpOutput>;
}

pub struct ProcessDumpRunner;

impl ProcessDumpRunner {
    /// First line of `<program> --version`; fails when the executable cannot be spawned.
    pub async fn version(program: &str) -> Result<String> {
        let output = Command::new(program)
            .arg("--version")
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| BackupError::DumpFailed(format!("failed to run {}: {}", program, e)))?;

        if !output.status.success() {
            return Err(BackupError::DumpFailed(format!(
                "{} --version exited with {}",
                program, output.status
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .next()
            .unwrap_or_default()
            .trim()
            .to_string())
    }
}

#[async_trait]
impl DumpRunner for ProcessDumpRunner {
    async fn run(&self, invocation: &DumpInvocation) -> Result<DumpOutput> {
        debug!(
            "Running {} {}",
            invocation.program,
            invocation.redacted_args().join(" ")
        );

        let output = Command::new(&invocation.program)
            .args(&invocation.args)
            .envs(invocation.env.iter().map(|(key, value)| (key, value)))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                BackupError::DumpFailed(format!("failed to run {}: {}", invocation.program, e))
            })?;

        Ok(DumpOutput {
            exit_code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

/// Removes the output file on drop unless the dump was kept. Covers error
/// returns as well as a dropped (cancelled) dump future.
struct PartialFile {
    path: PathBuf,
    keep: bool,
}

impl PartialFile {
    fn new(path: PathBuf) -> Self {
        Self { path, keep: false }
    }

    fn keep(mut self) -> PathBuf {
        self.keep = true;
        self.path.clone()
    }
}

impl Drop for PartialFile {
    fn drop(&mut self) {
        if self.keep || !self.path.exists() {
            return;
        }
        match fs::remove_file(&self.path) {
            Ok(()) => debug!("Removed partial dump file {}", self.path.display()),
            Err(e) => warn!(
                "Failed to remove partial dump file {}: {}",
                self.path.display(),
                e
            ),
        }
    }
}

fn local_now() -> NaiveDateTime {
    Local::now().naive_local()
}

pub struct DumpExecutor {
    settings: DumpSettings,
    runner: Arc<dyn DumpRunner>,
    clock: fn() -> NaiveDateTime,
}

impl DumpExecutor {
    pub fn new(settings: DumpSettings, runner: Arc<dyn DumpRunner>) -> Self {
        Self {
            settings,
            runner,
            clock: local_now,
        }
    }

    /// Replaces the local wall clock used to stamp file names.
    pub fn with_clock(mut self, clock: fn() -> NaiveDateTime) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_process_runner(settings: DumpSettings) -> Self {
        Self::new(settings, Arc::new(ProcessDumpRunner))
    }

    pub async fn create_backup(&self, config: &DatabaseConfig) -> Result<BackupArtifact> {
        self.create_backup_at(config, (self.clock)()).await
    }

    pub async fn create_backup_at(
        &self,
        config: &DatabaseConfig,
        timestamp: NaiveDateTime,
    ) -> Result<BackupArtifact> {
        let backup_dir = &self.settings.local_backup_dir;
        fs::create_dir_all(backup_dir).map_err(|e| {
            BackupError::DumpFailed(format!(
                "failed to create backup directory {}: {}",
                backup_dir.display(),
                e
            ))
        })?;

        let path = backup_dir.join(backup_file_name(&config.database, &timestamp));
        let invocation = DumpInvocation::build(&self.settings, config, &path);
        let partial = PartialFile::new(path.clone());

        info!("Creating backup of database '{}'...", config.database);
        let output = match self.runner.run(&invocation).await {
            Ok(output) => output,
            Err(BackupError::DumpFailed(msg)) => return Err(BackupError::DumpFailed(msg)),
            Err(e) => return Err(BackupError::DumpFailed(e.cause())),
        };

        if !output.success() {
            error!("Error creating backup:\n{}", output.stderr.trim_end());
            return Err(BackupError::DumpFailed(output.failure_cause()));
        }

        let size_bytes = verify_dump_file(&path, self.settings.verify_completion)?;
        let sha256 = calculate_sha256(&path)
            .map_err(|e| BackupError::DumpFailed(format!("failed to checksum dump: {}", e.cause())))?;

        let artifact = BackupArtifact {
            path: partial.keep(),
            database: config.database.clone(),
            created_at: timestamp,
            size_bytes,
            sha256,
        };

        info!("Backup successfully created: {}", artifact.path.display());
        info!("Backup size: {:.2} MB", artifact.size_mb());
        debug!("Backup SHA256: {}", artifact.sha256);
        Ok(artifact)
    }
}
