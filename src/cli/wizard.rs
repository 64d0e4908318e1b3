use crate::config::{self, AppConfig, DatabaseConfig, RemoteConfig, DEFAULT_FOLDER_NAME};
use crate::database::probe_connection;
use crate::error::Result;
use console::style;
use dialoguer::{Confirm, Input, Password, Select};
use std::path::{Path, PathBuf};

pub fn configure_database(existing: &DatabaseConfig) -> Result<DatabaseConfig> {
    println!("\n{}", style("=== Database Configuration ===").cyan().bold());

    let host: String = Input::new()
        .with_prompt("Host")
        .default(existing.host.clone())
        .interact_text()?;

    let port: u16 = Input::new()
        .with_prompt("Port")
        .default(existing.port)
        .interact_text()?;

    let user: String = Input::new()
        .with_prompt("Username")
        .default(existing.user.clone())
        .interact_text()?;

    let password: String = Password::new()
        .with_prompt("Password")
        .interact()?;

    let database: String = Input::new()
        .with_prompt("Database to back up")
        .with_initial_text(existing.database.clone())
        .interact_text()?;

    Ok(DatabaseConfig {
        host,
        port,
        user,
        password,
        database,
    })
}

pub fn configure_remote(existing: Option<&RemoteConfig>) -> Result<Option<RemoteConfig>> {
    println!("\n{}", style("=== Google Drive Upload ===").cyan().bold());

    let modes = ["Upload to Google Drive", "Keep backups locally only"];
    let mode = Select::new()
        .with_prompt("Where should backups go?")
        .items(&modes)
        .default(if existing.map_or(true, |r| r.enabled) { 0 } else { 1 })
        .interact()?;

    if mode == 1 {
        return Ok(None);
    }

    let base = existing.cloned().unwrap_or_default();

    let folder_id: String = Input::new()
        .with_prompt("Drive folder id (leave empty to look up the folder by name)")
        .allow_empty(true)
        .with_initial_text(base.folder_id.clone().unwrap_or_default())
        .interact_text()?;

    let folder_name: String = if folder_id.trim().is_empty() {
        Input::new()
            .with_prompt("Folder name (will be created if it doesn't exist)")
            .default(DEFAULT_FOLDER_NAME.to_string())
            .interact_text()?
    } else {
        base.folder_name.clone()
    };

    let upload_timeout_secs: u64 = Input::new()
        .with_prompt("Upload timeout in seconds")
        .default(base.upload_timeout_secs)
        .interact_text()?;

    let credentials_path: String = Input::new()
        .with_prompt("OAuth client secrets file")
        .default(base.credentials_path.display().to_string())
        .interact_text()?;

    Ok(Some(RemoteConfig {
        enabled: true,
        folder_id: Some(folder_id.trim().to_string()).filter(|id| !id.is_empty()),
        folder_name,
        upload_timeout_secs,
        credentials_path: PathBuf::from(credentials_path),
        ..base
    }))
}

pub fn configure_backup_directory(config: &mut AppConfig) -> Result<()> {
    println!("\n{}", style("=== Backup Directory ===").cyan().bold());

    let current = config.dump.local_backup_dir.display().to_string();

    let new_path: String = Input::new()
        .with_prompt("Local backup directory")
        .default(current)
        .interact_text()?;

    config.dump.local_backup_dir = PathBuf::from(new_path);

    let executable: String = Input::new()
        .with_prompt("Dump executable")
        .default(config.dump.executable.clone())
        .interact_text()?;
    config.dump.executable = executable;

    Ok(())
}

/// Interactive setup; writes the resulting configuration to `path`.
pub async fn run_setup(path: &Path) -> Result<()> {
    let mut config = config::load_from(path)?;

    config.database = configure_database(&config.database)?;

    let test_now = Confirm::new()
        .with_prompt("Test the database connection now?")
        .default(true)
        .interact()?;
    if test_now {
        println!("\n{}", style("Testing connection...").yellow());
        match probe_connection(&config.database).await {
            Ok(_) => println!("{}", style("✓ Connection successful!").green()),
            Err(e) => println!("{}", style(format!("✗ Connection failed: {}", e)).red()),
        }
    }

    configure_backup_directory(&mut config)?;
    config.remote = match configure_remote(config.remote.as_ref())? {
        Some(remote) => Some(remote),
        None => config.remote.take().map(|r| RemoteConfig { enabled: false, ..r }),
    };

    config.validate()?;
    config::save_to(&config, path)?;

    println!(
        "{}",
        style(format!("Configuration saved to {}", path.display())).green()
    );
    if config.active_remote().is_some() {
        println!(
            "Next: run {} to grant Google Drive access.",
            style("sql-drive-backup authorize").cyan()
        );
    }
    Ok(())
}
