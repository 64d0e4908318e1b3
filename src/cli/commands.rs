use crate::auth::{self, ClientSecrets};
use crate::backup::{BackupWorkflow, DumpExecutor, ProcessDumpRunner};
use crate::config::{self, AppConfig, LogSettings};
use crate::database::probe_connection;
use crate::error::Result;
use crate::log;
use crate::shutdown::{cancel_pair, install_ctrlc_handler};
use crate::upload::{create_drive_uploader, RemoteDestination};
use console::style;
use std::path::Path;
use tracing::{debug, error, info, warn};

fn load_or_report(path: &Path) -> Option<AppConfig> {
    match config::load_validated(path) {
        Ok(config) => {
            if let Err(e) = log::init(&config.logging) {
                eprintln!("Failed to open log file: {}", e);
                let _ = log::init(&LogSettings::default());
            }
            if path.exists() {
                info!("Loaded configuration from {}", path.display());
            } else {
                debug!("Config file not found at {}, using defaults", path.display());
            }
            Some(config)
        }
        Err(e) => {
            let _ = log::init(&LogSettings::default());
            error!("Failed to load configuration from {}: {}", path.display(), e);
            eprintln!("Error: {}", e);
            None
        }
    }
}

/// One backup run. Returns the process exit status.
pub async fn run_backup(config_path: &Path) -> i32 {
    let config = match load_or_report(config_path) {
        Some(config) => config,
        None => return 1,
    };

    let (handle, cancel) = cancel_pair();
    if let Err(e) = install_ctrlc_handler(handle) {
        warn!("Could not install Ctrl-C handler: {}", e);
    }

    let (uploader, destination) = match config.active_remote() {
        Some(remote) => match create_drive_uploader(remote) {
            Ok(uploader) => (Some(uploader), Some(RemoteDestination::from_config(remote))),
            Err(e) => {
                error!("Cannot set up Google Drive upload: {}", e);
                eprintln!("Error: {}", e);
                return 1;
            }
        },
        None => {
            info!("Remote upload not configured, backup will be kept locally");
            (None, None)
        }
    };

    let workflow = BackupWorkflow::new(
        DumpExecutor::with_process_runner(config.dump.clone()),
        uploader,
    );
    let result = workflow
        .run(&config.database, destination.as_ref(), &cancel)
        .await;

    if result.is_completed() {
        info!("{}", result);
    } else {
        eprintln!("Error: {}", result);
    }
    result.exit_code()
}

pub async fn authorize(config_path: &Path) -> i32 {
    let config = match load_or_report(config_path) {
        Some(config) => config,
        None => return 1,
    };
    let remote = config.remote.clone().unwrap_or_default();

    let outcome: Result<()> = async {
        let secrets = ClientSecrets::load(&remote.credentials_path)?;
        auth::authorize(&secrets, &remote.token_path).await?;
        Ok(())
    }
    .await;

    match outcome {
        Ok(()) => {
            println!(
                "{}",
                style(format!("✓ Authorized. Token stored at {}", remote.token_path.display())).green()
            );
            0
        }
        Err(e) => {
            eprintln!("{}", style(format!("✗ Authorization failed: {}", e)).red());
            1
        }
    }
}

pub async fn check(config_path: &Path) -> i32 {
    let config = match load_or_report(config_path) {
        Some(config) => config,
        None => return 1,
    };
    let mut healthy = true;

    match probe_connection(&config.database).await {
        Ok(version) => println!(
            "{}",
            style(format!("✓ Database reachable (server {})", version)).green()
        ),
        Err(e) => {
            healthy = false;
            println!("{}", style(format!("✗ Database check failed: {}", e)).red());
        }
    }

    match ProcessDumpRunner::version(&config.dump.executable).await {
        Ok(version) => println!("{}", style(format!("✓ Dump utility: {}", version)).green()),
        Err(e) => {
            healthy = false;
            println!("{}", style(format!("✗ Dump utility: {}", e.cause())).red());
        }
    }

    match config.active_remote() {
        Some(remote) => match create_drive_uploader(remote) {
            Ok(_) => println!(
                "{}",
                style(format!("✓ Google Drive upload configured ({})", RemoteDestination::from_config(remote))).green()
            ),
            Err(e) => {
                healthy = false;
                println!("{}", style(format!("✗ Google Drive: {}", e)).red());
            }
        },
        None => println!("{}", style("- Remote upload disabled, backups stay local").yellow()),
    }

    if healthy {
        0
    } else {
        1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::{Arc, Mutex};
    use tempfile::tempdir;

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_config_load_is_logged_once_logging_is_up() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[database]\nhost = \"localhost\"\nport = 3306\nuser = \"backup\"\npassword = \"secret\"\ndatabase = \"orders\"\n",
        )
        .unwrap();

        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        let config = tracing::subscriber::with_default(subscriber, || load_or_report(&path));

        assert_eq!(config.unwrap().database.database, "orders");
        let output = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        assert!(output.contains("Loaded configuration from"), "{}", output);
        assert!(!output.contains("secret"));
    }
}
