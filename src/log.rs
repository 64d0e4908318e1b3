use crate::config::LogSettings;
use crate::error::Result;
use chrono::Local;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Monthly log file name, e.g. `backup_202401.log`.
pub fn log_file_name(now: &chrono::DateTime<Local>) -> String {
    format!("backup_{}.log", now.format("%Y%m"))
}

fn open_log_file(dir: &Path) -> Result<(fs::File, PathBuf)> {
    fs::create_dir_all(dir)?;
    let path = dir.join(log_file_name(&Local::now()));
    let file = OpenOptions::new().create(true).append(true).open(&path)?;
    Ok((file, path))
}

/// Installs the global subscriber: stdout always, plus an append-only monthly
/// file when `settings.dir` is set. `RUST_LOG` overrides the configured level.
pub fn init(settings: &LogSettings) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let file_layer = match &settings.dir {
        Some(dir) => {
            let (file, _) = open_log_file(dir)?;
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_target(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    let result = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .with(file_layer)
        .try_init();

    if let Err(e) = result {
        eprintln!("Logging already initialised: {}", e);
    }
    Ok(())
}
