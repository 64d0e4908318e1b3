use crate::config::DatabaseConfig;
use crate::error::{BackupError, Result};
use mysql_async::prelude::*;
use mysql_async::{Opts, OptsBuilder, Pool};
use std::time::Duration;
use tracing::{debug, info};

pub fn connection_opts(config: &DatabaseConfig) -> Opts {
    OptsBuilder::default()
        .ip_or_hostname(&config.host)
        .tcp_port(config.port)
        .user(Some(&config.user))
        .pass(Some(&config.password))
        .db_name(Some(&config.database))
        .into()
}

/// Opens a connection to the configured database and runs `SELECT 1`.
/// Returns the server version string.
pub async fn probe_connection(config: &DatabaseConfig) -> Result<String> {
    info!(
        "Testing MySQL connection to {}:{}/{}",
        config.host, config.port, config.database
    );
    let pool = Pool::new(connection_opts(config));

    let outcome = tokio::time::timeout(Duration::from_secs(30), async {
        let mut conn = pool.get_conn().await?;
        let _: Option<i32> = conn.query_first("SELECT 1").await?;
        let version: Option<String> = conn.query_first("SELECT VERSION()").await?;
        Ok::<_, BackupError>(version.unwrap_or_default())
    })
    .await;

    pool.disconnect().await?;

    let version = match outcome {
        Ok(result) => result?,
        Err(_) => {
            return Err(BackupError::Database(format!(
                "timed out connecting to {}:{}",
                config.host, config.port
            )))
        }
    };

    debug!("Server version: {}", version);
    info!("MySQL connection successful");
    Ok(version)
}
