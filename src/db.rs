//! SQLite connection pools and the query-timeout wrapper shared by every
//! storage operation.

use std::future::Future;
use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use tokio::time;
use tracing::{error, info};

use crate::error::CoreError;

const BUSY_TIMEOUT: Duration = Duration::from_secs(30);
pub const QUERY_TIMEOUT: Duration = Duration::from_secs(30);

// SQLite is single-writer; keeping more than one connection in the write
// pool just shifts lock contention from SQLite onto our own queueing, so
// we queue on our side instead and let readers run with high concurrency
// in autocommit.
const WRITE_POOL_MAX_CONNECTIONS: u32 = 1;
const READ_POOL_MAX_CONNECTIONS: u32 = 16;

#[derive(Clone)]
pub struct DbPools {
    read: SqlitePool,
    write: SqlitePool,
}

impl DbPools {
    pub fn read(&self) -> &SqlitePool {
        &self.read
    }

    pub fn write(&self) -> &SqlitePool {
        &self.write
    }
}

fn build_connection_options(database_url: &str) -> Result<SqliteConnectOptions, sqlx::Error> {
    Ok(SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(BUSY_TIMEOUT))
}

pub async fn init_pool(database_url: &str) -> Result<DbPools, sqlx::Error> {
    let options = build_connection_options(database_url)?;

    let read = SqlitePoolOptions::new()
        .max_connections(READ_POOL_MAX_CONNECTIONS)
        .acquire_timeout(Duration::from_secs(30))
        .connect_with(options.clone())
        .await?;

    let write = SqlitePoolOptions::new()
        .max_connections(WRITE_POOL_MAX_CONNECTIONS)
        .acquire_timeout(Duration::from_secs(30))
        .connect_with(options)
        .await?;

    info!(
        "DB pools initialised (read: {}, write: {})",
        READ_POOL_MAX_CONNECTIONS, WRITE_POOL_MAX_CONNECTIONS
    );

    Ok(DbPools { read, write })
}

pub async fn run_migrations(pools: &DbPools) -> Result<(), sqlx::Error> {
    sqlx::migrate!("./migrations").run(pools.write()).await?;
    info!("Database migrations completed");
    Ok(())
}

#[derive(Debug)]
pub enum DbQueryError {
    Timeout,
    Sqlx(sqlx::Error),
}

impl From<sqlx::Error> for DbQueryError {
    fn from(err: sqlx::Error) -> Self {
        Self::Sqlx(err)
    }
}

pub async fn query_with_timeout<F, T>(future: F) -> Result<T, DbQueryError>
where
    F: Future<Output = Result<T, sqlx::Error>>,
{
    match time::timeout(QUERY_TIMEOUT, future).await {
        Ok(result) => result.map_err(Into::into),
        Err(_) => Err(DbQueryError::Timeout),
    }
}

impl DbQueryError {
    pub fn into_core_error(self, context: &'static str) -> CoreError {
        match self {
            Self::Timeout => {
                error!("Database timeout while {}", context);
                CoreError::StoreBusy(format!("timed out while {context}"))
            }
            Self::Sqlx(err) => {
                error!("Database error while {}: {}", context, err);
                CoreError::Internal(format!("database error while {context}: {err}"))
            }
        }
    }
}
