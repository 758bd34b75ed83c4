pub mod commands;
pub mod connection;
pub mod convert;
pub mod dispatcher;

use std::sync::Arc;

use anyhow::{Result, anyhow};
use jobchat_db::Database;

/// Runs a database closure on the blocking pool.
pub async fn blocking<T, F>(db: &Arc<Database>, f: F) -> Result<T>
where
    F: FnOnce(&Database) -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    let db = db.clone();
    tokio::task::spawn_blocking(move || f(&db))
        .await
        .map_err(|e| anyhow!("spawn_blocking join error: {}", e))?
}
