//! SQLite helpers: one place that creates the connection pool and the tables.

use crate::chat::conversation::dao::SqliteConversationDao;
use anyhow::{Context, Result};
use sqlx::{sqlite::SqlitePoolOptions, Pool, Sqlite};
use tracing::info;

/// Creates a SQLite connection pool.
///
/// In-memory databases live per connection, so they get a single connection
/// that is never recycled.
pub async fn create_sqlite_pool(db_url: &str) -> Result<Pool<Sqlite>> {
    let options = if db_url.contains(":memory:") {
        SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
    } else {
        SqlitePoolOptions::new().max_connections(5)
    };

    let pool = options
        .connect(db_url)
        .await
        .with_context(|| format!("connecting to SQLite database {db_url}"))?;
    Ok(pool)
}

/// Creates the pool and makes sure every table exists.
pub async fn create_sqlite_pool_with_tables(db_url: &str) -> Result<Pool<Sqlite>> {
    let pool = create_sqlite_pool(db_url).await?;
    SqliteConversationDao::init_db_with_connection(&pool)
        .await
        .context("creating conversation tables")?;
    info!("[DB] SQLite ready: {}", db_url);
    Ok(pool)
}
