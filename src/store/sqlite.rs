//! SQLite lock store implementation
//!
//! This module provides a SQLite-based implementation of the `LockStore` trait.
//! Several collector processes on the same host can point at one database file
//! and elect a master through it.
//!
//! ## Features
//!
//! - **Embedded**: No separate store server required
//! - **WAL mode**: Readers do not block the single writer
//! - **Atomic conditional set**: `INSERT .. ON CONFLICT .. WHERE expired` decides
//!   the election race inside one statement
//! - **Migrations**: Schema versioning with sqlx
//!
//! ## Limitations
//!
//! - **Polling pops**: `list_pop` polls with a short interval instead of blocking server side
//! - **Single host**: The file must live on a local filesystem

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Row, Sqlite};
use tokio::time::Instant;
use tracing::{debug, info, instrument, trace};

use super::backend::LockStore;
use super::error::{StoreError, StoreResult};

/// How often a waiting `list_pop` re-checks the list
const POP_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// SQLite lock store
pub struct SqliteLockStore {
    pool: Pool<Sqlite>,
    db_path: String,
}

impl SqliteLockStore {
    /// Open (or create) a lock store database
    ///
    /// ## Example
    ///
    /// ```no_run
    /// # use telemetry_porter::store::sqlite::SqliteLockStore;
    /// # async fn example() -> anyhow::Result<()> {
    /// let store = SqliteLockStore::new("./porter-lock.db").await?;
    /// # Ok(())
    /// # }
    /// ```
    #[instrument(skip_all)]
    pub async fn new(db_path: impl AsRef<Path>) -> StoreResult<Self> {
        let db_path_str = db_path.as_ref().to_string_lossy().to_string();

        info!("initializing SQLite lock store at: {}", db_path_str);

        let options = SqliteConnectOptions::new()
            .filename(&db_path_str)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::ConnectionFailed(e.to_string()))?;

        debug!("running lock store migrations");
        sqlx::migrate!("./migrations/lockstore")
            .run(&pool)
            .await
            .map_err(|e| StoreError::MigrationFailed(e.to_string()))?;

        Ok(Self {
            pool,
            db_path: db_path_str,
        })
    }

    /// Path of the backing database file
    pub fn path(&self) -> &str {
        &self.db_path
    }

    fn now_millis() -> i64 {
        Utc::now().timestamp_millis()
    }

    fn expiry_millis(ttl: Duration) -> i64 {
        Self::now_millis() + ttl.as_millis() as i64
    }

    async fn try_pop(&self, key: &str) -> StoreResult<Option<String>> {
        let row = sqlx::query(
            r#"
            DELETE FROM list_items
            WHERE id = (
                SELECT id FROM list_items WHERE key = ? ORDER BY id ASC LIMIT 1
            )
            RETURNING value
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| row.get::<String, _>("value")))
    }
}

#[async_trait]
impl LockStore for SqliteLockStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let row = sqlx::query(
            "SELECT value FROM kv WHERE key = ? AND (expires_at IS NULL OR expires_at > ?)",
        )
        .bind(key)
        .bind(Self::now_millis())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| row.get::<String, _>("value")))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO kv (key, value, expires_at) VALUES (?, ?, ?)
            ON CONFLICT (key) DO UPDATE SET
                value = excluded.value,
                expires_at = excluded.expires_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(ttl.map(Self::expiry_millis))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[instrument(skip(self, value))]
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<bool> {
        // the WHERE on the upsert only lets an expired row be taken over
        let result = sqlx::query(
            r#"
            INSERT INTO kv (key, value, expires_at) VALUES (?, ?, ?)
            ON CONFLICT (key) DO UPDATE SET
                value = excluded.value,
                expires_at = excluded.expires_at
            WHERE kv.expires_at IS NOT NULL AND kv.expires_at <= ?
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(Self::expiry_millis(ttl))
        .bind(Self::now_millis())
        .execute(&self.pool)
        .await?;

        let acquired = result.rows_affected() == 1;
        trace!("set_if_absent({key}) -> {acquired}");
        Ok(acquired)
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM kv WHERE key = ?")
            .bind(key)
            .execute(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM list_items WHERE key = ?")
            .bind(key)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn list_push(&self, key: &str, value: &str) -> StoreResult<usize> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("INSERT INTO list_items (key, value) VALUES (?, ?)")
            .bind(key)
            .bind(value)
            .execute(&mut *tx)
            .await?;

        let len: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM list_items WHERE key = ?")
            .bind(key)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(len as usize)
    }

    async fn list_pop(&self, key: &str, timeout: Duration) -> StoreResult<Option<String>> {
        let deadline = Instant::now() + timeout;

        loop {
            if let Some(value) = self.try_pop(key).await? {
                return Ok(Some(value));
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }

            tokio::time::sleep(POP_POLL_INTERVAL.min(deadline - now)).await;
        }
    }

    async fn list_len(&self, key: &str) -> StoreResult<usize> {
        let len: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM list_items WHERE key = ?")
            .bind(key)
            .fetch_one(&self.pool)
            .await?;

        Ok(len as usize)
    }

    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::ConnectionFailed(e.to_string()))?;
        Ok(())
    }
}
