//! SQLite host database
//!
//! Reads host records from the `hosts` table and keeps the latest snapshot of
//! every host in `host_snapshots`.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Pool, Row, Sqlite};
use tracing::{debug, info, instrument};

use super::error::{CacheError, CacheResult};
use super::source::{HostRecord, HostSnapshot, HostSource, SnapshotSink};

pub struct SqliteHostSource {
    pool: Pool<Sqlite>,
}

impl SqliteHostSource {
    #[instrument(skip_all)]
    pub async fn new(db_path: impl AsRef<Path>) -> CacheResult<Self> {
        let db_path = db_path.as_ref().to_string_lossy().to_string();
        info!("opening host database at: {}", db_path);

        let options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| CacheError::ConnectionFailed(e.to_string()))?;

        debug!("running host database migrations");
        sqlx::migrate!("./migrations/cmdb").run(&pool).await?;

        Ok(Self { pool })
    }

    /// Insert or replace a host record
    pub async fn upsert_host(&self, host: &HostRecord) -> CacheResult<()> {
        sqlx::query(
            r#"
            INSERT INTO hosts (host_id, cloud_id, inner_ip, outer_ip, host_name, os_type)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(host_id) DO UPDATE SET
                cloud_id = excluded.cloud_id,
                inner_ip = excluded.inner_ip,
                outer_ip = excluded.outer_ip,
                host_name = excluded.host_name,
                os_type = excluded.os_type
            "#,
        )
        .bind(host.host_id)
        .bind(host.cloud_id)
        .bind(&host.inner_ip)
        .bind(&host.outer_ip)
        .bind(&host.host_name)
        .bind(&host.os_type)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Raw JSON payload of the latest snapshot of a host
    pub async fn snapshot_payload(&self, host_id: i64) -> CacheResult<Option<String>> {
        let row = sqlx::query("SELECT payload FROM host_snapshots WHERE host_id = ?")
            .bind(host_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|row| row.get::<String, _>("payload")))
    }

    fn row_to_host(row: &SqliteRow) -> HostRecord {
        HostRecord {
            host_id: row.get("host_id"),
            cloud_id: row.get("cloud_id"),
            inner_ip: row.get("inner_ip"),
            outer_ip: row.get("outer_ip"),
            host_name: row.get("host_name"),
            os_type: row.get("os_type"),
        }
    }
}

#[async_trait]
impl HostSource for SqliteHostSource {
    async fn list_hosts(&self) -> CacheResult<Vec<HostRecord>> {
        let rows = sqlx::query(
            "SELECT host_id, cloud_id, inner_ip, outer_ip, host_name, os_type FROM hosts",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(Self::row_to_host).collect())
    }

    async fn find_host(&self, cloud_id: i64, inner_ip: &str) -> CacheResult<Option<HostRecord>> {
        let row = sqlx::query(
            r#"
            SELECT host_id, cloud_id, inner_ip, outer_ip, host_name, os_type
            FROM hosts
            WHERE cloud_id = ? AND inner_ip = ?
            LIMIT 1
            "#,
        )
        .bind(cloud_id)
        .bind(inner_ip)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(Self::row_to_host))
    }
}

#[async_trait]
impl SnapshotSink for SqliteHostSource {
    async fn upsert_snapshot(&self, snapshot: &HostSnapshot) -> CacheResult<()> {
        sqlx::query(
            r#"
            INSERT INTO host_snapshots (host_id, cloud_id, inner_ip, payload, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(host_id) DO UPDATE SET
                cloud_id = excluded.cloud_id,
                inner_ip = excluded.inner_ip,
                payload = excluded.payload,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(snapshot.host_id)
        .bind(snapshot.cloud_id)
        .bind(&snapshot.inner_ip)
        .bind(snapshot.payload.to_string())
        .bind(snapshot.updated_at.timestamp_millis())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
