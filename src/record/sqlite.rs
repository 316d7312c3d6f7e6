use crate::record::error::{RecordError, RecordResult};
use crate::record::store::InstallRecordStore;
use crate::record::types::InstallRecord;
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::path::PathBuf;
use std::str::FromStr;

pub struct SqliteRecordStore {
    pool: SqlitePool,
}

impl SqliteRecordStore {
    /// Open (or create) the record database at `url`
    pub async fn new(url: &str) -> RecordResult<Self> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let mut pool_options = SqlitePoolOptions::new().max_connections(4);
        if url.contains(":memory:") {
            // Every connection to an in-memory database sees its own copy
            pool_options = pool_options
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
        }
        let pool = pool_options.connect_with(options).await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS install_records (
                id TEXT PRIMARY KEY,
                app_id INTEGER NOT NULL,
                name TEXT NOT NULL,
                status TEXT NOT NULL,
                bytes_downloaded INTEGER NOT NULL,
                total_bytes INTEGER NOT NULL,
                container_path TEXT NOT NULL,
                executable_path TEXT NOT NULL,
                error_message TEXT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_install_records_app ON install_records(app_id)")
            .execute(&pool)
            .await?;

        Ok(Self { pool })
    }

    /// In-memory database (for testing)
    pub async fn new_in_memory() -> RecordResult<Self> {
        Self::new("sqlite::memory:").await
    }

    pub async fn count(&self) -> RecordResult<i64> {
        let row = sqlx::query("SELECT COUNT(*) as count FROM install_records")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("count")?)
    }

    pub async fn delete(&self, id: &str) -> RecordResult<bool> {
        let result = sqlx::query("DELETE FROM install_records WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn from_row(row: &SqliteRow) -> RecordResult<InstallRecord> {
    let status: String = row.try_get("status")?;
    let container_path: String = row.try_get("container_path")?;
    let executable_path: String = row.try_get("executable_path")?;
    let app_id: i64 = row.try_get("app_id")?;

    Ok(InstallRecord {
        id: row.try_get("id")?,
        app_id: u32::try_from(app_id)
            .map_err(|_| RecordError::InvalidData(format!("app_id {app_id}")))?,
        name: row.try_get("name")?,
        status: status.parse()?,
        bytes_downloaded: row.try_get::<i64, _>("bytes_downloaded")?.max(0) as u64,
        total_bytes: row.try_get::<i64, _>("total_bytes")?.max(0) as u64,
        container_path: PathBuf::from(container_path),
        executable_path: PathBuf::from(executable_path),
        error_message: row.try_get("error_message")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[async_trait]
impl InstallRecordStore for SqliteRecordStore {
    async fn insert(&self, record: &InstallRecord) -> RecordResult<()> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO install_records
            (id, app_id, name, status, bytes_downloaded, total_bytes, container_path,
             executable_path, error_message, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.id)
        .bind(record.app_id as i64)
        .bind(&record.name)
        .bind(record.status.as_str())
        .bind(record.bytes_downloaded as i64)
        .bind(record.total_bytes as i64)
        .bind(record.container_path.to_string_lossy().into_owned())
        .bind(record.executable_path.to_string_lossy().into_owned())
        .bind(record.error_message.as_deref())
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RecordError::AlreadyExists(record.id.clone()));
        }
        Ok(())
    }

    async fn update(&self, record: &InstallRecord) -> RecordResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE install_records
            SET app_id = ?, name = ?, status = ?, bytes_downloaded = ?, total_bytes = ?,
                container_path = ?, executable_path = ?, error_message = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(record.app_id as i64)
        .bind(&record.name)
        .bind(record.status.as_str())
        .bind(record.bytes_downloaded as i64)
        .bind(record.total_bytes as i64)
        .bind(record.container_path.to_string_lossy().into_owned())
        .bind(record.executable_path.to_string_lossy().into_owned())
        .bind(record.error_message.as_deref())
        .bind(record.updated_at)
        .bind(&record.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RecordError::NotFound(record.id.clone()));
        }
        Ok(())
    }

    async fn get(&self, id: &str) -> RecordResult<Option<InstallRecord>> {
        let row = sqlx::query("SELECT * FROM install_records WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(from_row).transpose()
    }

    async fn list(&self) -> RecordResult<Vec<InstallRecord>> {
        let rows = sqlx::query("SELECT * FROM install_records ORDER BY updated_at DESC")
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(from_row).collect()
    }
}
