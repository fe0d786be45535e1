use async_trait::async_trait;
use futures::future::BoxFuture;
use log::{debug, info, warn};
use shared::TrackingStatus;
use sqlx::{Connection, PgConnection};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use uuid::Uuid;

const CREATE_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS service_tracker (
        id VARCHAR(64) PRIMARY KEY,
        file_name VARCHAR(255),
        file_extension VARCHAR(255),
        task VARCHAR(255),
        status VARCHAR(255)
    )
"#;

const INSERT_RECORD: &str = r#"
    INSERT INTO service_tracker (id, file_name, file_extension, task, status)
    VALUES ($1, $2, $3, $4, $5)
"#;

#[derive(Debug, thiserror::Error)]
pub enum TrackingError {
    #[error("Error connecting to the database: {0}")]
    Connection(#[source] sqlx::Error),
    #[error("Database statement failed: {0}")]
    Statement(#[source] sqlx::Error),
    #[error("Database did not respond within {0:?}")]
    Timeout(Duration),
}

/// One row of the append-only request log.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackingRecord {
    pub id: String,
    pub file_name: String,
    pub file_extension: String,
    pub task: String,
    pub status: TrackingStatus,
}

impl TrackingRecord {
    pub fn new(id: Uuid, file_name: &str, task: &str, status: TrackingStatus) -> Self {
        Self {
            id: id.simple().to_string(),
            file_name: file_name.to_string(),
            file_extension: file_extension(file_name).to_string(),
            task: task.to_string(),
            status,
        }
    }
}

/// Extension without the leading dot, empty when the name has none.
pub fn file_extension(file_name: &str) -> &str {
    Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or("")
}

#[async_trait]
pub trait TrackingStore: Send + Sync {
    /// Creates the tracking table if it does not exist yet.
    async fn ensure_schema(&self) -> Result<(), TrackingError>;

    async fn record(&self, record: &TrackingRecord) -> Result<(), TrackingError>;

    /// Opens a connection and closes it again.
    async fn ping(&self) -> Result<(), TrackingError>;
}

/// Postgres-backed tracker. Every call opens its own connection and closes it
/// before returning; nothing is kept between requests.
pub struct PgTrackingRepository {
    database_url: String,
    timeout: Duration,
    schema_ready: AtomicBool,
}

impl PgTrackingRepository {
    pub fn new(database_url: String, timeout: Duration) -> Self {
        Self {
            database_url,
            timeout,
            schema_ready: AtomicBool::new(false),
        }
    }

    async fn with_connection<T, F>(&self, operation: F) -> Result<T, TrackingError>
    where
        T: Send,
        F: for<'c> FnOnce(&'c mut PgConnection) -> BoxFuture<'c, Result<T, sqlx::Error>> + Send,
    {
        let scoped = async {
            let mut conn = PgConnection::connect(&self.database_url)
                .await
                .map_err(TrackingError::Connection)?;
            let result = operation(&mut conn).await;
            if let Err(e) = conn.close().await {
                warn!("Failed to close tracking connection cleanly: {}", e);
            }
            result.map_err(TrackingError::Statement)
        };

        tokio::time::timeout(self.timeout, scoped)
            .await
            .map_err(|_| TrackingError::Timeout(self.timeout))?
    }
}

#[async_trait]
impl TrackingStore for PgTrackingRepository {
    async fn ensure_schema(&self) -> Result<(), TrackingError> {
        self.with_connection(|conn| {
            Box::pin(async move { sqlx::query(CREATE_TABLE).execute(conn).await.map(|_| ()) })
        })
        .await?;
        self.schema_ready.store(true, Ordering::Release);
        info!("Tracking table service_tracker is ready");
        Ok(())
    }

    async fn record(&self, record: &TrackingRecord) -> Result<(), TrackingError> {
        // Startup migration may have failed while the database was down.
        if !self.schema_ready.load(Ordering::Acquire) {
            self.ensure_schema().await?;
        }

        let row = record.clone();
        self.with_connection(move |conn| {
            Box::pin(async move {
                let mut tx = conn.begin().await?;
                sqlx::query(INSERT_RECORD)
                    .bind(&row.id)
                    .bind(&row.file_name)
                    .bind(&row.file_extension)
                    .bind(&row.task)
                    .bind(row.status.as_ref())
                    .execute(&mut *tx)
                    .await?;
                tx.commit().await
            })
        })
        .await?;

        debug!(
            "Tracked request {} ({}) as {}",
            record.id, record.task, record.status
        );
        Ok(())
    }

    async fn ping(&self) -> Result<(), TrackingError> {
        let scoped = async {
            let conn = PgConnection::connect(&self.database_url)
                .await
                .map_err(TrackingError::Connection)?;
            conn.close().await.map_err(TrackingError::Connection)
        };
        tokio::time::timeout(self.timeout, scoped)
            .await
            .map_err(|_| TrackingError::Timeout(self.timeout))?
    }
}
