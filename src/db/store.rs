use async_trait::async_trait;
use sqlx::{Any, AnyPool, Row, Transaction};
use thiserror::Error;
use tracing::{debug, warn};

use super::{
    models::{format_timestamp, parse_timestamp, HvacEvent, Reading, StoredEvent, StoredReading},
    Backend,
};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to open transaction: {0}")]
    Begin(#[source] sqlx::Error),
    #[error("failed to insert reading: {0}")]
    InsertReading(#[source] sqlx::Error),
    #[error("failed to insert hvac event: {0}")]
    InsertEvent(#[source] sqlx::Error),
    #[error("failed to commit transaction: {0}")]
    Commit(#[source] sqlx::Error),
    #[error("query failed: {0}")]
    Query(#[from] sqlx::Error),
    #[error("unexpected row contents: {0}")]
    InvalidRow(String),
}

/// Durable audit log of readings and the decisions taken for them.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Persist `reading` and `event` atomically: both rows or neither.
    async fn record(&self, reading: &Reading, event: &HvacEvent) -> Result<(), StoreError>;
}

struct Statements {
    insert_reading: &'static str,
    insert_event: &'static str,
}

const POSTGRES: Statements = Statements {
    insert_reading: "INSERT INTO HVAC_Temperature (timestamp, temperature) VALUES (CAST($1 AS TIMESTAMP), $2)",
    insert_event: "INSERT INTO HVAC_Events (timestamp, event) VALUES (CAST($1 AS TIMESTAMP), $2)",
};

const SQLITE: Statements = Statements {
    insert_reading: "INSERT INTO HVAC_Temperature (timestamp, temperature) VALUES (?, ?)",
    insert_event: "INSERT INTO HVAC_Events (timestamp, event) VALUES (?, ?)",
};

const LATEST_READING: &str = "SELECT id, CAST(timestamp AS TEXT) AS timestamp, temperature \
                              FROM HVAC_Temperature ORDER BY id DESC LIMIT 1";
const LATEST_EVENT: &str = "SELECT id, CAST(timestamp AS TEXT) AS timestamp, event \
                            FROM HVAC_Events ORDER BY id DESC LIMIT 1";

#[derive(Clone)]
pub struct SqlEventStore {
    pool: AnyPool,
    backend: Backend,
}

impl SqlEventStore {
    pub fn new(pool: AnyPool, backend: Backend) -> Self {
        Self { pool, backend }
    }

    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }

    fn statements(&self) -> &'static Statements {
        match self.backend {
            Backend::Postgres => &POSTGRES,
            Backend::Sqlite => &SQLITE,
        }
    }

    async fn insert_pair(
        &self,
        tx: &mut Transaction<'static, Any>,
        reading: &Reading,
        event: &HvacEvent,
    ) -> Result<(), StoreError> {
        let sql = self.statements();

        sqlx::query(sql.insert_reading)
            .bind(format_timestamp(&reading.timestamp))
            .bind(reading.temperature_text())
            .execute(&mut **tx)
            .await
            .map_err(StoreError::InsertReading)?;

        sqlx::query(sql.insert_event)
            .bind(format_timestamp(&event.timestamp))
            .bind(event.event.as_str().to_owned())
            .execute(&mut **tx)
            .await
            .map_err(StoreError::InsertEvent)?;

        Ok(())
    }

    /// Most recent reading and event rows, if any have been recorded.
    pub async fn latest(&self) -> Result<Option<(StoredReading, StoredEvent)>, StoreError> {
        let reading = sqlx::query(LATEST_READING).fetch_optional(&self.pool).await?;
        let event = sqlx::query(LATEST_EVENT).fetch_optional(&self.pool).await?;

        let (Some(reading), Some(event)) = (reading, event) else {
            return Ok(None);
        };

        let reading = StoredReading {
            id: reading.try_get("id")?,
            timestamp: timestamp_column(&reading)?,
            temperature: reading.try_get("temperature")?,
        };
        let event = StoredEvent {
            id: event.try_get("id")?,
            timestamp: timestamp_column(&event)?,
            event: event.try_get("event")?,
        };
        Ok(Some((reading, event)))
    }
}

#[async_trait]
impl EventStore for SqlEventStore {
    async fn record(&self, reading: &Reading, event: &HvacEvent) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(StoreError::Begin)?;

        // Dropping `tx` without committing rolls back and releases the
        // connection, so early returns and cancellation are covered too.
        if let Err(e) = self.insert_pair(&mut tx, reading, event).await {
            if let Err(rollback) = tx.rollback().await {
                warn!(error = %rollback, "Rollback after failed insert also failed");
            }
            return Err(e);
        }

        tx.commit().await.map_err(StoreError::Commit)?;
        debug!(
            timestamp = %reading.timestamp,
            temperature = reading.temperature,
            event = %event.event,
            "Reading and event committed"
        );
        Ok(())
    }
}

fn timestamp_column(row: &sqlx::any::AnyRow) -> Result<chrono::NaiveDateTime, StoreError> {
    let raw: String = row.try_get("timestamp")?;
    parse_timestamp(&raw).ok_or_else(|| StoreError::InvalidRow(format!("bad timestamp {raw:?}")))
}
