//! SQLite backend

use crate::{NewReading, ReadingStore, SensorReading, StorageError};
use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::sqlite::{Sqlite, SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use tracing::{debug, info};

const SQL_CREATE_TABLE: &str = "\
CREATE TABLE IF NOT EXISTS climate_sensor_data (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    temperature   REAL NOT NULL,
    humidity      REAL NOT NULL,
    recorded_date TEXT NOT NULL
)";

const SQL_CREATE_INDEX: &str = "\
CREATE INDEX IF NOT EXISTS idx_climate_sensor_data_recorded_date
    ON climate_sensor_data (recorded_date)";

const SQL_INSERT: &str =
    "INSERT INTO climate_sensor_data (temperature, humidity, recorded_date) VALUES (?1, ?2, ?3)";

const SQL_SELECT_BY_ID: &str =
    "SELECT id, temperature, humidity, recorded_date FROM climate_sensor_data WHERE id = ?1";

const SQL_SELECT_ALL: &str =
    "SELECT id, temperature, humidity, recorded_date FROM climate_sensor_data ORDER BY id";

const SQL_SELECT_BETWEEN: &str = "\
SELECT id, temperature, humidity, recorded_date FROM climate_sensor_data
WHERE (?1 IS NULL OR recorded_date >= ?1) AND (?2 IS NULL OR recorded_date <= ?2)
ORDER BY id";

const SQL_SELECT_MOST_RECENT: &str = "\
SELECT id, temperature, humidity, recorded_date FROM climate_sensor_data
ORDER BY recorded_date DESC, id DESC
LIMIT ?1";

const SQL_UPDATE: &str = "\
UPDATE climate_sensor_data SET temperature = ?1, humidity = ?2, recorded_date = ?3
WHERE id = ?4";

const SQL_DELETE: &str = "DELETE FROM climate_sensor_data WHERE id = ?1";

const SQL_COUNT: &str = "SELECT COUNT(*) FROM climate_sensor_data";

/// Reading store backed by a SQLite connection pool
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if missing) the database at `url` and bootstrap the schema.
    ///
    /// In-memory URLs keep their connections alive for the life of the pool,
    /// since each SQLite memory connection is a separate database.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);

        let mut pool_options = SqlitePoolOptions::new().max_connections(max_connections.max(1));
        if url.contains(":memory:") {
            pool_options = pool_options
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
        }

        let pool = pool_options.connect_with(options).await?;
        let store = Self { pool };
        store.migrate().await?;

        info!("Connected to SQLite database at {}", url);
        Ok(store)
    }

    async fn migrate(&self) -> Result<(), StorageError> {
        sqlx::query(SQL_CREATE_TABLE).execute(&self.pool).await?;
        sqlx::query(SQL_CREATE_INDEX).execute(&self.pool).await?;
        Ok(())
    }

    /// Close every pooled connection
    pub async fn close(&self) {
        self.pool.close().await;
        info!("SQLite pool closed");
    }
}

async fn insert_row<'e, E>(executor: E, reading: NewReading) -> Result<SensorReading, StorageError>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let id = sqlx::query(SQL_INSERT)
        .bind(reading.temperature)
        .bind(reading.humidity)
        .bind(reading.recorded_date)
        .execute(executor)
        .await?
        .last_insert_rowid();

    Ok(reading.with_id(id))
}

#[async_trait]
impl ReadingStore for SqliteStore {
    async fn insert(&self, reading: NewReading) -> Result<SensorReading, StorageError> {
        let record = insert_row(&self.pool, reading).await?;
        debug!("Inserted reading with ID {}", record.id);
        Ok(record)
    }

    async fn insert_many(
        &self,
        readings: Vec<NewReading>,
    ) -> Result<Vec<SensorReading>, StorageError> {
        let mut tx = self.pool.begin().await?;
        let mut records = Vec::with_capacity(readings.len());

        for reading in readings {
            records.push(insert_row(&mut *tx, reading).await?);
        }

        tx.commit().await?;
        debug!("Inserted {} readings", records.len());
        Ok(records)
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<SensorReading>, StorageError> {
        let record = sqlx::query_as::<_, SensorReading>(SQL_SELECT_BY_ID)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(record)
    }

    async fn find_all(&self) -> Result<Vec<SensorReading>, StorageError> {
        let records = sqlx::query_as::<_, SensorReading>(SQL_SELECT_ALL)
            .fetch_all(&self.pool)
            .await?;
        Ok(records)
    }

    async fn find_between(
        &self,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Result<Vec<SensorReading>, StorageError> {
        let records = sqlx::query_as::<_, SensorReading>(SQL_SELECT_BETWEEN)
            .bind(from)
            .bind(to)
            .fetch_all(&self.pool)
            .await?;
        Ok(records)
    }

    async fn find_most_recent(&self, limit: usize) -> Result<Vec<SensorReading>, StorageError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let records = sqlx::query_as::<_, SensorReading>(SQL_SELECT_MOST_RECENT)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(records)
    }

    async fn update(
        &self,
        id: i64,
        reading: NewReading,
    ) -> Result<Option<SensorReading>, StorageError> {
        let affected = sqlx::query(SQL_UPDATE)
            .bind(reading.temperature)
            .bind(reading.humidity)
            .bind(reading.recorded_date)
            .bind(id)
            .execute(&self.pool)
            .await?
            .rows_affected();

        if affected == 0 {
            return Ok(None);
        }
        debug!("Updated reading with ID {}", id);
        Ok(Some(reading.with_id(id)))
    }

    async fn delete(&self, id: i64) -> Result<bool, StorageError> {
        let affected = sqlx::query(SQL_DELETE)
            .bind(id)
            .execute(&self.pool)
            .await?
            .rows_affected();

        if affected > 0 {
            debug!("Deleted reading with ID {}", id);
        }
        Ok(affected > 0)
    }

    async fn count(&self) -> Result<usize, StorageError> {
        let count: i64 = sqlx::query_scalar(SQL_COUNT).fetch_one(&self.pool).await?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    async fn ping(&self) -> Result<(), StorageError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
