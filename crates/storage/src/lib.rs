//! Storage Layer
//!
//! Persists climate sensor readings behind the [`ReadingStore`] trait.
//! Two backends are provided: [`SqliteStore`] for durable storage and
//! [`MemoryStore`] for tests and throwaway deployments.

mod record;
mod repository;
mod sqlite;

pub use record::{calendar_date, NewReading, SensorReading};
pub use repository::MemoryStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use chrono::NaiveDate;
use thiserror::Error;

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage unavailable: {0}")]
    Unavailable(String),
    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                StorageError::Corrupt(err.to_string())
            }
            other => StorageError::Unavailable(other.to_string()),
        }
    }
}

/// Data access contract for sensor readings.
///
/// Every call is atomic on its own; no transaction scope spans calls.
#[async_trait]
pub trait ReadingStore: Send + Sync {
    /// Persist a reading and return it with its newly assigned id
    async fn insert(&self, reading: NewReading) -> Result<SensorReading, StorageError>;

    /// Persist a batch of readings, ids assigned in input order
    async fn insert_many(
        &self,
        readings: Vec<NewReading>,
    ) -> Result<Vec<SensorReading>, StorageError>;

    async fn find_by_id(&self, id: i64) -> Result<Option<SensorReading>, StorageError>;

    /// All readings in id order
    async fn find_all(&self) -> Result<Vec<SensorReading>, StorageError>;

    /// Readings whose date falls inside the inclusive bounds, in id order.
    /// A missing bound is open.
    async fn find_between(
        &self,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Result<Vec<SensorReading>, StorageError>;

    /// Up to `limit` readings, newest date first. Readings sharing a date
    /// come newest insertion first.
    async fn find_most_recent(&self, limit: usize) -> Result<Vec<SensorReading>, StorageError>;

    /// Replace all fields of an existing reading. `None` if the id is unknown.
    async fn update(
        &self,
        id: i64,
        reading: NewReading,
    ) -> Result<Option<SensorReading>, StorageError>;

    /// Hard delete. Returns `false` if the id is unknown.
    async fn delete(&self, id: i64) -> Result<bool, StorageError>;

    async fn count(&self) -> Result<usize, StorageError>;

    /// Check that the backend is reachable
    async fn ping(&self) -> Result<(), StorageError>;
}
