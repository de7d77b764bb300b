//! Reading Service
//!
//! Mediates between the HTTP layer and the storage gateway. Apart from
//! the latest-readings query and station line ingest, every operation is a
//! pass-through that turns a missing record into [`ServiceError::NotFound`].

pub mod fixtures;
mod station;

pub use station::{StationLine, StationLineError, StationStatus, SwitchState};
pub use storage::{NewReading, SensorReading, StorageError};

use chrono::NaiveDate;
use serde::Serialize;
use std::sync::Arc;
use storage::ReadingStore;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Number of readings returned by [`ReadingService::get_latest`]
pub const LATEST_LIMIT: usize = 10;

/// Reading service errors
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Reading {0} not found")]
    NotFound(i64),

    #[error("Invalid date range: {from} is after {to}")]
    InvalidRange { from: NaiveDate, to: NaiveDate },

    #[error("Invalid station line: {0}")]
    Station(#[from] StationLineError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// A reading stored from a station line, with the subsystem states the
/// line reported alongside it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestedReading {
    #[serde(flatten)]
    pub reading: SensorReading,
    #[serde(rename = "stationStatus")]
    pub status: Option<StationStatus>,
}

/// Stateless service over a shared reading store
#[derive(Clone)]
pub struct ReadingService {
    store: Arc<dyn ReadingStore>,
}

impl ReadingService {
    pub fn new(store: Arc<dyn ReadingStore>) -> Self {
        Self { store }
    }

    /// All readings in storage order
    pub async fn get_all(&self) -> Result<Vec<SensorReading>, ServiceError> {
        Ok(self.store.find_all().await?)
    }

    /// Readings inside an inclusive date range; open bounds are unrestricted
    pub async fn get_between(
        &self,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Result<Vec<SensorReading>, ServiceError> {
        match (from, to) {
            (None, None) => self.get_all().await,
            (Some(from), Some(to)) if from > to => Err(ServiceError::InvalidRange { from, to }),
            _ => Ok(self.store.find_between(from, to).await?),
        }
    }

    pub async fn get_by_id(&self, id: i64) -> Result<SensorReading, ServiceError> {
        self.store
            .find_by_id(id)
            .await?
            .ok_or(ServiceError::NotFound(id))
    }

    /// The [`LATEST_LIMIT`] most recent readings, newest first
    pub async fn get_latest(&self) -> Result<Vec<SensorReading>, ServiceError> {
        Ok(self.store.find_most_recent(LATEST_LIMIT).await?)
    }

    pub async fn save(&self, reading: NewReading) -> Result<SensorReading, ServiceError> {
        let created = self.store.insert(reading).await?;
        debug!("Saved reading {}", created.id);
        Ok(created)
    }

    pub async fn save_all(
        &self,
        readings: Vec<NewReading>,
    ) -> Result<Vec<SensorReading>, ServiceError> {
        let created = self.store.insert_many(readings).await?;
        info!("Saved batch of {} readings", created.len());
        Ok(created)
    }

    /// Full replace of an existing reading's values
    pub async fn update(
        &self,
        id: i64,
        reading: NewReading,
    ) -> Result<SensorReading, ServiceError> {
        self.store
            .update(id, reading)
            .await?
            .ok_or(ServiceError::NotFound(id))
    }

    pub async fn delete(&self, id: i64) -> Result<(), ServiceError> {
        if self.store.delete(id).await? {
            Ok(())
        } else {
            Err(ServiceError::NotFound(id))
        }
    }

    /// Parse a station status line and store its reading
    pub async fn ingest_line(&self, line: &str) -> Result<IngestedReading, ServiceError> {
        let parsed = StationLine::parse(line).map_err(|e| {
            warn!("Rejected station line: {}", e);
            e
        })?;

        let reading = self.save(parsed.to_reading()).await?;
        debug!("Station status for reading {}: {:?}", reading.id, parsed.status);
        Ok(IngestedReading {
            reading,
            status: parsed.status,
        })
    }

    pub async fn count(&self) -> Result<usize, ServiceError> {
        Ok(self.store.count().await?)
    }

    /// Check that storage is reachable
    pub async fn ping(&self) -> Result<(), ServiceError> {
        Ok(self.store.ping().await?)
    }
}
