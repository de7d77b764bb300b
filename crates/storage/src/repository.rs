//! In-memory Repository Implementation

use crate::{NewReading, ReadingStore, SensorReading, StorageError};
use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

struct Table {
    rows: BTreeMap<i64, SensorReading>,
    /// Next id to hand out; ids are never reused after delete
    next_id: i64,
}

/// Reading store held entirely in memory
pub struct MemoryStore {
    table: Mutex<Table>,
}

impl MemoryStore {
    /// Create an empty in-memory store
    pub fn new() -> Self {
        info!("Creating in-memory reading store");
        Self {
            table: Mutex::new(Table {
                rows: BTreeMap::new(),
                next_id: 1,
            }),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Table>, StorageError> {
        self.table
            .lock()
            .map_err(|e| StorageError::Unavailable(format!("Lock error: {}", e)))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Table {
    fn insert(&mut self, reading: NewReading) -> SensorReading {
        let record = reading.with_id(self.next_id);
        self.next_id += 1;
        self.rows.insert(record.id, record.clone());
        record
    }
}

#[async_trait]
impl ReadingStore for MemoryStore {
    async fn insert(&self, reading: NewReading) -> Result<SensorReading, StorageError> {
        let record = self.lock()?.insert(reading);
        debug!("Inserted reading with ID {}", record.id);
        Ok(record)
    }

    async fn insert_many(
        &self,
        readings: Vec<NewReading>,
    ) -> Result<Vec<SensorReading>, StorageError> {
        let mut table = self.lock()?;
        let records: Vec<_> = readings.into_iter().map(|r| table.insert(r)).collect();
        debug!("Inserted {} readings", records.len());
        Ok(records)
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<SensorReading>, StorageError> {
        Ok(self.lock()?.rows.get(&id).cloned())
    }

    async fn find_all(&self) -> Result<Vec<SensorReading>, StorageError> {
        Ok(self.lock()?.rows.values().cloned().collect())
    }

    async fn find_between(
        &self,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Result<Vec<SensorReading>, StorageError> {
        let table = self.lock()?;

        Ok(table
            .rows
            .values()
            .filter(|r| from.map_or(true, |f| r.recorded_date >= f))
            .filter(|r| to.map_or(true, |t| r.recorded_date <= t))
            .cloned()
            .collect())
    }

    async fn find_most_recent(&self, limit: usize) -> Result<Vec<SensorReading>, StorageError> {
        let mut records: Vec<_> = self.lock()?.rows.values().cloned().collect();

        records.sort_by(|a, b| {
            b.recorded_date
                .cmp(&a.recorded_date)
                .then(b.id.cmp(&a.id))
        });
        records.truncate(limit);
        Ok(records)
    }

    async fn update(
        &self,
        id: i64,
        reading: NewReading,
    ) -> Result<Option<SensorReading>, StorageError> {
        let mut table = self.lock()?;

        match table.rows.get_mut(&id) {
            Some(existing) => {
                *existing = reading.with_id(id);
                debug!("Updated reading with ID {}", id);
                Ok(Some(existing.clone()))
            }
            None => Ok(None),
        }
    }

    async fn delete(&self, id: i64) -> Result<bool, StorageError> {
        let removed = self.lock()?.rows.remove(&id).is_some();
        if removed {
            debug!("Deleted reading with ID {}", id);
        }
        Ok(removed)
    }

    async fn count(&self) -> Result<usize, StorageError> {
        Ok(self.lock()?.rows.len())
    }

    async fn ping(&self) -> Result<(), StorageError> {
        self.lock().map(|_| ())
    }
}
