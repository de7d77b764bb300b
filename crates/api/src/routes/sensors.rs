//! Sensor Reading Routes

use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection, StringRejection},
        Path, Query, State,
    },
    http::StatusCode,
    Json,
};
use chrono::NaiveDate;
use metrics::counter;
use serde::Deserialize;
use std::sync::Arc;

use crate::error::ApiError;
use crate::live::ReadingEvent;
use crate::AppState;
use readings::{IngestedReading, NewReading, SensorReading};
use storage::calendar_date;

/// Optional date filter for the list endpoint
#[derive(Debug, Default, Deserialize)]
pub struct RangeQuery {
    /// Earliest recorded date, inclusive
    #[serde(default, deserialize_with = "calendar_date::deserialize_option")]
    pub from: Option<NaiveDate>,
    /// Latest recorded date, inclusive
    #[serde(default, deserialize_with = "calendar_date::deserialize_option")]
    pub to: Option<NaiveDate>,
}

fn record_request(route: &'static str) {
    counter!("climate_requests_total", "route" => route).increment(1);
}

fn record_write(op: &'static str) {
    counter!("climate_readings_written_total", "op" => op).increment(1);
}

/// List readings, optionally restricted to a date range
pub async fn list(
    State(state): State<Arc<AppState>>,
    query: Result<Query<RangeQuery>, QueryRejection>,
) -> Result<Json<Vec<SensorReading>>, ApiError> {
    record_request("list");
    let Query(range) = query?;

    let data = state.service.get_between(range.from, range.to).await?;
    Ok(Json(data))
}

/// Most recent readings, newest first
pub async fn latest(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<SensorReading>>, ApiError> {
    record_request("latest");
    Ok(Json(state.service.get_latest().await?))
}

pub async fn get_one(
    State(state): State<Arc<AppState>>,
    id: Result<Path<i64>, PathRejection>,
) -> Result<Json<SensorReading>, ApiError> {
    record_request("get");
    let Path(id) = id?;

    Ok(Json(state.service.get_by_id(id).await?))
}

pub async fn create(
    State(state): State<Arc<AppState>>,
    body: Result<Json<NewReading>, JsonRejection>,
) -> Result<(StatusCode, Json<SensorReading>), ApiError> {
    record_request("create");
    let Json(reading) = body?;

    let created = state.service.save(reading).await?;
    record_write("create");
    state.publish(ReadingEvent::Created {
        reading: created.clone(),
    });
    Ok((StatusCode::CREATED, Json(created)))
}

/// Full replace of a reading's values
pub async fn update(
    State(state): State<Arc<AppState>>,
    id: Result<Path<i64>, PathRejection>,
    body: Result<Json<NewReading>, JsonRejection>,
) -> Result<Json<SensorReading>, ApiError> {
    record_request("update");
    let Path(id) = id?;
    let Json(reading) = body?;

    let updated = state.service.update(id, reading).await?;
    record_write("update");
    state.publish(ReadingEvent::Updated {
        reading: updated.clone(),
    });
    Ok(Json(updated))
}

pub async fn delete(
    State(state): State<Arc<AppState>>,
    id: Result<Path<i64>, PathRejection>,
) -> Result<StatusCode, ApiError> {
    record_request("delete");
    let Path(id) = id?;

    state.service.delete(id).await?;
    record_write("delete");
    state.publish(ReadingEvent::Deleted { sensor_id: id });
    Ok(StatusCode::NO_CONTENT)
}

/// Store a reading from a raw station status line (text/plain body).
///
/// The response carries the stored reading plus the station's subsystem
/// states, `null` when the line had none.
pub async fn ingest(
    State(state): State<Arc<AppState>>,
    body: Result<String, StringRejection>,
) -> Result<(StatusCode, Json<IngestedReading>), ApiError> {
    record_request("ingest");
    let line = body?;

    let ingested = state.service.ingest_line(&line).await?;
    record_write("ingest");
    state.publish(ReadingEvent::Created {
        reading: ingested.reading.clone(),
    });
    Ok((StatusCode::CREATED, Json(ingested)))
}
