//! Field station status line parsing
//!
//! The climate station prints one line per sample:
//!
//! ```text
//! date = Tue Oct 14 09:30:00 2025 temperature = 21.5 humidity = 45.0 heater state = OFF power 48V state = ON power LCU state = ON lightning state = N.A.
//! ```
//!
//! The status section after the humidity value is optional.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use storage::{calendar_date, NewReading};
use thiserror::Error;

const DATE_FORMAT: &str = "%a %b %d %H:%M:%S %Y";

const DATE_KEY: &str = "date = ";
const TEMPERATURE_KEY: &str = " temperature = ";
const HUMIDITY_KEY: &str = " humidity = ";
const HEATER_KEY: &str = "heater state = ";
const POWER_48V_KEY: &str = "power 48V state = ";
const POWER_LCU_KEY: &str = "power LCU state = ";
const LIGHTNING_KEY: &str = "lightning state = ";

/// Errors while parsing a station line
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StationLineError {
    #[error("Missing field: {0}")]
    MissingField(&'static str),

    #[error("Invalid number for {field}: {value:?}")]
    InvalidNumber { field: &'static str, value: String },

    #[error("Invalid date: {0:?}")]
    InvalidDate(String),

    #[error("Invalid state for {field}: {value:?}")]
    InvalidState { field: &'static str, value: String },
}

/// On/off state of a station subsystem
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SwitchState {
    On,
    Off,
    NotAvailable,
}

impl SwitchState {
    fn parse(field: &'static str, token: &str) -> Result<Self, StationLineError> {
        match token {
            "ON" => Ok(SwitchState::On),
            "OFF" => Ok(SwitchState::Off),
            "N.A." | "N.A" => Ok(SwitchState::NotAvailable),
            other => Err(StationLineError::InvalidState {
                field,
                value: other.to_string(),
            }),
        }
    }
}

/// Subsystem states reported after the climate values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StationStatus {
    pub heater: SwitchState,
    pub power_48v: SwitchState,
    pub power_lcu: SwitchState,
    pub lightning: SwitchState,
}

/// One parsed station line
#[derive(Debug, Clone, PartialEq)]
pub struct StationLine {
    pub recorded_at: NaiveDateTime,
    pub temperature: f64,
    pub humidity: f64,
    pub status: Option<StationStatus>,
}

impl StationLine {
    /// Parse a raw station line
    pub fn parse(line: &str) -> Result<Self, StationLineError> {
        let line = line.trim();

        let rest = line
            .strip_prefix(DATE_KEY)
            .ok_or(StationLineError::MissingField("date"))?;
        let (date, rest) = rest
            .split_once(TEMPERATURE_KEY)
            .ok_or(StationLineError::MissingField("temperature"))?;
        let (temperature, rest) = rest
            .split_once(HUMIDITY_KEY)
            .ok_or(StationLineError::MissingField("humidity"))?;

        let mut tail = rest.splitn(2, ' ');
        let humidity = tail.next().unwrap_or_default();
        let status = tail.next().map(str::trim).filter(|s| !s.is_empty());

        let recorded_at = NaiveDateTime::parse_from_str(date.trim(), DATE_FORMAT)
            .ok()
            .filter(|at| calendar_date::in_range(at.date()))
            .ok_or_else(|| StationLineError::InvalidDate(date.to_string()))?;

        Ok(Self {
            recorded_at,
            temperature: parse_number("temperature", temperature)?,
            humidity: parse_number("humidity", humidity)?,
            status: status.map(parse_status).transpose()?,
        })
    }

    /// Reading to store; only the calendar date is kept
    pub fn to_reading(&self) -> NewReading {
        NewReading::new(self.temperature, self.humidity, self.recorded_at.date())
    }
}

fn parse_number(field: &'static str, value: &str) -> Result<f64, StationLineError> {
    value
        .trim()
        .parse()
        .map_err(|_| StationLineError::InvalidNumber {
            field,
            value: value.to_string(),
        })
}

fn parse_status(section: &str) -> Result<StationStatus, StationLineError> {
    Ok(StationStatus {
        heater: state_after(section, "heater", HEATER_KEY)?,
        power_48v: state_after(section, "power 48V", POWER_48V_KEY)?,
        power_lcu: state_after(section, "power LCU", POWER_LCU_KEY)?,
        lightning: state_after(section, "lightning", LIGHTNING_KEY)?,
    })
}

fn state_after(
    section: &str,
    field: &'static str,
    key: &str,
) -> Result<SwitchState, StationLineError> {
    let (_, after) = section
        .split_once(key)
        .ok_or(StationLineError::MissingField(field))?;
    let token = after.split_whitespace().next().unwrap_or_default();
    SwitchState::parse(field, token)
}
