//! Reading records

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// A stored climate sensor reading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct SensorReading {
    /// Storage-assigned identifier
    #[serde(rename = "sensorId")]
    pub id: i64,
    /// Temperature in degrees Celsius
    pub temperature: f64,
    /// Relative humidity in percent
    pub humidity: f64,
    /// Day the reading was taken
    #[serde(rename = "sensorDateTime", deserialize_with = "calendar_date::deserialize")]
    pub recorded_date: NaiveDate,
}

/// Reading payload without an id, used for create and full-replace update.
///
/// Incoming `sensorId` fields are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewReading {
    pub temperature: f64,
    pub humidity: f64,
    #[serde(rename = "sensorDateTime", deserialize_with = "calendar_date::deserialize")]
    pub recorded_date: NaiveDate,
}

/// Dates restricted to four-digit years.
///
/// SQLite stores dates as `YYYY-MM-DD` text and orders them as text, which
/// only agrees with date order for years 0 through 9999.
pub mod calendar_date {
    use chrono::{Datelike, NaiveDate};
    use serde::de::Error;
    use serde::{Deserialize, Deserializer};

    pub const MIN_YEAR: i32 = 0;
    pub const MAX_YEAR: i32 = 9999;

    pub fn in_range(date: NaiveDate) -> bool {
        (MIN_YEAR..=MAX_YEAR).contains(&date.year())
    }

    fn check<E: Error>(date: NaiveDate) -> Result<NaiveDate, E> {
        if in_range(date) {
            Ok(date)
        } else {
            Err(E::custom(format!(
                "date {} outside years {}..={}",
                date, MIN_YEAR, MAX_YEAR
            )))
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<NaiveDate, D::Error>
    where
        D: Deserializer<'de>,
    {
        check(NaiveDate::deserialize(deserializer)?)
    }

    pub fn deserialize_option<'de, D>(deserializer: D) -> Result<Option<NaiveDate>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<NaiveDate>::deserialize(deserializer)?
            .map(check)
            .transpose()
    }
}

impl NewReading {
    pub fn new(temperature: f64, humidity: f64, recorded_date: NaiveDate) -> Self {
        Self {
            temperature,
            humidity,
            recorded_date,
        }
    }

    /// Attach a storage id
    pub fn with_id(self, id: i64) -> SensorReading {
        SensorReading {
            id,
            temperature: self.temperature,
            humidity: self.humidity,
            recorded_date: self.recorded_date,
        }
    }
}

impl From<SensorReading> for NewReading {
    fn from(reading: SensorReading) -> Self {
        Self {
            temperature: reading.temperature,
            humidity: reading.humidity,
            recorded_date: reading.recorded_date,
        }
    }
}
