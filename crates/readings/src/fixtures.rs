//! Demo readings inserted at startup when seeding is enabled

use chrono::NaiveDate;
use storage::NewReading;

const SEED: [(f64, f64, i32, u32, u32); 4] = [
    (21.5, 45.0, 2025, 10, 15),
    (18.2, 55.0, 2025, 11, 16),
    (25.1, 60.3, 2025, 12, 17),
    (12.8, 70.0, 2025, 9, 12),
];

/// The four fixed demo readings, in insertion order
pub fn seed_readings() -> Vec<NewReading> {
    SEED.iter()
        .filter_map(|&(temperature, humidity, y, m, d)| {
            NaiveDate::from_ymd_opt(y, m, d)
                .map(|date| NewReading::new(temperature, humidity, date))
        })
        .collect()
}
