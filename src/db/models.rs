use chrono::{NaiveDateTime, SubsecRound, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::control::policy::HvacAction;

/// Text layout used for every timestamp written to the database.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// A single sensor observation, already normalized into the reference zone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Reading {
    /// Naive local time in the reference timezone
    #[schema(value_type = String, example = "2024-06-05 10:30:00")]
    pub timestamp: NaiveDateTime,
    /// Degrees Celsius, always finite
    pub temperature: f64,
}

impl Reading {
    /// Text stored in `HVAC_Temperature.temperature`.
    pub fn temperature_text(&self) -> String {
        self.temperature.to_string()
    }
}

/// The decision taken for one `Reading`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct HvacEvent {
    /// Decision time in the reference timezone (not the reading's timestamp)
    #[schema(value_type = String, example = "2024-06-05 10:30:01.250")]
    pub timestamp: NaiveDateTime,
    pub event: HvacAction,
}

impl HvacEvent {
    /// Stamp `event` with the current wall-clock time in `tz`, truncated to
    /// the microsecond precision of a SQL `TIMESTAMP`.
    pub fn now(event: HvacAction, tz: Tz) -> Self {
        Self {
            timestamp: Utc::now().with_timezone(&tz).naive_local().trunc_subsecs(6),
            event,
        }
    }
}

/// Row of `HVAC_Temperature`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredReading {
    pub id: i64,
    pub timestamp: NaiveDateTime,
    pub temperature: String,
}

/// Row of `HVAC_Events`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEvent {
    pub id: i64,
    pub timestamp: NaiveDateTime,
    pub event: String,
}

pub(crate) fn format_timestamp(ts: &NaiveDateTime) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

pub(crate) fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(raw.trim(), TIMESTAMP_FORMAT).ok()
}
