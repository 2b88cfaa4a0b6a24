use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::{
    db::models::{StoredEvent, StoredReading},
    hub::ConnectionState,
    status::StatusSnapshot,
};

#[derive(Debug, Serialize, ToSchema)]
pub struct StatusDto {
    pub connection: ConnectionState,
    pub pipeline: StatusSnapshot,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ReadingRowDto {
    pub id: i64,
    /// Local time in the configured reference zone
    #[schema(value_type = String, example = "2024-06-05 10:30:00")]
    pub timestamp: NaiveDateTime,
    /// Temperature as stored, e.g. `"28.5"`
    pub temperature: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct EventRowDto {
    pub id: i64,
    #[schema(value_type = String, example = "2024-06-05 10:30:01.250")]
    pub timestamp: NaiveDateTime,
    /// One of `TurnOnAc`, `TurnOnHeater`, `NoAction`
    pub event: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct LatestEventsDto {
    pub reading: ReadingRowDto,
    pub event: EventRowDto,
}

impl From<StoredReading> for ReadingRowDto {
    fn from(r: StoredReading) -> Self {
        Self {
            id: r.id,
            timestamp: r.timestamp,
            temperature: r.temperature,
        }
    }
}

impl From<StoredEvent> for EventRowDto {
    fn from(e: StoredEvent) -> Self {
        Self {
            id: e.id,
            timestamp: e.timestamp,
            event: e.event,
        }
    }
}
