use axum::{extract::State, Json};
use utoipa::OpenApi;

use super::{
    dto::{EventRowDto, LatestEventsDto, ReadingRowDto, StatusDto},
    errors::AppError,
    ApiState,
};
use crate::{
    control::policy::HvacAction,
    db::models::{HvacEvent, Reading},
    hub::ConnectionState,
    status::StatusSnapshot,
};

/// Liveness probe.
#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "Service is running", body = String)),
    tag = "status"
)]
pub async fn health() -> &'static str {
    "ok"
}

/// Hub connection state and pipeline counters since start.
#[utoipa::path(
    get,
    path = "/status",
    responses((status = 200, description = "Current bridge status", body = StatusDto)),
    tag = "status"
)]
pub async fn get_status(State(state): State<ApiState>) -> Json<StatusDto> {
    let connection = *state.connection.borrow();
    Json(StatusDto {
        connection,
        pipeline: state.status.snapshot().await,
    })
}

/// Most recently persisted reading and HVAC event.
#[utoipa::path(
    get,
    path = "/events/latest",
    responses(
        (status = 200, description = "Latest stored reading and event", body = LatestEventsDto),
        (status = 404, description = "Nothing recorded yet"),
        (status = 500, description = "Internal server error"),
    ),
    tag = "events"
)]
pub async fn get_latest_events(
    State(state): State<ApiState>,
) -> Result<Json<LatestEventsDto>, AppError> {
    let (reading, event) = state
        .store
        .latest()
        .await?
        .ok_or(AppError::NotFound("no events recorded yet"))?;

    Ok(Json(LatestEventsDto {
        reading: reading.into(),
        event: event.into(),
    }))
}

// ---------------------------------------------------------------------------
// OpenAPI spec struct (used in api/mod.rs and bin/generate_openapi.rs)
// ---------------------------------------------------------------------------

#[derive(OpenApi)]
#[openapi(
    paths(health, get_status, get_latest_events),
    components(schemas(
        StatusDto,
        StatusSnapshot,
        ConnectionState,
        Reading,
        HvacEvent,
        HvacAction,
        LatestEventsDto,
        ReadingRowDto,
        EventRowDto
    )),
    tags(
        (name = "status", description = "Bridge health and counters"),
        (name = "events", description = "Persisted readings and HVAC decisions"),
    ),
    info(
        title = "HVAC Bridge API",
        version = "0.1.0",
        description = "Read-only view of the sensor to HVAC bridge"
    )
)]
pub struct ApiDoc;
