pub mod dto;
pub mod errors;
pub mod handlers;

use axum::{routing::get, Router};
use tokio::sync::watch;
use utoipa::OpenApi;
use utoipa_axum::router::OpenApiRouter;

use handlers::ApiDoc;

use crate::{db::store::SqlEventStore, hub::ConnectionState, status::PipelineStatus};

#[derive(Clone)]
pub struct ApiState {
    pub store: SqlEventStore,
    pub status: PipelineStatus,
    pub connection: watch::Receiver<ConnectionState>,
}

pub fn router(state: ApiState) -> Router {
    let (router, api) = OpenApiRouter::with_openapi(ApiDoc::openapi())
        .route("/health", get(handlers::health))
        .route("/status", get(handlers::get_status))
        .route("/events/latest", get(handlers::get_latest_events))
        .with_state(state)
        .split_for_parts();

    router.route(
        "/api-docs/openapi.json",
        get(move || async move { axum::Json(api) }),
    )
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use axum_test::TestServer;
    use chrono::NaiveDate;
    use serde_json::Value;

    use super::*;
    use crate::{
        control::policy::HvacAction,
        db::{
            self,
            models::{HvacEvent, Reading},
            store::EventStore,
            Backend,
        },
    };

    async fn server() -> (TestServer, SqlEventStore, watch::Sender<ConnectionState>) {
        let pool = db::create_pool("sqlite::memory:").await.unwrap();
        db::run_migrations(&pool, Backend::Sqlite).await.unwrap();
        let store = SqlEventStore::new(pool, Backend::Sqlite);
        let (tx, rx) = watch::channel(ConnectionState::Connecting);
        let state = ApiState {
            store: store.clone(),
            status: PipelineStatus::new(),
            connection: rx,
        };
        (TestServer::new(router(state)).unwrap(), store, tx)
    }

    #[tokio::test]
    async fn health_is_ok() {
        let (server, _, _) = server().await;
        let res = server.get("/health").await;
        res.assert_status_ok();
        res.assert_text("ok");
    }

    #[tokio::test]
    async fn status_follows_connection_state() {
        let (server, _, tx) = server().await;
        let body: Value = server.get("/status").await.json();
        assert_eq!(body["connection"], "connecting");
        assert_eq!(body["pipeline"]["received"], 0);

        tx.send_replace(ConnectionState::Connected);
        let body: Value = server.get("/status").await.json();
        assert_eq!(body["connection"], "connected");
    }

    #[tokio::test]
    async fn latest_events_is_not_found_when_empty() {
        let (server, _, _) = server().await;
        let res = server.get("/events/latest").await;
        res.assert_status(StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn latest_events_returns_last_pair() {
        let (server, store, _) = server().await;
        let ts = NaiveDate::from_ymd_opt(2024, 6, 5).unwrap().and_hms_opt(10, 30, 0).unwrap();
        store
            .record(
                &Reading { timestamp: ts, temperature: 28.5 },
                &HvacEvent { timestamp: ts, event: HvacAction::NoAction },
            )
            .await
            .unwrap();

        let res = server.get("/events/latest").await;
        res.assert_status_ok();
        let body: Value = res.json();
        assert_eq!(body["reading"]["temperature"], "28.5");
        assert_eq!(body["event"]["event"], "NoAction");
    }

    #[tokio::test]
    async fn openapi_document_lists_routes() {
        let (server, _, _) = server().await;
        let body: Value = server.get("/api-docs/openapi.json").await.json();
        for path in ["/health", "/status", "/events/latest"] {
            assert!(body["paths"].get(path).is_some(), "{path} missing");
        }
    }
}
