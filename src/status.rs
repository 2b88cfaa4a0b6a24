use std::sync::Arc;

use serde::Serialize;
use tokio::sync::RwLock;
use utoipa::ToSchema;

use crate::{
    db::models::{HvacEvent, Reading},
    sensors::service::{DispatchOutcome, Outcome},
};

/// Counters and latest values of the reading pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, ToSchema)]
pub struct StatusSnapshot {
    /// Hub sessions opened since start
    pub sessions: u64,
    pub transport_errors: u64,
    pub last_transport_error: Option<String>,
    /// Messages handed to the pipeline, valid or not
    pub received: u64,
    /// Messages dropped by validation
    pub dropped: u64,
    /// Messages aborted by an unexpected failure
    pub failed: u64,
    pub dispatched: u64,
    pub dispatch_failures: u64,
    pub persisted: u64,
    pub persist_failures: u64,
    pub last_reading: Option<Reading>,
    pub last_event: Option<HvacEvent>,
}

/// Shared, cheaply clonable handle on the pipeline counters.
///
/// Writers are the hub task only; the status API reads snapshots.
#[derive(Clone, Default)]
pub struct PipelineStatus {
    inner: Arc<RwLock<StatusSnapshot>>,
}

impl PipelineStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn snapshot(&self) -> StatusSnapshot {
        self.inner.read().await.clone()
    }

    pub async fn record_session(&self) {
        self.inner.write().await.sessions += 1;
    }

    pub async fn record_transport_error(&self, error: String) {
        let mut s = self.inner.write().await;
        s.transport_errors += 1;
        s.last_transport_error = Some(error);
    }

    pub async fn record_outcome(&self, outcome: &Outcome) {
        let mut s = self.inner.write().await;
        s.received += 1;
        match outcome.dispatch {
            DispatchOutcome::Skipped => {}
            DispatchOutcome::Sent(_) => s.dispatched += 1,
            DispatchOutcome::Failed(_) => s.dispatch_failures += 1,
        }
        if outcome.stored {
            s.persisted += 1;
        } else {
            s.persist_failures += 1;
        }
        s.last_reading = Some(outcome.reading.clone());
        s.last_event = Some(outcome.event.clone());
    }

    pub async fn record_dropped(&self) {
        let mut s = self.inner.write().await;
        s.received += 1;
        s.dropped += 1;
    }

    pub async fn record_failed(&self) {
        let mut s = self.inner.write().await;
        s.received += 1;
        s.failed += 1;
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use serde_json::json;

    use super::*;
    use crate::control::policy::HvacAction;

    fn outcome(dispatch: DispatchOutcome, stored: bool) -> Outcome {
        let timestamp = NaiveDate::from_ymd_opt(2024, 6, 5).unwrap().and_hms_opt(10, 30, 0).unwrap();
        Outcome {
            reading: Reading { timestamp, temperature: 31.0 },
            event: HvacEvent { timestamp, event: HvacAction::TurnOnAc },
            dispatch,
            stored,
        }
    }

    #[tokio::test]
    async fn empty_status_is_all_zero() {
        let status = PipelineStatus::new();
        assert_eq!(status.snapshot().await, StatusSnapshot::default());
    }

    #[tokio::test]
    async fn outcomes_update_counters_and_latest_values() {
        let status = PipelineStatus::new();
        status.record_outcome(&outcome(DispatchOutcome::Sent(json!({})), true)).await;
        status.record_outcome(&outcome(DispatchOutcome::Failed("down".into()), false)).await;
        status.record_dropped().await;
        status.record_failed().await;

        let s = status.snapshot().await;
        assert_eq!(s.received, 4);
        assert_eq!(s.dispatched, 1);
        assert_eq!(s.dispatch_failures, 1);
        assert_eq!(s.persisted, 1);
        assert_eq!(s.persist_failures, 1);
        assert_eq!(s.dropped, 1);
        assert_eq!(s.failed, 1);
        assert_eq!(s.last_event.unwrap().event, HvacAction::TurnOnAc);
    }

    #[tokio::test]
    async fn clone_shares_state() {
        let status = PipelineStatus::new();
        let clone = status.clone();
        status.record_session().await;
        clone.record_transport_error("refused".into()).await;

        let s = status.snapshot().await;
        assert_eq!(s.sessions, 1);
        assert_eq!(s.transport_errors, 1);
        assert_eq!(s.last_transport_error.as_deref(), Some("refused"));
    }
}
