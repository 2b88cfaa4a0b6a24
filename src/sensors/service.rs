use std::{any::Any, panic::AssertUnwindSafe, sync::Arc};

use async_trait::async_trait;
use chrono_tz::Tz;
use futures::FutureExt;
use serde_json::Value;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::reading::{parse_reading, ValidationError};
use crate::{
    config::Config,
    control::{hvac::HvacControl, policy::Thresholds},
    db::{
        models::{HvacEvent, Reading},
        store::EventStore,
    },
    hub::{HubHandler, TransportError},
    status::PipelineStatus,
};

/// What happened to the HVAC command of one reading.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    /// The decision was `NoAction`.
    Skipped,
    /// Response payload of the HVAC service.
    Sent(Value),
    Failed(String),
}

/// Result of running one valid message through the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    pub reading: Reading,
    pub event: HvacEvent,
    pub dispatch: DispatchOutcome,
    /// Whether the reading/event pair was committed.
    pub stored: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct PipelineSettings {
    pub thresholds: Thresholds,
    pub ticks: u32,
    pub timezone: Tz,
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            thresholds: config.thresholds,
            ticks: config.ticks,
            timezone: config.timezone,
        }
    }
}

/// Per-message handler of the sensor hub subscription: decide, dispatch,
/// then record.
pub struct SensorPipeline {
    settings: PipelineSettings,
    hvac: Arc<dyn HvacControl>,
    store: Arc<dyn EventStore>,
    status: PipelineStatus,
}

impl SensorPipeline {
    pub fn new(
        settings: PipelineSettings,
        hvac: Arc<dyn HvacControl>,
        store: Arc<dyn EventStore>,
        status: PipelineStatus,
    ) -> Self {
        Self { settings, hvac, store, status }
    }

    /// Runs one hub invocation through the pipeline.
    ///
    /// Only malformed input is returned as an error. Dispatch and persistence
    /// failures are logged and reported in the `Outcome`; the reading is
    /// recorded even when the HVAC service could not be reached.
    pub async fn process(&self, arguments: &[Value]) -> Result<Outcome, ValidationError> {
        let reading = parse_reading(arguments, self.settings.timezone)?;
        let action = self.settings.thresholds.decide(reading.temperature);
        info!(
            timestamp = %reading.timestamp,
            temperature = reading.temperature,
            action = %action,
            "Sensor reading received"
        );

        let dispatch = match action.command() {
            None => DispatchOutcome::Skipped,
            Some(command) => match self.hvac.dispatch(command, self.settings.ticks).await {
                Ok(details) => {
                    info!(command = %command, details = %details, "HVAC action sent");
                    DispatchOutcome::Sent(details)
                }
                Err(e) => {
                    warn!(command = %command, error = %e, "HVAC action could not be sent");
                    DispatchOutcome::Failed(e.to_string())
                }
            },
        };

        let event = HvacEvent::now(action, self.settings.timezone);
        let stored = match self.store.record(&reading, &event).await {
            Ok(()) => true,
            Err(e) => {
                error!(error = %e, "Failed to persist reading and event");
                false
            }
        };

        Ok(Outcome { reading, event, dispatch, stored })
    }
}

#[async_trait]
impl HubHandler for SensorPipeline {
    async fn on_connect(&self) {
        self.status.record_session().await;
    }

    async fn on_disconnect(&self) {
        info!("Sensor feed disconnected; waiting for reconnect");
    }

    async fn on_error(&self, error: &TransportError) {
        self.status.record_transport_error(error.to_string()).await;
    }

    async fn on_message(&self, arguments: Vec<Value>) {
        let span = info_span!("sensor_message", message_id = %Uuid::new_v4());
        async move {
            let result = AssertUnwindSafe(self.process(&arguments)).catch_unwind().await;
            match result {
                Ok(Ok(outcome)) => self.status.record_outcome(&outcome).await,
                Ok(Err(e)) => {
                    let payload = Value::Array(arguments);
                    warn!(error = %e, payload = %payload, "Dropping malformed sensor message");
                    self.status.record_dropped().await;
                }
                Err(panic) => {
                    let reason = panic_reason(panic.as_ref());
                    error!(reason = %reason, "Unexpected failure while handling sensor message");
                    self.status.record_failed().await;
                }
            }
        }
        .instrument(span)
        .await
    }
}

fn panic_reason(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_owned())
}
