use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use thiserror::Error;
use tracing::debug;

use super::policy::HvacCommand;
use crate::config::Config;

#[derive(Debug, Error)]
pub enum DispatchError {
    /// The request never produced a response (refused, timeout, DNS).
    #[error("HVAC endpoint unreachable: {0}")]
    Transport(#[source] reqwest::Error),
    #[error("HVAC endpoint answered {status}: {body}")]
    Rejected { status: StatusCode, body: String },
    /// The response body is not the expected JSON payload.
    #[error("HVAC response is not valid JSON: {0}")]
    Protocol(#[source] serde_json::Error),
}

/// Remote HVAC control seam.
#[async_trait]
pub trait HvacControl: Send + Sync {
    /// Ask the HVAC unit to run `command` for `ticks`; returns the decoded
    /// response payload.
    async fn dispatch(&self, command: HvacCommand, ticks: u32)
        -> Result<serde_json::Value, DispatchError>;
}

#[derive(Debug, Clone)]
pub struct HvacClient {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    http: Client,
    base_url: String,
    token: String,
}

impl HvacClient {
    pub fn new(config: &Config) -> reqwest::Result<Self> {
        Self::with_timeout(&config.host, &config.token, config.hvac_timeout())
    }

    pub fn with_timeout(base_url: &str, token: &str, timeout: Duration) -> reqwest::Result<Self> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            inner: Arc::new(Inner {
                http,
                base_url: base_url.trim_end_matches('/').to_owned(),
                token: token.to_owned(),
            }),
        })
    }

    pub(crate) fn action_url(&self, command: HvacCommand, ticks: u32) -> String {
        format!(
            "{}/api/hvac/{}/{}/{}",
            self.inner.base_url, self.inner.token, command, ticks
        )
    }
}

#[async_trait]
impl HvacControl for HvacClient {
    async fn dispatch(
        &self,
        command: HvacCommand,
        ticks: u32,
    ) -> Result<serde_json::Value, DispatchError> {
        let url = self.action_url(command, ticks);
        debug!(command = %command, ticks, "Sending HVAC action");

        let response = self
            .inner
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| DispatchError::Transport(e.without_url()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| DispatchError::Transport(e.without_url()))?;

        if !status.is_success() {
            return Err(DispatchError::Rejected { status, body });
        }

        serde_json::from_str(&body).map_err(DispatchError::Protocol)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_url_matches_endpoint_layout() {
        let client =
            HvacClient::with_timeout("http://hvac.local:8080/", "tok", Duration::from_secs(1)).unwrap();
        assert_eq!(
            client.action_url(HvacCommand::TurnOnAc, 10),
            "http://hvac.local:8080/api/hvac/tok/TurnOnAc/10"
        );
        assert_eq!(
            client.action_url(HvacCommand::TurnOnHeater, 3),
            "http://hvac.local:8080/api/hvac/tok/TurnOnHeater/3"
        );
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_a_transport_error() {
        // Bind then drop a listener to get a port nobody listens on.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client =
            HvacClient::with_timeout(&format!("http://{addr}"), "tok", Duration::from_secs(2)).unwrap();
        let err = client.dispatch(HvacCommand::TurnOnAc, 10).await.unwrap_err();
        assert!(matches!(err, DispatchError::Transport(_)), "got {err:?}");
    }
}
