use reqwest::{Client, Url};
use serde::Deserialize;
use tracing::debug;

use super::TransportError;

// ---------------------------------------------------------------------------
// Negotiate response
//
// Regular hub:
//   { "connectionId": "...", "connectionToken": "...", "negotiateVersion": 1,
//     "availableTransports": [...] }
//
// Redirect (e.g. a hosted SignalR service):
//   { "url": "https://...", "accessToken": "..." }
//
// Failure:
//   { "error": "..." }
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NegotiateResponse {
    pub connection_id: Option<String>,
    pub connection_token: Option<String>,
    pub url: Option<String>,
    pub access_token: Option<String>,
    pub error: Option<String>,
}

/// Where to open the WebSocket after negotiation.
#[derive(Debug, Clone, PartialEq)]
pub struct Endpoint {
    pub url: Url,
    pub access_token: Option<String>,
}

impl NegotiateResponse {
    /// Resolve the WebSocket endpoint relative to the negotiated `hub_url`.
    pub fn into_endpoint(self, hub_url: &Url) -> Result<Endpoint, TransportError> {
        if let Some(error) = self.error {
            return Err(TransportError::NegotiateRejected(error));
        }

        if let Some(redirect) = self.url {
            let url = Url::parse(&redirect)
                .map_err(|e| TransportError::InvalidUrl(format!("{redirect}: {e}")))?;
            return Ok(Endpoint {
                url: websocket_url(url)?,
                access_token: self.access_token,
            });
        }

        let mut url = websocket_url(hub_url.clone())?;
        // Version 1 servers hand out a separate token; version 0 reuses the id.
        if let Some(id) = self.connection_token.or(self.connection_id) {
            url.query_pairs_mut().append_pair("id", &id);
        }
        Ok(Endpoint { url, access_token: None })
    }
}

/// `POST <hub>/negotiate?negotiateVersion=1` and resolve the endpoint.
pub async fn negotiate(http: &Client, hub_url: &Url) -> Result<Endpoint, TransportError> {
    let negotiate_url = negotiate_url(hub_url)?;
    debug!(path = %negotiate_url.path(), "Negotiating hub connection");

    let response = http
        .post(negotiate_url)
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| TransportError::Negotiate(e.without_url()))?
        .json::<NegotiateResponse>()
        .await
        .map_err(|e| TransportError::Negotiate(e.without_url()))?;

    response.into_endpoint(hub_url)
}

pub(crate) fn negotiate_url(hub_url: &Url) -> Result<Url, TransportError> {
    let mut url = hub_url.clone();
    url.path_segments_mut()
        .map_err(|_| TransportError::InvalidUrl(hub_url.to_string()))?
        .pop_if_empty()
        .push("negotiate");
    url.query_pairs_mut().append_pair("negotiateVersion", "1");
    Ok(url)
}

/// Switch an `http(s)` hub URL to the matching `ws(s)` scheme.
pub(crate) fn websocket_url(mut url: Url) -> Result<Url, TransportError> {
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => return Err(TransportError::InvalidUrl(format!("unsupported scheme {other:?}"))),
    };
    url.set_scheme(scheme)
        .map_err(|_| TransportError::InvalidUrl(url.to_string()))?;
    Ok(url)
}
