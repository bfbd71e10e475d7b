use crate::core::errors::HubError;
use crate::core::types::NegotiationInfo;
use async_trait::async_trait;
use reqwest::{Client, Url};
use std::time::Duration;
use tracing::{debug, instrument};

const NEGOTIATE_VERSION: &str = "1";

/// Obtains the one-time connection token needed to open the transport
#[async_trait]
pub trait Negotiator: Send + Sync + 'static {
    async fn negotiate(&self) -> Result<NegotiationInfo, HubError>;
}

/// Negotiator issuing a single HTTP POST against the hub's negotiate endpoint
#[derive(Debug, Clone)]
pub struct ReqwestNegotiator {
    client: Client,
    hub_url: String,
}

impl ReqwestNegotiator {
    pub fn new(hub_url: impl Into<String>, timeout: Duration) -> Result<Self, HubError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| HubError::Negotiation(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self::with_client(client, hub_url))
    }

    /// Reuse an existing HTTP client, e.g. one shared with other collaborators
    pub fn with_client(client: Client, hub_url: impl Into<String>) -> Self {
        Self {
            client,
            hub_url: hub_url.into(),
        }
    }
}

#[async_trait]
impl Negotiator for ReqwestNegotiator {
    #[instrument(skip(self), fields(hub_url = %self.hub_url))]
    async fn negotiate(&self) -> Result<NegotiationInfo, HubError> {
        let url = negotiate_url(&self.hub_url)?;

        let response = self
            .client
            .post(url)
            .send()
            .await
            .map_err(|e| HubError::Negotiation(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(HubError::Negotiation(format!("HTTP {}: {}", status, body)));
        }

        let info = response
            .json::<NegotiationInfo>()
            .await
            .map_err(|e| HubError::Negotiation(format!("Invalid negotiate response: {}", e)))?;

        debug!(connection_id = ?info.connection_id, "negotiation complete");
        Ok(info)
    }
}

/// `{hub_url}/negotiate?negotiateVersion=1`
pub fn negotiate_url(hub_url: &str) -> Result<Url, HubError> {
    let mut url = Url::parse(hub_url)
        .map_err(|e| HubError::Negotiation(format!("Invalid hub url {}: {}", hub_url, e)))?;

    url.path_segments_mut()
        .map_err(|()| HubError::Negotiation(format!("Hub url cannot be a base: {}", hub_url)))?
        .pop_if_empty()
        .push("negotiate");
    url.query_pairs_mut()
        .append_pair("negotiateVersion", NEGOTIATE_VERSION);

    Ok(url)
}

/// Hub URL switched to its WebSocket scheme with the token as `id` query parameter
pub fn transport_url(hub_url: &str, info: &NegotiationInfo) -> Result<String, HubError> {
    let mut url = Url::parse(hub_url)
        .map_err(|e| HubError::TransportOpen(format!("Invalid hub url {}: {}", hub_url, e)))?;

    let scheme = match url.scheme() {
        "https" | "wss" => "wss",
        "http" | "ws" => "ws",
        other => {
            return Err(HubError::TransportOpen(format!(
                "Unsupported hub url scheme: {}",
                other
            )))
        }
    };
    url.set_scheme(scheme)
        .map_err(|()| HubError::TransportOpen(format!("Cannot switch {} to {}", hub_url, scheme)))?;
    url.query_pairs_mut()
        .append_pair("id", &info.connection_token);

    Ok(url.into())
}
