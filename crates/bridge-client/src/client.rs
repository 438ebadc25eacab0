//! Bridge HTTP client.

use crate::error::BridgeError;
use crate::types::*;
use reqwest::{Client, Response, StatusCode};
use session_core::Credentials;
use std::time::Duration;
use tracing::{debug, instrument, warn};
use urlencoding::encode;

/// Protocol bridge REST API client.
#[derive(Clone)]
pub struct BridgeClient {
    client: Client,
    base_url: String,
}

impl BridgeClient {
    /// Create a new bridge client.
    pub fn new(base_url: impl Into<String>) -> Result<Self, BridgeError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn session_url(&self, number: &str) -> String {
        format!("{}/v1/sessions/{}", self.base_url, encode(number))
    }

    /// Check if the bridge is healthy.
    pub async fn health_check(&self) -> bool {
        self.client
            .get(format!("{}/v1/health", self.base_url))
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }

    /// Open a session for a number, resuming from credentials when given.
    #[instrument(skip(self, credentials))]
    pub async fn open_session(
        &self,
        number: &str,
        credentials: Option<Credentials>,
    ) -> Result<OpenSessionResponse, BridgeError> {
        let response = self
            .client
            .post(self.session_url(number))
            .json(&OpenSessionRequest::from(credentials))
            .send()
            .await?;

        let response = check(number, response).await?;
        let opened: OpenSessionResponse = response.json().await?;
        debug!(registered = opened.registered, "Opened bridge session");
        Ok(opened)
    }

    /// Fetch pending lifecycle events.
    #[instrument(skip(self))]
    pub async fn poll_events(&self, number: &str) -> Result<Vec<BridgeEvent>, BridgeError> {
        let response = self
            .client
            .get(format!("{}/events", self.session_url(number)))
            .send()
            .await?;

        let events: Vec<BridgeEvent> = check(number, response).await?.json().await?;
        if !events.is_empty() {
            debug!("Received {} events", events.len());
        }
        Ok(events)
    }

    /// Request a raw pairing code.
    #[instrument(skip(self))]
    pub async fn request_pairing_code(&self, number: &str) -> Result<String, BridgeError> {
        let response = self
            .client
            .post(format!("{}/pairing-code", self.session_url(number)))
            .send()
            .await?;

        let body: PairingCodeResponse = check(number, response).await?.json().await?;
        Ok(body.code)
    }

    /// Send a text message to the linked account itself.
    #[instrument(skip(self, text))]
    pub async fn send_text(&self, number: &str, text: &str) -> Result<(), BridgeError> {
        let request = SendTextRequest {
            text: text.to_string(),
        };

        let response = self
            .client
            .post(format!("{}/messages", self.session_url(number)))
            .json(&request)
            .send()
            .await?;

        check(number, response).await?;
        debug!("Sent message");
        Ok(())
    }

    /// Close a session. Closing an unknown session is not an error.
    #[instrument(skip(self))]
    pub async fn close_session(&self, number: &str) -> Result<(), BridgeError> {
        let response = self
            .client
            .delete(self.session_url(number))
            .send()
            .await?;

        match check(number, response).await {
            Ok(_) | Err(BridgeError::SessionNotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

async fn check(number: &str, response: Response) -> Result<Response, BridgeError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    if status == StatusCode::NOT_FOUND {
        return Err(BridgeError::SessionNotFound(number.to_string()));
    }

    let message = response.text().await.unwrap_or_default();
    warn!(status = status.as_u16(), "Bridge request failed: {}", message);
    Err(BridgeError::Api {
        status: status.as_u16(),
        message,
    })
}
