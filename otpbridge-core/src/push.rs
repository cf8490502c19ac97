//! Push login requests and the web-service calls around them.
//!
//! A push payload names an environment (credential identifier) and carries an
//! OAuth token. The token is parked in the [`AuthStore`] under the resolved
//! acknowledgement URL until the user accepts or declines. Calls are
//! fire-and-forget: failures are logged and returned but never touch
//! credential state.

use crate::credential::{Endpoint, ExtendedCredential};
use crate::{OtpBridgeError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};
use url::Url;

/// Name shown when a notification matches no enrolled credential.
pub const UNKNOWN_ENVIRONMENT: &str = "Unknown workstation";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushNotification {
    #[serde(rename = "oAuth2Token")]
    pub oauth2_token: String,
    #[serde(rename = "environmentGUID")]
    pub environment_guid: String,
    #[serde(
        rename = "acknowledgeURLString",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub acknowledge_url: Option<String>,
    pub alert: Alert,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    pub title: String,
    pub message: String,
}

impl PushNotification {
    pub fn from_json(payload: &[u8]) -> Result<Self> {
        serde_json::from_slice(payload)
            .map_err(|e| OtpBridgeError::Transport(format!("invalid push payload: {}", e)))
    }

    /// The notification's own acknowledgement URL, if it carries a valid one.
    pub fn ack_url(&self) -> Option<Url> {
        self.acknowledge_url
            .as_deref()
            .and_then(|raw| Url::parse(raw.trim()).ok())
    }
}

/// The credential a notification is addressed to.
pub fn find_environment<'a>(
    notification: &PushNotification,
    credentials: &'a [ExtendedCredential],
) -> Option<&'a ExtendedCredential> {
    credentials
        .iter()
        .find(|credential| credential.identifier == notification.environment_guid)
}

/// Where to send the answer: the notification's URL, else the matching
/// credential's acknowledge endpoint.
pub fn resolve_ack_url(
    notification: &PushNotification,
    credentials: &[ExtendedCredential],
) -> Option<Url> {
    notification.ack_url().or_else(|| {
        find_environment(notification, credentials)
            .and_then(|credential| credential.endpoint(Endpoint::Acknowledge))
            .map(|service| service.url.clone())
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AckResponse {
    Accept,
    Decline,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AckRequest {
    pub token: String,
    pub response: AckResponse,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationRequest {
    #[serde(rename = "ServerIdentifier")]
    pub server_identifier: String,
    #[serde(rename = "DeviceToken")]
    pub device_token: String,
}

/// Temporary one-time auth tokens keyed by web-service URL.
#[derive(Debug, Default)]
pub struct AuthStore {
    tokens: Mutex<HashMap<String, String>>,
}

impl AuthStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, url: &Url, token: impl Into<String>) {
        if let Ok(mut tokens) = self.tokens.lock() {
            tokens.insert(url.to_string(), token.into());
        }
    }

    /// Remove and return the token for `url`.
    pub fn take(&self, url: &Url) -> Option<String> {
        self.tokens
            .lock()
            .ok()
            .and_then(|mut tokens| tokens.remove(url.as_str()))
    }

    pub fn contains(&self, url: &Url) -> bool {
        self.tokens
            .lock()
            .map(|tokens| tokens.contains_key(url.as_str()))
            .unwrap_or(false)
    }
}

/// "Send POST, get status" seam for the web-service calls.
#[async_trait]
pub trait HttpPoster: Send + Sync {
    /// POST a JSON body with an optional bearer token; returns the HTTP status.
    async fn post_json(&self, url: &Url, bearer: Option<&str>, body: Vec<u8>) -> Result<u16>;
}

#[cfg(feature = "http")]
pub struct ReqwestPoster {
    client: reqwest::Client,
}

#[cfg(feature = "http")]
impl ReqwestPoster {
    pub fn new(timeout: std::time::Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| OtpBridgeError::Transport(e.to_string()))?;
        Ok(Self { client })
    }
}

#[cfg(feature = "http")]
#[async_trait]
impl HttpPoster for ReqwestPoster {
    async fn post_json(&self, url: &Url, bearer: Option<&str>, body: Vec<u8>) -> Result<u16> {
        let mut request = self
            .client
            .post(url.clone())
            .header("Content-Type", "application/json")
            .body(body);
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| OtpBridgeError::Transport(e.to_string()))?;
        Ok(response.status().as_u16())
    }
}

/// A login request waiting for the user's answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingAck {
    pub ack_url: Url,
    pub environment_name: String,
    pub notification: PushNotification,
}

pub struct PushService {
    poster: Arc<dyn HttpPoster>,
    auth_store: AuthStore,
}

impl PushService {
    pub fn new(poster: Arc<dyn HttpPoster>) -> Self {
        Self {
            poster,
            auth_store: AuthStore::new(),
        }
    }

    pub fn auth_store(&self) -> &AuthStore {
        &self.auth_store
    }

    /// Park a freshly enrolled credential's registration key until it is used.
    pub fn enroll(&self, credential: &ExtendedCredential) {
        if let Some(service) = credential.endpoint(Endpoint::Registration) {
            if let Some(key) = &service.one_time_key {
                self.auth_store.insert(&service.url, key.clone());
            }
        }
    }

    /// Decode a push payload and park its token under the resolved ack URL.
    pub fn receive(&self, payload: &[u8], credentials: &[ExtendedCredential]) -> Result<PendingAck> {
        let notification = PushNotification::from_json(payload)?;

        let ack_url = resolve_ack_url(&notification, credentials).ok_or_else(|| {
            OtpBridgeError::NotFound(format!(
                "acknowledge URL for environment {}",
                notification.environment_guid
            ))
        })?;
        let environment_name = find_environment(&notification, credentials)
            .map(|credential| credential.local_name.clone())
            .unwrap_or_else(|| UNKNOWN_ENVIRONMENT.to_string());

        self.auth_store
            .insert(&ack_url, notification.oauth2_token.clone());
        Ok(PendingAck {
            ack_url,
            environment_name,
            notification,
        })
    }

    /// Send the user's answer. The parked token is consumed either way.
    pub async fn respond(&self, ack_url: &Url, response: AckResponse) -> Result<()> {
        let token = self.auth_store.take(ack_url).ok_or_else(|| {
            OtpBridgeError::NotFound(format!("pending login request for {}", ack_url))
        })?;
        let body = serde_json::to_vec(&AckRequest { token, response })
            .map_err(|e| OtpBridgeError::Transport(e.to_string()))?;

        self.post(ack_url, None, body).await?;
        info!("Sent {:?} to {}", response, ack_url);
        Ok(())
    }

    /// Register this device for pushes using the parked registration key.
    pub async fn register(
        &self,
        credential: &ExtendedCredential,
        server_identifier: &str,
        device_token: &str,
    ) -> Result<()> {
        let service = credential.endpoint(Endpoint::Registration).ok_or_else(|| {
            OtpBridgeError::NotFound(format!(
                "registration endpoint for {}",
                credential.identifier
            ))
        })?;
        let token = self.auth_store.take(&service.url).ok_or_else(|| {
            OtpBridgeError::NotFound(format!("registration key for {}", service.url))
        })?;

        let body = serde_json::to_vec(&RegistrationRequest {
            server_identifier: server_identifier.to_string(),
            device_token: device_token.to_string(),
        })
        .map_err(|e| OtpBridgeError::Transport(e.to_string()))?;

        self.post(&service.url, Some(&token), body).await
    }

    async fn post(&self, url: &Url, bearer: Option<&str>, body: Vec<u8>) -> Result<()> {
        match self.poster.post_json(url, bearer, body).await {
            Ok(status) if (200..300).contains(&status) => Ok(()),
            Ok(status) => {
                warn!("POST {} returned {}", url, status);
                Err(OtpBridgeError::Transport(format!(
                    "{} returned status {}",
                    url, status
                )))
            }
            Err(e) => {
                warn!("POST {} failed: {}", url, e);
                Err(e)
            }
        }
    }
}
