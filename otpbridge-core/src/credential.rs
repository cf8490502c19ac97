//! Credential data model: parsed descriptors and extended metadata records.

use crate::otp::{Algorithm, Generator};
use crate::secret::SecretBytes;
use crate::{OtpBridgeError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;
use url::Url;

/// OTP flavour named in the `otpauth://{type}/` URI segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OtpKind {
    Totp,
    Hotp,
}

impl OtpKind {
    pub fn as_str(self) -> &'static str {
        match self {
            OtpKind::Totp => "totp",
            OtpKind::Hotp => "hotp",
        }
    }
}

impl std::fmt::Display for OtpKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OtpKind {
    type Err = OtpBridgeError;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "totp" => Ok(OtpKind::Totp),
            "hotp" => Ok(OtpKind::Hotp),
            other => Err(OtpBridgeError::InvalidCredentialUri(format!(
                "unknown OTP type '{}'",
                other
            ))),
        }
    }
}

/// Moving factor of a generator: a time step for TOTP or a counter for HOTP.
///
/// Exactly one of the two exists for any credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Factor {
    Timer { period: u32 },
    Counter { counter: u64 },
}

impl Factor {
    pub fn kind(&self) -> OtpKind {
        match self {
            Factor::Timer { .. } => OtpKind::Totp,
            Factor::Counter { .. } => OtpKind::Hotp,
        }
    }
}

/// Web service roles a credential can point at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Endpoint {
    /// Device registration for push notifications.
    Registration,
    /// Acknowledgement of a push login request.
    Acknowledge,
}

/// A web service URL with an optional one-time auth key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebService {
    pub url: Url,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub one_time_key: Option<String>,
}

impl WebService {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            one_time_key: None,
        }
    }

    pub fn with_one_time_key(mut self, key: impl Into<String>) -> Self {
        self.one_time_key = Some(key.into());
        self
    }
}

/// Endpoint map; keys are unique by construction.
pub type Endpoints = BTreeMap<Endpoint, WebService>;

/// Validated, immutable result of parsing an enrollment URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialDescriptor {
    account_name: String,
    issuer: String,
    generator: Generator,
    endpoints: Endpoints,
    local_name: Option<String>,
    guid: Option<String>,
}

impl CredentialDescriptor {
    /// Build a descriptor. Account name and issuer are trimmed and must be non-empty.
    pub fn new(account_name: &str, issuer: &str, generator: Generator) -> Result<Self> {
        let account_name = account_name.trim();
        let issuer = issuer.trim();
        if account_name.is_empty() {
            return Err(OtpBridgeError::InvalidCredentialUri(
                "account name cannot be empty".to_string(),
            ));
        }
        if issuer.is_empty() {
            return Err(OtpBridgeError::InvalidCredentialUri(
                "issuer cannot be empty".to_string(),
            ));
        }

        Ok(Self {
            account_name: account_name.to_string(),
            issuer: issuer.to_string(),
            generator,
            endpoints: Endpoints::new(),
            local_name: None,
            guid: None,
        })
    }

    pub fn with_endpoints(mut self, endpoints: Endpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    pub fn with_local_name(mut self, local_name: impl Into<String>) -> Self {
        self.local_name = Some(local_name.into());
        self
    }

    pub fn with_guid(mut self, guid: impl Into<String>) -> Self {
        self.guid = Some(guid.into());
        self
    }

    pub fn account_name(&self) -> &str {
        &self.account_name
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn generator(&self) -> &Generator {
        &self.generator
    }

    pub fn secret(&self) -> &SecretBytes {
        self.generator.secret()
    }

    pub fn algorithm(&self) -> Algorithm {
        self.generator.algorithm()
    }

    pub fn digits(&self) -> u8 {
        self.generator.digits()
    }

    pub fn factor(&self) -> Factor {
        self.generator.factor()
    }

    pub fn kind(&self) -> OtpKind {
        self.generator.factor().kind()
    }

    pub fn period(&self) -> Option<u32> {
        match self.generator.factor() {
            Factor::Timer { period } => Some(period),
            Factor::Counter { .. } => None,
        }
    }

    pub fn counter(&self) -> Option<u64> {
        match self.generator.factor() {
            Factor::Timer { .. } => None,
            Factor::Counter { counter } => Some(counter),
        }
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    pub fn local_name(&self) -> Option<&str> {
        self.local_name.as_deref()
    }

    pub fn guid(&self) -> Option<&str> {
        self.guid.as_deref()
    }

    /// Label shown for a freshly enrolled credential.
    pub fn display_name(&self) -> String {
        self.local_name
            .clone()
            .unwrap_or_else(|| self.issuer.clone())
    }
}

/// Mutable metadata record referencing a stored credential by identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtendedCredential {
    pub identifier: String,
    pub local_name: String,
    #[serde(default)]
    pub endpoints: Endpoints,
}

impl ExtendedCredential {
    pub fn new(identifier: impl Into<String>, local_name: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            local_name: local_name.into(),
            endpoints: Endpoints::new(),
        }
    }

    pub fn endpoint(&self, endpoint: Endpoint) -> Option<&WebService> {
        self.endpoints.get(&endpoint)
    }
}
