//! Deep-link enrollment envelope: `<scheme>://addkey?data=<base64 JSON>`.
//!
//! The JSON carries the generator parameters directly, with the secret as
//! standard base64 (not Base32), so no label parsing is involved.

use super::{as_uri_error, invalid, parse_url, parse_web_service, query_params};
use crate::credential::{CredentialDescriptor, Endpoint, Endpoints, Factor};
use crate::otp::{Algorithm, Generator};
use crate::secret::SecretBytes;
use crate::Result;
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;
use serde::{Deserialize, Serialize};

pub const DEEP_LINK_HOST: &str = "addkey";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeepLinkEnvelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_name: Option<String>,
    pub organization: Organization,
    pub generator: GeneratorInfo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registration: Option<WebServiceInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acknowledge: Option<WebServiceInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Organization {
    pub name: String,
    pub account_name: String,
    pub guid: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratorInfo {
    /// Time step in seconds.
    pub interval: f64,
    /// 0 = SHA1, 1 = SHA256, 2 = SHA512.
    pub algorithm: u8,
    pub digits: u8,
    /// Standard base64 of the raw secret bytes.
    pub secret: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebServiceInfo {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub one_time_key: Option<String>,
}

impl DeepLinkEnvelope {
    /// Decode the `data=` payload (base64 of the JSON envelope).
    pub fn from_payload(payload: &str) -> Result<Self> {
        let json = decode_base64(payload)
            .ok_or_else(|| invalid("deep-link data is not valid base64"))?;
        serde_json::from_slice(&json)
            .map_err(|e| invalid(format!("deep-link data is not a valid envelope: {}", e)))
    }

    /// Encode as a `data=` payload (standard base64 JSON).
    pub fn to_payload(&self) -> Result<String> {
        let json = serde_json::to_vec(self)
            .map_err(|e| invalid(format!("cannot encode deep-link envelope: {}", e)))?;
        Ok(STANDARD.encode(json))
    }

    pub fn to_descriptor(&self) -> Result<CredentialDescriptor> {
        let period = interval_to_period(self.generator.interval)?;

        let algorithm = Algorithm::from_index(self.generator.algorithm).ok_or_else(|| {
            invalid(format!(
                "unknown algorithm index {}",
                self.generator.algorithm
            ))
        })?;

        let secret_bytes = decode_base64(&self.generator.secret)
            .ok_or_else(|| invalid("generator secret is not valid base64"))?;
        if secret_bytes.is_empty() {
            return Err(invalid("generator secret cannot be empty"));
        }

        let generator = Generator::new(
            Factor::Timer { period },
            SecretBytes::new(secret_bytes),
            algorithm,
            self.generator.digits,
        )
        .map_err(as_uri_error)?;

        let guid = self.organization.guid.trim();
        if guid.is_empty() {
            return Err(invalid("organization guid cannot be empty"));
        }

        let mut endpoints = Endpoints::new();
        if let Some(info) = &self.registration {
            endpoints.insert(
                Endpoint::Registration,
                parse_web_service(&info.url, info.one_time_key.as_deref())?,
            );
        }
        if let Some(info) = &self.acknowledge {
            endpoints.insert(
                Endpoint::Acknowledge,
                parse_web_service(&info.url, info.one_time_key.as_deref())?,
            );
        }

        let mut descriptor = CredentialDescriptor::new(
            &self.organization.account_name,
            &self.organization.name,
            generator,
        )?
        .with_endpoints(endpoints)
        .with_guid(guid);

        if let Some(name) = self
            .local_name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
        {
            descriptor = descriptor.with_local_name(name);
        }

        Ok(descriptor)
    }
}

/// Parse a `<scheme>://addkey?data=...` deep link.
pub fn parse_deep_link(uri: &str, scheme: &str) -> Result<CredentialDescriptor> {
    let url = parse_url(uri)?;
    if !url.scheme().eq_ignore_ascii_case(scheme) {
        return Err(invalid(format!(
            "expected scheme '{}', got '{}'",
            scheme,
            url.scheme()
        )));
    }
    if !url
        .host_str()
        .map(|host| host.eq_ignore_ascii_case(DEEP_LINK_HOST))
        .unwrap_or(false)
    {
        return Err(invalid(format!("deep link must target '{}'", DEEP_LINK_HOST)));
    }

    let params = query_params(&url)?;
    let payload = params
        .get("data")
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| invalid("deep link is missing the data parameter"))?;

    DeepLinkEnvelope::from_payload(payload)?.to_descriptor()
}

fn interval_to_period(interval: f64) -> Result<u32> {
    if !interval.is_finite() || interval <= 0.0 || interval.fract() != 0.0 {
        return Err(invalid(format!(
            "interval must be a positive whole number of seconds, got {}",
            interval
        )));
    }
    if interval > u32::MAX as f64 {
        return Err(invalid(format!("interval {} is out of range", interval)));
    }
    Ok(interval as u32)
}

/// Query decoding turns `+` into a space; undo that, then accept any common alphabet.
fn decode_base64(text: &str) -> Option<Vec<u8>> {
    let normalized = text.trim().replace(' ', "+");
    [&STANDARD, &STANDARD_NO_PAD, &URL_SAFE, &URL_SAFE_NO_PAD]
        .iter()
        .find_map(|engine| engine.decode(normalized.as_bytes()).ok())
}
