//! Enrollment URI parsing.
//!
//! Two external forms are accepted:
//! - `otpauth://{totp|hotp}/LABEL?PARAMS` (Key URI format)
//! - `<scheme>://addkey?data=<base64 JSON>` (deep-link envelope)
//!
//! Parsing is all-or-nothing: any missing, inconsistent or out-of-range value
//! fails with [`OtpBridgeError::InvalidCredentialUri`].

pub mod deeplink;
pub mod otpauth;

pub use deeplink::{parse_deep_link, DeepLinkEnvelope, DEEP_LINK_HOST};
pub use otpauth::{parse_otpauth_uri, to_otpauth_uri, OTPAUTH_SCHEME};

use crate::credential::{CredentialDescriptor, WebService};
use crate::{OtpBridgeError, Result};
use std::collections::HashMap;
use url::Url;

/// Parse either enrollment form, dispatching on the URI scheme.
pub fn parse_enrollment(uri: &str, deep_link_scheme: &str) -> Result<CredentialDescriptor> {
    let url = parse_url(uri)?;
    if url.scheme() == OTPAUTH_SCHEME {
        parse_otpauth_uri(uri)
    } else if url.scheme().eq_ignore_ascii_case(deep_link_scheme) {
        parse_deep_link(uri, deep_link_scheme)
    } else {
        Err(invalid(format!("unsupported scheme '{}'", url.scheme())))
    }
}

pub(crate) fn invalid(message: impl Into<String>) -> OtpBridgeError {
    OtpBridgeError::InvalidCredentialUri(message.into())
}

/// Re-tag nested codec/generator failures as URI failures.
pub(crate) fn as_uri_error(error: OtpBridgeError) -> OtpBridgeError {
    match error {
        OtpBridgeError::InvalidCredentialUri(_) => error,
        other => invalid(other.to_string()),
    }
}

pub(crate) fn parse_url(uri: &str) -> Result<Url> {
    Url::parse(uri.trim()).map_err(|e| invalid(format!("malformed URI: {}", e)))
}

/// Collect query parameters. A key repeated with different values is rejected.
pub(crate) fn query_params(url: &Url) -> Result<HashMap<String, String>> {
    let mut params: HashMap<String, String> = HashMap::new();
    for (key, value) in url.query_pairs() {
        match params.get(key.as_ref()) {
            Some(existing) if existing.as_str() != value.as_ref() => {
                return Err(invalid(format!(
                    "conflicting values for query parameter '{}'",
                    key
                )));
            }
            Some(_) => {}
            None => {
                params.insert(key.into_owned(), value.into_owned());
            }
        }
    }
    Ok(params)
}

/// Endpoint URLs must be absolute http(s) URLs.
pub(crate) fn parse_web_service(value: &str, one_time_key: Option<&str>) -> Result<WebService> {
    let url = Url::parse(value.trim())
        .map_err(|e| invalid(format!("invalid endpoint URL '{}': {}", value, e)))?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(invalid(format!(
            "endpoint URL '{}' must use http or https",
            value
        )));
    }

    let service = WebService::new(url);
    Ok(match one_time_key.map(str::trim).filter(|k| !k.is_empty()) {
        Some(key) => service.with_one_time_key(key),
        None => service,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::OtpKind;

    #[test]
    fn test_dispatch_otpauth() {
        let descriptor = parse_enrollment(
            "otpauth://totp/Acme:alice?secret=JBSWY3DPEHPK3PXP",
            "epic2fa",
        )
        .unwrap();
        assert_eq!(descriptor.kind(), OtpKind::Totp);
        assert_eq!(descriptor.issuer(), "Acme");
    }

    #[test]
    fn test_dispatch_rejects_unknown_scheme() {
        let err = parse_enrollment("https://example.com/?secret=JBSWY3DPEHPK3PXP", "epic2fa")
            .unwrap_err();
        assert!(matches!(err, OtpBridgeError::InvalidCredentialUri(_)));
        assert!(parse_enrollment("not a uri", "epic2fa").is_err());
    }

    #[test]
    fn test_query_params_conflicts() {
        let url = Url::parse("otpauth://totp/a?x=1&x=1&y=2").unwrap();
        let params = query_params(&url).unwrap();
        assert_eq!(params.get("x").map(String::as_str), Some("1"));

        let url = Url::parse("otpauth://totp/a?x=1&x=2").unwrap();
        assert!(query_params(&url).is_err());
    }

    #[test]
    fn test_web_service_requires_http() {
        assert!(parse_web_service("https://example.com/ack", None).is_ok());
        assert!(parse_web_service("/relative/path", None).is_err());
        assert!(parse_web_service("ftp://example.com/ack", None).is_err());

        let service = parse_web_service("http://example.com/r", Some(" key ")).unwrap();
        assert_eq!(service.one_time_key.as_deref(), Some("key"));
        let service = parse_web_service("http://example.com/r", Some("")).unwrap();
        assert!(service.one_time_key.is_none());
    }
}
