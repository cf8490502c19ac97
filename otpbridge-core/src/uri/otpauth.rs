//! `otpauth://` Key URI parsing and canonical URI generation.
//!
//! Format: `otpauth://TYPE/LABEL?PARAMETERS`
//!
//! - TYPE: `totp` or `hotp`
//! - LABEL: `accountname` or `issuer:accountname` (percent-encoded)
//! - `secret` (required, Base32), `issuer`, `algorithm` (default SHA1),
//!   `digits` (default 6), `period` (TOTP, default 30), `counter` (HOTP, required),
//!   `registration`, `registrationToken`, `ack`

use super::{as_uri_error, invalid, parse_url, parse_web_service, query_params};
use crate::credential::{CredentialDescriptor, Endpoint, Endpoints, Factor, OtpKind};
use crate::otp::{Algorithm, Generator, DEFAULT_DIGITS, DEFAULT_PERIOD};
use crate::secret::SecretBytes;
use crate::Result;
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use std::collections::HashMap;

pub const OTPAUTH_SCHEME: &str = "otpauth";

const LABEL_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Parse an `otpauth://` URI into a validated descriptor.
pub fn parse_otpauth_uri(uri: &str) -> Result<CredentialDescriptor> {
    let url = parse_url(uri)?;
    if url.scheme() != OTPAUTH_SCHEME {
        return Err(invalid("URI must start with otpauth://"));
    }

    let kind: OtpKind = url
        .host_str()
        .ok_or_else(|| invalid("missing OTP type"))?
        .parse()?;

    let path = url.path();
    let (issuer_from_label, account_name) = parse_label(path.strip_prefix('/').unwrap_or(path))?;

    let params = query_params(&url)?;

    let secret = params
        .get("secret")
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| invalid("missing secret parameter"))?;
    let secret = SecretBytes::from_base32(secret).map_err(as_uri_error)?;

    let issuer_from_query = params
        .get("issuer")
        .map(|value| value.trim())
        .filter(|value| !value.is_empty());

    let issuer = match (issuer_from_label.as_deref(), issuer_from_query) {
        (Some(label), Some(query)) if label != query => {
            return Err(invalid(format!(
                "issuer in label ('{}') does not match issuer parameter ('{}')",
                label, query
            )));
        }
        (Some(label), _) => label.to_string(),
        (None, Some(query)) => query.to_string(),
        (None, None) => return Err(invalid("issuer is required")),
    };

    let algorithm = match params.get("algorithm") {
        Some(value) => value.parse::<Algorithm>().map_err(as_uri_error)?,
        None => Algorithm::default(),
    };

    let digits = match params.get("digits") {
        Some(value) => value
            .trim()
            .parse::<u8>()
            .map_err(|_| invalid(format!("digits must be numeric, got '{}'", value)))?,
        None => DEFAULT_DIGITS,
    };

    let factor = match kind {
        OtpKind::Totp => {
            let period = match params.get("period") {
                Some(value) => value
                    .trim()
                    .parse::<u32>()
                    .map_err(|_| invalid(format!("period must be numeric, got '{}'", value)))?,
                None => DEFAULT_PERIOD,
            };
            Factor::Timer { period }
        }
        OtpKind::Hotp => {
            let value = params
                .get("counter")
                .ok_or_else(|| invalid("HOTP URI is missing counter parameter"))?;
            let counter = value
                .trim()
                .parse::<u64>()
                .map_err(|_| invalid(format!("counter must be numeric, got '{}'", value)))?;
            Factor::Counter { counter }
        }
    };

    let endpoints = parse_endpoints(&params)?;
    let generator = Generator::new(factor, secret, algorithm, digits).map_err(as_uri_error)?;

    Ok(CredentialDescriptor::new(&account_name, &issuer, generator)?.with_endpoints(endpoints))
}

/// Split `issuer:account` (or a bare account) after percent-decoding.
fn parse_label(raw: &str) -> Result<(Option<String>, String)> {
    let label = percent_decode_str(raw)
        .decode_utf8()
        .map_err(|_| invalid("label is not valid UTF-8"))?;

    let pieces: Vec<&str> = label.split(':').collect();
    let (issuer, account) = match pieces.as_slice() {
        [account] => (None, *account),
        [issuer, account] => (Some(issuer.trim()), *account),
        _ => return Err(invalid("label may contain at most one ':' separator")),
    };

    let account = account.trim();
    if account.is_empty() {
        return Err(invalid("label is missing the account name"));
    }

    Ok((
        issuer.filter(|i| !i.is_empty()).map(str::to_string),
        account.to_string(),
    ))
}

fn parse_endpoints(params: &HashMap<String, String>) -> Result<Endpoints> {
    let mut endpoints = Endpoints::new();

    let registration_key = params.get("registrationToken").map(String::as_str);
    match params.get("registration") {
        Some(url) => {
            endpoints.insert(
                Endpoint::Registration,
                parse_web_service(url, registration_key)?,
            );
        }
        None if registration_key.is_some() => {
            return Err(invalid(
                "registrationToken given without a registration endpoint",
            ));
        }
        None => {}
    }

    if let Some(url) = params.get("ack") {
        endpoints.insert(Endpoint::Acknowledge, parse_web_service(url, None)?);
    }

    Ok(endpoints)
}

/// Canonical `otpauth://` URI of a descriptor's token fields.
///
/// Parameters are always emitted, in a fixed order, so equal credentials map
/// to equal strings. Endpoints are not part of the token and are omitted.
pub fn to_otpauth_uri(descriptor: &CredentialDescriptor) -> String {
    let label = format!(
        "{}:{}",
        utf8_percent_encode(descriptor.issuer(), LABEL_ENCODE_SET),
        utf8_percent_encode(descriptor.account_name(), LABEL_ENCODE_SET)
    );

    let mut query = url::form_urlencoded::Serializer::new(String::new());
    query.append_pair("secret", &descriptor.secret().to_base32());
    query.append_pair("issuer", descriptor.issuer());
    query.append_pair("algorithm", descriptor.algorithm().as_db_value());
    query.append_pair("digits", &descriptor.digits().to_string());
    match descriptor.factor() {
        Factor::Timer { period } => query.append_pair("period", &period.to_string()),
        Factor::Counter { counter } => query.append_pair("counter", &counter.to_string()),
    };

    format!(
        "{}://{}/{}?{}",
        OTPAUTH_SCHEME,
        descriptor.kind(),
        label,
        query.finish()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::OtpBridgeError;

    fn assert_rejected(uri: &str) {
        match parse_otpauth_uri(uri) {
            Err(OtpBridgeError::InvalidCredentialUri(_)) => {}
            other => panic!("expected InvalidCredentialUri for {}, got {:?}", uri, other),
        }
    }

    #[test]
    fn test_parse_with_all_fields() {
        let descriptor = parse_otpauth_uri(
            "otpauth://totp/Epic:lstomber?secret=JBSWY3DPEHPK3PXP&issuer=Epic&digits=8&period=60&algorithm=SHA512",
        )
        .unwrap();

        assert_eq!(descriptor.account_name(), "lstomber");
        assert_eq!(descriptor.issuer(), "Epic");
        assert_eq!(descriptor.digits(), 8);
        assert_eq!(descriptor.period(), Some(60));
        assert_eq!(descriptor.algorithm(), Algorithm::Sha512);
        assert_eq!(descriptor.secret().to_base32(), "JBSWY3DPEHPK3PXP");
        assert!(descriptor.endpoints().is_empty());
    }

    #[test]
    fn test_parse_defaults() {
        let descriptor =
            parse_otpauth_uri("otpauth://totp/alice@example.com?secret=jbswy3dpehpk3pxp&issuer=Acme")
                .unwrap();

        assert_eq!(descriptor.account_name(), "alice@example.com");
        assert_eq!(descriptor.issuer(), "Acme");
        assert_eq!(descriptor.algorithm(), Algorithm::Sha1);
        assert_eq!(descriptor.digits(), 6);
        assert_eq!(descriptor.period(), Some(30));
    }

    #[test]
    fn test_parse_percent_encoded_label() {
        let descriptor = parse_otpauth_uri(
            "otpauth://totp/Big%20Corp%3A%20alice%40example.com?secret=JBSWY3DPEHPK3PXP",
        )
        .unwrap();
        assert_eq!(descriptor.issuer(), "Big Corp");
        assert_eq!(descriptor.account_name(), "alice@example.com");
    }

    #[test]
    fn test_parse_endpoints_and_registration_token() {
        let descriptor = parse_otpauth_uri(
            "otpauth://totp/Epic:lstomber?secret=JBSWY3DPEHPK3PXP&issuer=Epic&ack=http://www.EPIC.com/acceptTokenPush&registration=http://www.example.com/registerDevice&registrationToken=hunter2",
        )
        .unwrap();

        let registration = &descriptor.endpoints()[&Endpoint::Registration];
        assert_eq!(registration.url.as_str(), "http://www.example.com/registerDevice");
        assert_eq!(registration.one_time_key.as_deref(), Some("hunter2"));

        let ack = &descriptor.endpoints()[&Endpoint::Acknowledge];
        assert_eq!(ack.url.as_str(), "http://www.epic.com/acceptTokenPush");
        assert!(ack.one_time_key.is_none());
    }

    #[test]
    fn test_parse_hotp_requires_counter() {
        let descriptor =
            parse_otpauth_uri("otpauth://hotp/Acme:alice?secret=JBSWY3DPEHPK3PXP&counter=42").unwrap();
        assert_eq!(descriptor.kind(), OtpKind::Hotp);
        assert_eq!(descriptor.counter(), Some(42));
        assert_eq!(descriptor.period(), None);

        assert_rejected("otpauth://hotp/Acme:alice?secret=JBSWY3DPEHPK3PXP");
    }

    #[test]
    fn test_rejects_issuer_mismatch() {
        assert_rejected("otpauth://totp/Acme:alice?secret=JBSWY3DPEHPK3PXP&issuer=Other");
        // Exact comparison, no case folding.
        assert_rejected("otpauth://totp/Acme:alice?secret=JBSWY3DPEHPK3PXP&issuer=acme");
    }

    #[test]
    fn test_rejects_invalid_inputs() {
        assert_rejected("otpauth://totp/Acme:alice?issuer=Acme");
        assert_rejected("otpauth://totp/Acme:alice?secret=");
        assert_rejected("otpauth://totp/Acme:alice?secret=NOT*BASE32");
        assert_rejected("otpauth://totp/alice?secret=JBSWY3DPEHPK3PXP");
        assert_rejected("otpauth://totp/Acme:?secret=JBSWY3DPEHPK3PXP");
        assert_rejected("otpauth://totp/a:b:c?secret=JBSWY3DPEHPK3PXP");
        assert_rejected("otpauth://motp/Acme:alice?secret=JBSWY3DPEHPK3PXP");
        assert_rejected("otpauth://totp/Acme:alice?secret=JBSWY3DPEHPK3PXP&digits=5");
        assert_rejected("otpauth://totp/Acme:alice?secret=JBSWY3DPEHPK3PXP&digits=9");
        assert_rejected("otpauth://totp/Acme:alice?secret=JBSWY3DPEHPK3PXP&digits=six");
        assert_rejected("otpauth://totp/Acme:alice?secret=JBSWY3DPEHPK3PXP&period=0");
        assert_rejected("otpauth://totp/Acme:alice?secret=JBSWY3DPEHPK3PXP&algorithm=MD5");
        assert_rejected("otpauth://totp/Acme:alice?secret=JBSWY3DPEHPK3PXP&ack=not-a-url");
        assert_rejected("otpauth://totp/Acme:alice?secret=JBSWY3DPEHPK3PXP&registrationToken=k");
        assert_rejected("https://totp/Acme:alice?secret=JBSWY3DPEHPK3PXP");
    }

    #[test]
    fn test_canonical_uri_reparses_to_same_token() {
        let original = parse_otpauth_uri(
            "otpauth://totp/Big%20Corp:alice%40example.com?secret=jbswy3dpehpk3pxp&algorithm=sha256&digits=7&period=45",
        )
        .unwrap();

        let uri = to_otpauth_uri(&original);
        assert_eq!(
            uri,
            "otpauth://totp/Big%20Corp:alice%40example.com?secret=JBSWY3DPEHPK3PXP&issuer=Big+Corp&algorithm=SHA256&digits=7&period=45"
        );

        let reparsed = parse_otpauth_uri(&uri).unwrap();
        assert_eq!(reparsed, original);
    }

    #[test]
    fn test_canonical_uri_for_hotp() {
        let descriptor =
            parse_otpauth_uri("otpauth://hotp/Acme:bob?secret=JBSWY3DPEHPK3PXP&counter=7").unwrap();
        let uri = to_otpauth_uri(&descriptor);
        assert!(uri.starts_with("otpauth://hotp/Acme:bob?"));
        assert!(uri.ends_with("&counter=7"));
        assert_eq!(parse_otpauth_uri(&uri).unwrap(), descriptor);
    }
}
