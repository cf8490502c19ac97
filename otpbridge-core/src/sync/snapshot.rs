//! Snapshot payload exchanged between peers.
//!
//! Wire shape: `{"EncodedTokenURLToExtendedTokenMap": {"<otpauth URI>": {identifier, localName, endpoints}}}`.
//! The key carries the token material needed to re-create a missing secret;
//! the value is the metadata record.

use crate::credential::ExtendedCredential;
use crate::{OtpBridgeError, Result};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::warn;

/// Context key wrapping the snapshot map.
pub const CONTEXT_KEY: &str = "EncodedTokenURLToExtendedTokenMap";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    entries: BTreeMap<String, ExtendedCredential>,
}

#[derive(Serialize)]
struct Envelope<'a> {
    #[serde(rename = "EncodedTokenURLToExtendedTokenMap")]
    entries: &'a BTreeMap<String, ExtendedCredential>,
}

/// Result of decoding a context: the readable entries plus how many were not.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodedSnapshot {
    pub snapshot: Snapshot,
    pub dropped: usize,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, credential_uri: impl Into<String>, extended: ExtendedCredential) {
        self.entries.insert(credential_uri.into(), extended);
    }

    pub fn contains(&self, credential_uri: &str) -> bool {
        self.entries.contains_key(credential_uri)
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &ExtendedCredential)> {
        self.entries.iter().map(|(uri, extended)| (uri.as_str(), extended))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(&Envelope {
            entries: &self.entries,
        })
        .map_err(|e| OtpBridgeError::InvalidSnapshot(format!("cannot encode snapshot: {}", e)))
    }

    /// Decode a context payload. Entries whose record does not parse are
    /// counted and skipped; only an unreadable envelope is an error.
    pub fn decode(bytes: &[u8]) -> Result<DecodedSnapshot> {
        let context: Value = serde_json::from_slice(bytes)
            .map_err(|e| OtpBridgeError::InvalidSnapshot(format!("context is not JSON: {}", e)))?;

        let map = context
            .get(CONTEXT_KEY)
            .and_then(Value::as_object)
            .ok_or_else(|| {
                OtpBridgeError::InvalidSnapshot(format!("context has no '{}' map", CONTEXT_KEY))
            })?;

        let mut decoded = DecodedSnapshot::default();
        for (uri, value) in map {
            match serde_json::from_value::<ExtendedCredential>(value.clone()) {
                Ok(extended) => decoded.snapshot.insert(uri.clone(), extended),
                Err(e) => {
                    warn!("Dropping unreadable snapshot entry: {}", e);
                    decoded.dropped += 1;
                }
            }
        }
        Ok(decoded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_shape() {
        let mut snapshot = Snapshot::new();
        snapshot.insert(
            "otpauth://totp/A:b?secret=JBSWY3DPEHPK3PXP",
            ExtendedCredential::new("id-1", "Work"),
        );

        let value: Value = serde_json::from_slice(&snapshot.encode().unwrap()).unwrap();
        let entry = &value[CONTEXT_KEY]["otpauth://totp/A:b?secret=JBSWY3DPEHPK3PXP"];
        assert_eq!(entry["identifier"], "id-1");
        assert_eq!(entry["localName"], "Work");

        let decoded = Snapshot::decode(&snapshot.encode().unwrap()).unwrap();
        assert_eq!(decoded.snapshot, snapshot);
        assert_eq!(decoded.dropped, 0);
    }

    #[test]
    fn test_decode_drops_bad_entries_only() {
        let payload = br#"{
            "EncodedTokenURLToExtendedTokenMap": {
                "otpauth://totp/A:good?secret=JBSWY3DPEHPK3PXP": {"identifier": "good", "localName": "Good"},
                "otpauth://totp/A:bad?secret=JBSWY3DPEHPK3PXP": {"localName": 7},
                "otpauth://totp/A:worse?secret=JBSWY3DPEHPK3PXP": "nope"
            }
        }"#;

        let decoded = Snapshot::decode(payload).unwrap();
        assert_eq!(decoded.snapshot.len(), 1);
        assert_eq!(decoded.dropped, 2);
    }

    #[test]
    fn test_decode_rejects_bad_envelope() {
        for payload in [&b"not json"[..], b"[]", b"{}", br#"{"EncodedTokenURLToExtendedTokenMap": []}"#] {
            assert!(matches!(
                Snapshot::decode(payload),
                Err(OtpBridgeError::InvalidSnapshot(_))
            ));
        }
    }

    #[test]
    fn test_empty_snapshot() {
        let decoded = Snapshot::decode(&Snapshot::new().encode().unwrap()).unwrap();
        assert!(decoded.snapshot.is_empty());
    }
}
