//! Shared-secret codec (RFC 4648 Base32) and the in-memory secret holder.
//!
//! Secrets travel as unpadded upper-case Base32 inside `otpauth://` URIs.
//! Decoding accepts lower-case input and trailing `=` padding, and rejects
//! anything outside the Base32 alphabet.

use crate::{OtpBridgeError, Result};
use data_encoding::BASE32_NOPAD;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Decode Base32 text into raw secret bytes.
pub fn decode(base32_text: &str) -> Result<Vec<u8>> {
    let normalized = base32_text
        .trim()
        .trim_end_matches('=')
        .to_ascii_uppercase();

    BASE32_NOPAD
        .decode(normalized.as_bytes())
        .map_err(|e| OtpBridgeError::MalformedSecret(format!("invalid base32 secret: {}", e)))
}

/// Encode raw secret bytes as canonical (upper-case, unpadded) Base32.
pub fn encode(bytes: &[u8]) -> String {
    BASE32_NOPAD.encode(bytes)
}

/// Raw secret material, zeroized on drop and redacted from `Debug` output.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SecretBytes(Vec<u8>);

impl SecretBytes {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Decode a Base32 secret. Empty secrets are rejected.
    pub fn from_base32(text: &str) -> Result<Self> {
        let bytes = decode(text)?;
        if bytes.is_empty() {
            return Err(OtpBridgeError::MalformedSecret(
                "secret cannot be empty".to_string(),
            ));
        }
        Ok(Self(bytes))
    }

    pub fn to_base32(&self) -> String {
        encode(&self.0)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for SecretBytes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SecretBytes([REDACTED; {}])", self.0.len())
    }
}

impl From<Vec<u8>> for SecretBytes {
    fn from(bytes: Vec<u8>) -> Self {
        Self::new(bytes)
    }
}

impl AsRef<[u8]> for SecretBytes {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}
