//! HOTP (RFC 4226) and TOTP (RFC 6238) password generation.

use crate::credential::Factor;
use crate::secret::SecretBytes;
use crate::{OtpBridgeError, Result};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Sha256, Sha512};
use std::str::FromStr;

type HmacSha1 = Hmac<Sha1>;
type HmacSha256 = Hmac<Sha256>;
type HmacSha512 = Hmac<Sha512>;

pub const MIN_DIGITS: u8 = 6;
pub const MAX_DIGITS: u8 = 8;
pub const DEFAULT_DIGITS: u8 = 6;
pub const DEFAULT_PERIOD: u32 = 30;

/// Supported HMAC hash functions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Algorithm {
    #[default]
    Sha1,
    Sha256,
    Sha512,
}

impl Algorithm {
    pub fn as_db_value(self) -> &'static str {
        match self {
            Algorithm::Sha1 => "SHA1",
            Algorithm::Sha256 => "SHA256",
            Algorithm::Sha512 => "SHA512",
        }
    }

    /// Integer tag used by the deep-link envelope (`0`, `1`, `2`).
    pub fn from_index(index: u8) -> Option<Self> {
        match index {
            0 => Some(Algorithm::Sha1),
            1 => Some(Algorithm::Sha256),
            2 => Some(Algorithm::Sha512),
            _ => None,
        }
    }

    pub fn index(self) -> u8 {
        match self {
            Algorithm::Sha1 => 0,
            Algorithm::Sha256 => 1,
            Algorithm::Sha512 => 2,
        }
    }
}

impl std::fmt::Display for Algorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_db_value())
    }
}

impl FromStr for Algorithm {
    type Err = OtpBridgeError;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "sha1" => Ok(Algorithm::Sha1),
            "sha256" => Ok(Algorithm::Sha256),
            "sha512" => Ok(Algorithm::Sha512),
            other => Err(OtpBridgeError::InvalidParameters(format!(
                "unsupported algorithm '{}'",
                other
            ))),
        }
    }
}

/// Current/next password pair with the display countdown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OtpCode {
    pub current: String,
    pub next: String,
    /// Seconds left in the current window; `None` for counter-based credentials.
    pub seconds_remaining: Option<u32>,
}

fn validate_digits(digits: u8) -> Result<()> {
    if !(MIN_DIGITS..=MAX_DIGITS).contains(&digits) {
        return Err(OtpBridgeError::InvalidParameters(format!(
            "digits must be between {} and {}, got {}",
            MIN_DIGITS, MAX_DIGITS, digits
        )));
    }
    Ok(())
}

fn hmac_digest(algorithm: Algorithm, key: &[u8], message: &[u8]) -> Result<Vec<u8>> {
    let invalid_key = |_| OtpBridgeError::InvalidParameters("invalid HMAC key".to_string());

    let digest = match algorithm {
        Algorithm::Sha1 => {
            let mut mac = HmacSha1::new_from_slice(key).map_err(invalid_key)?;
            mac.update(message);
            mac.finalize().into_bytes().to_vec()
        }
        Algorithm::Sha256 => {
            let mut mac = HmacSha256::new_from_slice(key).map_err(invalid_key)?;
            mac.update(message);
            mac.finalize().into_bytes().to_vec()
        }
        Algorithm::Sha512 => {
            let mut mac = HmacSha512::new_from_slice(key).map_err(invalid_key)?;
            mac.update(message);
            mac.finalize().into_bytes().to_vec()
        }
    };
    Ok(digest)
}

/// Generate the HOTP value for `counter`.
pub fn generate(secret: &[u8], algorithm: Algorithm, digits: u8, counter: u64) -> Result<String> {
    validate_digits(digits)?;
    if secret.is_empty() {
        return Err(OtpBridgeError::InvalidParameters(
            "secret cannot be empty".to_string(),
        ));
    }

    let digest = hmac_digest(algorithm, secret, &counter.to_be_bytes())?;

    // Dynamic truncation: the low nibble of the last byte picks a 4-byte window.
    let offset = (digest[digest.len() - 1] & 0x0f) as usize;
    let binary = ((digest[offset] as u32 & 0x7f) << 24)
        | ((digest[offset + 1] as u32) << 16)
        | ((digest[offset + 2] as u32) << 8)
        | (digest[offset + 3] as u32);

    let code = binary % 10u32.pow(digits as u32);
    Ok(format!("{:0width$}", code, width = digits as usize))
}

/// Time-step counter for a Unix timestamp.
pub fn counter_at(timestamp: i64, period: u32) -> Result<u64> {
    if period == 0 {
        return Err(OtpBridgeError::InvalidParameters(
            "period must be greater than 0".to_string(),
        ));
    }
    if timestamp < 0 {
        return Err(OtpBridgeError::InvalidParameters(format!(
            "timestamp {} precedes the Unix epoch",
            timestamp
        )));
    }
    Ok(timestamp as u64 / period as u64)
}

/// Seconds the current password stays valid: `period - 1 - (t mod period)`.
pub fn seconds_remaining(period: u32, timestamp: i64) -> u32 {
    if period == 0 {
        return 0;
    }
    let elapsed = timestamp.rem_euclid(period as i64) as u32;
    period - 1 - elapsed
}

/// A fully validated password generator for one credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generator {
    factor: Factor,
    secret: SecretBytes,
    algorithm: Algorithm,
    digits: u8,
}

impl Generator {
    pub fn new(factor: Factor, secret: SecretBytes, algorithm: Algorithm, digits: u8) -> Result<Self> {
        validate_digits(digits)?;
        if secret.is_empty() {
            return Err(OtpBridgeError::InvalidParameters(
                "secret cannot be empty".to_string(),
            ));
        }
        if let Factor::Timer { period: 0 } = factor {
            return Err(OtpBridgeError::InvalidParameters(
                "period must be greater than 0".to_string(),
            ));
        }

        Ok(Self {
            factor,
            secret,
            algorithm,
            digits,
        })
    }

    pub fn factor(&self) -> Factor {
        self.factor
    }

    pub fn secret(&self) -> &SecretBytes {
        &self.secret
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    pub fn digits(&self) -> u8 {
        self.digits
    }

    /// Password valid at `timestamp`. Counter-based generators ignore the time.
    pub fn password_at(&self, timestamp: i64) -> Result<String> {
        let counter = match self.factor {
            Factor::Timer { period } => counter_at(timestamp, period)?,
            Factor::Counter { counter } => counter,
        };
        generate(self.secret.as_bytes(), self.algorithm, self.digits, counter)
    }

    pub fn current_password(&self, now: i64) -> Result<String> {
        self.password_at(now)
    }

    /// Password of the following window (or the following counter value).
    pub fn next_password(&self, now: i64) -> Result<String> {
        match self.factor {
            Factor::Timer { period } => self.password_at(now.saturating_add(period as i64)),
            Factor::Counter { counter } => generate(
                self.secret.as_bytes(),
                self.algorithm,
                self.digits,
                counter.wrapping_add(1),
            ),
        }
    }

    pub fn seconds_remaining(&self, now: i64) -> Option<u32> {
        match self.factor {
            Factor::Timer { period } => Some(seconds_remaining(period, now)),
            Factor::Counter { .. } => None,
        }
    }

    pub fn code_at(&self, now: i64) -> Result<OtpCode> {
        Ok(OtpCode {
            current: self.current_password(now)?,
            next: self.next_password(now)?,
            seconds_remaining: self.seconds_remaining(now),
        })
    }
}
