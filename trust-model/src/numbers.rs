use crate::error::{ModelError, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Arbitrary-length unsigned integer as found in X.509 serials and CRL numbers
///
/// Stored big-endian without leading zero octets, so equal values always have
/// equal representations and ordering is numeric.
#[derive(Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct BigUnsigned(Vec<u8>);

/// Certificate serial number
pub type SerialNumber = BigUnsigned;

/// Monotonic CRL sequence number
pub type CrlNumber = BigUnsigned;

impl BigUnsigned {
    pub fn from_be_bytes(bytes: &[u8]) -> Self {
        let start = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
        Self(bytes.get(start..).unwrap_or_default().to_vec())
    }

    pub fn as_be_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_empty()
    }

    /// Lowercase hex, at least two digits
    pub fn to_hex(&self) -> String {
        if self.0.is_empty() {
            "00".to_string()
        } else {
            hex::encode(&self.0)
        }
    }

    /// Parse hex with an optional `0x` prefix; odd digit counts are allowed
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::InvalidNumber`] for empty or non-hex input.
    pub fn from_hex(value: &str) -> Result<Self> {
        let digits = value
            .trim()
            .trim_start_matches("0x")
            .trim_start_matches("0X")
            .replace(':', "");
        if digits.is_empty() {
            return Err(ModelError::InvalidNumber(value.to_string()));
        }
        let padded = if digits.len() % 2 == 1 {
            format!("0{digits}")
        } else {
            digits
        };
        let bytes = hex::decode(&padded).map_err(|_| ModelError::InvalidNumber(value.to_string()))?;
        Ok(Self::from_be_bytes(&bytes))
    }
}

impl From<u64> for BigUnsigned {
    fn from(value: u64) -> Self {
        Self::from_be_bytes(&value.to_be_bytes())
    }
}

impl Ord for BigUnsigned {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0
            .len()
            .cmp(&other.0.len())
            .then_with(|| self.0.cmp(&other.0))
    }
}

impl PartialOrd for BigUnsigned {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for BigUnsigned {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", self.to_hex())
    }
}

impl fmt::Debug for BigUnsigned {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BigUnsigned(0x{})", self.to_hex())
    }
}

impl From<BigUnsigned> for String {
    fn from(value: BigUnsigned) -> Self {
        value.to_hex()
    }
}

impl TryFrom<String> for BigUnsigned {
    type Error = ModelError;

    fn try_from(value: String) -> Result<Self> {
        Self::from_hex(&value)
    }
}
