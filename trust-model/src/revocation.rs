use crate::numbers::{CrlNumber, SerialNumber};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Revocation fact keyed by `(issuer, serial, crl_number)`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RevokedCertificateRecord {
    pub issuer: String,
    pub serial: SerialNumber,
    pub crl_number: CrlNumber,
    pub revocation_date: DateTime<Utc>,
}

impl fmt::Display for RevokedCertificateRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} serial {} revoked {} (CRL {})",
            self.issuer,
            self.serial,
            self.revocation_date.to_rfc3339(),
            self.crl_number
        )
    }
}

/// Answer of a revocation lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RevocationStatus {
    NotRevoked,
    Revoked { date: DateTime<Utc> },
    /// No CRL has ever been applied for the issuer
    Unknown,
}

impl RevocationStatus {
    pub fn is_revoked(&self) -> bool {
        matches!(self, RevocationStatus::Revoked { .. })
    }
}
