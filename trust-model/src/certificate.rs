//! Owned X.509 certificate wrapper
//!
//! Certificates are parsed once with `x509-parser` and the fields the trust
//! service needs are copied out, so the value can be cloned, stored and shared
//! across tasks without borrowing the DER buffer.

use crate::error::{ModelError, Result};
use crate::numbers::SerialNumber;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use x509_parser::der_parser::der::parse_der;
use x509_parser::extensions::{DistributionPointName, GeneralName, ParsedExtension};
use x509_parser::prelude::*;

/// Extension carrying ETSI qualified certificate statements
pub const QC_STATEMENTS_OID: &str = "1.3.6.1.5.5.7.1.3";
/// `id-etsi-qcs-QcCompliance`
pub const QC_COMPLIANCE_OID: &str = "0.4.0.1862.1.1";

const PEM_CERTIFICATE_TAG: &str = "CERTIFICATE";

/// Key usage bits (RFC 5280 section 4.2.1.3)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyUsageBit {
    DigitalSignature,
    NonRepudiation,
    KeyEncipherment,
    DataEncipherment,
    KeyAgreement,
    KeyCertSign,
    CrlSign,
    EncipherOnly,
    DecipherOnly,
}

impl KeyUsageBit {
    pub const ALL: [KeyUsageBit; 9] = [
        KeyUsageBit::DigitalSignature,
        KeyUsageBit::NonRepudiation,
        KeyUsageBit::KeyEncipherment,
        KeyUsageBit::DataEncipherment,
        KeyUsageBit::KeyAgreement,
        KeyUsageBit::KeyCertSign,
        KeyUsageBit::CrlSign,
        KeyUsageBit::EncipherOnly,
        KeyUsageBit::DecipherOnly,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            KeyUsageBit::DigitalSignature => "digital_signature",
            KeyUsageBit::NonRepudiation => "non_repudiation",
            KeyUsageBit::KeyEncipherment => "key_encipherment",
            KeyUsageBit::DataEncipherment => "data_encipherment",
            KeyUsageBit::KeyAgreement => "key_agreement",
            KeyUsageBit::KeyCertSign => "key_cert_sign",
            KeyUsageBit::CrlSign => "crl_sign",
            KeyUsageBit::EncipherOnly => "encipher_only",
            KeyUsageBit::DecipherOnly => "decipher_only",
        }
    }

    fn is_set(self, usage: &KeyUsage) -> bool {
        match self {
            KeyUsageBit::DigitalSignature => usage.digital_signature(),
            KeyUsageBit::NonRepudiation => usage.non_repudiation(),
            KeyUsageBit::KeyEncipherment => usage.key_encipherment(),
            KeyUsageBit::DataEncipherment => usage.data_encipherment(),
            KeyUsageBit::KeyAgreement => usage.key_agreement(),
            KeyUsageBit::KeyCertSign => usage.key_cert_sign(),
            KeyUsageBit::CrlSign => usage.crl_sign(),
            KeyUsageBit::EncipherOnly => usage.encipher_only(),
            KeyUsageBit::DecipherOnly => usage.decipher_only(),
        }
    }
}

impl fmt::Display for KeyUsageBit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeyUsageBit {
    type Err = ModelError;

    /// Accepts `digital_signature`, `DIGITAL_SIGNATURE` and `digitalSignature`
    fn from_str(s: &str) -> Result<Self> {
        let normalized: String = s
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .collect::<String>()
            .to_ascii_lowercase();
        KeyUsageBit::ALL
            .iter()
            .copied()
            .find(|bit| bit.as_str().replace('_', "") == normalized)
            .or(match normalized.as_str() {
                "contentcommitment" => Some(KeyUsageBit::NonRepudiation),
                _ => None,
            })
            .ok_or_else(|| ModelError::UnknownKeyUsage(s.to_string()))
    }
}

/// Parsed X.509 certificate; identity is the DER encoding
#[derive(Clone, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct Certificate {
    der: Arc<[u8]>,
    subject: String,
    issuer: String,
    serial: SerialNumber,
    not_before: DateTime<Utc>,
    not_after: DateTime<Utc>,
    fingerprint: String,
    key_usage: Option<BTreeSet<KeyUsageBit>>,
    policies: Vec<String>,
    qc_compliant: bool,
    crl_distribution_points: Vec<String>,
    is_ca: bool,
}

impl Certificate {
    /// Parse a single DER encoded certificate
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::MalformedCertificate`] if the bytes are not exactly
    /// one valid certificate.
    pub fn from_der(der: &[u8]) -> Result<Self> {
        let (remainder, cert) = X509Certificate::from_der(der)
            .map_err(|e| ModelError::MalformedCertificate(e.to_string()))?;
        if !remainder.is_empty() {
            return Err(ModelError::MalformedCertificate(format!(
                "{} trailing bytes after certificate",
                remainder.len()
            )));
        }

        let validity = cert.validity();
        let not_before = to_datetime(validity.not_before.timestamp())?;
        let not_after = to_datetime(validity.not_after.timestamp())?;

        let key_usage = match cert.key_usage() {
            Ok(Some(ext)) => Some(
                KeyUsageBit::ALL
                    .iter()
                    .copied()
                    .filter(|bit| bit.is_set(ext.value))
                    .collect(),
            ),
            Ok(None) => None,
            Err(e) => return Err(ModelError::MalformedCertificate(e.to_string())),
        };

        let mut policies = Vec::new();
        let mut crl_distribution_points = Vec::new();
        let mut qc_compliant = false;
        for ext in cert.extensions() {
            match ext.parsed_extension() {
                ParsedExtension::CertificatePolicies(infos) => {
                    policies.extend(infos.iter().map(|info| info.policy_id.to_id_string()));
                }
                ParsedExtension::CRLDistributionPoints(points) => {
                    for point in points.points.iter() {
                        if let Some(DistributionPointName::FullName(names)) = &point.distribution_point {
                            for name in names {
                                if let GeneralName::URI(uri) = name {
                                    crl_distribution_points.push((*uri).to_string());
                                }
                            }
                        }
                    }
                }
                _ => {
                    if ext.oid.to_id_string() == QC_STATEMENTS_OID {
                        qc_compliant = has_qc_compliance(ext.value);
                    }
                }
            }
        }

        let is_ca = matches!(cert.basic_constraints(), Ok(Some(bc)) if bc.value.ca);

        Ok(Self {
            der: Arc::from(der),
            subject: cert.subject().to_string(),
            issuer: cert.issuer().to_string(),
            serial: SerialNumber::from_be_bytes(cert.raw_serial()),
            not_before,
            not_after,
            fingerprint: hex::encode(Sha256::digest(der)),
            key_usage,
            policies,
            qc_compliant,
            crl_distribution_points,
            is_ca,
        })
    }

    /// Parse every certificate in a PEM bundle
    ///
    /// # Errors
    ///
    /// Fails on invalid PEM armour, on a bundle without certificates, or on any
    /// certificate that does not parse.
    pub fn from_pem(pem_data: &[u8]) -> Result<Vec<Self>> {
        let blocks =
            ::pem::parse_many(pem_data).map_err(|e| ModelError::MalformedCertificate(e.to_string()))?;
        let certificates = blocks
            .iter()
            .filter(|block| block.tag() == PEM_CERTIFICATE_TAG)
            .map(|block| Self::from_der(block.contents()))
            .collect::<Result<Vec<_>>>()?;
        if certificates.is_empty() {
            return Err(ModelError::MalformedCertificate(
                "no CERTIFICATE block found".to_string(),
            ));
        }
        Ok(certificates)
    }

    /// Parse PEM (one or more blocks) or a single DER certificate
    ///
    /// # Errors
    ///
    /// See [`Certificate::from_pem`] and [`Certificate::from_der`].
    pub fn parse_any(data: &[u8]) -> Result<Vec<Self>> {
        if looks_like_pem(data) {
            Self::from_pem(data)
        } else {
            Ok(vec![Self::from_der(data)?])
        }
    }

    pub fn der(&self) -> &[u8] {
        &self.der
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn serial(&self) -> &SerialNumber {
        &self.serial
    }

    pub fn not_before(&self) -> DateTime<Utc> {
        self.not_before
    }

    pub fn not_after(&self) -> DateTime<Utc> {
        self.not_after
    }

    /// SHA-256 of the DER encoding, lowercase hex
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// `None` when the certificate has no key usage extension
    pub fn key_usage(&self) -> Option<&BTreeSet<KeyUsageBit>> {
        self.key_usage.as_ref()
    }

    pub fn has_key_usage(&self, bit: KeyUsageBit) -> bool {
        self.key_usage.as_ref().is_some_and(|bits| bits.contains(&bit))
    }

    pub fn policies(&self) -> &[String] {
        &self.policies
    }

    pub fn is_qc_compliant(&self) -> bool {
        self.qc_compliant
    }

    pub fn crl_distribution_points(&self) -> &[String] {
        &self.crl_distribution_points
    }

    pub fn is_ca(&self) -> bool {
        self.is_ca
    }

    pub fn is_self_issued(&self) -> bool {
        self.subject == self.issuer
    }

    pub fn is_valid_at(&self, at: DateTime<Utc>) -> bool {
        self.not_before <= at && at <= self.not_after
    }

    /// Check that `issuer` names and signed this certificate
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::SignatureInvalid`] on a name mismatch or a failed
    /// signature check.
    pub fn verify_issued_by(&self, issuer: &Certificate) -> Result<()> {
        if self.issuer != issuer.subject {
            return Err(ModelError::SignatureInvalid(format!(
                "issuer '{}' does not match '{}'",
                self.issuer, issuer.subject
            )));
        }
        let (_, child) = X509Certificate::from_der(&self.der)
            .map_err(|e| ModelError::MalformedCertificate(e.to_string()))?;
        let (_, parent) = X509Certificate::from_der(&issuer.der)
            .map_err(|e| ModelError::MalformedCertificate(e.to_string()))?;
        child
            .verify_signature(Some(parent.public_key()))
            .map_err(|e| ModelError::SignatureInvalid(e.to_string()))
    }
}

impl PartialEq for Certificate {
    fn eq(&self, other: &Self) -> bool {
        self.der == other.der
    }
}

impl Eq for Certificate {}

impl std::hash::Hash for Certificate {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.der.hash(state);
    }
}

impl fmt::Debug for Certificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Certificate")
            .field("subject", &self.subject)
            .field("issuer", &self.issuer)
            .field("serial", &self.serial)
            .field("not_after", &self.not_after)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Certificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (serial {})", self.subject, self.serial)
    }
}

impl From<Certificate> for String {
    fn from(cert: Certificate) -> Self {
        base64::engine::general_purpose::STANDARD.encode(&cert.der)
    }
}

impl TryFrom<String> for Certificate {
    type Error = ModelError;

    fn try_from(value: String) -> Result<Self> {
        let der = base64::engine::general_purpose::STANDARD
            .decode(value.trim())
            .map_err(|e| ModelError::MalformedCertificate(e.to_string()))?;
        Self::from_der(&der)
    }
}

pub(crate) fn to_datetime(timestamp: i64) -> Result<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp(timestamp, 0)
        .ok_or_else(|| ModelError::MalformedCertificate(format!("timestamp out of range: {timestamp}")))
}

pub(crate) fn looks_like_pem(data: &[u8]) -> bool {
    data.windows(11).any(|window| window == b"-----BEGIN ")
}

/// QCStatements ::= SEQUENCE OF SEQUENCE { statementId OID, statementInfo ANY OPTIONAL }
fn has_qc_compliance(value: &[u8]) -> bool {
    let Ok((_, statements)) = parse_der(value) else {
        return false;
    };
    let Ok(statements) = statements.as_sequence() else {
        return false;
    };
    statements.iter().any(|statement| {
        statement
            .as_sequence()
            .ok()
            .and_then(|fields| fields.first())
            .and_then(|id| id.as_oid().ok())
            .is_some_and(|oid| oid.to_id_string() == QC_COMPLIANCE_OID)
    })
}
