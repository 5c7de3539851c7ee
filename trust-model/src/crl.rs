use crate::certificate::{looks_like_pem, to_datetime, Certificate};
use crate::error::{ModelError, Result};
use crate::numbers::{CrlNumber, SerialNumber};
use chrono::{DateTime, Utc};
use x509_parser::prelude::*;
use x509_parser::revocation_list::CertificateRevocationList;

const PEM_CRL_TAG: &str = "X509 CRL";

/// One entry of a CRL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevokedEntry {
    pub serial: SerialNumber,
    pub revocation_date: DateTime<Utc>,
}

/// Owned, parsed certificate revocation list
#[derive(Debug, Clone)]
pub struct RevocationList {
    der: Vec<u8>,
    issuer: String,
    crl_number: CrlNumber,
    this_update: DateTime<Utc>,
    next_update: Option<DateTime<Utc>>,
    entries: Vec<RevokedEntry>,
}

impl RevocationList {
    /// Parse a DER encoded CRL; a CRL number extension is mandatory
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::MalformedCrl`] for undecodable input or a missing CRL number.
    pub fn from_der(der: &[u8]) -> Result<Self> {
        let (_, crl) = CertificateRevocationList::from_der(der)
            .map_err(|e| ModelError::MalformedCrl(e.to_string()))?;

        let crl_number = crl
            .crl_number()
            .map(|n| CrlNumber::from_be_bytes(&n.to_bytes_be()))
            .ok_or_else(|| ModelError::MalformedCrl("missing CRL number extension".to_string()))?;

        let this_update = crl_time(crl.last_update().timestamp())?;
        let next_update = crl
            .next_update()
            .map(|t| crl_time(t.timestamp()))
            .transpose()?;

        let entries = crl
            .iter_revoked_certificates()
            .map(|revoked| {
                Ok(RevokedEntry {
                    serial: SerialNumber::from_be_bytes(&revoked.serial().to_bytes_be()),
                    revocation_date: crl_time(revoked.revocation_date.timestamp())?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            der: der.to_vec(),
            issuer: crl.issuer().to_string(),
            crl_number,
            this_update,
            next_update,
            entries,
        })
    }

    /// Accept either DER or a PEM `X509 CRL` block
    ///
    /// # Errors
    ///
    /// See [`RevocationList::from_der`].
    pub fn parse_any(data: &[u8]) -> Result<Self> {
        if !looks_like_pem(data) {
            return Self::from_der(data);
        }
        let block = ::pem::parse_many(data)
            .map_err(|e| ModelError::MalformedCrl(e.to_string()))?
            .into_iter()
            .find(|block| block.tag() == PEM_CRL_TAG)
            .ok_or_else(|| ModelError::MalformedCrl("no X509 CRL block found".to_string()))?;
        Self::from_der(block.contents())
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn crl_number(&self) -> &CrlNumber {
        &self.crl_number
    }

    pub fn this_update(&self) -> DateTime<Utc> {
        self.this_update
    }

    pub fn next_update(&self) -> Option<DateTime<Utc>> {
        self.next_update
    }

    pub fn entries(&self) -> &[RevokedEntry] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<RevokedEntry> {
        self.entries
    }

    /// `this_update <= now`, and `now <= next_update` when present
    pub fn is_current_at(&self, now: DateTime<Utc>) -> bool {
        self.this_update <= now && self.next_update.map_or(true, |next| now <= next)
    }

    /// Check the CRL was issued and signed by `issuer`
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::SignatureInvalid`] on an issuer name mismatch or a
    /// bad signature.
    pub fn verify_signature(&self, issuer: &Certificate) -> Result<()> {
        if self.issuer != issuer.subject() {
            return Err(ModelError::SignatureInvalid(format!(
                "CRL issued by '{}', expected '{}'",
                self.issuer,
                issuer.subject()
            )));
        }
        let (_, crl) = CertificateRevocationList::from_der(&self.der)
            .map_err(|e| ModelError::MalformedCrl(e.to_string()))?;
        let (_, ca) = X509Certificate::from_der(issuer.der())
            .map_err(|e| ModelError::MalformedCertificate(e.to_string()))?;
        crl.verify_signature(ca.public_key())
            .map_err(|e| ModelError::SignatureInvalid(e.to_string()))
    }
}

fn crl_time(timestamp: i64) -> Result<DateTime<Utc>> {
    to_datetime(timestamp).map_err(|_| ModelError::MalformedCrl(format!("timestamp out of range: {timestamp}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rcgen::{
        BasicConstraints, CertificateParams, CertificateRevocationListParams, DistinguishedName,
        DnType, IsCa, KeyIdMethod, KeyPair, KeyUsagePurpose, RevokedCertParams,
        SerialNumber as RcgenSerial,
    };

    fn issuer(name: &str) -> (rcgen::Certificate, KeyPair) {
        let key = KeyPair::generate().unwrap();
        let mut params = CertificateParams::new(vec![]).unwrap();
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, name);
        params.distinguished_name = dn;
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];
        let cert = params.self_signed(&key).unwrap();
        (cert, key)
    }

    fn crl(issuer: &rcgen::Certificate, key: &KeyPair, number: u64, revoked: &[u8]) -> Vec<u8> {
        let params = CertificateRevocationListParams {
            this_update: rcgen::date_time_ymd(2024, 1, 1),
            next_update: rcgen::date_time_ymd(2024, 2, 1),
            crl_number: RcgenSerial::from(number),
            issuing_distribution_point: None,
            revoked_certs: revoked
                .iter()
                .map(|serial| RevokedCertParams {
                    serial_number: RcgenSerial::from_slice(&[*serial]),
                    revocation_time: rcgen::date_time_ymd(2024, 1, 1),
                    reason_code: None,
                    invalidity_date: None,
                })
                .collect(),
            key_identifier_method: KeyIdMethod::Sha256,
        };
        params.signed_by(issuer, key).unwrap().der().to_vec()
    }

    #[test]
    fn test_parse_crl_fields() {
        let (ca, key) = issuer("RootCA");
        let list = RevocationList::from_der(&crl(&ca, &key, 7, &[0x01, 0x05])).unwrap();

        assert_eq!(list.issuer(), "CN=RootCA");
        assert_eq!(list.crl_number(), &CrlNumber::from(7));
        assert_eq!(list.entries().len(), 2);
        assert_eq!(list.entries()[0].serial, SerialNumber::from(1));
        assert_eq!(
            list.entries()[0].revocation_date,
            DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z").unwrap()
        );
    }

    #[test]
    fn test_currency_window() {
        let (ca, key) = issuer("RootCA");
        let list = RevocationList::from_der(&crl(&ca, &key, 1, &[])).unwrap();
        let inside = DateTime::parse_from_rfc3339("2024-01-15T00:00:00Z").unwrap().with_timezone(&Utc);
        let before = DateTime::parse_from_rfc3339("2023-12-31T00:00:00Z").unwrap().with_timezone(&Utc);
        let after = DateTime::parse_from_rfc3339("2024-02-02T00:00:00Z").unwrap().with_timezone(&Utc);

        assert!(list.is_current_at(inside));
        assert!(!list.is_current_at(before));
        assert!(!list.is_current_at(after));
    }

    #[test]
    fn test_signature_checked_against_issuer() {
        let (ca, key) = issuer("RootCA");
        let (impostor, _) = issuer("RootCA");
        let list = RevocationList::from_der(&crl(&ca, &key, 1, &[0x01])).unwrap();

        let ca = Certificate::from_der(ca.der()).unwrap();
        let impostor = Certificate::from_der(impostor.der()).unwrap();
        assert!(list.verify_signature(&ca).is_ok());
        assert!(matches!(
            list.verify_signature(&impostor),
            Err(ModelError::SignatureInvalid(_))
        ));
    }

    #[test]
    fn test_pem_crl_parsed() {
        let (ca, key) = issuer("RootCA");
        let der = crl(&ca, &key, 3, &[0x02]);
        let armored = ::pem::encode(&::pem::Pem::new(PEM_CRL_TAG, der.clone()));

        let list = RevocationList::parse_any(armored.as_bytes()).unwrap();
        assert_eq!(list.crl_number(), &CrlNumber::from(3));
        assert_eq!(list.entries(), RevocationList::from_der(&der).unwrap().entries());
    }

    #[test]
    fn test_garbage_crl_rejected() {
        assert!(matches!(
            RevocationList::parse_any(b"garbage"),
            Err(ModelError::MalformedCrl(_))
        ));
    }
}
