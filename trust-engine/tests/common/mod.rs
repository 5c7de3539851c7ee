//! Shared fixtures: an rcgen-backed test PKI, an in-memory CRL fetcher and a
//! fixed reference time source.
//!
//! Distribution points follow RFC 5280: a certificate names the CRL of its
//! issuer, and roots carry none.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use rcgen::{
    BasicConstraints, CertificateParams, CertificateRevocationListParams, CrlDistributionPoint, DistinguishedName,
    DnType, IsCa, KeyIdMethod, KeyPair, KeyUsagePurpose, RevokedCertParams, SerialNumber as RcgenSerial,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use trust_engine::{
    ClockDriftDetector, CrlFetcher, FetchError, ManualClock, ReferenceTimeSource, TimeSourceError,
};
use trust_model::{Certificate, ClockDriftConfig, KeyUsageBit, TimeProtocol};

pub const DAY: (i32, u8, u8) = (2024, 1, 1);

pub fn at(year: i32, month: u32, day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, 12, 0, 0).unwrap()
}

pub fn crl_url(name: &str) -> String {
    format!("http://crl.example/{name}.crl")
}

pub struct TestCa {
    pub name: String,
    pub cert: rcgen::Certificate,
    pub key: KeyPair,
}

impl TestCa {
    pub fn root(name: &str) -> Self {
        let key = KeyPair::generate().unwrap();
        let cert = Self::ca_params(name, None).self_signed(&key).unwrap();
        Self {
            name: name.to_string(),
            cert,
            key,
        }
    }

    pub fn intermediate(name: &str, parent: &TestCa) -> Self {
        let key = KeyPair::generate().unwrap();
        let cert = Self::ca_params(name, Some(&parent.name))
            .signed_by(&key, &parent.cert, &parent.key)
            .unwrap();
        Self {
            name: name.to_string(),
            cert,
            key,
        }
    }

    fn ca_params(name: &str, parent: Option<&str>) -> CertificateParams {
        let mut params = CertificateParams::new(vec![]).unwrap();
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, name);
        params.distinguished_name = dn;
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];
        params.crl_distribution_points = parent
            .map(|parent| {
                vec![CrlDistributionPoint {
                    uris: vec![crl_url(parent)],
                }]
            })
            .unwrap_or_default();
        params
    }

    pub fn subject(&self) -> String {
        format!("CN={}", self.name)
    }

    pub fn certificate(&self) -> Certificate {
        Certificate::from_der(self.cert.der()).unwrap()
    }

    pub fn pem(&self) -> String {
        self.cert.pem()
    }

    /// End-entity certificate with the given serial and key usages
    pub fn leaf(&self, common_name: &str, serial: u64, usages: Vec<KeyUsagePurpose>) -> Certificate {
        self.leaf_with(common_name, serial, usages, None)
    }

    pub fn leaf_expiring(
        &self,
        common_name: &str,
        serial: u64,
        not_after: (i32, u8, u8),
    ) -> Certificate {
        self.leaf_with(
            common_name,
            serial,
            vec![KeyUsagePurpose::DigitalSignature],
            Some(not_after),
        )
    }

    fn leaf_with(
        &self,
        common_name: &str,
        serial: u64,
        usages: Vec<KeyUsagePurpose>,
        not_after: Option<(i32, u8, u8)>,
    ) -> Certificate {
        let key = KeyPair::generate().unwrap();
        let mut params = CertificateParams::new(vec![]).unwrap();
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CountryName, "BE");
        dn.push(DnType::CommonName, common_name);
        params.distinguished_name = dn;
        params.serial_number = Some(RcgenSerial::from(serial));
        params.key_usages = usages.clone();
        params.crl_distribution_points = vec![CrlDistributionPoint {
            uris: vec![crl_url(&self.name)],
        }];
        if let Some((year, month, day)) = not_after {
            params.not_before = rcgen::date_time_ymd(2020, 1, 1);
            params.not_after = rcgen::date_time_ymd(year, month, day);
        }
        let cert = params.signed_by(&key, &self.cert, &self.key).unwrap();
        let certificate = Certificate::from_der(cert.der()).unwrap();
        for usage in &usages {
            assert!(
                certificate.has_key_usage(key_usage_bit(usage)),
                "{common_name} lacks {usage:?}"
            );
        }
        certificate
    }

    /// DER CRL valid for a week from `this_update`, revoking `revoked` on 2024-01-01
    pub fn crl(&self, number: u64, revoked: &[u64], this_update: (i32, u8, u8)) -> Vec<u8> {
        let (year, month, day) = this_update;
        let revoked_certs = revoked
            .iter()
            .map(|serial| RevokedCertParams {
                serial_number: RcgenSerial::from(*serial),
                revocation_time: rcgen::date_time_ymd(DAY.0, DAY.1, DAY.2),
                reason_code: None,
                invalidity_date: None,
            })
            .collect();
        CertificateRevocationListParams {
            this_update: rcgen::date_time_ymd(year, month, day),
            next_update: rcgen::date_time_ymd(year, month, day.saturating_add(7)),
            crl_number: RcgenSerial::from(number),
            issuing_distribution_point: None,
            revoked_certs,
            key_identifier_method: KeyIdMethod::Sha256,
        }
        .signed_by(&self.cert, &self.key)
        .unwrap()
        .der()
        .to_vec()
    }
}

fn key_usage_bit(usage: &KeyUsagePurpose) -> KeyUsageBit {
    match usage {
        KeyUsagePurpose::DigitalSignature => KeyUsageBit::DigitalSignature,
        KeyUsagePurpose::ContentCommitment => KeyUsageBit::NonRepudiation,
        KeyUsagePurpose::KeyEncipherment => KeyUsageBit::KeyEncipherment,
        KeyUsagePurpose::DataEncipherment => KeyUsageBit::DataEncipherment,
        KeyUsagePurpose::KeyAgreement => KeyUsageBit::KeyAgreement,
        KeyUsagePurpose::KeyCertSign => KeyUsageBit::KeyCertSign,
        KeyUsagePurpose::CrlSign => KeyUsageBit::CrlSign,
        KeyUsagePurpose::EncipherOnly => KeyUsageBit::EncipherOnly,
        KeyUsagePurpose::DecipherOnly => KeyUsageBit::DecipherOnly,
    }
}

/// Serves CRL bytes by URL
#[derive(Default)]
pub struct MapFetcher {
    bodies: Mutex<HashMap<String, Vec<u8>>>,
}

impl MapFetcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn publish(&self, ca: &TestCa, crl: Vec<u8>) {
        self.bodies.lock().insert(crl_url(&ca.name), crl);
    }
}

#[async_trait]
impl CrlFetcher for MapFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        self.bodies
            .lock()
            .get(url)
            .cloned()
            .ok_or_else(|| FetchError::Http(format!("HTTP 404 Not Found from {url}")))
    }
}

/// Serves one CRL body, holding every fetch until released
pub struct GatedFetcher {
    pub entered: Notify,
    pub release: Notify,
    body: Vec<u8>,
}

impl GatedFetcher {
    pub fn new(body: Vec<u8>) -> Arc<Self> {
        Arc::new(Self {
            entered: Notify::new(),
            release: Notify::new(),
            body,
        })
    }
}

#[async_trait]
impl CrlFetcher for GatedFetcher {
    async fn fetch(&self, _url: &str) -> Result<Vec<u8>, FetchError> {
        self.entered.notify_one();
        self.release.notified().await;
        Ok(self.body.clone())
    }
}

/// Reference time source answering with a fixed offset from a manual clock
pub struct FixedTimeSource {
    pub clock: Arc<ManualClock>,
    pub offset: chrono::Duration,
}

#[async_trait]
impl ReferenceTimeSource for FixedTimeSource {
    async fn reference_time(
        &self,
        _protocol: TimeProtocol,
        _server: &str,
        _timeout: Duration,
    ) -> Result<DateTime<Utc>, TimeSourceError> {
        use trust_engine::Clock;
        Ok(self.clock.now() + self.offset)
    }
}

pub fn drift_config(enabled: bool) -> ClockDriftConfig {
    ClockDriftConfig {
        protocol: TimeProtocol::Ntp,
        server: "pool.ntp.org".to_string(),
        timeout_millis: 1000,
        max_clock_offset_millis: 5000,
        cron: "0 0/5 * * * ?".to_string(),
        enabled,
        offset_millis: 0,
    }
}

pub fn detector(clock: &Arc<ManualClock>, enabled: bool) -> Arc<ClockDriftDetector> {
    let source = FixedTimeSource {
        clock: Arc::clone(clock),
        offset: chrono::Duration::zero(),
    };
    Arc::new(ClockDriftDetector::new(
        Arc::new(source),
        Arc::clone(clock) as Arc<dyn trust_engine::Clock>,
        drift_config(enabled),
    ))
}
