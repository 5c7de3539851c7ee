//! Chain validation against generated PKIs
//!
//! Each test builds real certificates and signed CRLs with rcgen, harvests
//! them through an in-memory fetcher and runs the trust linker.

mod common;

use common::*;
use config_engine::FailurePolicy;
use rcgen::KeyUsagePurpose;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use trust_engine::*;
use trust_model::{
    Certificate, CertificateAuthority, CertificateConstraint, KeyUsageBit, SerialNumber, TrustDomain, TrustPoint,
};

struct Fixture {
    clock: Arc<ManualClock>,
    fetcher: Arc<MapFetcher>,
    cache: Arc<RevocationCache>,
    drift: Arc<ClockDriftDetector>,
    harvester: Harvester,
    queue: HarvestQueue,
    requests: UnboundedReceiver<HarvestRequest>,
}

impl Fixture {
    fn new() -> Self {
        Self::with_drift(false)
    }

    fn with_drift(enabled: bool) -> Self {
        let clock = Arc::new(ManualClock::new(at(2024, 1, 2)));
        let fetcher = MapFetcher::new();
        let cache = Arc::new(RevocationCache::new());
        let drift = detector(&clock, enabled);
        let harvester = Harvester::new(
            Arc::clone(&fetcher) as Arc<dyn CrlFetcher>,
            Arc::clone(&cache),
            Arc::clone(&drift),
        );
        let (queue, requests) = HarvestQueue::channel();
        Self {
            clock,
            fetcher,
            cache,
            drift,
            harvester,
            queue,
            requests,
        }
    }

    fn linker(&self, policy: ValidationPolicy) -> TrustLinker {
        TrustLinker::new(
            Arc::clone(&self.cache),
            Arc::clone(&self.drift),
            Some(self.queue.clone()),
            policy,
        )
    }

    async fn harvest(&self, ca: &TestCa, crl: Vec<u8>, trust_point: &str, root: bool) -> HarvestOutcome {
        self.fetcher.publish(ca, crl);
        let authority = if root {
            CertificateAuthority::root(ca.certificate(), Some(crl_url(&ca.name)))
        } else {
            CertificateAuthority::subordinate(ca.certificate(), trust_point).with_crl_url(Some(crl_url(&ca.name)))
        };
        self.harvester.harvest_authority(&authority).await
    }
}

fn domain(root: &TestCa, constraints: Vec<CertificateConstraint>) -> TrustDomainView {
    let trust_point = TrustPoint::new(root.certificate(), "0 0 3 * * ?");
    let mut domain = TrustDomain::new("authentication").with_default(true);
    domain.add_trust_point(&trust_point.name);
    for constraint in constraints {
        domain.add_constraint(constraint);
    }
    TrustDomainView::new(domain, vec![trust_point])
}

fn digital_signature_required() -> Vec<CertificateConstraint> {
    vec![CertificateConstraint::key_usage(KeyUsageBit::DigitalSignature, true)]
}

#[tokio::test]
async fn test_newer_crl_without_serial_unrevokes() {
    let fixture = Fixture::new();
    let root = TestCa::root("RootCA");
    let leaf = root.leaf("Alice", 1, vec![KeyUsagePurpose::DigitalSignature]);
    let chain = vec![leaf, root.certificate()];
    let view = domain(&root, vec![]);
    let linker = fixture.linker(ValidationPolicy::default());

    let first = fixture.harvest(&root, root.crl(1, &[1], DAY), &root.subject(), true).await;
    assert!(first.is_applied());
    assert_eq!(
        fixture.cache.is_revoked("CN=RootCA", &SerialNumber::from(1), at(2024, 1, 2)),
        trust_model::RevocationStatus::Revoked {
            date: chrono::TimeZone::with_ymd_and_hms(&chrono::Utc, 2024, 1, 1, 0, 0, 0).unwrap()
        }
    );
    let decision = linker.validate(&chain, &view);
    assert_eq!(decision.reason().map(DistrustReason::kind), Some("revoked"));

    let second = fixture.harvest(&root, root.crl(2, &[], DAY), &root.subject(), true).await;
    assert!(second.is_applied());
    assert_eq!(linker.validate(&chain, &view), TrustDecision::Trusted);
}

#[tokio::test]
async fn test_three_certificate_chain_is_trusted() {
    let fixture = Fixture::new();
    let root = TestCa::root("RootCA");
    let citizen = TestCa::intermediate("CitizenCA", &root);
    let leaf = citizen.leaf("Alice", 42, vec![KeyUsagePurpose::DigitalSignature]);
    let chain = vec![leaf, citizen.certificate(), root.certificate()];

    fixture.harvest(&root, root.crl(1, &[], DAY), &root.subject(), true).await;
    fixture.harvest(&citizen, citizen.crl(1, &[7], DAY), &root.subject(), false).await;

    let linker = fixture.linker(ValidationPolicy::default());
    let decision = linker.validate(&chain, &domain(&root, digital_signature_required()));
    assert_eq!(decision, TrustDecision::Trusted);
}

#[tokio::test]
async fn test_chain_without_root_is_completed_from_trust_point() {
    let fixture = Fixture::new();
    let root = TestCa::root("RootCA");
    let leaf = root.leaf("Alice", 3, vec![KeyUsagePurpose::DigitalSignature]);
    fixture.harvest(&root, root.crl(1, &[], DAY), &root.subject(), true).await;

    let linker = fixture.linker(ValidationPolicy::default());
    assert!(linker.validate(&[leaf], &domain(&root, vec![])).is_trusted());
}

#[tokio::test]
async fn test_unknown_revocation_fails_closed_and_requests_harvest() {
    let mut fixture = Fixture::new();
    let root = TestCa::root("RootCA");
    let citizen = TestCa::intermediate("CitizenCA", &root);
    let leaf = citizen.leaf("Alice", 42, vec![KeyUsagePurpose::DigitalSignature]);
    let chain = vec![leaf, citizen.certificate(), root.certificate()];
    fixture.harvest(&root, root.crl(1, &[], DAY), &root.subject(), true).await;

    let linker = fixture.linker(ValidationPolicy::default());
    let decision = linker.validate(&chain, &domain(&root, vec![]));
    assert_eq!(
        decision,
        TrustDecision::Distrusted(DistrustReason::RevocationUnknown {
            issuer: "CN=CitizenCA".to_string()
        })
    );

    let request = fixture.requests.try_recv().unwrap();
    assert_eq!(request.trust_point, "CN=RootCA");
    assert_eq!(request.trigger, HarvestTrigger::RevocationUnknown);
    assert_eq!(
        request.authority.as_ref().map(Certificate::subject),
        Some("CN=CitizenCA")
    );
    // located by the leaf, not by CitizenCA's own distribution point
    assert_eq!(request.crl_url, Some(crl_url("CitizenCA")));
}

#[tokio::test]
async fn test_unknown_revocation_fail_open() {
    let fixture = Fixture::new();
    let root = TestCa::root("RootCA");
    let leaf = root.leaf("Alice", 1, vec![KeyUsagePurpose::DigitalSignature]);

    let policy = ValidationPolicy {
        revocation_unknown: FailurePolicy::FailOpen,
        ..ValidationPolicy::default()
    };
    let decision = fixture
        .linker(policy)
        .validate(&[leaf, root.certificate()], &domain(&root, vec![]));
    assert!(decision.is_trusted());
    assert_eq!(fixture.queue.pending(), 1);
}

#[tokio::test]
async fn test_foreign_root_is_untrusted() {
    let fixture = Fixture::new();
    let root = TestCa::root("RootCA");
    let other = TestCa::root("OtherRootCA");
    let leaf = other.leaf("Mallory", 1, vec![KeyUsagePurpose::DigitalSignature]);

    let decision = fixture
        .linker(ValidationPolicy::default())
        .validate(&[leaf, other.certificate()], &domain(&root, vec![]));
    assert_eq!(
        decision,
        TrustDecision::Distrusted(DistrustReason::UntrustedRoot {
            subject: "CN=OtherRootCA".to_string()
        })
    );
}

#[tokio::test]
async fn test_mismatched_issuer_breaks_chain() {
    let fixture = Fixture::new();
    let root = TestCa::root("RootCA");
    let other = TestCa::root("OtherRootCA");
    let leaf = other.leaf("Mallory", 1, vec![KeyUsagePurpose::DigitalSignature]);

    let decision = fixture
        .linker(ValidationPolicy::default())
        .validate(&[leaf, root.certificate()], &domain(&root, vec![]));
    assert!(matches!(
        decision,
        TrustDecision::Distrusted(DistrustReason::BrokenChain { index: 0, .. })
    ));
}

#[tokio::test]
async fn test_empty_chain() {
    let fixture = Fixture::new();
    let root = TestCa::root("RootCA");
    let decision = fixture
        .linker(ValidationPolicy::default())
        .validate(&[], &domain(&root, vec![]));
    assert_eq!(decision, TrustDecision::Distrusted(DistrustReason::EmptyChain));
}

#[tokio::test]
async fn test_expired_leaf() {
    let fixture = Fixture::new();
    let root = TestCa::root("RootCA");
    let leaf = root.leaf_expiring("Alice", 1, (2023, 12, 31));
    fixture.harvest(&root, root.crl(1, &[], DAY), &root.subject(), true).await;

    let decision = fixture
        .linker(ValidationPolicy::default())
        .validate(&[leaf, root.certificate()], &domain(&root, vec![]));
    assert_eq!(
        decision.reason().map(DistrustReason::kind),
        Some("expired")
    );
}

#[tokio::test]
async fn test_key_usage_constraint_violation() {
    let fixture = Fixture::new();
    let root = TestCa::root("RootCA");
    let signing = root.leaf("Alice", 5, vec![KeyUsagePurpose::ContentCommitment]);
    fixture.harvest(&root, root.crl(1, &[], DAY), &root.subject(), true).await;

    let decision = fixture
        .linker(ValidationPolicy::default())
        .validate(&[signing, root.certificate()], &domain(&root, digital_signature_required()));
    assert_eq!(
        decision,
        TrustDecision::Distrusted(DistrustReason::ConstraintViolation {
            constraint: "key usage digital_signature required".to_string()
        })
    );
}

#[tokio::test]
async fn test_clock_out_of_tolerance_fails_closed() {
    let fixture = Fixture::with_drift(true);
    let root = TestCa::root("RootCA");
    let leaf = root.leaf("Alice", 1, vec![KeyUsagePurpose::DigitalSignature]);
    fixture.harvest(&root, root.crl(1, &[], DAY), &root.subject(), true).await;
    fixture.drift.set_offset(60_000);

    let chain = vec![leaf, root.certificate()];
    let decision = fixture
        .linker(ValidationPolicy::default())
        .validate(&chain, &domain(&root, vec![]));
    assert_eq!(
        decision,
        TrustDecision::Distrusted(DistrustReason::ClockUntrusted { offset_millis: 60_000 })
    );

    let lenient = ValidationPolicy {
        clock_untrusted: FailurePolicy::FailOpen,
        ..ValidationPolicy::default()
    };
    assert!(fixture.linker(lenient).validate(&chain, &domain(&root, vec![])).is_trusted());
}

#[tokio::test]
async fn test_stale_revocation_data_triggers_refresh() {
    let mut fixture = Fixture::new();
    let root = TestCa::root("RootCA");
    let leaf = root.leaf("Alice", 1, vec![KeyUsagePurpose::DigitalSignature]);
    fixture.harvest(&root, root.crl(1, &[], DAY), &root.subject(), true).await;

    let policy = ValidationPolicy {
        max_revocation_age: Some(chrono::Duration::hours(1)),
        ..ValidationPolicy::default()
    };
    let linker = fixture.linker(policy);
    let chain = vec![leaf, root.certificate()];

    assert!(linker.validate(&chain, &domain(&root, vec![])).is_trusted());
    assert!(fixture.requests.try_recv().is_err());

    fixture.clock.advance(chrono::Duration::hours(2));
    assert!(linker.validate(&chain, &domain(&root, vec![])).is_trusted());
    let request = fixture.requests.try_recv().unwrap();
    assert_eq!(request.trigger, HarvestTrigger::Stale);
    assert!(request.authority.is_none());
    assert_eq!(request.crl_url, Some(crl_url("RootCA")));
}
