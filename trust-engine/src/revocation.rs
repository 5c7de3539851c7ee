//! Per-issuer revocation sets
//!
//! Each issuer maps to an immutable [`RevocationSet`] behind an `Arc`. A newer
//! CRL replaces the whole set in one shard-locked swap, so readers observe
//! either the previous CRL or the new one, never a mix.

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};
use trust_model::{CrlNumber, RevocationStatus, RevokedCertificateRecord, RevokedEntry, SerialNumber};

/// Result of [`RevocationCache::replace_revocation_set`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplaceOutcome {
    Applied,
    /// The CRL number was not greater than the stored one; nothing changed
    Stale,
}

/// Contents of one CRL for one issuer
#[derive(Debug, Clone)]
pub struct RevocationSet {
    pub issuer: String,
    pub crl_number: CrlNumber,
    /// When this set was applied
    pub refreshed_at: DateTime<Utc>,
    /// Last time a harvest confirmed this set is still the newest
    pub checked_at: DateTime<Utc>,
    entries: HashMap<SerialNumber, DateTime<Utc>>,
}

impl RevocationSet {
    fn new(issuer: &str, crl_number: CrlNumber, entries: Vec<RevokedEntry>, at: DateTime<Utc>) -> Self {
        let mut revoked = HashMap::with_capacity(entries.len());
        for entry in entries {
            revoked.entry(entry.serial).or_insert(entry.revocation_date);
        }
        Self {
            issuer: issuer.to_string(),
            crl_number,
            refreshed_at: at,
            checked_at: at,
            entries: revoked,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn revocation_date(&self, serial: &SerialNumber) -> Option<DateTime<Utc>> {
        self.entries.get(serial).copied()
    }
}

/// Serializable form of a [`RevocationSet`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevocationSnapshot {
    pub issuer: String,
    pub crl_number: CrlNumber,
    pub refreshed_at: DateTime<Utc>,
    pub checked_at: DateTime<Utc>,
    pub entries: Vec<RevokedEntrySnapshot>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevokedEntrySnapshot {
    pub serial: SerialNumber,
    pub revocation_date: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct RevocationCache {
    sets: DashMap<String, Arc<RevocationSet>>,
}

impl RevocationCache {
    pub fn new() -> Self {
        Self::default()
    }

    // =============================================================================
    // Queries
    // =============================================================================

    /// Revocation status of `serial` as seen at `as_of`
    ///
    /// `Unknown` only when no CRL was ever applied for `issuer`. An entry whose
    /// revocation date lies after `as_of` does not count yet.
    pub fn is_revoked(&self, issuer: &str, serial: &SerialNumber, as_of: DateTime<Utc>) -> RevocationStatus {
        let Some(set) = self.get(issuer) else {
            return RevocationStatus::Unknown;
        };
        match set.revocation_date(serial) {
            Some(date) if date <= as_of => RevocationStatus::Revoked { date },
            _ => RevocationStatus::NotRevoked,
        }
    }

    pub fn last_refreshed(&self, issuer: &str) -> Option<DateTime<Utc>> {
        self.get(issuer).map(|set| set.refreshed_at)
    }

    pub fn last_checked(&self, issuer: &str) -> Option<DateTime<Utc>> {
        self.get(issuer).map(|set| set.checked_at)
    }

    pub fn crl_number(&self, issuer: &str) -> Option<CrlNumber> {
        self.get(issuer).map(|set| set.crl_number.clone())
    }

    pub fn get(&self, issuer: &str) -> Option<Arc<RevocationSet>> {
        self.sets.get(issuer).map(|entry| Arc::clone(entry.value()))
    }

    /// Current set as records, ordered by serial
    pub fn records(&self, issuer: &str) -> Vec<RevokedCertificateRecord> {
        let Some(set) = self.get(issuer) else {
            return Vec::new();
        };
        let mut records: Vec<RevokedCertificateRecord> = set
            .entries
            .iter()
            .map(|(serial, date)| RevokedCertificateRecord {
                issuer: set.issuer.clone(),
                serial: serial.clone(),
                crl_number: set.crl_number.clone(),
                revocation_date: *date,
            })
            .collect();
        records.sort_by(|a, b| a.serial.cmp(&b.serial));
        records
    }

    pub fn issuers(&self) -> Vec<String> {
        let mut issuers: Vec<String> = self.sets.iter().map(|entry| entry.key().clone()).collect();
        issuers.sort();
        issuers
    }

    pub fn total_entries(&self) -> usize {
        self.sets.iter().map(|entry| entry.value().len()).sum()
    }

    // =============================================================================
    // Mutations
    // =============================================================================

    /// Swap in the contents of a newer CRL for `issuer`
    ///
    /// Applied only when `crl_number` is strictly greater than the stored one;
    /// the comparison and the swap happen under the same shard lock.
    pub fn replace_revocation_set(
        &self,
        issuer: &str,
        crl_number: CrlNumber,
        entries: Vec<RevokedEntry>,
        at: DateTime<Utc>,
    ) -> ReplaceOutcome {
        let outcome = match self.sets.entry(issuer.to_string()) {
            Entry::Occupied(mut occupied) => {
                if crl_number <= occupied.get().crl_number {
                    debug!(
                        issuer,
                        current = %occupied.get().crl_number,
                        offered = %crl_number,
                        "Ignoring stale CRL"
                    );
                    return ReplaceOutcome::Stale;
                }
                occupied.insert(Arc::new(RevocationSet::new(issuer, crl_number.clone(), entries, at)));
                ReplaceOutcome::Applied
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Arc::new(RevocationSet::new(issuer, crl_number.clone(), entries, at)));
                ReplaceOutcome::Applied
            }
        };

        info!(issuer, crl_number = %crl_number, "Applied revocation set");
        metrics::gauge!(telemetry::REVOKED_ENTRIES).set(self.total_entries() as f64);
        outcome
    }

    /// Record that a harvest re-confirmed the current CRL number
    ///
    /// Only the confirmation timestamp moves; the revocation data is untouched.
    pub fn mark_checked(&self, issuer: &str, crl_number: &CrlNumber, at: DateTime<Utc>) -> bool {
        if let Some(mut entry) = self.sets.get_mut(issuer) {
            if &entry.crl_number == crl_number && entry.checked_at < at {
                let mut confirmed = RevocationSet::clone(entry.value());
                confirmed.checked_at = at;
                *entry.value_mut() = Arc::new(confirmed);
                return true;
            }
        }
        false
    }

    pub fn remove_issuer(&self, issuer: &str) -> bool {
        self.sets.remove(issuer).is_some()
    }

    // =============================================================================
    // Persistence
    // =============================================================================

    pub fn snapshot(&self) -> Vec<RevocationSnapshot> {
        let mut snapshots: Vec<RevocationSnapshot> = self
            .sets
            .iter()
            .map(|entry| {
                let set = entry.value();
                let mut entries: Vec<RevokedEntrySnapshot> = set
                    .entries
                    .iter()
                    .map(|(serial, date)| RevokedEntrySnapshot {
                        serial: serial.clone(),
                        revocation_date: *date,
                    })
                    .collect();
                entries.sort_by(|a, b| a.serial.cmp(&b.serial));
                RevocationSnapshot {
                    issuer: set.issuer.clone(),
                    crl_number: set.crl_number.clone(),
                    refreshed_at: set.refreshed_at,
                    checked_at: set.checked_at,
                    entries,
                }
            })
            .collect();
        snapshots.sort_by(|a, b| a.issuer.cmp(&b.issuer));
        snapshots
    }

    /// Load persisted sets; each one still obeys the monotonic CRL number rule
    pub fn restore(&self, snapshots: Vec<RevocationSnapshot>) -> usize {
        let mut restored = 0usize;
        for snapshot in snapshots {
            let entries = snapshot
                .entries
                .into_iter()
                .map(|entry| RevokedEntry {
                    serial: entry.serial,
                    revocation_date: entry.revocation_date,
                })
                .collect();
            let outcome = self.replace_revocation_set(
                &snapshot.issuer,
                snapshot.crl_number.clone(),
                entries,
                snapshot.refreshed_at,
            );
            if outcome == ReplaceOutcome::Applied {
                self.mark_checked(&snapshot.issuer, &snapshot.crl_number, snapshot.checked_at);
                restored = restored.saturating_add(1);
            }
        }
        restored
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(year: i32, month: u32, day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(year, month, day, 0, 0, 0).unwrap()
    }

    fn revoked(serial: u64, date: DateTime<Utc>) -> RevokedEntry {
        RevokedEntry {
            serial: SerialNumber::from(serial),
            revocation_date: date,
        }
    }

    #[test]
    fn test_unknown_until_first_crl() {
        let cache = RevocationCache::new();
        assert_eq!(
            cache.is_revoked("CN=RootCA", &SerialNumber::from(1), at(2024, 1, 2)),
            RevocationStatus::Unknown
        );
        assert!(cache.last_refreshed("CN=RootCA").is_none());
    }

    #[test]
    fn test_newer_crl_replaces_whole_set() {
        let cache = RevocationCache::new();
        let revoked_on = at(2024, 1, 1);

        let first = cache.replace_revocation_set(
            "CN=RootCA",
            CrlNumber::from(1),
            vec![revoked(1, revoked_on)],
            at(2024, 1, 1),
        );
        assert_eq!(first, ReplaceOutcome::Applied);
        assert_eq!(
            cache.is_revoked("CN=RootCA", &SerialNumber::from(1), at(2024, 1, 2)),
            RevocationStatus::Revoked { date: revoked_on }
        );

        let second =
            cache.replace_revocation_set("CN=RootCA", CrlNumber::from(2), vec![], at(2024, 1, 3));
        assert_eq!(second, ReplaceOutcome::Applied);
        assert_eq!(
            cache.is_revoked("CN=RootCA", &SerialNumber::from(1), at(2024, 1, 4)),
            RevocationStatus::NotRevoked
        );
        assert_eq!(cache.last_refreshed("CN=RootCA"), Some(at(2024, 1, 3)));
    }

    #[test]
    fn test_older_or_equal_crl_is_stale() {
        let cache = RevocationCache::new();
        cache.replace_revocation_set("CN=RootCA", CrlNumber::from(5), vec![], at(2024, 1, 5));

        let older = cache.replace_revocation_set(
            "CN=RootCA",
            CrlNumber::from(3),
            vec![revoked(9, at(2024, 1, 1))],
            at(2024, 1, 6),
        );
        let equal = cache.replace_revocation_set(
            "CN=RootCA",
            CrlNumber::from(5),
            vec![revoked(9, at(2024, 1, 1))],
            at(2024, 1, 6),
        );

        assert_eq!(older, ReplaceOutcome::Stale);
        assert_eq!(equal, ReplaceOutcome::Stale);
        assert_eq!(cache.crl_number("CN=RootCA"), Some(CrlNumber::from(5)));
        assert_eq!(cache.last_refreshed("CN=RootCA"), Some(at(2024, 1, 5)));
        assert!(cache.records("CN=RootCA").is_empty());
    }

    #[test]
    fn test_future_revocation_not_yet_effective() {
        let cache = RevocationCache::new();
        cache.replace_revocation_set(
            "CN=RootCA",
            CrlNumber::from(1),
            vec![revoked(7, at(2024, 6, 1))],
            at(2024, 1, 1),
        );
        assert_eq!(
            cache.is_revoked("CN=RootCA", &SerialNumber::from(7), at(2024, 5, 1)),
            RevocationStatus::NotRevoked
        );
        assert!(cache
            .is_revoked("CN=RootCA", &SerialNumber::from(7), at(2024, 6, 2))
            .is_revoked());
    }

    #[test]
    fn test_issuers_are_independent() {
        let cache = RevocationCache::new();
        cache.replace_revocation_set(
            "CN=RootCA",
            CrlNumber::from(1),
            vec![revoked(1, at(2024, 1, 1))],
            at(2024, 1, 1),
        );
        assert_eq!(
            cache.is_revoked("CN=CitizenCA", &SerialNumber::from(1), at(2024, 1, 2)),
            RevocationStatus::Unknown
        );
        assert_eq!(cache.issuers(), vec!["CN=RootCA".to_string()]);
        assert!(cache.remove_issuer("CN=RootCA"));
        assert!(!cache.remove_issuer("CN=RootCA"));
    }

    #[test]
    fn test_mark_checked_only_for_current_number() {
        let cache = RevocationCache::new();
        cache.replace_revocation_set("CN=RootCA", CrlNumber::from(4), vec![], at(2024, 1, 1));

        assert!(!cache.mark_checked("CN=RootCA", &CrlNumber::from(3), at(2024, 1, 2)));
        assert!(cache.mark_checked("CN=RootCA", &CrlNumber::from(4), at(2024, 1, 2)));
        assert_eq!(cache.last_checked("CN=RootCA"), Some(at(2024, 1, 2)));
        assert_eq!(cache.last_refreshed("CN=RootCA"), Some(at(2024, 1, 1)));
    }

    proptest::proptest! {
        #[test]
        fn test_highest_crl_number_wins_in_any_order(
            numbers in proptest::collection::vec(1u64..1000, 1..20)
        ) {
            let cache = RevocationCache::new();
            for number in &numbers {
                cache.replace_revocation_set(
                    "CN=RootCA",
                    CrlNumber::from(*number),
                    vec![revoked(*number, at(2024, 1, 1))],
                    at(2024, 1, 2),
                );
            }

            let highest = numbers.iter().copied().max().unwrap();
            proptest::prop_assert_eq!(cache.crl_number("CN=RootCA"), Some(CrlNumber::from(highest)));
            let records = cache.records("CN=RootCA");
            proptest::prop_assert_eq!(records.len(), 1);
            proptest::prop_assert_eq!(&records[0].serial, &SerialNumber::from(highest));
        }
    }

    #[test]
    fn test_snapshot_restore() {
        let cache = RevocationCache::new();
        cache.replace_revocation_set(
            "CN=RootCA",
            CrlNumber::from(2),
            vec![revoked(1, at(2024, 1, 1)), revoked(3, at(2024, 1, 1))],
            at(2024, 1, 2),
        );
        cache.mark_checked("CN=RootCA", &CrlNumber::from(2), at(2024, 1, 9));

        let restored = RevocationCache::new();
        assert_eq!(restored.restore(cache.snapshot()), 1);
        assert_eq!(restored.records("CN=RootCA"), cache.records("CN=RootCA"));
        assert_eq!(restored.last_checked("CN=RootCA"), Some(at(2024, 1, 9)));
        assert_eq!(restored.total_entries(), 2);
    }
}
