//! Ordered, de-duplicated access-point containers.
//!
//! Three lists share this shape: the per-device scan list, the operator's
//! allowed-configured list, and the session-scoped invalid list. Within a
//! list the bssid is the identity; essids may repeat.

use std::sync::{Arc, Mutex, PoisonError};

use super::access_point::{AccessPoint, MacAddress};

/// What a list's membership means.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApListKind {
    /// Stations sighted by a device's scans.
    DeviceSeen,
    /// Operator-curated configured networks.
    AllowedConfigured,
    /// Networks the operator declined this session.
    Invalid,
}

/// Result of merging one scanned record into a list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// The bssid was new; a record was inserted.
    Inserted,
    /// The bssid was known and its strength changed.
    StrengthChanged,
    /// The bssid was known and nothing observable changed.
    Unchanged,
}

/// Ordered sequence of reference-counted access points, at most one entry
/// per bssid.
#[derive(Debug)]
pub struct AccessPointList {
    kind: ApListKind,
    entries: Mutex<Vec<Arc<AccessPoint>>>,
}

impl AccessPointList {
    /// Creates an empty list of the given kind.
    pub fn new(kind: ApListKind) -> Self {
        Self {
            kind,
            entries: Mutex::new(Vec::new()),
        }
    }

    /// The membership semantics of this list.
    pub fn kind(&self) -> ApListKind {
        self.kind
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Arc<AccessPoint>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends a record. An existing entry with the same bssid is replaced
    /// so the one-entry-per-bssid invariant holds.
    pub fn append(&self, ap: Arc<AccessPoint>) {
        let mut entries = self.lock();
        let bssid = ap.bssid.get();
        // Artificial records carry a zero bssid; those may coexist.
        if bssid.is_valid() {
            entries.retain(|existing| existing.bssid.get() != bssid);
        }
        entries.push(ap);
    }

    /// Removes the given record (pointer identity).
    pub fn remove(&self, ap: &Arc<AccessPoint>) {
        self.lock().retain(|existing| !Arc::ptr_eq(existing, ap));
    }

    /// Removes every record carrying the given essid.
    pub fn remove_by_essid(&self, essid: &str) {
        self.lock()
            .retain(|existing| existing.essid.get().as_deref() != Some(essid));
    }

    /// First record carrying the given essid, if any.
    pub fn get_by_essid(&self, essid: &str) -> Option<Arc<AccessPoint>> {
        self.lock()
            .iter()
            .find(|ap| ap.essid.get().as_deref() == Some(essid))
            .cloned()
    }

    /// The record with the given bssid, if any.
    pub fn get_by_bssid(&self, bssid: MacAddress) -> Option<Arc<AccessPoint>> {
        self.lock()
            .iter()
            .find(|ap| ap.bssid.get() == bssid)
            .cloned()
    }

    /// A point-in-time copy of the membership.
    ///
    /// The list may be mutated while a caller walks the snapshot; the
    /// snapshot never observes those changes.
    pub fn snapshot(&self) -> Vec<Arc<AccessPoint>> {
        self.lock().clone()
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether the list is empty.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Drops every record.
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Folds one scanned record into the list.
    ///
    /// A known bssid updates the existing record in place (essid when the
    /// sighting has one, mode, frequency, capabilities, last-seen) and
    /// reports whether the strength moved; an unknown bssid is inserted.
    /// Returns the record that now represents the station.
    pub fn merge_scanned(&self, scanned: AccessPoint) -> (Arc<AccessPoint>, MergeOutcome) {
        let mut entries = self.lock();

        let existing = entries
            .iter()
            .find(|ap| ap.bssid.get() == scanned.bssid.get())
            .cloned();

        match existing {
            Some(ap) => {
                if let Some(essid) = scanned.essid.get() {
                    ap.essid.set(Some(essid));
                }
                ap.mode.set(scanned.mode.get());
                ap.frequency.set(scanned.frequency.get());
                ap.capabilities
                    .set(ap.capabilities.get() | scanned.capabilities.get());
                ap.last_seen.set(scanned.last_seen.get());

                let new_strength = scanned.strength.get();
                let outcome = if ap.strength.get() != new_strength {
                    ap.strength.set(new_strength);
                    MergeOutcome::StrengthChanged
                } else {
                    MergeOutcome::Unchanged
                };
                (ap, outcome)
            }
            None => {
                let ap = Arc::new(scanned);
                entries.push(ap.clone());
                (ap, MergeOutcome::Inserted)
            }
        }
    }

    /// Propagates operator configuration from `other` onto records here
    /// matched by essid: security descriptor, user timestamp, trust tier,
    /// and the station addresses the operator has used.
    pub fn copy_properties_from(&self, other: &AccessPointList) {
        for ap in self.snapshot() {
            let Some(essid) = ap.essid.get() else {
                continue;
            };
            if let Some(src) = other.get_by_essid(&essid) {
                ap.security.set(src.security.get());
                ap.timestamp.set(src.timestamp.get());
                ap.trusted.set(src.trusted.get());
                ap.user_addresses.set(src.user_addresses.get());
            }
        }
    }

    /// Hidden-essid recovery: when `ap` has no essid but a record here
    /// shares its bssid, adopt that record's essid.
    pub fn copy_one_essid_by_address(&self, ap: &AccessPoint) {
        if ap.essid.get().is_some() {
            return;
        }
        if let Some(known) = self.get_by_bssid(ap.bssid.get())
            && let Some(essid) = known.essid.get()
        {
            ap.essid.set(Some(essid));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, UNIX_EPOCH};

    use super::{
        super::access_point::{ApSecurity, AuthAlgorithm},
        *,
    };

    fn ap(essid: Option<&str>, bssid: [u8; 6]) -> AccessPoint {
        let record = AccessPoint::new();
        record.essid.set(essid.map(String::from));
        record.bssid.set(MacAddress(bssid));
        record
    }

    #[test]
    fn append_replaces_same_bssid() {
        let list = AccessPointList::new(ApListKind::DeviceSeen);
        list.append(Arc::new(ap(Some("one"), [1, 2, 3, 4, 5, 6])));
        list.append(Arc::new(ap(Some("two"), [1, 2, 3, 4, 5, 6])));

        assert_eq!(list.len(), 1);
        assert_eq!(
            list.snapshot()[0].essid.get().as_deref(),
            Some("two")
        );
    }

    #[test]
    fn merge_inserts_unknown_bssid() {
        let list = AccessPointList::new(ApListKind::DeviceSeen);
        let (_, outcome) = list.merge_scanned(ap(Some("net"), [2; 6]));
        assert_eq!(outcome, MergeOutcome::Inserted);
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn merge_reports_strength_change_without_duplicating() {
        let list = AccessPointList::new(ApListKind::DeviceSeen);

        let first = ap(Some("net"), [2; 6]);
        first.strength.set(40);
        list.merge_scanned(first);

        let second = ap(Some("net"), [2; 6]);
        second.strength.set(70);
        let (merged, outcome) = list.merge_scanned(second);

        assert_eq!(outcome, MergeOutcome::StrengthChanged);
        assert_eq!(list.len(), 1);
        assert_eq!(merged.strength.get(), 70);
    }

    #[test]
    fn merge_is_unchanged_when_nothing_moves() {
        let list = AccessPointList::new(ApListKind::DeviceSeen);

        let first = ap(Some("net"), [2; 6]);
        first.strength.set(40);
        list.merge_scanned(first);

        let second = ap(Some("net"), [2; 6]);
        second.strength.set(40);
        let (_, outcome) = list.merge_scanned(second);

        assert_eq!(outcome, MergeOutcome::Unchanged);
    }

    #[test]
    fn merge_never_leaves_duplicate_bssids() {
        let list = AccessPointList::new(ApListKind::DeviceSeen);
        for strength in [10i8, 20, 30] {
            let record = ap(Some("net"), [9; 6]);
            record.strength.set(strength);
            list.merge_scanned(record);
        }

        let snapshot = list.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].strength.get(), 30);
    }

    #[test]
    fn lookups_return_absent_on_miss() {
        let list = AccessPointList::new(ApListKind::AllowedConfigured);
        assert!(list.get_by_essid("nothing").is_none());
        assert!(list.get_by_bssid(MacAddress([5; 6])).is_none());
    }

    #[test]
    fn copy_properties_matches_by_essid() {
        let allowed = AccessPointList::new(ApListKind::AllowedConfigured);
        let configured = ap(Some("home"), [0; 6]);
        configured.trusted.set(true);
        configured.timestamp.set(UNIX_EPOCH + Duration::from_secs(500));
        configured.security.set(Some(ApSecurity {
            key: Some(String::from("hunter2")),
            auth: AuthAlgorithm::OpenSystem,
        }));
        allowed.append(Arc::new(configured));

        let seen = AccessPointList::new(ApListKind::DeviceSeen);
        seen.append(Arc::new(ap(Some("home"), [7; 6])));
        seen.copy_properties_from(&allowed);

        let merged = seen.get_by_essid("home").unwrap();
        assert!(merged.trusted.get());
        assert_eq!(merged.timestamp.get(), UNIX_EPOCH + Duration::from_secs(500));
        assert!(merged.security.get().is_some());
    }

    #[test]
    fn hidden_essid_recovery_by_address() {
        let allowed = AccessPointList::new(ApListKind::AllowedConfigured);
        allowed.append(Arc::new(ap(Some("home"), [0xaa, 0xbb, 0xcc, 0x00, 0x11, 0x22])));

        let sighted = ap(None, [0xaa, 0xbb, 0xcc, 0x00, 0x11, 0x22]);
        allowed.copy_one_essid_by_address(&sighted);

        assert_eq!(sighted.essid.get().as_deref(), Some("home"));
    }
}
