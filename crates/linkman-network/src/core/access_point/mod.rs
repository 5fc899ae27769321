//! Access-point records.
//!
//! An [`AccessPoint`] is shared by reference count: the device's scan list,
//! the selection policy, and an in-flight activation request may each hold
//! one. Mutable fields are reactive [`Property`] cells so every holder
//! observes merges and strength updates.

pub mod types;

use std::time::{SystemTime, UNIX_EPOCH};

use linkman_common::Property;
pub use types::{Ap80211Capabilities, ApSecurity, AuthAlgorithm, MacAddress, WirelessMode};

/// Network names shipped as factory defaults; connecting to one of these
/// automatically is almost always wrong, so the selection policy blacklists
/// them unless the operator has explicitly used that exact station before.
const MANUFACTURER_DEFAULT_ESSIDS: &[&str] = &[
    "linksys",
    "linksys-a",
    "linksys-g",
    "default",
    "belkin54g",
    "NETGEAR",
    "wireless",
];

const WPA_GENERIC_INFO_ELEM: u8 = 0xdd;
const WPA_RSN_INFO_ELEM: u8 = 0x30;
const WPA_OUI_TYPE: [u8; 4] = [0x00, 0x50, 0xf2, 0x01];

/// A discovered (or operator-configured) wireless network beacon.
#[derive(Debug, Clone)]
pub struct AccessPoint {
    /// Network name, absent while hidden or not yet recovered.
    pub essid: Property<Option<String>>,
    /// Hardware address uniquely identifying the station.
    pub bssid: Property<MacAddress>,
    /// Ad-hoc or infrastructure.
    pub mode: Property<WirelessMode>,
    /// Broadcast frequency in Hz; zero when unknown.
    pub frequency: Property<f64>,
    /// Signal strength percent, −1 when unknown.
    pub strength: Property<i8>,
    /// Security descriptor, owned by this record.
    pub security: Property<Option<ApSecurity>>,
    /// When the operator last chose this network (`UNIX_EPOCH` = never).
    pub timestamp: Property<SystemTime>,
    /// When a scan last sighted this station.
    pub last_seen: Property<SystemTime>,
    /// Created by the engine rather than seen in a scan.
    pub artificial: Property<bool>,
    /// Created by the operator as an ad-hoc network.
    pub user_created: Property<bool>,
    /// Trust tier inherited from the allowed list.
    pub trusted: Property<bool>,
    /// Encryption protocols and ciphers the station advertises.
    pub capabilities: Property<Ap80211Capabilities>,
    /// Station addresses the operator has explicitly connected to.
    pub user_addresses: Property<Vec<String>>,
}

impl Default for AccessPoint {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for AccessPoint {
    fn eq(&self, other: &Self) -> bool {
        self.bssid.get() == other.bssid.get()
    }
}

impl AccessPoint {
    /// Creates an empty record with engine defaults.
    pub fn new() -> Self {
        Self {
            essid: Property::new(None),
            bssid: Property::new(MacAddress::default()),
            mode: Property::new(WirelessMode::Infrastructure),
            frequency: Property::new(0.0),
            strength: Property::new(-1),
            security: Property::new(None),
            timestamp: Property::new(UNIX_EPOCH),
            last_seen: Property::new(UNIX_EPOCH),
            artificial: Property::new(false),
            user_created: Property::new(false),
            trusted: Property::new(false),
            capabilities: Property::new(Ap80211Capabilities::empty()),
            user_addresses: Property::new(Vec::new()),
        }
    }

    /// Deep copy: a new record with the same current values but its own
    /// reactive cells. `clone()` on an [`AccessPoint`] shares the cells.
    pub fn duplicate(&self) -> Self {
        Self {
            essid: Property::new(self.essid.get()),
            bssid: Property::new(self.bssid.get()),
            mode: Property::new(self.mode.get()),
            frequency: Property::new(self.frequency.get()),
            strength: Property::new(self.strength.get()),
            security: Property::new(self.security.get()),
            timestamp: Property::new(self.timestamp.get()),
            last_seen: Property::new(self.last_seen.get()),
            artificial: Property::new(self.artificial.get()),
            user_created: Property::new(self.user_created.get()),
            trusted: Property::new(self.trusted.get()),
            capabilities: Property::new(self.capabilities.get()),
            user_addresses: Property::new(self.user_addresses.get()),
        }
    }

    /// Seconds-since-epoch form of the user timestamp, for tournament
    /// tie-breaks.
    pub(crate) fn timestamp_secs(&self) -> u64 {
        self.timestamp
            .get()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }

    /// Whether any encryption protocol is advertised.
    pub fn encrypted(&self) -> bool {
        self.capabilities.get().intersects(
            Ap80211Capabilities::PROTO_WEP
                | Ap80211Capabilities::PROTO_WPA
                | Ap80211Capabilities::PROTO_WPA2,
        )
    }

    /// Whether the essid is a known factory default.
    pub fn has_manufacturer_default_essid(&self) -> bool {
        match self.essid.get() {
            Some(essid) => MANUFACTURER_DEFAULT_ESSIDS
                .iter()
                .any(|default| *default == essid),
            None => false,
        }
    }

    /// Records the basic WEP capability an encode event implies.
    pub(crate) fn add_capabilities_for_wep(&self) {
        let caps = self.capabilities.get()
            | Ap80211Capabilities::PROTO_WEP
            | Ap80211Capabilities::CIPHER_WEP40
            | Ap80211Capabilities::CIPHER_WEP104;
        self.capabilities.set(caps);
    }

    /// Merges capabilities parsed from a WPA or RSN information element.
    ///
    /// The element is identified by its leading id byte; malformed or
    /// foreign elements add nothing.
    pub(crate) fn add_capabilities_from_ie(&self, ie: &[u8]) {
        let Some(parsed) = parse_ie_capabilities(ie) else {
            return;
        };
        self.capabilities.set(self.capabilities.get() | parsed);
    }
}

/// Cipher suite selector type → capability flag, shared by WPA and RSN.
fn cipher_capability(suite_type: u8) -> Ap80211Capabilities {
    match suite_type {
        1 => Ap80211Capabilities::CIPHER_WEP40,
        2 => Ap80211Capabilities::CIPHER_TKIP,
        4 => Ap80211Capabilities::CIPHER_CCMP,
        5 => Ap80211Capabilities::CIPHER_WEP104,
        _ => Ap80211Capabilities::empty(),
    }
}

fn key_mgmt_capability(suite_type: u8) -> Ap80211Capabilities {
    match suite_type {
        1 => Ap80211Capabilities::KEY_MGMT_802_1X,
        2 => Ap80211Capabilities::KEY_MGMT_PSK,
        _ => Ap80211Capabilities::empty(),
    }
}

fn parse_ie_capabilities(ie: &[u8]) -> Option<Ap80211Capabilities> {
    if ie.len() < 2 {
        return None;
    }

    let (proto, body) = match ie[0] {
        WPA_GENERIC_INFO_ELEM => {
            if ie.len() < 6 || ie[2..6] != WPA_OUI_TYPE {
                return None;
            }
            (Ap80211Capabilities::PROTO_WPA, &ie[6..])
        }
        WPA_RSN_INFO_ELEM => (Ap80211Capabilities::PROTO_WPA2, &ie[2..]),
        _ => return None,
    };

    let mut caps = proto;

    // version (2) + group cipher suite (4)
    if body.len() < 6 {
        return Some(caps);
    }
    caps |= cipher_capability(body[5]);

    let mut pos = 6;
    if body.len() < pos + 2 {
        return Some(caps);
    }
    let pairwise_count = usize::from(u16::from_le_bytes([body[pos], body[pos + 1]]));
    pos += 2;
    for _ in 0..pairwise_count {
        if body.len() < pos + 4 {
            return Some(caps);
        }
        caps |= cipher_capability(body[pos + 3]);
        pos += 4;
    }

    if body.len() < pos + 2 {
        return Some(caps);
    }
    let akm_count = usize::from(u16::from_le_bytes([body[pos], body[pos + 1]]));
    pos += 2;
    for _ in 0..akm_count {
        if body.len() < pos + 4 {
            return Some(caps);
        }
        caps |= key_mgmt_capability(body[pos + 3]);
        pos += 4;
    }

    Some(caps)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wpa_ie_tkip_psk() -> Vec<u8> {
        let mut ie = vec![0xdd, 0x16, 0x00, 0x50, 0xf2, 0x01];
        ie.extend_from_slice(&[0x01, 0x00]); // version
        ie.extend_from_slice(&[0x00, 0x50, 0xf2, 0x02]); // group: TKIP
        ie.extend_from_slice(&[0x01, 0x00]); // one pairwise suite
        ie.extend_from_slice(&[0x00, 0x50, 0xf2, 0x02]); // pairwise: TKIP
        ie.extend_from_slice(&[0x01, 0x00]); // one AKM
        ie.extend_from_slice(&[0x00, 0x50, 0xf2, 0x02]); // AKM: PSK
        ie
    }

    #[test]
    fn wpa_ie_adds_proto_cipher_and_key_mgmt() {
        let ap = AccessPoint::new();
        ap.add_capabilities_from_ie(&wpa_ie_tkip_psk());

        let caps = ap.capabilities.get();
        assert!(caps.contains(Ap80211Capabilities::PROTO_WPA));
        assert!(caps.contains(Ap80211Capabilities::CIPHER_TKIP));
        assert!(caps.contains(Ap80211Capabilities::KEY_MGMT_PSK));
        assert!(!caps.contains(Ap80211Capabilities::PROTO_WPA2));
    }

    #[test]
    fn rsn_ie_adds_wpa2_proto() {
        let mut ie = vec![0x30, 0x14];
        ie.extend_from_slice(&[0x01, 0x00]); // version
        ie.extend_from_slice(&[0x00, 0x0f, 0xac, 0x04]); // group: CCMP
        ie.extend_from_slice(&[0x01, 0x00]);
        ie.extend_from_slice(&[0x00, 0x0f, 0xac, 0x04]); // pairwise: CCMP
        ie.extend_from_slice(&[0x01, 0x00]);
        ie.extend_from_slice(&[0x00, 0x0f, 0xac, 0x01]); // AKM: 802.1X

        let ap = AccessPoint::new();
        ap.add_capabilities_from_ie(&ie);

        let caps = ap.capabilities.get();
        assert!(caps.contains(Ap80211Capabilities::PROTO_WPA2));
        assert!(caps.contains(Ap80211Capabilities::CIPHER_CCMP));
        assert!(caps.contains(Ap80211Capabilities::KEY_MGMT_802_1X));
    }

    #[test]
    fn foreign_ie_adds_nothing() {
        let ap = AccessPoint::new();
        ap.add_capabilities_from_ie(&[0xdd, 0x04, 0x00, 0x11, 0x22, 0x33]);
        assert!(ap.capabilities.get().is_empty());
    }

    #[test]
    fn manufacturer_default_essid_is_detected() {
        let ap = AccessPoint::new();
        ap.essid.set(Some(String::from("linksys")));
        assert!(ap.has_manufacturer_default_essid());

        ap.essid.set(Some(String::from("home")));
        assert!(!ap.has_manufacturer_default_essid());

        ap.essid.set(None);
        assert!(!ap.has_manufacturer_default_essid());
    }

    #[test]
    fn wep_capability_implies_encryption() {
        let ap = AccessPoint::new();
        assert!(!ap.encrypted());

        ap.add_capabilities_for_wep();
        assert!(ap.encrypted());
    }
}
