use std::{fmt, str::FromStr};

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::sys::wext;

/// Hardware address identifying an access point (BSSID) or interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MacAddress(pub [u8; 6]);

impl MacAddress {
    /// Whether this address can belong to a real peer: not all-zero, not
    /// broadcast, multicast bit clear.
    pub fn is_valid(&self) -> bool {
        let octets = &self.0;
        if octets.iter().all(|&b| b == 0x00) {
            return false;
        }
        if octets.iter().all(|&b| b == 0xff) {
            return false;
        }
        octets[0] & 0x01 == 0
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

impl From<[u8; 6]> for MacAddress {
    fn from(octets: [u8; 6]) -> Self {
        Self(octets)
    }
}

impl FromStr for MacAddress {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut octets = [0u8; 6];
        let mut parts = s.split(':');
        for octet in &mut octets {
            let part = parts.next().ok_or(())?;
            *octet = u8::from_str_radix(part, 16).map_err(|_| ())?;
        }
        if parts.next().is_some() {
            return Err(());
        }
        Ok(Self(octets))
    }
}

/// Operating mode of an access point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum WirelessMode {
    /// Ad-hoc (peer-to-peer) network.
    Adhoc,
    /// Infrastructure network behind an access point.
    #[default]
    Infrastructure,
}

impl WirelessMode {
    /// Maps a kernel mode value; master mode counts as infrastructure,
    /// everything else is unrepresentable as an AP mode.
    pub(crate) fn from_kernel(mode: u32) -> Option<Self> {
        match mode {
            wext::IW_MODE_ADHOC => Some(Self::Adhoc),
            wext::IW_MODE_MASTER | wext::IW_MODE_INFRA => Some(Self::Infrastructure),
            _ => None,
        }
    }

    pub(crate) fn to_kernel(self) -> u32 {
        match self {
            Self::Adhoc => wext::IW_MODE_ADHOC,
            Self::Infrastructure => wext::IW_MODE_INFRA,
        }
    }
}

bitflags! {
    /// 802.11 protocol, key-management, and cipher capabilities of an AP
    /// or driver.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Ap80211Capabilities: u32 {
        /// No encryption protocol.
        const PROTO_NONE = 0x0000_0001;
        /// WEP capable.
        const PROTO_WEP = 0x0000_0002;
        /// WPA capable.
        const PROTO_WPA = 0x0000_0004;
        /// WPA2/RSN capable.
        const PROTO_WPA2 = 0x0000_0008;
        /// Pre-shared-key key management.
        const KEY_MGMT_PSK = 0x0000_0040;
        /// 802.1X key management.
        const KEY_MGMT_802_1X = 0x0000_0080;
        /// 40-bit WEP cipher.
        const CIPHER_WEP40 = 0x0000_1000;
        /// 104-bit WEP cipher.
        const CIPHER_WEP104 = 0x0000_2000;
        /// TKIP cipher.
        const CIPHER_TKIP = 0x0000_4000;
        /// CCMP (AES) cipher.
        const CIPHER_CCMP = 0x0000_8000;
    }
}

/// Authentication algorithm for legacy WEP association.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AuthAlgorithm {
    /// Open System authentication.
    #[default]
    OpenSystem,
    /// Shared Key authentication.
    SharedKey,
}

/// Security descriptor attached to an access point.
///
/// The descriptor is owned by the AP record and handed opaquely to the
/// supplicant collaborator at association time; the engine itself only
/// inspects key presence.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ApSecurity {
    /// Key material, if the operator has supplied one.
    pub key: Option<String>,
    /// Authentication algorithm to use.
    pub auth: AuthAlgorithm,
}

impl ApSecurity {
    /// Builds a keyless descriptor from an AP's advertised capabilities.
    pub fn from_capabilities(caps: Ap80211Capabilities) -> Self {
        let auth = if caps.intersects(Ap80211Capabilities::PROTO_WEP) {
            AuthAlgorithm::SharedKey
        } else {
            AuthAlgorithm::OpenSystem
        };
        Self { key: None, auth }
    }
}
