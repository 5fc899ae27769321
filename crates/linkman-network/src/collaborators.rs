//! External collaborator seams.
//!
//! The core consumes these interfaces but does not implement the systems
//! behind them: key management lives in a supplicant, device metadata in a
//! hardware database. Defaults suitable for plain WEP/open setups are
//! provided so the engine works stand-alone.

use crate::{core::access_point::ApSecurity, sys::wext};

/// Applies security descriptors to an interface at association time.
///
/// The engine hands over the descriptor opaquely; whatever key derivation
/// or negotiation is needed happens behind this seam.
pub trait SupplicantClient: Send + Sync {
    /// Programs the interface for the given descriptor before the essid is
    /// set. Failures are the collaborator's to report; association will
    /// simply fail to link.
    fn apply_security(&self, iface: &str, security: &ApSecurity);
}

/// Key plumbing through the wireless-extension encode ioctl.
///
/// Handles open and WEP networks directly on the card, which is all the
/// engine needs without an external supplicant process.
#[derive(Debug, Default)]
pub struct WextSupplicant;

impl SupplicantClient for WextSupplicant {
    fn apply_security(&self, iface: &str, security: &ApSecurity) {
        let open_system = matches!(
            security.auth,
            crate::core::access_point::AuthAlgorithm::OpenSystem
        );
        wext::set_wep_key(iface, security.key.as_deref(), open_system);
    }
}

/// Read-only device metadata from the platform's hardware database.
pub trait HardwareDatabase: Send + Sync {
    /// String property for the device identified by `udi`, if the database
    /// knows it.
    fn device_property(&self, udi: &str, key: &str) -> Option<String>;
}
