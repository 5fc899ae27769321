//! Wireless (802.11) device variant.
//!
//! Owns the per-interface scan state: the device-seen AP list, the scan
//! mutex, quality templates, and the sticky strength cache. The scan and
//! association loops live in the [`scan`] and [`association`] submodules.

pub(crate) mod association;
pub(crate) mod decoder;
pub(crate) mod quality;
pub(crate) mod scan;

use std::{
    sync::{
        Mutex, MutexGuard, PoisonError,
        atomic::{AtomicU8, AtomicU32, Ordering},
    },
    time::SystemTime,
};

use linkman_common::Property;
use tracing::warn;

use crate::{
    core::{
        access_point::{AccessPoint, Ap80211Capabilities, MacAddress},
        ap_list::{AccessPointList, ApListKind},
        device::types::DeviceCapabilities,
    },
    service::AppData,
    sys::{
        FrequencyEntry,
        wext::{self, IW_ENC_CAPA_CIPHER_CCMP, IW_ENC_CAPA_CIPHER_TKIP, IW_ENC_CAPA_WPA,
            IW_ENC_CAPA_WPA2, IwQuality, RangeInfo},
    },
    types::{ScanIntervalPreset, events::NetworkEvent},
};

use quality::qual_to_percent;

/// How many consecutive unusable strength samples are smoothed over before
/// the cached strength really drops to unknown.
const INVALID_STRENGTH_GRACE: u8 = 3;

/// How many consecutive failed link probes are tolerated before a probe
/// stops reporting the default link state.
const FAILED_LINK_GRACE: u32 = 6;

/// Per-interface state of a wireless device.
#[derive(Debug)]
pub struct WirelessDevice {
    /// 802.11 capabilities discovered from the driver.
    pub capabilities_80211: Property<Ap80211Capabilities>,
    /// Strength of the current association, −1 when unknown.
    pub strength: Property<i8>,
    /// Stations this device has seen in scans.
    pub ap_list: AccessPointList,
    /// Cache of the essid last read from the card.
    pub(crate) cur_essid: Property<Option<String>>,
    /// Current scan cadence in seconds.
    pub(crate) scan_interval_secs: Property<u8>,
    /// When the last successful scan finished.
    pub(crate) last_scan: Property<Option<SystemTime>>,
    /// Quality reference templates from the range ioctl.
    pub(crate) max_qual: IwQuality,
    pub(crate) avg_qual: IwQuality,
    /// Compiled wireless-extension version of the driver.
    pub(crate) we_version: u8,
    /// Frequencies the card supports.
    pub(crate) freqs: Vec<FrequencyEntry>,
    /// Serializes the scan against ioctls that are meaningless mid-scan.
    pub(crate) scan_mutex: Mutex<()>,
    invalid_strength_counter: AtomicU8,
    failed_link_count: AtomicU32,
}

impl WirelessDevice {
    /// Reads driver state and builds the variant. Blocking.
    ///
    /// Devices that cannot scan show the entire allowed list as their view
    /// of the world instead of scan results.
    pub(crate) fn init(iface: &str, caps: DeviceCapabilities, app: &AppData) -> Self {
        let range = match wext::get_range(iface) {
            Ok(range) => range,
            Err(e) => {
                warn!(iface, error = %e, "cannot read wireless range info");
                RangeInfo::default()
            }
        };

        let device = Self {
            capabilities_80211: Property::new(discover_80211_capabilities(&range)),
            strength: Property::new(-1),
            ap_list: AccessPointList::new(ApListKind::DeviceSeen),
            cur_essid: Property::new(None),
            scan_interval_secs: Property::new(ScanIntervalPreset::Active.seconds()),
            last_scan: Property::new(None),
            max_qual: range.max_qual,
            avg_qual: range.avg_qual,
            we_version: range.we_version,
            freqs: range.freqs,
            scan_mutex: Mutex::new(()),
            invalid_strength_counter: AtomicU8::new(0),
            failed_link_count: AtomicU32::new(0),
        };

        wext::set_mode(iface, wext::IW_MODE_INFRA);

        if !caps.contains(DeviceCapabilities::WIRELESS_SCAN) {
            device.copy_allowed_to_dev_list(app);
        }

        device
    }

    /// Generic capability discovery for a wireless interface: wireless
    /// extensions v16+ and scan support.
    pub(crate) fn discover_generic_capabilities(iface: &str) -> DeviceCapabilities {
        let mut caps = DeviceCapabilities::empty();

        let range = match wext::get_range(iface) {
            Ok(range) => range,
            Err(_) => return caps,
        };

        if range.we_version < 16 {
            warn!(
                iface,
                we_version = range.we_version,
                "driver's wireless extensions are too old, cannot use device"
            );
        } else {
            caps |= DeviceCapabilities::SUPPORTED;
        }

        if wext::supports_scanning(iface) {
            caps |= DeviceCapabilities::WIRELESS_SCAN;
        }

        caps
    }

    /// Rebuilds the device list from the allowed list, for cards without
    /// scan capability.
    pub(crate) fn copy_allowed_to_dev_list(&self, app: &AppData) {
        self.ap_list.clear();
        for src in app.allowed_aps.snapshot() {
            self.ap_list.append(std::sync::Arc::new(src.duplicate()));
        }
    }

    pub(crate) fn lock_scan(&self) -> MutexGuard<'_, ()> {
        self.scan_mutex.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether the card reports an association right now.
    ///
    /// Tries the cheap interface-name short-circuit first, then falls back
    /// to checking that the reported AP address is a plausible peer.
    pub(crate) fn is_associated(iface: &str) -> bool {
        if wext::reports_unassociated(iface) {
            return false;
        }

        match wext::get_ap_address(iface) {
            Some(mac) => MacAddress(mac).is_valid(),
            None => false,
        }
    }

    /// Probes whether the hardware still has a link to the given AP.
    ///
    /// The essid comparison needs the scan lock: reading the card's essid
    /// mid-scan is meaningless. A failed probe keeps reporting
    /// `default_link` until several probes in a row have failed.
    pub(crate) fn link_to_specific_ap(
        &self,
        iface: &str,
        ap: &AccessPoint,
        default_link: bool,
    ) -> bool {
        let guard = self.lock_scan();

        let mut link = false;
        if Self::is_associated(iface) {
            let dev_essid = wext::get_essid(iface);
            if dev_essid.is_some() {
                self.cur_essid.set(dev_essid.clone());
            }
            if let (Some(dev_essid), Some(ap_essid)) = (dev_essid, ap.essid.get())
                && dev_essid == ap_essid
            {
                self.failed_link_count.store(0, Ordering::Relaxed);
                link = true;
            }
        }

        drop(guard);

        if !link {
            let failed = self.failed_link_count.fetch_add(1, Ordering::Relaxed) + 1;
            if failed <= FAILED_LINK_GRACE {
                link = default_link;
            }
        }

        link
    }

    pub(crate) fn reset_failed_link_count(&self) {
        self.failed_link_count.store(0, Ordering::Relaxed);
    }

    /// Refreshes the cached strength of the current association. Blocking.
    ///
    /// Skipped silently while a scan holds the lock; the next tick retries.
    pub(crate) fn update_signal_strength(&self, iface: &str, app: &AppData, activated: bool) {
        let Ok(guard) = self.scan_mutex.try_lock() else {
            return;
        };

        if !activated {
            self.strength.set(-1);
            return;
        }

        let percent = match wext::get_stats_quality(iface) {
            Some(sample) => qual_to_percent(&sample, &self.max_qual, &self.avg_qual),
            None => -1,
        };

        drop(guard);
        self.apply_strength_sample(iface, app, percent);
    }

    /// Folds one strength sample into the cache, smoothing out cards that
    /// report nothing one second and normal strength the next.
    pub(crate) fn apply_strength_sample(&self, iface: &str, app: &AppData, sampled: i8) {
        let mut percent = sampled;

        if percent == -1
            && self.invalid_strength_counter.fetch_add(1, Ordering::Relaxed) + 1
                <= INVALID_STRENGTH_GRACE
        {
            percent = self.strength.get();
        } else {
            self.invalid_strength_counter.store(0, Ordering::Relaxed);
        }

        if percent != self.strength.get() {
            app.emit(NetworkEvent::DeviceStrengthChange {
                iface: iface.to_owned(),
                percent,
            });
        }

        self.strength.set(percent);
    }

    /// Leaves the network: clears the essid and key, forces infrastructure
    /// mode, and resets the scan cadence. Blocking.
    pub(crate) fn deactivate(&self, iface: &str, app: &AppData) {
        wext::set_essid(iface, "");
        wext::set_wep_key(iface, None, true);
        wext::set_mode(iface, wext::IW_MODE_INFRA);
        app.set_scan_interval_now(Some(iface), ScanIntervalPreset::Active);
    }
}

#[cfg(test)]
impl WirelessDevice {
    pub(crate) fn test_state() -> Self {
        Self {
            capabilities_80211: Property::new(Ap80211Capabilities::empty()),
            strength: Property::new(-1),
            ap_list: AccessPointList::new(ApListKind::DeviceSeen),
            cur_essid: Property::new(None),
            scan_interval_secs: Property::new(ScanIntervalPreset::Active.seconds()),
            last_scan: Property::new(None),
            max_qual: IwQuality::default(),
            avg_qual: IwQuality::default(),
            we_version: 21,
            freqs: Vec::new(),
            scan_mutex: Mutex::new(()),
            invalid_strength_counter: AtomicU8::new(0),
            failed_link_count: AtomicU32::new(0),
        }
    }
}

fn discover_80211_capabilities(range: &RangeInfo) -> Ap80211Capabilities {
    // Every driver is assumed to handle WEP and open networks.
    let mut caps = Ap80211Capabilities::CIPHER_WEP40
        | Ap80211Capabilities::CIPHER_WEP104
        | Ap80211Capabilities::PROTO_NONE
        | Ap80211Capabilities::PROTO_WEP;

    if range.has_enc_capa() {
        if range.enc_capa & IW_ENC_CAPA_WPA != 0 {
            caps |= Ap80211Capabilities::PROTO_WPA
                | Ap80211Capabilities::KEY_MGMT_PSK
                | Ap80211Capabilities::KEY_MGMT_802_1X;
        }
        if range.enc_capa & IW_ENC_CAPA_WPA2 != 0 {
            caps |= Ap80211Capabilities::PROTO_WPA2
                | Ap80211Capabilities::KEY_MGMT_PSK
                | Ap80211Capabilities::KEY_MGMT_802_1X;
        }
        if range.enc_capa & IW_ENC_CAPA_CIPHER_TKIP != 0 {
            caps |= Ap80211Capabilities::CIPHER_TKIP;
        }
        if range.enc_capa & IW_ENC_CAPA_CIPHER_CCMP != 0 {
            caps |= Ap80211Capabilities::CIPHER_CCMP;
        }
    }

    caps
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::AppData;

    fn wifi_state() -> WirelessDevice {
        WirelessDevice::test_state()
    }

    #[tokio::test]
    async fn sticky_strength_survives_three_invalid_samples() {
        let app = AppData::for_tests();
        let wifi = wifi_state();
        wifi.strength.set(70);

        for _ in 0..3 {
            wifi.apply_strength_sample("wlan0", &app, -1);
            assert_eq!(wifi.strength.get(), 70);
        }

        wifi.apply_strength_sample("wlan0", &app, -1);
        assert_eq!(wifi.strength.get(), -1);
    }

    #[tokio::test]
    async fn valid_sample_resets_the_grace_counter() {
        let app = AppData::for_tests();
        let wifi = wifi_state();
        wifi.strength.set(70);

        wifi.apply_strength_sample("wlan0", &app, -1);
        wifi.apply_strength_sample("wlan0", &app, 55);
        assert_eq!(wifi.strength.get(), 55);

        // Grace window starts over after the good sample.
        for _ in 0..3 {
            wifi.apply_strength_sample("wlan0", &app, -1);
            assert_eq!(wifi.strength.get(), 55);
        }
    }

    #[tokio::test]
    async fn strength_change_emits_event() {
        let app = AppData::for_tests();
        let mut events = app.events.subscribe();
        let wifi = wifi_state();

        wifi.apply_strength_sample("wlan0", &app, 42);

        match events.try_recv() {
            Ok(NetworkEvent::DeviceStrengthChange { iface, percent }) => {
                assert_eq!(iface, "wlan0");
                assert_eq!(percent, 42);
            }
            other => panic!("expected strength event, got {other:?}"),
        }
    }

    #[test]
    fn enc_capa_extends_baseline_capabilities() {
        let range = RangeInfo {
            we_version: 19,
            enc_capa: IW_ENC_CAPA_WPA | IW_ENC_CAPA_CIPHER_TKIP,
            reported_len: usize::MAX,
            ..RangeInfo::default()
        };

        let caps = discover_80211_capabilities(&range);
        assert!(caps.contains(Ap80211Capabilities::PROTO_WEP));
        assert!(caps.contains(Ap80211Capabilities::PROTO_WPA));
        assert!(caps.contains(Ap80211Capabilities::CIPHER_TKIP));
        assert!(!caps.contains(Ap80211Capabilities::PROTO_WPA2));
    }

    #[test]
    fn old_drivers_keep_baseline_capabilities_only() {
        let range = RangeInfo {
            we_version: 17,
            enc_capa: IW_ENC_CAPA_WPA,
            reported_len: usize::MAX,
            ..RangeInfo::default()
        };

        let caps = discover_80211_capabilities(&range);
        assert!(!caps.contains(Ap80211Capabilities::PROTO_WPA));
    }
}
