//! Association: driving the card onto a chosen network.
//!
//! Two flavours: joining (or creating) an ad-hoc network the operator
//! asked for, and attaching to an infrastructure access point. Everything
//! here is blocking and runs on the activation worker.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use rand::Rng;
use tracing::{info, warn};

use crate::{
    core::{
        access_point::{AccessPoint, ApSecurity, WirelessMode},
        device::{Device, types::ActivationRequest},
    },
    error::Error,
    service::AppData,
    sys::{FrequencyEntry, wext},
    types::events::NetworkEvent,
};

use super::WirelessDevice;

/// Polls per second while waiting for a link.
const LINK_POLL_HZ: u32 = 30;

/// Consecutive stable polls required before a link is believed.
const LINK_REQUIRED_TRIES: u32 = 10;

/// 802.11b channel space used when creating ad-hoc networks, so that most
/// cards can see them.
const ADHOC_CHANNEL_MAX: i32 = 14;

/// How a configuration attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConfigOutcome {
    /// The card is attached to the target network.
    Success,
    /// Paused: the network is encrypted and no key is available.
    NeedKey,
    /// The attempt gave up (no link, cancelled, or no usable channel).
    Failed,
}

/// Variant-dispatch entry point for the activation worker. Blocking.
pub(crate) fn activation_config(dev: &Arc<Device>, req: &ActivationRequest) -> ConfigOutcome {
    match dev.wireless() {
        None => ConfigOutcome::Success,
        Some(wifi) => {
            if req.ap.user_created.get() {
                configure_adhoc(dev, wifi, req)
            } else {
                configure_infra(dev, wifi, req)
            }
        }
    }
}

/// Creates an ad-hoc network on a clear channel.
fn configure_adhoc(dev: &Arc<Device>, wifi: &WirelessDevice, req: &ActivationRequest) -> ConfigOutcome {
    let in_use: Vec<f64> = wifi
        .ap_list
        .snapshot()
        .iter()
        .map(|ap| ap.frequency.get())
        .filter(|hz| *hz > 0.0)
        .collect();

    let Some(freq) = pick_adhoc_frequency(&wifi.freqs, &in_use, || {
        rand::rng().random_range(1..=ADHOC_CHANNEL_MAX)
    }) else {
        return ConfigOutcome::Failed;
    };

    req.ap.frequency.set(freq);
    info!(
        iface = %dev.iface(),
        essid = ?req.ap.essid.get(),
        freq,
        "will create ad-hoc network"
    );

    if set_wireless_config(dev, wifi, &req.ap) {
        ConfigOutcome::Success
    } else {
        ConfigOutcome::Failed
    }
}

/// Chooses a frequency for a new ad-hoc network.
///
/// Frequencies already occupied by a visible station are struck from the
/// card's table; the first remaining 802.11b-range channel wins. With the
/// whole b-range busy, a pseudo-random channel in that range is used.
pub(crate) fn pick_adhoc_frequency(
    table: &[FrequencyEntry],
    in_use: &[f64],
    random_channel: impl FnOnce() -> i32,
) -> Option<f64> {
    let free = |entry: &FrequencyEntry| {
        !in_use.iter().any(|used| (used - entry.hz).abs() < f64::EPSILON)
    };

    for entry in table {
        if entry.hz > 0.0
            && entry.channel > 0
            && entry.channel <= ADHOC_CHANNEL_MAX
            && free(entry)
        {
            return Some(entry.hz);
        }
    }

    wext::channel_to_freq(random_channel(), table)
}

/// Whether an activation cannot proceed without operator-supplied key
/// material.
pub(crate) fn ap_need_key(ap: &AccessPoint) -> bool {
    if !ap.encrypted() {
        return false;
    }
    match ap.security.get() {
        Some(security) => security.key.is_none(),
        None => true,
    }
}

/// Attaches to an infrastructure access point.
fn configure_infra(dev: &Arc<Device>, wifi: &WirelessDevice, req: &ActivationRequest) -> ConfigOutcome {
    dev.bring_up_wait(1);

    let essid = req.ap.essid.get().unwrap_or_default();
    info!(iface = %dev.iface(), essid, "will connect to access point");

    if ap_need_key(&req.ap) {
        info!(iface = %dev.iface(), essid, "access point is encrypted but no key exists");
        dev.app.emit(NetworkEvent::NeedUserKey {
            iface: dev.iface().to_owned(),
            essid,
        });
        return ConfigOutcome::NeedKey;
    }

    let mut success = false;
    while !success {
        if req.should_cancel() {
            break;
        }

        set_wireless_config(dev, wifi, &req.ap);

        let link = wait_for_link(dev, wifi, &essid, req);

        if req.should_cancel() {
            break;
        }

        if !link {
            info!(iface = %dev.iface(), essid, "no hardware link");
            break;
        }

        success = true;
    }

    if success {
        info!(iface = %dev.iface(), essid, "connected to access point");
        ConfigOutcome::Success
    } else {
        ConfigOutcome::Failed
    }
}

/// Programs the card for the given AP: mode, bitrate, frequency, security,
/// essid. Blocking; includes the post-essid firmware pause.
fn set_wireless_config(dev: &Arc<Device>, wifi: &WirelessDevice, ap: &Arc<AccessPoint>) -> bool {
    let Some(essid) = ap.essid.get() else {
        return false;
    };
    let security = ap.security.get().unwrap_or_default();
    let iface = dev.iface();

    wifi.reset_failed_link_count();

    // A clean down/up cycle gets wedged firmwares back into a known state.
    dev.bring_down_wait(1);
    dev.bring_up_wait(1);

    wext::set_mode(iface, wext::IW_MODE_INFRA);
    wext::set_mode(iface, ap.mode.get().to_kernel());
    wext::set_bitrate(iface, 0);

    if ap.user_created.get()
        || (ap.frequency.get() > 0.0 && ap.mode.get() == WirelessMode::Adhoc)
    {
        wext::set_frequency(iface, ap.frequency.get());
    } else if !wext::set_frequency(iface, 0.0) {
        warn!(iface, "card refused automatic channel selection");
    }

    dev.app.supplicant.apply_security(iface, &security);

    wext::set_essid(iface, &essid);

    info!(iface, essid, "activation using configured security");

    // Let the card chase the AP across channels before judging the link.
    let pause = association_pause_secs(wifi);
    let deadline = Instant::now() + Duration::from_secs(pause);
    while Instant::now() < deadline {
        if WirelessDevice::is_associated(iface) && wext::get_essid(iface).is_some() {
            break;
        }
        std::thread::sleep(Duration::from_millis(100));
    }

    // Some cards (madwifi ad-hoc) sit at zero bitrate until forced.
    if ap.mode.get() == WirelessMode::Adhoc && wext::get_bitrate(iface) <= 0 {
        wext::set_bitrate(iface, 11_000);
    }

    true
}

/// Seconds the card gets to find a requested AP; cards with many channels
/// to sweep get longer.
fn association_pause_secs(wifi: &WirelessDevice) -> u64 {
    if wifi.freqs.len() > 14 { 8 } else { 5 }
}

/// Waits for the card to genuinely associate.
///
/// The driver keeps re-scanning until it attaches; once attached, essid
/// and frequency stop moving. The card is believed when `is_associated`
/// holds and both stay stable for [`LINK_REQUIRED_TRIES`] consecutive
/// polls. Cancellation is honored between polls.
fn wait_for_link(dev: &Arc<Device>, wifi: &WirelessDevice, essid: &str, req: &ActivationRequest) -> bool {
    let iface = dev.iface();

    let min_timeout = u64::from(2 * (LINK_POLL_HZ / LINK_REQUIRED_TRIES));
    let timeout = association_pause_secs(wifi).max(min_timeout);

    let mut assoc_count: u32 = 0;
    let mut last_freq: f64 = 0.0;

    let deadline = Instant::now() + Duration::from_secs(timeout);
    while Instant::now() < deadline {
        if req.should_cancel() {
            break;
        }

        let cur_freq = wext::get_frequency(iface);
        let associated = WirelessDevice::is_associated(iface);
        let cur_essid = wext::get_essid(iface);

        // Floating-point frequency equality within machine epsilon: the
        // kernel reports floats.
        if (cur_freq - last_freq).abs() < f64::EPSILON
            && associated
            && cur_essid.as_deref() == Some(essid)
        {
            assoc_count += 1;
        } else {
            assoc_count = 0;
            last_freq = cur_freq;
        }

        if assoc_count >= 2 * LINK_REQUIRED_TRIES {
            break;
        }

        std::thread::sleep(Duration::from_millis(u64::from(1000 / LINK_POLL_HZ)));
    }

    assoc_count > LINK_REQUIRED_TRIES
}

/// Resolves the AP a forced activation should target.
///
/// A scan-list hit is rehabilitated from the invalid list and gets
/// synthesized security when none was provided. An unknown essid without
/// security is rejected; with security, an artificial record is created
/// and added to the device list.
pub(crate) fn activation_ap(
    app: &Arc<AppData>,
    wifi: &WirelessDevice,
    essid: &str,
    security: Option<ApSecurity>,
) -> Result<Arc<AccessPoint>, Error> {
    if let Some(ap) = wifi.ap_list.get_by_essid(essid) {
        // The operator knows best; a forced network leaves the invalid list.
        app.invalid_aps.remove_by_essid(essid);

        let security =
            security.unwrap_or_else(|| ApSecurity::from_capabilities(ap.capabilities.get()));
        ap.security.set(Some(security));
        return Ok(ap);
    }

    let Some(security) = security else {
        warn!(essid, "manual connection requested without security information");
        return Err(Error::MissingSecurity {
            essid: essid.to_owned(),
        });
    };

    let ap = AccessPoint::new();
    ap.essid.set(Some(essid.to_owned()));
    ap.artificial.set(true);
    ap.security.set(Some(security));
    let ap = Arc::new(ap);
    wifi.ap_list.append(ap.clone());
    Ok(ap)
}

/// Completes a key-paused activation with operator-supplied material.
pub(crate) fn resume_with_user_key(dev: &Arc<Device>, req: &Arc<ActivationRequest>, key: String) {
    let mut security = req.ap.security.get().unwrap_or_default();
    security.key = Some(key);
    req.ap.security.set(Some(security));

    dev.spawn_activation(req.clone());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        core::{access_point::Ap80211Capabilities, device::Device},
        service::AppData,
    };

    fn b_channel_table() -> Vec<FrequencyEntry> {
        (1..=14)
            .map(|channel| FrequencyEntry {
                channel,
                hz: 2_407_000_000.0 + f64::from(channel) * 5_000_000.0,
            })
            .collect()
    }

    #[test]
    fn adhoc_pick_takes_lowest_free_channel() {
        let table = b_channel_table();
        let in_use = vec![table[0].hz, table[5].hz, table[10].hz]; // 1, 6, 11

        let freq = pick_adhoc_frequency(&table, &in_use, || unreachable!());
        assert_eq!(freq, Some(table[1].hz)); // channel 2
    }

    #[test]
    fn adhoc_pick_falls_back_to_random_channel() {
        let table = b_channel_table();
        let in_use: Vec<f64> = table.iter().map(|e| e.hz).collect();

        let freq = pick_adhoc_frequency(&table, &in_use, || 7);
        assert_eq!(freq, Some(table[6].hz));
    }

    #[test]
    fn adhoc_pick_ignores_a_band_channels() {
        let mut table = vec![FrequencyEntry {
            channel: 36,
            hz: 5_180_000_000.0,
        }];
        table.extend(b_channel_table());

        let freq = pick_adhoc_frequency(&table, &[], || unreachable!());
        assert_eq!(freq, Some(2_412_000_000.0));
    }

    #[test]
    fn unencrypted_ap_needs_no_key() {
        let ap = AccessPoint::new();
        assert!(!ap_need_key(&ap));
    }

    #[test]
    fn encrypted_ap_without_key_needs_one() {
        let ap = AccessPoint::new();
        ap.add_capabilities_for_wep();
        assert!(ap_need_key(&ap));

        ap.security.set(Some(ApSecurity {
            key: Some(String::from("0123456789")),
            auth: Default::default(),
        }));
        assert!(!ap_need_key(&ap));
    }

    #[tokio::test]
    async fn forced_unknown_network_without_security_is_rejected() {
        let app = AppData::for_tests();
        let dev = Device::test_wireless(app.clone());
        let wifi = dev.wireless().unwrap();

        let result = activation_ap(&app, wifi, "mystery", None);
        assert!(matches!(result, Err(Error::MissingSecurity { .. })));
        assert!(wifi.ap_list.is_empty());
    }

    #[tokio::test]
    async fn forced_unknown_network_with_security_creates_artificial_ap() {
        let app = AppData::for_tests();
        let dev = Device::test_wireless(app.clone());
        let wifi = dev.wireless().unwrap();

        let ap = activation_ap(&app, wifi, "mystery", Some(ApSecurity::default())).unwrap();
        assert!(ap.artificial.get());
        assert!(wifi.ap_list.get_by_essid("mystery").is_some());
    }

    #[tokio::test]
    async fn forced_known_network_leaves_invalid_list() {
        let app = AppData::for_tests();
        let dev = Device::test_wireless(app.clone());
        let wifi = dev.wireless().unwrap();

        let seen = AccessPoint::new();
        seen.essid.set(Some(String::from("cafe")));
        seen.capabilities.set(Ap80211Capabilities::PROTO_NONE);
        wifi.ap_list.append(Arc::new(seen));

        let declined = AccessPoint::new();
        declined.essid.set(Some(String::from("cafe")));
        app.invalid_aps.append(Arc::new(declined));

        let ap = activation_ap(&app, wifi, "cafe", None).unwrap();
        assert!(app.invalid_aps.get_by_essid("cafe").is_none());
        assert!(!ap.artificial.get());
        assert!(ap.security.get().is_some());
    }
}
