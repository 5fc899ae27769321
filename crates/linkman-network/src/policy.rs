//! Access-point selection policy.
//!
//! Given a device's scan list, the operator's allowed list, and the
//! session's invalid list, decide which network the device should be
//! attached to. Runs on the main scheduling context.

use std::sync::Arc;

use tracing::debug;

use crate::{
    core::{
        access_point::AccessPoint,
        ap_list::AccessPointList,
        device::{Device, types::ActivationRequest, types::DeviceCapabilities, wifi::WirelessDevice},
    },
    service::AppData,
};

/// Recalculates the best access point for a wireless device.
///
/// The hardware link test runs under the device's scan lock, so this may
/// block briefly while a scan finishes.
pub(crate) fn best_ap(
    app: &AppData,
    dev: &Arc<Device>,
    wifi: &WirelessDevice,
) -> Option<Arc<AccessPoint>> {
    let can_scan = dev
        .capabilities
        .get()
        .contains(DeviceCapabilities::WIRELESS_SCAN);

    select_best_ap(
        can_scan,
        dev.has_active_link(),
        &wifi.ap_list,
        &app.allowed_aps,
        &app.invalid_aps,
        dev.act_request.get().as_ref(),
        |ap| wifi.link_to_specific_ap(dev.iface(), ap, true),
    )
}

/// The selection rules, independent of hardware.
///
/// In order: non-scanning devices with no link select nothing; the current
/// AP is kept while it stays keepable; otherwise allowed stations fight a
/// most-recently-used tournament in two trust tiers, with factory-default
/// essids blacklisted unless the operator has used that exact station.
pub(crate) fn select_best_ap(
    can_scan: bool,
    has_active_link: bool,
    scan_list: &AccessPointList,
    allowed: &AccessPointList,
    invalid: &AccessPointList,
    req: Option<&Arc<ActivationRequest>>,
    mut link_probe: impl FnMut(&Arc<AccessPoint>) -> bool,
) -> Option<Arc<AccessPoint>> {
    // Devices that can't scan don't do anything automatic; the operator
    // must pick the network.
    if !can_scan && !has_active_link {
        return None;
    }

    // Prefer the currently selected AP while it's user-chosen or the
    // hardware still has a link to it.
    if let Some(req) = req {
        let current = req.ap.clone();
        let keep = current.user_created.get() || req.user_requested || link_probe(&current);

        if keep
            && let Some(essid) = current.essid.get()
            && invalid.get_by_essid(&essid).is_none()
            && scan_list.get_by_essid(&essid).is_some()
        {
            return Some(current);
        }
    }

    let mut trusted_latest: u64 = 0;
    let mut trusted_best: Option<(Arc<AccessPoint>, Arc<AccessPoint>)> = None;
    let mut untrusted_latest: u64 = 0;
    let mut untrusted_best: Option<(Arc<AccessPoint>, Arc<AccessPoint>)> = None;

    for scan_ap in scan_list.snapshot() {
        let Some(essid) = scan_ap.essid.get() else {
            continue;
        };

        // Stations in the invalid list cannot be used.
        if invalid.get_by_essid(&essid).is_some() {
            continue;
        }

        let Some(allowed_ap) = allowed.get_by_essid(&essid) else {
            continue;
        };

        // Factory-default essids are only eligible when the operator has
        // connected to this specific station before.
        let mut blacklisted = scan_ap.has_manufacturer_default_essid();
        if blacklisted {
            let station = scan_ap.bssid.get().to_string();
            if allowed_ap
                .user_addresses
                .get()
                .iter()
                .any(|used| used.eq_ignore_ascii_case(&station))
            {
                blacklisted = false;
            }
        }
        if blacklisted {
            continue;
        }

        let timestamp = allowed_ap.timestamp_secs();
        if allowed_ap.trusted.get() {
            if timestamp > trusted_latest {
                trusted_latest = timestamp;
                trusted_best = Some((scan_ap, allowed_ap));
            }
        } else if timestamp > untrusted_latest {
            untrusted_latest = timestamp;
            untrusted_best = Some((scan_ap, allowed_ap));
        }
    }

    // A trusted winner beats any untrusted one.
    let (winner, source) = trusted_best.or(untrusted_best)?;
    winner.security.set(source.security.get());
    Some(winner)
}

/// Re-evaluates every wireless device against the current lists and starts
/// activations where the best choice changed. Main context only.
pub(crate) fn device_change_check(app: &Arc<AppData>) {
    if app.asleep.get() || !app.wireless_enabled.get() {
        return;
    }

    for dev in app.devices_snapshot() {
        let Some(wifi) = dev.wireless() else {
            continue;
        };
        if !dev
            .capabilities
            .get()
            .contains(DeviceCapabilities::SUPPORTED)
        {
            continue;
        }
        if dev.is_activating() {
            continue;
        }

        let Some(best) = best_ap(app, &dev, wifi) else {
            continue;
        };

        match dev.act_request.get() {
            Some(current) if current.ap.essid.get() == best.essid.get() => {}
            _ => {
                debug!(iface = %dev.iface(), essid = ?best.essid.get(), "switching to best access point");
                dev.activate(best, false);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, UNIX_EPOCH};

    use super::*;
    use crate::core::{
        access_point::{ApSecurity, AuthAlgorithm, MacAddress},
        ap_list::ApListKind,
    };

    fn list(kind: ApListKind) -> AccessPointList {
        AccessPointList::new(kind)
    }

    fn ap(essid: &str, bssid: [u8; 6]) -> Arc<AccessPoint> {
        let record = AccessPoint::new();
        record.essid.set(Some(essid.to_owned()));
        record.bssid.set(MacAddress(bssid));
        Arc::new(record)
    }

    fn allowed_entry(essid: &str, trusted: bool, ts_secs: u64) -> Arc<AccessPoint> {
        let record = ap(essid, [0; 6]);
        record.trusted.set(trusted);
        record.timestamp.set(UNIX_EPOCH + Duration::from_secs(ts_secs));
        record.security.set(Some(ApSecurity {
            key: Some(format!("key-{essid}")),
            auth: AuthAlgorithm::OpenSystem,
        }));
        record
    }

    fn never_links(_: &Arc<AccessPoint>) -> bool {
        false
    }

    #[test]
    fn non_scanning_device_without_link_selects_nothing() {
        let scan = list(ApListKind::DeviceSeen);
        let allowed = list(ApListKind::AllowedConfigured);
        let invalid = list(ApListKind::Invalid);

        let best = select_best_ap(false, false, &scan, &allowed, &invalid, None, never_links);
        assert!(best.is_none());
    }

    #[test]
    fn trusted_station_beats_fresher_untrusted_one() {
        let scan = list(ApListKind::DeviceSeen);
        scan.append(ap("x", [1; 6]));
        scan.append(ap("y", [2; 6]));

        let allowed = list(ApListKind::AllowedConfigured);
        allowed.append(allowed_entry("x", true, 100));
        allowed.append(allowed_entry("y", false, 200));

        let invalid = list(ApListKind::Invalid);

        let best =
            select_best_ap(true, false, &scan, &allowed, &invalid, None, never_links).unwrap();
        assert_eq!(best.essid.get().as_deref(), Some("x"));
    }

    #[test]
    fn fresher_timestamp_wins_within_a_tier() {
        let scan = list(ApListKind::DeviceSeen);
        scan.append(ap("old", [1; 6]));
        scan.append(ap("new", [2; 6]));

        let allowed = list(ApListKind::AllowedConfigured);
        allowed.append(allowed_entry("old", false, 100));
        allowed.append(allowed_entry("new", false, 200));

        let invalid = list(ApListKind::Invalid);

        let best =
            select_best_ap(true, false, &scan, &allowed, &invalid, None, never_links).unwrap();
        assert_eq!(best.essid.get().as_deref(), Some("new"));
    }

    #[test]
    fn equal_timestamps_keep_the_earlier_candidate() {
        let scan = list(ApListKind::DeviceSeen);
        scan.append(ap("first", [1; 6]));
        scan.append(ap("second", [2; 6]));

        let allowed = list(ApListKind::AllowedConfigured);
        allowed.append(allowed_entry("first", false, 100));
        allowed.append(allowed_entry("second", false, 100));

        let invalid = list(ApListKind::Invalid);

        let best =
            select_best_ap(true, false, &scan, &allowed, &invalid, None, never_links).unwrap();
        assert_eq!(best.essid.get().as_deref(), Some("first"));
    }

    #[test]
    fn invalid_listed_essid_is_never_selected() {
        let scan = list(ApListKind::DeviceSeen);
        scan.append(ap("banned", [1; 6]));

        let allowed = list(ApListKind::AllowedConfigured);
        allowed.append(allowed_entry("banned", true, 100));

        let invalid = list(ApListKind::Invalid);
        invalid.append(ap("banned", [0; 6]));

        let best = select_best_ap(true, false, &scan, &allowed, &invalid, None, never_links);
        assert!(best.is_none());
    }

    #[test]
    fn factory_default_essid_is_blacklisted() {
        let scan = list(ApListKind::DeviceSeen);
        scan.append(ap("linksys", [0xde, 0xad, 0xbe, 0xef, 0x00, 0x01]));

        let allowed = list(ApListKind::AllowedConfigured);
        allowed.append(allowed_entry("linksys", true, 100));

        let invalid = list(ApListKind::Invalid);

        let best = select_best_ap(true, false, &scan, &allowed, &invalid, None, never_links);
        assert!(best.is_none());
    }

    #[test]
    fn user_address_overrides_the_blacklist() {
        let scan = list(ApListKind::DeviceSeen);
        scan.append(ap("linksys", [0xde, 0xad, 0xbe, 0xef, 0x00, 0x01]));

        let allowed = list(ApListKind::AllowedConfigured);
        let entry = allowed_entry("linksys", true, 100);
        entry
            .user_addresses
            .set(vec![String::from("de:ad:be:ef:00:01")]);
        allowed.append(entry);

        let invalid = list(ApListKind::Invalid);

        let best =
            select_best_ap(true, false, &scan, &allowed, &invalid, None, never_links).unwrap();
        assert_eq!(best.essid.get().as_deref(), Some("linksys"));
    }

    #[test]
    fn winner_receives_security_from_allowed_record() {
        let scan = list(ApListKind::DeviceSeen);
        scan.append(ap("home", [1; 6]));

        let allowed = list(ApListKind::AllowedConfigured);
        allowed.append(allowed_entry("home", true, 100));

        let invalid = list(ApListKind::Invalid);

        let best =
            select_best_ap(true, false, &scan, &allowed, &invalid, None, never_links).unwrap();
        let security = best.security.get().unwrap();
        assert_eq!(security.key.as_deref(), Some("key-home"));
    }

    fn request_for(ap: Arc<AccessPoint>, user_requested: bool) -> Arc<ActivationRequest> {
        Arc::new(ActivationRequest::new(
            ap,
            user_requested,
            tokio_util::sync::CancellationToken::new(),
            crate::service::AppData::for_tests(),
        ))
    }

    #[test]
    fn user_requested_current_ap_is_kept() {
        let current = ap("cafe", [7; 6]);

        let scan = list(ApListKind::DeviceSeen);
        scan.append(current.clone());
        scan.append(ap("better", [8; 6]));

        let allowed = list(ApListKind::AllowedConfigured);
        allowed.append(allowed_entry("better", true, 500));

        let invalid = list(ApListKind::Invalid);
        let req = request_for(current.clone(), true);

        let best = select_best_ap(
            true,
            true,
            &scan,
            &allowed,
            &invalid,
            Some(&req),
            never_links,
        )
        .unwrap();
        assert!(Arc::ptr_eq(&best, &current));
    }

    #[test]
    fn current_ap_gone_from_scan_list_is_not_kept() {
        let current = ap("vanished", [7; 6]);

        let scan = list(ApListKind::DeviceSeen);
        scan.append(ap("fallback", [8; 6]));

        let allowed = list(ApListKind::AllowedConfigured);
        allowed.append(allowed_entry("fallback", false, 500));

        let invalid = list(ApListKind::Invalid);
        let req = request_for(current, true);

        let best = select_best_ap(
            true,
            true,
            &scan,
            &allowed,
            &invalid,
            Some(&req),
            never_links,
        )
        .unwrap();
        assert_eq!(best.essid.get().as_deref(), Some("fallback"));
    }

    #[test]
    fn invalid_listed_current_ap_is_not_kept() {
        let current = ap("banned", [7; 6]);

        let scan = list(ApListKind::DeviceSeen);
        scan.append(current.clone());

        let allowed = list(ApListKind::AllowedConfigured);
        let invalid = list(ApListKind::Invalid);
        invalid.append(ap("banned", [0; 6]));

        let req = request_for(current, true);

        let best = select_best_ap(
            true,
            true,
            &scan,
            &allowed,
            &invalid,
            Some(&req),
            never_links,
        );
        assert!(best.is_none());
    }

    #[test]
    fn never_used_allowed_station_is_not_chosen() {
        let scan = list(ApListKind::DeviceSeen);
        scan.append(ap("untouched", [1; 6]));

        let allowed = list(ApListKind::AllowedConfigured);
        allowed.append(allowed_entry("untouched", false, 0));

        let invalid = list(ApListKind::Invalid);

        let best = select_best_ap(true, false, &scan, &allowed, &invalid, None, never_links);
        assert!(best.is_none());
    }
}
