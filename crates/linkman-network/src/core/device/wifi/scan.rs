//! The per-device scan loop.
//!
//! A device worker runs the blocking scan cycle; the resulting byte buffer
//! is posted to the main scheduling context, which decodes it, folds the
//! records into the device's AP list, ages out stale stations, and triggers
//! the selection policy. The AP list is only ever mutated there.

use std::{
    sync::Arc,
    time::{Duration, SystemTime},
};

use tracing::{debug, warn};

use crate::{
    core::{
        access_point::AccessPoint,
        ap_list::MergeOutcome,
        device::{Device, types::DeviceCapabilities},
    },
    service::{AppData, MainTask},
    sys::{
        socket::{DeviceSocket, SocketKind},
        wext,
    },
    types::{
        ScanIntervalPreset,
        events::{NetworkEvent, WirelessNetworkStatus},
    },
};

use super::{WirelessDevice, decoder::decode_scan_results};

/// Stations unseen for this long are dropped from the device list.
const AP_EXPIRY_SECS: u64 = 180;

/// Pause after the scan trigger before the first result read.
const POST_TRIGGER_PAUSE_MS: u64 = 250;

/// A/B/G cards with long dwell times only scan while disconnected.
const MANY_FREQS_THRESHOLD: usize = 14;

/// Runs the scan cadence for one wireless device until cancelled.
///
/// The first cycle fires immediately; every cycle, even a failed one,
/// schedules the next after the current interval.
pub(crate) async fn run_scan_loop(dev: Arc<Device>) {
    loop {
        let cycle_dev = dev.clone();
        let results = tokio::task::spawn_blocking(move || scan_cycle(&cycle_dev))
            .await
            .ok()
            .flatten();

        if let Some(results) = results {
            if let Some(wifi) = dev.wireless() {
                wifi.last_scan.set(Some(SystemTime::now()));
            }
            dev.app.post(MainTask::HandleScanResults {
                iface: dev.iface().to_owned(),
                results,
            });
        }

        let interval = dev
            .wireless()
            .map(|wifi| wifi.scan_interval_secs.get())
            .unwrap_or_else(|| ScanIntervalPreset::Inactive.seconds());

        tokio::select! {
            _ = dev.cancel.cancelled() => {
                debug!(iface = %dev.iface(), "scan loop cancelled");
                return;
            }
            _ = tokio::time::sleep(Duration::from_secs(u64::from(interval))) => {}
        }
    }
}

/// One blocking scan cycle. Returns the raw result buffer when the card
/// produced one.
fn scan_cycle(dev: &Device) -> Option<Vec<u8>> {
    let wifi = dev.wireless()?;
    let iface = dev.iface();

    let caps = dev.capabilities.get();
    if !caps.contains(DeviceCapabilities::SUPPORTED)
        || !caps.contains(DeviceCapabilities::WIRELESS_SCAN)
    {
        return None;
    }

    // Scanning while disabled, asleep, or mid-activation would fight the
    // card; come back quickly instead.
    if !dev.app.wireless_enabled.get() || dev.app.asleep.get() || dev.is_activating() {
        dev.app
            .set_scan_interval_now(Some(iface), ScanIntervalPreset::Init);
        return None;
    }

    // A/B/G cards need long dwell times; only scan them while disconnected.
    if wifi.freqs.len() > MANY_FREQS_THRESHOLD && dev.is_activated() {
        dev.app
            .set_scan_interval_now(Some(iface), ScanIntervalPreset::Active);
        return None;
    }

    let Ok(guard) = wifi.scan_mutex.try_lock() else {
        return None;
    };

    if !dev.bring_up_wait(1) {
        return None;
    }

    let Ok(sock) = DeviceSocket::open(iface, SocketKind::Wireless) else {
        return None;
    };

    let orig_mode = wext::get_mode(iface);
    let (orig_freq, orig_rate) = if orig_mode == wext::IW_MODE_ADHOC {
        (wext::get_frequency(iface), wext::get_bitrate(iface))
    } else {
        (0.0, 0)
    };

    // Ad-hoc mode yields partial scan lists; force infrastructure and
    // any-channel for the duration.
    wext::set_mode(iface, wext::IW_MODE_INFRA);
    wext::set_frequency(iface, 0.0);

    let mut results = None;
    match wext::trigger_scan(&sock, iface) {
        Err(e) => {
            warn!(iface, error = %e, "couldn't trigger wireless scan");
        }
        Ok(()) => {
            std::thread::sleep(Duration::from_millis(POST_TRIGGER_PAUSE_MS));
            match wext::get_scan_results(&sock, iface) {
                Ok(buf) => results = Some(buf),
                Err(e) => {
                    warn!(iface, error = %e, "reading scan results failed");
                }
            }
        }
    }

    wext::set_mode(iface, orig_mode);
    if orig_mode == wext::IW_MODE_ADHOC {
        wext::set_frequency(iface, orig_freq);
        wext::set_bitrate(iface, orig_rate);
    }

    drop(guard);
    results
}

/// Folds a scan's raw buffer into the device state. Main context only.
pub(crate) fn handle_scan_results(app: &Arc<AppData>, dev: &Arc<Device>, results: &[u8]) {
    let Some(wifi) = dev.wireless() else {
        return;
    };

    let decoded = if results.is_empty() {
        Vec::new()
    } else {
        decode_scan_results(results, wifi.we_version, &wifi.max_qual, &wifi.avg_qual)
    };

    process_scan_results(app, dev, wifi, decoded);
}

fn process_scan_results(
    app: &Arc<AppData>,
    dev: &Arc<Device>,
    wifi: &WirelessDevice,
    decoded: Vec<AccessPoint>,
) {
    let now = SystemTime::now();

    for ap in decoded {
        ap.last_seen.set(now);

        // Non-broadcasting stations: recover the essid from the allowed
        // list's known MAC associations.
        if ap.essid.get().is_none() {
            app.allowed_aps.copy_one_essid_by_address(&ap);
        }

        let (merged, outcome) = wifi.ap_list.merge_scanned(ap);
        match outcome {
            MergeOutcome::Inserted => {
                app.emit(NetworkEvent::WirelessNetworkChange {
                    iface: dev.iface().to_owned(),
                    ap: merged,
                    status: WirelessNetworkStatus::Appeared,
                    strength: -1,
                });
            }
            MergeOutcome::StrengthChanged => {
                let strength = merged.strength.get();
                app.emit(NetworkEvent::WirelessNetworkChange {
                    iface: dev.iface().to_owned(),
                    ap: merged,
                    status: WirelessNetworkStatus::StrengthChanged,
                    strength,
                });
            }
            MergeOutcome::Unchanged => {}
        }
    }

    wifi.ap_list.copy_properties_from(&app.allowed_aps);

    age_out_stale_aps(app, dev, wifi, now);

    app.post(MainTask::DeviceChangeCheck);
}

/// Removes stations unseen for [`AP_EXPIRY_SECS`], sparing the one the
/// device is currently associated with.
fn age_out_stale_aps(app: &Arc<AppData>, dev: &Arc<Device>, wifi: &WirelessDevice, now: SystemTime) {
    let current_essid = dev
        .act_request
        .get()
        .and_then(|req| req.ap.essid.get());

    let mut outdated = Vec::new();
    for ap in wifi.ap_list.snapshot() {
        let essid = ap.essid.get();
        if essid.is_some() && essid == current_essid {
            continue;
        }

        let expired = matches!(
            ap.last_seen.get().checked_add(Duration::from_secs(AP_EXPIRY_SECS)),
            Some(cutoff) if cutoff < now
        );
        if expired {
            outdated.push(ap);
        }
    }

    for ap in outdated {
        app.emit(NetworkEvent::WirelessNetworkChange {
            iface: dev.iface().to_owned(),
            ap: ap.clone(),
            status: WirelessNetworkStatus::Disappeared,
            strength: -1,
        });
        wifi.ap_list.remove(&ap);
    }
}
