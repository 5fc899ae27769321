//! The main scheduling context.
//!
//! One task drains the service's work queue in FIFO order. Every AP-list
//! mutation, signal emission, and policy decision happens here, which is
//! what serializes `handle_scan_results` invocations per device and keeps
//! list writers off the device workers.

use std::{
    sync::{Arc, PoisonError},
    time::Duration,
};

use linkman_traits::ServiceMonitoring;
use tokio::sync::mpsc;
use tracing::debug;

use crate::{
    core::device::{
        types::ActivationStage,
        wifi::{association, scan},
    },
    error::Error,
    policy,
    service::{AppData, MainTask, NetworkService},
    types::ScanIntervalPreset,
};

/// Devices manually bumped to a faster cadence fall back to inactive after
/// this long, so nothing stays in `active` forever.
const SCAN_INTERVAL_FALLBACK_SECS: u64 = 120;

impl ServiceMonitoring for NetworkService {
    type Error = Error;

    async fn start_monitoring(&self) -> Result<(), Self::Error> {
        let receiver = self
            .main_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or_else(|| {
                Error::ServiceInitializationFailed(String::from(
                    "main scheduling context already started",
                ))
            })?;

        tokio::spawn(run_main_context(self.app.clone(), receiver));
        Ok(())
    }
}

async fn run_main_context(app: Arc<AppData>, mut rx: mpsc::UnboundedReceiver<MainTask>) {
    loop {
        tokio::select! {
            _ = app.cancellation_token.cancelled() => {
                debug!("main scheduling context cancelled");
                return;
            }
            task = rx.recv() => {
                match task {
                    None => return,
                    Some(task) => dispatch(&app, task),
                }
            }
        }
    }
}

fn dispatch(app: &Arc<AppData>, task: MainTask) {
    match task {
        MainTask::HandleScanResults { iface, results } => {
            if let Some(dev) = app.device_by_iface(&iface) {
                scan::handle_scan_results(app, &dev, &results);
            }
        }
        MainTask::DeviceChangeCheck => {
            policy::device_change_check(app);
        }
        MainTask::ArmScanIntervalFallback => {
            arm_scan_interval_fallback(app);
        }
        MainTask::ForceActivate {
            iface,
            essid,
            security,
            reply,
        } => {
            let _ = reply.send(force_activate(app, &iface, &essid, security));
        }
        MainTask::SupplyUserKey { iface, key, reply } => {
            let _ = reply.send(supply_user_key(app, &iface, key));
        }
        MainTask::SetAllowedNetworks { networks } => {
            app.allowed_aps.clear();
            for network in networks {
                app.allowed_aps
                    .append(Arc::new(network.into_access_point()));
            }
            // Non-scanning devices mirror the allowed list directly.
            for dev in app.devices_snapshot() {
                if let Some(wifi) = dev.wireless()
                    && !dev
                        .capabilities
                        .get()
                        .contains(crate::core::device::types::DeviceCapabilities::WIRELESS_SCAN)
                {
                    wifi.copy_allowed_to_dev_list(app);
                }
            }
            app.post(MainTask::DeviceChangeCheck);
        }
        MainTask::MarkInvalid { essid } => {
            let declined = crate::core::access_point::AccessPoint::new();
            declined.essid.set(Some(essid));
            app.invalid_aps.append(Arc::new(declined));
            app.post(MainTask::DeviceChangeCheck);
        }
    }
}

/// (Re)arms the global one-shot timer that forces every wireless device
/// back to the inactive cadence.
fn arm_scan_interval_fallback(app: &Arc<AppData>) {
    let mut slot = app
        .scan_fallback
        .lock()
        .unwrap_or_else(PoisonError::into_inner);

    if let Some(previous) = slot.take() {
        previous.abort();
    }

    let timer_app = app.clone();
    *slot = Some(tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(SCAN_INTERVAL_FALLBACK_SECS)).await;
        timer_app.set_scan_interval_now(None, ScanIntervalPreset::Inactive);
    }));
}

fn force_activate(
    app: &Arc<AppData>,
    iface: &str,
    essid: &str,
    security: Option<crate::core::access_point::ApSecurity>,
) -> Result<(), Error> {
    let dev = app
        .device_by_iface(iface)
        .ok_or_else(|| Error::DeviceNotFound(iface.to_owned()))?;
    let wifi = dev
        .wireless()
        .ok_or_else(|| Error::NotWireless(iface.to_owned()))?;

    let ap = association::activation_ap(app, wifi, essid, security)?;
    dev.activate(ap, true);
    Ok(())
}

fn supply_user_key(app: &Arc<AppData>, iface: &str, key: String) -> Result<(), Error> {
    let dev = app
        .device_by_iface(iface)
        .ok_or_else(|| Error::DeviceNotFound(iface.to_owned()))?;

    let waiting = dev
        .act_request
        .get()
        .filter(|req| req.stage.get() == ActivationStage::NeedUserKey);

    match waiting {
        Some(req) => {
            association::resume_with_user_key(&dev, &req, key);
            Ok(())
        }
        None => Err(Error::OperationFailed {
            operation: "supply user key",
            source: std::io::Error::other("no activation is waiting for a key").into(),
        }),
    }
}
