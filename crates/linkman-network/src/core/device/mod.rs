//! Device base: activation lifecycle, capability flags, and dispatch to the
//! wired/wireless variants.
//!
//! The base performs no ioctls of its own; it sequences calls into the
//! variant behind a tagged enum, so dispatch is static.

pub mod types;
pub mod wifi;
pub mod wired;

use std::sync::Arc;

use derive_more::Debug;
use linkman_common::Property;
use linkman_traits::ModelMonitoring;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    core::access_point::{AccessPoint, Ap80211Capabilities, MacAddress},
    error::Error,
    service::{AppData, MainTask},
    sys::netdev,
};

use types::{ActivationRequest, ActivationStage, DeviceCapabilities};
use wifi::{WirelessDevice, association};
use wired::WiredDevice;

/// Seconds between link probes on the device worker.
const LINK_PROBE_INTERVAL_SECS: u64 = 2;

/// The wired/wireless specialization of a device.
#[derive(Debug)]
pub enum DeviceKind {
    /// 802.11 wireless interface.
    Wireless(WirelessDevice),
    /// Ethernet interface.
    Wired(WiredDevice),
}

/// A managed network interface.
#[derive(Debug)]
pub struct Device {
    iface: String,
    udi: String,
    /// Hardware address of the interface.
    pub hw_address: Property<MacAddress>,
    /// Generic capabilities discovered at creation.
    pub capabilities: Property<DeviceCapabilities>,
    /// The in-flight activation, if any.
    pub act_request: Property<Option<Arc<ActivationRequest>>>,
    /// Whether the device currently has a usable link.
    pub has_link: Property<bool>,
    #[debug(skip)]
    pub(crate) app: Arc<AppData>,
    #[debug(skip)]
    pub(crate) cancel: CancellationToken,
    kind: DeviceKind,
}

impl Device {
    /// Builds a wireless device, reading driver state. Blocking.
    ///
    /// # Errors
    /// Fails when the interface does not answer basic ioctls (typically: it
    /// does not exist).
    pub(crate) fn new_wireless(iface: String, udi: String, app: Arc<AppData>) -> Result<Self, Error> {
        let hw = netdev::get_hw_address(&iface).map_err(|e| Error::Ioctl {
            operation: "read hardware address",
            iface: iface.clone(),
            source: e,
        })?;

        let caps = WirelessDevice::discover_generic_capabilities(&iface);
        let wifi = WirelessDevice::init(&iface, caps, &app);
        let cancel = app.cancellation_token.child_token();

        Ok(Self {
            iface,
            udi,
            hw_address: Property::new(MacAddress(hw)),
            capabilities: Property::new(caps),
            act_request: Property::new(None),
            has_link: Property::new(false),
            app,
            cancel,
            kind: DeviceKind::Wireless(wifi),
        })
    }

    /// Builds a wired device. Blocking.
    ///
    /// # Errors
    /// Fails when the interface does not answer basic ioctls.
    pub(crate) fn new_wired(iface: String, udi: String, app: Arc<AppData>) -> Result<Self, Error> {
        let hw = netdev::get_hw_address(&iface).map_err(|e| Error::Ioctl {
            operation: "read hardware address",
            iface: iface.clone(),
            source: e,
        })?;

        let caps =
            WiredDevice::discover_generic_capabilities(&iface, &udi, app.hardware_db.as_deref());
        let cancel = app.cancellation_token.child_token();

        Ok(Self {
            iface,
            udi,
            hw_address: Property::new(MacAddress(hw)),
            capabilities: Property::new(caps),
            act_request: Property::new(None),
            has_link: Property::new(false),
            app,
            cancel,
            kind: DeviceKind::Wired(WiredDevice),
        })
    }

    /// Interface name.
    pub fn iface(&self) -> &str {
        &self.iface
    }

    /// Platform device identifier.
    pub fn udi(&self) -> &str {
        &self.udi
    }

    /// The wireless variant, if this is a wireless device.
    pub fn wireless(&self) -> Option<&WirelessDevice> {
        match &self.kind {
            DeviceKind::Wireless(wifi) => Some(wifi),
            DeviceKind::Wired(_) => None,
        }
    }

    /// The wired variant, if this is a wired device.
    pub fn wired(&self) -> Option<&WiredDevice> {
        match &self.kind {
            DeviceKind::Wired(wired) => Some(wired),
            DeviceKind::Wireless(_) => None,
        }
    }

    /// Whether this device is wireless.
    pub fn is_wireless(&self) -> bool {
        matches!(self.kind, DeviceKind::Wireless(_))
    }

    /// Variant-specific capability bits (the 802.11 capability mask for
    /// wireless devices; wired devices have none).
    pub fn type_capabilities(&self) -> Ap80211Capabilities {
        match &self.kind {
            DeviceKind::Wireless(wifi) => wifi.capabilities_80211.get(),
            DeviceKind::Wired(_) => Ap80211Capabilities::empty(),
        }
    }

    /// Whether an activation attempt is currently in flight (including one
    /// paused waiting for a key).
    pub fn is_activating(&self) -> bool {
        self.act_request.get().is_some_and(|req| {
            matches!(
                req.stage.get(),
                ActivationStage::Prepare
                    | ActivationStage::DeviceConfig
                    | ActivationStage::NeedUserKey
            )
        })
    }

    /// Whether the device is attached to its target network.
    pub fn is_activated(&self) -> bool {
        self.act_request
            .get()
            .is_some_and(|req| req.stage.get() == ActivationStage::Activated)
    }

    /// Last probed link state.
    pub fn has_active_link(&self) -> bool {
        self.has_link.get()
    }

    /// Probes the current link state through the variant. Blocking.
    pub fn probe_link(&self) -> bool {
        match &self.kind {
            DeviceKind::Wired(_) => WiredDevice::probe_link(&self.iface, self.capabilities.get()),
            DeviceKind::Wireless(wifi) => {
                let link = match self.act_request.get() {
                    Some(req) => wifi.link_to_specific_ap(&self.iface, &req.ap, true),
                    None => false,
                };
                wifi.update_signal_strength(&self.iface, &self.app, self.act_request.get().is_some());
                link
            }
        }
    }

    /// Brings the interface up and waits for the kernel to agree. Blocking.
    pub fn bring_up_wait(&self, timeout_secs: u64) -> bool {
        netdev::set_up_wait(&self.iface, true, timeout_secs)
    }

    /// Takes the interface down and waits for the kernel to agree. Blocking.
    pub fn bring_down_wait(&self, timeout_secs: u64) -> bool {
        netdev::set_up_wait(&self.iface, false, timeout_secs)
    }

    /// Starts attaching the device to the given access point, cancelling
    /// any previous attempt.
    pub(crate) fn activate(self: &Arc<Self>, ap: Arc<AccessPoint>, user_requested: bool) {
        if let Some(prev) = self.act_request.get() {
            prev.cancel.cancel();
            prev.stage.set(ActivationStage::Cancelled);
        }

        let req = Arc::new(ActivationRequest::new(
            ap,
            user_requested,
            self.cancel.child_token(),
            self.app.clone(),
        ));
        self.act_request.set(Some(req.clone()));
        self.spawn_activation(req);
    }

    /// Runs (or re-runs) the configuration worker for an activation
    /// request.
    pub(crate) fn spawn_activation(self: &Arc<Self>, req: Arc<ActivationRequest>) {
        let dev = self.clone();
        tokio::spawn(async move {
            req.stage.set(ActivationStage::DeviceConfig);

            let blocking_dev = dev.clone();
            let blocking_req = req.clone();
            let outcome =
                tokio::task::spawn_blocking(move || {
                    association::activation_config(&blocking_dev, &blocking_req)
                })
                .await
                .ok();

            match outcome {
                Some(association::ConfigOutcome::Success) => {
                    req.stage.set(ActivationStage::Activated);
                    dev.has_link.set(true);
                    if let Some(wifi) = dev.wireless() {
                        wifi.reset_failed_link_count();
                    }
                }
                Some(association::ConfigOutcome::NeedKey) => {
                    req.stage.set(ActivationStage::NeedUserKey);
                }
                Some(association::ConfigOutcome::Failed) | None => {
                    if req.should_cancel() {
                        req.stage.set(ActivationStage::Cancelled);
                    } else {
                        req.stage.set(ActivationStage::Failed);
                        warn!(iface = %dev.iface, "activation failed");
                    }
                    if let Some(current) = dev.act_request.get()
                        && Arc::ptr_eq(&current, &req)
                    {
                        dev.act_request.set(None);
                    }
                    dev.app.post(MainTask::DeviceChangeCheck);
                }
            }
        });
    }

    /// Tears down the current activation and leaves the network. Blocking.
    pub(crate) fn deactivate(&self) {
        if let Some(req) = self.act_request.get() {
            req.cancel.cancel();
            req.stage.set(ActivationStage::Cancelled);
        }
        self.act_request.set(None);
        self.has_link.set(false);

        if let DeviceKind::Wireless(wifi) = &self.kind {
            wifi.deactivate(&self.iface, &self.app);
        }
    }
}

impl ModelMonitoring for Device {
    type Error = Error;

    async fn start_monitoring(self: Arc<Self>) -> Result<(), Self::Error> {
        let probe_dev = self.clone();
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(std::time::Duration::from_secs(LINK_PROBE_INTERVAL_SECS));
            loop {
                tokio::select! {
                    _ = probe_dev.cancel.cancelled() => {
                        debug!(iface = %probe_dev.iface, "link probing cancelled");
                        return;
                    }
                    _ = interval.tick() => {
                        let dev = probe_dev.clone();
                        let link = tokio::task::spawn_blocking(move || dev.probe_link())
                            .await
                            .unwrap_or(false);
                        probe_dev.has_link.set(link);
                    }
                }
            }
        });

        let caps = self.capabilities.get();
        if self.is_wireless()
            && caps.contains(DeviceCapabilities::SUPPORTED)
            && caps.contains(DeviceCapabilities::WIRELESS_SCAN)
        {
            tokio::spawn(wifi::scan::run_scan_loop(self));
        }

        Ok(())
    }
}

impl PartialEq for ActivationRequest {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self, other)
    }
}

#[cfg(test)]
impl Device {
    /// Installs an already-activated request without touching hardware.
    pub(crate) fn activate_for_tests(self: &Arc<Self>, ap: Arc<AccessPoint>) {
        let req = Arc::new(ActivationRequest::new(
            ap,
            true,
            self.cancel.child_token(),
            self.app.clone(),
        ));
        req.stage.set(ActivationStage::Activated);
        self.act_request.set(Some(req));
    }

    pub(crate) fn test_wireless(app: Arc<AppData>) -> Arc<Self> {
        Arc::new(Self {
            iface: String::from("wlan0"),
            udi: String::from("/test/wlan0"),
            hw_address: Property::new(MacAddress::default()),
            capabilities: Property::new(
                DeviceCapabilities::SUPPORTED | DeviceCapabilities::WIRELESS_SCAN,
            ),
            act_request: Property::new(None),
            has_link: Property::new(false),
            app,
            cancel: CancellationToken::new(),
            kind: DeviceKind::Wireless(WirelessDevice::test_state()),
        })
    }
}
