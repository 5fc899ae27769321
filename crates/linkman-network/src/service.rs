//! The network service: application context and public entry points.
//!
//! Owns the allowed/invalid lists, the device table, the event bus, and the
//! main scheduling context all devices post their list work onto. Global
//! state is threaded through constructors as an explicit dependency, never
//! a singleton.

use std::{
    sync::{Arc, Mutex, PoisonError},
    time::SystemTime,
};

use derive_more::Debug;
use linkman_common::Property;
use linkman_traits::{ModelMonitoring, ServiceMonitoring};
use tokio::{
    sync::{broadcast, mpsc, oneshot},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::{
    collaborators::{HardwareDatabase, SupplicantClient, WextSupplicant},
    core::{
        access_point::{AccessPoint, ApSecurity, MacAddress},
        ap_list::{AccessPointList, ApListKind},
        device::Device,
    },
    error::Error,
    types::{ScanIntervalPreset, events::NetworkEvent},
};

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Work posted to the main scheduling context.
///
/// Everything that touches an AP list or emits policy decisions runs here,
/// in FIFO order.
pub(crate) enum MainTask {
    /// A device worker finished a scan.
    HandleScanResults {
        /// Device that scanned.
        iface: String,
        /// Raw kernel result buffer.
        results: Vec<u8>,
    },
    /// Re-run the selection policy over all devices.
    DeviceChangeCheck,
    /// (Re)start the global timer that drops devices back to the inactive
    /// scan cadence.
    ArmScanIntervalFallback,
    /// Operator asked for a specific network.
    ForceActivate {
        iface: String,
        essid: String,
        security: Option<ApSecurity>,
        reply: oneshot::Sender<Result<(), Error>>,
    },
    /// Operator answered a key prompt.
    SupplyUserKey {
        iface: String,
        key: String,
        reply: oneshot::Sender<Result<(), Error>>,
    },
    /// The configured-network store pushed a new allowed list.
    SetAllowedNetworks { networks: Vec<AllowedNetworkConfig> },
    /// Operator declined a network for this session.
    MarkInvalid { essid: String },
}

/// One configured network from the operator's store.
#[derive(Debug, Clone)]
pub struct AllowedNetworkConfig {
    /// Network name.
    pub essid: String,
    /// Station address the network was last seen at, when known.
    pub bssid: Option<MacAddress>,
    /// Whether the operator trusts this network.
    pub trusted: bool,
    /// Stored security descriptor.
    pub security: Option<ApSecurity>,
    /// When the operator last used this network.
    pub timestamp: SystemTime,
    /// Station addresses the operator has explicitly connected to.
    pub user_addresses: Vec<String>,
}

impl AllowedNetworkConfig {
    pub(crate) fn into_access_point(self) -> AccessPoint {
        let ap = AccessPoint::new();
        ap.essid.set(Some(self.essid));
        if let Some(bssid) = self.bssid {
            ap.bssid.set(bssid);
        }
        ap.trusted.set(self.trusted);
        ap.security.set(self.security);
        ap.timestamp.set(self.timestamp);
        ap.user_addresses.set(self.user_addresses);
        ap
    }
}

/// Shared application context, held by the service and every device.
#[derive(Debug)]
pub(crate) struct AppData {
    /// Operator-curated configured networks.
    pub(crate) allowed_aps: AccessPointList,
    /// Networks declined this session.
    pub(crate) invalid_aps: AccessPointList,
    pub(crate) devices: Mutex<Vec<Arc<Device>>>,
    #[debug(skip)]
    pub(crate) main_tx: mpsc::UnboundedSender<MainTask>,
    #[debug(skip)]
    pub(crate) events: broadcast::Sender<NetworkEvent>,
    /// Global switch for all wireless activity.
    pub(crate) wireless_enabled: Property<bool>,
    /// Whether the system is suspended.
    pub(crate) asleep: Property<bool>,
    #[debug(skip)]
    pub(crate) supplicant: Arc<dyn SupplicantClient>,
    #[debug(skip)]
    pub(crate) hardware_db: Option<Arc<dyn HardwareDatabase>>,
    #[debug(skip)]
    pub(crate) scan_fallback: Mutex<Option<JoinHandle<()>>>,
    #[debug(skip)]
    pub(crate) cancellation_token: CancellationToken,
}

impl AppData {
    /// Posts work to the main scheduling context. Safe from any thread;
    /// silently dropped during shutdown.
    pub(crate) fn post(&self, task: MainTask) {
        let _ = self.main_tx.send(task);
    }

    /// Emits an event toward external consumers; nobody listening is fine.
    pub(crate) fn emit(&self, event: NetworkEvent) {
        let _ = self.events.send(event);
    }

    pub(crate) fn devices_snapshot(&self) -> Vec<Arc<Device>> {
        self.devices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn device_by_iface(&self, iface: &str) -> Option<Arc<Device>> {
        self.devices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|dev| dev.iface() == iface)
            .cloned()
    }

    /// Applies a scan cadence to one device (or all wireless devices) and
    /// keeps the 120-second inactive fallback armed.
    pub(crate) fn set_scan_interval_now(&self, iface: Option<&str>, preset: ScanIntervalPreset) {
        for dev in self.devices_snapshot() {
            if let Some(only) = iface
                && dev.iface() != only
            {
                continue;
            }
            if let Some(wifi) = dev.wireless() {
                wifi.scan_interval_secs.set(preset.seconds());
            }
        }

        if preset != ScanIntervalPreset::Inactive {
            self.post(MainTask::ArmScanIntervalFallback);
        }
    }
}

#[cfg(test)]
impl AppData {
    pub(crate) fn for_tests() -> Arc<Self> {
        let (main_tx, _main_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Arc::new(Self {
            allowed_aps: AccessPointList::new(ApListKind::AllowedConfigured),
            invalid_aps: AccessPointList::new(ApListKind::Invalid),
            devices: Mutex::new(Vec::new()),
            main_tx,
            events,
            wireless_enabled: Property::new(true),
            asleep: Property::new(false),
            supplicant: Arc::new(WextSupplicant),
            hardware_db: None,
            scan_fallback: Mutex::new(None),
            cancellation_token: CancellationToken::new(),
        })
    }
}

/// Entry point for the connection-manager core. See [crate-level
/// docs](crate) for usage.
#[derive(Debug)]
pub struct NetworkService {
    pub(crate) app: Arc<AppData>,
    #[debug(skip)]
    pub(crate) main_rx: Mutex<Option<mpsc::UnboundedReceiver<MainTask>>>,
    #[debug(skip)]
    pub(crate) cancellation_token: CancellationToken,
}

impl NetworkService {
    /// Starts the service with the built-in WEP/open supplicant and no
    /// hardware database.
    ///
    /// # Errors
    /// Returns `Error::ServiceInitializationFailed` if the main scheduling
    /// context cannot be started.
    #[instrument]
    pub async fn new() -> Result<Self, Error> {
        Self::with_collaborators(Arc::new(WextSupplicant), None).await
    }

    /// Starts the service with explicit collaborators.
    ///
    /// # Errors
    /// Returns `Error::ServiceInitializationFailed` if the main scheduling
    /// context cannot be started.
    pub async fn with_collaborators(
        supplicant: Arc<dyn SupplicantClient>,
        hardware_db: Option<Arc<dyn HardwareDatabase>>,
    ) -> Result<Self, Error> {
        let (main_tx, main_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let cancellation_token = CancellationToken::new();

        let app = Arc::new(AppData {
            allowed_aps: AccessPointList::new(ApListKind::AllowedConfigured),
            invalid_aps: AccessPointList::new(ApListKind::Invalid),
            devices: Mutex::new(Vec::new()),
            main_tx,
            events,
            wireless_enabled: Property::new(true),
            asleep: Property::new(false),
            supplicant,
            hardware_db,
            scan_fallback: Mutex::new(None),
            cancellation_token: cancellation_token.clone(),
        });

        let service = Self {
            app,
            main_rx: Mutex::new(Some(main_rx)),
            cancellation_token,
        };

        service.start_monitoring().await?;

        Ok(service)
    }

    /// Subscribes to the service's event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<NetworkEvent> {
        self.app.events.subscribe()
    }

    /// Registers a wireless interface reported by the hardware enumerator.
    ///
    /// # Errors
    /// Fails when the interface does not answer basic ioctls.
    #[instrument(skip(self))]
    pub async fn add_wireless_device(&self, iface: &str, udi: &str) -> Result<Arc<Device>, Error> {
        let app = self.app.clone();
        let iface = iface.to_owned();
        let udi = udi.to_owned();

        let device = tokio::task::spawn_blocking(move || Device::new_wireless(iface, udi, app))
            .await
            .map_err(|e| Error::OperationFailed {
                operation: "create wireless device",
                source: e.into(),
            })??;

        self.register(Arc::new(device)).await
    }

    /// Registers a wired interface reported by the hardware enumerator.
    ///
    /// # Errors
    /// Fails when the interface does not answer basic ioctls.
    #[instrument(skip(self))]
    pub async fn add_wired_device(&self, iface: &str, udi: &str) -> Result<Arc<Device>, Error> {
        let app = self.app.clone();
        let iface = iface.to_owned();
        let udi = udi.to_owned();

        let device = tokio::task::spawn_blocking(move || Device::new_wired(iface, udi, app))
            .await
            .map_err(|e| Error::OperationFailed {
                operation: "create wired device",
                source: e.into(),
            })??;

        self.register(Arc::new(device)).await
    }

    async fn register(&self, device: Arc<Device>) -> Result<Arc<Device>, Error> {
        self.app
            .devices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(device.clone());

        device.clone().start_monitoring().await?;
        self.app.post(MainTask::DeviceChangeCheck);

        Ok(device)
    }

    /// Forgets a device the enumerator reported as removed.
    ///
    /// # Errors
    /// Returns `Error::DeviceNotFound` for unknown interfaces.
    pub fn remove_device(&self, iface: &str) -> Result<(), Error> {
        let mut devices = self
            .app
            .devices
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let position = devices
            .iter()
            .position(|dev| dev.iface() == iface)
            .ok_or_else(|| Error::DeviceNotFound(iface.to_owned()))?;

        let device = devices.remove(position);
        device.cancel.cancel();
        if let Some(req) = device.act_request.get() {
            req.cancel.cancel();
        }
        Ok(())
    }

    /// All registered devices.
    pub fn devices(&self) -> Vec<Arc<Device>> {
        self.app.devices_snapshot()
    }

    /// The device for an interface name, if registered.
    pub fn device(&self, iface: &str) -> Option<Arc<Device>> {
        self.app.device_by_iface(iface)
    }

    /// Enables or disables all wireless activity.
    pub fn set_wireless_enabled(&self, enabled: bool) {
        self.app.wireless_enabled.set(enabled);
        self.app.post(MainTask::DeviceChangeCheck);
    }

    /// Marks the system as suspended or awake.
    pub fn set_asleep(&self, asleep: bool) {
        self.app.asleep.set(asleep);
        self.app.post(MainTask::DeviceChangeCheck);
    }

    /// Applies a scan cadence to one device, or to all wireless devices.
    pub fn set_scan_interval(&self, iface: Option<&str>, preset: ScanIntervalPreset) {
        self.app.set_scan_interval_now(iface, preset);
    }

    /// Forces activation of a named network on a device.
    ///
    /// Creates an artificial record when the network is not in the scan
    /// list, in which case security information is mandatory.
    ///
    /// # Errors
    /// Returns `Error::DeviceNotFound`, `Error::NotWireless`, or
    /// `Error::MissingSecurity` for the respective misuses.
    pub async fn force_activate(
        &self,
        iface: &str,
        essid: &str,
        security: Option<ApSecurity>,
    ) -> Result<(), Error> {
        let (reply, response) = oneshot::channel();
        self.app.post(MainTask::ForceActivate {
            iface: iface.to_owned(),
            essid: essid.to_owned(),
            security,
            reply,
        });
        response.await.map_err(|_| Error::ShuttingDown)?
    }

    /// Supplies key material for an activation paused on `NeedUserKey`.
    ///
    /// # Errors
    /// Returns `Error::DeviceNotFound` for unknown interfaces or
    /// `Error::OperationFailed` when no activation is waiting for a key.
    pub async fn supply_user_key(&self, iface: &str, key: &str) -> Result<(), Error> {
        let (reply, response) = oneshot::channel();
        self.app.post(MainTask::SupplyUserKey {
            iface: iface.to_owned(),
            key: key.to_owned(),
            reply,
        });
        response.await.map_err(|_| Error::ShuttingDown)?
    }

    /// Replaces the allowed-network list from the configured-network store.
    pub fn set_allowed_networks(&self, networks: Vec<AllowedNetworkConfig>) {
        self.app.post(MainTask::SetAllowedNetworks { networks });
    }

    /// Declines a network for the rest of this session.
    pub fn mark_invalid(&self, essid: &str) {
        self.app.post(MainTask::MarkInvalid {
            essid: essid.to_owned(),
        });
    }
}

impl Drop for NetworkService {
    fn drop(&mut self) {
        self.cancellation_token.cancel();
        // Devices hold the context and the context holds the devices;
        // dropping the table here breaks the cycle.
        self.app
            .devices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}
