use std::sync::Arc;

use bitflags::bitflags;
use derive_more::Debug;
use linkman_common::Property;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::{core::access_point::AccessPoint, service::AppData};

bitflags! {
    /// Generic capabilities a device variant reports to the base.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct DeviceCapabilities: u32 {
        /// The driver is new enough for this manager to drive it.
        const SUPPORTED = 0x0000_0001;
        /// The device can report carrier state.
        const CARRIER_DETECT = 0x0000_0002;
        /// The device can perform wireless scans.
        const WIRELESS_SCAN = 0x0000_0004;
    }
}

/// Where an in-flight activation currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActivationStage {
    /// Request created, worker not yet configuring the card.
    Prepare,
    /// The card is being configured for the target network.
    DeviceConfig,
    /// Paused until the operator supplies key material.
    NeedUserKey,
    /// The device is attached to the target network.
    Activated,
    /// Configuration gave up.
    Failed,
    /// The request was cancelled before completing.
    Cancelled,
}

/// The in-flight attempt to attach a device to a chosen access point.
#[derive(Debug)]
pub struct ActivationRequest {
    /// The network being attached to.
    pub ap: Arc<AccessPoint>,
    /// Whether the operator asked for this network explicitly.
    pub user_requested: bool,
    /// Current stage of the attempt.
    pub stage: Property<ActivationStage>,
    #[debug(skip)]
    pub(crate) cancel: CancellationToken,
    #[debug(skip)]
    pub(crate) app: Arc<AppData>,
}

impl ActivationRequest {
    pub(crate) fn new(
        ap: Arc<AccessPoint>,
        user_requested: bool,
        cancel: CancellationToken,
        app: Arc<AppData>,
    ) -> Self {
        Self {
            ap,
            user_requested,
            stage: Property::new(ActivationStage::Prepare),
            cancel,
            app,
        }
    }

    /// Whether the worker driving this request should stop.
    pub fn should_cancel(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
