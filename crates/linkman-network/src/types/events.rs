//! Events the core emits toward external consumers.
//!
//! The core speaks no IPC protocol itself; an IPC frontend subscribes to the
//! service's broadcast channel and forwards these however it likes.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::access_point::AccessPoint;

/// What happened to a wireless network in a device's view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WirelessNetworkStatus {
    /// First sighting of this station.
    Appeared,
    /// The station aged out of the scan list.
    Disappeared,
    /// The station's signal strength moved.
    StrengthChanged,
}

/// An externally visible state change.
#[derive(Debug, Clone)]
pub enum NetworkEvent {
    /// A device's view of a wireless network changed.
    WirelessNetworkChange {
        /// Interface that observed the change.
        iface: String,
        /// The network in question.
        ap: Arc<AccessPoint>,
        /// What changed.
        status: WirelessNetworkStatus,
        /// New strength percent for strength changes, −1 otherwise.
        strength: i8,
    },
    /// The strength of a device's current association changed.
    DeviceStrengthChange {
        /// Interface whose strength moved.
        iface: String,
        /// New strength percent, −1 when unknown.
        percent: i8,
    },
    /// An activation needs key material only the operator can supply.
    NeedUserKey {
        /// Interface that is waiting.
        iface: String,
        /// Network the key is for.
        essid: String,
    },
}
