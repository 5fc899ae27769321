//! Per-device state machinery and the wireless scanning/association engine
//! of a Linux network-connection manager.
//!
//! The service owns one worker per device for blocking kernel work and a
//! single main scheduling context for everything that touches an AP list.
//! Wireless devices scan on a cadence, fold sightings into a per-device
//! list with aging and hidden-essid recovery, and the selection policy
//! picks the network to drive the card onto. Consumers watch reactive
//! [`Property`](linkman_common::Property) state and subscribe to the event
//! bus; IPC, configuration storage, DHCP, and supplicant integration are
//! external collaborators.

/// External collaborator seams
pub mod collaborators;
/// Core network domain models
pub mod core;
mod error;
mod monitoring;
mod policy;
mod service;
mod sys;
/// Network type definitions
pub mod types;

pub use error::Error;
pub use service::{AllowedNetworkConfig, NetworkService};
pub use sys::FrequencyEntry;
