//! Wired (Ethernet) device variant.

use tracing::debug;

use crate::{
    collaborators::HardwareDatabase,
    core::device::types::DeviceCapabilities,
    sys::ethtool,
};

/// Per-interface state of a wired device.
///
/// Carrier is derived lazily from sysfs on each probe; nothing is cached
/// beyond the base device's capability flags.
#[derive(Debug, Default)]
pub struct WiredDevice;

impl WiredDevice {
    /// Discovers the generic capabilities of a wired interface.
    ///
    /// `cipsec` tunnel interfaces and Ethernet-over-USB devices are
    /// unsupported outright. Carrier detection requires the driver to
    /// answer either the ethtool link ioctl or an MII status read.
    pub(crate) fn discover_generic_capabilities(
        iface: &str,
        udi: &str,
        hardware_db: Option<&dyn HardwareDatabase>,
    ) -> DeviceCapabilities {
        if iface.contains("cipsec") {
            return DeviceCapabilities::empty();
        }

        if let Some(db) = hardware_db
            && db.device_property(udi, "usb.interface.class").is_some()
        {
            debug!(iface, "ignoring Ethernet-over-USB device");
            return DeviceCapabilities::empty();
        }

        let mut caps = DeviceCapabilities::SUPPORTED;
        if ethtool::supports_ethtool_carrier_detect(iface)
            || ethtool::supports_mii_carrier_detect(iface)
        {
            caps |= DeviceCapabilities::CARRIER_DETECT;
        }

        caps
    }

    /// Reads the current link state.
    ///
    /// Devices without carrier detection always report a link: they are
    /// never auto-selected, so the operator is assumed to know whether the
    /// cable is plugged in.
    pub(crate) fn probe_link(iface: &str, caps: DeviceCapabilities) -> bool {
        if !caps.contains(DeviceCapabilities::CARRIER_DETECT) {
            return true;
        }

        ethtool::read_carrier(iface)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct UsbDatabase;

    impl HardwareDatabase for UsbDatabase {
        fn device_property(&self, _udi: &str, key: &str) -> Option<String> {
            (key == "usb.interface.class").then(|| String::from("255"))
        }
    }

    #[test]
    fn cipsec_interfaces_are_unsupported() {
        let caps = WiredDevice::discover_generic_capabilities("cipsec0", "/udi/x", None);
        assert_eq!(caps, DeviceCapabilities::empty());
    }

    #[test]
    fn usb_ethernet_is_unsupported() {
        let caps =
            WiredDevice::discover_generic_capabilities("eth1", "/udi/usb", Some(&UsbDatabase));
        assert_eq!(caps, DeviceCapabilities::empty());
    }

    #[test]
    fn no_carrier_detect_means_always_linked() {
        assert!(WiredDevice::probe_link("eth9", DeviceCapabilities::SUPPORTED));
    }
}
