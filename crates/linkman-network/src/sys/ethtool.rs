//! Wired carrier-detection probes: ethtool, MII, and the sysfs carrier file.

#![allow(unsafe_code)]

use std::{fs, io, mem};

use tracing::warn;

use super::socket::{DeviceSocket, SocketKind};

const SIOCETHTOOL: libc::c_ulong = 0x8946;
const SIOCGMIIPHY: libc::c_ulong = 0x8947;
const SIOCGMIIREG: libc::c_ulong = 0x8948;

const ETHTOOL_GLINK: u32 = 0x0000_000a;

/// Basic mode status register.
const MII_BMSR: u16 = 0x01;

/// `struct ethtool_value`
#[repr(C)]
#[allow(dead_code)]
struct EthtoolValue {
    cmd: u32,
    data: u32,
}

/// `struct mii_ioctl_data`
#[repr(C)]
#[derive(Clone, Copy, Default)]
#[allow(dead_code)]
struct MiiIoctlData {
    phy_id: u16,
    reg_num: u16,
    val_in: u16,
    val_out: u16,
}

fn ifreq_for(iface: &str) -> libc::ifreq {
    let mut ifr: libc::ifreq = unsafe { mem::zeroed() };
    for (dst, src) in ifr
        .ifr_name
        .iter_mut()
        .zip(iface.bytes().take(libc::IFNAMSIZ - 1))
    {
        *dst = src as libc::c_char;
    }
    ifr
}

fn ioctl(sock: &DeviceSocket, request: libc::c_ulong, ifr: &mut libc::ifreq) -> io::Result<()> {
    let rc = unsafe { libc::ioctl(sock.fd(), request as _, ifr as *mut libc::ifreq) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Whether the driver answers the ethtool link ioctl at all.
pub(crate) fn supports_ethtool_carrier_detect(iface: &str) -> bool {
    let Ok(sock) = DeviceSocket::open(iface, SocketKind::General) else {
        warn!(iface, "cannot open socket for ethtool detect");
        return false;
    };

    let mut edata = EthtoolValue {
        cmd: ETHTOOL_GLINK,
        data: 0,
    };
    let mut ifr = ifreq_for(iface);
    ifr.ifr_ifru.ifru_data = (&raw mut edata).cast();

    ioctl(&sock, SIOCETHTOOL, &mut ifr).is_ok()
}

fn mdio_read(sock: &DeviceSocket, ifr: &mut libc::ifreq, location: u16) -> Option<u16> {
    // The MII data lives in the ifreq union area itself.
    let mii = (&raw mut ifr.ifr_ifru).cast::<MiiIoctlData>();
    unsafe {
        (*mii).reg_num = location;
    }

    if ioctl(sock, SIOCGMIIREG, ifr).is_ok() {
        Some(unsafe { (*mii).val_out })
    } else {
        None
    }
}

/// Whether the PHY answers an MII read of the basic status register.
pub(crate) fn supports_mii_carrier_detect(iface: &str) -> bool {
    let Ok(sock) = DeviceSocket::open(iface, SocketKind::General) else {
        warn!(iface, "cannot open socket for MII detect");
        return false;
    };

    let mut ifr = ifreq_for(iface);
    if ioctl(&sock, SIOCGMIIPHY, &mut ifr).is_err() {
        return false;
    }

    mdio_read(&sock, &mut ifr, MII_BMSR).is_some()
}

/// Reads the sysfs carrier state for the interface. Absent or unreadable
/// files report no carrier.
pub(crate) fn read_carrier(iface: &str) -> bool {
    let path = format!("/sys/class/net/{iface}/carrier");
    match fs::read_to_string(path) {
        Ok(contents) => contents.trim().parse::<i32>().map(|v| v != 0).unwrap_or(false),
        Err(_) => false,
    }
}
