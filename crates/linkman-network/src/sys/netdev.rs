//! General network-interface ioctls: hardware address and link flags.

#![allow(unsafe_code)]

use std::{io, mem, thread, time::Duration};

use super::socket::{DeviceSocket, SocketKind};

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

/// Reads the interface's hardware address.
pub(crate) fn get_hw_address(iface: &str) -> io::Result<[u8; 6]> {
    let sock = DeviceSocket::open(iface, SocketKind::General)
        .map_err(|_| io::Error::other("no control socket"))?;

    let mut ifr = ifreq_for(iface);
    ioctl(&sock, libc::SIOCGIFHWADDR, &mut ifr)?;

    let sa_data = unsafe { ifr.ifr_ifru.ifru_hwaddr.sa_data };
    let mut mac = [0u8; 6];
    for (dst, src) in mac.iter_mut().zip(sa_data.iter()) {
        *dst = *src as u8;
    }
    Ok(mac)
}

/// Whether the interface currently has `IFF_UP` set.
pub(crate) fn is_up(iface: &str) -> io::Result<bool> {
    let sock = DeviceSocket::open(iface, SocketKind::General)
        .map_err(|_| io::Error::other("no control socket"))?;

    let mut ifr = ifreq_for(iface);
    ioctl(&sock, libc::SIOCGIFFLAGS, &mut ifr)?;

    let flags = unsafe { ifr.ifr_ifru.ifru_flags };
    Ok(flags & libc::IFF_UP as libc::c_short != 0)
}

/// Flips `IFF_UP` on the interface.
pub(crate) fn set_up(iface: &str, up: bool) -> io::Result<()> {
    let sock = DeviceSocket::open(iface, SocketKind::General)
        .map_err(|_| io::Error::other("no control socket"))?;

    let mut ifr = ifreq_for(iface);
    ioctl(&sock, libc::SIOCGIFFLAGS, &mut ifr)?;

    let flags = unsafe { ifr.ifr_ifru.ifru_flags };
    let desired = if up {
        flags | libc::IFF_UP as libc::c_short
    } else {
        flags & !(libc::IFF_UP as libc::c_short)
    };
    if desired == flags {
        return Ok(());
    }

    ifr.ifr_ifru.ifru_flags = desired;
    ioctl(&sock, libc::SIOCSIFFLAGS, &mut ifr)
}

/// Brings the interface up (or down) and waits for the kernel to agree,
/// polling twice a second for up to `timeout_secs` whole seconds (at least
/// one cycle). Returns whether the desired state was observed.
pub(crate) fn set_up_wait(iface: &str, up: bool, timeout_secs: u64) -> bool {
    if set_up(iface, up).is_err() {
        return false;
    }

    let cycles = timeout_secs.max(1) * 2;
    for _ in 0..cycles {
        if let Ok(state) = is_up(iface)
            && state == up
        {
            return true;
        }
        thread::sleep(Duration::from_millis(500));
    }

    matches!(is_up(iface), Ok(state) if state == up)
}
