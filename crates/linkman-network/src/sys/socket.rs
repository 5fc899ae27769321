//! Scoped control-socket handles for device ioctls.
//!
//! Every kernel operation in this crate goes through a [`DeviceSocket`]: a
//! short-lived `AF_INET` datagram socket whose descriptor is released when the
//! handle drops, on every exit path. The gateway does no buffering; callers
//! issue raw ioctls against the descriptor.

#![allow(unsafe_code)]

use std::{
    io,
    os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd},
};

use crate::error::Error;

/// Classification of a control socket.
///
/// The classification selects the default protocol family for the descriptor;
/// both kinds currently map to an `AF_INET` datagram socket, which is what the
/// wireless-extension and ethtool ioctls expect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SocketKind {
    /// Wireless-extension ioctls.
    Wireless,
    /// General interface ioctls (flags, ethtool, MII).
    General,
}

impl SocketKind {
    fn family(self) -> libc::c_int {
        match self {
            SocketKind::Wireless | SocketKind::General => libc::AF_INET,
        }
    }
}

/// A live control-socket descriptor scoped to one operation.
#[derive(Debug)]
pub(crate) struct DeviceSocket {
    fd: OwnedFd,
}

impl DeviceSocket {
    /// Opens a control socket for the given interface.
    ///
    /// The interface name is carried for error context only; the descriptor
    /// itself is not bound to it.
    pub(crate) fn open(iface: &str, kind: SocketKind) -> Result<Self, Error> {
        let raw = unsafe { libc::socket(kind.family(), libc::SOCK_DGRAM, 0) };
        if raw < 0 {
            return Err(Error::SocketUnavailable {
                iface: iface.to_owned(),
                source: io::Error::last_os_error(),
            });
        }

        Ok(Self {
            fd: unsafe { OwnedFd::from_raw_fd(raw) },
        })
    }

    /// Raw descriptor for ioctl calls.
    pub(crate) fn fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}
