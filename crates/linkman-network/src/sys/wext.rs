//! Linux wireless-extension ioctl plumbing.
//!
//! Wire structures mirror `linux/wireless.h`; event-stream offsets are
//! derived from the `#[repr(C)]` layouts so the scan decoder sees the same
//! framing the kernel emits on this architecture. All calls here are
//! blocking and are expected to run on a device worker, never on the main
//! scheduling context (short getters excepted).

#![allow(unsafe_code)]

use std::{ffi::c_void, io, mem, thread, time::Duration};

use tracing::warn;

use super::socket::{DeviceSocket, SocketKind};

/// `SIOCSIWFREQ`
pub(crate) const SIOCSIWFREQ: libc::c_ulong = 0x8B04;
/// `SIOCGIWFREQ`
pub(crate) const SIOCGIWFREQ: libc::c_ulong = 0x8B05;
/// `SIOCSIWMODE`
pub(crate) const SIOCSIWMODE: libc::c_ulong = 0x8B06;
/// `SIOCGIWMODE`
pub(crate) const SIOCGIWMODE: libc::c_ulong = 0x8B07;
/// `SIOCGIWRANGE`
pub(crate) const SIOCGIWRANGE: libc::c_ulong = 0x8B0B;
/// `SIOCGIWSTATS`
pub(crate) const SIOCGIWSTATS: libc::c_ulong = 0x8B0F;
/// `SIOCGIWNAME`
pub(crate) const SIOCGIWNAME: libc::c_ulong = 0x8B01;
/// `SIOCGIWAP`
pub(crate) const SIOCGIWAP: libc::c_ulong = 0x8B15;
/// `SIOCSIWSCAN`
pub(crate) const SIOCSIWSCAN: libc::c_ulong = 0x8B18;
/// `SIOCGIWSCAN`
pub(crate) const SIOCGIWSCAN: libc::c_ulong = 0x8B19;
/// `SIOCSIWESSID`
pub(crate) const SIOCSIWESSID: libc::c_ulong = 0x8B1A;
/// `SIOCGIWESSID`
pub(crate) const SIOCGIWESSID: libc::c_ulong = 0x8B1B;
/// `SIOCSIWRATE`
pub(crate) const SIOCSIWRATE: libc::c_ulong = 0x8B20;
/// `SIOCGIWRATE`
pub(crate) const SIOCGIWRATE: libc::c_ulong = 0x8B21;
/// `SIOCSIWENCODE`
pub(crate) const SIOCSIWENCODE: libc::c_ulong = 0x8B2A;
/// `SIOCGIWENCODE` (appears in scan event streams)
pub(crate) const SIOCGIWENCODE: libc::c_ulong = 0x8B2B;

/// `IWEVQUAL` scan event
pub(crate) const IWEVQUAL: u16 = 0x8C01;
/// `IWEVCUSTOM` scan event
pub(crate) const IWEVCUSTOM: u16 = 0x8C02;
/// `IWEVGENIE` scan event
pub(crate) const IWEVGENIE: u16 = 0x8C05;

/// Driver/card operating modes.
pub(crate) const IW_MODE_AUTO: u32 = 0;
pub(crate) const IW_MODE_ADHOC: u32 = 1;
pub(crate) const IW_MODE_INFRA: u32 = 2;
pub(crate) const IW_MODE_MASTER: u32 = 3;

pub(crate) const IW_ESSID_MAX_SIZE: usize = 32;
pub(crate) const IW_ENCODING_TOKEN_MAX: usize = 64;
pub(crate) const IW_MAX_FREQUENCIES: usize = 32;
const IW_MAX_BITRATES: usize = 32;
const IW_MAX_ENCODING_SIZES: usize = 8;
const IW_MAX_TXPOWER: usize = 8;

/// Starting buffer size for `SIOCGIWSCAN` reads.
pub(crate) const IW_SCAN_MAX_DATA: usize = 4096;

const IW_FREQ_FIXED: u8 = 0x01;

pub(crate) const IW_ENCODE_DISABLED: u16 = 0x8000;
const IW_ENCODE_ENABLED: u16 = 0x0000;
const IW_ENCODE_RESTRICTED: u16 = 0x4000;
const IW_ENCODE_OPEN: u16 = 0x2000;
const IW_ENCODE_NOKEY: u16 = 0x0800;

/// `iw_quality.updated` validity flags.
pub(crate) const IW_QUAL_QUAL_INVALID: u8 = 0x10;
pub(crate) const IW_QUAL_LEVEL_INVALID: u8 = 0x20;
pub(crate) const IW_QUAL_NOISE_INVALID: u8 = 0x40;

/// `enc_capa` bits in `iw_range`.
pub(crate) const IW_ENC_CAPA_WPA: u32 = 0x0000_0001;
pub(crate) const IW_ENC_CAPA_WPA2: u32 = 0x0000_0002;
pub(crate) const IW_ENC_CAPA_CIPHER_TKIP: u32 = 0x0000_0004;
pub(crate) const IW_ENC_CAPA_CIPHER_CCMP: u32 = 0x0000_0008;

/// `struct iw_point` (userspace form; the pointer is absent from WE-19+
/// event streams).
#[repr(C)]
#[derive(Clone, Copy)]
#[allow(dead_code)]
pub(crate) struct IwPoint {
    pub pointer: *mut c_void,
    pub length: u16,
    pub flags: u16,
}

/// `struct iw_param`
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
#[allow(dead_code)]
pub(crate) struct IwParam {
    pub value: i32,
    pub fixed: u8,
    pub disabled: u8,
    pub flags: u16,
}

/// `struct iw_freq` — mantissa/exponent pair plus channel index.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct IwFreq {
    pub m: i32,
    pub e: i16,
    pub i: u8,
    pub flags: u8,
}

/// `struct iw_quality`
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct IwQuality {
    pub qual: u8,
    pub level: u8,
    pub noise: u8,
    pub updated: u8,
}

/// Offset of the payload union inside `struct iw_event` on this
/// architecture (8 on 64-bit, 4 on 32-bit).
pub(crate) const IW_EV_LCP_LEN: usize = {
    let align = mem::align_of::<IwPoint>();
    (4 + align - 1) & !(align - 1)
};

/// Offset of `length` inside `struct iw_point`.
pub(crate) const IW_EV_POINT_OFF: usize = mem::offset_of!(IwPoint, length);

/// Length of a point-event header when the stream still carries the dead
/// pointer (pre-WE-19 framing).
pub(crate) const IW_EV_POINT_LEN: usize =
    IW_EV_LCP_LEN + mem::size_of::<IwPoint>() - IW_EV_POINT_OFF;

/// `struct iw_statistics`
#[repr(C)]
#[derive(Clone, Copy, Default)]
#[allow(dead_code)]
struct IwStatistics {
    status: u16,
    qual: IwQuality,
    discard: [u32; 5],
    miss_beacon: u32,
}

/// `struct iw_range`, WE-19+ layout. Only a handful of fields are read;
/// the rest exist so kernel writes land where they should.
#[repr(C)]
#[derive(Clone, Copy)]
#[allow(dead_code)]
pub(crate) struct IwRange {
    throughput: u32,
    min_nwid: u32,
    max_nwid: u32,
    old_num_channels: u16,
    old_num_frequency: u8,
    scan_capa: u8,
    event_capa: [u32; 6],
    sensitivity: i32,
    pub max_qual: IwQuality,
    pub avg_qual: IwQuality,
    num_bitrates: u8,
    bitrate: [i32; IW_MAX_BITRATES],
    min_rts: i32,
    max_rts: i32,
    min_frag: i32,
    max_frag: i32,
    min_pmp: i32,
    max_pmp: i32,
    min_pmt: i32,
    max_pmt: i32,
    pmp_flags: u16,
    pmt_flags: u16,
    pm_capa: u16,
    encoding_size: [u16; IW_MAX_ENCODING_SIZES],
    num_encoding_sizes: u8,
    max_encoding_tokens: u8,
    encoding_login_index: u8,
    txpower_capa: u16,
    num_txpower: u8,
    txpower: [i32; IW_MAX_TXPOWER],
    pub we_version_compiled: u8,
    we_version_source: u8,
    retry_capa: u16,
    retry_flags: u16,
    r_time_flags: u16,
    min_retry: i32,
    max_retry: i32,
    min_r_time: i32,
    max_r_time: i32,
    num_channels: u16,
    pub num_frequency: u8,
    pub freq: [IwFreq; IW_MAX_FREQUENCIES],
    pub enc_capa: u32,
}

#[repr(C)]
#[allow(dead_code)]
union IwReqData {
    name: [libc::c_char; libc::IFNAMSIZ],
    essid: IwPoint,
    data: IwPoint,
    mode: u32,
    freq: IwFreq,
    bitrate: IwParam,
    ap_addr: libc::sockaddr,
    qual: IwQuality,
}

/// `struct iwreq`
#[repr(C)]
struct IwReq {
    ifr_name: [libc::c_char; libc::IFNAMSIZ],
    u: IwReqData,
}

impl IwReq {
    fn for_iface(iface: &str) -> Self {
        let mut req: Self = unsafe { mem::zeroed() };
        for (dst, src) in req
            .ifr_name
            .iter_mut()
            .zip(iface.bytes().take(libc::IFNAMSIZ - 1))
        {
            *dst = src as libc::c_char;
        }
        req
    }
}

fn ioctl(sock: &DeviceSocket, request: libc::c_ulong, req: &mut IwReq) -> io::Result<()> {
    let rc = unsafe { libc::ioctl(sock.fd(), request as _, req as *mut IwReq) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// One entry of a card's supported-frequency table.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrequencyEntry {
    /// Kernel channel number for this frequency.
    pub channel: i32,
    /// Frequency in Hz.
    pub hz: f64,
}

/// Driver capabilities and quality templates read from `SIOCGIWRANGE`.
#[derive(Debug, Clone, Default)]
pub(crate) struct RangeInfo {
    pub max_qual: IwQuality,
    pub avg_qual: IwQuality,
    pub we_version: u8,
    pub enc_capa: u32,
    pub freqs: Vec<FrequencyEntry>,
    /// Bytes the kernel actually filled in; gates `enc_capa` validity.
    pub reported_len: usize,
}

impl RangeInfo {
    /// Whether the kernel filled in enough of the range structure for
    /// `enc_capa` to be meaningful.
    pub(crate) fn has_enc_capa(&self) -> bool {
        let minlen = mem::offset_of!(IwRange, enc_capa) + mem::size_of::<u32>();
        self.reported_len >= minlen && self.we_version >= 18
    }
}

/// Converts a kernel (mantissa, exponent) frequency to Hz.
pub(crate) fn freq_to_float(freq: &IwFreq) -> f64 {
    f64::from(freq.m) * 10f64.powi(i32::from(freq.e))
}

/// Converts Hz into the kernel's (mantissa, exponent) encoding.
pub(crate) fn float_to_freq(hz: f64, out: &mut IwFreq) {
    let e = hz.log10().floor() as i16;
    if e > 8 {
        out.m = ((hz / 10f64.powi(i32::from(e) - 6)).floor() as i32) * 100;
        out.e = e - 8;
    } else {
        out.m = hz as i32;
        out.e = 0;
    }
}

/// Reads the driver's range information.
pub(crate) fn get_range(iface: &str) -> io::Result<RangeInfo> {
    let sock = match DeviceSocket::open(iface, SocketKind::Wireless) {
        Ok(sock) => sock,
        Err(_) => return Err(io::Error::other("no control socket")),
    };

    let mut range: IwRange = unsafe { mem::zeroed() };
    let mut req = IwReq::for_iface(iface);
    req.u.data = IwPoint {
        pointer: (&raw mut range).cast(),
        length: mem::size_of::<IwRange>() as u16,
        flags: 0,
    };

    ioctl(&sock, SIOCGIWRANGE, &mut req)?;
    let reported_len = usize::from(unsafe { req.u.data.length });

    let count = usize::from(range.num_frequency).min(IW_MAX_FREQUENCIES);
    let freqs = range.freq[..count]
        .iter()
        .map(|f| FrequencyEntry {
            channel: i32::from(f.i),
            hz: freq_to_float(f),
        })
        .collect();

    Ok(RangeInfo {
        max_qual: range.max_qual,
        avg_qual: range.avg_qual,
        we_version: range.we_version_compiled,
        enc_capa: range.enc_capa,
        freqs,
        reported_len,
    })
}

/// Gets the card's operating mode; `IW_MODE_AUTO` when it cannot be read
/// or reports something other than ad-hoc/infrastructure.
pub(crate) fn get_mode(iface: &str) -> u32 {
    let mut mode = IW_MODE_AUTO;

    if let Ok(sock) = DeviceSocket::open(iface, SocketKind::Wireless) {
        let mut req = IwReq::for_iface(iface);
        match ioctl(&sock, SIOCGIWMODE, &mut req) {
            Ok(()) => {
                let reported = unsafe { req.u.mode };
                if reported == IW_MODE_ADHOC || reported == IW_MODE_INFRA {
                    mode = reported;
                }
            }
            Err(e) => {
                warn!(iface, error = %e, "cannot get card mode");
            }
        }
    }

    mode
}

/// Sets the card's operating mode. Returns whether the card accepted it.
pub(crate) fn set_mode(iface: &str, mode: u32) -> bool {
    if get_mode(iface) == mode {
        return true;
    }

    let Ok(sock) = DeviceSocket::open(iface, SocketKind::Wireless) else {
        return false;
    };

    let mut req = IwReq::for_iface(iface);
    req.u.mode = mode;
    match ioctl(&sock, SIOCSIWMODE, &mut req) {
        Ok(()) => true,
        Err(e) => {
            if e.raw_os_error() != Some(libc::ENODEV) {
                warn!(iface, mode, error = %e, "cannot set card mode");
            }
            false
        }
    }
}

/// Reads the essid currently set on the card.
pub(crate) fn get_essid(iface: &str) -> Option<String> {
    let sock = DeviceSocket::open(iface, SocketKind::Wireless).ok()?;

    let mut buf = [0u8; IW_ESSID_MAX_SIZE + 1];
    let mut req = IwReq::for_iface(iface);
    req.u.essid = IwPoint {
        pointer: buf.as_mut_ptr().cast(),
        length: buf.len() as u16,
        flags: 0,
    };

    match ioctl(&sock, SIOCGIWESSID, &mut req) {
        Ok(()) => {
            let len = usize::from(unsafe { req.u.essid.length }).min(IW_ESSID_MAX_SIZE);
            let end = buf[..len].iter().position(|&b| b == 0).unwrap_or(len);
            Some(String::from_utf8_lossy(&buf[..end]).into_owned())
        }
        Err(e) => {
            warn!(iface, error = %e, "cannot get essid");
            None
        }
    }
}

/// Sets the essid on the card. An empty string disables it.
///
/// Sleeps two seconds afterwards: some firmwares reboot when the essid is
/// set and give no indication of when they are back.
pub(crate) fn set_essid(iface: &str, essid: &str) {
    let mut safe = [0u8; IW_ESSID_MAX_SIZE + 1];
    let len = essid.len().min(IW_ESSID_MAX_SIZE);
    safe[..len].copy_from_slice(&essid.as_bytes()[..len]);

    let Ok(sock) = DeviceSocket::open(iface, SocketKind::Wireless) else {
        return;
    };

    let mut req = IwReq::for_iface(iface);
    req.u.essid = IwPoint {
        pointer: safe.as_mut_ptr().cast(),
        length: (len + 1) as u16,
        flags: 1,
    };

    if let Err(e) = ioctl(&sock, SIOCSIWESSID, &mut req)
        && e.raw_os_error() != Some(libc::ENODEV)
    {
        warn!(iface, essid, error = %e, "cannot set essid");
    }

    drop(sock);
    thread::sleep(Duration::from_secs(2));
}

/// Reads the frequency the card is tuned to, in Hz. Zero on failure.
pub(crate) fn get_frequency(iface: &str) -> f64 {
    let Ok(sock) = DeviceSocket::open(iface, SocketKind::Wireless) else {
        return 0.0;
    };

    let mut req = IwReq::for_iface(iface);
    match ioctl(&sock, SIOCGIWFREQ, &mut req) {
        Ok(()) => freq_to_float(unsafe { &req.u.freq }),
        Err(e) => {
            warn!(iface, error = %e, "cannot get frequency");
            0.0
        }
    }
}

/// Tunes the card. `hz <= 0` requests automatic channel selection.
///
/// Auto mode tries the madwifi convention (mantissa 0) first and falls back
/// to the iwconfig convention (mantissa −1) on `EINVAL`/`EOPNOTSUPP`.
/// Returns whether any attempt succeeded.
pub(crate) fn set_frequency(iface: &str, hz: f64) -> bool {
    if hz > 0.0 && (get_frequency(iface) - hz).abs() < f64::EPSILON {
        return true;
    }

    let Ok(sock) = DeviceSocket::open(iface, SocketKind::Wireless) else {
        return false;
    };

    let mut req = IwReq::for_iface(iface);
    if hz <= 0.0 {
        req.u.freq = IwFreq {
            m: 0,
            e: 0,
            i: 0,
            flags: 0,
        };
    } else {
        let mut freq = IwFreq::default();
        float_to_freq(hz, &mut freq);
        freq.flags = IW_FREQ_FIXED;
        req.u.freq = freq;
    }

    match ioctl(&sock, SIOCSIWFREQ, &mut req) {
        Ok(()) => true,
        Err(e) => {
            let errno = e.raw_os_error();
            if hz <= 0.0 && (errno == Some(libc::EINVAL) || errno == Some(libc::EOPNOTSUPP)) {
                // Not every driver understands mantissa 0 for "auto".
                req.u.freq = IwFreq {
                    m: -1,
                    e: 0,
                    i: 0,
                    flags: 0,
                };
                return ioctl(&sock, SIOCSIWFREQ, &mut req).is_ok();
            }
            false
        }
    }
}

/// Reads the configured bitrate in kbit/s. Zero on failure.
pub(crate) fn get_bitrate(iface: &str) -> i32 {
    let Ok(sock) = DeviceSocket::open(iface, SocketKind::Wireless) else {
        return 0;
    };

    let mut req = IwReq::for_iface(iface);
    match ioctl(&sock, SIOCGIWRATE, &mut req) {
        Ok(()) => (unsafe { req.u.bitrate.value }) / 1000,
        Err(_) => 0,
    }
}

/// Sets the bitrate in kbit/s; zero selects automatic rate.
///
/// Failures are silent: several drivers never supported rate setting.
pub(crate) fn set_bitrate(iface: &str, kbps: i32) {
    if get_bitrate(iface) == kbps {
        return;
    }

    let Ok(sock) = DeviceSocket::open(iface, SocketKind::Wireless) else {
        return;
    };

    let mut req = IwReq::for_iface(iface);
    req.u.bitrate = if kbps != 0 {
        IwParam {
            value: kbps * 1000,
            fixed: 1,
            ..IwParam::default()
        }
    } else {
        IwParam {
            value: -1,
            fixed: 0,
            ..IwParam::default()
        }
    };

    let _ = ioctl(&sock, SIOCSIWRATE, &mut req);
}

/// Reads the MAC of the access point the card reports being attached to.
pub(crate) fn get_ap_address(iface: &str) -> Option<[u8; 6]> {
    let sock = DeviceSocket::open(iface, SocketKind::Wireless).ok()?;

    let mut req = IwReq::for_iface(iface);
    ioctl(&sock, SIOCGIWAP, &mut req).ok()?;

    let sa_data = unsafe { req.u.ap_addr.sa_data };
    let mut mac = [0u8; 6];
    for (dst, src) in mac.iter_mut().zip(sa_data.iter()) {
        *dst = *src as u8;
    }
    Some(mac)
}

/// Some drivers (ipw2x00) report the literal name `unassociated` through
/// `SIOCGIWNAME` when no link exists, which is cheaper than the AP-address
/// check.
pub(crate) fn reports_unassociated(iface: &str) -> bool {
    let Ok(sock) = DeviceSocket::open(iface, SocketKind::Wireless) else {
        return false;
    };

    let mut req = IwReq::for_iface(iface);
    if ioctl(&sock, SIOCGIWNAME, &mut req).is_err() {
        return false;
    }

    let name = unsafe { req.u.name };
    let bytes: Vec<u8> = name
        .iter()
        .take_while(|&&c| c != 0)
        .map(|&c| c as u8)
        .collect();
    bytes == b"unassociated"
}

/// Reads the card's current link quality sample.
pub(crate) fn get_stats_quality(iface: &str) -> Option<IwQuality> {
    let sock = DeviceSocket::open(iface, SocketKind::Wireless).ok()?;

    let mut stats = IwStatistics::default();
    let mut req = IwReq::for_iface(iface);
    req.u.data = IwPoint {
        pointer: (&raw mut stats).cast(),
        length: mem::size_of::<IwStatistics>() as u16,
        flags: 1,
    };

    ioctl(&sock, SIOCGIWSTATS, &mut req).ok()?;
    Some(stats.qual)
}

/// Asks the card to start scanning.
pub(crate) fn trigger_scan(sock: &DeviceSocket, iface: &str) -> io::Result<()> {
    let mut req = IwReq::for_iface(iface);
    req.u.data = IwPoint {
        pointer: std::ptr::null_mut(),
        length: 0,
        flags: 0,
    };
    ioctl(sock, SIOCSIWSCAN, &mut req)
}

/// Probes whether the driver supports scan triggering at all.
///
/// Only `EOPNOTSUPP` marks the capability as absent; any other outcome
/// (including transient errors) counts as support.
pub(crate) fn supports_scanning(iface: &str) -> bool {
    let Ok(sock) = DeviceSocket::open(iface, SocketKind::Wireless) else {
        return false;
    };
    match trigger_scan(&sock, iface) {
        Ok(()) => true,
        Err(e) => e.raw_os_error() != Some(libc::EOPNOTSUPP),
    }
}

const SCAN_SLEEP_CENTISECONDS: u32 = 10;

/// Reads back scan results after a trigger.
///
/// Starts with a kernel-suggested buffer, doubling on `E2BIG` up to 100 000
/// bytes. `EAGAIN` (card still scanning) is retried with 100 ms sleeps;
/// `ENODATA` is success with zero results. Anything else is a hard failure.
pub(crate) fn get_scan_results(sock: &DeviceSocket, iface: &str) -> io::Result<Vec<u8>> {
    let mut res_buf_len = IW_SCAN_MAX_DATA;
    let mut tries: u32 = 0;

    loop {
        // The wire length field is 16 bits; the last doubling step clamps.
        let request_len = res_buf_len.min(usize::from(u16::MAX));
        let mut res_buf = vec![0u8; request_len];
        let mut req = IwReq::for_iface(iface);
        req.u.data = IwPoint {
            pointer: res_buf.as_mut_ptr().cast(),
            length: request_len as u16,
            flags: 0,
        };

        match ioctl(sock, SIOCGIWSCAN, &mut req) {
            Ok(()) => {
                res_buf.truncate(usize::from(unsafe { req.u.data.length }));
                return Ok(res_buf);
            }
            Err(e) => match e.raw_os_error() {
                Some(libc::E2BIG) if res_buf_len < 100_000 => {
                    res_buf_len *= 2;
                }
                Some(libc::EAGAIN) => {
                    if tries > 20 * SCAN_SLEEP_CENTISECONDS {
                        warn!(iface, "card took too much time scanning");
                        return Err(io::Error::from(io::ErrorKind::TimedOut));
                    }
                    thread::sleep(Duration::from_millis(1000 / u64::from(SCAN_SLEEP_CENTISECONDS)));
                    tries += 1;
                }
                Some(libc::ENODATA) => return Ok(Vec::new()),
                _ => {
                    warn!(iface, error = %e, "cannot read scan results");
                    return Err(e);
                }
            },
        }
    }
}

/// Key material accepted by [`set_wep_key`]: hex digits decode to bytes,
/// an `s:` prefix marks a literal ASCII key, anything else is taken as
/// ASCII. Returns `None` for unusable input.
pub(crate) fn parse_key_material(key: &str) -> Option<Vec<u8>> {
    if key.is_empty() {
        return None;
    }

    if let Some(ascii) = key.strip_prefix("s:") {
        let bytes = ascii.as_bytes();
        if bytes.is_empty() || bytes.len() > IW_ENCODING_TOKEN_MAX {
            return None;
        }
        return Some(bytes.to_vec());
    }

    if key.len() % 2 == 0 && key.bytes().all(|b| b.is_ascii_hexdigit()) {
        let decoded: Vec<u8> = (0..key.len())
            .step_by(2)
            .filter_map(|i| u8::from_str_radix(&key[i..i + 2], 16).ok())
            .collect();
        if decoded.len() <= IW_ENCODING_TOKEN_MAX {
            return Some(decoded);
        }
        return None;
    }

    let bytes = key.as_bytes();
    if bytes.len() > IW_ENCODING_TOKEN_MAX {
        return None;
    }
    Some(bytes.to_vec())
}

/// Programs (or clears) a WEP key on the card.
///
/// `None` or an empty key disables encryption. `open_system` selects the
/// authentication flag; some drivers force Open System whenever WEP is off.
pub(crate) fn set_wep_key(iface: &str, key: Option<&str>, open_system: bool) {
    let Ok(sock) = DeviceSocket::open(iface, SocketKind::Wireless) else {
        warn!(iface, "could not get wireless control socket for key setup");
        return;
    };

    let mut req = IwReq::for_iface(iface);
    let mut parsed = key.and_then(parse_key_material);

    match parsed.as_mut() {
        None => {
            req.u.data = IwPoint {
                pointer: std::ptr::null_mut(),
                length: 0,
                flags: IW_ENCODE_ENABLED | IW_ENCODE_DISABLED | IW_ENCODE_NOKEY,
            };
        }
        Some(material) => {
            let auth_flag = if open_system {
                IW_ENCODE_OPEN
            } else {
                IW_ENCODE_RESTRICTED
            };
            req.u.data = IwPoint {
                pointer: material.as_mut_ptr().cast(),
                length: material.len() as u16,
                flags: IW_ENCODE_ENABLED | auth_flag,
            };
        }
    }

    if let Err(e) = ioctl(&sock, SIOCSIWENCODE, &mut req)
        && e.raw_os_error() != Some(libc::ENODEV)
    {
        warn!(iface, error = %e, "cannot set encryption key");
    }
}

/// Maps a channel number back to a frequency using the card's table.
pub(crate) fn channel_to_freq(channel: i32, table: &[FrequencyEntry]) -> Option<f64> {
    table
        .iter()
        .find(|entry| entry.channel == channel)
        .map(|entry| entry.hz)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn freq_conversion_round_trips_mantissa_exponent() {
        let mut freq = IwFreq::default();
        float_to_freq(2_412_000_000.0, &mut freq);
        let hz = freq_to_float(&freq);
        assert!((hz - 2_412_000_000.0).abs() < 1_000_000.0);
    }

    #[test]
    fn freq_conversion_keeps_small_values_exact() {
        let mut freq = IwFreq::default();
        float_to_freq(11.0, &mut freq);
        assert_eq!(freq.m, 11);
        assert_eq!(freq.e, 0);
        assert!((freq_to_float(&freq) - 11.0).abs() < f64::EPSILON);
    }

    #[test]
    fn point_event_header_is_shorter_than_full_event() {
        assert!(IW_EV_LCP_LEN >= 4);
        assert!(IW_EV_POINT_LEN > IW_EV_LCP_LEN);
    }

    #[test]
    fn hex_key_material_decodes() {
        let parsed = parse_key_material("0123456789").unwrap();
        assert_eq!(parsed, vec![0x01, 0x23, 0x45, 0x67, 0x89]);
    }

    #[test]
    fn ascii_key_material_passes_through() {
        let parsed = parse_key_material("s:secret").unwrap();
        assert_eq!(parsed, b"secret".to_vec());
    }

    #[test]
    fn oversized_key_material_is_rejected() {
        let oversized = "a".repeat(IW_ENCODING_TOKEN_MAX + 1);
        assert!(parse_key_material(&oversized).is_none());
    }

    #[test]
    fn channel_lookup_uses_card_table() {
        let table = [
            FrequencyEntry {
                channel: 1,
                hz: 2_412_000_000.0,
            },
            FrequencyEntry {
                channel: 6,
                hz: 2_437_000_000.0,
            },
        ];

        assert_eq!(channel_to_freq(1, &table), Some(2_412_000_000.0));
        assert_eq!(channel_to_freq(6, &table), Some(2_437_000_000.0));
        assert_eq!(channel_to_freq(11, &table), None);
    }
}
