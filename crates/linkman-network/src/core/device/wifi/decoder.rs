//! Scan-result decoding.
//!
//! The kernel answers `SIOCGIWSCAN` with a packed stream of `iw_event`
//! records. Each event begins with a fixed header (length + command); a new
//! access point starts at each AP-address event and the events that follow
//! describe it until the next address. Payloads may be misaligned, so every
//! field is read byte-wise into locals. WE-19 shortened the framing of
//! string-carrying events; both framings are accepted, selected by the
//! device's compiled wireless-extension version.

use crate::{
    core::access_point::{AccessPoint, MacAddress, WirelessMode},
    sys::wext::{
        IW_ENCODE_DISABLED, IW_ESSID_MAX_SIZE, IW_EV_LCP_LEN, IW_EV_POINT_LEN, IW_EV_POINT_OFF,
        IWEVCUSTOM, IWEVGENIE, IWEVQUAL, IwFreq, IwQuality, SIOCGIWAP, SIOCGIWENCODE, SIOCGIWESSID,
        SIOCGIWFREQ, SIOCGIWMODE, freq_to_float,
    },
};

use super::quality::qual_to_percent;

/// Longest WPA/RSN information element the decoder will consider.
const WPA_MAX_IE_LEN: usize = 64;

const WPA_GENERIC_INFO_ELEM: u8 = 0xdd;
const WPA_RSN_INFO_ELEM: u8 = 0x30;

fn read_u16(buf: &[u8], at: usize) -> Option<u16> {
    Some(u16::from_ne_bytes([*buf.get(at)?, *buf.get(at + 1)?]))
}

fn read_u32(buf: &[u8], at: usize) -> Option<u32> {
    Some(u32::from_ne_bytes([
        *buf.get(at)?,
        *buf.get(at + 1)?,
        *buf.get(at + 2)?,
        *buf.get(at + 3)?,
    ]))
}

fn read_freq(buf: &[u8], at: usize) -> Option<IwFreq> {
    Some(IwFreq {
        m: read_u32(buf, at)? as i32,
        e: read_u16(buf, at + 4)? as i16,
        i: *buf.get(at + 6)?,
        flags: *buf.get(at + 7)?,
    })
}

fn read_quality(buf: &[u8], at: usize) -> Option<IwQuality> {
    Some(IwQuality {
        qual: *buf.get(at)?,
        level: *buf.get(at + 1)?,
        noise: *buf.get(at + 2)?,
        updated: *buf.get(at + 3)?,
    })
}

/// Decodes a hex string into bytes. Odd-length or non-hex input fails.
pub(crate) fn hexstr2bin(hex: &str) -> Option<Vec<u8>> {
    if hex.len() % 2 != 0 {
        return None;
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(hex.get(i..i + 2)?, 16).ok())
        .collect()
}

/// One point-style payload: its length/flags header plus where the data
/// starts in the stream.
struct PointEvent {
    length: usize,
    flags: u16,
    data_at: usize,
}

fn point_event(buf: &[u8], pos: usize, shortened: bool) -> Option<PointEvent> {
    if shortened {
        // WE-19 removed the dead pointer from the serialized iw_point.
        Some(PointEvent {
            length: usize::from(read_u16(buf, pos + IW_EV_LCP_LEN)?),
            flags: read_u16(buf, pos + IW_EV_LCP_LEN + 2)?,
            data_at: pos + IW_EV_POINT_LEN,
        })
    } else {
        Some(PointEvent {
            length: usize::from(read_u16(buf, pos + IW_EV_LCP_LEN + IW_EV_POINT_OFF)?),
            flags: read_u16(buf, pos + IW_EV_LCP_LEN + IW_EV_POINT_OFF + 2)?,
            data_at: pos + IW_EV_POINT_LEN + IW_EV_POINT_OFF,
        })
    }
}

/// Translates a raw scan buffer into access-point records.
///
/// Malformed input truncates the decode: records accumulated so far are
/// kept, and the AP under construction is emitted if it has an address.
pub(crate) fn decode_scan_results(
    buf: &[u8],
    we_version: u8,
    max_qual: &IwQuality,
    avg_qual: &IwQuality,
) -> Vec<AccessPoint> {
    let mut aps: Vec<AccessPoint> = Vec::new();
    let mut current: Option<AccessPoint> = None;
    let mut pos = 0usize;

    while pos + IW_EV_LCP_LEN <= buf.len() {
        let Some(len) = read_u16(buf, pos).map(usize::from) else {
            break;
        };
        let Some(cmd) = read_u16(buf, pos + 2) else {
            break;
        };
        if len <= IW_EV_LCP_LEN || pos + len > buf.len() {
            break;
        }

        let is_point_event = matches!(
            cmd,
            c if c == SIOCGIWESSID as u16
                || c == SIOCGIWENCODE as u16
                || c == IWEVGENIE
                || c == IWEVCUSTOM
        );
        let shortened = we_version > 18 && is_point_event;

        match cmd {
            c if c == SIOCGIWAP as u16 => {
                if let Some(ap) = current.take() {
                    aps.push(ap);
                }

                // sockaddr payload: family (2 bytes) then the MAC.
                let ap = AccessPoint::new();
                let mac_at = pos + IW_EV_LCP_LEN + 2;
                if buf.len() >= mac_at + 6 {
                    let mut mac = [0u8; 6];
                    mac.copy_from_slice(&buf[mac_at..mac_at + 6]);
                    ap.bssid.set(MacAddress(mac));
                }
                current = Some(ap);
            }
            c if c == SIOCGIWMODE as u16 => {
                if let Some(ap) = current.as_ref()
                    && let Some(kernel_mode) = read_u32(buf, pos + IW_EV_LCP_LEN)
                    && let Some(mode) = WirelessMode::from_kernel(kernel_mode)
                {
                    ap.mode.set(mode);
                }
            }
            c if c == SIOCGIWESSID as u16 => {
                if let (Some(ap), Some(point)) = (current.as_ref(), point_event(buf, pos, shortened))
                    && point.flags != 0
                    && point.length > 0
                    && point.length <= IW_ESSID_MAX_SIZE
                    && point.data_at + point.length <= buf.len()
                {
                    let raw = &buf[point.data_at..point.data_at + point.length];
                    let essid = String::from_utf8_lossy(raw).into_owned();
                    // Some ipw drivers report a literal marker for hidden networks.
                    if !essid.is_empty() && essid != "<hidden>" {
                        ap.essid.set(Some(essid));
                    }
                }
            }
            c if c == SIOCGIWFREQ as u16 => {
                if let Some(ap) = current.as_ref()
                    && let Some(freq) = read_freq(buf, pos + IW_EV_LCP_LEN)
                {
                    ap.frequency.set(freq_to_float(&freq));
                }
            }
            c if c == IWEVQUAL => {
                if let Some(ap) = current.as_ref()
                    && let Some(qual) = read_quality(buf, pos + IW_EV_LCP_LEN)
                {
                    ap.strength.set(qual_to_percent(&qual, max_qual, avg_qual));
                }
            }
            c if c == SIOCGIWENCODE as u16 => {
                if let (Some(ap), Some(point)) = (current.as_ref(), point_event(buf, pos, shortened))
                    && point.flags & IW_ENCODE_DISABLED == 0
                {
                    ap.add_capabilities_for_wep();
                }
            }
            c if c == IWEVGENIE => {
                if let (Some(ap), Some(point)) = (current.as_ref(), point_event(buf, pos, shortened))
                    && point.data_at + point.length <= buf.len()
                {
                    parse_generic_ies(ap, &buf[point.data_at..point.data_at + point.length]);
                }
            }
            c if c == IWEVCUSTOM => {
                if let (Some(ap), Some(point)) = (current.as_ref(), point_event(buf, pos, shortened))
                    && point.data_at + point.length <= buf.len()
                {
                    parse_custom_event(ap, &buf[point.data_at..point.data_at + point.length]);
                }
            }
            _ => {}
        }

        pos += len;
    }

    if let Some(ap) = current.take() {
        aps.push(ap);
    }

    aps
}

/// Walks the concatenated information elements of a generic-IE event and
/// folds WPA/RSN capabilities into the AP.
fn parse_generic_ies(ap: &AccessPoint, genie: &[u8]) {
    let mut gpos = 0usize;

    while gpos + 1 < genie.len() && gpos + 2 + usize::from(genie[gpos + 1]) <= genie.len() {
        let ie = genie[gpos];
        let ielen = usize::from(genie[gpos + 1]) + 2;
        if ielen > WPA_MAX_IE_LEN {
            gpos += ielen;
            continue;
        }

        match ie {
            WPA_GENERIC_INFO_ELEM | WPA_RSN_INFO_ELEM => {
                ap.add_capabilities_from_ie(&genie[gpos..gpos + ielen]);
            }
            _ => {}
        }
        gpos += ielen;
    }
}

/// Decodes driver-custom strings of the form `wpa_ie=<hex>` / `rsn_ie=<hex>`.
fn parse_custom_event(ap: &AccessPoint, custom: &[u8]) {
    let Ok(text) = std::str::from_utf8(custom) else {
        return;
    };

    let hex = match text
        .strip_prefix("wpa_ie=")
        .or_else(|| text.strip_prefix("rsn_ie="))
    {
        Some(hex) => hex,
        None => return,
    };

    if hex.len() % 2 != 0 || hex.len() / 2 > WPA_MAX_IE_LEN {
        return;
    }
    if let Some(ie) = hexstr2bin(hex) {
        ap.add_capabilities_from_ie(&ie);
    }
}

#[cfg(test)]
mod tests {
    use crate::core::access_point::Ap80211Capabilities;

    use super::*;

    fn ev_fixed(cmd: u16, payload: &[u8]) -> Vec<u8> {
        let len = IW_EV_LCP_LEN + payload.len();
        let mut buf = vec![0u8; IW_EV_LCP_LEN];
        buf[0..2].copy_from_slice(&(len as u16).to_ne_bytes());
        buf[2..4].copy_from_slice(&cmd.to_ne_bytes());
        buf.extend_from_slice(payload);
        buf
    }

    fn ev_point_we19(cmd: u16, flags: u16, data: &[u8]) -> Vec<u8> {
        let len = IW_EV_POINT_LEN + data.len();
        let mut buf = vec![0u8; IW_EV_POINT_LEN];
        buf[0..2].copy_from_slice(&(len as u16).to_ne_bytes());
        buf[2..4].copy_from_slice(&cmd.to_ne_bytes());
        buf[IW_EV_LCP_LEN..IW_EV_LCP_LEN + 2]
            .copy_from_slice(&(data.len() as u16).to_ne_bytes());
        buf[IW_EV_LCP_LEN + 2..IW_EV_LCP_LEN + 4].copy_from_slice(&flags.to_ne_bytes());
        buf.extend_from_slice(data);
        buf
    }

    fn ev_point_legacy(cmd: u16, flags: u16, data: &[u8]) -> Vec<u8> {
        let len = IW_EV_POINT_LEN + IW_EV_POINT_OFF + data.len();
        let mut buf = vec![0u8; IW_EV_POINT_LEN + IW_EV_POINT_OFF];
        buf[0..2].copy_from_slice(&(len as u16).to_ne_bytes());
        buf[2..4].copy_from_slice(&cmd.to_ne_bytes());
        let length_at = IW_EV_LCP_LEN + IW_EV_POINT_OFF;
        buf[length_at..length_at + 2].copy_from_slice(&(data.len() as u16).to_ne_bytes());
        buf[length_at + 2..length_at + 4].copy_from_slice(&flags.to_ne_bytes());
        buf.extend_from_slice(data);
        buf
    }

    fn ev_ap_address(mac: [u8; 6]) -> Vec<u8> {
        let mut sockaddr = vec![0u8; 16];
        sockaddr[2..8].copy_from_slice(&mac);
        ev_fixed(SIOCGIWAP as u16, &sockaddr)
    }

    fn decode(buf: &[u8], we_version: u8) -> Vec<AccessPoint> {
        decode_scan_results(buf, we_version, &IwQuality::default(), &IwQuality::default())
    }

    #[test]
    fn empty_buffer_yields_no_aps() {
        assert!(decode(&[], 21).is_empty());
        assert!(decode(&[0u8; 2], 21).is_empty());
    }

    #[test]
    fn each_address_event_emits_one_ap() {
        let mut buf = Vec::new();
        for i in 0..3u8 {
            buf.extend(ev_ap_address([i, 1, 2, 3, 4, 5]));
        }

        let aps = decode(&buf, 21);
        assert_eq!(aps.len(), 3);
        assert_eq!(aps[2].bssid.get(), MacAddress([2, 1, 2, 3, 4, 5]));
    }

    #[test]
    fn essid_applies_to_ap_under_construction() {
        let mut buf = ev_ap_address([1; 6]);
        buf.extend(ev_point_we19(SIOCGIWESSID as u16, 1, b"home"));

        let aps = decode(&buf, 21);
        assert_eq!(aps.len(), 1);
        assert_eq!(aps[0].essid.get().as_deref(), Some("home"));
    }

    #[test]
    fn legacy_framing_decodes_the_same_essid() {
        let mut buf = ev_ap_address([1; 6]);
        buf.extend(ev_point_legacy(SIOCGIWESSID as u16, 1, b"home"));

        let aps = decode(&buf, 17);
        assert_eq!(aps.len(), 1);
        assert_eq!(aps[0].essid.get().as_deref(), Some("home"));
    }

    #[test]
    fn hidden_marker_essid_is_ignored() {
        let mut buf = ev_ap_address([1; 6]);
        buf.extend(ev_point_we19(SIOCGIWESSID as u16, 1, b"<hidden>"));

        let aps = decode(&buf, 21);
        assert_eq!(aps[0].essid.get(), None);
    }

    #[test]
    fn mode_event_sets_adhoc() {
        let mut buf = ev_ap_address([1; 6]);
        buf.extend(ev_fixed(SIOCGIWMODE as u16, &1u32.to_ne_bytes()));

        let aps = decode(&buf, 21);
        assert_eq!(aps[0].mode.get(), WirelessMode::Adhoc);
    }

    #[test]
    fn frequency_event_converts_mantissa_exponent() {
        let mut payload = Vec::new();
        payload.extend_from_slice(&2412i32.to_ne_bytes());
        payload.extend_from_slice(&6i16.to_ne_bytes());
        payload.extend_from_slice(&[0, 0]);

        let mut buf = ev_ap_address([1; 6]);
        buf.extend(ev_fixed(SIOCGIWFREQ as u16, &payload));

        let aps = decode(&buf, 21);
        assert!((aps[0].frequency.get() - 2_412_000_000.0).abs() < 1.0);
    }

    #[test]
    fn enabled_encode_event_adds_wep() {
        let mut buf = ev_ap_address([1; 6]);
        buf.extend(ev_point_we19(SIOCGIWENCODE as u16, 0, &[]));

        let aps = decode(&buf, 21);
        assert!(aps[0]
            .capabilities
            .get()
            .contains(Ap80211Capabilities::PROTO_WEP));
    }

    #[test]
    fn disabled_encode_event_adds_nothing() {
        let mut buf = ev_ap_address([1; 6]);
        buf.extend(ev_point_we19(SIOCGIWENCODE as u16, IW_ENCODE_DISABLED, &[]));

        let aps = decode(&buf, 21);
        assert!(aps[0].capabilities.get().is_empty());
    }

    #[test]
    fn custom_wpa_ie_event_decodes_hex() {
        let ie_hex = "dd060050f20101";
        // Odd-length payloads must be rejected, even-length accepted.
        let mut buf = ev_ap_address([1; 6]);
        buf.extend(ev_point_we19(IWEVCUSTOM, 0, format!("wpa_ie={ie_hex}").as_bytes()));

        let aps = decode(&buf, 21);
        assert!(aps[0]
            .capabilities
            .get()
            .contains(Ap80211Capabilities::PROTO_WPA));
    }

    #[test]
    fn custom_event_with_odd_hex_adds_nothing() {
        let mut buf = ev_ap_address([1; 6]);
        buf.extend(ev_point_we19(IWEVCUSTOM, 0, b"wpa_ie=dd060"));

        let aps = decode(&buf, 21);
        assert!(aps[0].capabilities.get().is_empty());
    }

    #[test]
    fn generic_ie_event_dispatches_rsn() {
        let mut ie = vec![0x30, 0x06];
        ie.extend_from_slice(&[0x01, 0x00, 0x00, 0x0f, 0xac, 0x04]);

        let mut buf = ev_ap_address([1; 6]);
        buf.extend(ev_point_we19(IWEVGENIE, 0, &ie));

        let aps = decode(&buf, 21);
        assert!(aps[0]
            .capabilities
            .get()
            .contains(Ap80211Capabilities::PROTO_WPA2));
    }

    #[test]
    fn zero_length_event_terminates_decode() {
        let mut buf = ev_ap_address([1; 6]);
        let mut bogus = vec![0u8; IW_EV_LCP_LEN];
        bogus[0..2].copy_from_slice(&(IW_EV_LCP_LEN as u16).to_ne_bytes());
        buf.extend(bogus);
        buf.extend(ev_ap_address([2; 6]));

        // The event after the malformed one is never reached, but the AP
        // under construction is still emitted.
        let aps = decode(&buf, 21);
        assert_eq!(aps.len(), 1);
        assert_eq!(aps[0].bssid.get(), MacAddress([1; 6]));
    }

    #[test]
    fn truncated_final_event_keeps_accumulated_aps() {
        let mut buf = ev_ap_address([1; 6]);
        let mut truncated = ev_ap_address([2; 6]);
        truncated.truncate(IW_EV_LCP_LEN + 3);
        buf.extend(truncated);

        let aps = decode(&buf, 21);
        assert_eq!(aps.len(), 1);
    }

    #[test]
    fn hexstr2bin_round_trips() {
        let original = "dd160050f20101000050f202";
        let decoded = hexstr2bin(original).unwrap();
        let reencoded: String = decoded.iter().map(|b| format!("{b:02x}")).collect();
        assert_eq!(reencoded, original);
    }

    #[test]
    fn hexstr2bin_rejects_odd_length() {
        assert!(hexstr2bin("abc").is_none());
        assert!(hexstr2bin("zz").is_none());
    }
}
