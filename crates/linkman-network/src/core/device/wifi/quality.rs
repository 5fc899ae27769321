//! Link-quality normalization.
//!
//! Drivers report signal quality three different ways: a percentage against
//! a driver-declared maximum, an absolute dBm level, or a raw RSSI bounded
//! by the driver's maximum. This folds any of them into one 0–100 percent,
//! or −1 when the sample carries nothing usable.

use crate::sys::wext::{
    IW_QUAL_LEVEL_INVALID, IW_QUAL_NOISE_INVALID, IW_QUAL_QUAL_INVALID, IwQuality,
};

/// Fallbacks for drivers that do not report a noise floor or maximum level.
const FALLBACK_NOISE_FLOOR_DBM: i32 = -90;
const FALLBACK_SIGNAL_MAX_DBM: i32 = -20;

/// Converts a quality sample into a strength percentage.
///
/// `max_qual` and `avg_qual` are the driver's reference templates from the
/// range ioctl. Decision order:
///
/// 1. the driver's own percentage when `max_qual.qual` is declared and both
///    values are flagged valid;
/// 2. absolute dBm when `max_qual.level == 0` is flagged valid and a noise
///    floor is usable in either the sample or the template;
/// 3. raw RSSI bounded by `max_qual.level`;
/// 4. a sub-1 percentage from (1) defers to a level-derived value.
///
/// Returns −1 when no interpretation applies.
pub(crate) fn qual_to_percent(qual: &IwQuality, max_qual: &IwQuality, _avg_qual: &IwQuality) -> i8 {
    let mut percent: i32 = -1;
    let mut level_percent: i32 = -1;

    // Drivers that fill in quality values must treat them as percentages
    // bounded by max_qual.qual.
    if max_qual.qual != 0
        && max_qual.updated & IW_QUAL_QUAL_INVALID == 0
        && qual.updated & IW_QUAL_QUAL_INVALID == 0
    {
        percent = (100.0 * (f64::from(qual.qual) / f64::from(max_qual.qual))) as i32;
    }

    let sample_noise_usable = qual.noise > 0 && qual.updated & IW_QUAL_NOISE_INVALID == 0;
    let template_noise_usable = max_qual.noise > 0 && max_qual.updated & IW_QUAL_NOISE_INVALID == 0;

    if max_qual.level == 0
        && max_qual.updated & IW_QUAL_LEVEL_INVALID == 0
        && qual.updated & IW_QUAL_LEVEL_INVALID == 0
        && (template_noise_usable || sample_noise_usable)
    {
        // Absolute power values (dBm); the on-wire u8 encodes a signed
        // value, recovered by subtracting 0x100.
        let max_level = FALLBACK_SIGNAL_MAX_DBM;
        let level = (i32::from(qual.level) - 0x100)
            .clamp(FALLBACK_NOISE_FLOOR_DBM, FALLBACK_SIGNAL_MAX_DBM);

        let mut noise = FALLBACK_NOISE_FLOOR_DBM;
        if sample_noise_usable {
            noise = i32::from(qual.noise) - 0x100;
        } else if template_noise_usable {
            noise = i32::from(max_qual.noise) - 0x100;
        }
        noise = noise.clamp(FALLBACK_NOISE_FLOOR_DBM, FALLBACK_SIGNAL_MAX_DBM);

        // A sort of signal-to-noise ratio calculation
        level_percent = (100.0
            - 70.0 * ((f64::from(max_level) - f64::from(level))
                / (f64::from(max_level) - f64::from(noise)))) as i32;
    } else if max_qual.level != 0
        && max_qual.updated & IW_QUAL_LEVEL_INVALID == 0
        && qual.updated & IW_QUAL_LEVEL_INVALID == 0
    {
        // Relative power values (RSSI), bounded by the driver maximum.
        let level = i32::from(qual.level).clamp(0, i32::from(max_qual.level));
        level_percent = (100.0 * (f64::from(level) / f64::from(max_qual.level))) as i32;
    }

    // A zero or missing quality percent defers to the level-derived value.
    if percent < 1 && level_percent >= 0 {
        percent = level_percent;
    }

    if percent < 0 && level_percent < 0 {
        return -1;
    }

    percent.clamp(0, 100) as i8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentage_path_scales_against_driver_maximum() {
        let max_qual = IwQuality {
            qual: 94,
            ..IwQuality::default()
        };
        let qual = IwQuality {
            qual: 47,
            ..IwQuality::default()
        };

        assert_eq!(qual_to_percent(&qual, &max_qual, &IwQuality::default()), 50);
    }

    #[test]
    fn dbm_path_interpolates_between_noise_and_max() {
        // level -55 dBm, noise -90 dBm (from the template)
        let max_qual = IwQuality {
            qual: 0,
            level: 0,
            noise: (256 - 90) as u8,
            updated: 0,
        };
        let qual = IwQuality {
            qual: 0,
            level: (256 - 55) as u8,
            noise: 0,
            updated: IW_QUAL_NOISE_INVALID,
        };

        let percent = qual_to_percent(&qual, &max_qual, &IwQuality::default());
        assert_eq!(percent, 65);
    }

    #[test]
    fn rssi_path_scales_against_max_level() {
        let max_qual = IwQuality {
            qual: 0,
            level: 100,
            ..IwQuality::default()
        };
        let qual = IwQuality {
            qual: 0,
            level: 60,
            ..IwQuality::default()
        };

        assert_eq!(qual_to_percent(&qual, &max_qual, &IwQuality::default()), 60);
    }

    #[test]
    fn sub_one_percentage_defers_to_level() {
        // Card reports 0% quality but a healthy RSSI.
        let max_qual = IwQuality {
            qual: 100,
            level: 100,
            ..IwQuality::default()
        };
        let qual = IwQuality {
            qual: 0,
            level: 80,
            ..IwQuality::default()
        };

        assert_eq!(qual_to_percent(&qual, &max_qual, &IwQuality::default()), 80);
    }

    #[test]
    fn unusable_sample_returns_unknown() {
        let max_qual = IwQuality {
            qual: 0,
            level: 0,
            noise: 0,
            updated: 0,
        };
        let qual = IwQuality {
            updated: IW_QUAL_QUAL_INVALID | IW_QUAL_LEVEL_INVALID | IW_QUAL_NOISE_INVALID,
            ..IwQuality::default()
        };

        assert_eq!(qual_to_percent(&qual, &max_qual, &IwQuality::default()), -1);
    }

    #[test]
    fn result_is_always_bounded() {
        // Saturated dBm sample clamps to 100 rather than overflowing.
        let max_qual = IwQuality {
            qual: 0,
            level: 0,
            noise: (256 - 90) as u8,
            updated: 0,
        };
        let qual = IwQuality {
            qual: 0,
            level: (256 - 10) as u8, // above the -20 dBm ceiling
            noise: 0,
            updated: IW_QUAL_NOISE_INVALID,
        };

        let percent = qual_to_percent(&qual, &max_qual, &IwQuality::default());
        assert!((0..=100).contains(&percent));
    }
}
