//! Shared type definitions for the network core.

pub mod events;

use serde::{Deserialize, Serialize};

/// Named scan cadences for a wireless device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScanIntervalPreset {
    /// Initial cadence right after startup or a blocked scan.
    Init,
    /// Cadence while the device is in active use.
    Active,
    /// Relaxed cadence for devices nothing is happening on.
    Inactive,
}

impl ScanIntervalPreset {
    /// Seconds between scans for this preset.
    pub fn seconds(self) -> u8 {
        match self {
            Self::Init => 15,
            Self::Active => 20,
            Self::Inactive => 120,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_map_to_documented_cadence() {
        assert_eq!(ScanIntervalPreset::Init.seconds(), 15);
        assert_eq!(ScanIntervalPreset::Active.seconds(), 20);
        assert_eq!(ScanIntervalPreset::Inactive.seconds(), 120);
    }
}
