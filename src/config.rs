// SPDX-License-Identifier: MIT

use serde::Deserialize;

fn default_initial_periodic_scan_interval() -> u16 {
    10
}

fn default_maximum_periodic_scan_interval() -> u16 {
    300
}

fn default_rank_band_modifier_5ghz() -> f64 {
    1.0
}

/// Snapshot of the `[Scan]` and `[Rank]` sections of the daemon
/// configuration. Every field has a default so an empty document
/// deserializes to the stock behavior.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct ScanConfig {
    /// `Scan.EnableActiveScanning`: probe actively even outside hidden
    /// network handling.
    pub enable_active_scanning: bool,
    /// `Scan.DisablePeriodicScan`
    pub disable_periodic_scan: bool,
    /// `Scan.DisableMacAddressRandomization`
    pub disable_mac_address_randomization: bool,
    /// `Scan.InitialPeriodicScanInterval` in seconds
    #[serde(default = "default_initial_periodic_scan_interval")]
    pub initial_periodic_scan_interval: u16,
    /// `Scan.MaximumPeriodicScanInterval` in seconds
    #[serde(default = "default_maximum_periodic_scan_interval")]
    pub maximum_periodic_scan_interval: u16,
    /// `Rank.BandModifier5Ghz`
    #[serde(default = "default_rank_band_modifier_5ghz")]
    pub rank_band_modifier_5ghz: f64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            enable_active_scanning: false,
            disable_periodic_scan: false,
            disable_mac_address_randomization: false,
            initial_periodic_scan_interval:
                default_initial_periodic_scan_interval(),
            maximum_periodic_scan_interval:
                default_maximum_periodic_scan_interval(),
            rank_band_modifier_5ghz: default_rank_band_modifier_5ghz(),
        }
    }
}
