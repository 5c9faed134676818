// SPDX-License-Identifier: MIT

use std::cmp::Ordering;

use crate::BssRecord;

// 802.11ax peak PHY rate, the normalization point of the rank scale.
const MAX_SUPPORTED_RATE: f64 = 2.34e9;

const UTILIZATION_HIGH: u8 = 192;
const UTILIZATION_LOW: u8 = 63;

/// Map a BSS to its comparable rank.
///
/// The estimated data rate is normalized against the fastest supported
/// PHY, scaled by the configured 5 GHz preference, then nudged by the
/// advertised channel utilization.
pub fn compute_rank(bss: &BssRecord, band_modifier_5ghz: f64) -> u16 {
    let mut rank = bss.data_rate as f64 / MAX_SUPPORTED_RATE * 65535.0;

    if bss.frequency > 4000 {
        rank *= band_modifier_5ghz;
    }

    if bss.utilization >= UTILIZATION_HIGH {
        rank *= 0.8;
    } else if bss.utilization <= UTILIZATION_LOW {
        rank *= 1.2;
    }

    rank.clamp(0.0, f64::from(u16::MAX)) as u16
}

/// Order scan results best first: by rank descending, breaking ties on
/// the stronger signal.
pub fn rank_compare(a: &BssRecord, b: &BssRecord) -> Ordering {
    b.rank
        .cmp(&a.rank)
        .then_with(|| b.signal_mbm.cmp(&a.signal_mbm))
}
