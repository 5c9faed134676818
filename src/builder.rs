// SPDX-License-Identifier: MIT

use std::collections::VecDeque;

use crate::{
    Nl80211Attr, Nl80211ScanFlags, RadioCapabilities, ScanConfig, ScanFreqSet,
    ScanMessage, ScanSuppRates,
};

const ETH_ALEN: usize = 6;

const ELEMENT_ID_INTERWORKING: u8 = 107;
const ELEMENT_ID_EXTENDED_CAPABILITIES: u8 = 127;

// enum nl80211_band
const NL80211_BAND_2GHZ: u16 = 0;

// OFDM rates in 500 kb/s units; the 802.11b-only CCK rates 2/4/11/22
// are left out when `no_cck_rates` is requested.
const OFDM_RATES_500KBPS: [u8; 8] = [12, 18, 24, 36, 48, 72, 96, 108];

/// The known-networks collaborator: supplies SSIDs of configured hidden
/// networks so active scans can direct-probe them.
pub trait HiddenSsidSource {
    fn hidden_ssids(&self) -> Vec<Vec<u8>>;
}

/// Options of one logical scan, expanded into one or more TRIGGER_SCAN
/// commands by the builder.
#[derive(Debug, Default, Clone)]
pub struct ScanParameters {
    /// Restrict the scan to these frequencies; `None` scans everything
    /// the regulatory state allows.
    pub frequencies: Option<ScanFreqSet>,
    /// A single explicit SSID to direct-probe.
    pub ssid: Option<Vec<u8>>,
    /// Ask the driver to drop its cached results before scanning.
    pub flush: bool,
    /// Raw IE TLVs appended as the last elements of the probe request.
    pub extra_ie: Vec<u8>,
    /// Use a randomized source MAC if the radio supports it and the
    /// configuration does not forbid it.
    pub randomize_mac_addr_hint: bool,
    /// Probe from this exact source MAC.
    pub source_mac: Option<[u8; ETH_ALEN]>,
    /// Do not send probes at CCK rates.
    pub no_cck_rates: bool,
    /// Per-channel dwell time hint in TUs, 0 to leave it to the driver.
    pub duration: u16,
    pub duration_mandatory: bool,
}

/// Probe request IEs in their 802.11 order: Extended Capabilities,
/// Interworking if the radio advertises it, then the caller's extras.
fn build_probe_ies(
    params: &ScanParameters,
    capabilities: &RadioCapabilities,
) -> Vec<u8> {
    let mut ies = Vec::new();

    if !capabilities.ext_capabilities.is_empty() {
        ies.push(ELEMENT_ID_EXTENDED_CAPABILITIES);
        ies.push(capabilities.ext_capabilities.len() as u8);
        ies.extend_from_slice(&capabilities.ext_capabilities);
    }

    if capabilities.interworking() {
        ies.extend_from_slice(&[ELEMENT_ID_INTERWORKING, 1, 0]);
    }

    ies.extend_from_slice(&params.extra_ie);
    ies
}

fn build_attrs(
    device: u64,
    params: &ScanParameters,
    passive: bool,
    flush: bool,
    ssids: Option<Vec<Vec<u8>>>,
    capabilities: &RadioCapabilities,
    config: &ScanConfig,
) -> Vec<Nl80211Attr> {
    let mut attributes = vec![Nl80211Attr::Wdev(device)];
    let mut flags = Nl80211ScanFlags::default();

    if flush {
        flags |= Nl80211ScanFlags::Flush;
    }
    if params.randomize_mac_addr_hint
        && capabilities.supports_random_mac
        && !config.disable_mac_address_randomization
    {
        flags |= Nl80211ScanFlags::RandomAddr;
    }

    if let Some(freqs) = params.frequencies.as_ref() {
        attributes.push(Nl80211Attr::ScanFrequencies(freqs.to_vec()));
    }

    if let Some(ssids) = ssids {
        attributes.push(Nl80211Attr::ScanSsids(ssids));
    }

    if !passive {
        let ies = build_probe_ies(params, capabilities);
        if !ies.is_empty() {
            attributes.push(Nl80211Attr::Ie(ies));
        }
    }

    if params.no_cck_rates {
        attributes.push(Nl80211Attr::TxNoCckRate);
        attributes.push(Nl80211Attr::ScanSuppRates(vec![ScanSuppRates {
            band: NL80211_BAND_2GHZ,
            rates: OFDM_RATES_500KBPS.to_vec(),
        }]));
    }

    if let Some(mac) = params.source_mac {
        attributes.push(Nl80211Attr::Mac(mac));
        attributes.push(Nl80211Attr::MacMask([0xff; ETH_ALEN]));
    }

    if params.duration > 0 && capabilities.supports_scan_dwell {
        attributes.push(Nl80211Attr::MeasurementDuration(params.duration));
        if params.duration_mandatory {
            attributes.push(Nl80211Attr::MeasurementDurationMandatory);
        }
    }

    if !flags.is_empty() {
        attributes.push(Nl80211Attr::ScanFlags(flags));
    }

    attributes
}

/// Expand one logical scan into its TRIGGER_SCAN command sequence.
///
/// Active scans without an explicit SSID probe every known hidden SSID
/// plus a final broadcast probe; when the list exceeds what the radio
/// accepts per command the scan fragments, with the flush flag forced
/// off on every fragment but the first so the results accumulate.
pub(crate) fn build_scan_commands(
    device: u64,
    params: &ScanParameters,
    passive: bool,
    hidden: &[Vec<u8>],
    capabilities: &RadioCapabilities,
    config: &ScanConfig,
) -> VecDeque<ScanMessage> {
    let ssid_lists: Vec<Option<Vec<Vec<u8>>>> = if passive {
        vec![None]
    } else if let Some(ssid) = params.ssid.as_ref() {
        vec![Some(vec![ssid.clone()])]
    } else {
        let mut ssids: Vec<Vec<u8>> = hidden
            .iter()
            .filter(|ssid| !ssid.is_empty() && ssid.len() <= 32)
            .cloned()
            .collect();
        ssids.push(Vec::new());
        ssids
            .chunks(capabilities.ssids_per_scan())
            .map(|chunk| Some(chunk.to_vec()))
            .collect()
    };

    ssid_lists
        .into_iter()
        .enumerate()
        .map(|(i, ssids)| {
            ScanMessage::new_trigger_scan(build_attrs(
                device,
                params,
                passive,
                params.flush && i == 0,
                ssids,
                capabilities,
                config,
            ))
        })
        .collect()
}

pub(crate) fn build_get_scan(device: u64) -> ScanMessage {
    ScanMessage::new_scan_get(vec![Nl80211Attr::Wdev(device)])
}
