// SPDX-License-Identifier: MIT

use crate::error::DecodeContext;
use netlink_packet_core::{
    DecodeError, DefaultNla, Emitable, Nla, NlaBuffer, NlasIterator, Parseable,
    parse_u16, parse_u32, parse_u64,
};

use crate::{
    bytes::{write_u16, write_u32, write_u64},
    Nl80211BssAttr,
};

const ETH_ALEN: usize = 6;

const NL80211_ATTR_WIPHY: u16 = 1;
const NL80211_ATTR_IFINDEX: u16 = 3;
const NL80211_ATTR_MAC: u16 = 6;
const NL80211_ATTR_WIPHY_FREQ: u16 = 38;
const NL80211_ATTR_IE: u16 = 42;
const NL80211_ATTR_SCAN_FREQUENCIES: u16 = 44;
const NL80211_ATTR_SCAN_SSIDS: u16 = 45;
const NL80211_ATTR_GENERATION: u16 = 46;
const NL80211_ATTR_BSS: u16 = 47;
const NL80211_ATTR_SSID: u16 = 52;
const NL80211_ATTR_SCHED_SCAN_INTERVAL: u16 = 119;
const NL80211_ATTR_SCAN_SUPP_RATES: u16 = 125;
const NL80211_ATTR_TX_NO_CCK_RATE: u16 = 135;
const NL80211_ATTR_WDEV: u16 = 153;
const NL80211_ATTR_SCAN_FLAGS: u16 = 158;
const NL80211_ATTR_MAC_MASK: u16 = 215;
const NL80211_ATTR_SCAN_START_TIME_TSF: u16 = 233;
const NL80211_ATTR_MEASUREMENT_DURATION: u16 = 235;
const NL80211_ATTR_MEASUREMENT_DURATION_MANDATORY: u16 = 236;

// Entries of the nested SCAN_SSIDS and SCAN_FREQUENCIES lists carry no
// meaning in their kind field; it is just the list position.

#[derive(Debug, Clone, PartialEq, Eq)]
struct ScanSsidNla {
    index: u16,
    ssid: Vec<u8>,
}

impl Nla for ScanSsidNla {
    fn value_len(&self) -> usize {
        self.ssid.len()
    }

    fn emit_value(&self, buffer: &mut [u8]) {
        buffer[..self.ssid.len()].copy_from_slice(self.ssid.as_slice())
    }

    fn kind(&self) -> u16 {
        // 1-based, the way iw numbers them; the kernel ignores it
        self.index + 1
    }
}

fn ssid_nlas(ssids: &[Vec<u8>]) -> Vec<ScanSsidNla> {
    ssids
        .iter()
        .enumerate()
        .map(|(i, ssid)| ScanSsidNla {
            index: i as u16,
            ssid: ssid.clone(),
        })
        .collect()
}

fn parse_ssid_nlas(payload: &[u8]) -> Result<Vec<Vec<u8>>, DecodeError> {
    let mut ssids: Vec<Vec<u8>> = Vec::new();
    for nla in NlasIterator::new(payload) {
        let error_msg = format!("Invalid NL80211_ATTR_SCAN_SSIDS: {nla:?}");
        let nla = &nla.context(error_msg)?;
        ssids.push(nla.value().to_vec());
    }
    Ok(ssids)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ScanFreqNla {
    index: u16,
    freq: u32,
}

impl Nla for ScanFreqNla {
    fn value_len(&self) -> usize {
        4
    }

    fn emit_value(&self, buffer: &mut [u8]) {
        write_u32(buffer, self.freq)
    }

    fn kind(&self) -> u16 {
        self.index
    }
}

fn freq_nlas(freqs: &[u32]) -> Vec<ScanFreqNla> {
    freqs
        .iter()
        .enumerate()
        .map(|(i, freq)| ScanFreqNla {
            index: i as u16,
            freq: *freq,
        })
        .collect()
}

fn parse_freq_nlas(payload: &[u8]) -> Result<Vec<u32>, DecodeError> {
    let mut freqs: Vec<u32> = Vec::new();
    for nla in NlasIterator::new(payload) {
        let error_msg =
            format!("Invalid NL80211_ATTR_SCAN_FREQUENCIES: {nla:?}");
        let nla = &nla.context(error_msg.clone())?;
        freqs.push(parse_u32(nla.value()).context(error_msg)?);
    }
    Ok(freqs)
}

/// Supported rates for one band, rates in units of 500 kb/s. The nested
/// attribute is indexed by `enum nl80211_band`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanSuppRates {
    pub band: u16,
    pub rates: Vec<u8>,
}

impl Nla for ScanSuppRates {
    fn value_len(&self) -> usize {
        self.rates.len()
    }

    fn emit_value(&self, buffer: &mut [u8]) {
        buffer[..self.rates.len()].copy_from_slice(self.rates.as_slice())
    }

    fn kind(&self) -> u16 {
        self.band
    }
}

impl<'a, T: AsRef<[u8]> + ?Sized> Parseable<NlaBuffer<&'a T>>
    for ScanSuppRates
{
    fn parse(buf: &NlaBuffer<&'a T>) -> Result<Self, DecodeError> {
        Ok(Self {
            band: buf.kind(),
            rates: buf.value().to_vec(),
        })
    }
}

bitflags::bitflags! {
    /// Scan request control flags
    // Kernel data type: enum nl80211_scan_flags
    #[derive(Debug, Default, PartialEq, Eq, Clone, Copy)]
    #[non_exhaustive]
    pub struct Nl80211ScanFlags: u32 {
        /// Scan request has low priority
        const LowPriority = 1 << 0;
        /// Flush cache before scanning
        const Flush = 1 << 1;
        /// Force a scan even if the interface is configured as AP
        const Ap = 1 << 2;
        /// Use a random MAC address for this scan. Must not be requested
        /// unless the device advertises the feature.
        const RandomAddr = 1 << 3;
        /// Fill the dwell time in the FILS request parameters IE in the
        /// probe request
        const FilsMaxChannelTime = 1 << 4;
        /// Accept broadcast probe responses
        const AcceptBcastProbeResp = 1 << 5;
        /// Send probe request frames at rate of at least 5.5M
        const OceProbeReqHighTxRate = 1 << 6;
        /// Allow probe request tx deferral and suppression
        const OceProbeReqDeferralSuppression = 1 << 7;
        /// Ask the driver to minimize the total time taken by the scan
        const LowSpan = 1 << 8;
        /// Ask the driver to minimize the power consumed by the scan
        const LowPower = 1 << 9;
        /// Ask the driver for maximum possible scan results
        const HighAccuracy = 1 << 10;
        /// Randomize the sequence number in probe request frames
        const RandomSn = 1 << 11;
        /// Minimize probe request content to supported rates only
        const MinPreqContent = 1 << 12;
        /// Report scan results with kHz frequency attributes
        const FreqKhz = 1 << 13;
        /// Scan for collocated APs reported by 2.4/5 GHz APs
        const Colocated6Ghz = 1 << 14;
        const _ = !0;
    }
}

impl<T: AsRef<[u8]> + ?Sized> Parseable<T> for Nl80211ScanFlags {
    fn parse(buf: &T) -> Result<Self, DecodeError> {
        let buf: &[u8] = buf.as_ref();
        Ok(Self::from_bits_retain(parse_u32(buf).context(format!(
            "Invalid Nl80211ScanFlags payload {buf:?}"
        ))?))
    }
}

impl Nl80211ScanFlags {
    pub const LENGTH: usize = 4;
}

impl Emitable for Nl80211ScanFlags {
    fn buffer_len(&self) -> usize {
        Self::LENGTH
    }

    fn emit(&self, buffer: &mut [u8]) {
        buffer.copy_from_slice(&self.bits().to_ne_bytes())
    }
}

/// The subset of `enum nl80211_attrs` carried by scan commands, scan
/// events and GET_SCAN dump replies.
#[derive(Debug, PartialEq, Eq, Clone)]
#[non_exhaustive]
pub enum Nl80211Attr {
    Wiphy(u32),
    IfIndex(u32),
    Mac([u8; ETH_ALEN]),
    MacMask([u8; ETH_ALEN]),
    Wdev(u64),
    /// Frequency in MHz
    WiphyFreq(u32),
    /// Information element(s) to append to the probe request, raw TLV
    /// bytes.
    Ie(Vec<u8>),
    Generation(u32),
    /// Basic Service Set (BSS)
    Bss(Vec<Nl80211BssAttr>),
    /// SSID as raw bytes, up to 32 of them.
    Ssid(Vec<u8>),
    /// Scan frequencies in MHz.
    ScanFrequencies(Vec<u32>),
    /// SSIDs to probe during an active scan. A zero-length entry requests
    /// the broadcast probe.
    ScanSsids(Vec<Vec<u8>>),
    ScanFlags(Nl80211ScanFlags),
    ScanSuppRates(Vec<ScanSuppRates>),
    TxNoCckRate,
    /// Per-channel dwell time in TUs.
    MeasurementDuration(u16),
    MeasurementDurationMandatory,
    /// TSF of the radio when the scan was started, in microseconds.
    ScanStartTimeTsf(u64),
    /// Scheduled scan interval in milliseconds.
    SchedScanInterval(u32),
    Other(DefaultNla),
}

impl Nla for Nl80211Attr {
    fn value_len(&self) -> usize {
        match self {
            Self::Wiphy(_)
            | Self::IfIndex(_)
            | Self::WiphyFreq(_)
            | Self::Generation(_)
            | Self::SchedScanInterval(_) => 4,
            Self::Wdev(_) | Self::ScanStartTimeTsf(_) => 8,
            Self::Mac(_) | Self::MacMask(_) => ETH_ALEN,
            Self::Ie(v) | Self::Ssid(v) => v.len(),
            Self::Bss(v) => v.as_slice().buffer_len(),
            Self::ScanFrequencies(v) => freq_nlas(v).as_slice().buffer_len(),
            Self::ScanSsids(v) => ssid_nlas(v).as_slice().buffer_len(),
            Self::ScanFlags(v) => v.buffer_len(),
            Self::ScanSuppRates(v) => v.as_slice().buffer_len(),
            Self::TxNoCckRate | Self::MeasurementDurationMandatory => 0,
            Self::MeasurementDuration(_) => 2,
            Self::Other(attr) => attr.value_len(),
        }
    }

    fn kind(&self) -> u16 {
        match self {
            Self::Wiphy(_) => NL80211_ATTR_WIPHY,
            Self::IfIndex(_) => NL80211_ATTR_IFINDEX,
            Self::Mac(_) => NL80211_ATTR_MAC,
            Self::MacMask(_) => NL80211_ATTR_MAC_MASK,
            Self::Wdev(_) => NL80211_ATTR_WDEV,
            Self::WiphyFreq(_) => NL80211_ATTR_WIPHY_FREQ,
            Self::Ie(_) => NL80211_ATTR_IE,
            Self::Generation(_) => NL80211_ATTR_GENERATION,
            Self::Bss(_) => NL80211_ATTR_BSS,
            Self::Ssid(_) => NL80211_ATTR_SSID,
            Self::ScanFrequencies(_) => NL80211_ATTR_SCAN_FREQUENCIES,
            Self::ScanSsids(_) => NL80211_ATTR_SCAN_SSIDS,
            Self::ScanFlags(_) => NL80211_ATTR_SCAN_FLAGS,
            Self::ScanSuppRates(_) => NL80211_ATTR_SCAN_SUPP_RATES,
            Self::TxNoCckRate => NL80211_ATTR_TX_NO_CCK_RATE,
            Self::MeasurementDuration(_) => NL80211_ATTR_MEASUREMENT_DURATION,
            Self::MeasurementDurationMandatory => {
                NL80211_ATTR_MEASUREMENT_DURATION_MANDATORY
            }
            Self::ScanStartTimeTsf(_) => NL80211_ATTR_SCAN_START_TIME_TSF,
            Self::SchedScanInterval(_) => NL80211_ATTR_SCHED_SCAN_INTERVAL,
            Self::Other(attr) => attr.kind(),
        }
    }

    fn emit_value(&self, buffer: &mut [u8]) {
        match self {
            Self::Wiphy(d)
            | Self::IfIndex(d)
            | Self::WiphyFreq(d)
            | Self::Generation(d)
            | Self::SchedScanInterval(d) => write_u32(buffer, *d),
            Self::Wdev(d) | Self::ScanStartTimeTsf(d) => write_u64(buffer, *d),
            Self::Mac(v) | Self::MacMask(v) => {
                buffer[..ETH_ALEN].copy_from_slice(v)
            }
            Self::Ie(v) | Self::Ssid(v) => {
                buffer[..v.len()].copy_from_slice(v.as_slice())
            }
            Self::Bss(v) => v.as_slice().emit(buffer),
            Self::ScanFrequencies(v) => freq_nlas(v).as_slice().emit(buffer),
            Self::ScanSsids(v) => ssid_nlas(v).as_slice().emit(buffer),
            Self::ScanFlags(v) => v.emit(buffer),
            Self::ScanSuppRates(v) => v.as_slice().emit(buffer),
            Self::TxNoCckRate | Self::MeasurementDurationMandatory => (),
            Self::MeasurementDuration(d) => write_u16(buffer, *d),
            Self::Other(attr) => attr.emit(buffer),
        }
    }
}

impl<'a, T: AsRef<[u8]> + ?Sized> Parseable<NlaBuffer<&'a T>> for Nl80211Attr {
    fn parse(buf: &NlaBuffer<&'a T>) -> Result<Self, DecodeError> {
        let payload = buf.value();
        Ok(match buf.kind() {
            NL80211_ATTR_WIPHY => {
                let err_msg =
                    format!("Invalid NL80211_ATTR_WIPHY value {payload:?}");
                Self::Wiphy(parse_u32(payload).context(err_msg)?)
            }
            NL80211_ATTR_IFINDEX => {
                let err_msg =
                    format!("Invalid NL80211_ATTR_IFINDEX value {payload:?}");
                Self::IfIndex(parse_u32(payload).context(err_msg)?)
            }
            NL80211_ATTR_MAC => {
                if payload.len() < ETH_ALEN {
                    return Err(
                        format!("Invalid NL80211_ATTR_MAC {payload:?}").into()
                    );
                }
                let mut mac = [0u8; ETH_ALEN];
                mac.copy_from_slice(&payload[..ETH_ALEN]);
                Self::Mac(mac)
            }
            NL80211_ATTR_MAC_MASK => {
                if payload.len() < ETH_ALEN {
                    return Err(format!(
                        "Invalid NL80211_ATTR_MAC_MASK {payload:?}"
                    )
                    .into());
                }
                let mut mac = [0u8; ETH_ALEN];
                mac.copy_from_slice(&payload[..ETH_ALEN]);
                Self::MacMask(mac)
            }
            NL80211_ATTR_WDEV => {
                let err_msg =
                    format!("Invalid NL80211_ATTR_WDEV value {payload:?}");
                Self::Wdev(parse_u64(payload).context(err_msg)?)
            }
            NL80211_ATTR_WIPHY_FREQ => {
                let err_msg = format!(
                    "Invalid NL80211_ATTR_WIPHY_FREQ value {payload:?}"
                );
                Self::WiphyFreq(parse_u32(payload).context(err_msg)?)
            }
            NL80211_ATTR_IE => Self::Ie(payload.to_vec()),
            NL80211_ATTR_GENERATION => {
                let err_msg = format!(
                    "Invalid NL80211_ATTR_GENERATION value {payload:?}"
                );
                Self::Generation(parse_u32(payload).context(err_msg)?)
            }
            NL80211_ATTR_BSS => {
                let err_msg =
                    format!("Invalid NL80211_ATTR_BSS value {payload:?}");
                let mut nlas = Vec::new();
                for nla in NlasIterator::new(payload) {
                    let nla = &nla.context(err_msg.clone())?;
                    nlas.push(
                        Nl80211BssAttr::parse(nla).context(err_msg.clone())?,
                    );
                }
                Self::Bss(nlas)
            }
            NL80211_ATTR_SSID => Self::Ssid(payload.to_vec()),
            NL80211_ATTR_SCAN_FREQUENCIES => {
                Self::ScanFrequencies(parse_freq_nlas(payload)?)
            }
            NL80211_ATTR_SCAN_SSIDS => {
                Self::ScanSsids(parse_ssid_nlas(payload)?)
            }
            NL80211_ATTR_SCAN_FLAGS => {
                Self::ScanFlags(Nl80211ScanFlags::parse(payload)?)
            }
            NL80211_ATTR_SCAN_SUPP_RATES => {
                let err_msg = format!(
                    "Invalid NL80211_ATTR_SCAN_SUPP_RATES value {payload:?}"
                );
                let mut rates = Vec::new();
                for nla in NlasIterator::new(payload) {
                    let nla = &nla.context(err_msg.clone())?;
                    rates.push(ScanSuppRates::parse(nla)?);
                }
                Self::ScanSuppRates(rates)
            }
            NL80211_ATTR_TX_NO_CCK_RATE => Self::TxNoCckRate,
            NL80211_ATTR_MEASUREMENT_DURATION => {
                let err_msg = format!(
                    "Invalid NL80211_ATTR_MEASUREMENT_DURATION value \
                    {payload:?}"
                );
                Self::MeasurementDuration(parse_u16(payload).context(err_msg)?)
            }
            NL80211_ATTR_MEASUREMENT_DURATION_MANDATORY => {
                Self::MeasurementDurationMandatory
            }
            NL80211_ATTR_SCAN_START_TIME_TSF => {
                let err_msg = format!(
                    "Invalid NL80211_ATTR_SCAN_START_TIME_TSF value \
                    {payload:?}"
                );
                Self::ScanStartTimeTsf(parse_u64(payload).context(err_msg)?)
            }
            NL80211_ATTR_SCHED_SCAN_INTERVAL => {
                let err_msg = format!(
                    "Invalid NL80211_ATTR_SCHED_SCAN_INTERVAL value \
                    {payload:?}"
                );
                Self::SchedScanInterval(parse_u32(payload).context(err_msg)?)
            }
            _ => Self::Other(
                DefaultNla::parse(buf).context("invalid NLA (unknown kind)")?,
            ),
        })
    }
}
