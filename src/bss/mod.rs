// SPDX-License-Identifier: MIT

mod attr;

pub use self::attr::{BssCapability, Nl80211BssAttr};

use netlink_packet_core::DecodeError;

use crate::{
    bytes::get_bit,
    element::{
        advertisement_protocol_anqp, parse_bss_load, parse_hs20_indication,
        parse_network_cost, parse_owe_transition, ElementIter, OweTransition,
        RsnInfo, VendorIe, ELEMENT_ID_ADVERTISEMENT_PROTOCOL,
        ELEMENT_ID_BSS_LOAD, ELEMENT_ID_COUNTRY,
        ELEMENT_ID_EXTENDED_CAPABILITIES, ELEMENT_ID_EXT_SUPPORTED_RATES,
        ELEMENT_ID_HT_CAPABILITIES, ELEMENT_ID_INTERWORKING,
        ELEMENT_ID_MOBILITY_DOMAIN, ELEMENT_ID_RM_ENABLED_CAPABILITIES,
        ELEMENT_ID_ROAMING_CONSORTIUM, ELEMENT_ID_RSN, ELEMENT_ID_RSNX,
        ELEMENT_ID_SSID, ELEMENT_ID_SUPPORTED_RATES, ELEMENT_ID_VENDOR,
        ELEMENT_ID_VHT_CAPABILITIES, OUI_MICROSOFT, OUI_MICROSOFT_NETWORK_COST,
        OUI_MICROSOFT_WPA, OUI_MICROSOFT_WSC, OUI_SAE_DEFAULT_GROUP, OUI_WFA,
        OUI_WFA_DPP_CONFIGURATOR, OUI_WFA_HS20_INDICATION, OUI_WFA_OSEN,
        OUI_WFA_OWE_TRANSITION, OUI_WFA_WFD,
    },
};

const ETH_ALEN: usize = 6;

pub const SSID_MAX_SIZE: usize = 32;

/// Channel utilization is a 0-255 scale; the midpoint doubles as the
/// "not reported" sentinel.
pub const UTILIZATION_UNKNOWN: u8 = 127;

// Extended Capabilities: Proxy ARP service (802.11-2020, 9.4.2.25)
const EXT_CAP_BIT_PROXY_ARP: usize = 12;

// Nominal single-stream peaks used when the BSS advertises HT/VHT
// support, in bit/s.
const HT_SINGLE_STREAM_RATE: u64 = 72_200_000;
const VHT_SINGLE_STREAM_RATE: u64 = 433_300_000;

// BSS membership selector values share the rates field with the MSB set.
const BSS_MEMBERSHIP_SELECTOR_MIN: u8 = 123;

/// The kind of frame a BSS entry was parsed from.
#[derive(Debug, Default, PartialEq, Eq, Clone, Copy)]
pub enum SourceFrame {
    #[default]
    Beacon,
    ProbeResponse,
    ProbeRequest,
}

/// One access point as observed during a scan. Immutable once built;
/// the engine assigns `rank` before the record is exposed.
#[derive(Debug, Default, PartialEq, Eq, Clone)]
pub struct BssRecord {
    pub addr: [u8; ETH_ALEN],
    /// Center frequency in MHz
    pub frequency: u32,
    pub capability: BssCapability,
    /// Signal strength in mBm (1/100 dBm)
    pub signal_mbm: i32,
    /// Estimated peak data rate in bit/s
    pub data_rate: u64,
    /// Channel utilization, 0-255; [`UTILIZATION_UNKNOWN`] when the BSS
    /// Load element was absent.
    pub utilization: u8,
    /// Raw SSID bytes, at most 32. Empty means hidden.
    pub ssid: Vec<u8>,
    pub source_frame: SourceFrame,
    /// RSN element including its 2-byte header
    pub rsne: Option<Vec<u8>>,
    /// RSN Extension element including its 2-byte header
    pub rsnxe: Option<Vec<u8>>,
    /// Legacy WPA vendor element including its 2-byte header
    pub wpa: Option<Vec<u8>>,
    /// OSEN vendor element including its 2-byte header
    pub osen: Option<Vec<u8>>,
    /// WSC vendor payload, vendor header stripped
    pub wsc: Option<Vec<u8>>,
    /// Roaming Consortium element including its 2-byte header
    pub rc_ie: Option<Vec<u8>>,
    /// Wi-Fi Display vendor element including its 2-byte header
    pub wfd: Option<Vec<u8>>,
    pub hs20_capable: bool,
    pub hs20_version: u8,
    pub hs20_dgaf_disable: bool,
    pub owe_trans: Option<OweTransition>,
    pub dpp_configurator: bool,
    pub force_default_sae_group: bool,
    /// Mobility Domain element value
    pub mde: Option<[u8; 3]>,
    /// Country code, first three bytes of the Country element
    pub cc: Option<[u8; 3]>,
    pub hessid: [u8; ETH_ALEN],
    pub anqp_capable: bool,
    pub cap_rm_neighbor_report: bool,
    pub ht_capable: bool,
    pub vht_capable: bool,
    pub cost_level: u8,
    pub cost_flags: u8,
    pub proxy_arp: bool,
    /// TSF of the frame's parent in microseconds
    pub parent_tsf: u64,
    /// When this BSS was last seen, in microseconds on the boottime
    /// clock
    pub time_stamp: u64,
    pub rank: u16,
}

impl BssRecord {
    fn new() -> Self {
        Self {
            utilization: UTILIZATION_UNKNOWN,
            ..Default::default()
        }
    }

    /// Parse a BSS out of the attributes of one GET_SCAN dump entry.
    ///
    /// `dump_start_us` is the boottime timestamp taken when the dump was
    /// started; it anchors `time_stamp` for drivers that only report
    /// `seen_ms_ago`.
    pub fn from_dump(
        attrs: &[Nl80211BssAttr],
        dump_start_us: u64,
    ) -> Result<Self, DecodeError> {
        let mut ret = Self::new();
        let mut bssid_seen = false;
        let mut ies: Option<&[u8]> = None;
        let mut seen_ms_ago: u32 = 0;
        let mut boottime_ns: Option<u64> = None;

        for attr in attrs {
            match attr {
                Nl80211BssAttr::Bssid(v) => {
                    ret.addr = *v;
                    bssid_seen = true;
                }
                Nl80211BssAttr::Frequency(d) => ret.frequency = *d,
                Nl80211BssAttr::Capability(v) => ret.capability = *v,
                Nl80211BssAttr::SignalMbm(d) => ret.signal_mbm = *d,
                Nl80211BssAttr::SignalUnspec(d) => {
                    if *d > 100 {
                        return Err(format!(
                            "Invalid NL80211_BSS_SIGNAL_UNSPEC value {d}"
                        )
                        .into());
                    }
                    // 0-100 scale mapped onto mBm-sized units
                    ret.signal_mbm = i32::from(*d) * 100;
                }
                Nl80211BssAttr::InformationElements(v) => {
                    ies = Some(v.as_slice());
                }
                Nl80211BssAttr::PrespData => {
                    ret.source_frame = SourceFrame::ProbeResponse;
                }
                Nl80211BssAttr::SeenMsAgo(d) => seen_ms_ago = *d,
                Nl80211BssAttr::LastSeenBootTime(d) => boottime_ns = Some(*d),
                Nl80211BssAttr::ParentTsf(d) => ret.parent_tsf = *d,
                _ => (),
            }
        }

        if !bssid_seen {
            return Err("BSS dump entry carries no NL80211_BSS_BSSID".into());
        }

        ret.time_stamp = match boottime_ns {
            Some(ns) => ns / 1000,
            None => {
                dump_start_us.saturating_sub(u64::from(seen_ms_ago) * 1000)
            }
        };

        // A missing IE attribute is an empty IE block, which then fails
        // below for the lack of an SSID element.
        ret.parse_elements(ies.unwrap_or(&[]))?;
        Ok(ret)
    }

    /// Parse a BSS out of the IE stream of a received probe request, for
    /// AP-side use.
    pub fn from_probe_request(ies: &[u8]) -> Result<Self, DecodeError> {
        let mut ret = Self::new();
        ret.source_frame = SourceFrame::ProbeRequest;
        ret.parse_elements(ies)?;
        Ok(ret)
    }

    fn parse_elements(&mut self, ies: &[u8]) -> Result<(), DecodeError> {
        let mut have_ssid = false;
        let mut max_rate_500kbps: u8 = 0;

        for element in ElementIter::new(ies) {
            let data = element.data;
            match element.id {
                ELEMENT_ID_SSID => {
                    if data.len() > SSID_MAX_SIZE {
                        return Err(format!(
                            "SSID element too long: {} bytes",
                            data.len()
                        )
                        .into());
                    }
                    if !have_ssid {
                        self.ssid = data.to_vec();
                        have_ssid = true;
                    }
                }
                ELEMENT_ID_SUPPORTED_RATES
                | ELEMENT_ID_EXT_SUPPORTED_RATES => {
                    for byte in data {
                        let rate = byte & 0x7f;
                        if byte & 0x80 != 0
                            && rate >= BSS_MEMBERSHIP_SELECTOR_MIN
                        {
                            continue;
                        }
                        max_rate_500kbps = max_rate_500kbps.max(rate);
                    }
                }
                ELEMENT_ID_COUNTRY => {
                    // 802.11-2020 requires at least country string +
                    // one triplet
                    if data.len() >= 6 && self.cc.is_none() {
                        self.cc = Some([data[0], data[1], data[2]]);
                    }
                }
                ELEMENT_ID_BSS_LOAD => match parse_bss_load(data) {
                    Ok(utilization) => self.utilization = utilization,
                    Err(e) => log::warn!("Ignoring BSS Load element: {e}"),
                },
                ELEMENT_ID_HT_CAPABILITIES => self.ht_capable = true,
                ELEMENT_ID_VHT_CAPABILITIES => self.vht_capable = true,
                ELEMENT_ID_RSN => {
                    if self.rsne.is_none() {
                        self.rsne = Some(element.raw.to_vec());
                    }
                }
                ELEMENT_ID_RSNX => {
                    if self.rsnxe.is_none() {
                        self.rsnxe = Some(element.raw.to_vec());
                    }
                }
                ELEMENT_ID_MOBILITY_DOMAIN => {
                    if data.len() == 3 && self.mde.is_none() {
                        self.mde = Some([data[0], data[1], data[2]]);
                    }
                }
                ELEMENT_ID_RM_ENABLED_CAPABILITIES => {
                    if data.len() == 5 {
                        self.cap_rm_neighbor_report = data[0] & 0x01 != 0;
                    }
                }
                ELEMENT_ID_INTERWORKING => {
                    if data.len() == 9 {
                        self.hessid.copy_from_slice(&data[3..9]);
                    } else if data.len() == 7 {
                        self.hessid.copy_from_slice(&data[1..7]);
                    }
                }
                ELEMENT_ID_ADVERTISEMENT_PROTOCOL => {
                    if advertisement_protocol_anqp(data) {
                        self.anqp_capable = true;
                    }
                }
                ELEMENT_ID_ROAMING_CONSORTIUM => {
                    if self.rc_ie.is_none() {
                        self.rc_ie = Some(element.raw.to_vec());
                    }
                }
                ELEMENT_ID_EXTENDED_CAPABILITIES => {
                    self.proxy_arp = get_bit(data, EXT_CAP_BIT_PROXY_ARP);
                }
                ELEMENT_ID_VENDOR => self.parse_vendor(element.raw, data),
                _ => (),
            }
        }

        if !have_ssid {
            return Err("IE stream carries no SSID element".into());
        }

        self.data_rate = u64::from(max_rate_500kbps) * 500_000;
        if self.ht_capable {
            self.data_rate = self.data_rate.max(HT_SINGLE_STREAM_RATE);
        }
        if self.vht_capable {
            self.data_rate = self.data_rate.max(VHT_SINGLE_STREAM_RATE);
        }

        Ok(())
    }

    fn parse_vendor(&mut self, raw: &[u8], data: &[u8]) {
        if data.len() >= 3 && data[..3] == OUI_SAE_DEFAULT_GROUP {
            self.force_default_sae_group = true;
            return;
        }
        let vendor = match VendorIe::parse(data) {
            Some(v) => v,
            None => return,
        };
        match (vendor.oui, vendor.vendor_type) {
            (OUI_MICROSOFT, OUI_MICROSOFT_WPA) => {
                if self.wpa.is_none() {
                    self.wpa = Some(raw.to_vec());
                }
            }
            (OUI_MICROSOFT, OUI_MICROSOFT_WSC) => {
                if self.wsc.is_none() {
                    self.wsc = Some(vendor.payload.to_vec());
                }
            }
            (OUI_MICROSOFT, OUI_MICROSOFT_NETWORK_COST) => {
                if let Some((level, flags)) =
                    parse_network_cost(vendor.payload)
                {
                    self.cost_level = level;
                    self.cost_flags = flags;
                }
            }
            (OUI_WFA, OUI_WFA_OSEN) => {
                if self.osen.is_none() {
                    self.osen = Some(raw.to_vec());
                }
            }
            (OUI_WFA, OUI_WFA_HS20_INDICATION) => {
                let (version, dgaf_disable) =
                    parse_hs20_indication(vendor.payload);
                self.hs20_capable = true;
                self.hs20_version = version;
                self.hs20_dgaf_disable = dgaf_disable;
            }
            (OUI_WFA, OUI_WFA_OWE_TRANSITION) => {
                if self.owe_trans.is_none() {
                    self.owe_trans = parse_owe_transition(vendor.payload);
                }
            }
            (OUI_WFA, OUI_WFA_DPP_CONFIGURATOR) => {
                self.dpp_configurator = true;
            }
            (OUI_WFA, OUI_WFA_WFD) => {
                if self.wfd.is_none() {
                    self.wfd = Some(raw.to_vec());
                }
            }
            _ => (),
        }
    }

    /// Decode the RSN element captured during the scan.
    pub fn rsn_info(&self) -> Result<RsnInfo, DecodeError> {
        match self.rsne.as_deref() {
            Some(rsne) => RsnInfo::parse(&rsne[2..]),
            None => Err("BSS carries no RSN element".into()),
        }
    }

    /// An SSID that is absent or consists only of NUL bytes marks a
    /// hidden network.
    pub fn is_hidden(&self) -> bool {
        self.ssid.iter().all(|b| *b == 0)
    }
}
