// SPDX-License-Identifier: MIT

use netlink_packet_core::DecodeError;

use crate::bytes::parse_u16_le;

// Element IDs defined in IEEE 802.11-2020, 9.4.2
pub(crate) const ELEMENT_ID_SSID: u8 = 0;
pub(crate) const ELEMENT_ID_SUPPORTED_RATES: u8 = 1;
pub(crate) const ELEMENT_ID_COUNTRY: u8 = 7;
pub(crate) const ELEMENT_ID_BSS_LOAD: u8 = 11;
pub(crate) const ELEMENT_ID_HT_CAPABILITIES: u8 = 45;
pub(crate) const ELEMENT_ID_RSN: u8 = 48;
pub(crate) const ELEMENT_ID_EXT_SUPPORTED_RATES: u8 = 50;
pub(crate) const ELEMENT_ID_MOBILITY_DOMAIN: u8 = 54;
pub(crate) const ELEMENT_ID_RM_ENABLED_CAPABILITIES: u8 = 70;
pub(crate) const ELEMENT_ID_INTERWORKING: u8 = 107;
pub(crate) const ELEMENT_ID_ADVERTISEMENT_PROTOCOL: u8 = 108;
pub(crate) const ELEMENT_ID_ROAMING_CONSORTIUM: u8 = 111;
pub(crate) const ELEMENT_ID_EXTENDED_CAPABILITIES: u8 = 127;
pub(crate) const ELEMENT_ID_VHT_CAPABILITIES: u8 = 191;
pub(crate) const ELEMENT_ID_VENDOR: u8 = 221;
pub(crate) const ELEMENT_ID_RSNX: u8 = 244;

pub(crate) const OUI_MICROSOFT: [u8; 3] = [0x00, 0x50, 0xf2];
pub(crate) const OUI_MICROSOFT_WPA: u8 = 1;
pub(crate) const OUI_MICROSOFT_WSC: u8 = 4;
pub(crate) const OUI_MICROSOFT_NETWORK_COST: u8 = 0x11;

pub(crate) const OUI_WFA: [u8; 3] = [0x50, 0x6f, 0x9a];
pub(crate) const OUI_WFA_WFD: u8 = 0x0a;
pub(crate) const OUI_WFA_HS20_INDICATION: u8 = 0x10;
pub(crate) const OUI_WFA_OSEN: u8 = 0x12;
pub(crate) const OUI_WFA_OWE_TRANSITION: u8 = 0x1c;
pub(crate) const OUI_WFA_DPP_CONFIGURATOR: u8 = 0x1e;

// APs carrying this OUI only complete SAE when the default group is used.
pub(crate) const OUI_SAE_DEFAULT_GROUP: [u8; 3] = [0xf4, 0xf5, 0xe8];

/// One raw element of an IE TLV stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Element<'a> {
    pub id: u8,
    /// Value bytes, header excluded.
    pub data: &'a [u8],
    /// The full element including its 2-byte header.
    pub raw: &'a [u8],
}

/// Iterator over an IE TLV stream. Iteration stops at the first element
/// whose length field overruns the buffer.
#[derive(Debug, Clone)]
pub struct ElementIter<'a> {
    buf: &'a [u8],
    offset: usize,
}

impl<'a> ElementIter<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, offset: 0 }
    }
}

impl<'a> Iterator for ElementIter<'a> {
    type Item = Element<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset + 1 >= self.buf.len() {
            return None;
        }
        let id = self.buf[self.offset];
        let length = self.buf[self.offset + 1] as usize + 2;
        if self.buf.len() < self.offset + length {
            return None;
        }
        let raw = &self.buf[self.offset..self.offset + length];
        self.offset += length;
        Some(Element {
            id,
            data: &raw[2..],
            raw,
        })
    }
}

/// A vendor-specific element split into its OUI, vendor type and
/// remaining payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct VendorIe<'a> {
    pub oui: [u8; 3],
    pub vendor_type: u8,
    pub payload: &'a [u8],
}

impl<'a> VendorIe<'a> {
    pub(crate) fn parse(data: &'a [u8]) -> Option<Self> {
        if data.len() < 4 {
            return None;
        }
        Some(Self {
            oui: [data[0], data[1], data[2]],
            vendor_type: data[3],
            payload: &data[4..],
        })
    }
}

/// BSS Load element (IEEE 802.11-2020, 9.4.2.27): station count,
/// channel utilization, admission capacity.
pub(crate) fn parse_bss_load(data: &[u8]) -> Result<u8, DecodeError> {
    if data.len() != 5 {
        return Err(format!(
            "Invalid length of BSS Load element {data:?}"
        )
        .into());
    }
    Ok(data[2])
}

/// Hotspot 2.0 Indication: version in the high nibble, downstream
/// group-addressed forwarding disable in bit 0.
pub(crate) fn parse_hs20_indication(payload: &[u8]) -> (u8, bool) {
    match payload.first() {
        Some(b) => ((b >> 4) & 0x0f, b & 0x01 != 0),
        None => (0, false),
    }
}

/// OWE Transition Mode element payload (WFA OWE spec 2.3.1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OweTransition {
    pub bssid: [u8; 6],
    pub ssid: Vec<u8>,
    pub oper_class: Option<u8>,
    pub channel: Option<u8>,
}

pub(crate) fn parse_owe_transition(payload: &[u8]) -> Option<OweTransition> {
    if payload.len() < 7 {
        return None;
    }
    let mut bssid = [0u8; 6];
    bssid.copy_from_slice(&payload[..6]);
    let ssid_len = payload[6] as usize;
    if ssid_len > 32 || payload.len() < 7 + ssid_len {
        return None;
    }
    let ssid = payload[7..7 + ssid_len].to_vec();
    let rest = &payload[7 + ssid_len..];
    let (oper_class, channel) = if rest.len() >= 2 {
        (Some(rest[0]), Some(rest[1]))
    } else {
        (None, None)
    };
    Some(OweTransition {
        bssid,
        ssid,
        oper_class,
        channel,
    })
}

/// Microsoft network-cost element: cost level and flags, both LE16.
pub(crate) fn parse_network_cost(payload: &[u8]) -> Option<(u8, u8)> {
    let level = parse_u16_le(payload)?;
    let flags = parse_u16_le(payload.get(2..)?)?;
    Some((level as u8, flags as u8))
}

const ADVERTISEMENT_PROTOCOL_ANQP: u8 = 0;
const ADVERTISEMENT_PROTOCOL_MIH_INFORMATION: u8 = 1;
const ADVERTISEMENT_PROTOCOL_MIH_COMMAND: u8 = 2;
const ADVERTISEMENT_PROTOCOL_EAS: u8 = 3;

/// Walk the Advertisement Protocol tuples looking for ANQP support. An
/// unknown protocol id terminates the walk.
pub(crate) fn advertisement_protocol_anqp(data: &[u8]) -> bool {
    for tuple in data.chunks_exact(2) {
        match tuple[1] {
            ADVERTISEMENT_PROTOCOL_ANQP => return true,
            ADVERTISEMENT_PROTOCOL_MIH_INFORMATION
            | ADVERTISEMENT_PROTOCOL_MIH_COMMAND
            | ADVERTISEMENT_PROTOCOL_EAS => (),
            _ => return false,
        }
    }
    false
}

const IEEE_80211_OUI: u32 = 0x00ac0f00;
const CIPHER_USE_GROUP: u32 = IEEE_80211_OUI;
const CIPHER_WEP_40: u32 = IEEE_80211_OUI | 1 << 24;
const CIPHER_TKIP: u32 = IEEE_80211_OUI | 2 << 24;
const CIPHER_CCMP_128: u32 = IEEE_80211_OUI | 4 << 24;
const CIPHER_WEP_104: u32 = IEEE_80211_OUI | 5 << 24;
const CIPHER_BIP_CMAC_128: u32 = IEEE_80211_OUI | 6 << 24;
const CIPHER_GCMP_128: u32 = IEEE_80211_OUI | 8 << 24;
const CIPHER_GCMP_256: u32 = IEEE_80211_OUI | 9 << 24;
const CIPHER_CCMP_256: u32 = IEEE_80211_OUI | 10 << 24;
const CIPHER_BIP_GMAC_128: u32 = IEEE_80211_OUI | 11 << 24;
const CIPHER_BIP_GMAC_256: u32 = IEEE_80211_OUI | 12 << 24;
const CIPHER_BIP_CMAC_256: u32 = IEEE_80211_OUI | 13 << 24;

#[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
#[non_exhaustive]
pub enum CipherSuite {
    UseGroup,
    Wep40,
    Tkip,
    #[default]
    Ccmp128,
    Wep104,
    BipCmac128,
    Gcmp128,
    Gcmp256,
    Ccmp256,
    BipGmac128,
    BipGmac256,
    BipCmac256,
    Other(u32),
}

impl From<u32> for CipherSuite {
    fn from(d: u32) -> Self {
        match d {
            CIPHER_USE_GROUP => Self::UseGroup,
            CIPHER_WEP_40 => Self::Wep40,
            CIPHER_TKIP => Self::Tkip,
            CIPHER_CCMP_128 => Self::Ccmp128,
            CIPHER_WEP_104 => Self::Wep104,
            CIPHER_BIP_CMAC_128 => Self::BipCmac128,
            CIPHER_GCMP_128 => Self::Gcmp128,
            CIPHER_GCMP_256 => Self::Gcmp256,
            CIPHER_CCMP_256 => Self::Ccmp256,
            CIPHER_BIP_GMAC_128 => Self::BipGmac128,
            CIPHER_BIP_GMAC_256 => Self::BipGmac256,
            CIPHER_BIP_CMAC_256 => Self::BipCmac256,
            _ => Self::Other(d),
        }
    }
}

impl CipherSuite {
    pub const LENGTH: usize = 4;

    fn parse(payload: &[u8]) -> Result<Self, DecodeError> {
        if payload.len() < Self::LENGTH {
            Err(format!(
                "Invalid buffer length for CipherSuite, \
                expecting 4, but got {payload:?}"
            )
            .into())
        } else {
            Ok(u32::from_le_bytes([
                payload[0], payload[1], payload[2], payload[3],
            ])
            .into())
        }
    }
}

const AKM_1X: u32 = IEEE_80211_OUI | 1 << 24;
const AKM_PSK: u32 = IEEE_80211_OUI | 2 << 24;
const AKM_FT_1X: u32 = IEEE_80211_OUI | 3 << 24;
const AKM_FT_PSK: u32 = IEEE_80211_OUI | 4 << 24;
const AKM_1X_SHA256: u32 = IEEE_80211_OUI | 5 << 24;
const AKM_PSK_SHA256: u32 = IEEE_80211_OUI | 6 << 24;
const AKM_SAE: u32 = IEEE_80211_OUI | 8 << 24;
const AKM_FT_SAE: u32 = IEEE_80211_OUI | 9 << 24;
const AKM_OWE: u32 = IEEE_80211_OUI | 18 << 24;
const AKM_SAE_GROUP_HASH: u32 = IEEE_80211_OUI | 24 << 24;
const AKM_FT_SAE_GROUP_HASH: u32 = IEEE_80211_OUI | 25 << 24;

/// Authentication Key Management Suite
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[non_exhaustive]
pub enum AkmSuite {
    Ieee8021x,
    Psk,
    FtIeee8021x,
    FtPsk,
    Ieee8021xSha256,
    PskSha256,
    Sae,
    FtSae,
    Owe,
    SaeGroupDependentHash,
    FtSaeGroupDependentHash,
    Other(u32),
}

impl From<u32> for AkmSuite {
    fn from(d: u32) -> Self {
        match d {
            AKM_1X => Self::Ieee8021x,
            AKM_PSK => Self::Psk,
            AKM_FT_1X => Self::FtIeee8021x,
            AKM_FT_PSK => Self::FtPsk,
            AKM_1X_SHA256 => Self::Ieee8021xSha256,
            AKM_PSK_SHA256 => Self::PskSha256,
            AKM_SAE => Self::Sae,
            AKM_FT_SAE => Self::FtSae,
            AKM_OWE => Self::Owe,
            AKM_SAE_GROUP_HASH => Self::SaeGroupDependentHash,
            AKM_FT_SAE_GROUP_HASH => Self::FtSaeGroupDependentHash,
            _ => Self::Other(d),
        }
    }
}

impl AkmSuite {
    pub const LENGTH: usize = 4;

    fn parse(payload: &[u8]) -> Result<Self, DecodeError> {
        if payload.len() < Self::LENGTH {
            Err(format!(
                "Invalid buffer length for AkmSuite, \
                expecting 4, but got {payload:?}"
            )
            .into())
        } else {
            Ok(u32::from_le_bytes([
                payload[0], payload[1], payload[2], payload[3],
            ])
            .into())
        }
    }
}

bitflags::bitflags! {
    #[derive(Debug, Default, PartialEq, Eq, Clone, Copy)]
    #[non_exhaustive]
    pub struct RsnCapabilities: u16 {
        const PreAuth = 1 << 0;
        const NoPairwise = 1 << 1;
        /// Management frame protection required.
        const Mfpr = 1 << 6;
        /// Management frame protection capable.
        const Mfpc = 1 << 7;
        const SppAMsduCapable = 1 << 10;
        const SppAMsduRequired = 1 << 11;
        const Ocvc = 1 << 14;
        const _ = !0;
    }
}

/// The decoded prefix of a Robust Security Network element. Every field
/// after the version is optional; a truncated element yields whatever
/// was present.
#[derive(Debug, PartialEq, Eq, Clone, Default)]
pub struct RsnInfo {
    pub version: u16,
    pub group_cipher: Option<CipherSuite>,
    pub pairwise_ciphers: Vec<CipherSuite>,
    pub akm_suites: Vec<AkmSuite>,
    pub capabilities: Option<RsnCapabilities>,
    pub group_mgmt_cipher: Option<CipherSuite>,
}

impl RsnInfo {
    /// Parse an RSN element value (header excluded).
    pub fn parse(payload: &[u8]) -> Result<Self, DecodeError> {
        if payload.len() != 2 && payload.len() < 8 {
            return Err(format!(
                "Invalid buffer length of RSN element, \
                expecting 2 or bigger than 7, but got {payload:?}"
            )
            .into());
        }
        let mut ret = Self {
            version: u16::from_le_bytes([payload[0], payload[1]]),
            ..Default::default()
        };

        let mut offset = 2;

        if offset + CipherSuite::LENGTH > payload.len() {
            return Ok(ret);
        }
        ret.group_cipher = Some(CipherSuite::parse(
            &payload[offset..offset + CipherSuite::LENGTH],
        )?);
        offset += CipherSuite::LENGTH;

        let pairwise_count = match parse_u16_le(&payload[offset..]) {
            Some(d) => d as usize,
            None => return Ok(ret),
        };
        offset += 2;
        for _ in 0..pairwise_count {
            if offset + CipherSuite::LENGTH > payload.len() {
                return Ok(ret);
            }
            ret.pairwise_ciphers.push(CipherSuite::parse(
                &payload[offset..offset + CipherSuite::LENGTH],
            )?);
            offset += CipherSuite::LENGTH;
        }

        let akm_count = match parse_u16_le(&payload[offset..]) {
            Some(d) => d as usize,
            None => return Ok(ret),
        };
        offset += 2;
        for _ in 0..akm_count {
            if offset + AkmSuite::LENGTH > payload.len() {
                return Ok(ret);
            }
            ret.akm_suites.push(AkmSuite::parse(
                &payload[offset..offset + AkmSuite::LENGTH],
            )?);
            offset += AkmSuite::LENGTH;
        }

        ret.capabilities = match parse_u16_le(&payload[offset..]) {
            Some(d) => Some(RsnCapabilities::from_bits_retain(d)),
            None => return Ok(ret),
        };
        offset += 2;

        let pmkid_count = match parse_u16_le(&payload[offset..]) {
            Some(d) => d as usize,
            None => return Ok(ret),
        };
        offset += 2 + pmkid_count * 16;

        if offset + CipherSuite::LENGTH > payload.len() {
            return Ok(ret);
        }
        ret.group_mgmt_cipher = Some(CipherSuite::parse(
            &payload[offset..offset + CipherSuite::LENGTH],
        )?);

        Ok(ret)
    }
}
