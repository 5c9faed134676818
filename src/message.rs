// SPDX-License-Identifier: MIT

use crate::error::DecodeContext;
use netlink_packet_generic::{GenlFamily, GenlHeader};
use netlink_packet_core::{
    DecodeError, Emitable, NlasIterator, Parseable, ParseableParametrized,
};

use crate::{Nl80211Attr, Nl80211Command};

/// One nl80211 message as the scan engine sees it: a command plus its
/// attribute payload. Used for locally built commands, driver replies
/// and multicast events alike.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct ScanMessage {
    pub cmd: Nl80211Command,
    pub attributes: Vec<Nl80211Attr>,
}

impl GenlFamily for ScanMessage {
    fn family_name() -> &'static str {
        "nl80211"
    }

    fn version(&self) -> u8 {
        1
    }

    fn command(&self) -> u8 {
        self.cmd.into()
    }
}

impl ScanMessage {
    pub fn new(cmd: Nl80211Command, attributes: Vec<Nl80211Attr>) -> Self {
        Self { cmd, attributes }
    }

    pub fn new_trigger_scan(attributes: Vec<Nl80211Attr>) -> Self {
        Self::new(Nl80211Command::TriggerScan, attributes)
    }

    pub fn new_scan_get(attributes: Vec<Nl80211Attr>) -> Self {
        Self::new(Nl80211Command::GetScan, attributes)
    }

    /// The wdev the message applies to, if it carries one.
    pub fn wdev(&self) -> Option<u64> {
        self.attributes.iter().find_map(|attr| match attr {
            Nl80211Attr::Wdev(d) => Some(*d),
            _ => None,
        })
    }
}

impl Emitable for ScanMessage {
    fn buffer_len(&self) -> usize {
        self.attributes.as_slice().buffer_len()
    }

    fn emit(&self, buffer: &mut [u8]) {
        self.attributes.as_slice().emit(buffer)
    }
}

fn parse_nlas(buffer: &[u8]) -> Result<Vec<Nl80211Attr>, DecodeError> {
    let mut nlas = Vec::new();
    for nla in NlasIterator::new(buffer) {
        let error_msg = "Failed to parse nl80211 message attribute".to_string();
        let nla = &nla.context(error_msg.clone())?;
        nlas.push(Nl80211Attr::parse(nla).context(error_msg)?);
    }
    Ok(nlas)
}

impl ParseableParametrized<[u8], GenlHeader> for ScanMessage {
    fn parse_with_param(
        buffer: &[u8],
        header: GenlHeader,
    ) -> Result<Self, DecodeError> {
        Ok(Self {
            cmd: Nl80211Command::from(header.cmd),
            attributes: parse_nlas(buffer)?,
        })
    }
}
