// SPDX-License-Identifier: MIT

mod attr;
mod bss;
mod builder;
mod command;
mod config;
mod connection;
mod element;
mod engine;
mod error;
mod freq_set;
mod handle;
mod macros;
mod message;
mod radio;
mod rank;
mod transport;

pub(crate) mod bytes;

pub use self::attr::{Nl80211Attr, Nl80211ScanFlags, ScanSuppRates};
pub use self::bss::{
    BssCapability, BssRecord, Nl80211BssAttr, SourceFrame, SSID_MAX_SIZE,
    UTILIZATION_UNKNOWN,
};
pub use self::builder::{HiddenSsidSource, ScanParameters};
pub use self::command::Nl80211Command;
#[cfg(feature = "tokio_socket")]
pub use self::connection::new_connection;
#[cfg(any(feature = "tokio_socket", feature = "smol_socket"))]
pub use self::connection::NetlinkTransport;
pub use self::connection::{
    add_scan_membership, new_connection_with_socket,
    resolve_scan_multicast_group, ScanEventStream,
};
pub use self::config::ScanConfig;
pub use self::element::{
    AkmSuite, CipherSuite, Element, ElementIter, OweTransition,
    RsnCapabilities, RsnInfo,
};
pub use self::engine::{
    PeriodicScanHandler, ScanEngine, ScanHandler, ScanId, ScanResults,
};
pub use self::error::ScanError;
pub use self::freq_set::ScanFreqSet;
pub use self::handle::ScanNetlinkHandle;
pub use self::message::ScanMessage;
pub use self::radio::{
    Radio, RadioCapabilities, RadioHandle, RadioWorkQueue, WorkItem,
    WORK_PRIORITY_OFFCHANNEL, WORK_PRIORITY_SCAN,
};
pub use self::rank::{compute_rank, rank_compare};
pub use self::transport::{
    Clock, CommandId, CommandReply, MonotonicClock, ScanTransport,
};

#[cfg(test)]
pub(crate) mod tests;
