// SPDX-License-Identifier: MIT

#[cfg(any(feature = "tokio_socket", feature = "smol_socket"))]
use std::cell::{Cell, RefCell};
#[cfg(any(feature = "tokio_socket", feature = "smol_socket"))]
use std::collections::HashSet;
use std::io;
#[cfg(any(feature = "tokio_socket", feature = "smol_socket"))]
use std::rc::Rc;

#[cfg(any(feature = "tokio_socket", feature = "smol_socket"))]
use futures::channel::mpsc::{unbounded, UnboundedSender};
use futures::channel::mpsc::UnboundedReceiver;
use futures::StreamExt;
use genetlink::message::RawGenlMessage;
use netlink_packet_core::{
    NetlinkMessage, NetlinkPayload, NLM_F_ACK, NLM_F_REQUEST,
};
use netlink_packet_generic::{
    ctrl::{
        nlas::{GenlCtrlAttrs, McastGrpAttrs},
        GenlCtrl, GenlCtrlCmd,
    },
    GenlMessage,
};
use netlink_packet_core::DecodeError;
use netlink_proto::Connection;
use netlink_sys::{AsyncSocket, SocketAddr};

#[cfg(any(feature = "tokio_socket", feature = "smol_socket"))]
use crate::{handle::scan_execute, CommandId, CommandReply, ScanTransport};
use crate::{ScanMessage, ScanNetlinkHandle};

const NL80211_MULTICAST_GROUP_SCAN: &str = "scan";

#[cfg(feature = "tokio_socket")]
pub fn new_connection() -> io::Result<(
    Connection<RawGenlMessage>,
    ScanNetlinkHandle,
    ScanEventStream,
)> {
    new_connection_with_socket()
}

pub fn new_connection_with_socket<S>() -> io::Result<(
    Connection<RawGenlMessage, S>,
    ScanNetlinkHandle,
    ScanEventStream,
)>
where
    S: AsyncSocket + Unpin,
{
    let (connection, handle, messages) =
        genetlink::new_connection_with_socket()?;
    Ok((
        connection,
        ScanNetlinkHandle::new(handle),
        ScanEventStream { messages },
    ))
}

/// Resolve the id of nl80211's `scan` multicast group so the
/// connection's socket can join it (via [`add_scan_membership`]) before
/// the connection is spawned.
pub async fn resolve_scan_multicast_group(
    handle: &mut ScanNetlinkHandle,
) -> Result<u32, crate::ScanError> {
    let genlmsg: GenlMessage<GenlCtrl> = GenlMessage::from_payload(GenlCtrl {
        cmd: GenlCtrlCmd::GetFamily,
        nlas: vec![GenlCtrlAttrs::FamilyName("nl80211".to_string())],
    });
    let mut nl_msg = NetlinkMessage::from(genlmsg);
    nl_msg.header.flags = NLM_F_REQUEST | NLM_F_ACK;

    let mut response = handle.handle.request(nl_msg).await.map_err(|e| {
        crate::ScanError::RequestFailed(format!(
            "Failed to query the nl80211 family: {e}"
        ))
    })?;

    while let Some(result) = response.next().await {
        let packet = match result {
            Ok(packet) => packet,
            Err(e) => return Err(crate::ScanError::DecodeFailed(e)),
        };
        let genl = match packet.payload {
            NetlinkPayload::InnerMessage(genl) => genl,
            _ => continue,
        };
        for nla in genl.payload.nlas {
            let groups = match nla {
                GenlCtrlAttrs::McastGroups(groups) => groups,
                _ => continue,
            };
            for group in groups {
                let mut name = None;
                let mut id = None;
                for attr in group {
                    match attr {
                        McastGrpAttrs::Name(n) => name = Some(n),
                        McastGrpAttrs::Id(d) => id = Some(d),
                        _ => (),
                    }
                }
                if name.as_deref() == Some(NL80211_MULTICAST_GROUP_SCAN) {
                    if let Some(id) = id {
                        return Ok(id);
                    }
                }
            }
        }
    }
    Err(crate::ScanError::RequestFailed(
        "nl80211 scan multicast group not found".to_string(),
    ))
}

/// Join a multicast group on a not-yet-spawned connection, so scan
/// events show up on its unsolicited message channel.
pub fn add_scan_membership<S>(
    connection: &mut Connection<RawGenlMessage, S>,
    group: u32,
) -> io::Result<()>
where
    S: AsyncSocket + Unpin,
{
    connection.socket_mut().socket_mut().add_membership(group)
}

/// The unsolicited message side of the connection: yields the scan
/// multicast events the engine consumes.
pub struct ScanEventStream {
    messages: UnboundedReceiver<(NetlinkMessage<RawGenlMessage>, SocketAddr)>,
}

impl ScanEventStream {
    /// The next decodable nl80211 event. `None` once the connection is
    /// gone.
    pub async fn next_event(&mut self) -> Option<ScanMessage> {
        while let Some((msg, _addr)) = self.messages.next().await {
            match decode_event(&msg) {
                Ok(Some(event)) => return Some(event),
                Ok(None) => (),
                Err(e) => log::warn!("Failed to decode nl80211 event: {e}"),
            }
        }
        None
    }
}

fn decode_event(
    msg: &NetlinkMessage<RawGenlMessage>,
) -> Result<Option<ScanMessage>, DecodeError> {
    let mut buf = vec![0u8; msg.buffer_len()];
    msg.serialize(&mut buf);
    let parsed = NetlinkMessage::<GenlMessage<ScanMessage>>::deserialize(&buf)?;
    match parsed.payload {
        NetlinkPayload::InnerMessage(genl) => Ok(Some(genl.payload)),
        _ => Ok(None),
    }
}

/// [`ScanTransport`] backed by a genetlink connection. Each submission
/// runs as a local task; replies are delivered through the channel
/// handed out by [`NetlinkTransport::new`], to be drained into
/// [`crate::ScanEngine::handle_reply`] by the embedding event loop.
///
/// Everything lives on one thread, matching the engine's cooperative
/// model; spawn inside a `tokio::task::LocalSet` (or the async-std
/// equivalent).
#[cfg(any(feature = "tokio_socket", feature = "smol_socket"))]
pub struct NetlinkTransport {
    handle: ScanNetlinkHandle,
    next_id: Cell<u64>,
    canceled: Rc<RefCell<HashSet<u64>>>,
    reply_tx: UnboundedSender<(CommandId, CommandReply)>,
}

#[cfg(any(feature = "tokio_socket", feature = "smol_socket"))]
impl NetlinkTransport {
    pub fn new(
        handle: ScanNetlinkHandle,
    ) -> (Self, UnboundedReceiver<(CommandId, CommandReply)>) {
        let (reply_tx, reply_rx) = unbounded();
        (
            Self {
                handle,
                next_id: Cell::new(0),
                canceled: Rc::new(RefCell::new(HashSet::new())),
                reply_tx,
            },
            reply_rx,
        )
    }
}

#[cfg(any(feature = "tokio_socket", feature = "smol_socket"))]
impl ScanTransport for NetlinkTransport {
    fn submit(&self, msg: ScanMessage, dump: bool) -> CommandId {
        let id = CommandId(self.next_id.get() + 1);
        self.next_id.set(id.0);

        let mut handle = self.handle.clone();
        let reply_tx = self.reply_tx.clone();
        let canceled = self.canceled.clone();
        let task = async move {
            let reply = scan_execute(&mut handle, msg, dump).await;
            if canceled.borrow_mut().remove(&id.0) {
                return;
            }
            let _ = reply_tx.unbounded_send((id, reply));
        };

        #[cfg(feature = "tokio_socket")]
        let _ = tokio::task::spawn_local(task);
        #[cfg(all(feature = "smol_socket", not(feature = "tokio_socket")))]
        let _ = async_std::task::spawn_local(task);

        id
    }

    fn cancel(&self, id: CommandId) {
        self.canceled.borrow_mut().insert(id.0);
    }
}
