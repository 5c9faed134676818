// SPDX-License-Identifier: MIT

use futures::{Stream, StreamExt};
use genetlink::GenetlinkHandle;
use netlink_packet_core::{
    NetlinkMessage, NetlinkPayload, NLM_F_ACK, NLM_F_DUMP, NLM_F_REQUEST,
};
use netlink_packet_generic::GenlMessage;
use netlink_packet_core::DecodeError;

use crate::{CommandReply, ScanError, ScanMessage};

const EIO: i32 = 5;

/// Thin wrapper over the genetlink handle, typed to the scan engine's
/// message set.
#[derive(Clone, Debug)]
pub struct ScanNetlinkHandle {
    pub handle: GenetlinkHandle,
}

impl ScanNetlinkHandle {
    pub(crate) fn new(handle: GenetlinkHandle) -> Self {
        ScanNetlinkHandle { handle }
    }

    pub async fn request(
        &mut self,
        message: NetlinkMessage<GenlMessage<ScanMessage>>,
    ) -> Result<
        impl Stream<
            Item = Result<
                NetlinkMessage<GenlMessage<ScanMessage>>,
                DecodeError,
            >,
        >,
        ScanError,
    > {
        self.handle.request(message).await.map_err(|e| {
            ScanError::RequestFailed(format!("BUG: Request failed with {e}"))
        })
    }
}

/// Run one command to completion and fold the reply stream into a
/// [`CommandReply`]: an errno for kernel rejections, the collected
/// messages otherwise.
#[cfg(any(feature = "tokio_socket", feature = "smol_socket"))]
pub(crate) async fn scan_execute(
    handle: &mut ScanNetlinkHandle,
    msg: ScanMessage,
    dump: bool,
) -> CommandReply {
    let mut nl_msg = NetlinkMessage::from(GenlMessage::from_payload(msg));
    nl_msg.header.flags = if dump {
        NLM_F_REQUEST | NLM_F_DUMP
    } else {
        NLM_F_REQUEST | NLM_F_ACK
    };

    let mut response = match handle.request(nl_msg).await {
        Ok(response) => response,
        Err(e) => {
            log::warn!("Netlink request failed: {e}");
            return CommandReply::Errno(-EIO);
        }
    };

    let mut msgs: Vec<ScanMessage> = Vec::new();
    while let Some(result) = response.next().await {
        match result {
            Ok(packet) => match packet.payload {
                NetlinkPayload::InnerMessage(genl) => {
                    msgs.push(genl.payload);
                }
                NetlinkPayload::Error(err) => {
                    return match err.code {
                        Some(code) => CommandReply::Errno(code.get()),
                        None => CommandReply::Done(msgs),
                    };
                }
                NetlinkPayload::Done(_) => break,
                _ => (),
            },
            Err(e) => {
                log::warn!("Failed to decode netlink reply: {e}");
            }
        }
    }
    CommandReply::Done(msgs)
}
