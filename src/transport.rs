// SPDX-License-Identifier: MIT

use std::time::Instant;

use crate::ScanMessage;

/// Identifier of one in-flight transport command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CommandId(pub u64);

/// Terminal outcome of a submitted command, fed back into
/// [`crate::ScanEngine::handle_reply`].
#[derive(Debug, Clone)]
pub enum CommandReply {
    /// Acknowledged. Dump commands carry their reply messages; plain
    /// commands an empty list.
    Done(Vec<ScanMessage>),
    /// The kernel replied with a negative errno.
    Errno(i32),
}

/// The generic-netlink seam. The engine submits typed commands and gets
/// back a command id; replies and multicast events are pushed into the
/// engine by whoever drives the transport. Submission must not block.
pub trait ScanTransport {
    fn submit(&self, msg: ScanMessage, dump: bool) -> CommandId;

    /// Forget an in-flight command: its eventual reply must not be
    /// delivered. The kernel side cannot be aborted mid-dump, so this
    /// only drops the reply.
    fn cancel(&self, id: CommandId);
}

/// Monotonic time source, microsecond resolution. Injected so the
/// periodic-scan timers and result timestamps are testable.
pub trait Clock {
    fn now_us(&self) -> u64;
}

/// [`Clock`] backed by [`std::time::Instant`], anchored at creation.
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    epoch: Instant,
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }
}

impl Clock for MonotonicClock {
    fn now_us(&self) -> u64 {
        self.epoch.elapsed().as_micros() as u64
    }
}
