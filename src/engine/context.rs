// SPDX-License-Identifier: MIT

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use crate::{
    engine::request::{PeriodicScanHandler, ScanRequest},
    CommandId, RadioHandle, ScanFreqSet,
};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ScanState {
    #[default]
    NotRunning,
    Passive,
    Active,
}

/// Who the reply of the outstanding GET_SCAN dump belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DumpTarget {
    /// The local request with this work id.
    Request(u32),
    /// An externally triggered scan being dumped for the periodic
    /// consumer.
    Periodic,
}

#[derive(Default)]
pub(crate) struct PeriodicState {
    /// Current back-off interval in seconds.
    pub(crate) interval: u16,
    /// Boottime deadline of the rearm timer, microseconds.
    pub(crate) deadline_us: Option<u64>,
    pub(crate) handler: Option<Box<dyn PeriodicScanHandler>>,
    /// Work id of the in-flight periodic request.
    pub(crate) request_id: Option<u32>,
    /// Hidden SSIDs showed up in the last results; the next periodic
    /// scan should probe actively.
    pub(crate) needs_active_scan: bool,
    /// The handler is temporarily out of the context for a callback.
    pub(crate) in_callback: bool,
    /// `periodic_stop` ran from inside the callback; drop the handler
    /// instead of putting it back.
    pub(crate) stop_pending: bool,
}

impl PeriodicState {
    pub(crate) fn is_started(&self) -> bool {
        self.handler.is_some()
    }
}

/// Per-device scan state. Owned by the engine, owns its requests.
pub(crate) struct ScanContext {
    pub(crate) device: u64,
    pub(crate) radio: RadioHandle,
    pub(crate) state: ScanState,
    /// Pending requests, head is the one executing.
    pub(crate) requests: VecDeque<Rc<RefCell<ScanRequest>>>,
    pub(crate) periodic: PeriodicState,
    pub(crate) trigger_cmd: Option<CommandId>,
    pub(crate) get_scan_cmd: Option<CommandId>,
    pub(crate) fw_scan_cmd: Option<CommandId>,
    pub(crate) fw_handler: Option<Box<dyn crate::ScanHandler>>,
    pub(crate) dump_target: Option<DumpTarget>,
    /// Boottime microseconds when the running dump was started.
    pub(crate) dump_start_us: u64,
    /// Same, for the firmware scan dump.
    pub(crate) fw_dump_start_us: u64,
    /// Frequencies reported by the most recent scan-done event.
    pub(crate) latest_freqs: ScanFreqSet,
}

impl ScanContext {
    pub(crate) fn new(device: u64, radio: RadioHandle) -> Self {
        Self {
            device,
            radio,
            state: ScanState::NotRunning,
            requests: VecDeque::new(),
            periodic: PeriodicState::default(),
            trigger_cmd: None,
            get_scan_cmd: None,
            fw_scan_cmd: None,
            fw_handler: None,
            dump_target: None,
            dump_start_us: 0,
            fw_dump_start_us: 0,
            latest_freqs: ScanFreqSet::new(),
        }
    }

    pub(crate) fn find_request(
        &self,
        id: u32,
    ) -> Option<Rc<RefCell<ScanRequest>>> {
        self.requests
            .iter()
            .find(|req| req.borrow().id == id)
            .cloned()
    }

    pub(crate) fn head_request(&self) -> Option<Rc<RefCell<ScanRequest>>> {
        self.requests.front().cloned()
    }

    pub(crate) fn unlink_request(&mut self, id: u32) {
        self.requests.retain(|req| req.borrow().id != id);
    }
}
