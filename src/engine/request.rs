// SPDX-License-Identifier: MIT

use std::collections::VecDeque;

use crate::{BssRecord, ScanError, ScanFreqSet, ScanMessage};

/// What a finished scan hands to its owner. The engine gives up
/// ownership of the records here; drop what you do not keep.
#[derive(Debug)]
pub struct ScanResults {
    pub device: u64,
    /// Discovered BSSes, best rank first.
    pub bss_list: Vec<BssRecord>,
    /// The frequencies the scan covered.
    pub frequencies: ScanFreqSet,
}

/// Owner callbacks of one scan request. Dropping the handler is the
/// destruction notification; it happens exactly once per request, no
/// later than context teardown.
pub trait ScanHandler {
    /// The driver accepted the scan. Fired at most once per request,
    /// on the first fragment.
    fn on_triggered(&mut self) {}

    /// Terminal outcome of the scan. Fired at most once; a canceled
    /// request is dropped without it.
    fn on_finished(&mut self, result: Result<ScanResults, ScanError>);
}

/// Consumer of the recurring background scan. Unlike [`ScanHandler`]
/// this outlives individual requests.
pub trait PeriodicScanHandler {
    fn on_trigger(&mut self) {}

    fn on_results(&mut self, results: ScanResults) {}
}

/// One logical scan owned by a scan context. `id` doubles as the radio
/// work item id and the caller-visible scan id.
pub(crate) struct ScanRequest {
    pub(crate) id: u32,
    pub(crate) handler: Option<Box<dyn ScanHandler>>,
    pub(crate) canceled: bool,
    pub(crate) passive: bool,
    pub(crate) periodic: bool,
    /// The first TRIGGER_SCAN of this request was sent and acked.
    pub(crate) started: bool,
    /// The current fragment was acked and its scan is running.
    pub(crate) triggered: bool,
    pub(crate) trigger_fired: bool,
    pub(crate) in_callback: bool,
    /// Prepared TRIGGER_SCAN commands still to send.
    pub(crate) commands: VecDeque<ScanMessage>,
    /// Scan start TSF reported by the driver for the latest accepted
    /// fragment, microseconds.
    pub(crate) start_time_tsf: u64,
}

impl ScanRequest {
    pub(crate) fn new(
        id: u32,
        passive: bool,
        periodic: bool,
        commands: VecDeque<ScanMessage>,
        handler: Option<Box<dyn ScanHandler>>,
    ) -> Self {
        Self {
            id,
            handler,
            canceled: false,
            passive,
            periodic,
            started: false,
            triggered: false,
            trigger_fired: false,
            in_callback: false,
            commands,
            start_time_tsf: 0,
        }
    }
}
