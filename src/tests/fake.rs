// SPDX-License-Identifier: MIT

//! In-memory stand-ins for the transport and the clock, plus handlers
//! that record every callback, so the engine can be driven
//! deterministically.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::{
    Clock, CommandId, PeriodicScanHandler, ScanError, ScanHandler,
    ScanMessage, ScanResults, ScanTransport,
};

#[derive(Debug, Clone)]
pub(crate) struct SubmittedCommand {
    pub(crate) id: CommandId,
    pub(crate) msg: ScanMessage,
    pub(crate) dump: bool,
}

/// Records submissions and cancellations; the test plays the kernel by
/// feeding replies back through `ScanEngine::handle_reply`.
#[derive(Debug, Default)]
pub(crate) struct FakeTransport {
    next_id: Cell<u64>,
    pub(crate) submitted: RefCell<Vec<SubmittedCommand>>,
    pub(crate) canceled: RefCell<Vec<CommandId>>,
}

impl FakeTransport {
    pub(crate) fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    pub(crate) fn submissions(&self) -> Vec<SubmittedCommand> {
        self.submitted.borrow().clone()
    }

    pub(crate) fn last(&self) -> SubmittedCommand {
        self.submitted.borrow().last().expect("no commands").clone()
    }

    pub(crate) fn was_canceled(&self, id: CommandId) -> bool {
        self.canceled.borrow().contains(&id)
    }
}

impl ScanTransport for FakeTransport {
    fn submit(&self, msg: ScanMessage, dump: bool) -> CommandId {
        let id = CommandId(self.next_id.get() + 1);
        self.next_id.set(id.0);
        self.submitted
            .borrow_mut()
            .push(SubmittedCommand { id, msg, dump });
        id
    }

    fn cancel(&self, id: CommandId) {
        self.canceled.borrow_mut().push(id);
    }
}

#[derive(Debug, Default)]
pub(crate) struct FakeClock {
    now_us: Cell<u64>,
}

impl FakeClock {
    pub(crate) fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    pub(crate) fn advance(&self, us: u64) {
        self.now_us.set(self.now_us.get() + us);
    }
}

impl Clock for FakeClock {
    fn now_us(&self) -> u64 {
        self.now_us.get()
    }
}

/// Everything a scan handler observed, shared with the test body.
#[derive(Default)]
pub(crate) struct HandlerLog {
    pub(crate) triggered: u32,
    pub(crate) results: Vec<ScanResults>,
    pub(crate) errors: Vec<ScanError>,
    pub(crate) destroyed: u32,
    /// Completion order marker, appended on every on_finished.
    pub(crate) finish_order: Vec<u32>,
}

pub(crate) struct RecordingHandler {
    log: Rc<RefCell<HandlerLog>>,
    marker: u32,
}

impl RecordingHandler {
    pub(crate) fn new(log: &Rc<RefCell<HandlerLog>>) -> Box<Self> {
        Self::with_marker(log, 0)
    }

    pub(crate) fn with_marker(
        log: &Rc<RefCell<HandlerLog>>,
        marker: u32,
    ) -> Box<Self> {
        Box::new(Self {
            log: log.clone(),
            marker,
        })
    }
}

impl ScanHandler for RecordingHandler {
    fn on_triggered(&mut self) {
        self.log.borrow_mut().triggered += 1;
    }

    fn on_finished(&mut self, result: Result<ScanResults, ScanError>) {
        let mut log = self.log.borrow_mut();
        log.finish_order.push(self.marker);
        match result {
            Ok(results) => log.results.push(results),
            Err(e) => log.errors.push(e),
        }
    }
}

impl Drop for RecordingHandler {
    fn drop(&mut self) {
        self.log.borrow_mut().destroyed += 1;
    }
}

#[derive(Default)]
pub(crate) struct PeriodicLog {
    pub(crate) triggers: u32,
    pub(crate) results: Vec<ScanResults>,
    /// Clock reading at each on_results delivery.
    pub(crate) completion_times_us: Vec<u64>,
    pub(crate) destroyed: u32,
}

pub(crate) struct RecordingPeriodicHandler {
    log: Rc<RefCell<PeriodicLog>>,
    clock: Rc<FakeClock>,
}

impl RecordingPeriodicHandler {
    pub(crate) fn new(
        log: &Rc<RefCell<PeriodicLog>>,
        clock: &Rc<FakeClock>,
    ) -> Box<Self> {
        Box::new(Self {
            log: log.clone(),
            clock: clock.clone(),
        })
    }
}

impl PeriodicScanHandler for RecordingPeriodicHandler {
    fn on_trigger(&mut self) {
        self.log.borrow_mut().triggers += 1;
    }

    fn on_results(&mut self, results: ScanResults) {
        let now = self.clock.now_us();
        let mut log = self.log.borrow_mut();
        log.completion_times_us.push(now);
        log.results.push(results);
    }
}

impl Drop for RecordingPeriodicHandler {
    fn drop(&mut self) {
        self.log.borrow_mut().destroyed += 1;
    }
}
