// SPDX-License-Identifier: MIT

mod context;
mod request;

pub use self::request::{PeriodicScanHandler, ScanHandler, ScanResults};

use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;
use std::time::Duration;

use crate::{
    builder::{build_get_scan, build_scan_commands},
    radio::WORK_PRIORITY_SCAN,
    BssRecord, Clock, CommandId, CommandReply, HiddenSsidSource,
    MonotonicClock, Nl80211Attr, Nl80211Command, Nl80211ScanFlags,
    RadioHandle, ScanConfig, ScanError, ScanFreqSet, ScanMessage,
    ScanParameters, ScanTransport,
};

use self::context::{DumpTarget, ScanContext, ScanState};
use self::request::ScanRequest;

/// Caller-visible scan identifier; also the radio work item id.
pub type ScanId = u32;

/// The process-wide scan controller. Owns the per-device contexts,
/// talks to the drivers through the injected transport and is driven by
/// `handle_reply`, `handle_event` and `dispatch_timeouts`.
///
/// Everything runs on one event loop; `ScanEngine` is a cheap clone of
/// a shared handle so callbacks can reenter the API.
#[derive(Clone)]
pub struct ScanEngine {
    inner: Rc<Inner>,
}

struct Inner {
    transport: Rc<dyn ScanTransport>,
    clock: Rc<dyn Clock>,
    config: ScanConfig,
    hidden_networks: RefCell<Option<Rc<dyn HiddenSsidSource>>>,
    contexts: RefCell<HashMap<u64, Rc<RefCell<ScanContext>>>>,
}

impl ScanEngine {
    pub fn new(transport: Rc<dyn ScanTransport>, config: ScanConfig) -> Self {
        Self::with_clock(transport, config, Rc::new(MonotonicClock::default()))
    }

    pub fn with_clock(
        transport: Rc<dyn ScanTransport>,
        config: ScanConfig,
        clock: Rc<dyn Clock>,
    ) -> Self {
        Self {
            inner: Rc::new(Inner {
                transport,
                clock,
                config,
                hidden_networks: RefCell::new(None),
                contexts: RefCell::new(HashMap::new()),
            }),
        }
    }

    /// Wire up the known-networks collaborator that supplies hidden
    /// SSIDs for active scans.
    pub fn set_hidden_ssid_source(&self, source: Rc<dyn HiddenSsidSource>) {
        *self.inner.hidden_networks.borrow_mut() = Some(source);
    }

    fn hidden_ssids(&self) -> Vec<Vec<u8>> {
        self.inner
            .hidden_networks
            .borrow()
            .as_ref()
            .map(|source| source.hidden_ssids())
            .unwrap_or_default()
    }

    fn ctx(&self, device: u64) -> Option<Rc<RefCell<ScanContext>>> {
        self.inner.contexts.borrow().get(&device).cloned()
    }

    /// Register a device. Returns false when the device is already
    /// known.
    pub fn add(&self, device: u64, radio: RadioHandle) -> bool {
        let mut contexts = self.inner.contexts.borrow_mut();
        if contexts.contains_key(&device) {
            return false;
        }
        contexts.insert(
            device,
            Rc::new(RefCell::new(ScanContext::new(device, radio))),
        );
        true
    }

    /// Tear a device down: outstanding commands are cancelled on the
    /// transport and every queued request is destroyed.
    pub fn remove(&self, device: u64) -> bool {
        let ctx_rc =
            match self.inner.contexts.borrow_mut().remove(&device) {
                Some(ctx) => ctx,
                None => return false,
            };

        let (cmds, radio, requests) = {
            let mut ctx = ctx_rc.borrow_mut();
            let mut cmds = Vec::new();
            cmds.extend(ctx.trigger_cmd.take());
            cmds.extend(ctx.get_scan_cmd.take());
            cmds.extend(ctx.fw_scan_cmd.take());
            ctx.dump_target = None;
            ctx.periodic.deadline_us = None;
            let requests: Vec<_> = ctx.requests.drain(..).collect();
            (cmds, ctx.radio.clone(), requests)
        };

        for cmd in cmds {
            self.inner.transport.cancel(cmd);
        }
        for req in &requests {
            let id = req.borrow().id;
            self.release_work(&radio, id);
        }
        // dropping the requests (and the context) runs the handlers'
        // destructors with no engine borrows held
        drop(requests);
        drop(ctx_rc);
        true
    }

    /// Passive scan restricted to `frequencies`.
    pub fn passive(
        &self,
        device: u64,
        frequencies: ScanFreqSet,
        handler: Box<dyn ScanHandler>,
    ) -> Option<ScanId> {
        let params = ScanParameters {
            frequencies: Some(frequencies),
            ..Default::default()
        };
        self.queue_request(device, &params, true, false, Some(handler))
    }

    /// Passive scan with the full parameter set; probe SSIDs are
    /// ignored.
    pub fn passive_full(
        &self,
        device: u64,
        params: &ScanParameters,
        handler: Box<dyn ScanHandler>,
    ) -> Option<ScanId> {
        self.queue_request(device, params, true, false, Some(handler))
    }

    /// Active scan probing known hidden networks plus broadcast, with
    /// `extra_ie` appended to the probe request.
    pub fn active(
        &self,
        device: u64,
        extra_ie: &[u8],
        handler: Box<dyn ScanHandler>,
    ) -> Option<ScanId> {
        let params = ScanParameters {
            extra_ie: extra_ie.to_vec(),
            ..Default::default()
        };
        self.queue_request(device, &params, false, false, Some(handler))
    }

    pub fn active_full(
        &self,
        device: u64,
        params: &ScanParameters,
        handler: Box<dyn ScanHandler>,
    ) -> Option<ScanId> {
        self.queue_request(device, params, false, false, Some(handler))
    }

    /// Direct-probe the alternate (hidden) SSIDs advertised in the OWE
    /// transition elements of `bss_list`, one command per target on its
    /// own channel.
    pub fn owe_hidden(
        &self,
        device: u64,
        bss_list: &[BssRecord],
        handler: Box<dyn ScanHandler>,
    ) -> Option<ScanId> {
        let ctx_rc = self.ctx(device)?;
        let capabilities = {
            let ctx = ctx_rc.borrow();
            let radio = ctx.radio.borrow();
            radio.capabilities.clone()
        };

        let mut commands = VecDeque::new();
        for bss in bss_list {
            let owe = match bss.owe_trans.as_ref() {
                Some(owe) if !owe.ssid.is_empty() => owe,
                _ => continue,
            };
            let params = ScanParameters {
                frequencies: Some([bss.frequency].into_iter().collect()),
                ssid: Some(owe.ssid.clone()),
                ..Default::default()
            };
            commands.extend(build_scan_commands(
                device,
                &params,
                false,
                &[],
                &capabilities,
                &self.inner.config,
            ));
        }
        if commands.is_empty() {
            return None;
        }
        self.enqueue(device, commands, false, false, Some(handler))
    }

    fn queue_request(
        &self,
        device: u64,
        params: &ScanParameters,
        passive: bool,
        periodic: bool,
        handler: Option<Box<dyn ScanHandler>>,
    ) -> Option<ScanId> {
        let ctx_rc = match self.ctx(device) {
            Some(ctx) => ctx,
            None => {
                log::warn!("Scan requested for unknown device {device}");
                return None;
            }
        };
        let hidden = if passive || params.ssid.is_some() {
            Vec::new()
        } else {
            self.hidden_ssids()
        };
        let capabilities =
            ctx_rc.borrow().radio.borrow().capabilities.clone();
        let commands = build_scan_commands(
            device,
            params,
            passive,
            &hidden,
            &capabilities,
            &self.inner.config,
        );
        self.enqueue(device, commands, passive, periodic, handler)
    }

    fn enqueue(
        &self,
        device: u64,
        commands: VecDeque<ScanMessage>,
        passive: bool,
        periodic: bool,
        handler: Option<Box<dyn ScanHandler>>,
    ) -> Option<ScanId> {
        let ctx_rc = self.ctx(device)?;
        let radio = ctx_rc.borrow().radio.clone();
        let (id, is_head) =
            radio.borrow_mut().work.insert(WORK_PRIORITY_SCAN, device);
        let request = Rc::new(RefCell::new(ScanRequest::new(
            id, passive, periodic, commands, handler,
        )));
        ctx_rc.borrow_mut().requests.push_back(request);
        if is_head {
            self.start_work(device, id);
        }
        Some(id)
    }

    /// Send the next prepared command of the request owning `work_id`.
    /// Invoked when the work item reaches the head of the radio queue
    /// and for every retry or follow-up fragment.
    fn start_work(&self, device: u64, work_id: u32) {
        let ctx_rc = match self.ctx(device) {
            Some(ctx) => ctx,
            None => return,
        };
        let msg = {
            let ctx = ctx_rc.borrow();
            let req_rc = match ctx.find_request(work_id) {
                Some(req) => req,
                None => return,
            };
            let req = req_rc.borrow();
            match req.commands.front() {
                Some(msg) => msg.clone(),
                None => return,
            }
        };
        let cmd = self.inner.transport.submit(msg, false);
        ctx_rc.borrow_mut().trigger_cmd = Some(cmd);
    }

    /// Release a radio work slot and kick whatever became the new head.
    fn release_work(&self, radio: &RadioHandle, id: u32) {
        let next = radio.borrow_mut().work.done(id);
        if let Some(item) = next {
            self.start_work(item.device, item.id);
        }
    }

    /// Abandon a request. Never invokes the completion callback
    /// synchronously; if the scan was already triggered the request
    /// stays queued, silently discarding its results, until the driver
    /// reports in.
    pub fn cancel(&self, device: u64, id: ScanId) -> bool {
        let ctx_rc = match self.ctx(device) {
            Some(ctx) => ctx,
            None => return false,
        };
        let req_rc = match ctx_rc.borrow().find_request(id) {
            Some(req) => req,
            None => return false,
        };

        if req_rc.borrow().in_callback {
            // the handler is out for a callback right now; it is
            // dropped as soon as the callback unwinds
            req_rc.borrow_mut().canceled = true;
            return true;
        }

        if req_rc.borrow().triggered {
            let handler = {
                let mut req = req_rc.borrow_mut();
                req.canceled = true;
                req.handler.take()
            };
            if ctx_rc.borrow().periodic.request_id == Some(id) {
                ctx_rc.borrow_mut().periodic.request_id = None;
            }
            drop(handler);
            return true;
        }

        // queued, or in flight at the transport
        let radio = ctx_rc.borrow().radio.clone();
        let mut cmds = Vec::new();
        let handler = {
            let mut ctx = ctx_rc.borrow_mut();
            let is_head =
                ctx.requests.front().map(|r| r.borrow().id) == Some(id);
            if is_head {
                cmds.extend(ctx.trigger_cmd.take());
                if ctx.dump_target == Some(DumpTarget::Request(id)) {
                    cmds.extend(ctx.get_scan_cmd.take());
                    ctx.dump_target = None;
                }
                ctx.state = ScanState::NotRunning;
            }
            ctx.unlink_request(id);
            if ctx.periodic.request_id == Some(id) {
                ctx.periodic.request_id = None;
            }
            let mut req = req_rc.borrow_mut();
            req.canceled = true;
            req.handler.take()
        };
        for cmd in cmds {
            self.inner.transport.cancel(cmd);
        }
        drop(handler);
        self.release_work(&radio, id);
        true
    }

    /// Whether a scan, ours or external, is running on `device` as far
    /// as the engine observed.
    pub fn is_scanning(&self, device: u64) -> bool {
        self.ctx(device)
            .map(|ctx_rc| ctx_rc.borrow().state != ScanState::NotRunning)
            .unwrap_or(false)
    }

    /// The TSF timestamp the driver reported when it accepted the
    /// request's latest fragment.
    pub fn get_triggered_time(&self, device: u64, id: ScanId) -> Option<u64> {
        let ctx_rc = self.ctx(device)?;
        let req_rc = ctx_rc.borrow().find_request(id)?;
        let req = req_rc.borrow();
        if req.started {
            Some(req.start_time_tsf)
        } else {
            None
        }
    }

    /// Start the recurring background scan on `device`.
    pub fn periodic_start(
        &self,
        device: u64,
        handler: Box<dyn PeriodicScanHandler>,
    ) -> bool {
        if self.inner.config.disable_periodic_scan {
            log::debug!("Periodic scan disabled by configuration");
            return false;
        }
        let ctx_rc = match self.ctx(device) {
            Some(ctx) => ctx,
            None => {
                log::warn!("periodic_start: unknown device {device}");
                return false;
            }
        };
        {
            let mut ctx = ctx_rc.borrow_mut();
            if ctx.periodic.is_started() || ctx.periodic.in_callback {
                return false;
            }
            ctx.periodic.handler = Some(handler);
            ctx.periodic.interval =
                self.inner.config.initial_periodic_scan_interval;
            ctx.periodic.needs_active_scan = false;
            ctx.periodic.deadline_us = None;
            ctx.periodic.stop_pending = false;
        }
        log::debug!("Periodic scan started for device {device}");
        self.queue_periodic_scan(device);
        true
    }

    /// Stop the recurring background scan, cancelling its in-flight
    /// request and disarming the timer.
    pub fn periodic_stop(&self, device: u64) -> bool {
        let ctx_rc = match self.ctx(device) {
            Some(ctx) => ctx,
            None => return false,
        };
        {
            let ctx = ctx_rc.borrow();
            if !ctx.periodic.is_started() && !ctx.periodic.in_callback {
                return false;
            }
        }
        let request_id = ctx_rc.borrow().periodic.request_id;
        if let Some(id) = request_id {
            self.cancel(device, id);
        }
        let handler = {
            let mut ctx = ctx_rc.borrow_mut();
            ctx.periodic.deadline_us = None;
            ctx.periodic.request_id = None;
            ctx.periodic.needs_active_scan = false;
            if ctx.periodic.in_callback {
                ctx.periodic.stop_pending = true;
                None
            } else {
                ctx.periodic.handler.take()
            }
        };
        drop(handler);
        log::debug!("Periodic scan stopped for device {device}");
        true
    }

    fn queue_periodic_scan(&self, device: u64) {
        let ctx_rc = match self.ctx(device) {
            Some(ctx) => ctx,
            None => return,
        };
        let hidden = self.hidden_ssids();
        let needs_active = ctx_rc.borrow().periodic.needs_active_scan;
        let active = self.inner.config.enable_active_scanning
            || (needs_active && !hidden.is_empty());
        let params = ScanParameters {
            randomize_mac_addr_hint: active,
            ..Default::default()
        };
        let id = self.queue_request(device, &params, !active, true, None);
        ctx_rc.borrow_mut().periodic.request_id = id;
    }

    fn periodic_rearm(&self, ctx_rc: &Rc<RefCell<ScanContext>>) {
        let now = self.inner.clock.now_us();
        let mut ctx = ctx_rc.borrow_mut();
        if !ctx.periodic.is_started() {
            return;
        }
        ctx.periodic.deadline_us =
            Some(now + u64::from(ctx.periodic.interval) * 1_000_000);
    }

    /// Deliver results to the periodic consumer, honoring a
    /// `periodic_stop` issued from inside the callback.
    fn periodic_results(
        &self,
        ctx_rc: &Rc<RefCell<ScanContext>>,
        results: ScanResults,
    ) {
        let handler = {
            let mut ctx = ctx_rc.borrow_mut();
            ctx.periodic.in_callback = true;
            ctx.periodic.handler.take()
        };
        let mut handler = match handler {
            Some(handler) => handler,
            None => {
                ctx_rc.borrow_mut().periodic.in_callback = false;
                return;
            }
        };
        handler.on_results(results);
        let dropped = {
            let mut ctx = ctx_rc.borrow_mut();
            ctx.periodic.in_callback = false;
            if ctx.periodic.stop_pending {
                ctx.periodic.stop_pending = false;
                Some(handler)
            } else {
                ctx.periodic.handler = Some(handler);
                None
            }
        };
        drop(dropped);
    }

    fn periodic_trigger(&self, ctx_rc: &Rc<RefCell<ScanContext>>) {
        let handler = {
            let mut ctx = ctx_rc.borrow_mut();
            ctx.periodic.in_callback = true;
            ctx.periodic.handler.take()
        };
        let mut handler = match handler {
            Some(handler) => handler,
            None => {
                ctx_rc.borrow_mut().periodic.in_callback = false;
                return;
            }
        };
        handler.on_trigger();
        let mut ctx = ctx_rc.borrow_mut();
        ctx.periodic.in_callback = false;
        if ctx.periodic.stop_pending {
            ctx.periodic.stop_pending = false;
            drop(ctx);
            drop(handler);
        } else {
            ctx.periodic.handler = Some(handler);
        }
    }

    /// One-shot dump of whatever the firmware has cached, without
    /// triggering a scan. Reports [`ScanError::NotFound`] on an empty
    /// cache.
    pub fn get_firmware_scan(
        &self,
        device: u64,
        handler: Box<dyn ScanHandler>,
    ) -> bool {
        let ctx_rc = match self.ctx(device) {
            Some(ctx) => ctx,
            None => return false,
        };
        if ctx_rc.borrow().fw_scan_cmd.is_some() {
            return false;
        }
        let cmd = self.inner.transport.submit(build_get_scan(device), true);
        let mut ctx = ctx_rc.borrow_mut();
        ctx.fw_scan_cmd = Some(cmd);
        ctx.fw_handler = Some(handler);
        ctx.fw_dump_start_us = self.inner.clock.now_us();
        true
    }

    /// Feed a command reply (ack, errno or dump contents) back into the
    /// engine. Replies to commands the engine no longer tracks are
    /// ignored.
    pub fn handle_reply(&self, cmd: CommandId, reply: CommandReply) {
        enum Slot {
            Trigger,
            Dump,
            Firmware,
        }
        let found = {
            let contexts = self.inner.contexts.borrow();
            contexts.values().find_map(|ctx_rc| {
                let ctx = ctx_rc.borrow();
                if ctx.trigger_cmd == Some(cmd) {
                    Some((ctx_rc.clone(), Slot::Trigger))
                } else if ctx.get_scan_cmd == Some(cmd) {
                    Some((ctx_rc.clone(), Slot::Dump))
                } else if ctx.fw_scan_cmd == Some(cmd) {
                    Some((ctx_rc.clone(), Slot::Firmware))
                } else {
                    None
                }
            })
        };
        let Some((ctx_rc, slot)) = found else { return };
        match slot {
            Slot::Trigger => self.trigger_ack(&ctx_rc, reply),
            Slot::Dump => self.dump_done(&ctx_rc, reply),
            Slot::Firmware => self.firmware_dump_done(&ctx_rc, reply),
        }
    }

    fn trigger_ack(
        &self,
        ctx_rc: &Rc<RefCell<ScanContext>>,
        reply: CommandReply,
    ) {
        ctx_rc.borrow_mut().trigger_cmd = None;
        let req_rc = match ctx_rc.borrow().head_request() {
            Some(req) => req,
            None => return,
        };
        match reply {
            CommandReply::Errno(errno) if ScanError::is_busy(errno) => {
                // another scan owns the radio; wait for its completion
                // event and retry
                ctx_rc.borrow_mut().state = ScanState::Passive;
            }
            CommandReply::Errno(errno) => {
                self.finish_request(
                    ctx_rc,
                    &req_rc,
                    Some(Err(ScanError::from_errno(errno))),
                );
            }
            CommandReply::Done(msgs) => {
                let fire = {
                    let mut ctx = ctx_rc.borrow_mut();
                    let mut req = req_rc.borrow_mut();
                    ctx.state = if req.passive {
                        ScanState::Passive
                    } else {
                        ScanState::Active
                    };
                    req.started = true;
                    req.triggered = true;
                    req.commands.pop_front();
                    if let Some(tsf) = msgs
                        .iter()
                        .flat_map(|msg| msg.attributes.iter())
                        .find_map(|attr| match attr {
                            Nl80211Attr::ScanStartTimeTsf(d) => Some(*d),
                            _ => None,
                        })
                    {
                        req.start_time_tsf = tsf;
                    }
                    let fire = !req.trigger_fired;
                    req.trigger_fired = true;
                    fire
                };
                if fire {
                    self.invoke_triggered(ctx_rc, &req_rc);
                }
            }
        }
    }

    fn invoke_triggered(
        &self,
        ctx_rc: &Rc<RefCell<ScanContext>>,
        req_rc: &Rc<RefCell<ScanRequest>>,
    ) {
        if req_rc.borrow().periodic {
            self.periodic_trigger(ctx_rc);
            return;
        }
        let handler = {
            let mut req = req_rc.borrow_mut();
            req.in_callback = true;
            req.handler.take()
        };
        let mut handler = match handler {
            Some(handler) => handler,
            None => {
                req_rc.borrow_mut().in_callback = false;
                return;
            }
        };
        handler.on_triggered();
        let dropped = {
            let mut req = req_rc.borrow_mut();
            req.in_callback = false;
            if req.canceled {
                // cancel() ran inside the callback; this drop is the
                // destruction notification
                Some(handler)
            } else {
                req.handler = Some(handler);
                None
            }
        };
        drop(dropped);
    }

    /// Terminal transition of a request: unlink it, release its radio
    /// slot and deliver the outcome. `None` ends the request silently.
    fn finish_request(
        &self,
        ctx_rc: &Rc<RefCell<ScanContext>>,
        req_rc: &Rc<RefCell<ScanRequest>>,
        outcome: Option<Result<ScanResults, ScanError>>,
    ) {
        let (id, periodic, canceled, radio) = {
            let req = req_rc.borrow();
            let ctx = ctx_rc.borrow();
            (req.id, req.periodic, req.canceled, ctx.radio.clone())
        };
        let mut cmds = Vec::new();
        {
            let mut ctx = ctx_rc.borrow_mut();
            let is_head =
                ctx.requests.front().map(|r| r.borrow().id) == Some(id);
            if is_head {
                cmds.extend(ctx.trigger_cmd.take());
                if ctx.dump_target == Some(DumpTarget::Request(id)) {
                    cmds.extend(ctx.get_scan_cmd.take());
                    ctx.dump_target = None;
                }
            }
            ctx.unlink_request(id);
            ctx.state = ScanState::NotRunning;
            if ctx.periodic.request_id == Some(id) {
                ctx.periodic.request_id = None;
            }
        }
        for cmd in cmds {
            self.inner.transport.cancel(cmd);
        }
        self.release_work(&radio, id);

        let handler = req_rc.borrow_mut().handler.take();
        if periodic && !canceled {
            // failures and aborts of the background scan are absorbed;
            // the timer keeps the cadence
            if let Some(Ok(results)) = outcome {
                self.periodic_results(ctx_rc, results);
            }
            self.periodic_rearm(ctx_rc);
        } else if !canceled {
            if let (Some(mut handler), Some(result)) = (handler, outcome) {
                req_rc.borrow_mut().in_callback = true;
                handler.on_finished(result);
                req_rc.borrow_mut().in_callback = false;
                drop(handler);
            }
        }
    }

    fn dump_done(
        &self,
        ctx_rc: &Rc<RefCell<ScanContext>>,
        reply: CommandReply,
    ) {
        let target = {
            let mut ctx = ctx_rc.borrow_mut();
            ctx.get_scan_cmd = None;
            ctx.dump_target.take()
        };
        let Some(target) = target else { return };

        match reply {
            CommandReply::Errno(errno) => {
                if let DumpTarget::Request(id) = target {
                    let req_rc = {
                        let ctx = ctx_rc.borrow();
                        ctx.find_request(id)
                    };
                    if let Some(req_rc) = req_rc {
                        self.finish_request(
                            ctx_rc,
                            &req_rc,
                            Some(Err(ScanError::from_errno(errno))),
                        );
                    }
                }
            }
            CommandReply::Done(msgs) => {
                let dump_start = ctx_rc.borrow().dump_start_us;
                let bss_list = self.parse_dump(&msgs, dump_start);
                {
                    let mut ctx = ctx_rc.borrow_mut();
                    ctx.periodic.needs_active_scan =
                        bss_list.iter().any(|bss| bss.is_hidden());
                }
                let results = ScanResults {
                    device: ctx_rc.borrow().device,
                    bss_list,
                    frequencies: ctx_rc.borrow().latest_freqs.clone(),
                };
                match target {
                    DumpTarget::Request(id) => {
                        let req_rc = {
                            let ctx = ctx_rc.borrow();
                            ctx.find_request(id)
                        };
                        if let Some(req_rc) = req_rc {
                            self.finish_request(
                                ctx_rc,
                                &req_rc,
                                Some(Ok(results)),
                            );
                        }
                    }
                    DumpTarget::Periodic => {
                        self.periodic_results(ctx_rc, results);
                    }
                }
            }
        }
    }

    fn firmware_dump_done(
        &self,
        ctx_rc: &Rc<RefCell<ScanContext>>,
        reply: CommandReply,
    ) {
        let (handler, dump_start, device) = {
            let mut ctx = ctx_rc.borrow_mut();
            ctx.fw_scan_cmd = None;
            (ctx.fw_handler.take(), ctx.fw_dump_start_us, ctx.device)
        };
        let Some(mut handler) = handler else { return };
        let result = match reply {
            CommandReply::Errno(errno) => Err(ScanError::from_errno(errno)),
            CommandReply::Done(msgs) => {
                let bss_list = self.parse_dump(&msgs, dump_start);
                if bss_list.is_empty() {
                    Err(ScanError::NotFound)
                } else {
                    Ok(ScanResults {
                        device,
                        bss_list,
                        frequencies: ScanFreqSet::new(),
                    })
                }
            }
        };
        handler.on_finished(result);
    }

    /// Parse GET_SCAN dump messages into a rank-ordered result list.
    /// Malformed entries are discarded with a warning; they never abort
    /// the dump.
    fn parse_dump(
        &self,
        msgs: &[ScanMessage],
        dump_start_us: u64,
    ) -> Vec<BssRecord> {
        let mut bss_list: Vec<BssRecord> = Vec::new();
        for msg in msgs {
            if msg.cmd != Nl80211Command::NewScanResults {
                continue;
            }
            let attrs = msg.attributes.iter().find_map(|attr| match attr {
                Nl80211Attr::Bss(v) => Some(v),
                _ => None,
            });
            let Some(attrs) = attrs else { continue };
            match BssRecord::from_dump(attrs, dump_start_us) {
                Ok(mut bss) => {
                    bss.rank = crate::rank::compute_rank(
                        &bss,
                        self.inner.config.rank_band_modifier_5ghz,
                    );
                    let pos = bss_list.partition_point(|other| {
                        crate::rank::rank_compare(other, &bss)
                            != Ordering::Greater
                    });
                    bss_list.insert(pos, bss);
                }
                Err(e) => log::warn!("Discarding malformed BSS entry: {e}"),
            }
        }
        bss_list
    }

    /// Feed an nl80211 multicast event into the engine.
    pub fn handle_event(&self, msg: &ScanMessage) {
        let Some(device) = msg.wdev() else { return };
        let Some(ctx_rc) = self.ctx(device) else { return };
        match msg.cmd {
            Nl80211Command::TriggerScan => self.notify_trigger(&ctx_rc, msg),
            Nl80211Command::NewScanResults
            | Nl80211Command::SchedScanResults => {
                self.notify_scan_done(&ctx_rc, msg)
            }
            Nl80211Command::ScanAborted => self.notify_scan_aborted(&ctx_rc),
            _ => (),
        }
    }

    fn notify_trigger(
        &self,
        ctx_rc: &Rc<RefCell<ScanContext>>,
        msg: &ScanMessage,
    ) {
        let active = msg
            .attributes
            .iter()
            .any(|attr| matches!(attr, Nl80211Attr::ScanSsids(_)));
        let tsf = msg.attributes.iter().find_map(|attr| match attr {
            Nl80211Attr::ScanStartTimeTsf(d) => Some(*d),
            _ => None,
        });

        let mut ctx = ctx_rc.borrow_mut();
        ctx.state = if active {
            ScanState::Active
        } else {
            ScanState::Passive
        };
        if let Some(tsf) = tsf {
            // record the start TSF on the request the driver accepted
            if let Some(req_rc) = ctx.requests.front() {
                let mut req = req_rc.borrow_mut();
                if req.started {
                    req.start_time_tsf = tsf;
                }
            }
        }
    }

    fn notify_scan_done(
        &self,
        ctx_rc: &Rc<RefCell<ScanContext>>,
        msg: &ScanMessage,
    ) {
        let device = ctx_rc.borrow().device;
        if let Some(freqs) = msg.attributes.iter().find_map(|attr| {
            match attr {
                Nl80211Attr::ScanFrequencies(v) => Some(v),
                _ => None,
            }
        }) {
            ctx_rc.borrow_mut().latest_freqs =
                freqs.iter().copied().collect();
        }
        let flushed = msg
            .attributes
            .iter()
            .any(|attr| match attr {
                Nl80211Attr::ScanFlags(flags) => {
                    flags.contains(Nl80211ScanFlags::Flush)
                }
                _ => false,
            });

        let head = ctx_rc.borrow().head_request();
        let Some(req_rc) = head else {
            // an external scan finished; dump its results for the
            // periodic consumer, if any
            let dump = {
                let mut ctx = ctx_rc.borrow_mut();
                ctx.state = ScanState::NotRunning;
                ctx.periodic.is_started()
                    && ctx.get_scan_cmd.is_none()
                    && ctx.fw_scan_cmd.is_none()
            };
            if dump {
                self.start_dump(ctx_rc, DumpTarget::Periodic);
            }
            return;
        };

        let (id, started, triggered, canceled, more_commands) = {
            let req = req_rc.borrow();
            (
                req.id,
                req.started,
                req.triggered,
                req.canceled,
                !req.commands.is_empty(),
            )
        };

        if flushed && started && !triggered {
            // the kernel dropped the results our earlier fragments
            // accumulated
            self.finish_request(
                ctx_rc,
                &req_rc,
                Some(Err(ScanError::TryAgain)),
            );
            return;
        }

        if triggered {
            req_rc.borrow_mut().triggered = false;
            if canceled {
                self.finish_request(ctx_rc, &req_rc, None);
            } else if more_commands {
                self.start_work(device, id);
            } else {
                self.start_dump(ctx_rc, DumpTarget::Request(id));
            }
        } else {
            // either the trigger bounced with EBUSY earlier or an
            // external scan completed while we were queued; retry if we
            // hold the radio
            let running = ctx_rc.borrow().radio.borrow().work.is_running(id);
            let in_flight = ctx_rc.borrow().trigger_cmd.is_some();
            if running && !in_flight {
                self.start_work(device, id);
            }
        }
    }

    fn start_dump(
        &self,
        ctx_rc: &Rc<RefCell<ScanContext>>,
        target: DumpTarget,
    ) {
        let (device, superseded) = {
            let mut ctx = ctx_rc.borrow_mut();
            // a request dump replaces a still-running periodic dump
            (ctx.device, ctx.get_scan_cmd.take())
        };
        if let Some(cmd) = superseded {
            self.inner.transport.cancel(cmd);
        }
        let cmd = self.inner.transport.submit(build_get_scan(device), true);
        let mut ctx = ctx_rc.borrow_mut();
        ctx.get_scan_cmd = Some(cmd);
        ctx.dump_target = Some(target);
        ctx.dump_start_us = self.inner.clock.now_us();
    }

    fn notify_scan_aborted(&self, ctx_rc: &Rc<RefCell<ScanContext>>) {
        let device = ctx_rc.borrow().device;
        ctx_rc.borrow_mut().state = ScanState::NotRunning;
        let head = ctx_rc.borrow().head_request();
        let Some(req_rc) = head else { return };
        let (id, triggered, periodic) = {
            let req = req_rc.borrow();
            (req.id, req.triggered, req.periodic)
        };
        if triggered {
            if periodic {
                // the background scan absorbs aborts silently
                self.finish_request(ctx_rc, &req_rc, None);
            } else {
                self.finish_request(
                    ctx_rc,
                    &req_rc,
                    Some(Err(ScanError::Canceled)),
                );
            }
        } else {
            // a spurious abort of a scan that was not ours; retry when
            // we own the radio
            let running = ctx_rc.borrow().radio.borrow().work.is_running(id);
            let in_flight = ctx_rc.borrow().trigger_cmd.is_some();
            if running && !in_flight {
                self.start_work(device, id);
            }
        }
    }

    /// Run every periodic timer whose deadline has passed.
    pub fn dispatch_timeouts(&self) {
        let now = self.inner.clock.now_us();
        let due: Vec<u64> = {
            let contexts = self.inner.contexts.borrow();
            contexts
                .values()
                .filter(|ctx_rc| {
                    let ctx = ctx_rc.borrow();
                    matches!(ctx.periodic.deadline_us, Some(d) if d <= now)
                })
                .map(|ctx_rc| ctx_rc.borrow().device)
                .collect()
        };
        for device in due {
            let Some(ctx_rc) = self.ctx(device) else { continue };
            let queue_next = {
                let mut ctx = ctx_rc.borrow_mut();
                ctx.periodic.deadline_us = None;
                if !ctx.periodic.is_started() {
                    false
                } else if ctx.periodic.request_id.is_some() {
                    // previous scan still pending; keep the cadence
                    ctx.periodic.deadline_us = Some(
                        now + u64::from(ctx.periodic.interval) * 1_000_000,
                    );
                    false
                } else {
                    ctx.periodic.interval = ctx
                        .periodic
                        .interval
                        .saturating_mul(2)
                        .min(self.inner.config.maximum_periodic_scan_interval);
                    true
                }
            };
            if queue_next {
                self.queue_periodic_scan(device);
            }
        }
    }

    /// Time until the earliest periodic timer fires, for the embedding
    /// event loop.
    pub fn next_timeout(&self) -> Option<Duration> {
        let now = self.inner.clock.now_us();
        let contexts = self.inner.contexts.borrow();
        contexts
            .values()
            .filter_map(|ctx_rc| ctx_rc.borrow().periodic.deadline_us)
            .min()
            .map(|deadline| Duration::from_micros(deadline.saturating_sub(now)))
    }
}

#[cfg(test)]
mod test;
