// SPDX-License-Identifier: MIT

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

use crate::tests::fake::{
    FakeClock, FakeTransport, HandlerLog, PeriodicLog, RecordingHandler,
    RecordingPeriodicHandler,
};
use crate::{
    BssRecord, CommandReply, HiddenSsidSource, Nl80211Attr, Nl80211BssAttr,
    Nl80211Command, Nl80211ScanFlags, OweTransition, Radio,
    RadioCapabilities, RadioHandle, ScanConfig, ScanEngine, ScanError,
    ScanHandler, ScanMessage, ScanResults,
};

const DEV: u64 = 1;

struct Setup {
    engine: ScanEngine,
    transport: Rc<FakeTransport>,
    clock: Rc<FakeClock>,
    radio: RadioHandle,
}

fn radio(max_scan_ssids: u8) -> RadioHandle {
    Radio::new(RadioCapabilities {
        max_scan_ssids,
        supports_random_mac: true,
        ..Default::default()
    })
}

fn setup_with_config(config: ScanConfig) -> Setup {
    let transport = FakeTransport::new();
    let clock = FakeClock::new();
    let engine =
        ScanEngine::with_clock(transport.clone(), config, clock.clone());
    let radio = radio(4);
    assert!(engine.add(DEV, radio.clone()));
    Setup {
        engine,
        transport,
        clock,
        radio,
    }
}

fn setup() -> Setup {
    setup_with_config(ScanConfig::default())
}

struct FakeKnownNetworks(Vec<Vec<u8>>);

impl HiddenSsidSource for FakeKnownNetworks {
    fn hidden_ssids(&self) -> Vec<Vec<u8>> {
        self.0.clone()
    }
}

fn trigger_event(tsf: Option<u64>, active: bool) -> ScanMessage {
    let mut attributes = vec![Nl80211Attr::Wdev(DEV)];
    if active {
        attributes.push(Nl80211Attr::ScanSsids(vec![Vec::new()]));
    }
    if let Some(tsf) = tsf {
        attributes.push(Nl80211Attr::ScanStartTimeTsf(tsf));
    }
    ScanMessage::new(Nl80211Command::TriggerScan, attributes)
}

fn results_event(freqs: &[u32], flush: bool) -> ScanMessage {
    let mut attributes = vec![
        Nl80211Attr::Wdev(DEV),
        Nl80211Attr::ScanFrequencies(freqs.to_vec()),
    ];
    if flush {
        attributes.push(Nl80211Attr::ScanFlags(Nl80211ScanFlags::Flush));
    }
    ScanMessage::new(Nl80211Command::NewScanResults, attributes)
}

fn aborted_event() -> ScanMessage {
    ScanMessage::new(
        Nl80211Command::ScanAborted,
        vec![Nl80211Attr::Wdev(DEV)],
    )
}

fn bss_msg(
    bssid: [u8; 6],
    freq: u32,
    signal_mbm: i32,
    ssid: &[u8],
) -> ScanMessage {
    let mut ies = vec![0u8, ssid.len() as u8];
    ies.extend_from_slice(ssid);
    ies.extend_from_slice(&[1, 4, 0x82, 0x84, 0x8b, 0x96]);
    ScanMessage::new(
        Nl80211Command::NewScanResults,
        vec![
            Nl80211Attr::Wdev(DEV),
            Nl80211Attr::Bss(vec![
                Nl80211BssAttr::Bssid(bssid),
                Nl80211BssAttr::Frequency(freq),
                Nl80211BssAttr::SignalMbm(signal_mbm),
                Nl80211BssAttr::InformationElements(ies),
            ]),
        ],
    )
}

/// A dump entry the record parser rejects: IEs without an SSID element.
fn malformed_bss_msg() -> ScanMessage {
    ScanMessage::new(
        Nl80211Command::NewScanResults,
        vec![
            Nl80211Attr::Wdev(DEV),
            Nl80211Attr::Bss(vec![
                Nl80211BssAttr::Bssid([9; 6]),
                Nl80211BssAttr::Frequency(2412),
                Nl80211BssAttr::InformationElements(vec![
                    1, 4, 0x82, 0x84, 0x8b, 0x96,
                ]),
            ]),
        ],
    )
}

/// Ack the latest trigger, deliver its events, answer the dump.
fn complete_scan(setup: &Setup, dump: Vec<ScanMessage>, freqs: &[u32]) {
    let trigger = setup.transport.last();
    assert!(!trigger.dump);
    setup
        .engine
        .handle_reply(trigger.id, CommandReply::Done(Vec::new()));
    setup.engine.handle_event(&trigger_event(None, false));
    setup.engine.handle_event(&results_event(freqs, false));
    let dump_cmd = setup.transport.last();
    assert!(dump_cmd.dump);
    setup
        .engine
        .handle_reply(dump_cmd.id, CommandReply::Done(dump));
}

#[test]
fn test_passive_scan_single_bss() {
    let setup = setup();
    let log = Rc::new(RefCell::new(HandlerLog::default()));

    let id = setup
        .engine
        .passive(
            DEV,
            [2412u32, 2437, 2462].into_iter().collect(),
            RecordingHandler::new(&log),
        )
        .unwrap();
    assert!(id > 0);

    let trigger = setup.transport.last();
    assert_eq!(trigger.msg.cmd, Nl80211Command::TriggerScan);
    assert!(trigger.msg.attributes.contains(&Nl80211Attr::Wdev(DEV)));
    assert!(trigger
        .msg
        .attributes
        .contains(&Nl80211Attr::ScanFrequencies(vec![2412, 2437, 2462])));

    complete_scan(
        &setup,
        vec![bss_msg(
            [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff],
            2437,
            -5000,
            b"Test",
        )],
        &[2412, 2437, 2462],
    );

    let log = log.borrow();
    assert_eq!(log.triggered, 1);
    assert_eq!(log.results.len(), 1);
    assert!(log.errors.is_empty());
    assert_eq!(log.destroyed, 1);

    let results = &log.results[0];
    assert_eq!(results.device, DEV);
    assert_eq!(results.bss_list.len(), 1);
    let bss = &results.bss_list[0];
    assert_eq!(bss.ssid, b"Test");
    assert_eq!(bss.frequency, 2437);
    assert!(bss.rank > 0);
    assert_eq!(
        results.frequencies,
        [2412u32, 2437, 2462].into_iter().collect()
    );
}

#[test]
fn test_hidden_ssid_fragmentation_single_trigger() {
    let setup = setup();
    let hidden: Vec<Vec<u8>> = (0..12u8).map(|i| vec![b'h', i]).collect();
    setup
        .engine
        .set_hidden_ssid_source(Rc::new(FakeKnownNetworks(hidden)));

    let log = Rc::new(RefCell::new(HandlerLog::default()));
    setup
        .engine
        .active(DEV, &[], RecordingHandler::new(&log))
        .unwrap();

    // 12 hidden SSIDs + broadcast at 4 per command = 4 fragments
    for _ in 0..4 {
        let trigger = setup.transport.last();
        assert_eq!(trigger.msg.cmd, Nl80211Command::TriggerScan);
        setup
            .engine
            .handle_reply(trigger.id, CommandReply::Done(Vec::new()));
        setup.engine.handle_event(&trigger_event(None, true));
        setup.engine.handle_event(&results_event(&[2412], false));
    }

    let dump = setup.transport.last();
    assert!(dump.dump);
    setup
        .engine
        .handle_reply(dump.id, CommandReply::Done(Vec::new()));

    let triggers = setup
        .transport
        .submissions()
        .iter()
        .filter(|cmd| cmd.msg.cmd == Nl80211Command::TriggerScan)
        .count();
    assert_eq!(triggers, 4);

    let log = log.borrow();
    assert_eq!(log.triggered, 1, "trigger must fire once per request");
    assert_eq!(log.results.len(), 1, "one completion per request");
    assert_eq!(log.destroyed, 1);
}

#[test]
fn test_cancel_before_trigger_ack() {
    let setup = setup();
    let log = Rc::new(RefCell::new(HandlerLog::default()));

    let id = setup
        .engine
        .passive(
            DEV,
            [2412u32].into_iter().collect(),
            RecordingHandler::new(&log),
        )
        .unwrap();
    let trigger = setup.transport.last();

    assert!(setup.engine.cancel(DEV, id));
    assert!(setup.transport.was_canceled(trigger.id));
    assert_eq!(log.borrow().destroyed, 1);
    assert!(setup.radio.borrow().work.is_empty());

    // a late ack of the cancelled command is ignored
    setup
        .engine
        .handle_reply(trigger.id, CommandReply::Done(Vec::new()));
    let log = log.borrow();
    assert!(log.results.is_empty());
    assert!(log.errors.is_empty());
    assert_eq!(log.triggered, 0);
}

#[test]
fn test_cancel_after_trigger_discards_results() {
    let setup = setup();
    let log = Rc::new(RefCell::new(HandlerLog::default()));

    let id = setup
        .engine
        .passive(
            DEV,
            [2412u32].into_iter().collect(),
            RecordingHandler::new(&log),
        )
        .unwrap();
    let trigger = setup.transport.last();
    setup
        .engine
        .handle_reply(trigger.id, CommandReply::Done(Vec::new()));

    assert!(setup.engine.cancel(DEV, id));
    // the destructor ran but the request waits for the driver event
    assert_eq!(log.borrow().destroyed, 1);
    assert!(!setup.radio.borrow().work.is_empty());

    let submissions = setup.transport.submissions().len();
    setup.engine.handle_event(&results_event(&[2412], false));

    // no dump is issued for a dead request and the slot is released
    assert_eq!(setup.transport.submissions().len(), submissions);
    assert!(setup.radio.borrow().work.is_empty());
    assert!(log.borrow().results.is_empty());
    assert!(log.borrow().errors.is_empty());
}

#[test]
fn test_cancel_from_within_trigger_callback() {
    struct CancelingHandler {
        engine: ScanEngine,
        id: Rc<Cell<u32>>,
        log: Rc<RefCell<HandlerLog>>,
    }

    impl ScanHandler for CancelingHandler {
        fn on_triggered(&mut self) {
            assert!(self.engine.cancel(DEV, self.id.get()));
        }

        fn on_finished(
            &mut self,
            _result: Result<ScanResults, ScanError>,
        ) {
            self.log.borrow_mut().finish_order.push(0);
        }
    }

    impl Drop for CancelingHandler {
        fn drop(&mut self) {
            self.log.borrow_mut().destroyed += 1;
        }
    }

    let setup = setup();
    let log = Rc::new(RefCell::new(HandlerLog::default()));
    let id_cell = Rc::new(Cell::new(0));
    let id = setup
        .engine
        .passive(
            DEV,
            [2412u32].into_iter().collect(),
            Box::new(CancelingHandler {
                engine: setup.engine.clone(),
                id: id_cell.clone(),
                log: log.clone(),
            }),
        )
        .unwrap();
    id_cell.set(id);

    let trigger = setup.transport.last();
    setup
        .engine
        .handle_reply(trigger.id, CommandReply::Done(Vec::new()));

    // destructor ran right after the callback unwound
    assert_eq!(log.borrow().destroyed, 1);
    assert!(log.borrow().finish_order.is_empty());

    setup.engine.handle_event(&results_event(&[2412], false));
    assert!(log.borrow().finish_order.is_empty());
    assert!(setup.radio.borrow().work.is_empty());
}

#[test]
fn test_external_busy_retries() {
    let setup = setup();
    let log = Rc::new(RefCell::new(HandlerLog::default()));

    setup
        .engine
        .passive(
            DEV,
            [2412u32].into_iter().collect(),
            RecordingHandler::new(&log),
        )
        .unwrap();
    let trigger = setup.transport.last();
    setup.engine.handle_reply(trigger.id, CommandReply::Errno(-16));

    // not failed, waiting for the external scan to finish
    assert!(log.borrow().errors.is_empty());
    assert!(setup.engine.is_scanning(DEV));
    assert_eq!(setup.transport.submissions().len(), 1);

    // the external scan completes, the work item re-executes
    setup.engine.handle_event(&results_event(&[2412], false));
    let retry = setup.transport.last();
    assert_eq!(retry.msg.cmd, Nl80211Command::TriggerScan);
    assert_ne!(retry.id, trigger.id);

    complete_scan(
        &setup,
        vec![bss_msg([2; 6], 2412, -4000, b"x")],
        &[2412],
    );
    assert!(!setup.engine.is_scanning(DEV));
    let log = log.borrow();
    assert_eq!(log.triggered, 1);
    assert_eq!(log.results.len(), 1);
    assert_eq!(log.destroyed, 1);
}

#[test]
fn test_external_flush_fails_midflight_scan() {
    let setup = setup();
    let hidden: Vec<Vec<u8>> = (0..6u8).map(|i| vec![b'h', i]).collect();
    setup
        .engine
        .set_hidden_ssid_source(Rc::new(FakeKnownNetworks(hidden)));
    let log = Rc::new(RefCell::new(HandlerLog::default()));

    setup
        .engine
        .active(DEV, &[], RecordingHandler::new(&log))
        .unwrap();

    // fragment 1 runs and completes
    let first = setup.transport.last();
    setup
        .engine
        .handle_reply(first.id, CommandReply::Done(Vec::new()));
    setup.engine.handle_event(&results_event(&[2412], false));

    // fragment 2 is in flight when an external flush scan finishes
    let second = setup.transport.last();
    assert_ne!(second.id, first.id);
    setup.engine.handle_event(&results_event(&[2412], true));

    let log = log.borrow();
    assert_eq!(log.errors.len(), 1);
    assert!(matches!(log.errors[0], ScanError::TryAgain));
    assert_eq!(log.destroyed, 1);
    assert!(setup.transport.was_canceled(second.id));
    assert!(setup.radio.borrow().work.is_empty());
}

#[test]
fn test_scan_aborted() {
    let setup = setup();
    let log = Rc::new(RefCell::new(HandlerLog::default()));

    setup
        .engine
        .passive(
            DEV,
            [2412u32].into_iter().collect(),
            RecordingHandler::new(&log),
        )
        .unwrap();
    let trigger = setup.transport.last();
    setup
        .engine
        .handle_reply(trigger.id, CommandReply::Done(Vec::new()));
    setup.engine.handle_event(&aborted_event());

    let log = log.borrow();
    assert_eq!(log.errors.len(), 1);
    assert!(matches!(log.errors[0], ScanError::Canceled));
    assert_eq!(log.destroyed, 1);
}

#[test]
fn test_spurious_abort_retries_untriggered_scan() {
    let setup = setup();
    let log = Rc::new(RefCell::new(HandlerLog::default()));

    setup
        .engine
        .passive(
            DEV,
            [2412u32].into_iter().collect(),
            RecordingHandler::new(&log),
        )
        .unwrap();
    let trigger = setup.transport.last();
    setup.engine.handle_reply(trigger.id, CommandReply::Errno(-16));

    // an abort of the external scan we were waiting out
    setup.engine.handle_event(&aborted_event());
    let retry = setup.transport.last();
    assert_ne!(retry.id, trigger.id);
    assert!(log.borrow().errors.is_empty());
}

#[test]
fn test_malformed_bss_discarded_dump_continues() {
    let setup = setup();
    let log = Rc::new(RefCell::new(HandlerLog::default()));

    setup
        .engine
        .passive(
            DEV,
            [2412u32].into_iter().collect(),
            RecordingHandler::new(&log),
        )
        .unwrap();
    complete_scan(
        &setup,
        vec![
            malformed_bss_msg(),
            bss_msg([2; 6], 2412, -4000, b"good"),
        ],
        &[2412],
    );

    let log = log.borrow();
    assert_eq!(log.results.len(), 1);
    assert_eq!(log.results[0].bss_list.len(), 1);
    assert_eq!(log.results[0].bss_list[0].ssid, b"good");
}

#[test]
fn test_results_sorted_by_rank() {
    let setup = setup();
    let log = Rc::new(RefCell::new(HandlerLog::default()));

    setup
        .engine
        .passive(
            DEV,
            [2412u32, 2437].into_iter().collect(),
            RecordingHandler::new(&log),
        )
        .unwrap();

    // equal rank, the stronger signal sorts first
    complete_scan(
        &setup,
        vec![
            bss_msg([1; 6], 2412, -7000, b"weak"),
            bss_msg([2; 6], 2437, -3000, b"strong"),
        ],
        &[2412, 2437],
    );

    let log = log.borrow();
    let list = &log.results[0].bss_list;
    assert_eq!(list.len(), 2);
    assert_eq!(list[0].ssid, b"strong");
    assert_eq!(list[1].ssid, b"weak");
}

#[test]
fn test_fifo_completion_order() {
    let setup = setup();
    let log = Rc::new(RefCell::new(HandlerLog::default()));

    for marker in 1..=3 {
        setup
            .engine
            .passive(
                DEV,
                [2412u32].into_iter().collect(),
                RecordingHandler::with_marker(&log, marker),
            )
            .unwrap();
    }
    // only the head request hit the transport
    assert_eq!(setup.transport.submissions().len(), 1);

    for _ in 0..3 {
        complete_scan(&setup, Vec::new(), &[2412]);
    }

    let log = log.borrow();
    assert_eq!(log.finish_order, vec![1, 2, 3]);
    assert_eq!(log.destroyed, 3);
    assert!(setup.radio.borrow().work.is_empty());
}

#[test]
fn test_add_remove_idempotent() {
    let setup = setup();
    assert!(!setup.engine.add(DEV, setup.radio.clone()));
    assert!(setup.engine.remove(DEV));
    assert!(!setup.engine.remove(DEV));
    assert!(setup.engine.add(DEV, setup.radio.clone()));
}

#[test]
fn test_remove_cancels_and_destroys() {
    let setup = setup();
    let log = Rc::new(RefCell::new(HandlerLog::default()));

    setup
        .engine
        .passive(
            DEV,
            [2412u32].into_iter().collect(),
            RecordingHandler::new(&log),
        )
        .unwrap();
    setup
        .engine
        .passive(
            DEV,
            [2437u32].into_iter().collect(),
            RecordingHandler::new(&log),
        )
        .unwrap();
    let trigger = setup.transport.last();

    assert!(setup.engine.remove(DEV));
    assert!(setup.transport.was_canceled(trigger.id));
    let log = log.borrow();
    assert_eq!(log.destroyed, 2);
    assert!(log.results.is_empty());
    assert!(log.errors.is_empty());
    assert!(setup.radio.borrow().work.is_empty());
}

#[test]
fn test_periodic_backoff() {
    let config = ScanConfig {
        initial_periodic_scan_interval: 10,
        maximum_periodic_scan_interval: 60,
        ..Default::default()
    };
    let setup = setup_with_config(config);
    let log = Rc::new(RefCell::new(PeriodicLog::default()));

    assert!(setup.engine.periodic_start(
        DEV,
        RecordingPeriodicHandler::new(&log, &setup.clock)
    ));

    for expected_secs in [10u64, 20, 40, 60, 60] {
        complete_scan(&setup, Vec::new(), &[2412]);
        assert_eq!(
            setup.engine.next_timeout(),
            Some(Duration::from_secs(expected_secs))
        );
        setup.clock.advance(expected_secs * 1_000_000);
        setup.engine.dispatch_timeouts();
    }

    let log = log.borrow();
    assert_eq!(log.results.len(), 5);
    assert_eq!(log.triggers, 5);
    // delays between completions follow the doubling, clamped at the
    // maximum
    let times = &log.completion_times_us;
    let deltas: Vec<u64> = times.windows(2).map(|w| w[1] - w[0]).collect();
    assert_eq!(
        deltas,
        vec![10_000_000, 20_000_000, 40_000_000, 60_000_000]
    );
}

#[test]
fn test_periodic_timer_never_overlaps_pending_scan() {
    let config = ScanConfig {
        initial_periodic_scan_interval: 10,
        maximum_periodic_scan_interval: 60,
        ..Default::default()
    };
    let setup = setup_with_config(config);
    let log = Rc::new(RefCell::new(PeriodicLog::default()));
    setup
        .engine
        .periodic_start(DEV, RecordingPeriodicHandler::new(&log, &setup.clock));

    complete_scan(&setup, Vec::new(), &[2412]);
    setup.clock.advance(10_000_000);
    setup.engine.dispatch_timeouts();

    // leave the next periodic scan un-acked and fire the timer again
    let submissions = setup.transport.submissions().len();
    setup.clock.advance(60_000_000);
    // the engine rearmed nothing yet (scan pending, no timer), so a
    // dispatch is a no-op
    setup.engine.dispatch_timeouts();
    assert_eq!(setup.transport.submissions().len(), submissions);
    assert_eq!(log.borrow().results.len(), 1);
}

#[test]
fn test_periodic_turns_active_after_hidden_results() {
    let setup = setup();
    setup
        .engine
        .set_hidden_ssid_source(Rc::new(FakeKnownNetworks(vec![
            b"hidden-net".to_vec(),
        ])));
    let log = Rc::new(RefCell::new(PeriodicLog::default()));
    setup
        .engine
        .periodic_start(DEV, RecordingPeriodicHandler::new(&log, &setup.clock));

    // the first periodic scan is passive
    let first = setup.transport.submissions()[0].clone();
    assert!(!first
        .msg
        .attributes
        .iter()
        .any(|attr| matches!(attr, Nl80211Attr::ScanSsids(_))));

    // results contain a hidden BSS
    complete_scan(&setup, vec![bss_msg([3; 6], 2412, -4000, b"")], &[2412]);
    setup.clock.advance(
        u64::from(ScanConfig::default().initial_periodic_scan_interval)
            * 1_000_000,
    );
    setup.engine.dispatch_timeouts();

    // the follow-up probes the known hidden network with a random MAC
    let next = setup.transport.last();
    let ssids = next
        .msg
        .attributes
        .iter()
        .find_map(|attr| match attr {
            Nl80211Attr::ScanSsids(v) => Some(v.clone()),
            _ => None,
        })
        .expect("active scan expected");
    assert!(ssids.contains(&b"hidden-net".to_vec()));
    let flags = next
        .msg
        .attributes
        .iter()
        .find_map(|attr| match attr {
            Nl80211Attr::ScanFlags(flags) => Some(*flags),
            _ => None,
        })
        .unwrap_or_default();
    assert!(flags.contains(Nl80211ScanFlags::RandomAddr));
}

#[test]
fn test_periodic_stop() {
    let setup = setup();
    let log = Rc::new(RefCell::new(PeriodicLog::default()));
    setup
        .engine
        .periodic_start(DEV, RecordingPeriodicHandler::new(&log, &setup.clock));
    let trigger = setup.transport.last();

    assert!(setup.engine.periodic_stop(DEV));
    assert!(setup.transport.was_canceled(trigger.id));
    assert_eq!(setup.engine.next_timeout(), None);
    assert_eq!(log.borrow().destroyed, 1);
    assert!(!setup.engine.periodic_stop(DEV));
    assert!(setup.radio.borrow().work.is_empty());
}

#[test]
fn test_periodic_start_twice_and_disabled() {
    let setup = setup();
    let log = Rc::new(RefCell::new(PeriodicLog::default()));
    assert!(setup.engine.periodic_start(
        DEV,
        RecordingPeriodicHandler::new(&log, &setup.clock)
    ));
    assert!(!setup.engine.periodic_start(
        DEV,
        RecordingPeriodicHandler::new(&log, &setup.clock)
    ));

    let config = ScanConfig {
        disable_periodic_scan: true,
        ..Default::default()
    };
    let disabled = setup_with_config(config);
    assert!(!disabled.engine.periodic_start(
        DEV,
        RecordingPeriodicHandler::new(&log, &disabled.clock)
    ));
}

#[test]
fn test_external_scan_dumped_for_periodic() {
    let setup = setup();
    let log = Rc::new(RefCell::new(PeriodicLog::default()));
    setup
        .engine
        .periodic_start(DEV, RecordingPeriodicHandler::new(&log, &setup.clock));
    complete_scan(&setup, Vec::new(), &[2412]);
    assert_eq!(log.borrow().results.len(), 1);

    // an externally initiated scan finishes with no local request
    setup.engine.handle_event(&trigger_event(Some(4242), false));
    setup.engine.handle_event(&results_event(&[2437], false));
    let dump = setup.transport.last();
    assert!(dump.dump);
    setup.engine.handle_reply(
        dump.id,
        CommandReply::Done(vec![bss_msg([7; 6], 2437, -3500, b"ext")]),
    );

    let log = log.borrow();
    assert_eq!(log.results.len(), 2);
    assert_eq!(log.results[1].bss_list[0].ssid, b"ext");
}

#[test]
fn test_get_firmware_scan() {
    let setup = setup();
    let log = Rc::new(RefCell::new(HandlerLog::default()));

    assert!(setup
        .engine
        .get_firmware_scan(DEV, RecordingHandler::new(&log)));
    // only one firmware dump at a time
    assert!(!setup
        .engine
        .get_firmware_scan(DEV, RecordingHandler::new(&log)));

    let dump = setup.transport.last();
    assert!(dump.dump);
    setup
        .engine
        .handle_reply(dump.id, CommandReply::Done(Vec::new()));
    {
        let log = log.borrow();
        assert_eq!(log.errors.len(), 1);
        assert!(matches!(log.errors[0], ScanError::NotFound));
    }

    assert!(setup
        .engine
        .get_firmware_scan(DEV, RecordingHandler::new(&log)));
    let dump = setup.transport.last();
    setup.engine.handle_reply(
        dump.id,
        CommandReply::Done(vec![bss_msg([5; 6], 5180, -2000, b"fw")]),
    );
    let log = log.borrow();
    assert_eq!(log.results.len(), 1);
    assert_eq!(log.results[0].bss_list[0].ssid, b"fw");
    // the recording handlers for both dumps and the rejected call
    assert_eq!(log.destroyed, 3);
}

#[test]
fn test_get_triggered_time() {
    let setup = setup();
    let log = Rc::new(RefCell::new(HandlerLog::default()));
    let id = setup
        .engine
        .passive(
            DEV,
            [2412u32].into_iter().collect(),
            RecordingHandler::new(&log),
        )
        .unwrap();

    assert_eq!(setup.engine.get_triggered_time(DEV, id), None);

    let trigger = setup.transport.last();
    setup
        .engine
        .handle_reply(trigger.id, CommandReply::Done(Vec::new()));
    setup.engine.handle_event(&trigger_event(Some(123_456), false));
    assert_eq!(setup.engine.get_triggered_time(DEV, id), Some(123_456));
}

#[test]
fn test_owe_hidden() {
    let setup = setup();
    let log = Rc::new(RefCell::new(HandlerLog::default()));

    let mut with_owe = BssRecord {
        frequency: 5180,
        ..Default::default()
    };
    with_owe.owe_trans = Some(OweTransition {
        bssid: [4; 6],
        ssid: b"owe-hidden".to_vec(),
        oper_class: Some(115),
        channel: Some(36),
    });
    let without_owe = BssRecord {
        frequency: 2412,
        ..Default::default()
    };

    let id = setup.engine.owe_hidden(
        DEV,
        &[with_owe, without_owe.clone()],
        RecordingHandler::new(&log),
    );
    assert!(id.is_some());

    let trigger = setup.transport.last();
    assert!(trigger
        .msg
        .attributes
        .contains(&Nl80211Attr::ScanFrequencies(vec![5180])));
    assert!(trigger
        .msg
        .attributes
        .contains(&Nl80211Attr::ScanSsids(vec![b"owe-hidden".to_vec()])));

    // no OWE transition targets, no scan
    let log2 = Rc::new(RefCell::new(HandlerLog::default()));
    assert!(setup
        .engine
        .owe_hidden(DEV, &[without_owe], RecordingHandler::new(&log2))
        .is_none());
    assert_eq!(log2.borrow().destroyed, 1);
}

#[test]
fn test_unknown_device_is_rejected() {
    let setup = setup();
    let log = Rc::new(RefCell::new(HandlerLog::default()));
    assert!(setup
        .engine
        .passive(
            99,
            [2412u32].into_iter().collect(),
            RecordingHandler::new(&log)
        )
        .is_none());
    assert_eq!(log.borrow().destroyed, 1);
    assert!(!setup
        .engine
        .periodic_start(
            99,
            RecordingPeriodicHandler::new(
                &Rc::new(RefCell::new(PeriodicLog::default())),
                &setup.clock
            )
        ));
}
