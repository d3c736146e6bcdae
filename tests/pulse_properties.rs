//! Pulse Property Tests
//!
//! Behavioural guarantees of the pulse core, exercised through whole
//! sequences driven by a controller: bounded buffers, FIFO order,
//! backpressure, conservation, and one-stage-per-tick hand-off.

use pulse_chain::buffer::Capacity;
use pulse_chain::controller::{stop, PulseController, Quotas};
use pulse_chain::error::CapabilityError;
use pulse_chain::module::{
    aggregate_fn, consumer_fn, map_fn, producer_fn, transform_fn, Module, WindowSpec,
};
use pulse_chain::report::{PulseReport, PulseStatus};
use pulse_chain::sequence::{ModuleSpec, Sequence};
use std::collections::VecDeque;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

// ============================================================================
// Helpers
// ============================================================================

fn nz(n: usize) -> NonZeroUsize {
    NonZeroUsize::new(n).unwrap()
}

/// Source emitting 0, 1, 2, ... up to (not including) `limit`.
fn counting_source(name: &str, limit: u32) -> Module<u32> {
    let mut next = 0_u32;
    Module::source(
        name,
        producer_fn(move |max| {
            let end = next.saturating_add(max as u32).min(limit);
            let batch: Vec<u32> = (next..end).collect();
            next = end;
            Ok(batch)
        }),
    )
}

/// Source emitting one scripted batch per pulse, numbered consecutively.
fn scripted_source(name: &str, batches: Vec<u32>) -> Module<u32> {
    let mut script: VecDeque<u32> = batches.into();
    let mut next = 0_u32;
    Module::source(
        name,
        producer_fn(move |max| {
            let n = script.pop_front().unwrap_or(0).min(max as u32);
            let batch: Vec<u32> = (next..next + n).collect();
            next += n;
            Ok(batch)
        }),
    )
}

fn collecting_sink(name: &str) -> (Module<u32>, Arc<Mutex<Vec<u32>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&seen);
    let sink = Module::sink(
        name,
        consumer_fn(move |x| {
            log.lock().unwrap().push(x);
            Ok(())
        }),
    );
    (sink, seen)
}

fn assert_bounded(sequence: &Sequence<u32>) {
    for (module, stats) in sequence.buffer_stats() {
        if let Some(limit) = stats.capacity.limit() {
            assert!(
                stats.len <= limit,
                "buffer after '{module}' holds {} > {limit}",
                stats.len
            );
        }
    }
}

// ============================================================================
// Buffer bounds & FIFO
// ============================================================================

#[test]
fn bounded_buffers_never_exceed_capacity() {
    let (sink, _) = collecting_sink("sink");
    let sequence = Sequence::build(vec![
        ModuleSpec::new(counting_source("source", 500).with_quota(nz(9)), Capacity::Bounded(3)),
        // 1:3 fan-out pushes against a tight buffer
        ModuleSpec::new(
            Module::transform("triple", transform_fn(|x: u32| Ok(vec![x, x, x]))),
            Capacity::Bounded(2),
        ),
        ModuleSpec::new(Module::passthrough("relay").with_quota(nz(1)), Capacity::Bounded(4)),
        ModuleSpec::sink(sink.with_quota(nz(2))),
    ])
    .unwrap();

    let mut controller = PulseController::new(sequence);
    for _ in 0..60 {
        controller.run_once(&Quotas::configured());
        assert_bounded(controller.sequence());
    }
}

#[test]
fn fifo_order_survives_backpressure_and_varying_quotas() {
    let (sink, seen) = collecting_sink("sink");
    let sequence = Sequence::build(vec![
        ModuleSpec::new(counting_source("source", 200), Capacity::Bounded(7)),
        ModuleSpec::new(Module::passthrough("a"), Capacity::Bounded(3)),
        ModuleSpec::new(
            Module::transform("double", map_fn(|x: u32| x * 2)),
            Capacity::Bounded(5),
        ),
        ModuleSpec::sink(sink),
    ])
    .unwrap();

    let mut controller = PulseController::new(sequence);
    for tick in 0..400_usize {
        let quotas = Quotas::uniform(nz(tick % 6 + 1));
        controller.run_once(&quotas);
    }

    let expected: Vec<u32> = (0..200).map(|x| x * 2).collect();
    assert_eq!(*seen.lock().unwrap(), expected);
}

// ============================================================================
// No-op pulses & conservation
// ============================================================================

#[test]
fn empty_input_is_a_noop_pulse() {
    let (sink, seen) = collecting_sink("sink");
    let sequence = Sequence::build(vec![
        ModuleSpec::new(counting_source("source", 0), Capacity::Bounded(16)),
        ModuleSpec::new(Module::passthrough("relay"), Capacity::Bounded(16)),
        ModuleSpec::sink(sink),
    ])
    .unwrap();

    let mut controller = PulseController::new(sequence);
    for _ in 0..3 {
        let report = controller.run_once(&Quotas::configured());
        for m in &report.modules {
            assert_eq!(m.consumed, 0, "{}", m.module);
            assert_eq!(m.produced, 0, "{}", m.module);
            assert_eq!(m.errors, 0, "{}", m.module);
            assert_eq!(m.status, PulseStatus::Starved, "{}", m.module);
        }
        assert!(report.is_idle());
    }
    assert_eq!(controller.sequence().in_flight(), 0);
    assert!(seen.lock().unwrap().is_empty());
}

#[test]
fn passthrough_conserves_items() {
    let (sink, _) = collecting_sink("sink");
    let sequence = Sequence::build(vec![
        ModuleSpec::new(counting_source("source", 1_000), Capacity::Bounded(16)),
        ModuleSpec::new(Module::passthrough("relay").with_quota(nz(7)), Capacity::Unbounded),
        ModuleSpec::sink(sink.with_quota(nz(3))),
    ])
    .unwrap();

    let mut controller = PulseController::new(sequence);
    let (mut consumed, mut produced) = (0, 0);
    for _ in 0..50 {
        let report = controller.run_once(&Quotas::configured());
        let relay = report.module("relay").unwrap();
        consumed += relay.consumed;
        produced += relay.produced;
        assert_eq!(relay.shortfall, 0);
    }
    assert!(consumed > 0);
    assert_eq!(consumed, produced);
}

// ============================================================================
// Backpressure
// ============================================================================

/// source(quota 10) → capacity-5 buffer → passthrough → sink
#[test]
fn full_buffer_reports_shortfall_then_refills() {
    let (sink, seen) = collecting_sink("sink");
    let sequence = Sequence::build(vec![
        ModuleSpec::new(counting_source("source", 1_000).with_quota(nz(10)), Capacity::Bounded(5)),
        ModuleSpec::new(Module::passthrough("relay").with_quota(nz(10)), Capacity::Unbounded),
        ModuleSpec::sink(sink.with_quota(nz(10))),
    ])
    .unwrap();
    let mut controller = PulseController::new(sequence);
    let quotas = Quotas::configured();
    let source_buffer = |c: &PulseController<u32>| c.sequence().module("source").unwrap().output().unwrap().len();

    // tick 1: only five slots free
    let r1 = controller.run_once(&quotas);
    let source = r1.module("source").unwrap();
    assert_eq!(source.produced, 5);
    assert_eq!(source.shortfall, 5);
    assert_eq!(source.status, PulseStatus::Blocked);
    assert_eq!(source_buffer(&controller), 5);

    // tick 2: still full while the relay drains it
    let r2 = controller.run_once(&quotas);
    assert_eq!(r2.module("source").unwrap().produced, 0);
    assert_eq!(r2.module("source").unwrap().shortfall, 10);
    assert_eq!(r2.module("relay").unwrap().consumed, 5);
    assert_eq!(source_buffer(&controller), 0);

    // tick 3: the shortfall is retried and the buffer refills
    let r3 = controller.run_once(&quotas);
    assert_eq!(r3.module("source").unwrap().produced, 5);
    assert_eq!(source_buffer(&controller), 5);
    assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2, 3, 4]);
}

#[test]
fn blocked_fan_out_is_carried_not_dropped() {
    let (sink, seen) = collecting_sink("sink");
    let sequence = Sequence::build(vec![
        ModuleSpec::new(counting_source("source", 6), Capacity::Unbounded),
        ModuleSpec::new(
            Module::transform("pair", transform_fn(|x: u32| Ok(vec![x * 10, x * 10 + 1]))),
            Capacity::Bounded(3),
        ),
        ModuleSpec::sink(sink.with_quota(nz(2))),
    ])
    .unwrap();

    let mut controller = PulseController::new(sequence);
    let mut carried_seen = false;
    for _ in 0..30 {
        let report = controller.run_once(&Quotas::configured());
        let pair = report.module("pair").unwrap();
        assert_eq!(pair.dropped, 0);
        carried_seen |= pair.carried > 0;
    }

    assert!(carried_seen, "fan-out should have hit the full buffer");
    let expected: Vec<u32> = (0..6).flat_map(|x| [x * 10, x * 10 + 1]).collect();
    assert_eq!(*seen.lock().unwrap(), expected);
}

// ============================================================================
// Temporal isolation
// ============================================================================

#[test]
fn items_move_one_stage_per_invocation() {
    let (sink, seen) = collecting_sink("sink");
    let sequence = Sequence::build(vec![
        ModuleSpec::new(counting_source("source", 1), Capacity::Unbounded),
        ModuleSpec::new(Module::passthrough("a"), Capacity::Unbounded),
        ModuleSpec::new(Module::passthrough("b"), Capacity::Unbounded),
        ModuleSpec::sink(sink),
    ])
    .unwrap();
    let mut controller = PulseController::new(sequence);
    let quotas = Quotas::configured();

    let consumed = |report: &PulseReport, name: &str| report.module(name).unwrap().consumed;

    let r1 = controller.run_once(&quotas);
    assert_eq!(r1.module("source").unwrap().produced, 1);
    assert_eq!(consumed(&r1, "a"), 0);

    let r2 = controller.run_once(&quotas);
    assert_eq!(consumed(&r2, "a"), 1);
    assert_eq!(consumed(&r2, "b"), 0);

    let r3 = controller.run_once(&quotas);
    assert_eq!(consumed(&r3, "b"), 1);
    assert!(seen.lock().unwrap().is_empty());

    let r4 = controller.run_once(&quotas);
    assert_eq!(consumed(&r4, "sink"), 1);
    assert_eq!(*seen.lock().unwrap(), vec![0]);
}

// ============================================================================
// Windows
// ============================================================================

#[test]
fn window_of_four_fed_four_four_two() {
    let (sink, seen) = collecting_sink("sink");
    let sum = aggregate_fn(|window: Vec<u32>| Ok(window.iter().sum::<u32>()));
    let sequence = Sequence::build(vec![
        ModuleSpec::new(scripted_source("source", vec![4, 4, 2]), Capacity::Unbounded),
        ModuleSpec::new(
            Module::window("stack", WindowSpec::tumbling(4), sum),
            Capacity::Unbounded,
        ),
        ModuleSpec::sink(sink),
    ])
    .unwrap();
    let mut controller = PulseController::new(sequence);

    // the window sees each batch one tick after the source emits it
    let summary = controller.run_until(stop::after_ticks(5));
    assert_eq!(summary.ticks, 5);

    let stack = controller.sequence().module("stack").unwrap();
    assert_eq!(stack.totals().consumed, 10);
    assert_eq!(stack.totals().produced, 2);
    assert_eq!(stack.held(), 2);
    assert_eq!(*seen.lock().unwrap(), vec![0 + 1 + 2 + 3, 4 + 5 + 6 + 7]);
}

#[test]
fn sliding_window_overlaps() {
    let (sink, seen) = collecting_sink("sink");
    let first = aggregate_fn(|window: Vec<u32>| Ok(window[0] * 100 + window[window.len() - 1]));
    let sequence = Sequence::build(vec![
        ModuleSpec::new(counting_source("source", 6), Capacity::Unbounded),
        ModuleSpec::new(
            Module::window("slide", WindowSpec::sliding(3, 1), first),
            Capacity::Unbounded,
        ),
        ModuleSpec::sink(sink),
    ])
    .unwrap();
    let mut controller = PulseController::new(sequence);
    controller.run_until(stop::when_idle(2));

    // windows [0..3), [1..4), [2..5), [3..6)
    assert_eq!(*seen.lock().unwrap(), vec![2, 103, 204, 305]);
}

// ============================================================================
// Failure isolation
// ============================================================================

#[test]
fn item_errors_are_skipped_and_counted() {
    let (sink, seen) = collecting_sink("sink");
    let sequence = Sequence::build(vec![
        ModuleSpec::new(counting_source("source", 10), Capacity::Unbounded),
        ModuleSpec::new(
            Module::transform(
                "odd_only",
                transform_fn(|x: u32| {
                    if x % 2 == 0 {
                        Err(CapabilityError::item(format!("{x} is even")))
                    } else {
                        Ok(vec![x])
                    }
                }),
            ),
            Capacity::Unbounded,
        ),
        ModuleSpec::sink(sink),
    ])
    .unwrap();
    let mut controller = PulseController::new(sequence);
    let summary = controller.run_until(stop::when_idle(2));

    assert_eq!(summary.errors, 5);
    assert_eq!(summary.dropped, 5);
    assert!(summary.degraded.is_empty());
    assert_eq!(*seen.lock().unwrap(), vec![1, 3, 5, 7, 9]);
}

#[test]
fn fatal_module_is_isolated_until_reset() {
    let (sink, seen) = collecting_sink("sink");
    let armed = Arc::new(Mutex::new(true));
    let trip = Arc::clone(&armed);
    let sequence = Sequence::build(vec![
        ModuleSpec::new(counting_source("source", 4), Capacity::Unbounded),
        ModuleSpec::new(
            Module::transform(
                "fragile",
                transform_fn(move |x: u32| {
                    if *trip.lock().unwrap() {
                        Err(CapabilityError::unavailable("model unloaded"))
                    } else {
                        Ok(vec![x])
                    }
                }),
            ),
            Capacity::Unbounded,
        ),
        ModuleSpec::sink(sink),
    ])
    .unwrap();
    let mut controller = PulseController::new(sequence);
    let quotas = Quotas::configured();

    controller.run_once(&quotas);
    let r2 = controller.run_once(&quotas);
    let fragile = r2.module("fragile").unwrap();
    assert_eq!(fragile.status, PulseStatus::Failed);
    assert!(fragile.fatal.is_some());
    // the other modules still ran in the same invocation
    assert_eq!(r2.module("sink").unwrap().status, PulseStatus::Starved);

    let r3 = controller.run_once(&quotas);
    assert_eq!(r3.module("fragile").unwrap().status, PulseStatus::Skipped);
    assert_eq!(r3.module("fragile").unwrap().consumed, 0);

    *armed.lock().unwrap() = false;
    controller.sequence_mut().reset("fragile").unwrap();
    controller.run_until(stop::when_idle(2));

    // the item in flight when the module failed was dropped
    assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3]);
    assert!(!controller.sequence().module("fragile").unwrap().is_degraded());
}
