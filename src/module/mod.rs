//! Modules: the unit of work in a pulse chain.
//!
//! Every module exposes one operation, [`Module::pulse`], which performs at
//! most `quota` units of work and returns a [`ModuleReport`]. A pulse never
//! blocks: it stops early when its input runs dry (starved) or its output
//! buffer fills (blocked), and picks up where it left off on the next pulse.
//!
//! ## Built-in kinds
//!
//! ```text
//! Source       producer(max)      ──▶ [out]
//! Passthrough  [in] ──────────────────▶ [out]
//! Window       [in] ── N items ─▶ 1 ──▶ [out]
//! Transform    [in] ── 1 ─▶ 0..N ─────▶ [out]
//! FanIn        [in₀..inₖ] ── merge ───▶ [out]
//! Sink         [in] ──────────────────▶ consumer(item)
//! ```
//!
//! Failures are isolated to the module: an item-local error is counted and
//! skipped (or escalated, under [`ItemErrorPolicy::Abort`]); anything fatal
//! marks the module degraded and it sits out every later pulse until
//! [`Module::reset`].

pub mod capability;
mod config;
mod fan_in;
mod window;

pub use capability::{
    aggregate_fn, consumer_fn, map_fn, producer_fn, transform_fn, Aggregate, Consumer, Producer,
    Transform,
};
pub use config::{ItemErrorPolicy, ModuleConfig};
pub use fan_in::MergePolicy;
pub use window::WindowSpec;

use crate::buffer::Link;
use crate::error::{CapabilityError, ModuleFatal};
use crate::report::{ModuleReport, PulseStatus};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::num::NonZeroUsize;
use std::panic::{self, AssertUnwindSafe};
use std::time::{Duration, Instant};
use tracing::{error, warn};
use window::{Accumulator, WindowState};

/// Free-form tag naming what kind of item flows on an edge (`"trace"`, `"pick"`, ...).
pub type ItemKind = &'static str;

// ============================================================================
// Kind & Health
// ============================================================================

/// Capability tag: what sort of transformation a module performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleKind {
    Source,
    Passthrough,
    Window,
    Transform,
    FanIn,
    Sink,
}

impl ModuleKind {
    pub fn has_input(self) -> bool {
        self != ModuleKind::Source
    }

    pub fn has_output(self) -> bool {
        self != ModuleKind::Sink
    }

    pub fn accepts_many_inputs(self) -> bool {
        self == ModuleKind::FanIn
    }

    /// Kinds whose output kind is whatever they were fed.
    pub fn is_transparent(self) -> bool {
        matches!(self, ModuleKind::Passthrough | ModuleKind::FanIn)
    }
}

impl std::fmt::Display for ModuleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModuleKind::Source => write!(f, "source"),
            ModuleKind::Passthrough => write!(f, "passthrough"),
            ModuleKind::Window => write!(f, "window"),
            ModuleKind::Transform => write!(f, "transform"),
            ModuleKind::FanIn => write!(f, "fan_in"),
            ModuleKind::Sink => write!(f, "sink"),
        }
    }
}

/// Module health.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Health {
    Healthy,
    /// Excluded from scheduling until reset.
    Degraded(ModuleFatal),
}

impl std::fmt::Display for Health {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Health::Healthy => write!(f, "HEALTHY"),
            Health::Degraded(reason) => write!(f, "DEGRADED: {reason}"),
        }
    }
}

/// Lifetime counters for one module.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ModuleTotals {
    pub pulses: u64,
    pub consumed: u64,
    pub produced: u64,
    pub errors: u64,
    pub dropped: u64,
}

// ============================================================================
// Module
// ============================================================================

enum Role<T> {
    Source(Box<dyn Producer<T>>),
    Passthrough,
    Window(Box<dyn Accumulator<T>>),
    Transform(Box<dyn Transform<T>>),
    FanIn(MergePolicy),
    Sink(Box<dyn Consumer<T>>),
}

/// A named processing stage.
pub struct Module<T> {
    name: String,
    kind: ModuleKind,
    config: ModuleConfig,
    accepts: Option<ItemKind>,
    emits: Option<ItemKind>,
    role: Role<T>,
    inputs: Vec<Link<T>>,
    output: Option<Link<T>>,
    /// Outputs produced but refused by a full buffer; delivered first next pulse.
    carry: VecDeque<T>,
    health: Health,
    totals: ModuleTotals,
}

impl<T> std::fmt::Debug for Module<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Module")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("health", &self.health)
            .finish_non_exhaustive()
    }
}

impl<T: Send + 'static> Module<T> {
    fn with_role(name: impl Into<String>, kind: ModuleKind, role: Role<T>) -> Self {
        Self {
            name: name.into(),
            kind,
            config: ModuleConfig::default(),
            accepts: None,
            emits: None,
            role,
            inputs: Vec::new(),
            output: None,
            carry: VecDeque::new(),
            health: Health::Healthy,
            totals: ModuleTotals::default(),
        }
    }

    /// Entry stage fed by an external producer.
    pub fn source(name: impl Into<String>, producer: impl Producer<T> + 'static) -> Self {
        Self::with_role(name, ModuleKind::Source, Role::Source(Box::new(producer)))
    }

    /// Copies input to output unchanged.
    pub fn passthrough(name: impl Into<String>) -> Self {
        Self::with_role(name, ModuleKind::Passthrough, Role::Passthrough)
    }

    /// Emits one aggregate per full window; the partial window survives across pulses.
    pub fn window(
        name: impl Into<String>,
        spec: WindowSpec,
        aggregate: impl Aggregate<T> + 'static,
    ) -> Self
    where
        T: Clone,
    {
        let state = WindowState::new(spec, Box::new(aggregate));
        Self::with_role(name, ModuleKind::Window, Role::Window(Box::new(state)))
    }

    /// Applies an injected transformation to each item.
    pub fn transform(name: impl Into<String>, transform: impl Transform<T> + 'static) -> Self {
        Self::with_role(name, ModuleKind::Transform, Role::Transform(Box::new(transform)))
    }

    /// Merges several upstream buffers into one output.
    pub fn fan_in(name: impl Into<String>, policy: MergePolicy) -> Self {
        Self::with_role(name, ModuleKind::FanIn, Role::FanIn(policy))
    }

    /// Terminal stage delivering to an external consumer.
    pub fn sink(name: impl Into<String>, consumer: impl Consumer<T> + 'static) -> Self {
        Self::with_role(name, ModuleKind::Sink, Role::Sink(Box::new(consumer)))
    }

    pub fn with_config(mut self, config: ModuleConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_quota(mut self, quota: NonZeroUsize) -> Self {
        self.config.quota = quota;
        self
    }

    pub fn on_item_error(mut self, policy: ItemErrorPolicy) -> Self {
        self.config.on_item_error = policy;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = Some(timeout);
        self
    }

    /// Declare the item kind this module reads. Transparent kinds emit it too.
    pub fn accepting(mut self, kind: ItemKind) -> Self {
        self.accepts = Some(kind);
        if self.kind.is_transparent() {
            self.emits = Some(kind);
        }
        self
    }

    /// Declare the item kind this module writes.
    pub fn emitting(mut self, kind: ItemKind) -> Self {
        self.emits = Some(kind);
        self
    }
}

impl<T> Module<T> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ModuleKind {
        self.kind
    }

    pub fn config(&self) -> &ModuleConfig {
        &self.config
    }

    pub fn set_quota(&mut self, quota: NonZeroUsize) {
        self.config.quota = quota;
    }

    pub fn accepts(&self) -> Option<ItemKind> {
        self.accepts
    }

    pub fn emits(&self) -> Option<ItemKind> {
        self.emits
    }

    pub fn health(&self) -> &Health {
        &self.health
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self.health, Health::Degraded(_))
    }

    pub fn totals(&self) -> ModuleTotals {
        self.totals
    }

    pub fn inputs(&self) -> &[Link<T>] {
        &self.inputs
    }

    pub fn output(&self) -> Option<&Link<T>> {
        self.output.as_ref()
    }

    /// Outputs waiting inside the module for buffer space.
    pub fn carried(&self) -> usize {
        self.carry.len()
    }

    /// Raw items held in a partial window (zero for other kinds).
    pub fn held(&self) -> usize {
        match &self.role {
            Role::Window(state) => state.held(),
            _ => 0,
        }
    }

    pub fn window_spec(&self) -> Option<WindowSpec> {
        match &self.role {
            Role::Window(state) => Some(state.spec()),
            _ => None,
        }
    }

    /// Visible items across all inputs.
    pub fn queued(&self) -> usize {
        self.inputs.iter().map(Link::available).sum()
    }

    /// Clear a degradation so the controller schedules this module again.
    pub fn reset(&mut self) {
        if let Health::Degraded(reason) = &self.health {
            tracing::info!(module = %self.name, was = %reason, "Module reset to healthy");
        }
        self.health = Health::Healthy;
    }

    pub(crate) fn degrade(&mut self, reason: ModuleFatal) {
        error!(module = %self.name, kind = %self.kind, reason = %reason, "Module degraded");
        self.health = Health::Degraded(reason);
    }

    pub(crate) fn set_inputs(&mut self, inputs: Vec<Link<T>>) {
        self.inputs = inputs;
    }

    pub(crate) fn set_output(&mut self, output: Option<Link<T>>) {
        self.output = output;
    }

    pub(crate) fn take_carry(&mut self) -> Vec<T> {
        self.carry.drain(..).collect()
    }

    /// Drop a partial window. Returns how many raw items were held.
    pub(crate) fn discard_partial(&mut self) -> usize {
        match &mut self.role {
            Role::Window(state) => state.clear(),
            _ => 0,
        }
    }

    /// Run one bounded pulse.
    ///
    /// Never blocks and never fails: everything that goes wrong is in the
    /// returned report. A degraded module does no work and reports
    /// [`PulseStatus::Skipped`]. A panic inside a capability degrades the
    /// module instead of unwinding into the caller.
    pub fn pulse(&mut self, quota: NonZeroUsize) -> ModuleReport {
        let quota = quota.get();
        let mut report = ModuleReport::new(&self.name, self.kind, quota);

        if let Health::Degraded(reason) = &self.health {
            report.status = PulseStatus::Skipped;
            report.fatal = Some(reason.clone());
            report.carried = self.carry.len();
            return report;
        }

        let started = Instant::now();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            self.run(quota, started, &mut report)
        }));
        let outcome = outcome.unwrap_or_else(|payload| Err(ModuleFatal::Panicked(panic_message(&*payload))));

        match outcome {
            Ok(status) => report.status = status,
            Err(fatal) => {
                report.status = PulseStatus::Failed;
                report.fatal = Some(fatal.clone());
                self.degrade(fatal);
            }
        }

        report.elapsed = started.elapsed();
        report.carried = self.carry.len();

        self.totals.pulses += 1;
        self.totals.consumed += report.consumed as u64;
        self.totals.produced += report.produced as u64;
        self.totals.errors += report.errors as u64;
        self.totals.dropped += report.dropped as u64;
        report
    }

    fn run(
        &mut self,
        quota: usize,
        started: Instant,
        report: &mut ModuleReport,
    ) -> Result<PulseStatus, ModuleFatal> {
        let Self {
            name,
            config,
            role,
            inputs,
            output,
            carry,
            ..
        } = self;

        // Leftovers from a blocked pulse go out before any new work.
        if !flush(output.as_ref(), carry, report) {
            report.shortfall = quota;
            return Ok(PulseStatus::Blocked);
        }

        if let Role::Source(producer) = role {
            return pulse_source(
                producer.as_mut(),
                name,
                config,
                output.as_ref(),
                carry,
                quota,
                started,
                report,
            );
        }

        let mut scratch = Vec::new();
        for _ in 0..quota {
            if let Some(out) = output.as_ref() {
                let needs_room = match role {
                    Role::Window(state) => state.completes_on_next(),
                    _ => true,
                };
                if needs_room && out.remaining() == 0 {
                    report.shortfall = quota - report.consumed;
                    return Ok(PulseStatus::Blocked);
                }
            }

            let item = match role {
                Role::FanIn(policy) => policy
                    .select(inputs)
                    .and_then(|i| inputs[i].lock().pop()),
                _ => inputs.first().and_then(|input| input.lock().pop()),
            };
            let Some(item) = item else {
                return Ok(PulseStatus::Starved);
            };
            report.consumed += 1;

            scratch.clear();
            let mut lost = 1;
            let result = match role {
                Role::Passthrough | Role::FanIn(_) => {
                    scratch.push(item);
                    Ok(())
                }
                Role::Transform(transform) => transform.apply(item, &mut scratch),
                Role::Window(state) => state
                    .push(item)
                    .map(|emitted| scratch.extend(emitted))
                    .map_err(|failure| {
                        lost = failure.retired;
                        failure.error
                    }),
                Role::Sink(consumer) => consumer.deliver(item).map(|()| report.produced += 1),
                Role::Source(_) => unreachable!("sources return before the item loop"),
            };

            if let Err(err) = result {
                absorb_failure(name, config, err, lost, report)?;
            } else if !scratch.is_empty() && !deliver(output.as_ref(), carry, scratch.drain(..), report) {
                check_budget(config, started)?;
                report.shortfall = quota - report.consumed;
                return Ok(PulseStatus::Blocked);
            }

            check_budget(config, started)?;
        }

        Ok(PulseStatus::Completed)
    }
}

// ============================================================================
// Pulse helpers
// ============================================================================

#[allow(clippy::too_many_arguments)]
fn pulse_source<T>(
    producer: &mut dyn Producer<T>,
    name: &str,
    config: &ModuleConfig,
    output: Option<&Link<T>>,
    carry: &mut VecDeque<T>,
    quota: usize,
    started: Instant,
    report: &mut ModuleReport,
) -> Result<PulseStatus, ModuleFatal> {
    let room = output.map_or(quota, |out| out.remaining().min(quota));
    report.shortfall = quota - room;
    if room == 0 {
        return Ok(PulseStatus::Blocked);
    }

    let mut fresh = Vec::with_capacity(room);
    if let Err(err) = producer.produce(room, &mut fresh) {
        absorb_failure(name, config, err, 1, report)?;
    }
    let ready = fresh.len();
    deliver(output, carry, fresh.into_iter(), report);
    check_budget(config, started)?;

    Ok(if report.shortfall > 0 {
        PulseStatus::Blocked
    } else if ready < quota {
        PulseStatus::Starved
    } else {
        PulseStatus::Completed
    })
}

/// Push carried items first. Returns false if some are still waiting.
fn flush<T>(output: Option<&Link<T>>, carry: &mut VecDeque<T>, report: &mut ModuleReport) -> bool {
    let Some(out) = output else {
        return carry.is_empty();
    };
    if carry.is_empty() {
        return true;
    }
    let mut buf = out.lock();
    while let Some(item) = carry.pop_front() {
        if let Err(overflow) = buf.push(item) {
            carry.push_front(overflow.into_item());
            return false;
        }
        report.produced += 1;
    }
    true
}

/// Push fresh outputs; anything refused is carried. Returns false when blocked.
fn deliver<T>(
    output: Option<&Link<T>>,
    carry: &mut VecDeque<T>,
    items: impl Iterator<Item = T>,
    report: &mut ModuleReport,
) -> bool {
    let Some(out) = output else {
        carry.extend(items);
        return true;
    };
    let mut buf = out.lock();
    for item in items {
        if !carry.is_empty() {
            carry.push_back(item);
            continue;
        }
        match buf.push(item) {
            Ok(()) => report.produced += 1,
            Err(overflow) => carry.push_back(overflow.into_item()),
        }
    }
    carry.is_empty()
}

/// Count a capability failure and the `lost` items it took with it; escalate
/// it when it is fatal under the module's policy.
fn absorb_failure(
    name: &str,
    config: &ModuleConfig,
    err: CapabilityError,
    lost: usize,
    report: &mut ModuleReport,
) -> Result<(), ModuleFatal> {
    report.errors += 1;
    report.dropped += lost;
    match (err, config.on_item_error) {
        (CapabilityError::Item(reason), ItemErrorPolicy::Skip) => {
            warn!(module = %name, %reason, "Item failed, skipping");
            Ok(())
        }
        (CapabilityError::Item(reason), ItemErrorPolicy::Abort) => {
            Err(ModuleFatal::ItemAborted(reason))
        }
        (CapabilityError::Unavailable(reason), _) => Err(ModuleFatal::Capability(reason)),
    }
}

fn check_budget(config: &ModuleConfig, started: Instant) -> Result<(), ModuleFatal> {
    match config.timeout {
        Some(budget) => {
            let elapsed = started.elapsed();
            if elapsed > budget {
                Err(ModuleFatal::Timeout { budget, elapsed })
            } else {
                Ok(())
            }
        }
        None => Ok(()),
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::Capacity;
    use std::sync::{Arc, Mutex};

    fn nz(n: usize) -> NonZeroUsize {
        NonZeroUsize::new(n).expect("non-zero")
    }

    fn committed_link(items: impl IntoIterator<Item = u32>, capacity: Capacity) -> Link<u32> {
        let link = Link::new(capacity);
        {
            let mut buf = link.lock();
            for i in items {
                buf.push(i).expect("room for fixture");
            }
            buf.commit();
        }
        link
    }

    fn wire(mut module: Module<u32>, input: Option<Link<u32>>, output: Option<Link<u32>>) -> Module<u32> {
        module.set_inputs(input.into_iter().collect());
        module.set_output(output);
        module
    }

    fn drain(link: &Link<u32>) -> Vec<u32> {
        let mut buf = link.lock();
        buf.commit();
        buf.drain_all()
    }

    #[test]
    fn passthrough_copies_in_order() {
        let input = committed_link(0..5, Capacity::Unbounded);
        let output = Link::new(Capacity::Unbounded);
        let mut m = wire(Module::passthrough("copy"), Some(input.clone()), Some(output.clone()));

        let r = m.pulse(nz(10));
        assert_eq!(r.consumed, 5);
        assert_eq!(r.produced, 5);
        assert_eq!(r.status, PulseStatus::Starved);
        assert_eq!(drain(&output), vec![0, 1, 2, 3, 4]);
        assert!(input.is_empty());
    }

    #[test]
    fn quota_limits_work() {
        let input = committed_link(0..20, Capacity::Unbounded);
        let output = Link::new(Capacity::Unbounded);
        let mut m = wire(Module::passthrough("copy"), Some(input.clone()), Some(output));

        let r = m.pulse(nz(7));
        assert_eq!(r.consumed, 7);
        assert_eq!(r.status, PulseStatus::Completed);
        assert_eq!(input.available(), 13);
    }

    #[test]
    fn empty_input_is_a_no_op() {
        let input = committed_link([], Capacity::Bounded(4));
        let output = Link::new(Capacity::Bounded(4));
        let mut m = wire(Module::passthrough("idle"), Some(input.clone()), Some(output.clone()));

        let r = m.pulse(nz(3));
        assert!(r.is_idle());
        assert_eq!(r.errors, 0);
        assert_eq!(r.status, PulseStatus::Starved);
        assert!(input.is_empty());
        assert!(output.is_empty());
    }

    #[test]
    fn full_output_stops_early_without_dropping() {
        let input = committed_link(0..6, Capacity::Unbounded);
        let output = Link::new(Capacity::Bounded(2));
        let mut m = wire(Module::passthrough("copy"), Some(input.clone()), Some(output.clone()));

        let r = m.pulse(nz(6));
        assert_eq!(r.produced, 2);
        assert_eq!(r.shortfall, 4);
        assert_eq!(r.status, PulseStatus::Blocked);
        assert_eq!(input.available(), 4);

        assert_eq!(drain(&output), vec![0, 1]);
        let r = m.pulse(nz(6));
        assert_eq!(r.produced, 2);
        assert_eq!(drain(&output), vec![2, 3]);
    }

    #[test]
    fn fan_out_overflow_is_carried_to_next_pulse() {
        let input = committed_link([1, 2], Capacity::Unbounded);
        let output = Link::new(Capacity::Bounded(2));
        let triple = transform_fn(|x: u32| Ok(vec![x, x, x]));
        let mut m = wire(Module::transform("triple", triple), Some(input), Some(output.clone()));

        let r = m.pulse(nz(2));
        assert_eq!(r.consumed, 1);
        assert_eq!(r.produced, 2);
        assert_eq!(r.carried, 1);
        assert_eq!(r.status, PulseStatus::Blocked);
        assert_eq!(drain(&output), vec![1, 1]);

        // carried output goes out ahead of the next input item
        let r = m.pulse(nz(2));
        assert_eq!(r.consumed, 1);
        assert_eq!(r.produced, 2);
        assert_eq!(r.carried, 2);
        assert_eq!(drain(&output), vec![1, 2]);

        let r = m.pulse(nz(2));
        assert_eq!(r.produced, 2);
        assert_eq!(r.carried, 0);
        assert_eq!(drain(&output), vec![2, 2]);
    }

    #[test]
    fn item_errors_are_skipped_under_skip_policy() {
        let input = committed_link(0..5, Capacity::Unbounded);
        let output = Link::new(Capacity::Unbounded);
        let odd_fails = transform_fn(|x: u32| {
            if x % 2 == 1 {
                Err(CapabilityError::item(format!("odd {x}")))
            } else {
                Ok(vec![x])
            }
        });
        let mut m = wire(Module::transform("evens", odd_fails), Some(input), Some(output.clone()));

        let r = m.pulse(nz(5));
        assert_eq!(r.consumed, 5);
        assert_eq!(r.errors, 2);
        assert_eq!(r.dropped, 2);
        assert!(!m.is_degraded());
        assert_eq!(drain(&output), vec![0, 2, 4]);
    }

    #[test]
    fn abort_policy_degrades_on_first_item_error() {
        let input = committed_link(0..5, Capacity::Unbounded);
        let output = Link::new(Capacity::Unbounded);
        let fail_on_two = transform_fn(|x: u32| {
            if x == 2 {
                Err(CapabilityError::item("bad sample"))
            } else {
                Ok(vec![x])
            }
        });
        let mut m = wire(
            Module::transform("strict", fail_on_two).on_item_error(ItemErrorPolicy::Abort),
            Some(input.clone()),
            Some(output),
        );

        let r = m.pulse(nz(5));
        assert_eq!(r.status, PulseStatus::Failed);
        assert_eq!(r.consumed, 3);
        assert_eq!(r.fatal, Some(ModuleFatal::ItemAborted("bad sample".into())));
        assert!(m.is_degraded());
        assert_eq!(input.available(), 2);

        let r = m.pulse(nz(5));
        assert_eq!(r.status, PulseStatus::Skipped);
        assert_eq!(r.consumed, 0);

        m.reset();
        let r = m.pulse(nz(5));
        assert_eq!(r.consumed, 2);
    }

    #[test]
    fn unavailable_capability_is_fatal_even_under_skip() {
        let input = committed_link(0..3, Capacity::Unbounded);
        let gone = transform_fn(|_: u32| Err(CapabilityError::unavailable("model unloaded")));
        let mut m = wire(Module::transform("model", gone), Some(input), Some(Link::new(Capacity::Unbounded)));

        let r = m.pulse(nz(3));
        assert_eq!(r.status, PulseStatus::Failed);
        assert_eq!(r.consumed, 1);
        assert!(matches!(m.health(), Health::Degraded(ModuleFatal::Capability(_))));
    }

    #[test]
    fn panicking_capability_degrades_module() {
        let input = committed_link(0..3, Capacity::Unbounded);
        let boom = transform_fn(|x: u32| -> Result<Vec<u32>, CapabilityError> {
            if x == 1 {
                panic!("sample out of range");
            }
            Ok(vec![x])
        });
        let output = Link::new(Capacity::Unbounded);
        let mut m = wire(Module::transform("boom", boom), Some(input), Some(output.clone()));

        let r = m.pulse(nz(3));
        assert_eq!(r.status, PulseStatus::Failed);
        assert_eq!(r.produced, 1);
        assert_eq!(r.fatal, Some(ModuleFatal::Panicked("sample out of range".into())));
    }

    #[test]
    fn timeout_degrades_after_the_item_in_flight() {
        let input = committed_link(0..4, Capacity::Unbounded);
        let slow = transform_fn(|x: u32| {
            std::thread::sleep(Duration::from_millis(5));
            Ok(vec![x])
        });
        let output = Link::new(Capacity::Unbounded);
        let mut m = wire(
            Module::transform("slow", slow).with_timeout(Duration::from_millis(1)),
            Some(input),
            Some(output.clone()),
        );

        let r = m.pulse(nz(4));
        assert_eq!(r.status, PulseStatus::Failed);
        assert_eq!(r.consumed, 1);
        assert_eq!(r.produced, 1);
        assert!(matches!(r.fatal, Some(ModuleFatal::Timeout { .. })));
    }

    #[test]
    fn slow_source_degrades_past_its_budget() {
        let slow = producer_fn(|max| {
            std::thread::sleep(Duration::from_millis(20));
            Ok((0..max as u32).collect())
        });
        let output = Link::new(Capacity::Unbounded);
        let mut m = wire(
            Module::source("slow_feed", slow).with_timeout(Duration::from_millis(1)),
            None,
            Some(output.clone()),
        );

        let r = m.pulse(nz(3));
        assert_eq!(r.status, PulseStatus::Failed);
        assert_eq!(r.produced, 3);
        assert!(matches!(r.fatal, Some(ModuleFatal::Timeout { .. })));
        assert!(m.is_degraded());
        assert_eq!(m.pulse(nz(3)).status, PulseStatus::Skipped);
    }

    #[test]
    fn failed_window_counts_every_retired_item() {
        let input = committed_link(0..8, Capacity::Unbounded);
        let output = Link::new(Capacity::Unbounded);
        let clipped = aggregate_fn(|_: Vec<u32>| Err(CapabilityError::item("clipped")));
        let mut m = wire(
            Module::window("stack", WindowSpec::tumbling(4), clipped),
            Some(input),
            Some(output.clone()),
        );

        let r = m.pulse(nz(8));
        assert_eq!(r.consumed, 8);
        assert_eq!(r.errors, 2);
        assert_eq!(r.dropped, 8);
        assert_eq!(r.produced, 0);
        assert!(output.is_empty());
        assert_eq!(m.totals().dropped, 8);
    }

    #[test]
    fn source_asks_only_for_free_slots() {
        let asked = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&asked);
        let counter = producer_fn(move |max| {
            seen.lock().expect("lock").push(max);
            Ok((0..max as u32).collect())
        });
        let output = Link::new(Capacity::Bounded(5));
        let mut m = wire(Module::source("feed", counter), None, Some(output.clone()));

        let r = m.pulse(nz(10));
        assert_eq!(r.produced, 5);
        assert_eq!(r.shortfall, 5);
        assert_eq!(r.status, PulseStatus::Blocked);
        assert_eq!(*asked.lock().expect("lock"), vec![5]);

        let r = m.pulse(nz(10));
        assert_eq!(r.produced, 0);
        assert_eq!(r.shortfall, 10);
    }

    #[test]
    fn starved_source_reports_no_error() {
        let empty = producer_fn(|_| Ok(Vec::<u32>::new()));
        let output = Link::new(Capacity::Unbounded);
        let mut m = wire(Module::source("quiet", empty), None, Some(output));

        let r = m.pulse(nz(4));
        assert!(r.is_idle());
        assert_eq!(r.errors, 0);
        assert_eq!(r.status, PulseStatus::Starved);
    }

    #[test]
    fn window_holds_partial_state_across_pulses() {
        let input = committed_link(1..=6, Capacity::Unbounded);
        let output = Link::new(Capacity::Unbounded);
        let sum = aggregate_fn(|w: Vec<u32>| Ok(w.iter().sum()));
        let mut m = wire(
            Module::window("sum4", WindowSpec::tumbling(4), sum),
            Some(input),
            Some(output.clone()),
        );

        let r = m.pulse(nz(3));
        assert_eq!((r.consumed, r.produced), (3, 0));
        assert_eq!(m.held(), 3);
        let r = m.pulse(nz(3));
        assert_eq!((r.consumed, r.produced), (3, 1));
        assert_eq!(m.held(), 2);
        assert_eq!(drain(&output), vec![10]);
    }

    #[test]
    fn fan_in_merges_by_arrival() {
        let a = Link::new(Capacity::Unbounded);
        let b = Link::new(Capacity::Unbounded);
        a.lock().push(1).unwrap();
        b.lock().push(2).unwrap();
        a.lock().push(3).unwrap();
        a.commit();
        b.commit();
        let output = Link::new(Capacity::Unbounded);
        let mut m = Module::fan_in("merge", MergePolicy::Arrival);
        m.set_inputs(vec![a, b]);
        m.set_output(Some(output.clone()));

        let r = m.pulse(nz(10));
        assert_eq!(r.consumed, 3);
        assert_eq!(drain(&output), vec![1, 2, 3]);
    }

    #[test]
    fn sink_counts_deliveries_and_failures() {
        let delivered = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&delivered);
        let picky = consumer_fn(move |x: u32| {
            if x == 3 {
                return Err(CapabilityError::item("rejected by ring"));
            }
            log.lock().expect("lock").push(x);
            Ok(())
        });
        let input = committed_link(1..=4, Capacity::Unbounded);
        let mut m = wire(Module::sink("out", picky), Some(input), None);

        let r = m.pulse(nz(10));
        assert_eq!(r.consumed, 4);
        assert_eq!(r.produced, 3);
        assert_eq!(r.errors, 1);
        assert_eq!(*delivered.lock().expect("lock"), vec![1, 2, 4]);
    }

    #[test]
    fn totals_accumulate_across_pulses() {
        let input = committed_link(0..4, Capacity::Unbounded);
        let mut m = wire(
            Module::passthrough("copy"),
            Some(input),
            Some(Link::new(Capacity::Unbounded)),
        );
        m.pulse(nz(2));
        m.pulse(nz(2));
        let totals = m.totals();
        assert_eq!(totals.pulses, 2);
        assert_eq!(totals.consumed, 4);
        assert_eq!(totals.produced, 4);
    }
}
