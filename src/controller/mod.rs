//! Pulse controller: drives a [`Sequence`] one invocation at a time.
//!
//! ## One invocation (`run_once`)
//!
//! ```text
//!   quotas ──▶ pulse(source) ─▶ pulse(stage 1) ─▶ … ─▶ pulse(sink)
//!                                                        │
//!                           commit every buffer ◀────────┘
//!                                  │
//!                     PulseReport ─┴─▶ report sinks ─▶ caller
//! ```
//!
//! Every healthy module is pulsed exactly once, in source-to-sink order.
//! Buffers are committed only after the last pulse, so an item produced in
//! invocation *k* is first visible downstream in invocation *k + 1*.
//!
//! In [`ExecutionMode::Parallel`] the sequence is cut into contiguous waves
//! of modules that share no buffer; each wave runs on the rayon pool and the
//! waves run in order, which yields the same result as the sequential
//! schedule.

mod observe;
mod quota;
pub mod stop;

pub use observe::{JsonLinesSink, ReportSink, TracingReportSink};
pub use quota::{AdaptiveQuotas, ModuleLoad, QuotaPolicy, Quotas, StaticQuotas};

use crate::module::Module;
use crate::report::{PulseReport, RunSummary};
use crate::sequence::Sequence;
use chrono::Utc;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::ops::Range;
use std::time::Instant;
use tracing::{debug, info, warn};

/// How the modules of one invocation are scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// One thread, one module after another.
    #[default]
    Sequential,
    /// Buffer-disjoint waves on the rayon thread pool.
    Parallel,
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionMode::Sequential => write!(f, "sequential"),
            ExecutionMode::Parallel => write!(f, "parallel"),
        }
    }
}

/// Drives repeated bounded pulses across a sequence.
pub struct PulseController<T> {
    sequence: Sequence<T>,
    mode: ExecutionMode,
    policy: Box<dyn QuotaPolicy>,
    sinks: Vec<Box<dyn ReportSink>>,
    tick: u64,
    last_report: Option<PulseReport>,
}

impl<T: Send + 'static> PulseController<T> {
    pub fn new(sequence: Sequence<T>) -> Self {
        Self {
            sequence,
            mode: ExecutionMode::Sequential,
            policy: Box::new(StaticQuotas::new()),
            sinks: Vec::new(),
            tick: 0,
            last_report: None,
        }
    }

    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_policy(mut self, policy: impl QuotaPolicy + 'static) -> Self {
        self.policy = Box::new(policy);
        self
    }

    pub fn with_sink(mut self, sink: impl ReportSink + 'static) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }

    pub fn add_sink(&mut self, sink: Box<dyn ReportSink>) {
        self.sinks.push(sink);
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    pub fn policy_name(&self) -> &'static str {
        self.policy.name()
    }

    /// Invocations run so far.
    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn last_report(&self) -> Option<&PulseReport> {
        self.last_report.as_ref()
    }

    pub fn sequence(&self) -> &Sequence<T> {
        &self.sequence
    }

    /// Mutable access for edits between runs.
    pub fn sequence_mut(&mut self) -> &mut Sequence<T> {
        &mut self.sequence
    }

    pub fn into_sequence(self) -> Sequence<T> {
        self.sequence
    }

    /// Quotas the configured policy picks for the next invocation.
    pub fn next_quotas(&mut self) -> Quotas {
        let load: Vec<ModuleLoad> = self
            .sequence
            .modules_in_order()
            .map(|m| ModuleLoad {
                name: m.name().to_string(),
                configured: m.config().quota,
                queued: m.queued(),
            })
            .collect();
        self.policy.next_quotas(&load, self.last_report.as_ref())
    }

    /// One invocation: pulse every module once, commit every buffer, report.
    pub fn run_once(&mut self, quotas: &Quotas) -> PulseReport {
        self.tick += 1;
        let started_at = Utc::now();
        let started = Instant::now();

        let resolved: Vec<NonZeroUsize> = self
            .sequence
            .modules_in_order()
            .map(|m| quotas.resolve(m.name(), m.config().quota))
            .collect();

        let modules = self.sequence.modules_mut();
        let mut reports = match self.mode {
            ExecutionMode::Sequential => modules
                .iter_mut()
                .zip(&resolved)
                .map(|(module, &quota)| module.pulse(quota))
                .collect::<Vec<_>>(),
            ExecutionMode::Parallel => {
                let mut reports = Vec::with_capacity(modules.len());
                for wave in waves(modules) {
                    let quotas = &resolved[wave.clone()];
                    let wave_reports: Vec<_> = modules[wave]
                        .par_iter_mut()
                        .zip(quotas.par_iter())
                        .map(|(module, &quota)| module.pulse(quota))
                        .collect();
                    reports.extend(wave_reports);
                }
                reports
            }
        };

        for link in self.sequence.links() {
            link.commit();
        }
        for (report, module) in reports.iter_mut().zip(self.sequence.modules_in_order()) {
            report.queued = module.queued();
        }

        let report = PulseReport {
            tick: self.tick,
            started_at,
            elapsed: started.elapsed(),
            modules: reports,
        };

        for sink in &mut self.sinks {
            sink.record(&report);
        }
        self.last_report = Some(report.clone());
        report
    }

    /// Run invocations until `stop` says so. `stop` sees each report after
    /// the invocation completes, never mid-invocation.
    pub fn run_until(&mut self, mut stop: impl FnMut(&PulseReport) -> bool) -> RunSummary {
        let mut summary = RunSummary::default();
        info!(
            modules = self.sequence.len(),
            mode = %self.mode,
            policy = self.policy.name(),
            "Pulse run starting"
        );

        loop {
            let quotas = self.next_quotas();
            let report = self.run_once(&quotas);
            summary.absorb(&report);
            for failed in report.newly_degraded() {
                warn!(tick = report.tick, module = %failed.module, "Module degraded during run");
            }
            if stop(&report) {
                break;
            }
        }

        info!(
            ticks = summary.ticks,
            consumed = summary.consumed,
            produced = summary.produced,
            errors = summary.errors,
            degraded = summary.degraded.len(),
            "Pulse run finished"
        );
        summary
    }
}

/// Contiguous ranges of modules whose buffers are pairwise disjoint.
fn waves<T>(modules: &[Module<T>]) -> Vec<Range<usize>> {
    let mut waves = Vec::new();
    let mut start = 0;
    let mut touched: HashSet<u64> = HashSet::new();

    for (i, module) in modules.iter().enumerate() {
        let ids: Vec<u64> = module
            .inputs()
            .iter()
            .chain(module.output())
            .map(|link| link.id())
            .collect();
        if ids.iter().any(|id| touched.contains(id)) {
            waves.push(start..i);
            start = i;
            touched.clear();
        }
        touched.extend(ids);
    }
    if start < modules.len() {
        waves.push(start..modules.len());
    }
    debug!(waves = waves.len(), "Parallel schedule computed");
    waves
}
