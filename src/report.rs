//! Pulse statistics.
//!
//! A [`ModuleReport`] describes one module's pulse; a [`PulseReport`] collects
//! every module's report for one controller invocation. Reports are plain
//! values, produced fresh each tick and never retained by the core beyond the
//! most recent one.

use crate::error::ModuleFatal;
use crate::module::ModuleKind;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;

/// How a module's pulse ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PulseStatus {
    /// Used its whole quota.
    Completed,
    /// Ran out of input before the quota (includes the zero-input no-op).
    Starved,
    /// Output buffer filled up before the quota.
    Blocked,
    /// Hit a fatal failure during this pulse and is now degraded.
    Failed,
    /// Already degraded; not pulsed.
    Skipped,
}

impl std::fmt::Display for PulseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PulseStatus::Completed => write!(f, "completed"),
            PulseStatus::Starved => write!(f, "starved"),
            PulseStatus::Blocked => write!(f, "blocked"),
            PulseStatus::Failed => write!(f, "failed"),
            PulseStatus::Skipped => write!(f, "skipped"),
        }
    }
}

/// One module's pulse.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModuleReport {
    pub module: String,
    pub kind: ModuleKind,
    pub quota: usize,
    /// Items taken from the input buffer(s).
    pub consumed: usize,
    /// Items pushed to the output buffer, or delivered by a sink.
    pub produced: usize,
    /// Capability failures (item-local and fatal).
    pub errors: usize,
    /// Items discarded because of a failure.
    pub dropped: usize,
    /// Quota left unused because the output buffer was full.
    pub shortfall: usize,
    /// Outputs held inside the module waiting for buffer space.
    pub carried: usize,
    /// Visible input items left after the invocation committed.
    pub queued: usize,
    pub status: PulseStatus,
    pub fatal: Option<ModuleFatal>,
    pub elapsed: Duration,
}

impl ModuleReport {
    pub(crate) fn new(module: &str, kind: ModuleKind, quota: usize) -> Self {
        Self {
            module: module.to_string(),
            kind,
            quota,
            consumed: 0,
            produced: 0,
            errors: 0,
            dropped: 0,
            shortfall: 0,
            carried: 0,
            queued: 0,
            status: PulseStatus::Starved,
            fatal: None,
            elapsed: Duration::ZERO,
        }
    }

    /// Nothing moved in or out.
    pub fn is_idle(&self) -> bool {
        self.consumed == 0 && self.produced == 0
    }

    pub fn is_blocked(&self) -> bool {
        self.status == PulseStatus::Blocked
    }
}

/// One controller invocation across the whole sequence.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PulseReport {
    /// 1-based invocation counter.
    pub tick: u64,
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
    /// In source-to-sink order.
    pub modules: Vec<ModuleReport>,
}

impl PulseReport {
    pub fn module(&self, name: &str) -> Option<&ModuleReport> {
        self.modules.iter().find(|m| m.module == name)
    }

    pub fn total_consumed(&self) -> usize {
        self.modules.iter().map(|m| m.consumed).sum()
    }

    pub fn total_produced(&self) -> usize {
        self.modules.iter().map(|m| m.produced).sum()
    }

    pub fn total_errors(&self) -> usize {
        self.modules.iter().map(|m| m.errors).sum()
    }

    pub fn total_dropped(&self) -> usize {
        self.modules.iter().map(|m| m.dropped).sum()
    }

    pub fn total_shortfall(&self) -> usize {
        self.modules.iter().map(|m| m.shortfall).sum()
    }

    /// Modules that went fatal during this invocation.
    pub fn newly_degraded(&self) -> impl Iterator<Item = &ModuleReport> {
        self.modules.iter().filter(|m| m.status == PulseStatus::Failed)
    }

    /// Modules that are degraded after this invocation (new or already skipped).
    pub fn degraded(&self) -> impl Iterator<Item = &ModuleReport> {
        self.modules
            .iter()
            .filter(|m| matches!(m.status, PulseStatus::Failed | PulseStatus::Skipped))
    }

    pub fn any_fatal(&self) -> bool {
        self.newly_degraded().next().is_some()
    }

    /// No module moved any item.
    pub fn is_idle(&self) -> bool {
        self.modules.iter().all(ModuleReport::is_idle)
    }
}

/// Totals over a `run_until` loop.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    pub ticks: u64,
    pub consumed: usize,
    pub produced: usize,
    pub errors: usize,
    pub dropped: usize,
    pub shortfall: usize,
    /// Names of modules that went fatal during the run, in order of failure.
    pub degraded: Vec<String>,
    pub elapsed: Duration,
}

impl RunSummary {
    pub fn absorb(&mut self, report: &PulseReport) {
        self.ticks += 1;
        self.consumed += report.total_consumed();
        self.produced += report.total_produced();
        self.errors += report.total_errors();
        self.dropped += report.total_dropped();
        self.shortfall += report.total_shortfall();
        self.elapsed += report.elapsed;
        self.degraded
            .extend(report.newly_degraded().map(|m| m.module.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(modules: Vec<ModuleReport>) -> PulseReport {
        PulseReport {
            tick: 1,
            started_at: Utc::now(),
            elapsed: Duration::from_millis(2),
            modules,
        }
    }

    #[test]
    fn totals_sum_modules() {
        let mut a = ModuleReport::new("a", ModuleKind::Source, 10);
        a.produced = 5;
        a.shortfall = 5;
        let mut b = ModuleReport::new("b", ModuleKind::Sink, 10);
        b.consumed = 3;
        b.produced = 2;
        b.errors = 1;
        b.dropped = 1;
        let r = report(vec![a, b]);
        assert_eq!(r.total_produced(), 7);
        assert_eq!(r.total_consumed(), 3);
        assert_eq!(r.total_shortfall(), 5);
        assert_eq!(r.total_dropped(), 1);
        assert!(!r.is_idle());
    }

    #[test]
    fn fatal_detection() {
        let mut a = ModuleReport::new("a", ModuleKind::Transform, 1);
        a.status = PulseStatus::Failed;
        a.fatal = Some(ModuleFatal::Capability("gone".into()));
        let mut b = ModuleReport::new("b", ModuleKind::Sink, 1);
        b.status = PulseStatus::Skipped;
        let r = report(vec![a, b]);
        assert!(r.any_fatal());
        assert_eq!(r.degraded().count(), 2);
        assert_eq!(r.newly_degraded().count(), 1);
    }

    #[test]
    fn summary_accumulates() {
        let mut a = ModuleReport::new("a", ModuleKind::Source, 4);
        a.produced = 4;
        let r = report(vec![a]);
        let mut summary = RunSummary::default();
        summary.absorb(&r);
        summary.absorb(&r);
        assert_eq!(summary.ticks, 2);
        assert_eq!(summary.produced, 8);
        assert!(summary.degraded.is_empty());
    }
}
