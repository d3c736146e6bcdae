//! Per-module quota resolution.
//!
//! [`Quotas`] is what one controller invocation runs with. A
//! [`QuotaPolicy`] decides the quotas for the next invocation, given the
//! current load and the previous report.

use crate::report::PulseReport;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use tracing::debug;

/// Quota overrides by module name. Modules without an entry use their
/// configured quota.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Quotas {
    uniform: Option<NonZeroUsize>,
    by_module: HashMap<String, NonZeroUsize>,
}

impl Quotas {
    /// Every module runs with its configured quota.
    pub fn configured() -> Self {
        Self::default()
    }

    /// Every module without an explicit entry runs with `quota`.
    pub fn uniform(quota: NonZeroUsize) -> Self {
        Self {
            uniform: Some(quota),
            by_module: HashMap::new(),
        }
    }

    pub fn with(mut self, module: impl Into<String>, quota: NonZeroUsize) -> Self {
        self.set(module, quota);
        self
    }

    pub fn set(&mut self, module: impl Into<String>, quota: NonZeroUsize) {
        self.by_module.insert(module.into(), quota);
    }

    pub fn get(&self, module: &str) -> Option<NonZeroUsize> {
        self.by_module.get(module).copied().or(self.uniform)
    }

    /// Quota for `module`, falling back to `configured`.
    pub fn resolve(&self, module: &str, configured: NonZeroUsize) -> NonZeroUsize {
        self.get(module).unwrap_or(configured)
    }

    pub fn len(&self) -> usize {
        self.by_module.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_module.is_empty() && self.uniform.is_none()
    }
}

/// What a policy knows about one module before an invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleLoad {
    pub name: String,
    /// Quota from the module's own configuration.
    pub configured: NonZeroUsize,
    /// Visible items waiting on its input(s).
    pub queued: usize,
}

/// Decides each invocation's quotas.
pub trait QuotaPolicy: Send {
    fn name(&self) -> &'static str;

    fn next_quotas(&mut self, load: &[ModuleLoad], last: Option<&PulseReport>) -> Quotas;
}

/// Configured quotas, optionally overridden per module.
#[derive(Debug, Clone, Default)]
pub struct StaticQuotas {
    overrides: Quotas,
}

impl StaticQuotas {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_overrides(overrides: Quotas) -> Self {
        Self { overrides }
    }
}

impl QuotaPolicy for StaticQuotas {
    fn name(&self) -> &'static str {
        "static"
    }

    fn next_quotas(&mut self, _load: &[ModuleLoad], _last: Option<&PulseReport>) -> Quotas {
        self.overrides.clone()
    }
}

/// Boosts modules that are falling behind.
///
/// A module that consumed its whole quota last invocation and still has
/// input queued gets `min(base + queued, base * max_boost)` next invocation.
/// Everything else runs at its base quota.
#[derive(Debug, Clone)]
pub struct AdaptiveQuotas {
    max_boost: NonZeroUsize,
    base: Quotas,
}

impl AdaptiveQuotas {
    pub fn new(max_boost: NonZeroUsize) -> Self {
        Self {
            max_boost,
            base: Quotas::default(),
        }
    }

    pub fn with_base(mut self, base: Quotas) -> Self {
        self.base = base;
        self
    }
}

impl QuotaPolicy for AdaptiveQuotas {
    fn name(&self) -> &'static str {
        "adaptive"
    }

    fn next_quotas(&mut self, load: &[ModuleLoad], last: Option<&PulseReport>) -> Quotas {
        let mut quotas = self.base.clone();
        let Some(last) = last else {
            return quotas;
        };

        for module in load {
            let base = self.base.resolve(&module.name, module.configured);
            let saturated = last
                .module(&module.name)
                .is_some_and(|r| r.consumed >= r.quota);
            if !saturated || module.queued == 0 {
                continue;
            }
            let ceiling = base.saturating_mul(self.max_boost);
            let boosted = base.saturating_add(module.queued).min(ceiling);
            if boosted > base {
                debug!(
                    module = %module.name,
                    base = base.get(),
                    boosted = boosted.get(),
                    queued = module.queued,
                    "Quota boosted"
                );
                quotas.set(module.name.clone(), boosted);
            }
        }
        quotas
    }
}
