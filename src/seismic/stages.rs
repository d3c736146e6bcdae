//! Packet stacking, mean removal and the catalog sink.

use super::{SeismicItem, Trace};
use crate::error::CapabilityError;
use crate::module::{Aggregate, Consumer, Transform};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info};

// ============================================================================
// TraceMerge
// ============================================================================

/// Concatenates a window of consecutive packets from one stream into a
/// single longer trace.
#[derive(Debug, Default, Clone, Copy)]
pub struct TraceMerge;

impl Aggregate<SeismicItem> for TraceMerge {
    fn aggregate(&mut self, window: Vec<SeismicItem>) -> Result<SeismicItem, CapabilityError> {
        let mut traces = window.into_iter().map(|item| match item {
            SeismicItem::Trace(t) => Ok(t),
            SeismicItem::Pick(_) => Err(CapabilityError::item("cannot merge a pick into a trace")),
        });

        let mut merged: Trace = traces
            .next()
            .ok_or_else(|| CapabilityError::item("empty window"))??;

        for next in traces {
            let next = next?;
            if next.stream_id() != merged.stream_id() {
                return Err(CapabilityError::item(format!(
                    "stream mismatch: {} then {}",
                    merged.stream_id(),
                    next.stream_id()
                )));
            }
            if (next.sample_rate - merged.sample_rate).abs() > f64::EPSILON {
                return Err(CapabilityError::item(format!(
                    "{}: sample rate changed from {} to {} Hz",
                    merged.stream_id(),
                    merged.sample_rate,
                    next.sample_rate
                )));
            }
            merged.samples.extend(next.samples);
        }
        Ok(merged.into())
    }
}

// ============================================================================
// Demean
// ============================================================================

/// Removes the DC offset of each trace. Picks pass through untouched.
#[derive(Debug, Default, Clone, Copy)]
pub struct Demean;

impl Transform<SeismicItem> for Demean {
    fn apply(&mut self, item: SeismicItem, out: &mut Vec<SeismicItem>) -> Result<(), CapabilityError> {
        let item = match item {
            SeismicItem::Trace(mut trace) => {
                if trace.samples.iter().any(|s| !s.is_finite()) {
                    return Err(CapabilityError::item(format!(
                        "{}: non-finite sample",
                        trace.stream_id()
                    )));
                }
                let mean = trace.mean();
                trace.samples.iter_mut().for_each(|s| *s -= mean);
                SeismicItem::Trace(trace)
            }
            pick @ SeismicItem::Pick(_) => pick,
        };
        out.push(item);
        Ok(())
    }
}

// ============================================================================
// Catalog
// ============================================================================

#[derive(Debug, Default)]
struct CatalogState {
    items: VecDeque<SeismicItem>,
    picks: u64,
    traces: u64,
}

/// Terminal stage: logs picks and keeps the most recent items in memory.
pub struct Catalog {
    name: String,
    retain: usize,
    state: Arc<Mutex<CatalogState>>,
}

/// Read side of a [`Catalog`], usable after the catalog moved into a module.
#[derive(Clone)]
pub struct CatalogHandle {
    state: Arc<Mutex<CatalogState>>,
}

impl Catalog {
    pub fn new(name: impl Into<String>, retain: usize) -> Self {
        Self {
            name: name.into(),
            retain,
            state: Arc::new(Mutex::new(CatalogState::default())),
        }
    }

    pub fn handle(&self) -> CatalogHandle {
        CatalogHandle {
            state: Arc::clone(&self.state),
        }
    }
}

impl Consumer<SeismicItem> for Catalog {
    fn deliver(&mut self, item: SeismicItem) -> Result<(), CapabilityError> {
        match &item {
            SeismicItem::Pick(p) => info!(
                catalog = %self.name,
                station = %p.station,
                channel = %p.channel,
                time = %p.time,
                ratio = format_args!("{:.2}", p.ratio),
                "Pick declared"
            ),
            SeismicItem::Trace(t) => debug!(
                catalog = %self.name,
                stream = %t.stream_id(),
                samples = t.len(),
                "Trace archived"
            ),
        }

        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        match item {
            SeismicItem::Pick(_) => state.picks += 1,
            SeismicItem::Trace(_) => state.traces += 1,
        }
        if self.retain > 0 {
            if state.items.len() == self.retain {
                state.items.pop_front();
            }
            state.items.push_back(item);
        }
        Ok(())
    }
}

impl CatalogHandle {
    fn with<R>(&self, f: impl FnOnce(&CatalogState) -> R) -> R {
        f(&self.state.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Picks delivered over the catalog's lifetime.
    pub fn pick_count(&self) -> u64 {
        self.with(|s| s.picks)
    }

    /// Traces delivered over the catalog's lifetime.
    pub fn trace_count(&self) -> u64 {
        self.with(|s| s.traces)
    }

    /// Retained items, oldest first.
    pub fn items(&self) -> Vec<SeismicItem> {
        self.with(|s| s.items.iter().cloned().collect())
    }

    pub fn picks(&self) -> Vec<super::Pick> {
        self.with(|s| s.items.iter().filter_map(SeismicItem::as_pick).cloned().collect())
    }
}
