//! Windowing accumulator state.

use super::capability::Aggregate;
use crate::error::CapabilityError;
use std::collections::VecDeque;

/// Window geometry. `step == size` gives disjoint windows; `step < size`
/// overlaps consecutive windows by `size - step` items.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSpec {
    pub size: usize,
    pub step: usize,
}

impl WindowSpec {
    pub fn tumbling(size: usize) -> Self {
        Self { size, step: size }
    }

    pub fn sliding(size: usize, step: usize) -> Self {
        Self { size, step }
    }

    pub fn check(&self) -> Result<(), String> {
        if self.size == 0 {
            return Err("window size must be at least 1".to_string());
        }
        if self.step == 0 || self.step > self.size {
            return Err(format!(
                "window step {} must be within 1..={}",
                self.step, self.size
            ));
        }
        Ok(())
    }
}

/// A failed aggregate and the raw items its window retired.
#[derive(Debug)]
pub(crate) struct WindowFailure {
    pub(crate) error: CapabilityError,
    pub(crate) retired: usize,
}

/// Object-safe view of a window, so modules whose items are not `Clone`
/// don't need to be.
pub(crate) trait Accumulator<T>: Send {
    fn spec(&self) -> WindowSpec;
    /// Whether the next pushed item completes a window.
    fn completes_on_next(&self) -> bool;
    fn held(&self) -> usize;
    /// Add one item; returns the aggregate when a window fills.
    fn push(&mut self, item: T) -> Result<Option<T>, WindowFailure>;
    /// Discard the partial window, returning how many items were dropped.
    fn clear(&mut self) -> usize;
}

/// Partial window held between pulses.
pub(crate) struct WindowState<T> {
    spec: WindowSpec,
    aggregate: Box<dyn Aggregate<T>>,
    pending: VecDeque<T>,
}

impl<T> WindowState<T> {
    pub(crate) fn new(spec: WindowSpec, aggregate: Box<dyn Aggregate<T>>) -> Self {
        Self {
            spec,
            aggregate,
            pending: VecDeque::with_capacity(spec.size),
        }
    }
}

impl<T: Clone + Send> Accumulator<T> for WindowState<T> {
    fn spec(&self) -> WindowSpec {
        self.spec
    }

    fn completes_on_next(&self) -> bool {
        self.pending.len() + 1 >= self.spec.size
    }

    fn held(&self) -> usize {
        self.pending.len()
    }

    /// After an emission the first `step` items are retired and the overlap
    /// stays pending. If the aggregate fails the window is retired all the same
    /// and the failure says how many raw items went with it.
    fn push(&mut self, item: T) -> Result<Option<T>, WindowFailure> {
        self.pending.push_back(item);
        if self.pending.len() < self.spec.size {
            return Ok(None);
        }
        let window: Vec<T> = if self.spec.step == self.spec.size {
            self.pending.drain(..).collect()
        } else {
            let full = self.pending.iter().cloned().collect();
            self.pending.drain(..self.spec.step);
            full
        };
        self.aggregate
            .aggregate(window)
            .map(Some)
            .map_err(|error| WindowFailure {
                error,
                retired: self.spec.step,
            })
    }

    fn clear(&mut self) -> usize {
        let n = self.pending.len();
        self.pending.clear();
        n
    }
}
