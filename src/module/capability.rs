//! Injected capabilities: the work a module wraps.
//!
//! The core only ever talks to these traits. Each comes with a closure
//! adapter so small stages don't need a named type.
//!
//! Every capability must return promptly. A producer with nothing ready
//! yields nothing; a consumer that cannot deliver reports an error. Blocking
//! inside a capability stalls the whole tick.

use crate::error::CapabilityError;

/// Source-side adapter: pulls fresh items from an external live feed.
pub trait Producer<T>: Send {
    /// Append at most `max` ready items to `out`. Appending nothing is fine.
    ///
    /// Returns `Err(CapabilityError::Unavailable)` when the feed is gone for good.
    fn produce(&mut self, max: usize, out: &mut Vec<T>) -> Result<(), CapabilityError>;
}

/// Sink-side adapter: hands one item to an external system.
pub trait Consumer<T>: Send {
    fn deliver(&mut self, item: T) -> Result<(), CapabilityError>;
}

/// Per-item analysis step, mapping one item to zero or more outputs.
pub trait Transform<T>: Send {
    fn apply(&mut self, item: T, out: &mut Vec<T>) -> Result<(), CapabilityError>;
}

/// Folds one full window of items into a single aggregate item.
pub trait Aggregate<T>: Send {
    fn aggregate(&mut self, window: Vec<T>) -> Result<T, CapabilityError>;
}

// ============================================================================
// Closure adapters
// ============================================================================

/// [`Producer`] backed by a closure.
pub struct ProducerFn<F>(F);

/// Wrap `f(max) -> items` as a [`Producer`]. Items beyond `max` are discarded.
pub fn producer_fn<T, F>(f: F) -> ProducerFn<F>
where
    F: FnMut(usize) -> Result<Vec<T>, CapabilityError> + Send,
{
    ProducerFn(f)
}

impl<T, F> Producer<T> for ProducerFn<F>
where
    F: FnMut(usize) -> Result<Vec<T>, CapabilityError> + Send,
{
    fn produce(&mut self, max: usize, out: &mut Vec<T>) -> Result<(), CapabilityError> {
        let items = (self.0)(max)?;
        out.extend(items.into_iter().take(max));
        Ok(())
    }
}

/// [`Consumer`] backed by a closure.
pub struct ConsumerFn<F>(F);

pub fn consumer_fn<T, F>(f: F) -> ConsumerFn<F>
where
    F: FnMut(T) -> Result<(), CapabilityError> + Send,
{
    ConsumerFn(f)
}

impl<T, F> Consumer<T> for ConsumerFn<F>
where
    F: FnMut(T) -> Result<(), CapabilityError> + Send,
{
    fn deliver(&mut self, item: T) -> Result<(), CapabilityError> {
        (self.0)(item)
    }
}

/// [`Transform`] backed by a closure returning zero or more outputs.
pub struct TransformFn<F>(F);

pub fn transform_fn<T, F>(f: F) -> TransformFn<F>
where
    F: FnMut(T) -> Result<Vec<T>, CapabilityError> + Send,
{
    TransformFn(f)
}

impl<T, F> Transform<T> for TransformFn<F>
where
    F: FnMut(T) -> Result<Vec<T>, CapabilityError> + Send,
{
    fn apply(&mut self, item: T, out: &mut Vec<T>) -> Result<(), CapabilityError> {
        out.extend((self.0)(item)?);
        Ok(())
    }
}

/// Infallible 1:1 [`Transform`] backed by a closure.
pub struct MapFn<F>(F);

pub fn map_fn<T, F>(f: F) -> MapFn<F>
where
    F: FnMut(T) -> T + Send,
{
    MapFn(f)
}

impl<T, F> Transform<T> for MapFn<F>
where
    F: FnMut(T) -> T + Send,
{
    fn apply(&mut self, item: T, out: &mut Vec<T>) -> Result<(), CapabilityError> {
        out.push((self.0)(item));
        Ok(())
    }
}

/// [`Aggregate`] backed by a closure.
pub struct AggregateFn<F>(F);

pub fn aggregate_fn<T, F>(f: F) -> AggregateFn<F>
where
    F: FnMut(Vec<T>) -> Result<T, CapabilityError> + Send,
{
    AggregateFn(f)
}

impl<T, F> Aggregate<T> for AggregateFn<F>
where
    F: FnMut(Vec<T>) -> Result<T, CapabilityError> + Send,
{
    fn aggregate(&mut self, window: Vec<T>) -> Result<T, CapabilityError> {
        (self.0)(window)
    }
}
