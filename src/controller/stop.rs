//! Stop conditions for [`PulseController::run_until`](super::PulseController::run_until).
//!
//! Each helper returns a predicate that is evaluated once per invocation,
//! after the invocation's report is complete. Predicates may keep state
//! (tick counters, idle streaks).

use crate::report::PulseReport;
use tokio_util::sync::CancellationToken;

/// Boxed stop predicate.
pub type StopFn = Box<dyn FnMut(&PulseReport) -> bool + Send>;

/// Stop after `n` invocations of this run (at least one always runs).
pub fn after_ticks(n: u64) -> impl FnMut(&PulseReport) -> bool + Send {
    let mut seen = 0_u64;
    move |_| {
        seen += 1;
        seen >= n
    }
}

/// Stop as soon as any module goes fatal.
pub fn on_fatal() -> impl FnMut(&PulseReport) -> bool + Send {
    PulseReport::any_fatal
}

/// Stop after `n` consecutive invocations in which nothing moved.
pub fn when_idle(n: u64) -> impl FnMut(&PulseReport) -> bool + Send {
    let mut streak = 0_u64;
    move |report| {
        if report.is_idle() {
            streak += 1;
        } else {
            streak = 0;
        }
        streak >= n
    }
}

/// Stop once `token` is cancelled. Checked between invocations only.
pub fn when_cancelled(token: CancellationToken) -> impl FnMut(&PulseReport) -> bool + Send {
    move |_| token.is_cancelled()
}

/// Stop when any predicate says so. Every predicate sees every report.
pub fn any_of(mut predicates: Vec<StopFn>) -> impl FnMut(&PulseReport) -> bool + Send {
    move |report| {
        predicates
            .iter_mut()
            .fold(false, |stop, predicate| predicate(report) || stop)
    }
}
