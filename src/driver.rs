//! Real-time tick driver.
//!
//! Invokes the controller once per tick of a tokio interval until the stop
//! predicate fires or the cancellation token is triggered. Cancellation is
//! only observed between invocations; an invocation in progress always
//! completes.

use crate::config::{ControllerConfig, QuotaPolicyKind};
use crate::controller::{AdaptiveQuotas, PulseController, StaticQuotas};
use crate::report::{PulseReport, RunSummary};
use crate::sequence::Sequence;
use std::num::NonZeroUsize;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Build a controller with the mode and quota policy from `[controller]`.
pub fn controller_from_config<T: Send + 'static>(
    sequence: Sequence<T>,
    config: &ControllerConfig,
) -> PulseController<T> {
    let controller = PulseController::new(sequence).with_mode(config.mode);
    match config.quota_policy {
        QuotaPolicyKind::Static => controller.with_policy(StaticQuotas::new()),
        QuotaPolicyKind::Adaptive => {
            let boost = NonZeroUsize::new(config.max_boost).unwrap_or(NonZeroUsize::MIN);
            controller.with_policy(AdaptiveQuotas::new(boost))
        }
    }
}

/// Shortest period the driver will tick at.
pub const MIN_TICK_INTERVAL: Duration = Duration::from_millis(1);

/// Drives a [`PulseController`] on a fixed real-time period.
pub struct PulseDriver<T> {
    controller: PulseController<T>,
    interval: Duration,
    cancel_token: CancellationToken,
}

impl<T: Send + 'static> PulseDriver<T> {
    /// Periods below [`MIN_TICK_INTERVAL`] are raised to it.
    pub fn new(controller: PulseController<T>, interval: Duration) -> Self {
        if interval < MIN_TICK_INTERVAL {
            warn!(
                requested_us = interval.as_micros() as u64,
                "Tick interval below 1ms, clamping"
            );
        }
        Self {
            controller,
            interval: interval.max(MIN_TICK_INTERVAL),
            cancel_token: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel_token = token;
        self
    }

    /// Token that stops the driver after the current invocation.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn controller(&self) -> &PulseController<T> {
        &self.controller
    }

    pub fn into_controller(self) -> PulseController<T> {
        self.controller
    }

    /// Tick until `stop` returns true or the token is cancelled.
    pub async fn run(&mut self, mut stop: impl FnMut(&PulseReport) -> bool + Send) -> RunSummary {
        let mut summary = RunSummary::default();
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            interval_ms = self.interval.as_millis() as u64,
            modules = self.controller.sequence().len(),
            mode = %self.controller.mode(),
            policy = self.controller.policy_name(),
            "Pulse driver started"
        );

        loop {
            tokio::select! {
                biased;
                () = self.cancel_token.cancelled() => {
                    info!("[PulseDriver] Shutdown signal received");
                    break;
                }
                _ = ticker.tick() => {
                    let quotas = self.controller.next_quotas();
                    let report = self.controller.run_once(&quotas);
                    summary.absorb(&report);

                    if report.elapsed > self.interval {
                        warn!(
                            tick = report.tick,
                            elapsed_ms = report.elapsed.as_millis() as u64,
                            interval_ms = self.interval.as_millis() as u64,
                            "Invocation overran its tick"
                        );
                    }
                    if stop(&report) {
                        break;
                    }
                }
            }
        }

        log_final_stats(&summary, self.controller.sequence().in_flight());
        summary
    }
}

fn log_final_stats(summary: &RunSummary, in_flight: usize) {
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!("FINAL STATISTICS");
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!("   Ticks:              {}", summary.ticks);
    info!("   Items Consumed:     {}", summary.consumed);
    info!("   Items Produced:     {}", summary.produced);
    info!("   Item Errors:        {}", summary.errors);
    info!("   Items Dropped:      {}", summary.dropped);
    info!("   Quota Shortfall:    {}", summary.shortfall);
    info!("   Still In Flight:    {}", in_flight);
    if summary.degraded.is_empty() {
        info!("   Degraded Modules:   none");
    } else {
        warn!("   Degraded Modules:   {}", summary.degraded.join(", "));
    }
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::Capacity;
    use crate::controller::stop;
    use crate::controller::ExecutionMode;
    use crate::module::{consumer_fn, producer_fn, Module};
    use crate::sequence::ModuleSpec;

    fn endless() -> Sequence<u64> {
        let mut n = 0_u64;
        Sequence::build(vec![
            ModuleSpec::new(
                Module::source(
                    "ticker",
                    producer_fn(move |max| {
                        let batch: Vec<u64> = (n..n + max as u64).collect();
                        n += max as u64;
                        Ok(batch)
                    }),
                ),
                Capacity::Bounded(8),
            ),
            ModuleSpec::sink(Module::sink("drop", consumer_fn(|_: u64| Ok(())))),
        ])
        .expect("valid chain")
    }

    #[tokio::test]
    async fn stops_on_predicate() {
        let controller = PulseController::new(endless());
        let mut driver = PulseDriver::new(controller, Duration::from_millis(1));
        let summary = driver.run(stop::after_ticks(5)).await;
        assert_eq!(summary.ticks, 5);
        assert_eq!(driver.controller().tick(), 5);
    }

    #[tokio::test]
    async fn cancelled_token_stops_before_next_tick() {
        let controller = PulseController::new(endless());
        let token = CancellationToken::new();
        token.cancel();
        let mut driver =
            PulseDriver::new(controller, Duration::from_millis(1)).with_cancellation(token);
        let summary = driver.run(|_| false).await;
        assert_eq!(summary.ticks, 0);
    }

    #[tokio::test]
    async fn cancel_from_another_task() {
        let controller = PulseController::new(endless());
        let mut driver = PulseDriver::new(controller, Duration::from_millis(2));
        let token = driver.cancel_token();
        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            token.cancel();
        });
        let summary = driver.run(|_| false).await;
        canceller.await.expect("canceller task");
        assert!(summary.ticks >= 1);
        assert!(summary.produced > 0);
    }

    #[tokio::test]
    async fn zero_interval_is_clamped() {
        let controller = PulseController::new(endless());
        let mut driver = PulseDriver::new(controller, Duration::ZERO);
        assert_eq!(driver.interval(), MIN_TICK_INTERVAL);
        let summary = driver.run(stop::after_ticks(3)).await;
        assert_eq!(summary.ticks, 3);
    }

    #[test]
    fn controller_follows_config() {
        let config = ControllerConfig {
            mode: ExecutionMode::Parallel,
            quota_policy: QuotaPolicyKind::Adaptive,
            ..ControllerConfig::default()
        };
        let controller = controller_from_config(endless(), &config);
        assert_eq!(controller.mode(), ExecutionMode::Parallel);
        assert_eq!(controller.policy_name(), "adaptive");
    }
}
