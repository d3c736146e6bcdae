//! Synthetic waveform feed: Gaussian background noise with periodic
//! damped-sinusoid event bursts.

use super::{offset, SeismicItem, Trace};
use crate::config::SeismicConfig;
use crate::error::CapabilityError;
use crate::module::Producer;
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal, NormalError};
use std::f64::consts::TAU;
use tracing::debug;

/// Dominant frequency of an injected event (Hz).
const EVENT_FREQ_HZ: f64 = 5.0;
/// Amplitude e-folding time of an injected event (s).
const EVENT_DECAY_SECS: f64 = 0.4;

/// Generates one-packet [`Trace`]s on demand.
pub struct SyntheticFeed {
    station: String,
    channel: String,
    sample_rate: f64,
    packet_samples: usize,
    event_every: u64,
    event_peak: f64,
    max_packets: Option<u64>,
    noise: Normal<f64>,
    rng: StdRng,
    next_start: DateTime<Utc>,
    packets: u64,
}

impl SyntheticFeed {
    pub fn new(
        config: &SeismicConfig,
        station: impl Into<String>,
        channel: impl Into<String>,
        seed: Option<u64>,
    ) -> Result<Self, NormalError> {
        let noise = Normal::new(0.0, config.noise_std)?;
        let rng = seed.map_or_else(StdRng::from_entropy, StdRng::seed_from_u64);
        let scale = if config.noise_std > 0.0 { config.noise_std } else { 1.0 };
        Ok(Self {
            station: station.into(),
            channel: channel.into(),
            sample_rate: config.sample_rate_hz,
            packet_samples: config.packet_samples,
            event_every: config.event_every_packets,
            event_peak: config.event_amplitude * scale,
            max_packets: config.max_packets,
            noise,
            rng,
            next_start: Utc::now(),
            packets: 0,
        })
    }

    /// Pin the first packet's start time.
    pub fn starting_at(mut self, start: DateTime<Utc>) -> Self {
        self.next_start = start;
        self
    }

    pub fn packets_emitted(&self) -> u64 {
        self.packets
    }

    /// Whether packet `n` (0-based) carries an event. The first event waits
    /// `event_every - 1` packets so detectors have background to compare to.
    fn has_event(&self, n: u64) -> bool {
        self.event_every > 0 && n % self.event_every == self.event_every - 1
    }

    fn next_packet(&mut self) -> Trace {
        let mut samples: Vec<f64> = (0..self.packet_samples)
            .map(|_| self.noise.sample(&mut self.rng))
            .collect();

        if self.has_event(self.packets) {
            let onset = self.packet_samples / 4;
            for (i, s) in samples.iter_mut().enumerate().skip(onset) {
                let t = (i - onset) as f64 / self.sample_rate;
                *s += self.event_peak * (-t / EVENT_DECAY_SECS).exp() * (TAU * EVENT_FREQ_HZ * t).sin();
            }
            debug!(station = %self.station, packet = self.packets, "Injected synthetic event");
        }

        let trace = Trace {
            station: self.station.clone(),
            channel: self.channel.clone(),
            start: self.next_start,
            sample_rate: self.sample_rate,
            samples,
        };
        self.next_start += offset(self.packet_samples, self.sample_rate);
        self.packets += 1;
        trace
    }
}

impl Producer<SeismicItem> for SyntheticFeed {
    fn produce(&mut self, max: usize, out: &mut Vec<SeismicItem>) -> Result<(), CapabilityError> {
        for _ in 0..max {
            if self.max_packets.is_some_and(|limit| self.packets >= limit) {
                break;
            }
            let packet = self.next_packet();
            out.push(packet.into());
        }
        Ok(())
    }
}
