//! Reference seismic capabilities.
//!
//! Waveform packets ([`Trace`]) and trigger detections ([`Pick`]) flowing
//! through a pulse chain as [`SeismicItem`], plus the stages that produce,
//! shape, analyse and collect them:
//!
//! | Stage           | Capability       | Type             |
//! |-----------------|------------------|------------------|
//! | synthetic feed  | `Producer`       | [`SyntheticFeed`] |
//! | packet stacking | `Aggregate`      | [`TraceMerge`]   |
//! | mean removal    | `Transform`      | [`Demean`]       |
//! | STA/LTA trigger | `Transform`      | [`StaLtaPicker`] |
//! | catalog         | `Consumer`       | [`Catalog`]      |

mod assembly;
mod picker;
mod stages;
mod synthetic;

pub use assembly::{assemble, Assembly, AssemblyError};
pub use picker::StaLtaPicker;
pub use stages::{Catalog, CatalogHandle, Demean, TraceMerge};
pub use synthetic::SyntheticFeed;

use crate::module::ItemKind;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Item kind tag for waveform packets.
pub const TRACE: ItemKind = "trace";
/// Item kind tag for trigger picks.
pub const PICK: ItemKind = "pick";

/// A contiguous, evenly sampled run of one channel's waveform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trace {
    pub station: String,
    pub channel: String,
    /// Time of the first sample.
    pub start: DateTime<Utc>,
    /// Samples per second.
    pub sample_rate: f64,
    pub samples: Vec<f64>,
}

impl Trace {
    /// `STATION.CHANNEL`
    pub fn stream_id(&self) -> String {
        format!("{}.{}", self.station, self.channel)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Time of sample `index`.
    pub fn time_of(&self, index: usize) -> DateTime<Utc> {
        self.start + offset(index, self.sample_rate)
    }

    /// Time just past the last sample; the expected start of the next packet.
    pub fn end(&self) -> DateTime<Utc> {
        self.time_of(self.samples.len())
    }

    pub fn mean(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().sum::<f64>() / self.samples.len() as f64
    }
}

/// Elapsed time of `samples` at `rate` Hz.
pub(crate) fn offset(samples: usize, rate: f64) -> Duration {
    Duration::microseconds((samples as f64 / rate * 1_000_000.0).round() as i64)
}

/// Trigger onset declared by an STA/LTA detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pick {
    pub station: String,
    pub channel: String,
    pub time: DateTime<Utc>,
    /// STA/LTA ratio at onset.
    pub ratio: f64,
}

/// Everything that can flow through a seismic chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SeismicItem {
    Trace(Trace),
    Pick(Pick),
}

impl SeismicItem {
    pub fn kind(&self) -> ItemKind {
        match self {
            SeismicItem::Trace(_) => TRACE,
            SeismicItem::Pick(_) => PICK,
        }
    }

    pub fn as_trace(&self) -> Option<&Trace> {
        match self {
            SeismicItem::Trace(t) => Some(t),
            SeismicItem::Pick(_) => None,
        }
    }

    pub fn as_pick(&self) -> Option<&Pick> {
        match self {
            SeismicItem::Pick(p) => Some(p),
            SeismicItem::Trace(_) => None,
        }
    }
}

impl From<Trace> for SeismicItem {
    fn from(trace: Trace) -> Self {
        SeismicItem::Trace(trace)
    }
}

impl From<Pick> for SeismicItem {
    fn from(pick: Pick) -> Self {
        SeismicItem::Pick(pick)
    }
}
