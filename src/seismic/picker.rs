//! Classic STA/LTA trigger.
//!
//! For every sample the ratio of short-term to long-term mean signal energy
//! is computed over trailing windows. A pick is declared when the ratio
//! rises through `trigger_on`; the detector re-arms once it falls below
//! `trigger_off`. Energy history is kept per stream, so windows and
//! triggers span packet boundaries.

use super::{Pick, SeismicItem, Trace};
use crate::config::PickerParams;
use crate::error::CapabilityError;
use crate::module::Transform;
use std::collections::{HashMap, VecDeque};
use tracing::debug;

#[derive(Debug)]
struct StreamState {
    sample_rate: f64,
    /// Energy of the trailing `lta_len - 1` samples.
    history: VecDeque<f64>,
    triggered: bool,
}

/// Emits a [`Pick`] per trigger onset. Incoming picks pass through.
#[derive(Debug)]
pub struct StaLtaPicker {
    params: PickerParams,
    streams: HashMap<String, StreamState>,
}

impl StaLtaPicker {
    pub fn new(params: PickerParams) -> Self {
        Self {
            params,
            streams: HashMap::new(),
        }
    }

    /// Window lengths in samples at `rate` Hz. LTA is always longer than STA.
    fn window_lengths(&self, rate: f64) -> (usize, usize) {
        let sta = ((self.params.sta_secs * rate).round() as usize).max(1);
        let lta = ((self.params.lta_secs * rate).round() as usize).max(sta + 1);
        (sta, lta)
    }

    fn scan(&mut self, trace: &Trace, out: &mut Vec<SeismicItem>) {
        let (sta_len, lta_len) = self.window_lengths(trace.sample_rate);
        let params = self.params;

        let state = self
            .streams
            .entry(trace.stream_id())
            .or_insert_with(|| StreamState {
                sample_rate: trace.sample_rate,
                history: VecDeque::with_capacity(lta_len),
                triggered: false,
            });
        if (state.sample_rate - trace.sample_rate).abs() > f64::EPSILON {
            debug!(stream = %trace.stream_id(), "Sample rate changed, STA/LTA history reset");
            state.sample_rate = trace.sample_rate;
            state.history.clear();
            state.triggered = false;
        }

        let held = state.history.len();
        let energy: Vec<f64> = state
            .history
            .iter()
            .copied()
            .chain(trace.samples.iter().map(|s| s * s))
            .collect();

        // prefix[i] = sum of energy[..i]
        let mut prefix = Vec::with_capacity(energy.len() + 1);
        prefix.push(0.0);
        for e in &energy {
            prefix.push(prefix[prefix.len() - 1] + e);
        }

        for j in held..energy.len() {
            if j + 1 < lta_len {
                continue;
            }
            let lta = (prefix[j + 1] - prefix[j + 1 - lta_len]) / lta_len as f64;
            let sta = (prefix[j + 1] - prefix[j + 1 - sta_len]) / sta_len as f64;
            let ratio = if lta > 0.0 { sta / lta } else { 0.0 };

            if !state.triggered && ratio >= params.trigger_on {
                state.triggered = true;
                out.push(
                    Pick {
                        station: trace.station.clone(),
                        channel: trace.channel.clone(),
                        time: trace.time_of(j - held),
                        ratio,
                    }
                    .into(),
                );
            } else if state.triggered && ratio < params.trigger_off {
                state.triggered = false;
            }
        }

        let keep = lta_len - 1;
        let skip = energy.len().saturating_sub(keep);
        state.history = energy.into_iter().skip(skip).collect();
    }
}

impl Transform<SeismicItem> for StaLtaPicker {
    fn apply(&mut self, item: SeismicItem, out: &mut Vec<SeismicItem>) -> Result<(), CapabilityError> {
        match item {
            SeismicItem::Trace(trace) => {
                if trace.samples.iter().any(|s| !s.is_finite()) {
                    return Err(CapabilityError::item(format!(
                        "{}: non-finite sample",
                        trace.stream_id()
                    )));
                }
                if !(trace.sample_rate.is_finite() && trace.sample_rate > 0.0) {
                    return Err(CapabilityError::item(format!(
                        "{}: invalid sample rate {}",
                        trace.stream_id(),
                        trace.sample_rate
                    )));
                }
                self.scan(&trace, out);
            }
            pick @ SeismicItem::Pick(_) => out.push(pick),
        }
        Ok(())
    }
}
