//! Merge order for fan-in modules.

use crate::buffer::Link;
use serde::{Deserialize, Serialize};

/// How a fan-in module picks the next item among its inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergePolicy {
    /// Oldest push first, across all inputs.
    #[default]
    Arrival,
    /// Drain inputs in declared order: the first input always wins.
    Priority,
}

impl MergePolicy {
    /// Index of the input to pop from next, or `None` when every input is empty.
    pub(crate) fn select<T>(self, inputs: &[Link<T>]) -> Option<usize> {
        match self {
            MergePolicy::Priority => inputs.iter().position(|link| link.available() > 0),
            MergePolicy::Arrival => inputs
                .iter()
                .enumerate()
                .filter_map(|(i, link)| link.lock().front_stamp().map(|stamp| (stamp, i)))
                .min()
                .map(|(_, i)| i),
        }
    }
}
