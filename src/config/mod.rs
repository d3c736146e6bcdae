//! Pipeline Configuration
//!
//! Chain layout, controller tuning and synthetic-feed parameters, loaded
//! from TOML.
//!
//! ## Loading Order
//!
//! 1. `PULSE_CHAIN_CONFIG` environment variable (path to TOML file)
//! 2. `pulse_chain.toml` in the current working directory
//! 3. Built-in defaults (source → window → demean → picker → sink)
//!
//! ## Example
//!
//! ```toml
//! [controller]
//! tick_interval_ms = 100
//! mode = "parallel"
//!
//! [[module]]
//! name = "feed"
//! kind = "source"
//! capacity = 32
//!
//! [[module]]
//! name = "catalog"
//! kind = "sink"
//! ```

pub mod defaults;
mod pipeline_config;
pub mod validation;

pub use pipeline_config::*;
