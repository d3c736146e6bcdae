//! pulse-chain: bounded-latency pulse pipelines for live waveform streams
//!
//! Work moves through a chain of modules in small, bounded slices. Each
//! controller invocation pulses every module once, with a quota on how much
//! it may do; buffers between modules apply backpressure when they fill.
//!
//! ## Architecture
//!
//! - **Buffer**: FIFO hand-off between two modules, bounded or unbounded
//! - **Module**: source, passthrough, window, transform, fan-in or sink,
//!   wrapping an injected capability
//! - **Sequence**: validated source-to-sink chain that owns modules and buffers
//! - **PulseController**: runs one invocation at a time and reports on it
//! - **Seismic**: synthetic feed, stacking, demean, STA/LTA picker, catalog
//! - **PulseDriver**: ticks the controller on a real-time period

pub mod buffer;
pub mod config;
pub mod controller;
pub mod driver;
pub mod error;
pub mod module;
pub mod report;
pub mod seismic;
pub mod sequence;

// Re-export the pulse core
pub use buffer::{Buffer, BufferStats, Capacity, Link};
pub use controller::{
    AdaptiveQuotas, ExecutionMode, JsonLinesSink, PulseController, QuotaPolicy, Quotas,
    ReportSink, StaticQuotas, TracingReportSink,
};
pub use error::{CapabilityError, LinkageError, ModuleFatal, Overflow};
pub use module::{
    Aggregate, Consumer, Health, ItemErrorPolicy, MergePolicy, Module, ModuleConfig, ModuleKind,
    Producer, Transform, WindowSpec,
};
pub use report::{ModuleReport, PulseReport, PulseStatus, RunSummary};
pub use sequence::{ModuleSpec, Sequence};

// Re-export configuration and the seismic stack
pub use config::PipelineConfig;
pub use driver::{controller_from_config, PulseDriver};
pub use seismic::{assemble, Assembly, Pick, SeismicItem, Trace};
