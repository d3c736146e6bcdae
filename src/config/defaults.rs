//! System-wide default constants.
//!
//! Every tunable with a built-in value lives here, grouped by subsystem.

use std::num::NonZeroUsize;

// ============================================================================
// Loading
// ============================================================================

/// Environment variable naming the config file to load.
pub const CONFIG_ENV_VAR: &str = "PULSE_CHAIN_CONFIG";

/// Config file looked up in the working directory when the env var is unset.
pub const CONFIG_FILE_NAME: &str = "pulse_chain.toml";

// ============================================================================
// Pulse core
// ============================================================================

/// Items a module may handle per pulse when nothing else is configured.
pub const DEFAULT_QUOTA: NonZeroUsize = NonZeroUsize::MIN.saturating_add(9);

/// Slots in a module's output buffer when the config does not say.
pub const DEFAULT_BUFFER_CAPACITY: usize = 32;

/// Upper bound on an adaptive quota, as a multiple of the base quota.
pub const DEFAULT_MAX_BOOST: NonZeroUsize = NonZeroUsize::MIN.saturating_add(3);

// ============================================================================
// Driver
// ============================================================================

/// Real-time tick period (ms). 100 ms = 10 invocations per second.
pub const DEFAULT_TICK_INTERVAL_MS: u64 = 100;

// ============================================================================
// Synthetic feed
// ============================================================================

pub const DEFAULT_STATION: &str = "SYN01";
pub const DEFAULT_CHANNEL: &str = "HHZ";

/// Samples per second of the synthetic waveform.
pub const DEFAULT_SAMPLE_RATE_HZ: f64 = 100.0;

/// Samples per trace packet. 100 samples at 100 Hz = 1 s packets.
pub const DEFAULT_PACKET_SAMPLES: usize = 100;

/// Standard deviation of the background noise (counts).
pub const DEFAULT_NOISE_STD: f64 = 1.0;

/// An event burst is injected every this many packets.
pub const DEFAULT_EVENT_EVERY_PACKETS: u64 = 30;

/// Peak amplitude of an injected event, in multiples of the noise level.
pub const DEFAULT_EVENT_AMPLITUDE: f64 = 20.0;

// ============================================================================
// Analysis stages
// ============================================================================

/// Packets merged by the default stacking window.
pub const DEFAULT_STACK_PACKETS: usize = 4;

/// Short-term average length (s).
pub const DEFAULT_STA_SECS: f64 = 0.5;

/// Long-term average length (s).
pub const DEFAULT_LTA_SECS: f64 = 10.0;

/// STA/LTA ratio that declares a trigger.
pub const DEFAULT_TRIGGER_ON: f64 = 4.0;

/// STA/LTA ratio below which a trigger is released.
pub const DEFAULT_TRIGGER_OFF: f64 = 1.5;

/// Items the catalog sink keeps in memory (oldest evicted first).
pub const DEFAULT_CATALOG_RETAIN: usize = 1_000;
