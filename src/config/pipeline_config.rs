//! Pipeline configuration file.

use super::defaults;
use crate::buffer::Capacity;
use crate::controller::ExecutionMode;
use crate::module::{ItemErrorPolicy, MergePolicy, ModuleConfig, ModuleKind, WindowSpec};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

// ============================================================================
// Top-Level Config
// ============================================================================

/// Root configuration for a pulse-chain deployment.
///
/// Load with [`PipelineConfig::load`], which searches:
/// 1. `$PULSE_CHAIN_CONFIG`
/// 2. `./pulse_chain.toml`
/// 3. Built-in defaults
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub controller: ControllerConfig,

    /// Synthetic waveform feed used by every source module.
    #[serde(default)]
    pub seismic: SeismicConfig,

    /// Chain layout, in source-to-sink order.
    #[serde(default = "default_modules", rename = "module")]
    pub modules: Vec<ModuleEntry>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            controller: ControllerConfig::default(),
            seismic: SeismicConfig::default(),
            modules: default_modules(),
        }
    }
}

// ============================================================================
// [controller]
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotaPolicyKind {
    #[default]
    Static,
    Adaptive,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Real-time tick period (ms).
    pub tick_interval_ms: u64,
    pub mode: ExecutionMode,
    pub quota_policy: QuotaPolicyKind,
    /// Adaptive ceiling as a multiple of the base quota.
    pub max_boost: usize,
    /// Stop after this many ticks. Unset runs until cancelled.
    pub max_ticks: Option<u64>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: defaults::DEFAULT_TICK_INTERVAL_MS,
            mode: ExecutionMode::Sequential,
            quota_policy: QuotaPolicyKind::Static,
            max_boost: defaults::DEFAULT_MAX_BOOST.get(),
            max_ticks: None,
        }
    }
}

impl ControllerConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

// ============================================================================
// [seismic]
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeismicConfig {
    pub sample_rate_hz: f64,
    pub packet_samples: usize,
    pub noise_std: f64,
    /// Inject an event every N packets. 0 disables events.
    pub event_every_packets: u64,
    /// Event peak in multiples of `noise_std`.
    pub event_amplitude: f64,
    /// Fixed RNG seed for reproducible runs.
    pub seed: Option<u64>,
    /// Stop producing after this many packets per source.
    pub max_packets: Option<u64>,
}

impl Default for SeismicConfig {
    fn default() -> Self {
        Self {
            sample_rate_hz: defaults::DEFAULT_SAMPLE_RATE_HZ,
            packet_samples: defaults::DEFAULT_PACKET_SAMPLES,
            noise_std: defaults::DEFAULT_NOISE_STD,
            event_every_packets: defaults::DEFAULT_EVENT_EVERY_PACKETS,
            event_amplitude: defaults::DEFAULT_EVENT_AMPLITUDE,
            seed: None,
            max_packets: None,
        }
    }
}

// ============================================================================
// [[module]]
// ============================================================================

/// Output buffer size: a slot count or `"unbounded"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CapacitySetting {
    Slots(usize),
    Keyword(CapacityKeyword),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapacityKeyword {
    Unbounded,
}

impl From<CapacitySetting> for Capacity {
    fn from(setting: CapacitySetting) -> Self {
        match setting {
            CapacitySetting::Slots(n) => Capacity::Bounded(n),
            CapacitySetting::Keyword(CapacityKeyword::Unbounded) => Capacity::Unbounded,
        }
    }
}

/// Which built-in analysis a transform module runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransformKind {
    /// Remove the mean from each trace.
    Demean,
    /// STA/LTA trigger; emits picks.
    StaLta,
}

/// One stage of the chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleEntry {
    pub name: String,
    pub kind: ModuleKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quota: Option<NonZeroUsize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_item_error: Option<ItemErrorPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capacity: Option<CapacitySetting>,
    /// Upstream module names; defaults to the previous entry.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub from: Vec<String>,

    // source
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub station: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,

    // window
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<usize>,

    // fan_in
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merge: Option<MergePolicy>,

    // transform
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform: Option<TransformKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sta_secs: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lta_secs: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger_on: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger_off: Option<f64>,

    // sink
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retain: Option<usize>,
}

impl ModuleEntry {
    /// Entry with only a name and a kind; everything else defaulted.
    pub fn new(name: impl Into<String>, kind: ModuleKind) -> Self {
        Self {
            name: name.into(),
            kind,
            quota: None,
            on_item_error: None,
            timeout_ms: None,
            capacity: None,
            from: Vec::new(),
            station: None,
            channel: None,
            size: None,
            step: None,
            merge: None,
            transform: None,
            sta_secs: None,
            lta_secs: None,
            trigger_on: None,
            trigger_off: None,
            retain: None,
        }
    }

    pub fn module_config(&self) -> ModuleConfig {
        ModuleConfig {
            quota: self.quota.unwrap_or(defaults::DEFAULT_QUOTA),
            on_item_error: self.on_item_error.unwrap_or_default(),
            timeout: self.timeout_ms.map(Duration::from_millis),
        }
    }

    pub fn output_capacity(&self) -> Capacity {
        self.capacity
            .map_or(Capacity::Bounded(defaults::DEFAULT_BUFFER_CAPACITY), Capacity::from)
    }

    pub fn window_spec(&self) -> WindowSpec {
        let size = self.size.unwrap_or(defaults::DEFAULT_STACK_PACKETS);
        WindowSpec::sliding(size, self.step.unwrap_or(size))
    }

    pub fn picker_params(&self) -> PickerParams {
        PickerParams {
            sta_secs: self.sta_secs.unwrap_or(defaults::DEFAULT_STA_SECS),
            lta_secs: self.lta_secs.unwrap_or(defaults::DEFAULT_LTA_SECS),
            trigger_on: self.trigger_on.unwrap_or(defaults::DEFAULT_TRIGGER_ON),
            trigger_off: self.trigger_off.unwrap_or(defaults::DEFAULT_TRIGGER_OFF),
        }
    }

    pub fn station(&self) -> &str {
        self.station.as_deref().unwrap_or(defaults::DEFAULT_STATION)
    }

    pub fn channel(&self) -> &str {
        self.channel.as_deref().unwrap_or(defaults::DEFAULT_CHANNEL)
    }
}

/// STA/LTA trigger parameters after defaults are applied.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PickerParams {
    pub sta_secs: f64,
    pub lta_secs: f64,
    pub trigger_on: f64,
    pub trigger_off: f64,
}

impl Default for PickerParams {
    fn default() -> Self {
        ModuleEntry::new("", ModuleKind::Transform).picker_params()
    }
}

/// Source → stacking window → demean → STA/LTA picker → catalog.
fn default_modules() -> Vec<ModuleEntry> {
    let mut stack = ModuleEntry::new("stack", ModuleKind::Window);
    stack.capacity = Some(CapacitySetting::Slots(16));

    let mut demean = ModuleEntry::new("demean", ModuleKind::Transform);
    demean.transform = Some(TransformKind::Demean);
    demean.capacity = Some(CapacitySetting::Slots(16));

    let mut picker = ModuleEntry::new("picker", ModuleKind::Transform);
    picker.transform = Some(TransformKind::StaLta);
    picker.capacity = Some(CapacitySetting::Slots(64));

    vec![
        ModuleEntry::new("feed", ModuleKind::Source),
        stack,
        demean,
        picker,
        ModuleEntry::new("catalog", ModuleKind::Sink),
    ]
}

// ============================================================================
// Loading
// ============================================================================

impl PipelineConfig {
    /// Load configuration using the standard search order:
    /// 1. `$PULSE_CHAIN_CONFIG`
    /// 2. `./pulse_chain.toml` in the current working directory
    /// 3. Built-in defaults
    pub fn load() -> Self {
        if let Ok(path) = std::env::var(defaults::CONFIG_ENV_VAR) {
            let p = PathBuf::from(&path);
            if p.exists() {
                match Self::load_from_file(&p) {
                    Ok(config) => {
                        info!(path = %p.display(), modules = config.modules.len(), "Loaded pipeline config from {}", defaults::CONFIG_ENV_VAR);
                        return config;
                    }
                    Err(e) => {
                        warn!(path = %p.display(), error = %e, "Failed to load config from {}, falling back", defaults::CONFIG_ENV_VAR);
                    }
                }
            } else {
                warn!(path = %path, "{} points to non-existent file, falling back", defaults::CONFIG_ENV_VAR);
            }
        }

        let local = PathBuf::from(defaults::CONFIG_FILE_NAME);
        if local.exists() {
            match Self::load_from_file(&local) {
                Ok(config) => {
                    info!(modules = config.modules.len(), "Loaded pipeline config from ./{}", defaults::CONFIG_FILE_NAME);
                    return config;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to load ./{}, using defaults", defaults::CONFIG_FILE_NAME);
                }
            }
        }

        info!("No {} found, using built-in defaults", defaults::CONFIG_FILE_NAME);
        Self::default()
    }

    /// Load from a specific TOML file path.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        Self::parse(&contents, path)
    }

    /// Parse TOML text that did not come from a file.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        Self::parse(contents, Path::new("<inline>"))
    }

    fn parse(contents: &str, origin: &Path) -> Result<Self, ConfigError> {
        // Two-pass: unknown keys first (warnings only), then serde
        for w in super::validation::validate_unknown_keys(contents) {
            warn!("{}", w);
        }

        let config: Self = toml::from_str(contents)
            .map_err(|e| ConfigError::Parse(origin.to_path_buf(), e))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    pub fn save_to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let contents = self.to_toml()?;
        std::fs::write(path, contents).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        info!(path = %path.display(), "Pipeline config saved");
        Ok(())
    }

    /// Semantic checks serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors: Vec<String> = Vec::new();
        let c = &self.controller;
        let s = &self.seismic;

        if c.tick_interval_ms == 0 {
            errors.push("controller.tick_interval_ms must be > 0".to_string());
        }
        if c.max_boost == 0 {
            errors.push("controller.max_boost must be >= 1".to_string());
        }
        if c.max_ticks == Some(0) {
            errors.push("controller.max_ticks must be >= 1 when set".to_string());
        }

        if !s.sample_rate_hz.is_finite() || s.sample_rate_hz <= 0.0 {
            errors.push(format!(
                "seismic.sample_rate_hz = {} must be a positive number",
                s.sample_rate_hz
            ));
        }
        if s.packet_samples == 0 {
            errors.push("seismic.packet_samples must be >= 1".to_string());
        }
        if !s.noise_std.is_finite() || s.noise_std < 0.0 {
            errors.push(format!("seismic.noise_std = {} cannot be negative", s.noise_std));
        }
        if !s.event_amplitude.is_finite() {
            errors.push("seismic.event_amplitude must be finite".to_string());
        }

        if self.modules.is_empty() {
            errors.push("at least one [[module]] is required".to_string());
        }

        let mut seen = HashSet::new();
        for m in &self.modules {
            if !seen.insert(m.name.as_str()) {
                errors.push(format!("module '{}' is defined more than once", m.name));
            }
        }
        let names: HashSet<&str> = self.modules.iter().map(|m| m.name.as_str()).collect();

        for m in &self.modules {
            Self::validate_module(m, &names, &mut errors);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    fn validate_module(m: &ModuleEntry, names: &HashSet<&str>, errors: &mut Vec<String>) {
        let name = &m.name;
        if name.trim().is_empty() {
            errors.push("module name cannot be empty".to_string());
        }
        if m.timeout_ms == Some(0) {
            errors.push(format!("module '{name}': timeout_ms must be > 0"));
        }
        if m.capacity == Some(CapacitySetting::Slots(0)) && m.kind != ModuleKind::Sink {
            errors.push(format!("module '{name}': capacity must be >= 1"));
        }
        for up in &m.from {
            if !names.contains(up.as_str()) {
                errors.push(format!("module '{name}': 'from' names unknown module '{up}'"));
            }
        }

        match m.kind {
            ModuleKind::Window => {
                if let Err(reason) = m.window_spec().check() {
                    errors.push(format!("module '{name}': {reason}"));
                }
            }
            ModuleKind::Transform => match m.transform {
                None => errors.push(format!(
                    "module '{name}': transform modules need `transform = \"demean\"` or `\"sta_lta\"`"
                )),
                Some(TransformKind::StaLta) => {
                    let p = m.picker_params();
                    if !(p.sta_secs > 0.0 && p.lta_secs.is_finite()) {
                        errors.push(format!("module '{name}': sta_secs and lta_secs must be positive"));
                    } else if p.sta_secs >= p.lta_secs {
                        errors.push(format!(
                            "module '{name}': sta_secs ({:.3}) must be < lta_secs ({:.3})",
                            p.sta_secs, p.lta_secs
                        ));
                    }
                    if !(p.trigger_off > 0.0 && p.trigger_on > p.trigger_off) {
                        errors.push(format!(
                            "module '{name}': need trigger_on ({:.2}) > trigger_off ({:.2}) > 0",
                            p.trigger_on, p.trigger_off
                        ));
                    }
                }
                Some(TransformKind::Demean) => {}
            },
            _ => {}
        }
    }
}

// ============================================================================
// Error Type
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config I/O error ({}): {1}", .0.display())]
    Io(PathBuf, #[source] std::io::Error),

    #[error("Config parse error ({}): {1}", .0.display())]
    Parse(PathBuf, #[source] toml::de::Error),

    #[error("Config serialization error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Config validation failed:\n  - {}", .0.join("\n  - "))]
    Validation(Vec<String>),
}

// ============================================================================
// Tests
// ============================================================================
