//! Per-module tuning knobs.

use crate::config::defaults::DEFAULT_QUOTA;
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::time::Duration;

/// What to do when a single item fails its transformation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemErrorPolicy {
    /// Record the failure, drop the item, carry on with the next one.
    #[default]
    Skip,
    /// Treat the failure as fatal: end the pulse and degrade the module.
    Abort,
}

/// Explicit configuration for one module, validated when the sequence is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleConfig {
    /// Maximum items consumed (or produced, for sources) per pulse.
    pub quota: NonZeroUsize,
    #[serde(default)]
    pub on_item_error: ItemErrorPolicy,
    /// Wall-clock budget for one pulse. `None` disables the check.
    #[serde(default, with = "duration_ms")]
    pub timeout: Option<Duration>,
}

impl Default for ModuleConfig {
    fn default() -> Self {
        Self {
            quota: DEFAULT_QUOTA,
            on_item_error: ItemErrorPolicy::Skip,
            timeout: None,
        }
    }
}

impl ModuleConfig {
    pub fn with_quota(mut self, quota: NonZeroUsize) -> Self {
        self.quota = quota;
        self
    }

    pub fn with_policy(mut self, policy: ItemErrorPolicy) -> Self {
        self.on_item_error = policy;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Returns a description of the problem, if any.
    pub fn check(&self) -> Result<(), String> {
        match self.timeout {
            Some(t) if t.is_zero() => Err("timeout must be greater than zero".to_string()),
            _ => Ok(()),
        }
    }
}

/// Optional durations as integer milliseconds.
mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    #[allow(clippy::ref_option)]
    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_some(&u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = ModuleConfig::default();
        assert_eq!(cfg.quota.get(), 10);
        assert_eq!(cfg.on_item_error, ItemErrorPolicy::Skip);
        assert!(cfg.check().is_ok());
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let cfg = ModuleConfig::default().with_timeout(Duration::ZERO);
        assert!(cfg.check().is_err());
    }

    #[test]
    fn parses_from_toml() {
        let cfg: ModuleConfig = toml::from_str(
            r#"
            quota = 25
            on_item_error = "abort"
            timeout = 150
            "#,
        )
        .unwrap();
        assert_eq!(cfg.quota.get(), 25);
        assert_eq!(cfg.on_item_error, ItemErrorPolicy::Abort);
        assert_eq!(cfg.timeout, Some(Duration::from_millis(150)));
    }

    #[test]
    fn zero_quota_fails_to_parse() {
        let parsed: Result<ModuleConfig, _> = toml::from_str("quota = 0");
        assert!(parsed.is_err());
    }
}
