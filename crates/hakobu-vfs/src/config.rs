//! Pruner configuration.
//!
//! ```toml
//! minimum_usable_percent = 10.0
//! capacity_bytes = 1073741824
//! minimum_age_secs = 3600
//! frequency_secs = 60
//! extension = "bin"
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{VfsError, VfsResult};
use crate::matcher::Matcher;
use crate::types::Percent;

pub const DEFAULT_MINIMUM_USABLE_PERCENT: f64 = 15.0;
pub const DEFAULT_FREQUENCY_SECS: u64 = 30;

/// Eviction policy for a [`FolderPruner`](crate::FolderPruner).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PrunerConfig {
    /// Prune while the volume has less than this share free.
    pub minimum_usable_percent: f64,

    /// Prune while matched files total more than this. Unbounded if absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capacity_bytes: Option<u64>,

    /// Files younger than this are never pruned.
    pub minimum_age_secs: u64,

    /// Seconds between cycles.
    pub frequency_secs: u64,

    /// Only consider files with this extension.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extension: Option<String>,

    /// Only consider files whose name matches this regex.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name_pattern: Option<String>,

    /// Also consider dot-files (including in-flight copy temporaries).
    pub include_hidden: bool,
}

impl Default for PrunerConfig {
    fn default() -> Self {
        Self {
            minimum_usable_percent: DEFAULT_MINIMUM_USABLE_PERCENT,
            capacity_bytes: None,
            minimum_age_secs: 0,
            frequency_secs: DEFAULT_FREQUENCY_SECS,
            extension: None,
            name_pattern: None,
            include_hidden: false,
        }
    }
}

impl PrunerConfig {
    pub fn from_toml(text: &str) -> VfsResult<Self> {
        let config: Self = toml::from_str(text).map_err(|e| VfsError::invalid_config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> VfsResult<String> {
        toml::to_string_pretty(self).map_err(|e| VfsError::invalid_config(e.to_string()))
    }

    pub fn validate(&self) -> VfsResult<()> {
        if !(0.0..=100.0).contains(&self.minimum_usable_percent) {
            return Err(VfsError::invalid_config(format!(
                "minimum_usable_percent must be within 0..=100, got {}",
                self.minimum_usable_percent
            )));
        }
        if self.frequency_secs == 0 {
            return Err(VfsError::invalid_config("frequency_secs must be positive"));
        }
        Ok(())
    }

    pub fn minimum_usable(&self) -> Percent {
        Percent::new(self.minimum_usable_percent)
    }

    pub fn minimum_age(&self) -> Duration {
        Duration::from_secs(self.minimum_age_secs)
    }

    pub fn frequency(&self) -> Duration {
        Duration::from_secs(self.frequency_secs)
    }

    /// Build the file predicate described by this config.
    pub fn matcher(&self) -> VfsResult<Matcher> {
        let mut matcher = if self.include_hidden {
            Matcher::all()
        } else {
            Matcher::visible()
        };
        if let Some(ext) = &self.extension {
            matcher = matcher.and(Matcher::extension(ext));
        }
        if let Some(pattern) = &self.name_pattern {
            let by_name = Matcher::name_regex(pattern)
                .map_err(|e| VfsError::invalid_config(e.to_string()))?;
            matcher = matcher.and(by_name);
        }
        Ok(matcher)
    }
}
