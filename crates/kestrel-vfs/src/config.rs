//! VFS configuration.
//!
//! Loaded from TOML at system initialisation:
//!
//! ```toml
//! first_device_id = 1
//! max_mountpoints = 32
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default capacity of the mount table.
pub const DEFAULT_MAX_MOUNTPOINTS: usize = 16;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Tunables for a [`Vfs`](crate::Vfs) instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VfsConfig {
    /// First value handed out by the device id allocator.
    pub first_device_id: u64,
    /// Maximum number of simultaneously mounted filesystems.
    pub max_mountpoints: usize,
}

impl Default for VfsConfig {
    fn default() -> Self {
        Self {
            first_device_id: 0,
            max_mountpoints: DEFAULT_MAX_MOUNTPOINTS,
        }
    }
}

impl VfsConfig {
    /// Parse a TOML document. Missing keys take their defaults.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: VfsConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Set the first device id.
    pub fn with_first_device_id(mut self, id: u64) -> Self {
        self.first_device_id = id;
        self
    }

    /// Set the mount table capacity.
    pub fn with_max_mountpoints(mut self, max: usize) -> Self {
        self.max_mountpoints = max;
        self
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_mountpoints == 0 {
            return Err(ConfigError::Invalid(
                "max_mountpoints must be at least 1 (the root mount)".into(),
            ));
        }
        Ok(())
    }
}
