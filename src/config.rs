//! Bridge Configuration
//!
//! Handles parsing of mpc-bridge.toml. Every field has a default, so an
//! absent file or an empty table gives a working bridge.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use crate::memory::{DEFAULT_BLOCKS, DEFAULT_BLOCK_SIZE};

/// File name searched for by [`BridgeConfig::find_and_load`]
pub const CONFIG_FILE: &str = "mpc-bridge.toml";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config file not found: {0}")]
    NotFound(String),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Root configuration structure matching mpc-bridge.toml.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct BridgeConfig {
    /// Allocation strategy overrides
    #[serde(default)]
    pub strategy: StrategyConfig,

    /// Pre-allocated block pool
    #[serde(default)]
    pub pool: PoolConfig,

    /// Zeroization policy
    #[serde(default)]
    pub zeroize: ZeroizeConfig,
}

impl BridgeConfig {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml(&content)?;
        tracing::debug!(path = %path.display(), "loaded bridge config");
        Ok(config)
    }

    /// Parse and validate a TOML document.
    pub fn from_toml(content: &str) -> ConfigResult<Self> {
        let config: BridgeConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Find and load configuration by searching up from the given directory.
    ///
    /// Falls back to the defaults when no file is found.
    pub fn find_and_load(start_dir: &Path) -> ConfigResult<Self> {
        let mut dir = start_dir.to_path_buf();
        loop {
            let config_path = dir.join(CONFIG_FILE);
            if config_path.exists() {
                return Self::load(&config_path);
            }
            if !dir.pop() {
                return Ok(Self::default());
            }
        }
    }

    /// Load configuration from the current directory or parents.
    pub fn load_from_cwd() -> ConfigResult<Self> {
        let cwd = std::env::current_dir().map_err(ConfigError::Io)?;
        Self::find_and_load(&cwd)
    }

    /// Save configuration to a file.
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reject values the bridge cannot run with.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.pool.enabled && (self.pool.blocks == 0 || self.pool.block_size == 0) {
            return Err(ConfigError::Invalid(
                "pool.blocks and pool.block_size must be nonzero when the pool is enabled".into(),
            ));
        }
        if self.pool.block_size > i32::MAX as usize {
            return Err(ConfigError::Invalid(
                "pool.block_size exceeds the native size field".into(),
            ));
        }
        Ok(())
    }
}

/// Allocation strategy overrides.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StrategyConfig {
    /// Copy every input into native memory, even for single round-trip calls
    #[serde(default)]
    pub force_owned: bool,
}

/// Block pool settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PoolConfig {
    /// Serve small owned copies from the pool
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Number of blocks
    #[serde(default = "default_blocks")]
    pub blocks: usize,

    /// Size of each block in bytes
    #[serde(default = "default_block_size")]
    pub block_size: usize,
}

fn default_true() -> bool {
    true
}

fn default_blocks() -> usize {
    DEFAULT_BLOCKS
}

fn default_block_size() -> usize {
    DEFAULT_BLOCK_SIZE
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            blocks: DEFAULT_BLOCKS,
            block_size: DEFAULT_BLOCK_SIZE,
        }
    }
}

/// Zeroization policy.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ZeroizeConfig {
    /// Also wipe public buffers (public keys, proofs) on release
    #[serde(default)]
    pub public_buffers: bool,
}
