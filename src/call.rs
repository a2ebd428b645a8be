//! Native call driver
//!
//! Runs one native operation with the full discipline around it:
//!
//! ```text
//! bind policy ─► CallScope (strategy per shape) ─► native call ─► release inputs ─► unbind
//!                                                        │
//!                                                        └─► rc ─► BridgeError
//! ```
//!
//! Inputs are released before the binding, and both are released on every
//! exit path, including a panic inside the call.

use std::os::raw::c_int;
use std::sync::Arc;

use crate::config::BridgeConfig;
use crate::dispatch::PolicyBinding;
use crate::error::{BridgeError, BridgeResult};
use crate::kem::Kem;
use crate::memory::{self, CallScope, CallShape, SecretBlockPool};

/// Entry point for driving native operations
#[derive(Debug, Clone)]
pub struct Bridge {
    config: BridgeConfig,
    pool: Option<SecretBlockPool>,
}

impl Bridge {
    /// A bridge with the default configuration
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: BridgeConfig) -> BridgeResult<Self> {
        config
            .validate()
            .map_err(|e| BridgeError::BadArgument(e.to_string()))?;
        let pool = if config.pool.enabled {
            let pool = SecretBlockPool::new(config.pool.blocks, config.pool.block_size)
                .ok_or_else(|| {
                    BridgeError::BadArgument(format!(
                        "cannot allocate a pool of {} x {} bytes",
                        config.pool.blocks, config.pool.block_size
                    ))
                })?;
            Some(pool)
        } else {
            None
        };
        Ok(Self { config, pool })
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn pool(&self) -> Option<&SecretBlockPool> {
        self.pool.as_ref()
    }

    /// Open an input scope for a call of the given shape
    pub fn scope<'a>(&self, shape: CallShape) -> CallScope<'a> {
        let strategy = memory::select(shape, self.config.strategy.force_owned);
        let scope = CallScope::new(strategy).wipe_public(self.config.zeroize.public_buffers);
        match &self.pool {
            Some(pool) => scope.with_pool(pool.clone()),
            None => scope,
        }
    }

    /// Run one native operation.
    ///
    /// `call` marshals its inputs through the scope, performs the native call
    /// and returns its code. When `policy` is given it is bound for the
    /// duration of the call.
    pub fn invoke<'a, F>(
        &self,
        op: &str,
        shape: CallShape,
        policy: Option<Arc<dyn Kem>>,
        call: F,
    ) -> BridgeResult<()>
    where
        F: FnOnce(&mut CallScope<'a>) -> BridgeResult<c_int>,
    {
        tracing::debug!(op, ?shape, bound = policy.is_some(), "native call");

        let _binding = policy.map(PolicyBinding::bind).transpose()?;
        let rc = {
            let mut scope = self.scope(shape);
            call(&mut scope)?
        };

        match BridgeError::from_native(op, rc) {
            None => {
                tracing::debug!(op, "native call succeeded");
                Ok(())
            }
            Some(err) => {
                if err.is_bit_leak() {
                    tracing::error!(op, "native call reported a bit leak");
                } else {
                    tracing::debug!(op, rc, error = %err, "native call failed");
                }
                Err(err)
            }
        }
    }
}

impl Default for Bridge {
    fn default() -> Self {
        let config = BridgeConfig::default();
        let pool = SecretBlockPool::new(config.pool.blocks, config.pool.block_size);
        Self { config, pool }
    }
}
