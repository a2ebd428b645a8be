//! Call-scoped policy binding
//!
//! ```text
//! Unbound ──bind──► Bound ──drop──► Unbound
//! ```
//!
//! Binding registers the policy in the global handle registry and publishes
//! the handle in the thread-local slot. The guard is `!Send`, so it is
//! dropped on the thread it was created on. Dropping it releases the handle
//! on every exit path and clears the slot if the slot still holds that handle.

use std::marker::PhantomData;
use std::sync::Arc;

use super::tls::{clear_policy_tls, get_policy_tls, set_policy_tls};
use crate::error::{BridgeError, BridgeResult};
use crate::handles::{self, Handle};
use crate::kem::Kem;

/// Registry entry for a bound policy
pub(crate) struct BoundPolicy(pub(crate) Arc<dyn Kem>);

/// Guard for the policy bound on the current thread
#[derive(Debug)]
pub struct PolicyBinding {
    handle: Handle,
    // Pins the guard to the binding thread.
    _not_send: PhantomData<*const ()>,
}

impl PolicyBinding {
    /// Bind `policy` to the current thread for the duration of one native call.
    ///
    /// Fails with [`BridgeError::AlreadyBound`] if a policy is already bound.
    pub fn bind(policy: Arc<dyn Kem>) -> BridgeResult<Self> {
        if !get_policy_tls().is_null() {
            tracing::warn!("refusing to bind a KEM policy over an existing binding");
            return Err(BridgeError::AlreadyBound);
        }

        let handle = handles::global().register(BoundPolicy(policy));
        set_policy_tls(handle.as_ptr());
        tracing::debug!(handle = %handle, "bound KEM policy");

        Ok(Self {
            handle,
            _not_send: PhantomData,
        })
    }

    pub fn handle(&self) -> Handle {
        self.handle
    }
}

impl Drop for PolicyBinding {
    fn drop(&mut self) {
        // Only clear the slot while it still names this binding.
        if get_policy_tls() == self.handle.as_ptr() {
            clear_policy_tls();
        } else {
            tracing::warn!(handle = %self.handle, "policy slot no longer holds this binding");
        }
        let _ = handles::global().release(self.handle);
        tracing::debug!(handle = %self.handle, "unbound KEM policy");
    }
}

/// Resolve the policy bound on the current thread
pub fn current_policy() -> BridgeResult<Arc<dyn Kem>> {
    let handle = Handle::from_ptr(get_policy_tls())
        .ok_or_else(|| BridgeError::NotFound("no KEM policy bound on this thread".into()))?;
    handles::global()
        .lookup_as::<BoundPolicy>(handle)
        .map(|bound| Arc::clone(&bound.0))
        .ok_or_else(|| BridgeError::NotFound(format!("KEM policy handle {}", handle)))
}

/// Whether a policy is bound on the current thread
pub fn is_bound() -> bool {
    !get_policy_tls().is_null()
}

/// Run `f` with `policy` bound, unbinding afterwards even if `f` panics
pub fn with_policy<R>(policy: Arc<dyn Kem>, f: impl FnOnce() -> R) -> BridgeResult<R> {
    let _binding = PolicyBinding::bind(policy)?;
    Ok(f())
}
