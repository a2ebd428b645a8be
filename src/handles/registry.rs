//! Opaque Handle Registry
//!
//! Native code never sees a pointer into a Rust object. Instead the object is
//! stored here under an integer id and only the id crosses the boundary.
//! Ids come from one process-wide counter, so two registries never hand out
//! the same value and a released id is never reused.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::os::raw::c_void;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{BridgeError, BridgeResult};

// Handles cross the boundary as `void*`; ids above the seed need 64 bits.
#[cfg(not(target_pointer_width = "64"))]
compile_error!("mpc-bridge handles require a 64-bit target");

/// First id handed out. Easy to recognize in a debugger and far from any
/// small integer a confused caller might pass.
pub const HANDLE_SEED: u64 = 0xDEAD_BEEF_0000;

static NEXT_HANDLE: AtomicU64 = AtomicU64::new(HANDLE_SEED);

fn next_handle() -> Handle {
    Handle(NEXT_HANDLE.fetch_add(1, Ordering::Relaxed))
}

/// Object stored behind a handle
pub type Shared = Arc<dyn Any + Send + Sync>;

/// Integer id for a registered object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle(u64);

impl Handle {
    pub fn id(self) -> u64 {
        self.0
    }

    /// Rebuild a handle from an id native code handed back
    pub fn from_id(id: u64) -> Self {
        Handle(id)
    }

    /// Encode as the opaque `void*` native code stores. Never dereferenced.
    pub fn as_ptr(self) -> *const c_void {
        self.0 as usize as *const c_void
    }

    /// Decode a `void*` handle. Null is never a valid handle.
    pub fn from_ptr(ptr: *const c_void) -> Option<Self> {
        if ptr.is_null() {
            None
        } else {
            Some(Handle(ptr as usize as u64))
        }
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Map from handle to object
#[derive(Default)]
pub struct HandleRegistry {
    objects: RwLock<HashMap<u64, Shared>>,
}

impl HandleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `object` and return its handle
    pub fn register<T: Any + Send + Sync>(&self, object: T) -> Handle {
        self.register_arc(Arc::new(object))
    }

    /// Store an already shared object
    pub fn register_arc(&self, object: Shared) -> Handle {
        let handle = next_handle();
        self.objects.write().insert(handle.0, object);
        tracing::debug!(handle = %handle, "registered handle");
        handle
    }

    /// Resolve a handle. Unknown ids, including ones never issued, give `None`.
    pub fn lookup(&self, handle: Handle) -> Option<Shared> {
        self.objects.read().get(&handle.0).cloned()
    }

    /// Resolve a handle and downcast to `T`
    pub fn lookup_as<T: Any + Send + Sync>(&self, handle: Handle) -> Option<Arc<T>> {
        self.lookup(handle)?.downcast::<T>().ok()
    }

    /// Remove a mapping. Releasing an unknown or already released handle is
    /// reported, never fatal.
    pub fn release(&self, handle: Handle) -> BridgeResult<Shared> {
        match self.objects.write().remove(&handle.0) {
            Some(object) => {
                tracing::debug!(handle = %handle, "released handle");
                Ok(object)
            }
            None => {
                tracing::warn!(handle = %handle, "release of unknown handle");
                Err(BridgeError::NotFound(format!("handle {}", handle)))
            }
        }
    }

    pub fn contains(&self, handle: Handle) -> bool {
        self.objects.read().contains_key(&handle.0)
    }

    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }

    /// Register `object` and release it again when the guard drops
    pub fn guard<T: Any + Send + Sync>(&self, object: T) -> HandleGuard<'_> {
        HandleGuard {
            registry: self,
            handle: self.register(object),
        }
    }
}

impl fmt::Debug for HandleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandleRegistry")
            .field("len", &self.len())
            .finish()
    }
}

lazy_static::lazy_static! {
    /// Process-wide registry used by the C entry points
    static ref GLOBAL_REGISTRY: HandleRegistry = HandleRegistry::new();
}

/// The process-wide registry
pub fn global() -> &'static HandleRegistry {
    &GLOBAL_REGISTRY
}

/// A registered handle that is released exactly once, on drop
pub struct HandleGuard<'r> {
    registry: &'r HandleRegistry,
    handle: Handle,
}

impl HandleGuard<'_> {
    pub fn handle(&self) -> Handle {
        self.handle
    }

    /// Keep the mapping alive past the guard; the caller must release it
    pub fn into_handle(self) -> Handle {
        let handle = self.handle;
        std::mem::forget(self);
        handle
    }
}

impl Drop for HandleGuard<'_> {
    fn drop(&mut self) {
        let _ = self.registry.release(self.handle);
    }
}

impl fmt::Debug for HandleGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("HandleGuard").field(&self.handle).finish()
    }
}
