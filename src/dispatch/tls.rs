//! Thread-local policy slot
//!
//! One opaque pointer-sized value per OS thread. It holds the handle of the
//! policy bound for the native call running on that thread, or null.

use std::cell::Cell;
use std::os::raw::c_void;
use std::ptr;

thread_local! {
    static POLICY_SLOT: Cell<*const c_void> = const { Cell::new(ptr::null()) };
}

/// Publish `policy` for the current thread
#[no_mangle]
pub extern "C" fn set_policy_tls(policy: *const c_void) {
    let previous = POLICY_SLOT.with(|slot| slot.replace(policy));
    if !previous.is_null() && previous != policy {
        tracing::warn!(
            previous = previous as usize,
            policy = policy as usize,
            "policy slot overwritten while bound"
        );
    }
}

/// Clear the current thread's slot
#[no_mangle]
pub extern "C" fn clear_policy_tls() {
    POLICY_SLOT.with(|slot| slot.set(ptr::null()));
}

/// Read the current thread's slot; null when nothing is bound
#[no_mangle]
pub extern "C" fn get_policy_tls() -> *const c_void {
    POLICY_SLOT.with(|slot| slot.get())
}
