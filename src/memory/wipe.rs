//! Secure Zeroization (wipe-before-release)
//!
//! Overwrites buffers that may hold key material before their allocation is
//! returned to the allocator. The overwrite goes through the `zeroize` crate,
//! which uses volatile writes followed by a compiler fence so the stores
//! cannot be removed as dead.

use std::ptr::NonNull;

use zeroize::Zeroize;

/// Whether a buffer may contain secret material
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Secrecy {
    /// Private keys, scalars, shared secrets, plaintexts, key shares.
    /// Always wiped before release.
    #[default]
    Secret,
    /// Public keys, proofs, commitments, session ids.
    /// Wiping is skipped unless the bridge is configured to wipe everything.
    Public,
}

impl Secrecy {
    /// Whether a release of this buffer must wipe it first
    pub fn must_wipe(self, wipe_public: bool) -> bool {
        match self {
            Secrecy::Secret => true,
            Secrecy::Public => wipe_public,
        }
    }
}

/// Rust-side copy of secret bytes, wiped on drop
pub type SecretBytes = zeroize::Zeroizing<Vec<u8>>;

/// Overwrite `len` bytes at `ptr` with zeros.
///
/// # Safety
/// `ptr` must be valid for writes of `len` bytes (or `len` must be 0).
pub unsafe fn wipe_raw(ptr: *mut u8, len: usize) {
    if ptr.is_null() || len == 0 {
        return;
    }
    std::slice::from_raw_parts_mut(ptr, len).zeroize();
}

/// Wipe (when required) and free a block obtained from `libc::malloc`.
///
/// # Safety
/// `ptr` must come from `libc::malloc`, be at least `len` bytes long and not
/// have been freed already.
pub unsafe fn release_native(ptr: NonNull<u8>, len: usize, wipe: bool) {
    if wipe {
        wipe_raw(ptr.as_ptr(), len);
    }
    libc::free(ptr.as_ptr() as *mut libc::c_void);
}
