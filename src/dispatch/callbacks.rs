//! C-callable KEM entry points
//!
//! Native code reaches the bound policy only through these functions. Each
//! one resolves the thread's binding first, then validates its arguments,
//! then runs the policy with panics caught. Results are handed to native code
//! as owned `malloc` buffers it releases with `free` or [`bridge_free_cmem`].
//!
//! ```text
//! native op ──► kem_encapsulate(ek, seed, &ct, &ss)
//!                   │
//!                   ├─ get_policy_tls() ─► handle ─► registry ─► Arc<dyn Kem>
//!                   └─ Kem::encapsulate ─► ct, ss ─► OwnedCmem::into_raw
//! ```

use std::os::raw::{c_int, c_void};
use std::panic::{self, AssertUnwindSafe};

use super::binding::current_policy;
use crate::error::{codes, BridgeError, BridgeResult};
use crate::handles::{self, Handle, Shared};
use crate::kem::SEED_LEN;
use crate::memory::{free_cmem, free_cmems, Cmem, Cmems, OwnedCmem, Secrecy};

/// `int (*)(cmem ek, cmem seed, cmem* ct_out, cmem* ss_out)`
pub type KemEncapFn = unsafe extern "C" fn(Cmem, Cmem, *mut Cmem, *mut Cmem) -> c_int;
/// `int (*)(const void* sk_handle, cmem ct, cmem* ss_out)`
pub type KemDecapFn = unsafe extern "C" fn(*const c_void, Cmem, *mut Cmem) -> c_int;
/// `int (*)(const void* sk_handle, cmem* ek_out)`
pub type KemDerivePublicFn = unsafe extern "C" fn(*const c_void, *mut Cmem) -> c_int;

/// Function table handed to native code
#[repr(C)]
#[derive(Clone, Copy)]
pub struct KemCallbacks {
    pub encapsulate: KemEncapFn,
    pub decapsulate: KemDecapFn,
    pub derive_public: KemDerivePublicFn,
}

impl std::fmt::Debug for KemCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KemCallbacks")
            .field("encapsulate", &(self.encapsulate as *const c_void))
            .field("decapsulate", &(self.decapsulate as *const c_void))
            .field("derive_public", &(self.derive_public as *const c_void))
            .finish()
    }
}

/// The callback table for this bridge
pub fn kem_callbacks() -> KemCallbacks {
    KemCallbacks {
        encapsulate: kem_encapsulate,
        decapsulate: kem_decapsulate,
        derive_public: kem_derive_public,
    }
}

#[no_mangle]
pub extern "C" fn get_ffi_kem_encap_fn() -> KemEncapFn {
    kem_encapsulate
}

#[no_mangle]
pub extern "C" fn get_ffi_kem_decap_fn() -> KemDecapFn {
    kem_decapsulate
}

#[no_mangle]
pub extern "C" fn get_ffi_kem_dk_to_ek_fn() -> KemDerivePublicFn {
    kem_derive_public
}

/// Run a callback body, mapping errors and panics to native codes
fn guard_callback<F>(op: &'static str, body: F) -> c_int
where
    F: FnOnce() -> BridgeResult<()>,
{
    match panic::catch_unwind(AssertUnwindSafe(body)) {
        Ok(Ok(())) => codes::SUCCESS,
        Ok(Err(err)) => {
            tracing::warn!(op, error = %err, "KEM callback failed");
            err.code()
        }
        Err(_) => {
            tracing::error!(op, "panic in KEM policy");
            codes::E_CRYPTO
        }
    }
}

/// Reset an out-parameter to the empty buffer
unsafe fn clear_out(out: *mut Cmem) {
    if !out.is_null() {
        *out = Cmem::empty();
    }
}

fn require_out(out: *mut Cmem, name: &str) -> BridgeResult<()> {
    if out.is_null() {
        Err(BridgeError::BadArgument(format!("null {} out-parameter", name)))
    } else {
        Ok(())
    }
}

fn require_input(buf: &Cmem, name: &str) -> BridgeResult<()> {
    if buf.is_empty() {
        Err(BridgeError::BadArgument(format!("empty {}", name)))
    } else {
        Ok(())
    }
}

fn resolve_private_key(sk_handle: *const c_void) -> BridgeResult<Shared> {
    let handle = Handle::from_ptr(sk_handle)
        .ok_or_else(|| BridgeError::BadArgument("null private key handle".into()))?;
    handles::global()
        .lookup(handle)
        .ok_or_else(|| BridgeError::NotFound(format!("private key handle {}", handle)))
}

/// Encapsulate to `ek` with the deterministic `seed` (exactly 32 bytes).
///
/// # Safety
/// `ek` and `seed` must be valid for reads of their sizes; `ct_out` and
/// `ss_out` must be null or valid for writes.
#[no_mangle]
pub unsafe extern "C" fn kem_encapsulate(
    ek: Cmem,
    seed: Cmem,
    ct_out: *mut Cmem,
    ss_out: *mut Cmem,
) -> c_int {
    clear_out(ct_out);
    clear_out(ss_out);

    guard_callback("kem_encapsulate", || {
        let policy = current_policy()?;

        require_out(ct_out, "ciphertext")?;
        require_out(ss_out, "shared secret")?;
        require_input(&ek, "encapsulation key")?;
        let rho: &[u8; SEED_LEN] = seed.as_slice().try_into().map_err(|_| {
            BridgeError::BadArgument(format!("seed must be {} bytes, got {}", SEED_LEN, seed.len()))
        })?;

        let (ct, ss) = policy.encapsulate(ek.as_slice(), rho)?;

        let ct = OwnedCmem::copy_from(&ct, Secrecy::Public)?;
        let ss = OwnedCmem::copy_from(&ss, Secrecy::Secret)?;
        *ct_out = ct.into_raw();
        *ss_out = ss.into_raw();
        Ok(())
    })
}

/// Recover the shared secret from `ct` with the registered private key
/// `sk_handle`.
///
/// # Safety
/// `ct` must be valid for reads of its size; `ss_out` must be null or valid
/// for writes.
#[no_mangle]
pub unsafe extern "C" fn kem_decapsulate(
    sk_handle: *const c_void,
    ct: Cmem,
    ss_out: *mut Cmem,
) -> c_int {
    clear_out(ss_out);

    guard_callback("kem_decapsulate", || {
        let policy = current_policy()?;

        require_out(ss_out, "shared secret")?;
        require_input(&ct, "ciphertext")?;
        let sk = resolve_private_key(sk_handle)?;

        let ss = policy.decapsulate(&*sk, ct.as_slice())?;

        *ss_out = OwnedCmem::copy_from(&ss, Secrecy::Secret)?.into_raw();
        Ok(())
    })
}

/// Derive the encapsulation key for the registered private key `sk_handle`.
///
/// # Safety
/// `ek_out` must be null or valid for writes.
#[no_mangle]
pub unsafe extern "C" fn kem_derive_public(sk_handle: *const c_void, ek_out: *mut Cmem) -> c_int {
    clear_out(ek_out);

    guard_callback("kem_derive_public", || {
        let policy = current_policy()?;

        require_out(ek_out, "encapsulation key")?;
        let sk = resolve_private_key(sk_handle)?;

        let ek = policy.derive_public(&*sk)?;

        *ek_out = OwnedCmem::copy_from(&ek, Secrecy::Public)?.into_raw();
        Ok(())
    })
}

/// Release a buffer the bridge handed to native code
///
/// # Safety
/// `mem` must be empty or a buffer produced by this bridge and not yet freed.
#[no_mangle]
pub unsafe extern "C" fn bridge_free_cmem(mem: Cmem) {
    free_cmem(mem);
}

/// Release a batch the bridge handed to native code
///
/// # Safety
/// `mems` must be empty or a batch produced by this bridge and not yet freed.
#[no_mangle]
pub unsafe extern "C" fn bridge_free_cmems(mems: Cmems) {
    free_cmems(mems);
}
