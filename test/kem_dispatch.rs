//! Integration tests for KEM policy dispatch
//!
//! A stand-in for the native protocol library calls back into the bound
//! policy through the same C entry points the real library resolves.

use std::any::Any;
use std::os::raw::c_int;
use std::sync::Arc;
use std::thread;

use mpc_bridge::dispatch::{
    bridge_free_cmem, get_ffi_kem_decap_fn, get_ffi_kem_dk_to_ek_fn, get_ffi_kem_encap_fn,
    is_bound, kem_callbacks, PolicyBinding,
};
use mpc_bridge::error::codes;
use mpc_bridge::handles;
use mpc_bridge::memory::{alloc_cmem, from_native};
use mpc_bridge::{Bridge, BridgeError, CallShape, Cmem, Kem, KemError, SecretBytes, X25519Kem};
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};

/// Native-style operation: encapsulates through the callback table and
/// returns the ciphertext plus a digest of the shared secret.
unsafe extern "C" fn native_pve_encrypt(
    ek: Cmem,
    seed: Cmem,
    ct_out: *mut Cmem,
    digest_out: *mut Cmem,
) -> c_int {
    let encap = get_ffi_kem_encap_fn();
    let mut ss = Cmem::empty();
    let rc = encap(ek, seed, ct_out, &mut ss);
    if rc != codes::SUCCESS {
        return rc;
    }
    let digest = Sha256::digest(ss.as_slice());
    bridge_free_cmem(ss);
    *digest_out = alloc_cmem(&digest);
    codes::SUCCESS
}

/// Tags every ciphertext with the policy id so tests can tell policies apart
struct TaggedKem(u8);

impl Kem for TaggedKem {
    fn encapsulate(&self, _ek: &[u8], rho: &[u8; 32]) -> Result<(Vec<u8>, SecretBytes), KemError> {
        let mut ct = vec![self.0];
        ct.extend_from_slice(rho);
        Ok((ct, SecretBytes::new(rho.to_vec())))
    }

    fn decapsulate(
        &self,
        _sk: &(dyn Any + Send + Sync),
        _ct: &[u8],
    ) -> Result<SecretBytes, KemError> {
        Err(KemError::NotSupported("decapsulate"))
    }
}

fn view(bytes: &[u8]) -> Cmem {
    Cmem {
        data: bytes.as_ptr() as *mut u8,
        size: bytes.len() as i32,
    }
}

#[test]
fn test_encapsulate_scenario() {
    let bridge = Bridge::new();
    let (_sk, ek) = X25519Kem::generate(&mut OsRng);
    let seed = [0x5Cu8; 32];
    let mut ct = Cmem::empty();
    let mut digest = Cmem::empty();

    bridge
        .invoke(
            "pve_encrypt",
            CallShape::InvokesCallbacks,
            Some(Arc::new(X25519Kem)),
            |scope| {
                let ek = scope.public_input(&ek)?;
                let seed = scope.secret_input(&seed)?;
                Ok(unsafe { native_pve_encrypt(ek, seed, &mut ct, &mut digest) })
            },
        )
        .unwrap();

    let ct = unsafe { from_native(ct) };
    let digest = unsafe { from_native(digest) };
    assert_eq!(ct.len(), 32);
    assert!(ct.iter().any(|&b| b != 0));
    assert_eq!(digest.len(), 32);

    // Same call after the binding is gone
    let mut ct = Cmem::empty();
    let mut ss = Cmem::empty();
    let rc = unsafe { get_ffi_kem_encap_fn()(view(&ek), view(&seed), &mut ct, &mut ss) };
    assert_eq!(rc, codes::E_NOT_FOUND);
    assert!(ct.data.is_null());
}

#[test]
fn test_decapsulate_agrees_with_encapsulate() {
    let (sk, ek) = X25519Kem::generate(&mut OsRng);
    let key = handles::global().guard(sk);
    let seed = [0x01u8; 32];
    let policy: Arc<dyn Kem> = Arc::new(X25519Kem);

    let _binding = PolicyBinding::bind(policy).unwrap();
    let table = kem_callbacks();

    let mut ct = Cmem::empty();
    let mut ss = Cmem::empty();
    let rc = unsafe { (table.encapsulate)(view(&ek), view(&seed), &mut ct, &mut ss) };
    assert_eq!(rc, codes::SUCCESS);
    let ct = unsafe { from_native(ct) };
    let ss = unsafe { from_native(ss) };

    let mut recovered = Cmem::empty();
    let rc = unsafe { get_ffi_kem_decap_fn()(key.handle().as_ptr(), view(&ct), &mut recovered) };
    assert_eq!(rc, codes::SUCCESS);
    assert_eq!(unsafe { from_native(recovered) }, ss);

    let mut derived = Cmem::empty();
    let rc = unsafe { (table.derive_public)(key.handle().as_ptr(), &mut derived) };
    assert_eq!(rc, codes::SUCCESS);
    assert_eq!(unsafe { from_native(derived) }, ek);
}

#[test]
fn test_decapsulate_after_unbind_is_not_found() {
    let bridge = Bridge::new();
    let (sk, ek) = X25519Kem::generate(&mut OsRng);
    let key = handles::global().guard(sk);
    let seed = [0x07u8; 32];
    let mut ct = Cmem::empty();
    let mut ss = Cmem::empty();

    bridge
        .invoke(
            "pve_encrypt",
            CallShape::InvokesCallbacks,
            Some(Arc::new(X25519Kem)),
            |_| Ok(unsafe { get_ffi_kem_encap_fn()(view(&ek), view(&seed), &mut ct, &mut ss) }),
        )
        .unwrap();
    let ct = unsafe { from_native(ct) };
    let _ = unsafe { from_native(ss) };
    assert!(!is_bound());

    let mut recovered = Cmem::empty();
    let rc = unsafe { get_ffi_kem_decap_fn()(key.handle().as_ptr(), view(&ct), &mut recovered) };
    assert_eq!(rc, codes::E_NOT_FOUND);
    assert!(recovered.data.is_null());

    let mut derived = Cmem::empty();
    let rc = unsafe { get_ffi_kem_dk_to_ek_fn()(key.handle().as_ptr(), &mut derived) };
    assert_eq!(rc, codes::E_NOT_FOUND);
    assert!(derived.data.is_null());
}

#[test]
fn test_concurrent_bindings_are_isolated() {
    let workers: Vec<_> = (1..=8u8)
        .map(|id| {
            thread::spawn(move || {
                let bridge = Bridge::new();
                let seed = [id; 32];
                let ek = [9u8; 32];
                for _ in 0..50 {
                    let mut ct = Cmem::empty();
                    let mut digest = Cmem::empty();
                    bridge
                        .invoke(
                            "pve_encrypt",
                            CallShape::InvokesCallbacks,
                            Some(Arc::new(TaggedKem(id))),
                            |scope| {
                                let ek = scope.public_input(&ek)?;
                                let seed = scope.secret_input(&seed)?;
                                Ok(unsafe { native_pve_encrypt(ek, seed, &mut ct, &mut digest) })
                            },
                        )
                        .unwrap();
                    let ct = unsafe { from_native(ct) };
                    let _ = unsafe { from_native(digest) };
                    assert_eq!(ct[0], id);
                    assert_eq!(&ct[1..], &seed);
                }
                assert!(!is_bound());
            })
        })
        .collect();

    for worker in workers {
        worker.join().unwrap();
    }
}

#[test]
fn test_nested_bind_is_refused() {
    let bridge = Bridge::new();
    bridge
        .invoke(
            "outer",
            CallShape::InvokesCallbacks,
            Some(Arc::new(TaggedKem(1))),
            |_| {
                let inner: Arc<dyn Kem> = Arc::new(TaggedKem(2));
                let err = bridge
                    .invoke("inner", CallShape::InvokesCallbacks, Some(inner), |_| {
                        Ok(codes::SUCCESS)
                    })
                    .unwrap_err();
                assert_eq!(err, BridgeError::AlreadyBound);
                assert!(is_bound());
                Ok(codes::SUCCESS)
            },
        )
        .unwrap();
    assert!(!is_bound());
}

#[test]
fn test_panic_during_call_releases_binding() {
    let bridge = Bridge::new();

    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        bridge.invoke(
            "pve_encrypt",
            CallShape::InvokesCallbacks,
            Some(Arc::new(X25519Kem)),
            |_| -> mpc_bridge::BridgeResult<c_int> { panic!("native stand-in crashed") },
        )
    }));

    assert!(outcome.is_err());
    assert!(!is_bound());
    let mut ct = Cmem::empty();
    let mut ss = Cmem::empty();
    let rc = unsafe {
        get_ffi_kem_encap_fn()(view(&[9u8; 32]), view(&[0u8; 32]), &mut ct, &mut ss)
    };
    assert_eq!(rc, codes::E_NOT_FOUND);
}

#[test]
fn test_policy_error_propagates_as_code() {
    let bridge = Bridge::new();
    let key = handles::global().guard(());
    let ct = [1u8; 33];
    let err = bridge
        .invoke(
            "pve_decrypt",
            CallShape::InvokesCallbacks,
            Some(Arc::new(TaggedKem(3))),
            |_| {
                let mut ss = Cmem::empty();
                Ok(unsafe { get_ffi_kem_decap_fn()(key.handle().as_ptr(), view(&ct), &mut ss) })
            },
        )
        .unwrap_err();
    assert!(matches!(err, BridgeError::NotSupported(_)));
}
