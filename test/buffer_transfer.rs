//! Integration tests for buffer and batch transfer
//!
//! Exercises the public memory API the way a binding for a native protocol
//! call uses it: marshal inputs, let "native code" produce outputs, take
//! ownership of them back.

use std::os::raw::c_int;

use mpc_bridge::error::codes;
use mpc_bridge::memory::{
    alloc_cmem, batch_from_native, batch_to_native, from_native, from_native_secret,
    to_native_owned, to_native_view, CallScope, Cmems, SecretBlockPool, Strategy,
};
use mpc_bridge::{Bridge, BridgeConfig, CallShape, Cmem};

/// Native-style operation that echoes a batch back with every entry reversed
unsafe extern "C" fn native_reverse_all(input: Cmems, out: *mut Cmems) -> c_int {
    let mut entries = Vec::new();
    let sizes = if input.count > 0 {
        std::slice::from_raw_parts(input.sizes, input.count as usize)
    } else {
        &[]
    };
    let mut offset = 0usize;
    for &len in sizes {
        let entry = if len > 0 {
            std::slice::from_raw_parts(input.data.add(offset), len as usize).to_vec()
        } else {
            Vec::new()
        };
        offset += len as usize;
        entries.push(entry.into_iter().rev().collect::<Vec<u8>>());
    }
    match batch_to_native(&entries) {
        Ok(batch) => {
            *out = batch.into_raw();
            codes::SUCCESS
        }
        Err(err) => err.code(),
    }
}

/// Native-style getter that copies a field out of a serialized blob
unsafe extern "C" fn native_get_field(blob: Cmem, offset: i32, len: i32, out: *mut Cmem) -> c_int {
    if offset < 0 || len < 0 || offset + len > blob.size {
        return codes::E_BADARG;
    }
    let field = &blob.as_slice()[offset as usize..(offset + len) as usize];
    *out = alloc_cmem(field);
    codes::SUCCESS
}

#[test]
fn test_batch_scenario_with_empty_entries() {
    let items: Vec<Vec<u8>> = vec![vec![], vec![1, 2, 3], vec![], vec![4]];
    let batch = batch_to_native(&items).unwrap();
    assert_eq!(batch.count(), 4);
    assert_eq!(batch.lengths(), vec![0, 3, 0, 1]);
    assert_eq!(batch.total_len(), 4);

    let back = unsafe { batch_from_native(batch.into_raw()) }.unwrap();
    assert_eq!(back, items);
}

#[test]
fn test_no_buffers_differs_from_empty_buffers() {
    let none: Vec<Vec<u8>> = vec![];
    let two_empty: Vec<Vec<u8>> = vec![vec![], vec![]];

    let none_raw = batch_to_native(&none).unwrap().into_raw();
    let empty_raw = batch_to_native(&two_empty).unwrap().into_raw();
    assert_eq!(none_raw.count, 0);
    assert_eq!(empty_raw.count, 2);

    assert_eq!(unsafe { batch_from_native(none_raw) }.unwrap(), none);
    assert_eq!(unsafe { batch_from_native(empty_raw) }.unwrap(), two_empty);
}

#[test]
fn test_batch_through_native_call() {
    let bridge = Bridge::new();
    let items = vec![b"abc".to_vec(), Vec::new(), b"xy".to_vec()];
    let mut out = Cmems::empty();

    bridge
        .invoke("reverse_all", CallShape::MultiStep, None, |scope| {
            let input = scope.input_batch(&items)?;
            Ok(unsafe { native_reverse_all(input, &mut out) })
        })
        .unwrap();

    let back = unsafe { batch_from_native(out) }.unwrap();
    assert_eq!(back, vec![b"cba".to_vec(), Vec::new(), b"yx".to_vec()]);
}

#[test]
fn test_single_round_trip_borrows() {
    let bridge = Bridge::new();
    let blob = b"header:public-key-bytes".to_vec();
    let mut field = Cmem::empty();

    bridge
        .invoke("get_field", CallShape::SingleRoundTrip, None, |scope| {
            assert_eq!(scope.strategy(), Strategy::BorrowedView);
            let raw = scope.public_input(&blob)?;
            assert_eq!(raw.data as *const u8, blob.as_ptr());
            Ok(unsafe { native_get_field(raw, 7, 16, &mut field) })
        })
        .unwrap();

    assert_eq!(unsafe { from_native(field) }, b"public-key-bytes");
}

#[test]
fn test_native_error_code_surfaces() {
    let bridge = Bridge::new();
    let blob = b"short".to_vec();
    let mut field = Cmem::empty();
    let err = bridge
        .invoke("get_field", CallShape::SingleRoundTrip, None, |scope| {
            let raw = scope.public_input(&blob)?;
            Ok(unsafe { native_get_field(raw, 2, 10, &mut field) })
        })
        .unwrap_err();
    assert_eq!(err.code(), codes::E_BADARG);
    assert!(field.data.is_null());
}

#[test]
fn test_owned_and_view_roundtrips() {
    let data = b"serialized key share".to_vec();

    let view = to_native_view(&data).unwrap();
    assert_eq!(unsafe { view.raw().as_slice() }, data.as_slice());

    let owned = to_native_owned(&data).unwrap();
    assert_eq!(unsafe { from_native(owned.into_raw()) }, data);

    let secret = unsafe { from_native_secret(alloc_cmem(&data)) };
    assert_eq!(secret.as_slice(), data.as_slice());
}

#[test]
fn test_force_owned_config_copies_single_round_trip() {
    let mut config = BridgeConfig::default();
    config.strategy.force_owned = true;
    let bridge = Bridge::from_config(config).unwrap();
    let blob = vec![1u8; 16];

    bridge
        .invoke("get_field", CallShape::SingleRoundTrip, None, |scope| {
            let raw = scope.public_input(&blob)?;
            assert_ne!(raw.data as *const u8, blob.as_ptr());
            Ok(codes::SUCCESS)
        })
        .unwrap();
}

#[test]
fn test_scope_release_wipes_pooled_inputs() {
    let pool = SecretBlockPool::new(1, 64).unwrap();
    let secret = [0xEEu8; 48];
    {
        let mut scope = CallScope::new(Strategy::OwnedCopy).with_pool(pool.clone());
        let raw = scope.secret_input(&secret).unwrap();
        assert_eq!(unsafe { raw.as_slice() }, &secret);
    }
    let block = unsafe { pool.inspect_block(0) }.unwrap();
    assert!(block.iter().all(|&b| b == 0));
}
