//! Buffer Transfer and Zeroization
//!
//! Moves byte buffers across the C boundary with explicit ownership and
//! wipes secret material before its memory is released.
//!
//! # Architecture
//!
//! ```text
//! Rust bytes ──► CallScope ──┬─ BorrowedView ──► CmemView  (aliases Rust memory)
//!                (strategy)  │
//!                            └─ OwnedCopy ─────► PoolBlock (small, pre-allocated)
//!                                               OwnedCmem (libc::malloc)
//!                                               OwnedCmems (batches)
//!
//! native Cmem/Cmems ──► from_native / batch_from_native ──► Vec<u8> (wiped + freed)
//! ```

mod batch;
mod cmem;
mod pool;
mod strategy;
mod wipe;

pub use batch::{batch_from_native, batch_to_native, free_cmems, Cmems, OwnedCmems};
pub use cmem::{
    alloc_cmem, free_cmem, from_native, from_native_secret, to_native_owned, to_native_view,
    Cmem, CmemView, OwnedCmem,
};
pub use pool::{PoolBlock, SecretBlockPool, DEFAULT_BLOCKS, DEFAULT_BLOCK_SIZE};
pub use strategy::{select, CallScope, CallShape, Strategy};
pub use wipe::{release_native, wipe_raw, Secrecy, SecretBytes};
