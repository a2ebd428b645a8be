//! Allocation Strategy Selector
//!
//! Decides per call whether an input may alias Rust memory (borrowed view) or
//! must be copied into natively-owned memory (owned copy).
//!
//! ```text
//! SingleRoundTrip                          -> BorrowedView
//! MultiStep | InvokesCallbacks | MayBlock  -> OwnedCopy
//! ```
//!
//! Owned copies made for one call live in a [`CallScope`] and are released,
//! wiped, in reverse order when the scope ends.

use std::marker::PhantomData;

use super::batch::{Cmems, OwnedCmems};
use super::cmem::{to_native_view, Cmem, OwnedCmem};
use super::pool::{PoolBlock, SecretBlockPool};
use super::wipe::Secrecy;
use crate::error::BridgeResult;

/// What a native call does with its inputs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallShape {
    /// Reads inputs and returns before anything else runs (deserialize, get-field)
    SingleRoundTrip,
    /// Multi-step protocol execution
    MultiStep,
    /// May call back into Rust policy during the call
    InvokesCallbacks,
    /// May block on network I/O
    MayBlock,
}

/// How inputs cross the boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    BorrowedView,
    OwnedCopy,
}

/// Pick the strategy for a call shape
pub fn select(shape: CallShape, force_owned: bool) -> Strategy {
    if force_owned {
        return Strategy::OwnedCopy;
    }
    match shape {
        CallShape::SingleRoundTrip => Strategy::BorrowedView,
        CallShape::MultiStep | CallShape::InvokesCallbacks | CallShape::MayBlock => {
            Strategy::OwnedCopy
        }
    }
}

// Held only to be dropped when the scope ends.
#[allow(dead_code)]
enum ScopeAlloc {
    Pooled(PoolBlock),
    Heap(OwnedCmem),
    Batch(OwnedCmems),
}

/// Arena for the inputs of one native call
pub struct CallScope<'a> {
    strategy: Strategy,
    pool: Option<SecretBlockPool>,
    wipe_public: bool,
    allocs: Vec<ScopeAlloc>,
    _inputs: PhantomData<&'a [u8]>,
}

impl<'a> CallScope<'a> {
    pub fn new(strategy: Strategy) -> Self {
        Self {
            strategy,
            pool: None,
            wipe_public: false,
            allocs: Vec::new(),
            _inputs: PhantomData,
        }
    }

    /// Serve small owned copies from `pool`
    pub fn with_pool(mut self, pool: SecretBlockPool) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Also wipe public owned copies on release
    pub fn wipe_public(mut self, wipe: bool) -> Self {
        self.wipe_public = wipe;
        self
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    /// Number of owned allocations held by the scope
    pub fn owned_count(&self) -> usize {
        self.allocs.len()
    }

    /// Marshal a secret input
    pub fn input(&mut self, bytes: &'a [u8]) -> BridgeResult<Cmem> {
        self.marshal(bytes, Secrecy::Secret)
    }

    /// Marshal a secret input. Same as [`CallScope::input`].
    pub fn secret_input(&mut self, bytes: &'a [u8]) -> BridgeResult<Cmem> {
        self.marshal(bytes, Secrecy::Secret)
    }

    /// Marshal a public input (public key, proof, session id)
    pub fn public_input(&mut self, bytes: &'a [u8]) -> BridgeResult<Cmem> {
        self.marshal(bytes, Secrecy::Public)
    }

    /// Marshal a batch. Batches are always copied.
    pub fn input_batch<T: AsRef<[u8]>>(&mut self, items: &[T]) -> BridgeResult<Cmems> {
        let batch = OwnedCmems::copy_from(items, Secrecy::Secret)?;
        let raw = batch.raw();
        self.allocs.push(ScopeAlloc::Batch(batch));
        Ok(raw)
    }

    fn marshal(&mut self, bytes: &'a [u8], secrecy: Secrecy) -> BridgeResult<Cmem> {
        match self.strategy {
            Strategy::BorrowedView => Ok(to_native_view(bytes)?.raw()),
            Strategy::OwnedCopy => {
                if bytes.is_empty() {
                    return Ok(Cmem::empty());
                }
                if let Some(block) = self.pool.as_ref().and_then(|p| p.acquire_with(bytes)) {
                    let raw = block.cmem();
                    self.allocs.push(ScopeAlloc::Pooled(block));
                    return Ok(raw);
                }
                let owned = OwnedCmem::copy_from(bytes, secrecy)?.wipe_public(self.wipe_public);
                let raw = owned.raw();
                self.allocs.push(ScopeAlloc::Heap(owned));
                Ok(raw)
            }
        }
    }
}

impl Drop for CallScope<'_> {
    fn drop(&mut self) {
        while let Some(alloc) = self.allocs.pop() {
            drop(alloc);
        }
    }
}

impl std::fmt::Debug for CallScope<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallScope")
            .field("strategy", &self.strategy)
            .field("owned", &self.allocs.len())
            .finish()
    }
}
