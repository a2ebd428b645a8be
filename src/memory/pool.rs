//! Lock-free pool of wipe-on-release native blocks
//!
//! Owned copies of small inputs are served from one pre-allocated native
//! region split into fixed-size blocks. Acquire and release never touch the
//! allocator; every release zeroes the whole block before it goes back on the
//! free list, so a block never carries secrets from one call to the next.
//!
//! The region stays mapped for the lifetime of the pool, which also makes the
//! wipe observable after release.

use crossbeam::queue::ArrayQueue;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::cmem::Cmem;
use super::wipe;

/// Default number of blocks
pub const DEFAULT_BLOCKS: usize = 64;

/// Default block size; large enough for scalars, 32-byte keys and seeds
pub const DEFAULT_BLOCK_SIZE: usize = 256;

/// A block checked out of the pool. Wiped and returned on drop.
pub struct PoolBlock {
    ptr: NonNull<u8>,
    len: usize,
    pool: Arc<PoolInner>,
    index: usize,
}

impl PoolBlock {
    /// Copy `data` into the block. Fails (returning `false`) when it does
    /// not fit; nothing is written in that case.
    pub fn write(&mut self, data: &[u8]) -> bool {
        if data.len() > self.pool.block_size {
            return false;
        }
        unsafe {
            wipe::wipe_raw(self.ptr.as_ptr(), self.len);
            std::ptr::copy_nonoverlapping(data.as_ptr(), self.ptr.as_ptr(), data.len());
        }
        self.len = data.len();
        true
    }

    /// The block contents as a native buffer, valid while the block is held
    pub fn cmem(&self) -> Cmem {
        if self.len == 0 {
            Cmem::empty()
        } else {
            Cmem {
                data: self.ptr.as_ptr(),
                size: self.len as i32,
            }
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    /// Position of this block in the pool
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.pool.block_size
    }
}

impl Drop for PoolBlock {
    fn drop(&mut self) {
        self.pool.release(self.index);
    }
}

// The block is exclusively held until it is returned to the free list.
unsafe impl Send for PoolBlock {}

impl std::fmt::Debug for PoolBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolBlock")
            .field("index", &self.index)
            .field("len", &self.len)
            .finish()
    }
}

struct PoolInner {
    base: NonNull<u8>,
    block_size: usize,
    count: usize,
    free_list: ArrayQueue<usize>,
    in_use: AtomicUsize,
}

impl PoolInner {
    fn new(count: usize, block_size: usize) -> Option<Arc<Self>> {
        if count == 0 || block_size == 0 || block_size > i32::MAX as usize {
            return None;
        }
        count.checked_mul(block_size)?;
        let base = NonNull::new(unsafe { libc::calloc(count, block_size) } as *mut u8)?;

        let free_list = ArrayQueue::new(count);
        for i in 0..count {
            let _ = free_list.push(i);
        }

        Some(Arc::new(Self {
            base,
            block_size,
            count,
            free_list,
            in_use: AtomicUsize::new(0),
        }))
    }

    fn block_ptr(&self, index: usize) -> NonNull<u8> {
        // index < count, so the offset stays inside the region
        unsafe { NonNull::new_unchecked(self.base.as_ptr().add(index * self.block_size)) }
    }

    fn acquire(self: &Arc<Self>) -> Option<PoolBlock> {
        let index = self.free_list.pop()?;
        self.in_use.fetch_add(1, Ordering::Relaxed);
        Some(PoolBlock {
            ptr: self.block_ptr(index),
            len: 0,
            pool: Arc::clone(self),
            index,
        })
    }

    fn release(&self, index: usize) {
        unsafe { wipe::wipe_raw(self.block_ptr(index).as_ptr(), self.block_size) };
        let _ = self.free_list.push(index);
        self.in_use.fetch_sub(1, Ordering::Relaxed);
    }
}

impl Drop for PoolInner {
    fn drop(&mut self) {
        let total = self.count * self.block_size;
        unsafe { wipe::release_native(self.base, total, true) };
    }
}

// The free list hands each block to one holder at a time.
unsafe impl Send for PoolInner {}
unsafe impl Sync for PoolInner {}

/// Pool of fixed-size native blocks, wiped on every release
#[derive(Clone)]
pub struct SecretBlockPool {
    inner: Arc<PoolInner>,
}

impl SecretBlockPool {
    /// Create a pool of `count` blocks of `block_size` bytes.
    ///
    /// Returns `None` if either is zero or the region cannot be allocated.
    pub fn new(count: usize, block_size: usize) -> Option<Self> {
        PoolInner::new(count, block_size).map(|inner| Self { inner })
    }

    /// Check out a block. Returns `None` when every block is in use.
    pub fn acquire(&self) -> Option<PoolBlock> {
        self.inner.acquire()
    }

    /// Check out a block holding a copy of `data`, if it fits and a block is free
    pub fn acquire_with(&self, data: &[u8]) -> Option<PoolBlock> {
        if data.len() > self.inner.block_size {
            return None;
        }
        let mut block = self.acquire()?;
        block.write(data);
        Some(block)
    }

    pub fn block_size(&self) -> usize {
        self.inner.block_size
    }

    pub fn in_use(&self) -> usize {
        self.inner.in_use.load(Ordering::Relaxed)
    }

    pub fn capacity(&self) -> usize {
        self.inner.count
    }

    pub fn available(&self) -> usize {
        self.capacity() - self.in_use()
    }

    /// Copy out the raw bytes of block `index`.
    ///
    /// # Safety
    /// The block must not be checked out by anyone while it is read.
    #[doc(hidden)]
    pub unsafe fn inspect_block(&self, index: usize) -> Option<Vec<u8>> {
        if index >= self.inner.count {
            return None;
        }
        let ptr = self.inner.block_ptr(index);
        Some(std::slice::from_raw_parts(ptr.as_ptr(), self.inner.block_size).to_vec())
    }
}

impl std::fmt::Debug for SecretBlockPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretBlockPool")
            .field("block_size", &self.inner.block_size)
            .field("capacity", &self.inner.count)
            .field("in_use", &self.in_use())
            .finish()
    }
}
