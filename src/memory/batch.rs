//! Batched Buffer Transfer
//!
//! A batch is `N` buffers flattened into one contiguous data block plus a
//! parallel `int32_t` length table:
//!
//! ```text
//! sizes: [ 0 | 3 | 0 | 1 ]          count = 4
//! data:  [ 1 2 3 4 ]                total = sum(sizes) = 4
//! ```
//!
//! An empty batch has `count == 0` and no tables at all. A batch of `N`
//! empty buffers has `count == N`, a populated size table and a null data
//! block. The two are never confused.

use std::ptr::{self, NonNull};

use super::cmem::native_len;
use super::wipe::{self, Secrecy};
use crate::error::{BridgeError, BridgeResult};

/// C-layout batch: `struct cmems { uint8_t* data; int32_t* sizes; int32_t count; }`
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct Cmems {
    pub data: *mut u8,
    pub sizes: *mut i32,
    pub count: i32,
}

impl Cmems {
    /// The empty batch
    pub const fn empty() -> Self {
        Self {
            data: ptr::null_mut(),
            sizes: ptr::null_mut(),
            count: 0,
        }
    }

    /// Number of buffers in the batch
    pub fn count(&self) -> usize {
        self.count.max(0) as usize
    }

    /// Whether the batch holds no buffers at all
    pub fn is_empty(&self) -> bool {
        self.count <= 0
    }
}

impl Default for Cmems {
    fn default() -> Self {
        Self::empty()
    }
}

/// A batch whose tables were allocated with `libc::malloc` and are owned by
/// the Rust side
#[derive(Debug)]
pub struct OwnedCmems {
    data: Option<NonNull<u8>>,
    sizes: Option<NonNull<i32>>,
    count: usize,
    total: usize,
    secrecy: Secrecy,
}

unsafe impl Send for OwnedCmems {}

impl OwnedCmems {
    fn empty(secrecy: Secrecy) -> Self {
        Self {
            data: None,
            sizes: None,
            count: 0,
            total: 0,
            secrecy,
        }
    }

    /// Flatten `items` into a freshly allocated batch
    pub fn copy_from<T: AsRef<[u8]>>(items: &[T], secrecy: Secrecy) -> BridgeResult<Self> {
        if items.is_empty() {
            return Ok(Self::empty(secrecy));
        }

        let count = items.len();
        native_len(count)?;
        let mut total = 0usize;
        for item in items {
            native_len(item.as_ref().len())?;
            total = total
                .checked_add(item.as_ref().len())
                .ok_or_else(|| BridgeError::BadArgument("batch size overflows".into()))?;
        }
        native_len(total)?;

        let sizes_raw = unsafe { libc::malloc(count * std::mem::size_of::<i32>()) } as *mut i32;
        let sizes = NonNull::new(sizes_raw).ok_or_else(|| {
            BridgeError::BadArgument(format!("native allocation of {} batch sizes failed", count))
        })?;

        let data = if total > 0 {
            let data_raw = unsafe { libc::malloc(total) } as *mut u8;
            match NonNull::new(data_raw) {
                Some(data) => Some(data),
                None => {
                    unsafe { libc::free(sizes.as_ptr() as *mut libc::c_void) };
                    return Err(BridgeError::BadArgument(format!(
                        "native allocation of {} batch bytes failed",
                        total
                    )));
                }
            }
        } else {
            None
        };

        let mut offset = 0usize;
        for (i, item) in items.iter().enumerate() {
            let bytes = item.as_ref();
            unsafe {
                *sizes.as_ptr().add(i) = bytes.len() as i32;
                if let Some(data) = data {
                    if !bytes.is_empty() {
                        ptr::copy_nonoverlapping(
                            bytes.as_ptr(),
                            data.as_ptr().add(offset),
                            bytes.len(),
                        );
                    }
                }
            }
            offset += bytes.len();
        }

        Ok(Self {
            data,
            sizes: Some(sizes),
            count,
            total,
            secrecy,
        })
    }

    /// Adopt a batch allocated by native code, validating its tables.
    ///
    /// A malformed batch is released and rejected.
    ///
    /// # Safety
    /// `raw` must be empty or describe `malloc` blocks owned by the caller:
    /// `sizes` holding `count` entries and `data` holding their sum.
    pub unsafe fn from_raw(raw: Cmems) -> BridgeResult<Self> {
        let data = NonNull::new(raw.data);
        let sizes = NonNull::new(raw.sizes);

        let malformed = |reason: &str| {
            tracing::warn!(count = raw.count, reason, "rejecting malformed native batch");
            if let Some(data) = data {
                libc::free(data.as_ptr() as *mut libc::c_void);
            }
            if let Some(sizes) = sizes {
                libc::free(sizes.as_ptr() as *mut libc::c_void);
            }
            BridgeError::BadArgument(format!("malformed native batch: {}", reason))
        };

        if raw.count < 0 {
            return Err(malformed("negative count"));
        }
        if raw.count == 0 {
            let mut owned = Self::empty(Secrecy::Secret);
            owned.data = data;
            owned.sizes = sizes;
            return Ok(owned);
        }

        let Some(size_table) = sizes else {
            return Err(malformed("missing size table"));
        };
        let count = raw.count as usize;
        let mut total = 0usize;
        for i in 0..count {
            let len = *size_table.as_ptr().add(i);
            if len < 0 {
                return Err(malformed("negative entry length"));
            }
            total += len as usize;
        }
        if total > 0 && data.is_none() {
            return Err(malformed("missing data block"));
        }

        Ok(Self {
            data,
            sizes,
            count,
            total,
            secrecy: Secrecy::Secret,
        })
    }

    /// The raw batch, still owned by `self`
    pub fn raw(&self) -> Cmems {
        Cmems {
            data: self.data.map_or(ptr::null_mut(), NonNull::as_ptr),
            sizes: self.sizes.map_or(ptr::null_mut(), NonNull::as_ptr),
            count: self.count as i32,
        }
    }

    /// Hand the batch to native code, which becomes responsible for it
    pub fn into_raw(self) -> Cmems {
        let raw = self.raw();
        std::mem::forget(self);
        raw
    }

    /// Number of buffers in the batch
    pub fn count(&self) -> usize {
        self.count
    }

    /// Total payload size
    pub fn total_len(&self) -> usize {
        self.total
    }

    /// Length of every entry, in order
    pub fn lengths(&self) -> Vec<usize> {
        match self.sizes {
            Some(sizes) if self.count > 0 => (0..self.count)
                .map(|i| unsafe { *sizes.as_ptr().add(i) } as usize)
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Copy every entry out, preserving zero-length entries
    pub fn to_vecs(&self) -> Vec<Vec<u8>> {
        let mut out = Vec::with_capacity(self.count);
        let mut offset = 0usize;
        for len in self.lengths() {
            let entry = match self.data {
                Some(data) if len > 0 => unsafe {
                    std::slice::from_raw_parts(data.as_ptr().add(offset), len).to_vec()
                },
                _ => Vec::new(),
            };
            offset += len;
            out.push(entry);
        }
        out
    }
}

impl Drop for OwnedCmems {
    fn drop(&mut self) {
        if let Some(data) = self.data.take() {
            unsafe { wipe::release_native(data, self.total, self.secrecy == Secrecy::Secret) };
        }
        if let Some(sizes) = self.sizes.take() {
            unsafe { libc::free(sizes.as_ptr() as *mut libc::c_void) };
        }
    }
}

/// Flatten a list of buffers into a natively-owned batch
pub fn batch_to_native<T: AsRef<[u8]>>(items: &[T]) -> BridgeResult<OwnedCmems> {
    OwnedCmems::copy_from(items, Secrecy::Secret)
}

/// Copy a native batch into Rust memory, then wipe and free it.
///
/// Always takes ownership.
///
/// # Safety
/// Same contract as [`OwnedCmems::from_raw`].
pub unsafe fn batch_from_native(raw: Cmems) -> BridgeResult<Vec<Vec<u8>>> {
    let owned = OwnedCmems::from_raw(raw)?;
    Ok(owned.to_vecs())
}

/// Wipe and free a native batch without copying it out.
///
/// # Safety
/// Same contract as [`OwnedCmems::from_raw`].
pub unsafe fn free_cmems(raw: Cmems) {
    // A malformed batch is already released by `from_raw`.
    let _ = OwnedCmems::from_raw(raw);
}
