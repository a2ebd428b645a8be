//! Single Buffer Transfer
//!
//! `Cmem` is the C-layout `{ data, size }` pair the native library speaks.
//! On the Rust side every raw `Cmem` is wrapped in a type that records who
//! owns it:
//!
//! - [`CmemView`]: borrows Rust memory for the duration of one call. The
//!   lifetime ties the view to the source slice, so the memory cannot be
//!   dropped or mutated while the view exists.
//! - [`OwnedCmem`]: a `libc::malloc` block owned by the Rust side. Dropping
//!   it wipes (when secret) and frees it. [`OwnedCmem::into_raw`] hands the
//!   block to native code, which then releases it with `free`.
//!
//! Raw `Cmem` values received from native code are consumed with
//! [`from_native`], which copies, wipes and frees in one step.

use std::marker::PhantomData;
use std::ptr::{self, NonNull};

use super::wipe::{self, Secrecy, SecretBytes};
use crate::error::{BridgeError, BridgeResult};

/// C-layout buffer: `struct cmem { uint8_t* data; int32_t size; }`
///
/// A null `data` or a `size` of 0 denotes an empty buffer.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct Cmem {
    pub data: *mut u8,
    pub size: i32,
}

impl Cmem {
    /// The empty buffer
    pub const fn empty() -> Self {
        Self {
            data: ptr::null_mut(),
            size: 0,
        }
    }

    /// Whether this buffer carries no bytes
    pub fn is_empty(&self) -> bool {
        self.data.is_null() || self.size <= 0
    }

    /// Number of bytes described by this buffer (0 when empty)
    pub fn len(&self) -> usize {
        if self.is_empty() {
            0
        } else {
            self.size as usize
        }
    }

    /// View the bytes without taking ownership.
    ///
    /// # Safety
    /// `data` must be valid for reads of `size` bytes for the lifetime `'a`.
    pub unsafe fn as_slice<'a>(&self) -> &'a [u8] {
        if self.is_empty() {
            &[]
        } else {
            std::slice::from_raw_parts(self.data, self.size as usize)
        }
    }
}

impl Default for Cmem {
    fn default() -> Self {
        Self::empty()
    }
}

/// Convert a Rust length to the native `int32_t` size field
pub(crate) fn native_len(len: usize) -> BridgeResult<i32> {
    i32::try_from(len).map_err(|_| {
        BridgeError::BadArgument(format!("buffer of {} bytes exceeds the native size field", len))
    })
}

/// Borrowed view of Rust memory, valid for one native call
#[derive(Debug, Clone, Copy)]
pub struct CmemView<'a> {
    raw: Cmem,
    _borrow: PhantomData<&'a [u8]>,
}

impl<'a> CmemView<'a> {
    /// The raw buffer to pass to native code. Native code must not free it
    /// or keep it past the call.
    pub fn raw(&self) -> Cmem {
        self.raw
    }

    pub fn len(&self) -> usize {
        self.raw.len()
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }
}

/// Produce a borrowed view of `bytes`.
///
/// Fails only when the length does not fit the native size field.
pub fn to_native_view(bytes: &[u8]) -> BridgeResult<CmemView<'_>> {
    let size = native_len(bytes.len())?;
    let data = if bytes.is_empty() {
        ptr::null_mut()
    } else {
        // Native code treats borrowed inputs as read-only.
        bytes.as_ptr() as *mut u8
    };
    Ok(CmemView {
        raw: Cmem { data, size },
        _borrow: PhantomData,
    })
}

/// A native (`libc::malloc`) buffer owned by the Rust side
#[derive(Debug)]
pub struct OwnedCmem {
    ptr: Option<NonNull<u8>>,
    len: usize,
    secrecy: Secrecy,
    wipe_public: bool,
}

// The block is exclusively owned and only reachable through this value.
unsafe impl Send for OwnedCmem {}

impl OwnedCmem {
    /// An owned buffer with no allocation behind it
    pub fn empty() -> Self {
        Self {
            ptr: None,
            len: 0,
            secrecy: Secrecy::Secret,
            wipe_public: false,
        }
    }

    /// Allocate native memory and copy `bytes` into it
    pub fn copy_from(bytes: &[u8], secrecy: Secrecy) -> BridgeResult<Self> {
        native_len(bytes.len())?;
        if bytes.is_empty() {
            return Ok(Self {
                ptr: None,
                len: 0,
                secrecy,
                wipe_public: false,
            });
        }

        let raw = unsafe { libc::malloc(bytes.len()) } as *mut u8;
        let ptr = NonNull::new(raw).ok_or_else(|| {
            BridgeError::BadArgument(format!("native allocation of {} bytes failed", bytes.len()))
        })?;
        unsafe {
            ptr::copy_nonoverlapping(bytes.as_ptr(), ptr.as_ptr(), bytes.len());
        }

        Ok(Self {
            ptr: Some(ptr),
            len: bytes.len(),
            secrecy,
            wipe_public: false,
        })
    }

    /// Adopt a buffer allocated by native code with `malloc`.
    ///
    /// Contents of unknown secrecy are always wiped on release.
    ///
    /// # Safety
    /// `raw` must describe a `malloc` block of at least `raw.size` bytes that
    /// nobody else will free.
    pub unsafe fn from_raw(raw: Cmem) -> Self {
        match NonNull::new(raw.data) {
            Some(ptr) => Self {
                ptr: Some(ptr),
                len: raw.size.max(0) as usize,
                secrecy: Secrecy::Secret,
                wipe_public: false,
            },
            None => Self::empty(),
        }
    }

    /// Also wipe this buffer on release even if it is public
    pub fn wipe_public(mut self, wipe: bool) -> Self {
        self.wipe_public = wipe;
        self
    }

    /// The raw buffer, still owned by `self`. Native code may read it for
    /// the duration of a call but must not free it.
    pub fn raw(&self) -> Cmem {
        match self.ptr {
            Some(ptr) => Cmem {
                data: ptr.as_ptr(),
                size: self.len as i32,
            },
            None => Cmem::empty(),
        }
    }

    /// Hand the buffer to native code. The receiver becomes responsible for
    /// releasing it.
    pub fn into_raw(self) -> Cmem {
        let raw = self.raw();
        std::mem::forget(self);
        raw
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.ptr.is_none()
    }

    pub fn secrecy(&self) -> Secrecy {
        self.secrecy
    }

    pub fn as_slice(&self) -> &[u8] {
        match self.ptr {
            Some(ptr) => unsafe { std::slice::from_raw_parts(ptr.as_ptr(), self.len) },
            None => &[],
        }
    }
}

impl Drop for OwnedCmem {
    fn drop(&mut self) {
        if let Some(ptr) = self.ptr.take() {
            let wipe = self.secrecy.must_wipe(self.wipe_public);
            unsafe { wipe::release_native(ptr, self.len, wipe) };
        }
    }
}

/// Copy `bytes` into natively-owned memory.
///
/// Used whenever the native call may outlive a borrow of Rust memory.
pub fn to_native_owned(bytes: &[u8]) -> BridgeResult<OwnedCmem> {
    OwnedCmem::copy_from(bytes, Secrecy::Secret)
}

/// Raw allocate-and-copy used by callbacks that fill native out-parameters.
///
/// Returns the null sentinel on allocation failure; callers must treat a
/// null result for a nonempty `bytes` as a hard failure.
pub fn alloc_cmem(bytes: &[u8]) -> Cmem {
    match OwnedCmem::copy_from(bytes, Secrecy::Secret) {
        Ok(owned) => owned.into_raw(),
        Err(_) => Cmem::empty(),
    }
}

/// Copy a native buffer into Rust memory, then wipe and free it.
///
/// Always takes ownership. An empty or null input yields an empty vector
/// without touching memory.
///
/// # Safety
/// `raw` must be empty or describe a `malloc` block of `raw.size` bytes owned
/// by the caller.
pub unsafe fn from_native(raw: Cmem) -> Vec<u8> {
    if raw.is_empty() {
        return Vec::new();
    }
    let owned = OwnedCmem::from_raw(raw);
    owned.as_slice().to_vec()
}

/// Like [`from_native`], but the Rust copy is also wiped when dropped
///
/// # Safety
/// Same contract as [`from_native`].
pub unsafe fn from_native_secret(raw: Cmem) -> SecretBytes {
    if raw.is_empty() {
        return SecretBytes::new(Vec::new());
    }
    let owned = OwnedCmem::from_raw(raw);
    SecretBytes::new(owned.as_slice().to_vec())
}

/// Wipe and free a native buffer without copying it out.
///
/// # Safety
/// Same contract as [`from_native`].
pub unsafe fn free_cmem(raw: Cmem) {
    drop(OwnedCmem::from_raw(raw));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_view_points_at_source() {
        let data = vec![1u8, 2, 3];
        let view = to_native_view(&data).unwrap();
        assert_eq!(view.raw().data as *const u8, data.as_ptr());
        assert_eq!(view.raw().size, 3);
    }

    #[test]
    fn test_view_of_empty_is_null() {
        let view = to_native_view(&[]).unwrap();
        assert!(view.raw().data.is_null());
        assert_eq!(view.raw().size, 0);
        assert!(view.is_empty());
    }

    #[test]
    fn test_owned_copy_is_independent() {
        let mut data = vec![9u8; 16];
        let owned = to_native_owned(&data).unwrap();
        data.iter_mut().for_each(|b| *b = 0);
        assert_eq!(owned.as_slice(), &[9u8; 16]);
        assert_ne!(owned.raw().data as *const u8, data.as_ptr());
    }

    #[test]
    fn test_owned_roundtrip_through_raw() {
        let owned = to_native_owned(b"key share").unwrap();
        let raw = owned.into_raw();
        let back = unsafe { from_native(raw) };
        assert_eq!(back, b"key share");
    }

    #[test]
    fn test_from_native_empty_does_not_touch_memory() {
        assert!(unsafe { from_native(Cmem::empty()) }.is_empty());
        let dangling = Cmem {
            data: NonNull::<u8>::dangling().as_ptr(),
            size: 0,
        };
        assert!(unsafe { from_native(dangling) }.is_empty());
    }

    #[test]
    fn test_alloc_cmem_of_empty_is_null() {
        let raw = alloc_cmem(&[]);
        assert!(raw.data.is_null());
        assert_eq!(raw.size, 0);
    }

    #[test]
    fn test_from_native_secret() {
        let raw = alloc_cmem(&[7u8; 32]);
        let secret = unsafe { from_native_secret(raw) };
        assert_eq!(secret.as_slice(), &[7u8; 32]);
    }

    #[test]
    fn test_free_cmem() {
        let raw = alloc_cmem(b"scalar");
        unsafe { free_cmem(raw) };
        unsafe { free_cmem(Cmem::empty()) };
    }

    #[test]
    fn test_native_len_overflow() {
        assert!(native_len(i32::MAX as usize).is_ok());
        assert!(matches!(
            native_len(i32::MAX as usize + 1),
            Err(BridgeError::BadArgument(_))
        ));
    }
}
