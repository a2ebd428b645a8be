//! Native-owned objects
//!
//! Points, commitments, keys and other objects the native library allocates
//! are held as [`NativeObject`]. The value moves through
//! `Created -> used -> Freed`: it is created from a non-null pointer, lent out
//! by reference, and freed exactly once, either by [`NativeObject::free`]
//! (which consumes it) or on drop. A freed object cannot be named again.

use std::fmt;
use std::marker::PhantomData;
use std::os::raw::c_void;
use std::ptr::NonNull;

use crate::error::{BridgeError, BridgeResult};

/// A kind of object owned by the native library
pub trait NativeResource {
    /// Name used in errors and logs
    const KIND: &'static str;

    /// Release the object through the native library.
    ///
    /// # Safety
    /// `ptr` must be a live object of this kind that is released once.
    unsafe fn release(ptr: NonNull<c_void>);
}

/// Exclusive owner of one native object
pub struct NativeObject<R: NativeResource> {
    ptr: NonNull<c_void>,
    _kind: PhantomData<R>,
}

impl<R: NativeResource> NativeObject<R> {
    /// Take ownership of a pointer returned by the native library.
    ///
    /// # Safety
    /// `ptr` must be null or a live object of kind `R` that nobody else frees.
    pub unsafe fn from_raw(ptr: *mut c_void) -> BridgeResult<Self> {
        let ptr = NonNull::new(ptr)
            .ok_or_else(|| BridgeError::BadArgument(format!("null {} pointer", R::KIND)))?;
        Ok(Self {
            ptr,
            _kind: PhantomData,
        })
    }

    /// Borrow the pointer for one native call
    pub fn as_ptr(&self) -> *mut c_void {
        self.ptr.as_ptr()
    }

    /// Release the object now
    pub fn free(self) {
        drop(self);
    }

    /// Give up ownership without releasing
    pub fn into_raw(self) -> *mut c_void {
        let ptr = self.ptr.as_ptr();
        std::mem::forget(self);
        ptr
    }
}

impl<R: NativeResource> Drop for NativeObject<R> {
    fn drop(&mut self) {
        unsafe { R::release(self.ptr) };
    }
}

// Native objects are plain heap allocations with no thread affinity.
unsafe impl<R: NativeResource> Send for NativeObject<R> {}

impl<R: NativeResource> fmt::Debug for NativeObject<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NativeObject<{}>({:p})", R::KIND, self.ptr)
    }
}
