//! Opaque handles
//!
//! Two directions of ownership across the boundary:
//!
//! - Rust objects referenced from native code go into a [`HandleRegistry`]
//!   and only their integer [`Handle`] is handed out.
//! - Native objects referenced from Rust are held as [`NativeObject`], which
//!   frees them exactly once.

mod native;
mod registry;

pub use native::{NativeObject, NativeResource};
pub use registry::{global, Handle, HandleGuard, HandleRegistry, Shared, HANDLE_SEED};
