//! mpc-bridge - Rust side of a native MPC protocol library
//!
//! Drives cryptographic protocols implemented behind a C ABI (key generation,
//! threshold signing, publicly verifiable encryption) and lets that native
//! code call back into Rust-supplied key encapsulation policy.
//!
//! # Features
//!
//! - **Explicit buffer ownership**: borrowed views and owned `malloc` copies
//!   are distinct types, so every buffer is released exactly once
//! - **Zeroization**: secret buffers are wiped before their memory is freed
//! - **Opaque handles**: native code only ever holds integer ids for Rust
//!   objects
//! - **Call-scoped policy**: a KEM is bound to one native call on one thread
//!   and unbound on every exit path
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use mpc_bridge::{Bridge, CallShape, X25519Kem};
//! use mpc_bridge::error::codes;
//!
//! let bridge = Bridge::new();
//! let ek = [9u8; 32];
//!
//! bridge
//!     .invoke("pve_encrypt", CallShape::InvokesCallbacks, Some(Arc::new(X25519Kem)), |scope| {
//!         let _ek = scope.public_input(&ek)?;
//!         // native_pve_encrypt(_ek, ...) would run here and call kem_encapsulate
//!         Ok(codes::SUCCESS)
//!     })
//!     .unwrap();
//! ```

pub mod call;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod handles;
pub mod kem;
pub mod memory;

pub use call::Bridge;
pub use config::{BridgeConfig, ConfigError, ConfigResult};
pub use dispatch::{PolicyBinding, Transport, TransportSession};
pub use error::{BridgeError, BridgeResult};
pub use handles::{Handle, HandleRegistry};
pub use kem::{Kem, KemError, X25519Kem, X25519PrivateKey};
pub use memory::{CallScope, CallShape, Cmem, Cmems, Secrecy, SecretBytes};
