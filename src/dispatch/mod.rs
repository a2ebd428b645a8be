//! Callback Dispatch and Policy Injection
//!
//! Native code calls back into Rust through plain C functions. Nothing it
//! holds is a pointer into Rust memory: the KEM policy for the current call
//! is found through a thread-local slot holding a registry handle, and
//! transports through a context handle.
//!
//! # Architecture
//!
//! ```text
//! Rust caller
//!     │ PolicyBinding::bind(kem)          registry: handle -> BoundPolicy
//!     │ set_policy_tls(handle)
//!     ▼
//! native op ──► kem_encapsulate / kem_decapsulate / kem_derive_public
//!     │             └─ get_policy_tls ─► registry ─► Kem
//!     │
//!     └──────► transport_send / transport_receive / transport_receive_all
//!                   └─ ctx handle ─► registry ─► Transport
//!     ▼
//! drop(PolicyBinding)                   clear_policy_tls, release handle
//! ```
//!
//! A binding is tied to the OS thread that created it. Callers running on an
//! async executor must perform the native call on a dedicated blocking thread.

mod binding;
mod callbacks;
mod local;
mod tls;
mod transport;

pub use binding::{current_policy, is_bound, with_policy, PolicyBinding};
pub use callbacks::{
    bridge_free_cmem, bridge_free_cmems, get_ffi_kem_decap_fn, get_ffi_kem_dk_to_ek_fn,
    get_ffi_kem_encap_fn, kem_callbacks, kem_decapsulate, kem_derive_public, kem_encapsulate,
    KemCallbacks, KemDecapFn, KemDerivePublicFn, KemEncapFn,
};
pub use local::{LocalTransport, DEFAULT_RECV_TIMEOUT};
pub use tls::{clear_policy_tls, get_policy_tls, set_policy_tls};
pub use transport::{
    transport_callbacks, transport_receive, transport_receive_all, transport_send, Transport,
    TransportCallbacks, TransportReceiveAllFn, TransportReceiveFn, TransportSendFn,
    TransportSession,
};
