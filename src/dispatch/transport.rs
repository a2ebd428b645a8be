//! Transport callback shims
//!
//! The native protocol engine moves messages between parties through three
//! callbacks installed as a [`TransportCallbacks`] table, each carrying an
//! opaque context. The context is the handle of a registered [`Transport`];
//! the shims resolve it, call the transport and marshal the result back as
//! owned buffers.
//!
//! ```text
//! int send_f(void* ctx, int receiver, cmem_t message)
//! int receive_f(void* ctx, int sender, cmem_t* message)
//! int receive_all_f(void* ctx, int* senders, int sender_count, cmems_t* messages)
//! ```
//!
//! Return codes: `0` on success, [`codes::E_NOT_FOUND`] for an unknown
//! context, [`codes::E_BADARG`] for malformed arguments, and
//! [`codes::E_TRANSPORT`] when the transport itself fails. No retries.

use std::os::raw::{c_int, c_void};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use crate::error::{codes, BridgeError, BridgeResult};
use crate::handles::{self, Handle, HandleGuard};
use crate::memory::{Cmem, Cmems, OwnedCmem, OwnedCmems, Secrecy};

/// Message transport between protocol parties.
///
/// Called from native threads, possibly several at once.
pub trait Transport: Send + Sync {
    fn send(&self, to: u32, msg: &[u8]) -> anyhow::Result<()>;

    fn receive(&self, from: u32) -> anyhow::Result<Vec<u8>>;

    /// Receive one message from each party in `from`, in the same order.
    ///
    /// A party listed twice is read twice.
    fn receive_all(&self, from: &[u32]) -> anyhow::Result<Vec<Vec<u8>>> {
        from.iter().map(|&party| self.receive(party)).collect()
    }
}

/// `int (*)(void* ctx, int receiver, cmem_t message)`
pub type TransportSendFn = unsafe extern "C" fn(*mut c_void, c_int, Cmem) -> c_int;
/// `int (*)(void* ctx, int sender, cmem_t* message)`
pub type TransportReceiveFn = unsafe extern "C" fn(*mut c_void, c_int, *mut Cmem) -> c_int;
/// `int (*)(void* ctx, int* senders, int sender_count, cmems_t* messages)`
pub type TransportReceiveAllFn =
    unsafe extern "C" fn(*mut c_void, *mut c_int, c_int, *mut Cmems) -> c_int;

/// Transport table handed to the native job constructor
#[repr(C)]
#[derive(Clone, Copy)]
pub struct TransportCallbacks {
    pub send_fun: TransportSendFn,
    pub receive_fun: TransportReceiveFn,
    pub receive_all_fun: TransportReceiveAllFn,
}

impl std::fmt::Debug for TransportCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportCallbacks")
            .field("send_fun", &(self.send_fun as *const c_void))
            .field("receive_fun", &(self.receive_fun as *const c_void))
            .field("receive_all_fun", &(self.receive_all_fun as *const c_void))
            .finish()
    }
}

/// The transport table for this bridge
pub fn transport_callbacks() -> TransportCallbacks {
    TransportCallbacks {
        send_fun: transport_send,
        receive_fun: transport_receive,
        receive_all_fun: transport_receive_all,
    }
}

struct TransportEntry(Arc<dyn Transport>);

/// A transport registered for the lifetime of one protocol job
#[derive(Debug)]
pub struct TransportSession {
    guard: HandleGuard<'static>,
}

impl TransportSession {
    pub fn open(transport: Arc<dyn Transport>) -> Self {
        let guard = handles::global().guard(TransportEntry(transport));
        tracing::debug!(handle = %guard.handle(), "opened transport session");
        Self { guard }
    }

    pub fn handle(&self) -> Handle {
        self.guard.handle()
    }

    /// The context pointer to hand to the native job
    pub fn context(&self) -> *mut c_void {
        self.guard.handle().as_ptr() as *mut c_void
    }
}

fn resolve(ctx: *mut c_void) -> BridgeResult<Arc<dyn Transport>> {
    let handle = Handle::from_ptr(ctx)
        .ok_or_else(|| BridgeError::NotFound("null transport context".into()))?;
    handles::global()
        .lookup_as::<TransportEntry>(handle)
        .map(|entry| Arc::clone(&entry.0))
        .ok_or_else(|| BridgeError::NotFound(format!("transport context {}", handle)))
}

fn transport_err(op: &str, err: anyhow::Error) -> BridgeError {
    BridgeError::Transport(format!("{}: {:#}", op, err))
}

fn party(id: c_int) -> BridgeResult<u32> {
    u32::try_from(id).map_err(|_| BridgeError::BadArgument(format!("negative party index {}", id)))
}

fn guard_shim<F>(op: &'static str, body: F) -> c_int
where
    F: FnOnce() -> BridgeResult<()>,
{
    match panic::catch_unwind(AssertUnwindSafe(body)) {
        Ok(Ok(())) => codes::SUCCESS,
        Ok(Err(err)) => {
            tracing::warn!(op, error = %err, "transport callback failed");
            err.code()
        }
        Err(_) => {
            tracing::error!(op, "panic in transport");
            codes::E_TRANSPORT
        }
    }
}

unsafe fn read_senders(senders: *const c_int, count: c_int) -> BridgeResult<Vec<u32>> {
    let count = usize::try_from(count)
        .map_err(|_| BridgeError::BadArgument(format!("negative sender count {}", count)))?;
    if count == 0 {
        return Ok(Vec::new());
    }
    if senders.is_null() {
        return Err(BridgeError::BadArgument("null sender list".into()));
    }
    std::slice::from_raw_parts(senders, count)
        .iter()
        .map(|&id| party(id))
        .collect()
}

/// Send `message` to party `receiver`. The message stays owned by the caller.
///
/// # Safety
/// `message` must be empty or valid for reads of its size.
#[no_mangle]
pub unsafe extern "C" fn transport_send(ctx: *mut c_void, receiver: c_int, message: Cmem) -> c_int {
    guard_shim("transport_send", || {
        let transport = resolve(ctx)?;
        let to = party(receiver)?;
        if message.size < 0 || (message.data.is_null() && message.size > 0) {
            return Err(BridgeError::BadArgument("malformed message buffer".into()));
        }
        transport
            .send(to, message.as_slice())
            .map_err(|e| transport_err("send", e))
    })
}

/// Receive one message from party `sender` into `message` (owned transfer).
///
/// # Safety
/// `message` must be null or valid for writes.
#[no_mangle]
pub unsafe extern "C" fn transport_receive(
    ctx: *mut c_void,
    sender: c_int,
    message: *mut Cmem,
) -> c_int {
    guard_shim("transport_receive", || {
        let transport = resolve(ctx)?;
        if message.is_null() {
            return Err(BridgeError::BadArgument("null receive out-parameter".into()));
        }
        *message = Cmem::empty();
        let from = party(sender)?;
        let msg = transport.receive(from).map_err(|e| transport_err("receive", e))?;
        *message = OwnedCmem::copy_from(&msg, Secrecy::Secret)?.into_raw();
        Ok(())
    })
}

/// Receive one message from each of the `sender_count` parties in `senders`
/// as one batch, in sender order.
///
/// All or nothing: on failure `messages` is left empty.
///
/// # Safety
/// `senders` must hold `sender_count` party indices and `messages` must be
/// null or valid for writes.
#[no_mangle]
pub unsafe extern "C" fn transport_receive_all(
    ctx: *mut c_void,
    senders: *mut c_int,
    sender_count: c_int,
    messages: *mut Cmems,
) -> c_int {
    guard_shim("transport_receive_all", || {
        let transport = resolve(ctx)?;
        if messages.is_null() {
            return Err(BridgeError::BadArgument("null receive_all out-parameter".into()));
        }
        *messages = Cmems::empty();
        let from = read_senders(senders, sender_count)?;
        if from.is_empty() {
            return Ok(());
        }

        let received = transport
            .receive_all(&from)
            .map_err(|e| transport_err("receive_all", e))?;
        if received.len() != from.len() {
            return Err(BridgeError::Transport(format!(
                "receive_all returned {} messages for {} senders",
                received.len(),
                from.len()
            )));
        }
        *messages = OwnedCmems::copy_from(&received, Secrecy::Secret)?.into_raw();
        Ok(())
    })
}
