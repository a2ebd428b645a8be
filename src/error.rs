//! Bridge Error Taxonomy
//!
//! Every failure that crosses the boundary is a [`BridgeError`] on the Rust
//! side and a 32-bit return code on the native side. The two are kept in
//! lockstep by [`BridgeError::code`] and [`BridgeError::from_native`].

use std::os::raw::c_int;

use thiserror::Error;

/// Native return codes understood by the protocol library.
///
/// The high bits carry a category and the low 16 bits a code, matching the
/// native library's `error_t` layout.
pub mod codes {
    use std::os::raw::c_int;

    /// Call succeeded
    pub const SUCCESS: c_int = 0;
    /// Generic transport failure reported by a transport callback
    /// (the native `NETWORK_ERROR`)
    pub const E_TRANSPORT: c_int = -1;
    /// Unspecified native failure. Not mapped to a named error.
    pub const E_UNKNOWN: c_int = 1;
    /// Null, zero-length or mismatched input; also allocation failure
    pub const E_BADARG: c_int = 0xff01_0002_u32 as c_int;
    /// Operation intentionally not implemented
    pub const E_NOT_SUPPORTED: c_int = 0xff01_0005_u32 as c_int;
    /// Handle or thread-local binding absent
    pub const E_NOT_FOUND: c_int = 0xff01_0006_u32 as c_int;
    /// Cryptographic operation rejected its input or failed verification
    pub const E_CRYPTO: c_int = 0xff04_0001_u32 as c_int;
    /// Verification failure that may have leaked secret-key bits
    pub const E_BIT_LEAK: c_int = 0xff04_0002_u32 as c_int;
}

/// Errors produced by the bridge
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BridgeError {
    /// Null, zero-length or mismatched input, or a failed native allocation
    #[error("bad argument: {0}")]
    BadArgument(String),

    /// A handle or the thread-local policy binding is absent
    #[error("not found: {0}")]
    NotFound(String),

    /// The operation is intentionally unimplemented
    #[error("not supported: {0}")]
    NotSupported(String),

    /// A cryptographic operation rejected its input or failed verification
    #[error("cryptographic failure: {0}")]
    CryptoFailure(String),

    /// Verification failed in a way that signals a possible secret-key
    /// compromise. The key must be treated as leaked.
    #[error("bit leak detected during verification; treat the key as compromised")]
    BitLeak,

    /// A policy is already bound on this thread
    #[error("a policy is already bound on this thread")]
    AlreadyBound,

    /// A transport callback failed
    #[error("transport failure: {0}")]
    Transport(String),

    /// A native call returned a code outside the known table
    #[error(
        "{op} failed with code {code} ({code:#x}, cat={category:#x}, code={low:#x})",
        category = category(.code),
        low = low_code(.code)
    )]
    Native { op: String, code: c_int },
}

fn category(code: &c_int) -> u32 {
    ((*code as u32) >> 16) & 0xff
}

fn low_code(code: &c_int) -> u32 {
    (*code as u32) & 0xffff
}

impl BridgeError {
    /// Native return code for this error
    pub fn code(&self) -> c_int {
        match self {
            BridgeError::BadArgument(_) | BridgeError::AlreadyBound => codes::E_BADARG,
            BridgeError::NotFound(_) => codes::E_NOT_FOUND,
            BridgeError::NotSupported(_) => codes::E_NOT_SUPPORTED,
            BridgeError::CryptoFailure(_) => codes::E_CRYPTO,
            BridgeError::BitLeak => codes::E_BIT_LEAK,
            BridgeError::Transport(_) => codes::E_TRANSPORT,
            BridgeError::Native { code, .. } => *code,
        }
    }

    /// Convert a native return code into a result.
    ///
    /// `op` names the native operation and ends up in the error message.
    pub fn check(op: &str, rc: c_int) -> BridgeResult<()> {
        match Self::from_native(op, rc) {
            None => Ok(()),
            Some(err) => Err(err),
        }
    }

    /// Map a native return code to an error, `None` on success.
    pub fn from_native(op: &str, rc: c_int) -> Option<Self> {
        let err = match rc {
            codes::SUCCESS => return None,
            codes::E_BADARG => BridgeError::BadArgument(format!("{} rejected its arguments", op)),
            codes::E_NOT_FOUND => BridgeError::NotFound(format!("{}: handle or binding", op)),
            codes::E_NOT_SUPPORTED => BridgeError::NotSupported(op.to_string()),
            codes::E_CRYPTO => BridgeError::CryptoFailure(format!("{} failed", op)),
            codes::E_BIT_LEAK => BridgeError::BitLeak,
            codes::E_TRANSPORT => {
                BridgeError::Transport(format!("{} transport callback failed", op))
            }
            code => BridgeError::Native {
                op: op.to_string(),
                code,
            },
        };
        Some(err)
    }

    /// Whether this error means the key must be considered compromised
    pub fn is_bit_leak(&self) -> bool {
        matches!(self, BridgeError::BitLeak)
    }
}

/// Result type for bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;
