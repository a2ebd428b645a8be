//! Key Encapsulation Policy
//!
//! The native protocol library never implements a KEM itself. When it needs
//! one (publicly verifiable encryption, key backup) it calls back into the
//! [`Kem`] bound to the current thread, see [`crate::dispatch`].
//!
//! Implementations are deterministic: the same `(ek, rho)` pair must always
//! produce the same ciphertext, which is what makes the encryption publicly
//! verifiable. `rho` must therefore be fresh and unpredictable for every
//! encapsulation.

use std::any::Any;

use thiserror::Error;

use crate::error::BridgeError;
use crate::memory::SecretBytes;

mod x25519;

pub use x25519::{X25519Kem, X25519PrivateKey};

/// Length of the deterministic encapsulation seed
pub const SEED_LEN: usize = 32;

/// Errors returned by a KEM policy
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KemError {
    /// Key, ciphertext or private-key object is malformed or of the wrong type
    #[error("invalid KEM input: {0}")]
    InvalidInput(String),

    /// The policy does not implement this operation
    #[error("KEM operation not supported: {0}")]
    NotSupported(&'static str),

    /// The underlying primitive failed
    #[error("KEM failure: {0}")]
    Crypto(String),
}

impl From<KemError> for BridgeError {
    fn from(err: KemError) -> Self {
        match err {
            KemError::InvalidInput(msg) => BridgeError::BadArgument(msg),
            KemError::NotSupported(op) => BridgeError::NotSupported(op.to_string()),
            KemError::Crypto(msg) => BridgeError::CryptoFailure(msg),
        }
    }
}

/// A deterministic key encapsulation mechanism
pub trait Kem: Send + Sync {
    /// Produce `(ciphertext, shared_secret)` for the public key `ek`.
    ///
    /// Must be deterministic in `(ek, rho)`.
    fn encapsulate(
        &self,
        ek: &[u8],
        rho: &[u8; SEED_LEN],
    ) -> Result<(Vec<u8>, SecretBytes), KemError>;

    /// Recover the shared secret from `ct`.
    ///
    /// `sk` is whatever object was registered as the private key; a policy
    /// downcasts it to its own key type and rejects anything else.
    fn decapsulate(&self, sk: &(dyn Any + Send + Sync), ct: &[u8]) -> Result<SecretBytes, KemError>;

    /// Derive the public key for a private-key object
    fn derive_public(&self, _sk: &(dyn Any + Send + Sync)) -> Result<Vec<u8>, KemError> {
        Err(KemError::NotSupported("derive_public"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EncapOnly;

    impl Kem for EncapOnly {
        fn encapsulate(
            &self,
            _ek: &[u8],
            rho: &[u8; SEED_LEN],
        ) -> Result<(Vec<u8>, SecretBytes), KemError> {
            Ok((rho.to_vec(), SecretBytes::new(rho.to_vec())))
        }

        fn decapsulate(
            &self,
            _sk: &(dyn Any + Send + Sync),
            ct: &[u8],
        ) -> Result<SecretBytes, KemError> {
            Ok(SecretBytes::new(ct.to_vec()))
        }
    }

    #[test]
    fn test_derive_public_defaults_to_not_supported() {
        let err = EncapOnly.derive_public(&()).unwrap_err();
        assert_eq!(err, KemError::NotSupported("derive_public"));
    }

    #[test]
    fn test_kem_errors_map_to_bridge_errors() {
        assert!(matches!(
            BridgeError::from(KemError::InvalidInput("ek".into())),
            BridgeError::BadArgument(_)
        ));
        assert!(matches!(
            BridgeError::from(KemError::NotSupported("derive_public")),
            BridgeError::NotSupported(_)
        ));
        assert!(matches!(
            BridgeError::from(KemError::Crypto("dh".into())),
            BridgeError::CryptoFailure(_)
        ));
    }
}
