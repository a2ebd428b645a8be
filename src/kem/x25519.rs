//! Deterministic X25519 KEM
//!
//! ```text
//! eph  = HKDF-SHA256(salt = SHA256(ek), ikm = rho, info = EPHEMERAL_INFO)
//! ct   = X25519(eph, G)
//! ss   = HKDF-SHA256(salt = ct || ek, ikm = X25519(eph, ek), info = SHARED_INFO)
//! ```
//!
//! Hashing `ek` into the ephemeral derivation keeps ciphertexts for
//! different keys apart even when `rho` repeats.

use std::any::Any;

use hkdf::Hkdf;
use rand::{CryptoRng, RngCore};
use sha2::{Digest, Sha256};
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroizing;

use super::{Kem, KemError, SEED_LEN};
use crate::memory::SecretBytes;

const KEY_LEN: usize = 32;
const EPHEMERAL_INFO: &[u8] = b"mpc-bridge/x25519-kem/ephemeral";
const SHARED_INFO: &[u8] = b"mpc-bridge/x25519-kem/shared-secret";

/// X25519 private key, registered as the private-key object for decapsulation
pub struct X25519PrivateKey {
    secret: StaticSecret,
    public: PublicKey,
}

impl X25519PrivateKey {
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        let secret = StaticSecret::from(bytes);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    /// Encapsulation key for this private key
    pub fn public_bytes(&self) -> Vec<u8> {
        self.public.as_bytes().to_vec()
    }
}

impl std::fmt::Debug for X25519PrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("X25519PrivateKey")
            .field("public", &hex::encode(self.public.as_bytes()))
            .finish_non_exhaustive()
    }
}

/// Deterministic KEM over X25519 and HKDF-SHA256
#[derive(Debug, Clone, Copy, Default)]
pub struct X25519Kem;

impl X25519Kem {
    pub fn new() -> Self {
        X25519Kem
    }

    /// Generate a key pair: the private-key object and the encapsulation key
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> (X25519PrivateKey, Vec<u8>) {
        let secret = StaticSecret::random_from_rng(rng);
        let public = PublicKey::from(&secret);
        let ek = public.as_bytes().to_vec();
        (X25519PrivateKey { secret, public }, ek)
    }
}

fn parse_point(bytes: &[u8], what: &str) -> Result<PublicKey, KemError> {
    let arr: [u8; KEY_LEN] = bytes.try_into().map_err(|_| {
        KemError::InvalidInput(format!("{} must be {} bytes, got {}", what, KEY_LEN, bytes.len()))
    })?;
    Ok(PublicKey::from(arr))
}

fn shared_secret(dh: &[u8], ct: &PublicKey, ek: &PublicKey) -> Result<SecretBytes, KemError> {
    let mut salt = [0u8; 2 * KEY_LEN];
    salt[..KEY_LEN].copy_from_slice(ct.as_bytes());
    salt[KEY_LEN..].copy_from_slice(ek.as_bytes());

    let hk = Hkdf::<Sha256>::new(Some(&salt[..]), dh);
    let mut ss = SecretBytes::new(vec![0u8; KEY_LEN]);
    hk.expand(SHARED_INFO, ss.as_mut_slice())
        .map_err(|_| KemError::Crypto("HKDF expand failed".into()))?;
    Ok(ss)
}

impl Kem for X25519Kem {
    fn encapsulate(
        &self,
        ek: &[u8],
        rho: &[u8; SEED_LEN],
    ) -> Result<(Vec<u8>, SecretBytes), KemError> {
        let recipient = parse_point(ek, "encapsulation key")?;

        let salt = Sha256::digest(ek);
        let hk = Hkdf::<Sha256>::new(Some(salt.as_slice()), rho);
        let mut eph_bytes = Zeroizing::new([0u8; KEY_LEN]);
        hk.expand(EPHEMERAL_INFO, &mut eph_bytes[..])
            .map_err(|_| KemError::Crypto("HKDF expand failed".into()))?;

        let ephemeral = StaticSecret::from(*eph_bytes);
        let ct = PublicKey::from(&ephemeral);
        let dh = ephemeral.diffie_hellman(&recipient);
        if !dh.was_contributory() {
            return Err(KemError::Crypto("encapsulation key is a low-order point".into()));
        }

        let ss = shared_secret(dh.as_bytes(), &ct, &recipient)?;
        Ok((ct.as_bytes().to_vec(), ss))
    }

    fn decapsulate(
        &self,
        sk: &(dyn Any + Send + Sync),
        ct: &[u8],
    ) -> Result<SecretBytes, KemError> {
        let sk = sk
            .downcast_ref::<X25519PrivateKey>()
            .ok_or_else(|| KemError::InvalidInput("private key is not an X25519 key".into()))?;
        let ct = parse_point(ct, "ciphertext")?;

        let dh = sk.secret.diffie_hellman(&ct);
        if !dh.was_contributory() {
            return Err(KemError::Crypto("ciphertext is a low-order point".into()));
        }
        shared_secret(dh.as_bytes(), &ct, &sk.public)
    }

    fn derive_public(&self, sk: &(dyn Any + Send + Sync)) -> Result<Vec<u8>, KemError> {
        sk.downcast_ref::<X25519PrivateKey>()
            .map(X25519PrivateKey::public_bytes)
            .ok_or_else(|| KemError::InvalidInput("private key is not an X25519 key".into()))
    }
}
