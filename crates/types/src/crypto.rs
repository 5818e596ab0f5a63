//! Ed25519 keys and signatures.
//!
//! - [`KeyPair`]: a signing key, generated from the OS RNG or a fixed seed
//! - [`PublicKey`]: a 32-byte verifying key
//! - [`Signature`]: a 64-byte detached signature
//!
//! Verification is exposed as a plain boolean: the vote accounting layer
//! treats any failure mode (bad point, bad signature) the same way.

use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use std::fmt;

/// An Ed25519 public key used to verify vote signatures.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey(VerifyingKey);

impl PublicKey {
    /// Parse a public key from raw 32-byte key material.
    ///
    /// Returns `None` if the bytes are not a valid curve point.
    pub fn from_bytes(bytes: &[u8; 32]) -> Option<Self> {
        VerifyingKey::from_bytes(bytes).ok().map(Self)
    }

    /// The raw 32-byte key material.
    pub fn as_bytes(&self) -> &[u8; 32] {
        self.0.as_bytes()
    }

    /// Verify a signature over a message.
    pub fn verify(&self, message: &[u8], signature: &Signature) -> bool {
        let sig = ed25519_dalek::Signature::from_bytes(&signature.0);
        self.0.verify(message, &sig).is_ok()
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey(")?;
        for byte in &self.as_bytes()[..4] {
            write!(f, "{byte:02x}")?;
        }
        write!(f, "..)")
    }
}

/// A 64-byte Ed25519 signature.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Signature([u8; 64]);

impl Signature {
    /// The all-zero signature, for fixtures that never reach verification.
    pub const fn zero() -> Self {
        Self([0u8; 64])
    }

    /// Wrap raw signature bytes.
    pub const fn from_bytes(bytes: [u8; 64]) -> Self {
        Self(bytes)
    }

    /// The raw signature bytes.
    pub fn as_bytes(&self) -> &[u8; 64] {
        &self.0
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature(")?;
        for byte in &self.0[..4] {
            write!(f, "{byte:02x}")?;
        }
        write!(f, "..)")
    }
}

/// An Ed25519 signing keypair.
///
/// The `Debug` implementation does not reveal key material.
#[derive(Clone)]
pub struct KeyPair {
    signing: SigningKey,
}

impl KeyPair {
    /// Generate a fresh keypair from the OS random number generator.
    pub fn generate() -> Self {
        let mut csprng = rand::rngs::OsRng;
        Self {
            signing: SigningKey::generate(&mut csprng),
        }
    }

    /// Deterministic keypair from a 32-byte seed.
    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self {
            signing: SigningKey::from_bytes(&seed),
        }
    }

    /// Sign a message, producing a detached signature.
    pub fn sign(&self, message: &[u8]) -> Signature {
        Signature(self.signing.sign(message).to_bytes())
    }

    /// Derive the corresponding public key.
    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.signing.verifying_key())
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &self.public_key())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_verify_roundtrip() {
        let key = KeyPair::from_seed([7u8; 32]);
        let signature = key.sign(b"message");

        assert!(key.public_key().verify(b"message", &signature));
        assert!(!key.public_key().verify(b"tampered", &signature));
    }

    #[test]
    fn test_wrong_key_fails_verification() {
        let signer = KeyPair::from_seed([1u8; 32]);
        let other = KeyPair::from_seed([2u8; 32]);
        let signature = signer.sign(b"message");

        assert!(!other.public_key().verify(b"message", &signature));
    }

    #[test]
    fn test_from_seed_is_deterministic() {
        let a = KeyPair::from_seed([9u8; 32]);
        let b = KeyPair::from_seed([9u8; 32]);
        assert_eq!(a.public_key(), b.public_key());
    }

    #[test]
    fn test_public_key_byte_roundtrip() {
        let key = KeyPair::from_seed([3u8; 32]);
        let bytes = *key.public_key().as_bytes();
        assert_eq!(PublicKey::from_bytes(&bytes), Some(key.public_key()));
    }
}
