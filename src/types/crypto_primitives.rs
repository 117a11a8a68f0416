/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Cryptographic primitives.
//!
//! The definitions and re-exports in this module provide two categories of cryptographic primitives:
//! 1. **Cryptographic Hashes**: provided by the [`sha2`] crate. Every root (block root, state root,
//!    signing root) is the SHA256 hash of the Borsh serialization of the hashed value.
//! 2. **Digital Signatures**: provided by the [`ed25519_dalek`] crate.

use borsh::BorshSerialize;

use super::data_types::{CryptoHash, SignatureBytes, VerifyingKeyBytes};

// re-exports below.
pub use sha2::Digest;
pub use sha2::Sha256 as CryptoHasher;

pub use ed25519_dalek::{Signature, SignatureError, Signer, SigningKey, Verifier, VerifyingKey};

/// Hash the Borsh serialization of `value`.
///
/// Borsh serialization into a `Vec` cannot fail for the types defined in this crate, because none of
/// them contain maps with fallible orderings or custom serializers.
pub fn hash_borsh<T: BorshSerialize>(value: &T) -> CryptoHash {
    let mut hasher = CryptoHasher::new();
    hasher.update(&value.try_to_vec().unwrap_or_default());
    CryptoHash::new(hasher.finalize().into())
}

/// Check that `signature` is a valid signature over `message` by the owner of `pubkey`.
///
/// Returns `false` if `pubkey` is not a valid Ed25519 point.
pub fn verify_signature(
    pubkey: &VerifyingKeyBytes,
    message: &[u8],
    signature: &SignatureBytes,
) -> bool {
    match VerifyingKey::from_bytes(&pubkey.bytes()) {
        Ok(verifying_key) => verifying_key
            .verify(message, &Signature::from_bytes(&signature.bytes()))
            .is_ok(),
        Err(_) => false,
    }
}

/// A facade around [`SigningKey`] that implements method for [`sign`](Self::sign)-ing messages as well
/// as a getter for the [`public`](Self::public) key associated with the signing key.
#[derive(Clone)]
pub struct Keypair(SigningKey);

impl Keypair {
    /// Create a `Keypair` that wraps over `signing_key`.
    pub fn new(signing_key: SigningKey) -> Keypair {
        Keypair(signing_key)
    }

    /// Sign an arbitrary `message` with the `Keypair`.
    pub fn sign(&self, message: &[u8]) -> SignatureBytes {
        SignatureBytes::new(self.0.sign(message).to_bytes())
    }

    /// Get the `VerifyingKey` of this `Keypair`.
    pub fn public(&self) -> VerifyingKey {
        self.0.verifying_key()
    }

    /// Get the serialized `VerifyingKey` of this `Keypair`, as stored in the validator registry.
    pub fn public_bytes(&self) -> VerifyingKeyBytes {
        VerifyingKeyBytes::new(self.0.verifying_key().to_bytes())
    }
}
