// src/crypto/mod.rs
//! Pure cryptographic operations: no I/O, no tree
//!
//! All functions work exclusively on in-memory buffers.
mod cipher;
mod kdf;
mod stream;

pub use cipher::DataCipher;
pub use kdf::{aes_kdf, Argon2Variant, KdfParams};
pub use stream::ProtectedStream;

use rand::RngCore;
use sha2::{Digest, Sha256, Sha512};
use zeroize::Zeroizing;

pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// SHA-256 over several parts without concatenating them first
pub fn sha256_parts(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

pub fn sha512_parts(parts: &[&[u8]]) -> Zeroizing<Vec<u8>> {
    let mut hasher = Sha512::new();
    for part in parts {
        hasher.update(part);
    }
    Zeroizing::new(hasher.finalize().to_vec())
}

pub fn random_bytes(len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    rand::rng().fill_bytes(&mut buf);
    buf
}

pub fn random_array<const N: usize>() -> [u8; N] {
    let mut buf = [0u8; N];
    rand::rng().fill_bytes(&mut buf);
    buf
}
