// src/crypto/stream.rs
//! Inner stream cipher for memory-protected field values
//!
//! One keystream is shared by every protected value in a document, in
//! document order. Reader and writer must therefore visit values in the same
//! order, which the XML layer guarantees.

use cbc::cipher::{KeyIvInit, StreamCipher};
use chacha20::ChaCha20;
use salsa20::Salsa20;

use crate::consts::SALSA20_INNER_IV;
use crate::enums::InnerStreamKind;
use crate::error::CryptoError;

pub enum ProtectedStream {
    None,
    Salsa20(Box<Salsa20>),
    ChaCha20(Box<ChaCha20>),
}

impl ProtectedStream {
    pub fn new(kind: InnerStreamKind, key: &[u8]) -> Result<Self, CryptoError> {
        match kind {
            InnerStreamKind::None => Ok(ProtectedStream::None),
            InnerStreamKind::Salsa20 => {
                let key = super::sha256(key);
                let cipher = Salsa20::new_from_slices(&key, &SALSA20_INNER_IV).map_err(|_| {
                    CryptoError::InvalidKeyLength {
                        expected: 32,
                        actual: key.len(),
                    }
                })?;
                Ok(ProtectedStream::Salsa20(Box::new(cipher)))
            }
            InnerStreamKind::ChaCha20 => {
                let material = super::sha512_parts(&[key]);
                let cipher = ChaCha20::new_from_slices(&material[..32], &material[32..44])
                    .map_err(|_| CryptoError::InvalidKeyLength {
                        expected: 32,
                        actual: material.len(),
                    })?;
                Ok(ProtectedStream::ChaCha20(Box::new(cipher)))
            }
        }
    }

    /// XORs the next keystream bytes into `data` (same call encrypts and decrypts)
    pub fn apply(&mut self, data: &mut [u8]) {
        match self {
            ProtectedStream::None => {}
            ProtectedStream::Salsa20(cipher) => cipher.apply_keystream(data),
            ProtectedStream::ChaCha20(cipher) => cipher.apply_keystream(data),
        }
    }
}
