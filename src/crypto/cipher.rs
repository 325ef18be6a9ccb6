// src/crypto/cipher.rs
//! Outer payload ciphers

use aes::Aes256;
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit, StreamCipher};
use cbc::{Decryptor, Encryptor};
use chacha20::ChaCha20;
use twofish::Twofish;

use crate::aliases::SecretBytes;
use crate::enums::CipherKind;
use crate::error::CryptoError;

type Aes256CbcEnc = Encryptor<Aes256>;
type Aes256CbcDec = Decryptor<Aes256>;
type TwofishCbcEnc = Encryptor<Twofish>;
type TwofishCbcDec = Decryptor<Twofish>;

pub const KEY_LEN: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataCipher {
    kind: CipherKind,
}

impl DataCipher {
    pub fn new(kind: CipherKind) -> Self {
        Self { kind }
    }

    pub fn kind(&self) -> CipherKind {
        self.kind
    }

    /// Reduces arbitrary key material to the cipher's key size
    pub fn resize_key(&self, material: &[u8]) -> SecretBytes {
        SecretBytes::new(super::sha256(material).to_vec())
    }

    fn check(&self, key: &[u8], iv: &[u8]) -> Result<(), CryptoError> {
        if key.len() != KEY_LEN {
            return Err(CryptoError::InvalidKeyLength {
                expected: KEY_LEN,
                actual: key.len(),
            });
        }
        if iv.len() != self.kind.iv_len() {
            return Err(CryptoError::InvalidIvLength {
                expected: self.kind.iv_len(),
                actual: iv.len(),
            });
        }
        Ok(())
    }

    pub fn encrypt(&self, key: &[u8], iv: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.check(key, iv)?;
        let out = match self.kind {
            CipherKind::Aes => Aes256CbcEnc::new_from_slices(key, iv)
                .map_err(|_| CryptoError::InvalidKeyLength {
                    expected: KEY_LEN,
                    actual: key.len(),
                })?
                .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
            CipherKind::Twofish => TwofishCbcEnc::new_from_slices(key, iv)
                .map_err(|_| CryptoError::InvalidKeyLength {
                    expected: KEY_LEN,
                    actual: key.len(),
                })?
                .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
            CipherKind::ChaCha20 => self.apply_chacha20(key, iv, plaintext)?,
        };
        Ok(out)
    }

    /// Fails with [`CryptoError::Padding`] when the key is wrong or data is truncated
    pub fn decrypt(&self, key: &[u8], iv: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.check(key, iv)?;
        match self.kind {
            CipherKind::Aes => Aes256CbcDec::new_from_slices(key, iv)
                .map_err(|_| CryptoError::InvalidKeyLength {
                    expected: KEY_LEN,
                    actual: key.len(),
                })?
                .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
                .map_err(|_| CryptoError::Padding),
            CipherKind::Twofish => TwofishCbcDec::new_from_slices(key, iv)
                .map_err(|_| CryptoError::InvalidKeyLength {
                    expected: KEY_LEN,
                    actual: key.len(),
                })?
                .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
                .map_err(|_| CryptoError::Padding),
            CipherKind::ChaCha20 => self.apply_chacha20(key, iv, ciphertext),
        }
    }

    fn apply_chacha20(&self, key: &[u8], iv: &[u8], data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let mut cipher =
            ChaCha20::new_from_slices(key, iv).map_err(|_| CryptoError::InvalidIvLength {
                expected: 12,
                actual: iv.len(),
            })?;
        let mut buf = data.to_vec();
        cipher.apply_keystream(&mut buf);
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cbc_ciphers_pad_and_restore() {
        let key = [7u8; 32];
        let iv = [9u8; 16];
        for kind in [CipherKind::Aes, CipherKind::Twofish] {
            let cipher = DataCipher::new(kind);
            let ct = cipher.encrypt(&key, &iv, b"Attack at dawn!").unwrap();
            assert_eq!(ct.len(), 16);
            assert_eq!(cipher.decrypt(&key, &iv, &ct).unwrap(), b"Attack at dawn!");
        }
    }

    #[test]
    fn chacha20_keeps_length() {
        let cipher = DataCipher::new(CipherKind::ChaCha20);
        let ct = cipher.encrypt(&[1u8; 32], &[2u8; 12], b"abc").unwrap();
        assert_eq!(ct.len(), 3);
        assert_eq!(cipher.decrypt(&[1u8; 32], &[2u8; 12], &ct).unwrap(), b"abc");
    }

    #[test]
    fn wrong_iv_length_is_rejected() {
        let cipher = DataCipher::new(CipherKind::Aes);
        assert!(matches!(
            cipher.encrypt(&[0u8; 32], &[0u8; 12], b"x"),
            Err(CryptoError::InvalidIvLength { .. })
        ));
    }
}
