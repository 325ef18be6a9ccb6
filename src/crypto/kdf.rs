// src/crypto/kdf.rs
//! Key-derivation functions: AES-KDF and Argon2
//!
//! Both stretch the 32-byte hashed composite key into the transformed key.
//! AES-KDF polls the progress handle between round batches; Argon2 runs as a
//! single call and is only checked before and after.

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockEncrypt, KeyInit};
use aes::Aes256;
use argon2::{Algorithm, Argon2, Params, Version};
use tracing::debug;
use zeroize::Zeroizing;

use crate::aliases::SecretBytes;
use crate::enums::KdfKind;
use crate::error::{CryptoError, FormatError, FormatResult};
use crate::header::variant::{Value, VariantDictionary};
use crate::progress::Progress;

const ROUNDS_PER_POLL: u64 = 16_384;

const PARAM_UUID: &str = "$UUID";
const PARAM_AES_ROUNDS: &str = "R";
const PARAM_AES_SEED: &str = "S";
const PARAM_ARGON2_SALT: &str = "S";
const PARAM_ARGON2_PARALLELISM: &str = "P";
const PARAM_ARGON2_MEMORY: &str = "M";
const PARAM_ARGON2_ITERATIONS: &str = "I";
const PARAM_ARGON2_VERSION: &str = "V";
const PARAM_ARGON2_SECRET: &str = "K";
const PARAM_ARGON2_ASSOC: &str = "A";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Argon2Variant {
    D,
    Id,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KdfParams {
    Aes {
        rounds: u64,
        seed: Vec<u8>,
    },
    Argon2 {
        variant: Argon2Variant,
        salt: Vec<u8>,
        memory_kib: u32,
        iterations: u32,
        parallelism: u32,
        version: u32,
    },
}

impl KdfParams {
    pub fn new_aes(rounds: u64) -> Self {
        KdfParams::Aes {
            rounds,
            seed: super::random_bytes(32),
        }
    }

    pub fn new_argon2(kind: KdfKind, memory_kib: u32, iterations: u32, parallelism: u32) -> Self {
        let variant = match kind {
            KdfKind::Argon2id => Argon2Variant::Id,
            _ => Argon2Variant::D,
        };
        KdfParams::Argon2 {
            variant,
            salt: super::random_bytes(32),
            memory_kib,
            iterations,
            parallelism,
            version: 0x13,
        }
    }

    pub fn kind(&self) -> KdfKind {
        match self {
            KdfParams::Aes { .. } => KdfKind::Aes,
            KdfParams::Argon2 {
                variant: Argon2Variant::D,
                ..
            } => KdfKind::Argon2d,
            KdfParams::Argon2 {
                variant: Argon2Variant::Id,
                ..
            } => KdfKind::Argon2id,
        }
    }

    /// Seed or salt; doubles as the v4 challenge for challenge-response keys
    pub fn challenge(&self) -> &[u8] {
        match self {
            KdfParams::Aes { seed, .. } => seed,
            KdfParams::Argon2 { salt, .. } => salt,
        }
    }

    pub fn randomize_seed(&mut self) {
        match self {
            KdfParams::Aes { seed, .. } => *seed = super::random_bytes(32),
            KdfParams::Argon2 { salt, .. } => *salt = super::random_bytes(32),
        }
    }

    /// Runs the KDF; progress advances within `[start, end)`
    pub fn transform(
        &self,
        key: &[u8],
        progress: &Progress,
        start: u64,
        end: u64,
    ) -> FormatResult<SecretBytes> {
        progress.check()?;
        let out = match self {
            KdfParams::Aes { rounds, seed } => aes_kdf(key, seed, *rounds, progress, start, end)?,
            KdfParams::Argon2 {
                variant,
                salt,
                memory_kib,
                iterations,
                parallelism,
                version,
            } => {
                debug!(memory_kib, iterations, parallelism, "running argon2");
                let algorithm = match variant {
                    Argon2Variant::D => Algorithm::Argon2d,
                    Argon2Variant::Id => Algorithm::Argon2id,
                };
                let version = Version::try_from(*version)
                    .map_err(|e| CryptoError::KdfParams(format!("argon2 version: {e}")))?;
                let params = Params::new(*memory_kib, *iterations, *parallelism, Some(32))
                    .map_err(|e| CryptoError::KdfParams(format!("argon2 params: {e}")))?;
                let mut out = Zeroizing::new(vec![0u8; 32]);
                Argon2::new(algorithm, version, params)
                    .hash_password_into(key, salt, &mut out)
                    .map_err(|e| CryptoError::Kdf(format!("argon2 derive: {e}")))?;
                progress.check()?;
                progress.advance_to(end);
                out
            }
        };
        Ok(SecretBytes::new(out.to_vec()))
    }

    pub fn from_variant_dict(dict: &VariantDictionary) -> FormatResult<Self> {
        let uuid = dict
            .get_bytes(PARAM_UUID)
            .ok_or_else(|| FormatError::header("KDF parameters without $UUID"))?;
        let kind = KdfKind::from_uuid(uuid)
            .ok_or_else(|| FormatError::header(format!("unknown KDF {}", hex::encode(uuid))))?;
        match kind {
            KdfKind::Aes => {
                let rounds = dict
                    .get_u64(PARAM_AES_ROUNDS)
                    .ok_or_else(|| FormatError::header("AES-KDF without rounds"))?;
                let seed = dict
                    .get_bytes(PARAM_AES_SEED)
                    .ok_or_else(|| FormatError::header("AES-KDF without seed"))?
                    .to_vec();
                Ok(KdfParams::Aes { rounds, seed })
            }
            KdfKind::Argon2d | KdfKind::Argon2id => {
                let has_extra = |name: &str| dict.get_bytes(name).is_some_and(|v| !v.is_empty());
                if has_extra(PARAM_ARGON2_SECRET) || has_extra(PARAM_ARGON2_ASSOC) {
                    return Err(CryptoError::KdfParams(
                        "argon2 secret key / associated data".into(),
                    )
                    .into());
                }
                let salt = dict
                    .get_bytes(PARAM_ARGON2_SALT)
                    .ok_or_else(|| FormatError::header("Argon2 without salt"))?
                    .to_vec();
                let memory = dict
                    .get_u64(PARAM_ARGON2_MEMORY)
                    .ok_or_else(|| FormatError::header("Argon2 without memory"))?;
                let iterations = dict
                    .get_u64(PARAM_ARGON2_ITERATIONS)
                    .ok_or_else(|| FormatError::header("Argon2 without iterations"))?;
                let parallelism = dict
                    .get_u32(PARAM_ARGON2_PARALLELISM)
                    .ok_or_else(|| FormatError::header("Argon2 without parallelism"))?;
                let version = dict.get_u32(PARAM_ARGON2_VERSION).unwrap_or(0x13);
                let memory_kib = u32::try_from(memory / 1024)
                    .map_err(|_| CryptoError::KdfParams("argon2 memory too large".into()))?;
                let iterations = u32::try_from(iterations)
                    .map_err(|_| CryptoError::KdfParams("argon2 iterations too large".into()))?;
                Ok(KdfParams::Argon2 {
                    variant: if kind == KdfKind::Argon2id {
                        Argon2Variant::Id
                    } else {
                        Argon2Variant::D
                    },
                    salt,
                    memory_kib,
                    iterations,
                    parallelism,
                    version,
                })
            }
        }
    }

    pub fn to_variant_dict(&self) -> VariantDictionary {
        let mut dict = VariantDictionary::new();
        dict.set(PARAM_UUID, Value::Bytes(self.kind().uuid().to_vec()));
        match self {
            KdfParams::Aes { rounds, seed } => {
                dict.set(PARAM_AES_ROUNDS, Value::U64(*rounds));
                dict.set(PARAM_AES_SEED, Value::Bytes(seed.clone()));
            }
            KdfParams::Argon2 {
                salt,
                memory_kib,
                iterations,
                parallelism,
                version,
                ..
            } => {
                dict.set(PARAM_ARGON2_SALT, Value::Bytes(salt.clone()));
                dict.set(PARAM_ARGON2_PARALLELISM, Value::U32(*parallelism));
                dict.set(PARAM_ARGON2_MEMORY, Value::U64(u64::from(*memory_kib) * 1024));
                dict.set(PARAM_ARGON2_ITERATIONS, Value::U64(u64::from(*iterations)));
                dict.set(PARAM_ARGON2_VERSION, Value::U32(*version));
            }
        }
        dict
    }
}

/// AES-256-ECB applied `rounds` times to both key halves, then SHA-256
pub fn aes_kdf(
    key: &[u8],
    seed: &[u8],
    rounds: u64,
    progress: &Progress,
    start: u64,
    end: u64,
) -> FormatResult<Zeroizing<Vec<u8>>> {
    if key.len() != 32 {
        return Err(CryptoError::InvalidKeyLength {
            expected: 32,
            actual: key.len(),
        }
        .into());
    }
    let cipher = Aes256::new_from_slice(seed).map_err(|_| CryptoError::InvalidKeyLength {
        expected: 32,
        actual: seed.len(),
    })?;
    debug!(rounds, "running AES-KDF");

    let mut block = Zeroizing::new([0u8; 32]);
    block.copy_from_slice(key);
    let mut done = 0u64;
    while done < rounds {
        progress.check()?;
        let batch = (rounds - done).min(ROUNDS_PER_POLL);
        let (left, right) = block.split_at_mut(16);
        for _ in 0..batch {
            cipher.encrypt_block(GenericArray::from_mut_slice(left));
            cipher.encrypt_block(GenericArray::from_mut_slice(right));
        }
        done += batch;
        progress.report_fraction(start, end, done, rounds);
    }
    Ok(Zeroizing::new(super::sha256(block.as_slice()).to_vec()))
}
