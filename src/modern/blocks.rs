// src/modern/blocks.rs
//! Block framing of the modern payload
//!
//! v3 splits the decrypted payload into `(index, sha256, size, data)` blocks.
//! v4 splits the *ciphertext* into `(hmac, size, data)` blocks whose HMAC key
//! is derived from the block index; the header is authenticated the same
//! way with index `u64::MAX`. Both end with an empty block.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::debug;
use zeroize::Zeroizing;

use crate::crypto::{sha256, sha512_parts};
use crate::error::{CryptoError, FormatError, FormatResult};
use crate::progress::Progress;
use crate::util::ByteReader;

type HmacSha256 = Hmac<Sha256>;

const HEADER_BLOCK_INDEX: u64 = u64::MAX;

/// Progress span a block pass reports into
#[derive(Debug, Clone, Copy)]
pub(crate) struct Span {
    pub start: u64,
    pub end: u64,
}

pub(crate) fn read_hashed_blocks(
    data: &[u8],
    progress: &Progress,
    span: Span,
) -> FormatResult<Vec<u8>> {
    let mut reader = ByteReader::new(data);
    let mut out = Vec::with_capacity(data.len());
    let mut expected_index = 0u32;
    loop {
        progress.check()?;
        let index = reader.read_u32()?;
        if index != expected_index {
            return Err(FormatError::corrupted(format!(
                "block index {index}, expected {expected_index}"
            )));
        }
        let hash: [u8; 32] = reader.read_array()?;
        let size = reader.read_u32()? as usize;
        if size == 0 {
            if hash != [0u8; 32] {
                return Err(FormatError::corrupted("final block hash is not empty"));
            }
            break;
        }
        let block = reader.read_bytes(size)?;
        if sha256(block) != hash {
            return Err(FormatError::corrupted(format!("block {index} hash mismatch")));
        }
        out.extend_from_slice(block);
        expected_index = expected_index
            .checked_add(1)
            .ok_or_else(|| FormatError::corrupted("too many blocks"))?;
        progress.report_fraction(span.start, span.end, reader.position() as u64, data.len() as u64);
    }
    debug!(blocks = expected_index, bytes = out.len(), "hashed blocks read");
    Ok(out)
}

pub(crate) fn write_hashed_blocks(
    data: &[u8],
    block_size: usize,
    progress: &Progress,
    span: Span,
) -> FormatResult<Vec<u8>> {
    let block_size = block_size.max(1);
    let mut out = Vec::with_capacity(data.len() + (data.len() / block_size + 2) * 40);
    let mut index = 0u32;
    for block in data.chunks(block_size) {
        progress.check()?;
        out.extend_from_slice(&index.to_le_bytes());
        out.extend_from_slice(&sha256(block));
        out.extend_from_slice(&(block.len() as u32).to_le_bytes());
        out.extend_from_slice(block);
        index += 1;
        progress.report_fraction(span.start, span.end, out.len() as u64, data.len() as u64);
    }
    out.extend_from_slice(&index.to_le_bytes());
    out.extend_from_slice(&[0u8; 32]);
    out.extend_from_slice(&0u32.to_le_bytes());
    Ok(out)
}

fn block_mac(index: u64, hmac_key: &[u8]) -> FormatResult<HmacSha256> {
    let key: Zeroizing<Vec<u8>> = sha512_parts(&[&index.to_le_bytes(), hmac_key]);
    let mut mac = HmacSha256::new_from_slice(&key).map_err(|_| CryptoError::InvalidKeyLength {
        expected: 64,
        actual: key.len(),
    })?;
    mac.update(&index.to_le_bytes());
    Ok(mac)
}

fn block_hmac(index: u64, hmac_key: &[u8], block: &[u8]) -> FormatResult<[u8; 32]> {
    let mut mac = block_mac(index, hmac_key)?;
    mac.update(&(block.len() as i32).to_le_bytes());
    mac.update(block);
    Ok(mac.finalize().into_bytes().into())
}

/// HMAC stored after the v4 header hash
pub(crate) fn header_hmac(header: &[u8], hmac_key: &[u8]) -> FormatResult<[u8; 32]> {
    let key: Zeroizing<Vec<u8>> = sha512_parts(&[&HEADER_BLOCK_INDEX.to_le_bytes(), hmac_key]);
    let mut mac = HmacSha256::new_from_slice(&key).map_err(|_| CryptoError::InvalidKeyLength {
        expected: 64,
        actual: key.len(),
    })?;
    mac.update(header);
    Ok(mac.finalize().into_bytes().into())
}

pub(crate) fn read_hmac_blocks(
    data: &[u8],
    hmac_key: &[u8],
    progress: &Progress,
    span: Span,
) -> FormatResult<Vec<u8>> {
    let mut reader = ByteReader::new(data);
    let mut out = Vec::with_capacity(data.len());
    let mut index = 0u64;
    loop {
        progress.check()?;
        let stored: [u8; 32] = reader.read_array()?;
        let size = reader.read_i32()?;
        let size = usize::try_from(size)
            .map_err(|_| FormatError::corrupted(format!("block {index} has negative size")))?;
        let block = reader.read_bytes(size)?;

        let mut mac = block_mac(index, hmac_key)?;
        mac.update(&(size as i32).to_le_bytes());
        mac.update(block);
        mac.verify_slice(&stored)
            .map_err(|_| FormatError::corrupted(format!("block {index} HMAC mismatch")))?;

        if size == 0 {
            break;
        }
        out.extend_from_slice(block);
        index += 1;
        progress.report_fraction(span.start, span.end, reader.position() as u64, data.len() as u64);
    }
    debug!(blocks = index, bytes = out.len(), "HMAC blocks read");
    Ok(out)
}

pub(crate) fn write_hmac_blocks(
    data: &[u8],
    hmac_key: &[u8],
    block_size: usize,
    progress: &Progress,
    span: Span,
) -> FormatResult<Vec<u8>> {
    let block_size = block_size.max(1);
    let mut out = Vec::with_capacity(data.len() + (data.len() / block_size + 2) * 36);
    let mut index = 0u64;
    for block in data.chunks(block_size) {
        progress.check()?;
        out.extend_from_slice(&block_hmac(index, hmac_key, block)?);
        out.extend_from_slice(&(block.len() as i32).to_le_bytes());
        out.extend_from_slice(block);
        index += 1;
        progress.report_fraction(span.start, span.end, out.len() as u64, data.len() as u64);
    }
    out.extend_from_slice(&block_hmac(index, hmac_key, &[])?);
    out.extend_from_slice(&0i32.to_le_bytes());
    Ok(out)
}
