//! Value blob format using nom
//!
//! File format:
//! ```text
//! MEMOBLB1
//! [version: u32 LE]
//! [payload_len: u64 LE]
//! [checksum: 32 bytes, SHA-256 of payload]
//! ...payload...
//! ```

use nom::{
    bytes::complete::{tag, take},
    number::complete::{le_u32, le_u64},
    sequence::tuple,
    IResult,
};
use sha2::{Digest, Sha256};

/// Magic header for value blobs
pub const BLOB_MAGIC: &[u8] = b"MEMOBLB1";

/// Current blob format version
pub const BLOB_VERSION: u32 = 1;

/// Header length in bytes
pub const HEADER_LEN: usize = BLOB_MAGIC.len() + 4 + 8 + 32;

/// Blob header
#[derive(Debug, Clone, PartialEq)]
pub struct BlobHeader {
    /// Format version
    pub version: u32,
    /// Payload length in bytes
    pub payload_len: u64,
    /// SHA-256 of the payload
    pub checksum: [u8; 32],
}

fn header(input: &[u8]) -> IResult<&[u8], BlobHeader> {
    let (input, (_, version, payload_len, checksum)) =
        tuple((tag(BLOB_MAGIC), le_u32, le_u64, take(32usize)))(input)?;

    let mut sum = [0u8; 32];
    sum.copy_from_slice(checksum);

    Ok((
        input,
        BlobHeader {
            version,
            payload_len,
            checksum: sum,
        },
    ))
}

/// Encode a payload as a complete blob
pub fn encode_blob(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    out.extend_from_slice(BLOB_MAGIC);
    out.extend_from_slice(&BLOB_VERSION.to_le_bytes());
    out.extend_from_slice(&(payload.len() as u64).to_le_bytes());
    out.extend_from_slice(&Sha256::digest(payload));
    out.extend_from_slice(payload);
    out
}

/// Decode a blob, validating version, length and checksum
pub fn decode_blob(input: &[u8]) -> Result<&[u8], String> {
    let (payload, hdr) = header(input).map_err(|e| format!("invalid blob header: {e:?}"))?;

    if hdr.version != BLOB_VERSION {
        return Err(format!(
            "unsupported blob version {} (expected {BLOB_VERSION})",
            hdr.version
        ));
    }

    if payload.len() as u64 != hdr.payload_len {
        return Err(format!(
            "truncated payload: {} bytes, header says {}",
            payload.len(),
            hdr.payload_len
        ));
    }

    if Sha256::digest(payload)[..] != hdr.checksum[..] {
        return Err("checksum mismatch".to_string());
    }

    Ok(payload)
}
