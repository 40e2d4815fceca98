//! Record Codec
//!
//! Defines the on-disk byte layout for key-value entries and the
//! routines to encode, decode and verify them.
//!
//! Record layout (all widths little-endian):
//!
//! ```text
//! [total_size: u32][key_len: u32][key][value_len: u32][value][hash_len: u32][sha256]
//! ```
//!
//! `total_size` covers the whole record including itself, so a file of
//! records can be scanned sequentially without external metadata. The
//! trailing SHA-256 over `key || value` detects torn writes and silent
//! corruption on read.

use std::io::Read;

use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// Width of the SHA-256 digest stored at the end of each record.
pub const HASH_LEN: usize = 32;

/// Combined width of the four u32 length fields.
const FIXED_OVERHEAD: usize = 16;

/// Smallest possible record: empty key, empty value.
pub const MIN_RECORD_LEN: usize = FIXED_OVERHEAD + HASH_LEN;

/// A logical key-value entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub key: String,
    pub value: String,
}

impl Entry {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Serialize this entry into the record layout.
    pub fn encode(&self) -> Vec<u8> {
        let kl = self.key.len();
        let vl = self.value.len();
        let total = FIXED_OVERHEAD + kl + vl + HASH_LEN;

        let mut hasher = Sha256::new();
        hasher.update(self.key.as_bytes());
        hasher.update(self.value.as_bytes());

        let mut buf = Vec::with_capacity(total);
        buf.extend_from_slice(&(total as u32).to_le_bytes());
        buf.extend_from_slice(&(kl as u32).to_le_bytes());
        buf.extend_from_slice(self.key.as_bytes());
        buf.extend_from_slice(&(vl as u32).to_le_bytes());
        buf.extend_from_slice(self.value.as_bytes());
        buf.extend_from_slice(&(HASH_LEN as u32).to_le_bytes());
        buf.extend_from_slice(&hasher.finalize());
        buf
    }

    /// Parse one complete record back into an entry.
    ///
    /// The caller must pass exactly one record; any structural
    /// inconsistency between the length fields and the available bytes
    /// is reported as corruption.
    pub fn decode(input: &[u8]) -> Result<Self> {
        let layout = RecordLayout::parse(input)?;
        let key = String::from_utf8(input[layout.key_range()].to_vec())
            .map_err(|_| Error::Corruption("record key is not valid UTF-8".into()))?;
        let value = String::from_utf8(input[layout.value_range()].to_vec())
            .map_err(|_| Error::Corruption("record value is not valid UTF-8".into()))?;
        Ok(Self { key, value })
    }
}

/// Parsed field offsets of a structurally valid record.
struct RecordLayout {
    key_len: usize,
    value_len: usize,
}

impl RecordLayout {
    fn parse(input: &[u8]) -> Result<Self> {
        if input.len() < MIN_RECORD_LEN {
            return Err(Error::Corruption(format!(
                "record too short: {} bytes",
                input.len()
            )));
        }

        let total = read_u32(input, 0) as usize;
        if total != input.len() {
            return Err(Error::Corruption(format!(
                "record size field {} does not match {} available bytes",
                total,
                input.len()
            )));
        }

        let key_len = read_u32(input, 4) as usize;
        if 8 + key_len + 4 > input.len() {
            return Err(Error::Corruption(format!(
                "key length {} exceeds record bounds",
                key_len
            )));
        }

        let value_len = read_u32(input, 8 + key_len) as usize;
        if FIXED_OVERHEAD + key_len + value_len + HASH_LEN != total {
            return Err(Error::Corruption(format!(
                "length fields inconsistent: key {} + value {} != total {}",
                key_len, value_len, total
            )));
        }

        let hash_len = read_u32(input, 12 + key_len + value_len) as usize;
        if hash_len != HASH_LEN {
            return Err(Error::Corruption(format!(
                "unexpected hash length {}",
                hash_len
            )));
        }

        Ok(Self { key_len, value_len })
    }

    fn key_range(&self) -> std::ops::Range<usize> {
        8..8 + self.key_len
    }

    fn value_range(&self) -> std::ops::Range<usize> {
        let start = 12 + self.key_len;
        start..start + self.value_len
    }

    fn hash_range(&self) -> std::ops::Range<usize> {
        let start = FIXED_OVERHEAD + self.key_len + self.value_len;
        start..start + HASH_LEN
    }
}

/// Recompute the checksum over `key || value` and compare it to the
/// embedded digest. Any mismatch, structural or cryptographic, yields
/// `false`.
pub fn verify(input: &[u8]) -> bool {
    let layout = match RecordLayout::parse(input) {
        Ok(l) => l,
        Err(_) => return false,
    };

    let mut hasher = Sha256::new();
    hasher.update(&input[layout.key_range()]);
    hasher.update(&input[layout.value_range()]);
    let computed = hasher.finalize();

    computed.as_slice() == &input[layout.hash_range()]
}

/// Read exactly one record from a stream positioned at a record start.
///
/// Reads the 4-byte size prefix, then the rest of the record. Fails if
/// the size is implausible or the stream ends before the record does.
pub fn read_record<R: Read>(reader: &mut R) -> Result<Vec<u8>> {
    let mut size_buf = [0u8; 4];
    reader
        .read_exact(&mut size_buf)
        .map_err(|e| truncated(e, "record size prefix"))?;

    let total = u32::from_le_bytes(size_buf) as usize;
    if total < MIN_RECORD_LEN {
        return Err(Error::Corruption(format!(
            "implausible record size {}",
            total
        )));
    }

    let mut record = vec![0u8; total];
    record[..4].copy_from_slice(&size_buf);
    reader
        .read_exact(&mut record[4..])
        .map_err(|e| truncated(e, "record body"))?;
    Ok(record)
}

fn truncated(err: std::io::Error, what: &str) -> Error {
    if err.kind() == std::io::ErrorKind::UnexpectedEof {
        Error::Corruption(format!("stream ended while reading {}", what))
    } else {
        Error::Io(err)
    }
}

fn read_u32(input: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes(input[offset..offset + 4].try_into().unwrap())
}
