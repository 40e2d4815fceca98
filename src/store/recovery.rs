//! Log File Recovery
//!
//! Rebuilds the in-memory index of a log file by scanning its records
//! sequentially. A truncated record at the very end of the file is the
//! expected signature of a torn write and is not an error: everything up
//! to it is the recovered state, and the caller positions the append
//! cursor at the returned offset. A record whose length fields are
//! internally inconsistent, by contrast, means the file is damaged
//! beyond the tail and recovery fails.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use tracing::debug;

use super::record::{self, Entry};
use super::segment::HashIndex;
use crate::error::{Error, Result};

/// Scan `path` and rebuild its `key -> offset` index.
///
/// Returns the index together with the offset one past the last intact
/// record, which is where subsequent appends resume.
pub(crate) fn recover_file(path: &Path) -> Result<(HashIndex, u64)> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);

    let mut index = HashIndex::new();
    let mut offset = 0u64;

    loop {
        let mut size_buf = [0u8; 4];
        match read_full(&mut reader, &mut size_buf)? {
            0 => break, // clean end of file
            n if n < 4 => {
                debug!(path = %path.display(), offset, "torn size prefix at end of log");
                break;
            }
            _ => {}
        }

        let total = u32::from_le_bytes(size_buf) as usize;
        if total < record::MIN_RECORD_LEN {
            return Err(Error::Recovery(format!(
                "implausible record size {} at offset {} in {}",
                total,
                offset,
                path.display()
            )));
        }

        let mut raw = vec![0u8; total];
        raw[..4].copy_from_slice(&size_buf);
        let read = read_full(&mut reader, &mut raw[4..])?;
        if read < total - 4 {
            debug!(path = %path.display(), offset, "torn record at end of log");
            break;
        }

        let entry = Entry::decode(&raw).map_err(|e| {
            Error::Recovery(format!(
                "corrupt record at offset {} in {}: {}",
                offset,
                path.display(),
                e
            ))
        })?;

        index.insert(entry.key, offset);
        offset += total as u64;
    }

    Ok((index, offset))
}

/// Read until the buffer is full or the stream ends; returns the number
/// of bytes actually read.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}
