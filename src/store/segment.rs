//! Sealed Segment Management
//!
//! A sealed segment is an immutable, numbered log file paired with the
//! in-memory index that was accumulated while it was the active log.
//! Lower-numbered segments are older; lookups walk the list newest-first
//! so that a re-written key always resolves to its most recent record.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

/// In-memory mapping from key to the byte offset of its most recent
/// record within one file.
pub type HashIndex = HashMap<String, u64>;

/// An immutable segment file and its index.
///
/// The index is shared so the merger can snapshot it without copying
/// while the segment is still visible to readers.
#[derive(Debug, Clone)]
pub struct Segment {
    pub path: PathBuf,
    pub index: Arc<HashIndex>,
}

impl Segment {
    pub fn new(path: PathBuf, index: HashIndex) -> Self {
        Self {
            path,
            index: Arc::new(index),
        }
    }
}

/// Resolve a key across the sealed list, newest segment first.
pub(crate) fn lookup_sealed(sealed: &[Segment], key: &str) -> Option<(PathBuf, u64)> {
    for segment in sealed.iter().rev() {
        if let Some(&offset) = segment.index.get(key) {
            return Some((segment.path.clone(), offset));
        }
    }
    None
}
