//! Segment Merger
//!
//! A single background worker that consolidates the two oldest sealed
//! segments into one. The rewritten segment takes slot `0` and every
//! higher segment shifts down one slot, preserving the "lower number =
//! older" invariant. Merge failures are logged and swallowed: the
//! engine keeps running with uncompacted segments and the worker waits
//! for the next signal.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, Seek, SeekFrom, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, warn};

use super::record::{self, Entry};
use super::segment::{HashIndex, Segment};
use super::{Shared, FILE_MODE};
use crate::error::Result;

/// Worker loop. Each signal triggers one merge cycle; the loop ends
/// when the engine drops the sender.
pub(crate) fn run(shared: Arc<Shared>, mut signals: UnboundedReceiver<()>) {
    while signals.blocking_recv().is_some() {
        if let Err(e) = merge_oldest_pair(&shared) {
            warn!("segment merge failed: {}", e);
            let _ = fs::remove_file(shared.paths.merged_path());
        }
    }
}

/// One merge cycle: snapshot the two oldest sealed segments, rewrite
/// their live records into a fresh file, then swap it in under the
/// engine lock.
pub(super) fn merge_oldest_pair(shared: &Shared) -> Result<()> {
    // Snapshot under the lock. The pair stays valid for the whole cycle
    // because only this worker retires sealed segments; the writer may
    // append new ones behind it.
    let (older, newer) = {
        let state = shared.locked();
        if state.sealed.len() < 2 {
            return Ok(());
        }
        (state.sealed[0].clone(), state.sealed[1].clone())
    };

    // Older entries first, newer overlaid: last write wins.
    let mut plan: HashMap<String, (PathBuf, u64)> = HashMap::new();
    for (key, &offset) in older.index.iter() {
        plan.insert(key.clone(), (older.path.clone(), offset));
    }
    for (key, &offset) in newer.index.iter() {
        plan.insert(key.clone(), (newer.path.clone(), offset));
    }

    let merged_index = write_merged(&plan, &shared.paths.merged_path())?;
    swap_in(shared, &older, &newer, merged_index)
}

/// Rewrite every planned record into the merge output file and build
/// its index as the records land.
fn write_merged(plan: &HashMap<String, (PathBuf, u64)>, out_path: &Path) -> Result<HashIndex> {
    let mut out = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(FILE_MODE)
        .open(out_path)?;

    let mut index = HashIndex::new();
    let mut offset = 0u64;
    for (key, (path, record_offset)) in plan {
        let mut reader = BufReader::new(File::open(path)?);
        reader.seek(SeekFrom::Start(*record_offset))?;
        let raw = record::read_record(&mut reader)?;
        let entry = Entry::decode(&raw)?;

        let encoded = entry.encode();
        out.write_all(&encoded)?;
        index.insert(key.clone(), offset);
        offset += encoded.len() as u64;
    }
    Ok(index)
}

/// Swap the merge output into slot 0 and shift higher segments down.
/// Holds the engine lock for the whole file shuffle so readers never
/// observe a half-renamed directory.
fn swap_in(shared: &Shared, older: &Segment, newer: &Segment, merged_index: HashIndex) -> Result<()> {
    let mut state = shared.locked();

    fs::remove_file(&older.path)?;
    fs::remove_file(&newer.path)?;
    fs::rename(shared.paths.merged_path(), &older.path)?;

    for i in 2..state.sealed.len() {
        fs::rename(shared.paths.segment_path(i), shared.paths.segment_path(i - 1))?;
    }

    let mut sealed = Vec::with_capacity(state.sealed.len() - 1);
    sealed.push(Segment::new(older.path.clone(), merged_index));
    for (i, segment) in state.sealed.iter().enumerate().skip(2) {
        sealed.push(Segment {
            path: shared.paths.segment_path(i - 1),
            index: Arc::clone(&segment.index),
        });
    }
    state.sealed = sealed;

    debug!(sealed_segments = state.sealed.len(), "segment pair merged");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{open_active, recovery, StorePaths, StoreState};
    use std::sync::Mutex;
    use tempfile::tempdir;

    /// Lay out sealed segment files on disk and wrap them in a `Shared`
    /// the way the engine would after recovery.
    fn shared_with_segments(dir: &Path, segments: &[&[(&str, &str)]]) -> Shared {
        let paths = StorePaths::new(dir.to_path_buf());
        let mut sealed = Vec::new();
        for (i, entries) in segments.iter().enumerate() {
            let path = paths.segment_path(i);
            let mut bytes = Vec::new();
            for (k, v) in entries.iter() {
                bytes.extend_from_slice(&Entry::new(*k, *v).encode());
            }
            fs::write(&path, &bytes).unwrap();
            let (index, _) = recovery::recover_file(&path).unwrap();
            sealed.push(Segment::new(path, index));
        }
        let active = open_active(&paths.active_path()).unwrap();
        Shared {
            paths,
            limit: 1_000_000,
            state: Mutex::new(StoreState {
                active,
                active_offset: 0,
                active_index: HashIndex::new(),
                sealed,
            }),
        }
    }

    fn read_value(path: &Path, offset: u64) -> String {
        let mut reader = BufReader::new(File::open(path).unwrap());
        reader.seek(SeekFrom::Start(offset)).unwrap();
        let raw = record::read_record(&mut reader).unwrap();
        assert!(record::verify(&raw));
        Entry::decode(&raw).unwrap().value
    }

    fn sealed_paths(shared: &Shared) -> Vec<PathBuf> {
        shared.locked().sealed.iter().map(|s| s.path.clone()).collect()
    }

    #[test]
    fn test_merge_two_segments() {
        let dir = tempdir().unwrap();
        let shared = shared_with_segments(
            dir.path(),
            &[&[("a", "a1"), ("b", "b1")], &[("b", "b2"), ("c", "c1")]],
        );

        merge_oldest_pair(&shared).unwrap();

        assert!(dir.path().join("0").exists());
        assert!(!dir.path().join("1").exists());
        assert!(!dir.path().join("merged").exists());

        let state = shared.locked();
        assert_eq!(state.sealed.len(), 1);
        let merged = &state.sealed[0];
        assert_eq!(merged.index.len(), 3);
        assert_eq!(read_value(&merged.path, merged.index["a"]), "a1");
        assert_eq!(read_value(&merged.path, merged.index["b"]), "b2");
        assert_eq!(read_value(&merged.path, merged.index["c"]), "c1");
    }

    #[test]
    fn test_merge_shifts_third_segment_down() {
        let dir = tempdir().unwrap();
        let shared = shared_with_segments(
            dir.path(),
            &[&[("a", "a1")], &[("b", "b1")], &[("c", "c1")]],
        );

        merge_oldest_pair(&shared).unwrap();

        assert!(dir.path().join("0").exists());
        assert!(dir.path().join("1").exists());
        assert!(!dir.path().join("2").exists());

        assert_eq!(
            sealed_paths(&shared),
            vec![dir.path().join("0"), dir.path().join("1")]
        );

        let state = shared.locked();
        // Former segment 2 now lives in slot 1, index intact.
        let shifted = &state.sealed[1];
        assert_eq!(read_value(&shifted.path, shifted.index["c"]), "c1");
    }

    #[test]
    fn test_merge_shifts_two_higher_segments() {
        let dir = tempdir().unwrap();
        let shared = shared_with_segments(
            dir.path(),
            &[
                &[("a", "a1"), ("x", "x1")],
                &[("a", "a2")],
                &[("b", "b1")],
                &[("c", "c1")],
            ],
        );

        merge_oldest_pair(&shared).unwrap();

        assert_eq!(
            sealed_paths(&shared),
            vec![
                dir.path().join("0"),
                dir.path().join("1"),
                dir.path().join("2"),
            ]
        );
        assert!(!dir.path().join("3").exists());

        let state = shared.locked();
        let merged = &state.sealed[0];
        assert_eq!(read_value(&merged.path, merged.index["a"]), "a2");
        assert_eq!(read_value(&merged.path, merged.index["x"]), "x1");
        assert_eq!(
            read_value(&state.sealed[1].path, state.sealed[1].index["b"]),
            "b1"
        );
        assert_eq!(
            read_value(&state.sealed[2].path, state.sealed[2].index["c"]),
            "c1"
        );
    }

    #[test]
    fn test_merge_noop_with_single_segment() {
        let dir = tempdir().unwrap();
        let shared = shared_with_segments(dir.path(), &[&[("a", "a1")]]);

        merge_oldest_pair(&shared).unwrap();

        assert!(dir.path().join("0").exists());
        assert_eq!(shared.locked().sealed.len(), 1);
    }

    #[test]
    fn test_failed_merge_leaves_segments_alone() {
        let dir = tempdir().unwrap();
        let shared = shared_with_segments(dir.path(), &[&[("a", "a1")], &[("b", "b1")]]);

        // Losing a source file makes the rewrite fail before the swap.
        fs::remove_file(dir.path().join("1")).unwrap();

        assert!(merge_oldest_pair(&shared).is_err());
        assert!(dir.path().join("0").exists());
        assert_eq!(shared.locked().sealed.len(), 2);
    }
}
