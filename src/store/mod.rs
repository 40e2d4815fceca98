//! Storage Engine
//!
//! Append-only, log-structured key-value store with in-memory hash
//! indexing, background segment compaction and crash recovery on
//! reopen.
//!
//! Writes land in a single active log (`current-data`). When the log
//! exceeds the configured size limit it is sealed under the next free
//! segment number and a fresh active log is started. A background
//! worker repeatedly folds the two oldest sealed segments into one,
//! keeping only the most recent record per key.

pub mod record;

mod merger;
mod recovery;
mod segment;

pub use record::Entry;
pub use segment::{HashIndex, Segment};

use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, Seek, SeekFrom, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;

use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::error::{Error, Result};

/// File name of the active append log.
pub const ACTIVE_FILE_NAME: &str = "current-data";

/// File name of the in-progress merge output.
const MERGED_FILE_NAME: &str = "merged";

/// Persisted files are private to the owning user.
const FILE_MODE: u32 = 0o600;

/// Store directory structure
pub struct StorePaths {
    pub base_dir: PathBuf,
}

impl StorePaths {
    pub fn new(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Path of the active append log.
    pub fn active_path(&self) -> PathBuf {
        self.base_dir.join(ACTIVE_FILE_NAME)
    }

    /// Path of a sealed segment. Segment `0` is the oldest.
    pub fn segment_path(&self, index: usize) -> PathBuf {
        self.base_dir.join(index.to_string())
    }

    /// Path of the transient merge output.
    pub fn merged_path(&self) -> PathBuf {
        self.base_dir.join(MERGED_FILE_NAME)
    }

    /// Ensure the store directory exists.
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        fs::create_dir_all(&self.base_dir)
    }
}

/// Mutable engine state, guarded by the single engine lock.
pub(crate) struct StoreState {
    pub(crate) active: File,
    pub(crate) active_offset: u64,
    pub(crate) active_index: HashIndex,
    pub(crate) sealed: Vec<Segment>,
}

impl StoreState {
    /// Resolve a key to the file and offset of its newest record.
    fn lookup(&self, paths: &StorePaths, key: &str) -> Option<(PathBuf, u64)> {
        if let Some(&offset) = self.active_index.get(key) {
            return Some((paths.active_path(), offset));
        }
        segment::lookup_sealed(&self.sealed, key)
    }
}

/// State shared between the engine handle and the merger worker.
pub(crate) struct Shared {
    pub(crate) paths: StorePaths,
    limit: u64,
    state: Mutex<StoreState>,
}

impl Shared {
    pub(crate) fn locked(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().expect("store state lock poisoned")
    }
}

/// Point-in-time engine statistics.
#[derive(Debug, Clone)]
pub struct StoreStats {
    pub data_dir: PathBuf,
    pub active_size: u64,
    pub active_keys: usize,
    pub sealed_segments: usize,
}

/// The storage engine.
///
/// `Store` is safe to share across threads behind an `Arc`; all index
/// and file mutations are serialized through the internal engine lock.
pub struct Store {
    shared: Arc<Shared>,
    merge_tx: Option<mpsc::UnboundedSender<()>>,
    merger: Option<thread::JoinHandle<()>>,
}

impl Store {
    /// Open a store directory, creating it if missing, and recover all
    /// existing state.
    ///
    /// `limit` is the active log size in bytes past which rotation
    /// occurs.
    pub fn open(dir: impl Into<PathBuf>, limit: u64) -> Result<Self> {
        let paths = StorePaths::new(dir.into());
        paths.ensure_dirs()?;

        let active_path = paths.active_path();
        let (active_index, active_offset) = if active_path.exists() {
            let (index, offset) = recovery::recover_file(&active_path)?;
            // Drop any torn tail so the append cursor and the index agree.
            let file = OpenOptions::new().write(true).open(&active_path)?;
            file.set_len(offset)?;
            (index, offset)
        } else {
            (HashIndex::new(), 0)
        };
        let active = open_active(&active_path)?;

        // Sealed segments are scanned in contiguous numeric order from 0;
        // a gap ends the scan, which tolerates a crash mid-swap.
        let mut sealed = Vec::new();
        for i in 0usize.. {
            let path = paths.segment_path(i);
            if !path.exists() {
                break;
            }
            let (index, _) = recovery::recover_file(&path)?;
            sealed.push(Segment::new(path, index));
        }

        info!(
            dir = %paths.base_dir.display(),
            active_keys = active_index.len(),
            sealed_segments = sealed.len(),
            "store opened"
        );

        let shared = Arc::new(Shared {
            paths,
            limit,
            state: Mutex::new(StoreState {
                active,
                active_offset,
                active_index,
                sealed,
            }),
        });

        let (merge_tx, merge_rx) = mpsc::unbounded_channel();
        let worker_shared = Arc::clone(&shared);
        let merger = thread::Builder::new()
            .name("barrel-merger".into())
            .spawn(move || merger::run(worker_shared, merge_rx))?;

        Ok(Self {
            shared,
            merge_tx: Some(merge_tx),
            merger: Some(merger),
        })
    }

    /// Append a key-value entry.
    ///
    /// Serialized against all other mutations; a `Get` issued after this
    /// returns observes the new value.
    pub fn put(&self, key: &str, value: &str) -> Result<()> {
        let encoded = Entry::new(key, value).encode();

        let mut request_merge = false;
        {
            let mut state = self.shared.locked();
            state.active.write_all(&encoded)?;

            let offset = state.active_offset;
            state.active_index.insert(key.to_string(), offset);
            state.active_offset += encoded.len() as u64;

            if state.active_offset > self.shared.limit {
                self.rotate(&mut state)?;
                request_merge = state.sealed.len() >= 2;
            }
        }

        if request_merge {
            // Fire-and-forget: the writer never blocks on compaction.
            if let Some(tx) = &self.merge_tx {
                let _ = tx.send(());
            }
        }
        Ok(())
    }

    /// Look up the current value for a key.
    ///
    /// The index lookup and the file open happen under the engine lock;
    /// once the descriptor is held the merger may rename or unlink the
    /// file freely, since the inode stays readable until the descriptor
    /// is closed.
    pub fn get(&self, key: &str) -> Result<String> {
        let (file, offset, path) = {
            let state = self.shared.locked();
            let (path, offset) = state
                .lookup(&self.shared.paths, key)
                .ok_or_else(|| Error::NotFound(key.to_string()))?;
            let file = File::open(&path)?;
            (file, offset, path)
        };

        let mut reader = BufReader::new(file);
        reader.seek(SeekFrom::Start(offset))?;
        let raw = record::read_record(&mut reader)?;

        if !record::verify(&raw) {
            return Err(Error::Corruption(format!(
                "checksum mismatch at {}:{}",
                path.display(),
                offset
            )));
        }

        Ok(Entry::decode(&raw)?.value)
    }

    /// Current engine statistics.
    pub fn stats(&self) -> StoreStats {
        let state = self.shared.locked();
        StoreStats {
            data_dir: self.shared.paths.base_dir.clone(),
            active_size: state.active_offset,
            active_keys: state.active_index.len(),
            sealed_segments: state.sealed.len(),
        }
    }

    /// Close the engine: stop the merger worker and join it.
    ///
    /// Any merge cycle in flight completes before this returns.
    pub fn close(mut self) -> Result<()> {
        self.shutdown();
        Ok(())
    }

    /// Seal the active log and start a new one. Caller holds the lock.
    fn rotate(&self, state: &mut StoreState) -> Result<()> {
        let paths = &self.shared.paths;
        let segment_path = paths.segment_path(state.sealed.len());
        fs::rename(paths.active_path(), &segment_path)?;
        state.active = open_active(&paths.active_path())?;

        let index = std::mem::take(&mut state.active_index);
        state.sealed.push(Segment::new(segment_path, index));
        state.active_offset = 0;

        debug!(sealed_segments = state.sealed.len(), "active log sealed");
        Ok(())
    }

    fn shutdown(&mut self) {
        // Dropping the sender wakes the worker out of its receive loop.
        self.merge_tx.take();
        if let Some(handle) = self.merger.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn open_active(path: &Path) -> Result<File> {
    let file = OpenOptions::new()
        .append(true)
        .create(true)
        .mode(FILE_MODE)
        .open(path)?;
    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};
    use tempfile::tempdir;

    /// Poll until `cond` holds or the deadline passes.
    fn settle(cond: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        false
    }

    fn big_value() -> String {
        "x".repeat(144)
    }

    #[test]
    fn test_basic_put_get() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path(), 1000).unwrap();

        let pairs = [("k1", "v1"), ("k2", "v2"), ("k3", "v3")];
        for (k, v) in pairs {
            store.put(k, v).unwrap();
        }
        for (k, v) in pairs {
            assert_eq!(store.get(k).unwrap(), v);
        }
    }

    #[test]
    fn test_get_missing_key() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path(), 1000).unwrap();

        let err = store.get("no-such-key").unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_last_write_wins() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path(), 100_000).unwrap();

        for i in 0..50 {
            store.put("counter", &i.to_string()).unwrap();
        }
        assert_eq!(store.get("counter").unwrap(), "49");
    }

    #[test]
    fn test_active_file_growth() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path(), 1000).unwrap();

        let pairs = [("k1", "v1"), ("k2", "v2"), ("k3", "v3")];
        for (k, v) in pairs {
            store.put(k, v).unwrap();
        }
        let active = dir.path().join(ACTIVE_FILE_NAME);
        let size1 = fs::metadata(&active).unwrap().len();

        for (k, v) in pairs {
            store.put(k, v).unwrap();
        }
        let size2 = fs::metadata(&active).unwrap().len();
        assert_eq!(size2, size1 * 2);
    }

    #[test]
    fn test_reopen_preserves_state() {
        let dir = tempdir().unwrap();
        let pairs = [("k1", "v1"), ("k2", "v2"), ("k3", "v3")];

        let store = Store::open(dir.path(), 1000).unwrap();
        for (k, v) in pairs {
            store.put(k, v).unwrap();
        }
        store.close().unwrap();

        let store = Store::open(dir.path(), 1000).unwrap();
        for (k, v) in pairs {
            assert_eq!(store.get(k).unwrap(), v);
        }
    }

    #[test]
    fn test_rotation_creates_segment() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path(), 80).unwrap();

        store.put("key", &big_value()).unwrap();

        assert!(dir.path().join("0").exists());
        assert_eq!(store.stats().sealed_segments, 1);
        assert_eq!(store.get("key").unwrap(), big_value());
    }

    #[test]
    fn test_merge_collapses_segment_pair() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path(), 80).unwrap();

        store.put("key", &big_value()).unwrap();
        store.put("key", &big_value()).unwrap();

        assert!(settle(|| {
            store.stats().sealed_segments == 1 && !dir.path().join("1").exists()
        }));
        assert!(dir.path().join("0").exists());
        assert_eq!(store.get("key").unwrap(), big_value());
    }

    #[test]
    fn test_merge_preserves_last_write_wins() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path(), 80).unwrap();

        let big = big_value();
        let sequence = [
            ("a", "a1"),
            ("b", "b1"),
            ("c", "c1"),
            ("key", big.as_str()),
            ("a", "a2"),
            ("key", big.as_str()),
            ("b", "b2"),
        ];
        for (k, v) in sequence {
            store.put(k, v).unwrap();
        }

        assert!(settle(|| {
            store.stats().sealed_segments == 1 && !dir.path().join("1").exists()
        }));

        assert_eq!(store.get("a").unwrap(), "a2");
        assert_eq!(store.get("b").unwrap(), "b2");
        assert_eq!(store.get("c").unwrap(), "c1");
        assert_eq!(store.get("key").unwrap(), big);
    }

    #[test]
    fn test_reopen_recovers_segments() {
        let dir = tempdir().unwrap();

        let store = Store::open(dir.path(), 80).unwrap();
        let big = big_value();
        for (k, v) in [
            ("a", "a1"),
            ("key", big.as_str()),
            ("a", "a2"),
            ("key", big.as_str()),
            ("b", "b1"),
        ] {
            store.put(k, v).unwrap();
        }
        store.close().unwrap();

        let store = Store::open(dir.path(), 100).unwrap();
        assert_eq!(store.get("a").unwrap(), "a2");
        assert_eq!(store.get("b").unwrap(), "b1");
        assert_eq!(store.get("key").unwrap(), big);
    }

    #[test]
    fn test_reopen_truncates_torn_tail() {
        let dir = tempdir().unwrap();

        let store = Store::open(dir.path(), 10_000).unwrap();
        store.put("good", "value").unwrap();
        store.close().unwrap();

        // Simulate a torn write at the end of the active log.
        let active = dir.path().join(ACTIVE_FILE_NAME);
        let mut file = OpenOptions::new().append(true).open(&active).unwrap();
        let torn = Entry::new("torn", "lost").encode();
        file.write_all(&torn[..torn.len() - 9]).unwrap();
        drop(file);

        let store = Store::open(dir.path(), 10_000).unwrap();
        assert_eq!(store.get("good").unwrap(), "value");
        assert!(store.get("torn").unwrap_err().is_not_found());

        // Writes resume cleanly over the discarded tail.
        store.put("after", "recovery").unwrap();
        assert_eq!(store.get("after").unwrap(), "recovery");
        store.close().unwrap();

        let store = Store::open(dir.path(), 10_000).unwrap();
        assert_eq!(store.get("good").unwrap(), "value");
        assert_eq!(store.get("after").unwrap(), "recovery");
    }

    #[test]
    fn test_get_reports_corruption() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path(), 10_000).unwrap();
        store.put("key", "value").unwrap();

        // Flip one payload byte in place.
        let active = dir.path().join(ACTIVE_FILE_NAME);
        let mut bytes = fs::read(&active).unwrap();
        bytes[10] ^= 0x01;
        fs::write(&active, &bytes).unwrap();

        let err = store.get("key").unwrap_err();
        assert!(err.is_corruption());
    }

    #[test]
    fn test_concurrent_puts_and_gets() {
        let dir = tempdir().unwrap();
        let store = Arc::new(Store::open(dir.path(), 500).unwrap());

        thread::scope(|scope| {
            for t in 0..4 {
                let store = Arc::clone(&store);
                scope.spawn(move || {
                    for i in 0..50 {
                        let key = format!("t{}-k{}", t, i);
                        let value = format!("t{}-v{}", t, i);
                        store.put(&key, &value).unwrap();
                        assert_eq!(store.get(&key).unwrap(), value);
                    }
                });
            }
        });

        for t in 0..4 {
            for i in 0..50 {
                let key = format!("t{}-k{}", t, i);
                assert_eq!(store.get(&key).unwrap(), format!("t{}-v{}", t, i));
            }
        }

        // Compaction keeps pace with rotation: once the merger drains its
        // queue the sealed list has collapsed back to a single segment.
        assert!(settle(|| store.stats().sealed_segments == 1));
    }

    #[test]
    fn test_reopen_after_random_workload() {
        use rand::{distributions::Alphanumeric, Rng};

        let dir = tempdir().unwrap();
        let mut rng = rand::thread_rng();

        let mut expected = std::collections::HashMap::new();
        {
            let store = Store::open(dir.path(), 400).unwrap();
            for _ in 0..200 {
                let key = format!("key-{}", rng.gen_range(0..40));
                let value: String = (&mut rng)
                    .sample_iter(&Alphanumeric)
                    .take(24)
                    .map(char::from)
                    .collect();
                store.put(&key, &value).unwrap();
                expected.insert(key, value);
            }
            store.close().unwrap();
        }

        let store = Store::open(dir.path(), 400).unwrap();
        for (key, value) in &expected {
            assert_eq!(&store.get(key).unwrap(), value, "key {}", key);
        }
    }
}
