//! Crash recovery testing for segstore.
//!
//! Simulates crashes while the journal is being written and verifies that
//! a reopened store holds exactly the acknowledged operations.
//!
//! ## Test Strategy
//!
//! 1. **Crash during journal write** - a record is cut short mid-write
//! 2. **Torn tail on disk** - the journal file is truncated at arbitrary points
//! 3. **Damaged record** - a byte inside a committed record is flipped
//!
//! ## Usage
//!
//! ```rust,ignore
//! use segstore_testkit::crash::crash_during_appends;
//!
//! let result = crash_during_appends(300, 20, 16).await;
//! assert!(result.passed, "{result:?}");
//! ```

use crate::fixtures::TEST_TIMEOUT;
use bytes::Bytes;
use segstore_core::dir::{ATTRIBUTES_FILE, JOURNAL_FILE};
use segstore_core::{
    OperationLog, PersistentAttributeStore, SegmentError, SegmentResult, SegmentStore, StoreConfig,
};
use segstore_storage::{FileBackend, StorageBackend, StorageError, StorageResult};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

/// Result of a crash recovery test.
#[derive(Debug, Clone)]
pub struct CrashRecoveryResult {
    /// Whether the test passed.
    pub passed: bool,
    /// Description of what was tested.
    pub description: String,
    /// Bytes acknowledged to the writer before the crash.
    pub acknowledged_length: u64,
    /// Segment length after recovery.
    pub recovered_length: u64,
    /// Any error message.
    pub error: Option<String>,
}

impl CrashRecoveryResult {
    /// Creates a passing result.
    pub fn pass(description: &str, length: u64) -> Self {
        Self {
            passed: true,
            description: description.to_string(),
            acknowledged_length: length,
            recovered_length: length,
            error: None,
        }
    }

    /// Creates a failing result.
    pub fn fail(description: &str, acknowledged: u64, recovered: u64, error: &str) -> Self {
        Self {
            passed: false,
            description: description.to_string(),
            acknowledged_length: acknowledged,
            recovered_length: recovered,
            error: Some(error.to_string()),
        }
    }
}

/// Shared crash trigger for a [`CrashableBackend`].
///
/// The backend is moved into the store, so tests keep the switch to arm
/// and inspect it.
#[derive(Debug)]
pub struct CrashSwitch {
    crash_after_bytes: AtomicUsize,
    bytes_written: AtomicUsize,
    crashed: AtomicBool,
    fail_on_flush: AtomicBool,
}

impl CrashSwitch {
    /// Creates a disarmed switch.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            crash_after_bytes: AtomicUsize::new(usize::MAX),
            bytes_written: AtomicUsize::new(0),
            crashed: AtomicBool::new(false),
            fail_on_flush: AtomicBool::new(false),
        })
    }

    /// Crashes once this many bytes have been appended in total.
    pub fn crash_after(&self, bytes: usize) {
        self.crash_after_bytes.store(bytes, Ordering::SeqCst);
    }

    /// Sets whether flush and sync should fail.
    pub fn set_fail_on_flush(&self, fail: bool) {
        self.fail_on_flush.store(fail, Ordering::SeqCst);
    }

    /// Returns whether the backend has crashed.
    pub fn has_crashed(&self) -> bool {
        self.crashed.load(Ordering::SeqCst)
    }

    /// Bytes appended through the backend so far, including rejected ones.
    pub fn bytes_written(&self) -> usize {
        self.bytes_written.load(Ordering::SeqCst)
    }

    fn crash(&self, what: &str) -> StorageError {
        self.crashed.store(true, Ordering::SeqCst);
        StorageError::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            format!("simulated crash during {what}"),
        ))
    }
}

/// A storage backend wrapper that can simulate crashes.
///
/// Once the switch trips, the write that crossed the threshold is written
/// partially and every later write fails, like a process that died
/// mid-write.
pub struct CrashableBackend {
    inner: Box<dyn StorageBackend>,
    switch: Arc<CrashSwitch>,
}

impl CrashableBackend {
    /// Creates a new crashable backend wrapping an inner backend.
    pub fn new(inner: Box<dyn StorageBackend>, switch: Arc<CrashSwitch>) -> Self {
        Self { inner, switch }
    }
}

impl StorageBackend for CrashableBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        self.inner.read_at(offset, len)
    }

    fn append(&mut self, bytes: &[u8]) -> StorageResult<u64> {
        let current = self.switch.bytes_written.fetch_add(bytes.len(), Ordering::SeqCst);
        let threshold = self.switch.crash_after_bytes.load(Ordering::SeqCst);

        if self.switch.has_crashed() || current >= threshold {
            return Err(self.switch.crash("write"));
        }

        if current + bytes.len() > threshold {
            let partial_len = threshold - current;
            if partial_len > 0 {
                let _ = self.inner.append(&bytes[..partial_len]);
            }
            return Err(self.switch.crash("partial write"));
        }

        self.inner.append(bytes)
    }

    fn flush(&mut self) -> StorageResult<()> {
        if self.switch.fail_on_flush.load(Ordering::SeqCst) {
            return Err(self.switch.crash("flush"));
        }
        self.inner.flush()
    }

    fn size(&self) -> StorageResult<u64> {
        self.inner.size()
    }

    fn sync(&mut self) -> StorageResult<()> {
        if self.switch.fail_on_flush.load(Ordering::SeqCst) {
            return Err(self.switch.crash("sync"));
        }
        self.inner.sync()
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        self.inner.truncate(new_size)
    }
}

/// Returns the end offset of every complete record in a journal file.
pub fn journal_record_ends(journal: &Path) -> SegmentResult<Vec<u64>> {
    let log = OperationLog::new(Box::new(FileBackend::open(journal)?), false);
    let records = log.read_all()?;
    let size = log.size()?;
    let mut ends: Vec<u64> = records.iter().skip(1).map(|(offset, _)| *offset).collect();
    if !records.is_empty() {
        ends.push(size);
    }
    Ok(ends)
}

/// Copies a store directory's journal and attribute index into a fresh
/// temporary directory, cutting the journal to `journal_len` bytes.
pub fn copy_store_truncated(source: &Path, journal_len: u64) -> std::io::Result<TempDir> {
    let target = TempDir::new()?;
    let mut journal = std::fs::read(source.join(JOURNAL_FILE))?;
    journal.truncate(usize::try_from(journal_len).unwrap_or(usize::MAX));
    std::fs::write(target.path().join(JOURNAL_FILE), journal)?;
    let attributes = source.join(ATTRIBUTES_FILE);
    if attributes.exists() {
        std::fs::copy(attributes, target.path().join(ATTRIBUTES_FILE))?;
    }
    Ok(target)
}

/// Flips every bit of the journal byte at `offset`.
pub fn flip_journal_byte(dir: &Path, offset: usize) -> std::io::Result<()> {
    let path = dir.join(JOURNAL_FILE);
    let mut bytes = std::fs::read(&path)?;
    if let Some(byte) = bytes.get_mut(offset) {
        *byte ^= 0xff;
    }
    std::fs::write(path, bytes)
}

/// Returns `(name, length)` for every segment in a reopened store.
pub async fn segment_lengths(store: &SegmentStore) -> SegmentResult<Vec<(String, u64)>> {
    let mut lengths = Vec::new();
    for name in store.segment_names() {
        let handle = store
            .get_stream_segment_info(&name, false, TEST_TIMEOUT)
            .map_err(|e| SegmentError::internal(e.to_string()))?;
        lengths.push((name, handle.await?.length));
    }
    Ok(lengths)
}

/// Test harness owning a store directory whose journal can crash.
pub struct CrashRecoveryHarness {
    dir: TempDir,
    /// Crash trigger for the journal backend.
    pub switch: Arc<CrashSwitch>,
}

impl CrashRecoveryHarness {
    /// Creates a harness over an empty temporary directory.
    pub fn new() -> std::io::Result<Self> {
        Ok(Self {
            dir: TempDir::new()?,
            switch: CrashSwitch::new(),
        })
    }

    /// The store directory.
    pub fn path(&self) -> PathBuf {
        self.dir.path().to_path_buf()
    }

    /// Opens a store whose journal goes through the crash switch.
    pub fn open_crashable(&self) -> SegmentResult<SegmentStore> {
        let journal = FileBackend::open(&self.dir.path().join(JOURNAL_FILE))?;
        let attributes = PersistentAttributeStore::open(
            Box::new(FileBackend::open(&self.dir.path().join(ATTRIBUTES_FILE))?),
            true,
        )?;
        SegmentStore::open_with_backends(
            StoreConfig::default(),
            Box::new(CrashableBackend::new(Box::new(journal), Arc::clone(&self.switch))),
            Arc::new(attributes),
        )
    }

    /// Opens the store normally, as a restarted process would.
    pub fn reopen(&self) -> SegmentResult<SegmentStore> {
        SegmentStore::open(self.dir.path())
    }
}

/// Appends `appends` payloads of `payload_size` bytes to one segment while
/// the journal crashes after `crash_after` bytes, then reopens the store
/// and checks that exactly the acknowledged appends survived.
pub async fn crash_during_appends(crash_after: usize, appends: usize, payload_size: usize) -> CrashRecoveryResult {
    let description = format!("crash after {crash_after} journal bytes");
    let harness = match CrashRecoveryHarness::new() {
        Ok(harness) => harness,
        Err(e) => return CrashRecoveryResult::fail(&description, 0, 0, &e.to_string()),
    };

    let mut acknowledged = 0u64;
    let mut created = false;
    {
        let store = match harness.open_crashable() {
            Ok(store) => store,
            Err(e) => return CrashRecoveryResult::fail(&description, 0, 0, &e.to_string()),
        };
        harness.switch.crash_after(crash_after);

        if let Ok(handle) = store.create_stream_segment("crash", vec![], TEST_TIMEOUT) {
            created = handle.await.is_ok();
        }
        if created {
            for i in 0..appends {
                let payload = Bytes::from(vec![(i % 256) as u8; payload_size]);
                let Ok(handle) = store.append("crash", payload, vec![], TEST_TIMEOUT) else {
                    break;
                };
                match handle.await {
                    Ok(()) => acknowledged += payload_size as u64,
                    Err(_) => break,
                }
            }
        }
    }

    let store = match harness.reopen() {
        Ok(store) => store,
        Err(e) => return CrashRecoveryResult::fail(&description, acknowledged, 0, &e.to_string()),
    };
    let recovered = match segment_lengths(&store).await {
        Ok(lengths) => lengths,
        Err(e) => return CrashRecoveryResult::fail(&description, acknowledged, 0, &e.to_string()),
    };

    match (created, recovered.as_slice()) {
        (false, []) => CrashRecoveryResult::pass(&description, 0),
        (true, [(_, length)]) if *length == acknowledged => CrashRecoveryResult::pass(&description, acknowledged),
        (_, lengths) => {
            let length = lengths.first().map_or(0, |(_, len)| *len);
            CrashRecoveryResult::fail(
                &description,
                acknowledged,
                length,
                &format!("recovered {lengths:?}, created={created}"),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn no_crash_keeps_everything() {
        let result = crash_during_appends(usize::MAX, 10, 32).await;
        assert!(result.passed, "{result:?}");
        assert_eq!(result.recovered_length, 320);
    }

    #[tokio::test]
    async fn crash_at_many_points_recovers_acknowledged_appends() {
        for crash_after in (0..1_200).step_by(37) {
            let result = crash_during_appends(crash_after, 20, 24).await;
            assert!(result.passed, "{result:?}");
        }
    }

    #[tokio::test]
    async fn failed_flush_reports_error() {
        let harness = CrashRecoveryHarness::new().unwrap();
        let store = harness.open_crashable().unwrap();
        store.create_stream_segment("s", vec![], TEST_TIMEOUT).unwrap().await.unwrap();

        harness.switch.set_fail_on_flush(true);
        let err = store
            .append("s", Bytes::from_static(b"x"), vec![], TEST_TIMEOUT)
            .unwrap()
            .await
            .unwrap_err();
        assert!(matches!(err, SegmentError::Storage(_)));
        assert!(harness.switch.has_crashed());
    }

    #[tokio::test]
    async fn every_journal_prefix_recovers() {
        let harness = CrashRecoveryHarness::new().unwrap();
        {
            let store = harness.reopen().unwrap();
            for name in ["a", "b"] {
                store.create_stream_segment(name, vec![], TEST_TIMEOUT).unwrap().await.unwrap();
                for _ in 0..3 {
                    store
                        .append(name, Bytes::from_static(b"0123"), vec![], TEST_TIMEOUT)
                        .unwrap()
                        .await
                        .unwrap();
                }
            }
            store.seal_stream_segment("b", TEST_TIMEOUT).unwrap().await.unwrap();
            store.shutdown().unwrap();
        }

        let journal = harness.path().join(JOURNAL_FILE);
        let ends = journal_record_ends(&journal).unwrap();
        assert_eq!(ends.len(), 9);

        let mut previous: Vec<(String, u64)> = Vec::new();
        let mut previous_end = 0;
        for end in ends {
            // A cut inside a record recovers the state before it.
            let mid = copy_store_truncated(&harness.path(), (previous_end + end) / 2).unwrap();
            let store = SegmentStore::open(mid.path()).unwrap();
            assert_eq!(segment_lengths(&store).await.unwrap(), previous);
            drop(store);

            let whole = copy_store_truncated(&harness.path(), end).unwrap();
            let store = SegmentStore::open(whole.path()).unwrap();
            let lengths = segment_lengths(&store).await.unwrap();
            assert!(lengths.len() >= previous.len());
            previous = lengths;
            previous_end = end;
        }
        assert_eq!(previous, vec![("a".to_string(), 12), ("b".to_string(), 12)]);
    }

    #[tokio::test]
    async fn flipped_byte_fails_reopen() {
        let harness = CrashRecoveryHarness::new().unwrap();
        {
            let store = harness.reopen().unwrap();
            store.create_stream_segment("s", vec![], TEST_TIMEOUT).unwrap().await.unwrap();
        }
        flip_journal_byte(&harness.path(), 20).unwrap();
        let err = harness.reopen().unwrap_err();
        assert!(!err.is_retryable());
    }
}
