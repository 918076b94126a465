/*
    persistence.rs - Snapshot persistence with one writer task per store

    Every store mirrors its state into a background writer through an explicit
    mutation channel. The writer applies queued mutations in order, then writes
    the full state as a snapshot file.

    Features:
    - Atomic snapshot creation (write to temp, fsync, then rename)
    - Versioned header with CRC32 checksum
    - Corrupt files are moved aside and the store starts empty
    - Failed writes are retried on the next dirty cycle
    - flush() waits until everything queued so far is on disk
*/

use super::errors::{StoreError, StoreResult};
use bincode::Options;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::fs::{create_dir_all, File};
use std::io::Write;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

const SNAPSHOT_MAGIC: [u8; 4] = *b"AGST";
const SNAPSHOT_VERSION: u32 = 1;
const HEADER_LEN: usize = 20;

/// Default upper bound on a snapshot body
pub const DEFAULT_MAX_SNAPSHOT_SIZE: u64 = 512 * 1024 * 1024;

/// State that a [`PersistenceManager`] can keep on disk
pub trait PersistableState:
    Default + Clone + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// One change to the state, sent to the writer task
    type Mutation: Clone + fmt::Debug + Send + 'static;

    fn apply(&mut self, mutation: Self::Mutation);
}

/// Tunables of a persistence manager
#[derive(Debug, Clone)]
pub struct PersistenceOptions {
    /// Delay before retrying a failed write with no new mutations
    pub retry_delay: Duration,
    pub max_snapshot_size: u64,
}

impl Default for PersistenceOptions {
    fn default() -> Self {
        Self { retry_delay: Duration::from_secs(5), max_snapshot_size: DEFAULT_MAX_SNAPSHOT_SIZE }
    }
}

/// Owns the snapshot file of one store
pub struct PersistenceManager<S> {
    name: Arc<str>,
    path: PathBuf,
    options: PersistenceOptions,
    _state: PhantomData<fn() -> S>,
}

impl<S: PersistableState> PersistenceManager<S> {
    /// Manager for `<dir>/<name>.store`
    pub fn new(dir: &Path, name: &str, options: PersistenceOptions) -> Self {
        Self {
            name: Arc::from(name),
            path: dir.join(format!("{}.store", name)),
            options,
            _state: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the last snapshot.
    ///
    /// Returns `Ok(None)` when no file exists or when the file was corrupt and got
    /// quarantined; only failures to inspect the directory itself are errors.
    pub fn read_persisted(&self) -> StoreResult<Option<S>> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(store = %self.name, "No persisted snapshot, starting empty");
                return Ok(None);
            }
            Err(e) => {
                warn!(store = %self.name, error = %e, "Snapshot unreadable");
                self.quarantine();
                return Ok(None);
            }
        };

        match decode_snapshot::<S>(&bytes, self.options.max_snapshot_size) {
            Ok(state) => {
                info!(store = %self.name, bytes = bytes.len(), "Loaded persisted snapshot");
                Ok(Some(state))
            }
            Err(e) => {
                warn!(store = %self.name, error = %e, "Snapshot corrupt, starting empty");
                metrics::counter!("store.snapshot.corrupt", "store" => self.name.to_string())
                    .increment(1);
                self.quarantine();
                Ok(None)
            }
        }
    }

    /// Write `state` synchronously, bypassing the writer task
    pub fn write_now(&self, state: &S) -> StoreResult<()> {
        let bytes = encode_snapshot(state)?;
        write_atomic(&self.path, &bytes)
    }

    /// Start the writer task mirroring `initial`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn_writer(&self, initial: S) -> StoreResult<PersistenceHandle<S::Mutation>> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| StoreError::Internal(format!("no runtime for writer: {}", e)))?;

        if let Some(parent) = self.path.parent() {
            create_dir_all(parent)?;
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let writer = Writer {
            name: self.name.clone(),
            path: self.path.clone(),
            retry_delay: self.options.retry_delay,
            state: initial,
            dirty: false,
        };
        runtime.spawn(writer.run(rx));

        Ok(PersistenceHandle { name: self.name.clone(), tx })
    }

    fn quarantine(&self) {
        let mut file_name = self.path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        file_name.push(".corrupt");
        let target = self.path.with_file_name(file_name);

        match std::fs::rename(&self.path, &target) {
            Ok(()) => warn!(store = %self.name, path = %target.display(), "Quarantined snapshot"),
            Err(e) => warn!(store = %self.name, error = %e, "Failed to quarantine snapshot"),
        }
    }
}

enum WriterCommand<M> {
    Apply(M),
    Flush(oneshot::Sender<StoreResult<()>>),
}

/// Sending half of a store's writer task
pub struct PersistenceHandle<M> {
    name: Arc<str>,
    tx: mpsc::UnboundedSender<WriterCommand<M>>,
}

impl<M> Clone for PersistenceHandle<M> {
    fn clone(&self) -> Self {
        Self { name: self.name.clone(), tx: self.tx.clone() }
    }
}

impl<M: Send + 'static> PersistenceHandle<M> {
    /// Queue a mutation; never blocks
    pub fn send(&self, mutation: M) {
        if self.tx.send(WriterCommand::Apply(mutation)).is_err() {
            warn!(store = %self.name, "Writer task gone, mutation not persisted");
        }
    }

    /// Wait until every mutation queued before this call is written
    pub async fn flush(&self) -> StoreResult<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(WriterCommand::Flush(reply_tx))
            .map_err(|_| StoreError::Internal(format!("{} writer stopped", self.name)))?;

        reply_rx
            .await
            .map_err(|_| StoreError::Internal(format!("{} writer dropped flush", self.name)))?
    }
}

struct Writer<S> {
    name: Arc<str>,
    path: PathBuf,
    retry_delay: Duration,
    state: S,
    dirty: bool,
}

impl<S: PersistableState> Writer<S> {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<WriterCommand<S::Mutation>>) {
        loop {
            let first = if self.dirty {
                // last write failed; retry after the delay even without new traffic
                match tokio::time::timeout(self.retry_delay, rx.recv()).await {
                    Ok(Some(command)) => Some(command),
                    Ok(None) => break,
                    Err(_) => None,
                }
            } else {
                match rx.recv().await {
                    Some(command) => Some(command),
                    None => break,
                }
            };

            let mut waiters = Vec::new();
            let mut batch = 0usize;
            let mut next = first;
            while let Some(command) = next.take() {
                match command {
                    WriterCommand::Apply(mutation) => {
                        self.state.apply(mutation);
                        self.dirty = true;
                        batch += 1;
                    }
                    WriterCommand::Flush(reply) => waiters.push(reply),
                }
                next = rx.try_recv().ok();
            }

            let result = self.write_if_dirty(batch).await;
            for waiter in waiters {
                let _ = waiter.send(result.clone());
            }
        }

        if self.write_if_dirty(0).await.is_err() {
            warn!(store = %self.name, "Final snapshot write failed, recent mutations lost");
        }
        debug!(store = %self.name, "Writer task stopped");
    }

    async fn write_if_dirty(&mut self, batch: usize) -> StoreResult<()> {
        if !self.dirty {
            return Ok(());
        }

        let result = match encode_snapshot(&self.state) {
            Ok(bytes) => {
                let path = self.path.clone();
                tokio::task::spawn_blocking(move || write_atomic(&path, &bytes))
                    .await
                    .map_err(|e| StoreError::Internal(format!("writer join error: {}", e)))
                    .and_then(|r| r)
            }
            Err(e) => Err(e),
        };

        match &result {
            Ok(()) => {
                self.dirty = false;
                debug!(store = %self.name, batch, "Snapshot written");
            }
            Err(e) => {
                warn!(store = %self.name, error = %e, "Snapshot write failed, will retry");
                metrics::counter!("store.persist.failed", "store" => self.name.to_string())
                    .increment(1);
            }
        }
        result
    }
}

fn snapshot_options(limit: u64) -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .allow_trailing_bytes()
        .with_limit(limit)
}

fn encode_snapshot<S: Serialize>(state: &S) -> StoreResult<Vec<u8>> {
    let body = bincode::serialize(state)?;
    let checksum = crc32fast::hash(&body);

    let mut bytes = Vec::with_capacity(HEADER_LEN + body.len());
    bytes.extend_from_slice(&SNAPSHOT_MAGIC);
    bytes.extend_from_slice(&SNAPSHOT_VERSION.to_be_bytes());
    bytes.extend_from_slice(&checksum.to_be_bytes());
    bytes.extend_from_slice(&(body.len() as u64).to_be_bytes());
    bytes.extend_from_slice(&body);
    Ok(bytes)
}

/// Parse a snapshot file's bytes, checking header, length and checksum before decoding
pub fn decode_snapshot<S: DeserializeOwned>(bytes: &[u8], max_size: u64) -> StoreResult<S> {
    if bytes.len() < HEADER_LEN {
        return Err(StoreError::CorruptedData(format!("truncated header ({} bytes)", bytes.len())));
    }
    if bytes[0..4] != SNAPSHOT_MAGIC {
        return Err(StoreError::CorruptedData("bad magic".to_string()));
    }

    let mut word = [0u8; 4];
    word.copy_from_slice(&bytes[4..8]);
    let version = u32::from_be_bytes(word);
    if version != SNAPSHOT_VERSION {
        return Err(StoreError::CorruptedData(format!("unsupported version {}", version)));
    }

    word.copy_from_slice(&bytes[8..12]);
    let expected_checksum = u32::from_be_bytes(word);

    let mut len_bytes = [0u8; 8];
    len_bytes.copy_from_slice(&bytes[12..20]);
    let len = u64::from_be_bytes(len_bytes);
    if len > max_size {
        return Err(StoreError::CorruptedData(format!("body of {} bytes exceeds limit", len)));
    }

    let body = &bytes[HEADER_LEN..];
    if body.len() as u64 != len {
        return Err(StoreError::CorruptedData(format!(
            "length mismatch: header says {}, file has {}",
            len,
            body.len()
        )));
    }

    let actual_checksum = crc32fast::hash(body);
    if actual_checksum != expected_checksum {
        return Err(StoreError::CorruptedData(format!(
            "checksum mismatch: expected {:08x}, got {:08x}",
            expected_checksum, actual_checksum
        )));
    }

    Ok(snapshot_options(max_size).deserialize(body)?)
}

fn write_atomic(path: &Path, bytes: &[u8]) -> StoreResult<()> {
    if let Some(parent) = path.parent() {
        create_dir_all(parent)?;
    }

    // Write to temporary file first
    let temp_path = path.with_extension("tmp");
    let mut file = File::create(&temp_path)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    drop(file);

    // Atomically rename to final name
    std::fs::rename(&temp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct Counters(BTreeMap<String, u64>);

    #[derive(Debug, Clone)]
    enum CounterMutation {
        Set(String, u64),
        Remove(String),
    }

    impl PersistableState for Counters {
        type Mutation = CounterMutation;

        fn apply(&mut self, mutation: CounterMutation) {
            match mutation {
                CounterMutation::Set(k, v) => {
                    self.0.insert(k, v);
                }
                CounterMutation::Remove(k) => {
                    self.0.remove(&k);
                }
            }
        }
    }

    fn manager(dir: &Path) -> PersistenceManager<Counters> {
        PersistenceManager::new(dir, "counters", PersistenceOptions::default())
    }

    #[test]
    fn test_missing_file_reads_as_none() {
        let dir = tempdir().unwrap();
        assert!(manager(dir.path()).read_persisted().unwrap().is_none());
    }

    #[test]
    fn test_write_then_read() {
        let dir = tempdir().unwrap();
        let manager = manager(dir.path());

        let mut state = Counters::default();
        state.apply(CounterMutation::Set("a".into(), 1));
        manager.write_now(&state).unwrap();

        assert_eq!(manager.read_persisted().unwrap(), Some(state));
        assert!(!manager.path().with_extension("tmp").exists());
    }

    #[test]
    fn test_corrupt_file_is_quarantined() {
        let dir = tempdir().unwrap();
        let manager = manager(dir.path());

        let mut state = Counters::default();
        state.apply(CounterMutation::Set("a".into(), 1));
        manager.write_now(&state).unwrap();

        // flip a byte in the body
        let mut bytes = std::fs::read(manager.path()).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        std::fs::write(manager.path(), &bytes).unwrap();

        assert!(manager.read_persisted().unwrap().is_none());
        assert!(!manager.path().exists());
        assert!(dir.path().join("counters.store.corrupt").exists());
    }

    #[test]
    fn test_garbage_file_is_quarantined() {
        let dir = tempdir().unwrap();
        let manager = manager(dir.path());
        std::fs::write(manager.path(), b"not a snapshot").unwrap();

        assert!(manager.read_persisted().unwrap().is_none());
        assert!(dir.path().join("counters.store.corrupt").exists());
    }

    #[tokio::test]
    async fn test_writer_persists_mutations_in_order() {
        let dir = tempdir().unwrap();
        let manager = manager(dir.path());
        let handle = manager.spawn_writer(Counters::default()).unwrap();

        handle.send(CounterMutation::Set("a".into(), 1));
        handle.send(CounterMutation::Set("b".into(), 2));
        handle.send(CounterMutation::Set("a".into(), 3));
        handle.send(CounterMutation::Remove("b".into()));
        handle.flush().await.unwrap();

        let loaded = manager.read_persisted().unwrap().unwrap();
        assert_eq!(loaded.0.get("a"), Some(&3));
        assert!(loaded.0.get("b").is_none());
    }

    #[tokio::test]
    async fn test_flush_without_mutations_is_ok() {
        let dir = tempdir().unwrap();
        let handle = manager(dir.path()).spawn_writer(Counters::default()).unwrap();

        handle.flush().await.unwrap();
        assert!(!dir.path().join("counters.store").exists());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_write_retried_without_new_mutations() {
        let dir = tempdir().unwrap();
        let options = PersistenceOptions { retry_delay: Duration::from_secs(5), ..Default::default() };
        let manager = PersistenceManager::<Counters>::new(dir.path(), "counters", options);
        let handle = manager.spawn_writer(Counters::default()).unwrap();

        // a directory where the temp file goes makes every write fail
        let blocker = manager.path().with_extension("tmp");
        std::fs::create_dir(&blocker).unwrap();

        handle.send(CounterMutation::Set("a".into(), 1));
        assert!(matches!(handle.flush().await, Err(StoreError::PersistenceIo(_))));

        // mutations keep flowing into the mirrored state while the disk is unavailable
        handle.send(CounterMutation::Set("b".into(), 2));
        assert!(handle.flush().await.is_err());
        assert!(!manager.path().exists());

        std::fs::remove_dir(&blocker).unwrap();
        tokio::time::advance(Duration::from_secs(6)).await;

        let mut waited = 0;
        while !manager.path().exists() && waited < 100 {
            // the write itself runs on the blocking pool in real time
            std::thread::sleep(std::time::Duration::from_millis(10));
            tokio::time::sleep(Duration::from_millis(100)).await;
            waited += 1;
        }

        let loaded = manager.read_persisted().unwrap().unwrap();
        assert_eq!(loaded.0.get("a"), Some(&1));
        assert_eq!(loaded.0.get("b"), Some(&2));
        handle.flush().await.unwrap();
    }

    #[test]
    fn test_spawn_writer_outside_runtime_fails() {
        let dir = tempdir().unwrap();
        let result = manager(dir.path()).spawn_writer(Counters::default());
        assert!(matches!(result, Err(StoreError::Internal(_))));
    }
}
