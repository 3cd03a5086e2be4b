//! Remote record store seam and its built-in backends.
//!
//! # Responsibility
//! - Define the wire record shared by all replicas of one partition.
//! - Provide `fetch` / `put` / `watch` over a partition key.
//!
//! # Invariants
//! - `watch` receivers only see records written after the call.
//! - Binary payloads travel as standard base64.

use crate::config::MIN_INTERVAL;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;

pub type RemoteResult<T> = Result<T, RemoteError>;

#[derive(Debug)]
pub enum RemoteError {
    /// Backend could not be reached; worth retrying.
    Unavailable(String),
    /// Record could not be encoded or decoded.
    Format(String),
    Io(std::io::Error),
}

impl RemoteError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unavailable(_) => "remote_unavailable",
            Self::Format(_) => "remote_format",
            Self::Io(_) => "remote_io",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Io(_))
    }
}

impl Display for RemoteError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unavailable(message) => write!(f, "remote unavailable: {message}"),
            Self::Format(message) => write!(f, "malformed remote record: {message}"),
            Self::Io(err) => write!(f, "{err}"),
        }
    }
}

impl Error for RemoteError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Unavailable(_) | Self::Format(_) => None,
        }
    }
}

impl From<std::io::Error> for RemoteError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_json::Error> for RemoteError {
    fn from(value: serde_json::Error) -> Self {
        Self::Format(value.to_string())
    }
}

/// One partition's record: the latest delta plus the writer's full state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteRecord {
    pub update: String,
    pub full_state: String,
    pub origin: String,
    pub timestamp: i64,
}

impl RemoteRecord {
    pub fn encode(update: &[u8], full_state: &[u8], origin: &str, timestamp: i64) -> Self {
        Self {
            update: STANDARD.encode(update),
            full_state: STANDARD.encode(full_state),
            origin: origin.to_string(),
            timestamp,
        }
    }

    pub fn decode_update(&self) -> RemoteResult<Vec<u8>> {
        decode_field("update", &self.update)
    }

    pub fn decode_full_state(&self) -> RemoteResult<Vec<u8>> {
        decode_field("fullState", &self.full_state)
    }
}

fn decode_field(name: &str, value: &str) -> RemoteResult<Vec<u8>> {
    STANDARD
        .decode(value)
        .map_err(|err| RemoteError::Format(format!("{name}: {err}")))
}

#[async_trait]
pub trait RemoteStore: Send + Sync {
    fn target_id(&self) -> &str;
    async fn fetch(&self, key: &str) -> RemoteResult<Option<RemoteRecord>>;
    async fn put(&self, key: &str, record: &RemoteRecord) -> RemoteResult<()>;
    async fn watch(&self, key: &str) -> RemoteResult<mpsc::UnboundedReceiver<RemoteRecord>>;
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

static INMEM_NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Loopback store: every `put` is echoed to all watchers of the key,
/// including the writer's own.
pub struct InMemoryRemoteStore {
    target_id: String,
    records: Mutex<HashMap<String, RemoteRecord>>,
    watchers: Mutex<HashMap<String, Vec<mpsc::UnboundedSender<RemoteRecord>>>>,
    puts: AtomicUsize,
    failing_fetches: AtomicUsize,
    failing_puts: AtomicUsize,
}

impl InMemoryRemoteStore {
    pub fn new() -> Self {
        let id = INMEM_NEXT_ID.fetch_add(1, Ordering::Relaxed);
        Self {
            target_id: format!("inmem:{id}"),
            records: Mutex::new(HashMap::new()),
            watchers: Mutex::new(HashMap::new()),
            puts: AtomicUsize::new(0),
            failing_fetches: AtomicUsize::new(0),
            failing_puts: AtomicUsize::new(0),
        }
    }

    /// Successful `put` calls so far, across all keys.
    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    pub fn record(&self, key: &str) -> Option<RemoteRecord> {
        lock(&self.records).get(key).cloned()
    }

    /// Makes the next `count` fetches fail as unavailable.
    pub fn fail_next_fetches(&self, count: usize) {
        self.failing_fetches.store(count, Ordering::SeqCst);
    }

    /// Makes the next `count` puts fail as unavailable.
    pub fn fail_next_puts(&self, count: usize) {
        self.failing_puts.store(count, Ordering::SeqCst);
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok()
    }
}

impl Default for InMemoryRemoteStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteStore for InMemoryRemoteStore {
    fn target_id(&self) -> &str {
        &self.target_id
    }

    async fn fetch(&self, key: &str) -> RemoteResult<Option<RemoteRecord>> {
        if Self::take_failure(&self.failing_fetches) {
            return Err(RemoteError::Unavailable("injected fetch failure".to_string()));
        }
        Ok(self.record(key))
    }

    async fn put(&self, key: &str, record: &RemoteRecord) -> RemoteResult<()> {
        if Self::take_failure(&self.failing_puts) {
            return Err(RemoteError::Unavailable("injected put failure".to_string()));
        }
        lock(&self.records).insert(key.to_string(), record.clone());
        self.puts.fetch_add(1, Ordering::SeqCst);

        let mut watchers = lock(&self.watchers);
        if let Some(senders) = watchers.get_mut(key) {
            senders.retain(|sender| sender.send(record.clone()).is_ok());
        }
        Ok(())
    }

    async fn watch(&self, key: &str) -> RemoteResult<mpsc::UnboundedReceiver<RemoteRecord>> {
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.watchers)
            .entry(key.to_string())
            .or_default()
            .push(tx);
        Ok(rx)
    }
}

/// One JSON record file per partition key under a directory, watched by
/// polling. Suitable for a synced folder shared between machines.
pub struct LocalDirRemoteStore {
    target_id: String,
    root: PathBuf,
    poll_interval: Duration,
}

impl LocalDirRemoteStore {
    pub fn new(root: impl Into<PathBuf>, poll_interval: Duration) -> Self {
        let root = root.into();
        Self {
            target_id: format!("localdir:{}", root.display()),
            root,
            poll_interval: poll_interval.max(MIN_INTERVAL),
        }
    }

    pub fn record_path(&self, key: &str) -> PathBuf {
        record_path(&self.root, key)
    }
}

fn record_path(root: &Path, key: &str) -> PathBuf {
    let file_stem: String = key
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
                ch
            } else {
                '_'
            }
        })
        .collect();
    root.join(format!("{file_stem}.json"))
}

async fn read_record(path: &Path) -> RemoteResult<Option<RemoteRecord>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(RemoteError::Io(err)),
    }
}

#[async_trait]
impl RemoteStore for LocalDirRemoteStore {
    fn target_id(&self) -> &str {
        &self.target_id
    }

    async fn fetch(&self, key: &str) -> RemoteResult<Option<RemoteRecord>> {
        read_record(&self.record_path(key)).await
    }

    async fn put(&self, key: &str, record: &RemoteRecord) -> RemoteResult<()> {
        tokio::fs::create_dir_all(&self.root).await?;
        let path = self.record_path(key);
        let staging = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(record)?;
        tokio::fs::write(&staging, bytes).await?;
        tokio::fs::rename(&staging, &path).await?;
        Ok(())
    }

    async fn watch(&self, key: &str) -> RemoteResult<mpsc::UnboundedReceiver<RemoteRecord>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let path = self.record_path(key);
        let mut last_seen = read_record(&path).await.ok().flatten();
        let poll_interval = self.poll_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if tx.is_closed() {
                    break;
                }
                match read_record(&path).await {
                    Ok(Some(record)) if last_seen.as_ref() != Some(&record) => {
                        last_seen = Some(record.clone());
                        if tx.send(record).is_err() {
                            break;
                        }
                    }
                    Ok(_) => {}
                    // Half-written or foreign file; try again next tick.
                    Err(err) => warn!(
                        "event=remote_watch module=sync status=error code={} error={}",
                        err.code(),
                        err
                    ),
                }
            }
            debug!("event=remote_watch module=sync status=stopped");
        });
        Ok(rx)
    }
}
