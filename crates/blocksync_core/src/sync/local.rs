//! Durable local tier: replays the update log on start and captures deltas.
//!
//! # Responsibility
//! - Rebuild the document from the append-only log before anyone reads it.
//! - Append every local and remote delta through one writer task.
//! - Compact the log into a single snapshot on demand.
//!
//! # Invariants
//! - Replayed deltas are tagged `Origin::Replay` and never re-captured.
//! - Appends happen in delta production order.
//! - Storage failures are logged and counted, never propagated to writers.

use crate::db::{lock_conn, SharedConnection};
use crate::document::{DocumentStore, ListenerId, Origin};
use crate::repo::update_log::{LogEntryKind, SqliteUpdateLog, UpdateLogRepository, DOCUMENT_NAME};
use crate::repo::RepoResult;
use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Result of replaying the durable log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub applied: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PersistStats {
    pub captured: u64,
    pub written: u64,
    pub failed: u64,
}

struct Counters {
    captured: AtomicU64,
    written: AtomicU64,
    failed: AtomicU64,
    finished: watch::Sender<u64>,
}

struct Writer {
    tx: mpsc::UnboundedSender<Arc<[u8]>>,
    task: JoinHandle<()>,
}

pub struct LocalPersistence {
    conn: SharedConnection,
    store: DocumentStore,
    doc_name: String,
    counters: Arc<Counters>,
    writer: Mutex<Option<Writer>>,
    listener: Mutex<Option<ListenerId>>,
}

impl LocalPersistence {
    pub fn new(conn: SharedConnection, store: DocumentStore) -> Self {
        let (finished, _) = watch::channel(0);
        Self {
            conn,
            store,
            doc_name: DOCUMENT_NAME.to_string(),
            counters: Arc::new(Counters {
                captured: AtomicU64::new(0),
                written: AtomicU64::new(0),
                failed: AtomicU64::new(0),
                finished,
            }),
            writer: Mutex::new(None),
            listener: Mutex::new(None),
        }
    }

    /// Replays the log into the store, marks it loaded, then starts capture.
    ///
    /// Unreadable storage yields an empty document rather than an error.
    pub async fn load(&self) -> LoadReport {
        let started_at = Instant::now();
        info!("event=persist_load module=sync status=start");

        let entries = {
            let conn = lock_conn(&self.conn);
            SqliteUpdateLog::new(&conn).entries(&self.doc_name)
        };

        let mut report = LoadReport::default();
        match entries {
            Ok(entries) => {
                for entry in entries {
                    match self.store.apply_delta(&entry.payload, Origin::Replay) {
                        Ok(_) => report.applied += 1,
                        Err(err) => {
                            report.skipped += 1;
                            warn!(
                                "event=persist_replay module=sync status=error seq={} error={}",
                                entry.seq, err
                            );
                        }
                    }
                    tokio::task::yield_now().await;
                }
            }
            Err(err) => error!("event=persist_load module=sync status=error error={err}"),
        }

        self.store.mark_loaded();
        self.attach();
        info!(
            "event=persist_load module=sync status=ok applied={} skipped={} duration_ms={}",
            report.applied,
            report.skipped,
            started_at.elapsed().as_millis()
        );
        report
    }

    /// Resumes capture. No-op when already attached.
    ///
    /// Must run inside a Tokio runtime; the writer task is spawned lazily.
    pub fn attach(&self) {
        let mut listener = lock(&self.listener);
        if listener.is_some() {
            return;
        }
        let tx = self.ensure_writer();
        let counters = Arc::clone(&self.counters);
        let id = self.store.subscribe(Arc::new(move |delta| {
            if delta.origin == Origin::Replay {
                return;
            }
            counters.captured.fetch_add(1, Ordering::SeqCst);
            if tx.send(Arc::clone(&delta.update)).is_err() {
                counters.failed.fetch_add(1, Ordering::SeqCst);
                counters.finished.send_modify(|done| *done += 1);
            }
        }));
        *listener = Some(id);
        debug!("event=persist_attach module=sync status=ok");
    }

    /// Stops capture; the log is kept.
    pub fn detach(&self) {
        if let Some(id) = lock(&self.listener).take() {
            self.store.unsubscribe(id);
            debug!("event=persist_detach module=sync status=ok");
        }
    }

    pub fn is_attached(&self) -> bool {
        lock(&self.listener).is_some()
    }

    /// Replaces the whole log with one snapshot of the current state.
    pub async fn compact(&self) -> RepoResult<u64> {
        self.settled().await;
        // Hold the connection so no delta lands between snapshot and swap.
        let conn = lock_conn(&self.conn);
        let snapshot = self
            .store
            .snapshot()
            .map_err(|err| crate::repo::RepoError::InvalidData(err.to_string()))?;
        let log = SqliteUpdateLog::new(&conn);
        let before = log.count(&self.doc_name)?;
        log.replace_with_snapshot(&self.doc_name, &snapshot)?;
        info!(
            "event=persist_compact module=sync status=ok entries_before={} snapshot_bytes={}",
            before,
            snapshot.len()
        );
        Ok(before)
    }

    /// Resolves once every delta captured so far was written or failed.
    pub async fn settled(&self) {
        let target = self.counters.captured.load(Ordering::SeqCst);
        let mut finished = self.counters.finished.subscribe();
        // Sender lives in `self`, so the channel cannot close while borrowed.
        let _ = finished.wait_for(|done| *done >= target).await;
    }

    pub fn stats(&self) -> PersistStats {
        PersistStats {
            captured: self.counters.captured.load(Ordering::SeqCst),
            written: self.counters.written.load(Ordering::SeqCst),
            failed: self.counters.failed.load(Ordering::SeqCst),
        }
    }

    /// Number of rows currently in the log.
    pub fn log_len(&self) -> RepoResult<u64> {
        let conn = lock_conn(&self.conn);
        SqliteUpdateLog::new(&conn).count(&self.doc_name)
    }

    fn ensure_writer(&self) -> mpsc::UnboundedSender<Arc<[u8]>> {
        let mut writer = lock(&self.writer);
        if let Some(existing) = writer.as_ref() {
            if !existing.task.is_finished() {
                return existing.tx.clone();
            }
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_writer(
            Arc::clone(&self.conn),
            self.doc_name.clone(),
            Arc::clone(&self.counters),
            rx,
        ));
        *writer = Some(Writer {
            tx: tx.clone(),
            task,
        });
        tx
    }
}

impl Drop for LocalPersistence {
    fn drop(&mut self) {
        self.detach();
    }
}

async fn run_writer(
    conn: SharedConnection,
    doc_name: String,
    counters: Arc<Counters>,
    mut rx: mpsc::UnboundedReceiver<Arc<[u8]>>,
) {
    while let Some(update) = rx.recv().await {
        let result = {
            let conn = lock_conn(&conn);
            SqliteUpdateLog::new(&conn).append(&doc_name, LogEntryKind::Update, &update)
        };
        match result {
            Ok(seq) => {
                counters.written.fetch_add(1, Ordering::SeqCst);
                debug!(
                    "event=persist_write module=sync status=ok seq={} bytes={}",
                    seq,
                    update.len()
                );
            }
            Err(err) => {
                counters.failed.fetch_add(1, Ordering::SeqCst);
                error!("event=persist_write module=sync status=error error={err}");
            }
        }
        counters.finished.send_modify(|done| *done += 1);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
