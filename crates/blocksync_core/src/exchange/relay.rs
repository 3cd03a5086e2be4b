//! Outbound completion relay.
//!
//! # Responsibility
//! - Queue completed work blocks and append them to the shared completion
//!   file without duplicating entries already there.
//! - Retry failed writes with capped exponential backoff.
//!
//! # Invariants
//! - At most one processing run is in flight.
//! - An item leaves the queue only after a confirmed write, or after
//!   failing `max_retries` consecutive attempts.
//! - At most one retry timer exists; rescheduling aborts the previous one.

use super::{parse_array, read_optional, ExchangeError, ExchangeResult};
use crate::backoff::Backoff;
use crate::config::RelayConfig;
use crate::model::completion::{DedupKey, PendingCompletion};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde_json::Value;
use std::collections::HashSet;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

/// Storage the relay appends to.
///
/// Entries travel as raw JSON so fields written by other tools survive the
/// read-modify-write cycle.
pub trait CompletionSink: Send + Sync {
    fn read_entries(&self) -> ExchangeResult<Vec<Value>>;
    fn write_entries(&self, entries: &[Value]) -> ExchangeResult<()>;
}

/// `completed_blocks.json` inside the shared directory.
#[derive(Debug, Clone)]
pub struct JsonFileCompletionSink {
    path: PathBuf,
}

impl JsonFileCompletionSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CompletionSink for JsonFileCompletionSink {
    fn read_entries(&self) -> ExchangeResult<Vec<Value>> {
        match read_optional(&self.path)? {
            Some(text) => parse_array(&text),
            None => Ok(Vec::new()),
        }
    }

    fn write_entries(&self, entries: &[Value]) -> ExchangeResult<()> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let text = serde_json::to_string_pretty(entries)?;
        let staging = self.path.with_extension("json.tmp");
        std::fs::write(&staging, text)?;
        std::fs::rename(&staging, &self.path)?;
        Ok(())
    }
}

/// What one processing run did.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// Queue was empty.
    Idle,
    /// Another run was in flight.
    Busy,
    Delivered {
        written: usize,
        already_present: usize,
    },
    Failed {
        error: String,
        dropped: usize,
        retry_in: Option<Duration>,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub delivered: u64,
    pub duplicates: u64,
    pub dropped: u64,
    pub failed_runs: u64,
}

type RunFuture = Pin<Box<dyn Future<Output = RunOutcome> + Send>>;

struct RelayInner {
    sink: Arc<dyn CompletionSink>,
    backoff: Backoff,
    max_retries: u32,
    queue: Mutex<Vec<PendingCompletion>>,
    in_flight: AtomicBool,
    retry_timer: Mutex<Option<JoinHandle<RunOutcome>>>,
    stats: Mutex<RelayStats>,
}

#[derive(Clone)]
pub struct CompletionRelay {
    inner: Arc<RelayInner>,
}

impl CompletionRelay {
    pub fn new(sink: Arc<dyn CompletionSink>, config: &RelayConfig) -> Self {
        Self {
            inner: Arc::new(RelayInner {
                sink,
                backoff: Backoff::from_millis(
                    config.base_delay_ms,
                    config.max_delay_ms,
                    config.jitter_ms,
                ),
                max_retries: config.max_retries,
                queue: Mutex::new(Vec::new()),
                in_flight: AtomicBool::new(false),
                retry_timer: Mutex::new(None),
                stats: Mutex::new(RelayStats::default()),
            }),
        }
    }

    /// Queues a completion stamped now and starts processing.
    pub fn record(
        &self,
        task_id: impl Into<String>,
        duration_minutes: u32,
        block_id: Option<String>,
    ) -> JoinHandle<RunOutcome> {
        self.record_at(task_id, duration_minutes, block_id, Utc::now())
    }

    pub fn record_at(
        &self,
        task_id: impl Into<String>,
        duration_minutes: u32,
        block_id: Option<String>,
        completed_at: DateTime<Utc>,
    ) -> JoinHandle<RunOutcome> {
        let item = PendingCompletion::new(
            task_id,
            duration_minutes,
            block_id,
            completed_at,
            Utc::now(),
        );
        let depth = {
            let mut queue = lock(&self.inner.queue);
            queue.push(item);
            queue.len()
        };
        debug!("event=relay_enqueue module=exchange status=ok queue_depth={depth}");
        tokio::spawn(self.run())
    }

    /// Cancels a scheduled retry and processes the queue now.
    pub async fn flush(&self) -> RunOutcome {
        self.cancel_retry();
        self.run().await
    }

    pub fn pending(&self) -> Vec<PendingCompletion> {
        lock(&self.inner.queue).clone()
    }

    pub fn has_scheduled_retry(&self) -> bool {
        lock(&self.inner.retry_timer)
            .as_ref()
            .is_some_and(|timer| !timer.is_finished())
    }

    pub fn stats(&self) -> RelayStats {
        *lock(&self.inner.stats)
    }

    // Boxed so runs can spawn follow-up runs of themselves.
    fn run(&self) -> RunFuture {
        let relay = self.clone();
        Box::pin(async move { relay.process().await })
    }

    async fn process(&self) -> RunOutcome {
        if self.inner.in_flight.swap(true, Ordering::AcqRel) {
            debug!("event=relay_run module=exchange status=skipped reason=in_flight");
            return RunOutcome::Busy;
        }
        let outcome = self.run_batch().await;
        self.inner.in_flight.store(false, Ordering::Release);

        if matches!(outcome, RunOutcome::Delivered { .. }) {
            let drained = lock(&self.inner.queue).is_empty();
            if drained {
                self.cancel_retry();
            } else {
                // Items recorded while the run was in flight.
                tokio::spawn(self.run());
            }
        }
        outcome
    }

    async fn run_batch(&self) -> RunOutcome {
        let batch = lock(&self.inner.queue).clone();
        if batch.is_empty() {
            return RunOutcome::Idle;
        }
        let processed: HashSet<DedupKey> = batch.iter().map(PendingCompletion::dedup_key).collect();
        let started_at = Instant::now();
        let sink = Arc::clone(&self.inner.sink);
        let result = tokio::task::spawn_blocking(move || deliver(sink.as_ref(), &batch))
            .await
            .unwrap_or_else(|err| Err(ExchangeError::Io(std::io::Error::other(err.to_string()))));

        match result {
            Ok((written, already_present)) => {
                lock(&self.inner.queue).retain(|item| !processed.contains(&item.dedup_key()));
                {
                    let mut stats = lock(&self.inner.stats);
                    stats.delivered += written as u64;
                    stats.duplicates += already_present as u64;
                }
                info!(
                    "event=relay_run module=exchange status=ok written={} already_present={} duration_ms={}",
                    written,
                    already_present,
                    started_at.elapsed().as_millis()
                );
                RunOutcome::Delivered {
                    written,
                    already_present,
                }
            }
            Err(err) => self.handle_failure(&processed, err),
        }
    }

    fn handle_failure(&self, processed: &HashSet<DedupKey>, err: ExchangeError) -> RunOutcome {
        let max_retries = self.inner.max_retries;
        let (dropped, min_retry) = {
            let mut queue = lock(&self.inner.queue);
            for item in queue.iter_mut() {
                if processed.contains(&item.dedup_key()) {
                    item.retry_count += 1;
                }
            }
            let before = queue.len();
            queue.retain(|item| {
                if item.retry_count < max_retries {
                    return true;
                }
                warn!(
                    "event=relay_drop module=exchange status=error task_id={} retries={}",
                    item.task_id, item.retry_count
                );
                false
            });
            (
                before - queue.len(),
                queue.iter().map(|item| item.retry_count).min(),
            )
        };
        {
            let mut stats = lock(&self.inner.stats);
            stats.failed_runs += 1;
            stats.dropped += dropped as u64;
        }

        let retry_in = min_retry.map(|attempt| {
            let delay = self.inner.backoff.delay(attempt);
            self.schedule_retry(delay);
            delay
        });
        warn!(
            "event=relay_run module=exchange status=error class={} dropped={} retry_in_ms={} error={}",
            err.class().as_str(),
            dropped,
            retry_in.map_or(0, |delay| delay.as_millis()),
            err
        );
        RunOutcome::Failed {
            error: err.to_string(),
            dropped,
            retry_in,
        }
    }

    fn cancel_retry(&self) {
        let timer = lock(&self.inner.retry_timer).take();
        if let Some(timer) = timer {
            timer.abort();
        }
    }

    fn schedule_retry(&self, delay: Duration) {
        let relay = self.clone();
        let mut timer = lock(&self.inner.retry_timer);
        if let Some(previous) = timer.take() {
            previous.abort();
        }
        *timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // Leave the slot empty so this run may schedule the next retry.
            lock(&relay.inner.retry_timer).take();
            relay.run().await
        }));
    }
}

/// Appends unseen batch items to the sink; returns `(written, already_present)`.
fn deliver(sink: &dyn CompletionSink, batch: &[PendingCompletion]) -> ExchangeResult<(usize, usize)> {
    let mut entries = sink.read_entries()?;
    let mut known: HashSet<DedupKey> = entries.iter().filter_map(dedup_key_of).collect();
    let mut written = 0;
    for item in batch {
        if known.insert(item.dedup_key()) {
            entries.push(serde_json::to_value(item.to_entry())?);
            written += 1;
        }
    }
    if written > 0 {
        sink.write_entries(&entries)?;
    }
    Ok((written, batch.len() - written))
}

fn dedup_key_of(entry: &Value) -> Option<DedupKey> {
    Some(DedupKey {
        task_id: entry.get("taskId")?.as_str()?.to_string(),
        completed_at: entry.get("completedAt")?.as_str()?.to_string(),
    })
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::atomic::AtomicU32;

    /// Sink that fails a configurable number of reads before behaving.
    #[derive(Default)]
    struct ScriptedSink {
        entries: Mutex<Vec<Value>>,
        failures_left: AtomicU32,
        writes: AtomicU32,
    }

    impl CompletionSink for ScriptedSink {
        fn read_entries(&self) -> ExchangeResult<Vec<Value>> {
            let failing = self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
                .is_ok();
            if failing {
                return Err(ExchangeError::from_io(std::io::Error::other("resource busy")));
            }
            Ok(self.entries.lock().unwrap().clone())
        }

        fn write_entries(&self, entries: &[Value]) -> ExchangeResult<()> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            *self.entries.lock().unwrap() = entries.to_vec();
            Ok(())
        }
    }

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 9, minute, 0).unwrap()
    }

    #[tokio::test]
    async fn duplicate_recordings_write_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shared").join("completed_blocks.json");
        let sink = Arc::new(JsonFileCompletionSink::new(&path));
        let relay = CompletionRelay::new(sink, &RelayConfig::default());

        relay.record_at("t1", 25, Some("b1".to_string()), at(30)).await.unwrap();
        relay.record_at("t1", 25, Some("b1".to_string()), at(30)).await.unwrap();
        assert!(matches!(relay.flush().await, RunOutcome::Idle));

        let written: Vec<Value> =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written.len(), 1);
        assert_eq!(written[0]["taskId"], "t1");
        assert_eq!(written[0]["completedAt"], "2026-03-02T09:30:00.000Z");
        assert_eq!(written[0]["blockId"], "b1");
        assert!(relay.pending().is_empty());
    }

    #[tokio::test]
    async fn foreign_fields_survive_rewrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("completed_blocks.json");
        std::fs::write(
            &path,
            r#"[{"taskId":"x","completedAt":"2026-01-01T00:00:00.000Z","duration":5,"source":"tracker"}]"#,
        )
        .unwrap();
        let relay = CompletionRelay::new(
            Arc::new(JsonFileCompletionSink::new(&path)),
            &RelayConfig::default(),
        );

        let outcome = relay.record_at("y", 30, None, at(0)).await.unwrap();
        assert_eq!(
            outcome,
            RunOutcome::Delivered {
                written: 1,
                already_present: 0
            }
        );
        let written: Vec<Value> =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written[0]["source"], "tracker");
        assert!(written[1].get("blockId").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn item_is_dropped_after_ceiling() {
        let sink = Arc::new(ScriptedSink::default());
        sink.failures_left.store(u32::MAX, Ordering::SeqCst);
        let relay = CompletionRelay::new(sink.clone(), &RelayConfig::default());

        let first = relay.record_at("t1", 25, None, at(1)).await.unwrap();
        assert!(matches!(first, RunOutcome::Failed { retry_in: Some(_), .. }));
        assert!(relay.has_scheduled_retry());

        for _ in 0..3 {
            assert!(matches!(relay.flush().await, RunOutcome::Failed { dropped: 0, .. }));
        }
        let last = relay.flush().await;
        assert!(matches!(last, RunOutcome::Failed { dropped: 1, retry_in: None, .. }));
        assert!(relay.pending().is_empty());
        assert!(!relay.has_scheduled_retry());
        assert_eq!(sink.writes.load(Ordering::SeqCst), 0);
        assert_eq!(relay.stats().dropped, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_items_carry_incremented_retry_count() {
        let sink = Arc::new(ScriptedSink::default());
        sink.failures_left.store(1, Ordering::SeqCst);
        let relay = CompletionRelay::new(sink.clone(), &RelayConfig::default());

        let outcome = relay.record_at("t1", 25, None, at(2)).await.unwrap();
        let RunOutcome::Failed { retry_in: Some(delay), .. } = outcome else {
            panic!("expected a scheduled retry, got {outcome:?}");
        };
        assert!(delay >= Duration::from_millis(2_000));
        assert!(delay <= Duration::from_millis(2_250));
        assert_eq!(relay.pending()[0].retry_count, 1);

        assert!(matches!(relay.flush().await, RunOutcome::Delivered { written: 1, .. }));
        assert_eq!(sink.writes.load(Ordering::SeqCst), 1);
    }
}
