//! Inbound task list poller.
//!
//! # Responsibility
//! - Poll `tasks.json` and keep the last good list in memory and in the
//!   local cache.
//! - Turn read and parse failures into a status plus rate-limited notices.
//!
//! # Invariants
//! - A failed poll never replaces the last good list.
//! - Malformed array elements are skipped; a non-array document is an error.

use super::notice::{Notice, NoticeGate, Notifier};
use super::{parse_array, read_optional, ErrorClass, ExchangeError, ExchangeResult};
use crate::backoff::Backoff;
use crate::config::ImporterConfig;
use crate::db::{lock_conn, SharedConnection};
use crate::model::external_task::ExternalTask;
use crate::repo::meta_repo::{MetaRepository, SqliteMetaRepository, EXTERNAL_TASKS_CACHE_KEY};
use crate::repo::{RepoError, RepoResult};
use log::{debug, info, warn};
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportStatus {
    Offline,
    Ready,
    Error,
}

impl Display for ImportStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Offline => "offline",
            Self::Ready => "ready",
            Self::Error => "error",
        })
    }
}

/// Where the external task list is read from.
pub trait TaskSource: Send + Sync {
    /// Raw document text; `None` when the source does not exist yet.
    fn read(&self) -> ExchangeResult<Option<String>>;
}

#[derive(Debug, Clone)]
pub struct JsonFileTaskSource {
    path: PathBuf,
}

impl JsonFileTaskSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TaskSource for JsonFileTaskSource {
    fn read(&self) -> ExchangeResult<Option<String>> {
        read_optional(&self.path)
    }
}

/// Last good task list kept across restarts.
pub trait TaskCache: Send + Sync {
    fn load(&self) -> RepoResult<Vec<ExternalTask>>;
    fn store(&self, tasks: &[ExternalTask]) -> RepoResult<()>;
}

/// Cache stored as JSON under one `local_meta` key.
pub struct MetaTaskCache {
    conn: SharedConnection,
}

impl MetaTaskCache {
    pub fn new(conn: SharedConnection) -> Self {
        Self { conn }
    }
}

impl TaskCache for MetaTaskCache {
    fn load(&self) -> RepoResult<Vec<ExternalTask>> {
        let conn = lock_conn(&self.conn);
        match SqliteMetaRepository::new(&conn).get(EXTERNAL_TASKS_CACHE_KEY)? {
            Some(json) => serde_json::from_str(&json)
                .map_err(|err| RepoError::InvalidData(format!("task cache: {err}"))),
            None => Ok(Vec::new()),
        }
    }

    fn store(&self, tasks: &[ExternalTask]) -> RepoResult<()> {
        let json = serde_json::to_string(tasks)
            .map_err(|err| RepoError::InvalidData(format!("task cache: {err}")))?;
        let conn = lock_conn(&self.conn);
        SqliteMetaRepository::new(&conn).set(EXTERNAL_TASKS_CACHE_KEY, &json)
    }
}

struct ImporterInner {
    source: Arc<dyn TaskSource>,
    cache: Arc<dyn TaskCache>,
    notifier: Arc<dyn Notifier>,
    config: ImporterConfig,
    tasks: Mutex<Vec<ExternalTask>>,
    status: watch::Sender<ImportStatus>,
    consecutive_errors: AtomicU32,
    gate: Mutex<NoticeGate>,
    poller: Mutex<Option<JoinHandle<()>>>,
}

#[derive(Clone)]
pub struct ExternalTaskImporter {
    inner: Arc<ImporterInner>,
}

impl ExternalTaskImporter {
    /// Builds the importer and shows the cached list right away.
    pub fn new(
        source: Arc<dyn TaskSource>,
        cache: Arc<dyn TaskCache>,
        notifier: Arc<dyn Notifier>,
        config: ImporterConfig,
    ) -> Self {
        let cached = cache.load().unwrap_or_else(|err| {
            warn!("event=importer_cache_load module=exchange status=error error={err}");
            Vec::new()
        });
        let (status, _) = watch::channel(ImportStatus::Offline);
        Self {
            inner: Arc::new(ImporterInner {
                source,
                cache,
                notifier,
                gate: Mutex::new(NoticeGate::new(config.notice_repeat_limit)),
                config,
                tasks: Mutex::new(cached),
                status,
                consecutive_errors: AtomicU32::new(0),
                poller: Mutex::new(None),
            }),
        }
    }

    pub fn tasks(&self) -> Vec<ExternalTask> {
        lock(&self.inner.tasks).clone()
    }

    pub fn status(&self) -> ImportStatus {
        *self.inner.status.borrow()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<ImportStatus> {
        self.inner.status.subscribe()
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.inner.consecutive_errors.load(Ordering::SeqCst)
    }

    /// Starts periodic polling; the first poll runs immediately.
    pub fn start(&self) {
        let mut poller = lock(&self.inner.poller);
        if poller.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }
        let importer = self.clone();
        let interval = self.inner.config.poll_interval();
        *poller = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                importer.poll_once().await;
            }
        }));
        info!(
            "event=importer_start module=exchange status=ok interval_ms={}",
            interval.as_millis()
        );
    }

    pub fn stop(&self) {
        if let Some(task) = lock(&self.inner.poller).take() {
            task.abort();
            info!("event=importer_stop module=exchange status=ok");
        }
    }

    /// Runs one poll and returns the resulting status.
    pub async fn poll_once(&self) -> ImportStatus {
        match self.read_with_retry().await {
            Ok(None) => {
                debug!("event=importer_poll module=exchange status=offline");
                self.set_status(ImportStatus::Offline)
            }
            Ok(Some(text)) => match parse_tasks(&text) {
                Ok(tasks) => self.accept(tasks),
                Err(err) => self.reject(err),
            },
            Err(err) => self.reject(err),
        }
    }

    async fn read_with_retry(&self) -> ExchangeResult<Option<String>> {
        let attempts = self.inner.config.read_attempts.max(1);
        let backoff = Backoff::new(
            Duration::from_millis(self.inner.config.read_backoff_ms),
            self.inner.config.poll_interval(),
            Duration::ZERO,
        );
        let mut attempt = 0;
        loop {
            let source = Arc::clone(&self.inner.source);
            let result = tokio::task::spawn_blocking(move || source.read())
                .await
                .unwrap_or_else(|err| Err(ExchangeError::Io(std::io::Error::other(err.to_string()))));
            match result {
                Err(err) if err.is_transient() && attempt + 1 < attempts => {
                    debug!(
                        "event=importer_read module=exchange status=retry attempt={} error={}",
                        attempt + 1,
                        err
                    );
                    tokio::time::sleep(backoff.delay(attempt)).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    fn accept(&self, tasks: Vec<ExternalTask>) -> ImportStatus {
        let count = tasks.len();
        if let Err(err) = self.inner.cache.store(&tasks) {
            warn!("event=importer_cache_store module=exchange status=error error={err}");
        }
        *lock(&self.inner.tasks) = tasks;
        self.inner.consecutive_errors.store(0, Ordering::SeqCst);
        lock(&self.inner.gate).reset();
        debug!("event=importer_poll module=exchange status=ok tasks={count}");
        self.set_status(ImportStatus::Ready)
    }

    fn reject(&self, err: ExchangeError) -> ImportStatus {
        let streak = self.inner.consecutive_errors.fetch_add(1, Ordering::SeqCst) + 1;
        let notice = Notice::new(err.class(), notice_message(&err));
        warn!(
            "event=importer_poll module=exchange status=error class={} consecutive={} error={}",
            err.class().as_str(),
            streak,
            err
        );
        if lock(&self.inner.gate).admit(&notice) {
            self.inner.notifier.notify(&notice);
        }
        self.set_status(ImportStatus::Error)
    }

    fn set_status(&self, status: ImportStatus) -> ImportStatus {
        self.inner.status.send_if_modified(|current| {
            if *current == status {
                return false;
            }
            *current = status;
            true
        });
        status
    }
}

fn notice_message(err: &ExchangeError) -> String {
    match err.class() {
        ErrorClass::Format => format!("Task list could not be read: {err}"),
        ErrorClass::TransientIo => "Task list is busy; will try again".to_string(),
        ErrorClass::PermanentIo | ErrorClass::ConfigurationAbsent => {
            format!("Task list is unavailable: {err}")
        }
    }
}

/// Parses the task document, skipping elements that do not decode.
pub fn parse_tasks(text: &str) -> ExchangeResult<Vec<ExternalTask>> {
    let items = parse_array(text)?;
    let total = items.len();
    let tasks: Vec<ExternalTask> = items
        .into_iter()
        .enumerate()
        .filter_map(|(index, item)| match serde_json::from_value(item) {
            Ok(task) => Some(task),
            Err(err) => {
                warn!(
                    "event=importer_parse module=exchange status=skipped index={index} error={err}"
                );
                None
            }
        })
        .collect();
    if tasks.len() < total {
        debug!(
            "event=importer_parse module=exchange status=partial kept={} total={}",
            tasks.len(),
            total
        );
    }
    Ok(tasks)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bad_elements_are_skipped() {
        let tasks = parse_tasks(
            r#"[
                {"id": "1", "content": "ok", "status": "todo", "value": 3, "time": 1},
                {"id": 2},
                {"id": "3", "content": "also ok", "status": "done", "value": 1, "time": 2, "tags": ["x"]}
            ]"#,
        )
        .unwrap();
        let ids: Vec<&str> = tasks.iter().map(|task| task.id.as_str()).collect();
        assert_eq!(ids, ["1", "3"]);
        assert_eq!(tasks[1].tags.as_deref(), Some(&["x".to_string()][..]));
    }

    #[test]
    fn object_document_is_a_format_error() {
        let err = parse_tasks(r#"{"id": "1"}"#).unwrap_err();
        assert_eq!(err.class(), ErrorClass::Format);
    }

    #[test]
    fn meta_cache_round_trips() {
        let conn = crate::db::share(crate::db::open_db_in_memory().unwrap());
        let cache = MetaTaskCache::new(conn);
        assert!(cache.load().unwrap().is_empty());

        let tasks = parse_tasks(r#"[{"id":"1","content":"c","status":"todo","value":1,"time":1}]"#)
            .unwrap();
        cache.store(&tasks).unwrap();
        assert_eq!(cache.load().unwrap(), tasks);
    }
}
