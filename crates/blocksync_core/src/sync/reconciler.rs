//! Remote reconciliation session per identity.
//!
//! # Responsibility
//! - Bootstrap the local replica against the partition's remote record.
//! - Push local deltas and pull foreign ones for the session's lifetime.
//! - Publish a coarse [`SyncStatus`] for the UI.
//!
//! # Invariants
//! - Only `Origin::Local` deltas are pushed; pushes keep production order.
//! - Records whose origin equals this replica's client id are ignored.
//! - An identity change discards the whole session before starting another;
//!   partitions are never merged.
//! - A discarded session lets its in-flight remote call finish, then exits
//!   without touching the shared status.

use super::identity::Identity;
use super::remote::{RemoteRecord, RemoteResult, RemoteStore};
use crate::backoff::Backoff;
use crate::document::{DocResult, DocumentStore, ListenerId, Origin};
use crate::model::now_epoch_ms;
use log::{debug, info, warn};
use std::fmt::{Display, Formatter};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Bootstrap attempts before a session gives up and goes offline.
pub const MAX_BOOTSTRAP_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    Offline,
    Syncing,
    Synced,
    Error,
}

impl Display for SyncStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Offline => "offline",
            Self::Syncing => "syncing",
            Self::Synced => "synced",
            Self::Error => "error",
        };
        f.write_str(label)
    }
}

/// Running counters, mainly for tests and the CLI status line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncActivity {
    pub bootstraps: u64,
    pub pushes: u64,
    pub pulls: u64,
    pub echoes_ignored: u64,
    pub failures: u64,
}

struct Session {
    partition_key: String,
    cancel: watch::Sender<bool>,
    _task: JoinHandle<()>,
}

impl Drop for Session {
    fn drop(&mut self) {
        self.cancel.send_replace(true);
    }
}

#[derive(Clone)]
struct SessionContext {
    store: DocumentStore,
    remote: Arc<dyn RemoteStore>,
    client_id: String,
    partition_key: String,
    backoff: Backoff,
    status: watch::Sender<SyncStatus>,
    activity: watch::Sender<SyncActivity>,
    cancelled: watch::Receiver<bool>,
}

pub struct RemoteReconciler {
    store: DocumentStore,
    remote: Option<Arc<dyn RemoteStore>>,
    client_id: String,
    backoff: Backoff,
    status: watch::Sender<SyncStatus>,
    activity: watch::Sender<SyncActivity>,
    session: Mutex<Option<Session>>,
}

impl RemoteReconciler {
    pub fn new(
        store: DocumentStore,
        remote: Option<Arc<dyn RemoteStore>>,
        client_id: impl Into<String>,
    ) -> Self {
        let (status, _) = watch::channel(SyncStatus::Offline);
        let (activity, _) = watch::channel(SyncActivity::default());
        Self {
            store,
            remote,
            client_id: client_id.into(),
            backoff: Backoff::from_millis(500, 8_000, 250),
            status,
            activity,
            session: Mutex::new(None),
        }
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn status(&self) -> SyncStatus {
        *self.status.borrow()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<SyncStatus> {
        self.status.subscribe()
    }

    pub fn activity(&self) -> SyncActivity {
        *self.activity.borrow()
    }

    pub fn subscribe_activity(&self) -> watch::Receiver<SyncActivity> {
        self.activity.subscribe()
    }

    /// Partition of the live session, if any.
    pub fn partition_key(&self) -> Option<String> {
        lock(&self.session)
            .as_ref()
            .map(|session| session.partition_key.clone())
    }

    /// Starts (or restarts) a session for `identity`.
    ///
    /// Without a configured remote the status stays `Offline`.
    pub fn start(&self, identity: &Identity) {
        let mut slot = lock(&self.session);
        // Dropping the old session signals it to wind down.
        slot.take();

        let Some(remote) = self.remote.as_ref() else {
            self.status.send_replace(SyncStatus::Offline);
            info!("event=remote_sync module=sync status=offline reason=configuration_absent");
            return;
        };

        let partition_key = identity.partition_key();
        let (cancel, cancelled) = watch::channel(false);
        info!(
            "event=remote_session module=sync status=start target={}",
            remote.target_id()
        );
        let context = SessionContext {
            store: self.store.clone(),
            remote: Arc::clone(remote),
            client_id: self.client_id.clone(),
            partition_key: partition_key.clone(),
            backoff: self.backoff,
            status: self.status.clone(),
            activity: self.activity.clone(),
            cancelled,
        };
        self.status.send_replace(SyncStatus::Syncing);
        *slot = Some(Session {
            partition_key,
            cancel,
            _task: tokio::spawn(run_session(context)),
        });
    }

    /// Discards the current session and bootstraps one for `identity`.
    pub fn set_identity(&self, identity: &Identity) {
        info!("event=identity_change module=sync status=start");
        self.start(identity);
    }

    pub fn stop(&self) {
        if lock(&self.session).take().is_some() {
            info!("event=remote_session module=sync status=stopped");
        }
    }
}

impl Drop for RemoteReconciler {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Unsubscribes the push listener when the session future is dropped.
struct ListenerGuard {
    store: DocumentStore,
    id: ListenerId,
}

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        self.store.unsubscribe(self.id);
    }
}

async fn run_session(ctx: SessionContext) {
    let mut cancelled = ctx.cancelled.clone();
    // Registered before bootstrap so edits made meanwhile are queued, not lost.
    let (local_tx, mut local_rx) = mpsc::unbounded_channel::<Arc<[u8]>>();
    let _listener = ListenerGuard {
        store: ctx.store.clone(),
        id: ctx.store.subscribe(Arc::new(move |delta| {
            if delta.origin == Origin::Local {
                let _ = local_tx.send(Arc::clone(&delta.update));
            }
        })),
    };

    let mut failures = 0;
    let mut remote_rx = loop {
        if is_cancelled(&ctx) {
            debug!("event=remote_session module=sync status=cancelled");
            return;
        }
        set_status(&ctx, SyncStatus::Syncing);
        match bootstrap(&ctx).await {
            Ok(rx) => {
                bump(&ctx, |activity| activity.bootstraps += 1);
                set_status(&ctx, SyncStatus::Synced);
                info!("event=remote_bootstrap module=sync status=ok attempts={}", failures + 1);
                break rx;
            }
            Err(err) => {
                failures += 1;
                bump(&ctx, |activity| activity.failures += 1);
                warn!(
                    "event=remote_bootstrap module=sync status=error attempt={} error={}",
                    failures, err
                );
                if failures >= MAX_BOOTSTRAP_ATTEMPTS {
                    set_status(&ctx, SyncStatus::Offline);
                    warn!("event=remote_session module=sync status=offline reason=bootstrap_exhausted");
                    return;
                }
                set_status(&ctx, SyncStatus::Error);
                tokio::select! {
                    _ = tokio::time::sleep(ctx.backoff.delay(failures - 1)) => {}
                    _ = cancelled.changed() => {}
                }
            }
        }
    };

    // Handlers run to completion; cancellation is only observed between them.
    loop {
        if is_cancelled(&ctx) {
            break;
        }
        tokio::select! {
            biased;
            _ = cancelled.changed() => continue,
            Some(update) = local_rx.recv() => push(&ctx, &update).await,
            Some(record) = remote_rx.recv() => pull(&ctx, &record),
            else => break,
        }
    }
    debug!("event=remote_session module=sync status=ended");
}

#[derive(Debug)]
enum SessionError {
    Remote(super::remote::RemoteError),
    Document(crate::document::DocumentError),
}

impl Display for SessionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Remote(err) => write!(f, "{err}"),
            Self::Document(err) => write!(f, "{err}"),
        }
    }
}

impl From<super::remote::RemoteError> for SessionError {
    fn from(value: super::remote::RemoteError) -> Self {
        Self::Remote(value)
    }
}

impl From<crate::document::DocumentError> for SessionError {
    fn from(value: crate::document::DocumentError) -> Self {
        Self::Document(value)
    }
}

/// Opens the remote watch, then aligns local and remote state.
///
/// The watch comes first so records written during bootstrap are queued.
async fn bootstrap(
    ctx: &SessionContext,
) -> Result<mpsc::UnboundedReceiver<RemoteRecord>, SessionError> {
    let watcher = ctx.remote.watch(&ctx.partition_key).await?;
    match ctx.remote.fetch(&ctx.partition_key).await? {
        None => {
            let snapshot = ctx.store.snapshot()?;
            publish(ctx, &snapshot, &snapshot).await?;
            debug!("event=remote_bootstrap module=sync status=published");
        }
        Some(record) => {
            let full_state = record.decode_full_state()?;
            ctx.store.apply_snapshot(&full_state, Origin::Remote)?;
            // Offline edits the remote has never seen are published once.
            if holds_unpublished_history(ctx, &full_state)? {
                let snapshot = ctx.store.snapshot()?;
                publish(ctx, &snapshot, &snapshot).await?;
                debug!("event=remote_bootstrap module=sync status=merged_and_published");
            }
        }
    }
    Ok(watcher)
}

/// Whether the local replica carries operations missing from `remote_state`.
fn holds_unpublished_history(ctx: &SessionContext, remote_state: &[u8]) -> DocResult<bool> {
    let scratch = DocumentStore::new();
    scratch.apply_snapshot(remote_state, Origin::Remote)?;
    let outcome = scratch.apply_snapshot(&ctx.store.snapshot()?, Origin::Remote)?;
    Ok(outcome.advanced)
}

async fn publish(ctx: &SessionContext, update: &[u8], full_state: &[u8]) -> RemoteResult<()> {
    let record = RemoteRecord::encode(update, full_state, &ctx.client_id, now_epoch_ms());
    ctx.remote.put(&ctx.partition_key, &record).await?;
    bump(ctx, |activity| activity.pushes += 1);
    Ok(())
}

async fn push(ctx: &SessionContext, update: &[u8]) {
    set_status(ctx, SyncStatus::Syncing);
    let result = match ctx.store.snapshot() {
        Ok(full_state) => publish(ctx, update, &full_state)
            .await
            .map_err(SessionError::from),
        Err(err) => Err(SessionError::from(err)),
    };
    match result {
        Ok(()) => {
            set_status(ctx, SyncStatus::Synced);
            debug!("event=remote_push module=sync status=ok bytes={}", update.len());
        }
        Err(err) => {
            bump(ctx, |activity| activity.failures += 1);
            set_status(ctx, SyncStatus::Error);
            warn!("event=remote_push module=sync status=error error={err}");
        }
    }
}

fn pull(ctx: &SessionContext, record: &RemoteRecord) {
    if record.origin == ctx.client_id {
        bump(ctx, |activity| activity.echoes_ignored += 1);
        debug!("event=remote_pull module=sync status=skipped reason=self_origin");
        return;
    }
    set_status(ctx, SyncStatus::Syncing);
    match apply_record(ctx, record) {
        Ok(()) => {
            bump(ctx, |activity| activity.pulls += 1);
            set_status(ctx, SyncStatus::Synced);
            debug!("event=remote_pull module=sync status=ok");
        }
        Err(err) => {
            bump(ctx, |activity| activity.failures += 1);
            set_status(ctx, SyncStatus::Error);
            warn!("event=remote_pull module=sync status=error error={err}");
        }
    }
}

fn apply_record(ctx: &SessionContext, record: &RemoteRecord) -> Result<(), SessionError> {
    let update = record.decode_update()?;
    let outcome = ctx.store.apply_delta(&update, Origin::Remote)?;
    if outcome.pending {
        // A record was missed; the full state closes the gap.
        let full_state = record.decode_full_state()?;
        ctx.store.apply_snapshot(&full_state, Origin::Remote)?;
    }
    Ok(())
}

fn is_cancelled(ctx: &SessionContext) -> bool {
    *ctx.cancelled.borrow()
}

fn set_status(ctx: &SessionContext, status: SyncStatus) {
    if is_cancelled(ctx) {
        return;
    }
    ctx.status.send_if_modified(|current| {
        if *current == status {
            return false;
        }
        *current = status;
        true
    });
}

fn bump(ctx: &SessionContext, edit: impl FnOnce(&mut SyncActivity)) {
    ctx.activity.send_modify(edit);
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::remote::InMemoryRemoteStore;

    #[tokio::test]
    async fn missing_remote_is_offline() {
        let reconciler = RemoteReconciler::new(DocumentStore::new(), None, "client-a");
        reconciler.start(&Identity::Anonymous);
        assert_eq!(reconciler.status(), SyncStatus::Offline);
        assert!(reconciler.partition_key().is_none());
    }

    #[tokio::test]
    async fn empty_partition_receives_initial_snapshot() {
        let remote = Arc::new(InMemoryRemoteStore::new());
        let store = DocumentStore::new();
        store.create_task("seed").unwrap();
        let reconciler = RemoteReconciler::new(store, Some(remote.clone()), "client-a");

        reconciler.start(&Identity::Anonymous);
        let mut activity = reconciler.subscribe_activity();
        activity.wait_for(|seen| seen.bootstraps == 1).await.unwrap();

        let record = remote.record("anonymous").unwrap();
        assert_eq!(record.origin, "client-a");
        assert_eq!(record.update, record.full_state);
        assert_eq!(reconciler.status(), SyncStatus::Synced);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_bootstrap_goes_offline() {
        let remote = Arc::new(InMemoryRemoteStore::new());
        remote.fail_next_fetches(MAX_BOOTSTRAP_ATTEMPTS as usize);
        let reconciler =
            RemoteReconciler::new(DocumentStore::new(), Some(remote.clone()), "client-a");

        reconciler.start(&Identity::Anonymous);
        let mut activity = reconciler.subscribe_activity();
        activity
            .wait_for(|seen| seen.failures == u64::from(MAX_BOOTSTRAP_ATTEMPTS))
            .await
            .unwrap();
        let mut status = reconciler.subscribe_status();
        status
            .wait_for(|status| *status == SyncStatus::Offline)
            .await
            .unwrap();
        assert_eq!(remote.put_count(), 0);
    }
}
