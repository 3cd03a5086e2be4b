//! Composition root.
//!
//! # Responsibility
//! - Build every long-lived component once and hand out shared handles.
//! - Gate store access on durable-log replay.
//! - Start the importer's background polling; `shutdown` stops it.
//!
//! # Invariants
//! - The store is returned to callers only after `LocalPersistence::load`.
//! - The reconciler is restarted, never merged, on identity change.

use crate::config::{Config, RemoteBackend, RemoteConfig};
use crate::db::{lock_conn, open_or_fallback, share, DbError, SharedConnection};
use crate::document::DocumentStore;
use crate::exchange::importer::{ExternalTaskImporter, JsonFileTaskSource, MetaTaskCache};
use crate::exchange::notice::{LogNotifier, Notifier};
use crate::exchange::relay::{CompletionRelay, JsonFileCompletionSink};
use crate::exchange::ExchangePaths;
use crate::repo::meta_repo::SqliteMetaRepository;
use crate::repo::RepoError;
use crate::sync::{
    load_or_create_client_id, Identity, LocalDirRemoteStore, LocalPersistence, RemoteReconciler,
    RemoteStore,
};
use log::{info, warn};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use std::sync::Arc;

pub const DB_FILE_NAME: &str = "blocksync.db";

#[derive(Debug)]
pub enum ContextError {
    Db(DbError),
    Repo(RepoError),
}

impl Display for ContextError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::Repo(err) => write!(f, "{err}"),
        }
    }
}

impl Error for ContextError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::Repo(err) => Some(err),
        }
    }
}

impl From<DbError> for ContextError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<RepoError> for ContextError {
    fn from(value: RepoError) -> Self {
        Self::Repo(value)
    }
}

/// Replaceable edges of the context.
pub struct Seams {
    pub remote: Option<Arc<dyn RemoteStore>>,
    pub notifier: Arc<dyn Notifier>,
}

impl Seams {
    pub fn from_config(config: &Config) -> Self {
        Self {
            remote: remote_from_config(&config.remote),
            notifier: Arc::new(LogNotifier),
        }
    }
}

/// Remote backend selected by configuration, if any.
pub fn remote_from_config(config: &RemoteConfig) -> Option<Arc<dyn RemoteStore>> {
    match (config.backend, config.path.as_ref()) {
        (RemoteBackend::None, _) => None,
        (RemoteBackend::LocalDir, Some(path)) => Some(Arc::new(LocalDirRemoteStore::new(
            path.clone(),
            config.watch_interval(),
        ))),
        (RemoteBackend::LocalDir, None) => {
            warn!("event=remote_config module=context status=error reason=missing_path");
            None
        }
    }
}

pub struct AppContext {
    config: Config,
    conn: SharedConnection,
    durable: bool,
    client_id: String,
    store: DocumentStore,
    persistence: LocalPersistence,
    reconciler: RemoteReconciler,
    relay: CompletionRelay,
    importer: ExternalTaskImporter,
}

impl AppContext {
    pub async fn start(config: Config, identity: Identity) -> Result<Self, ContextError> {
        let seams = Seams::from_config(&config);
        Self::start_with(config, identity, seams).await
    }

    /// Opens storage, replays the log, then starts the remote session.
    pub async fn start_with(
        config: Config,
        identity: Identity,
        seams: Seams,
    ) -> Result<Self, ContextError> {
        let db_path = config.data_dir().join(DB_FILE_NAME);
        let (conn, durable) = open_or_fallback(&db_path)?;
        let conn = share(conn);
        let client_id = {
            let guard = lock_conn(&conn);
            load_or_create_client_id(&SqliteMetaRepository::new(&guard))?
        };

        let store = DocumentStore::new();
        let persistence = LocalPersistence::new(Arc::clone(&conn), store.clone());
        persistence.load().await;

        let reconciler = RemoteReconciler::new(store.clone(), seams.remote, client_id.clone());
        reconciler.start(&identity);

        let paths = ExchangePaths::new(config.shared_dir());
        let relay = CompletionRelay::new(
            Arc::new(JsonFileCompletionSink::new(paths.completions_file())),
            &config.relay,
        );
        let importer = ExternalTaskImporter::new(
            Arc::new(JsonFileTaskSource::new(paths.tasks_file())),
            Arc::new(MetaTaskCache::new(Arc::clone(&conn))),
            seams.notifier,
            config.importer.clone(),
        );
        importer.start();

        info!(
            "event=context_start module=context status=ok durable={} sync={}",
            durable,
            reconciler.status()
        );
        Ok(Self {
            config,
            conn,
            durable,
            client_id,
            store,
            persistence,
            reconciler,
            relay,
            importer,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Whether the database lives on disk rather than in memory.
    pub fn is_durable(&self) -> bool {
        self.durable
    }

    pub fn db_path(&self) -> PathBuf {
        self.config.data_dir().join(DB_FILE_NAME)
    }

    pub fn connection(&self) -> &SharedConnection {
        &self.conn
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn store(&self) -> &DocumentStore {
        &self.store
    }

    pub fn persistence(&self) -> &LocalPersistence {
        &self.persistence
    }

    pub fn reconciler(&self) -> &RemoteReconciler {
        &self.reconciler
    }

    pub fn relay(&self) -> &CompletionRelay {
        &self.relay
    }

    pub fn importer(&self) -> &ExternalTaskImporter {
        &self.importer
    }

    pub fn set_identity(&self, identity: &Identity) {
        self.reconciler.set_identity(identity);
    }

    /// Stops background work after draining the relay and persistence writer.
    pub async fn shutdown(&self) {
        self.importer.stop();
        let outcome = self.relay.flush().await;
        self.persistence.settled().await;
        self.reconciler.stop();
        info!("event=context_shutdown module=context status=ok relay={outcome:?}");
    }
}
