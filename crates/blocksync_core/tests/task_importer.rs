use blocksync_core::config::ImporterConfig;
use blocksync_core::db::{open_db_in_memory, share, SharedConnection};
use blocksync_core::exchange::importer::{
    ExternalTaskImporter, ImportStatus, JsonFileTaskSource, MetaTaskCache, TaskSource,
};
use blocksync_core::exchange::notice::{Notice, Notifier};
use blocksync_core::exchange::{ErrorClass, ExchangeError, ExchangeResult, ExchangePaths};
use blocksync_core::model::external_task::sort_by_priority;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
struct RecordingNotifier {
    notices: Mutex<Vec<Notice>>,
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notice: &Notice) {
        self.notices.lock().unwrap().push(notice.clone());
    }
}

const TASKS: &str = r#"[
    {"id": "a", "content": "quick win", "status": "todo", "value": 4, "time": 1},
    {"id": "b", "content": "slow burn", "status": "todo", "value": 2, "time": 8},
    {"id": "c", "content": "free", "status": "done", "value": 1, "time": 0}
]"#;

fn importer_for(
    path: &std::path::Path,
    conn: SharedConnection,
    notifier: Arc<RecordingNotifier>,
) -> ExternalTaskImporter {
    ExternalTaskImporter::new(
        Arc::new(JsonFileTaskSource::new(path)),
        Arc::new(MetaTaskCache::new(conn)),
        notifier,
        ImporterConfig::default(),
    )
}

#[tokio::test]
async fn missing_file_is_offline_not_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let paths = ExchangePaths::new(dir.path().join("absent"));
    let notifier = Arc::new(RecordingNotifier::default());
    let importer = importer_for(
        &paths.tasks_file(),
        share(open_db_in_memory().unwrap()),
        notifier.clone(),
    );

    assert_eq!(importer.poll_once().await, ImportStatus::Offline);
    assert!(notifier.notices.lock().unwrap().is_empty());
    assert_eq!(importer.consecutive_errors(), 0);
}

#[tokio::test]
async fn successful_poll_is_cached_for_the_next_start() {
    let dir = tempfile::tempdir().unwrap();
    let paths = ExchangePaths::new(dir.path());
    std::fs::write(paths.tasks_file(), TASKS).unwrap();
    let conn = share(open_db_in_memory().unwrap());

    let importer = importer_for(
        &paths.tasks_file(),
        Arc::clone(&conn),
        Arc::new(RecordingNotifier::default()),
    );
    assert_eq!(importer.poll_once().await, ImportStatus::Ready);
    let ordered: Vec<String> = sort_by_priority(&importer.tasks())
        .into_iter()
        .map(|task| task.id)
        .collect();
    assert_eq!(ordered, ["c", "a", "b"]);

    std::fs::remove_file(paths.tasks_file()).unwrap();
    let restarted = importer_for(
        &paths.tasks_file(),
        conn,
        Arc::new(RecordingNotifier::default()),
    );
    assert_eq!(restarted.tasks().len(), 3);
    assert_eq!(restarted.poll_once().await, ImportStatus::Offline);
    assert_eq!(restarted.tasks().len(), 3);
}

#[tokio::test]
async fn format_errors_keep_last_good_list_and_mute_repeats() {
    let dir = tempfile::tempdir().unwrap();
    let paths = ExchangePaths::new(dir.path());
    std::fs::write(paths.tasks_file(), TASKS).unwrap();
    let notifier = Arc::new(RecordingNotifier::default());
    let importer = importer_for(
        &paths.tasks_file(),
        share(open_db_in_memory().unwrap()),
        notifier.clone(),
    );
    importer.poll_once().await;

    std::fs::write(paths.tasks_file(), r#"{"tasks": []}"#).unwrap();
    for _ in 0..5 {
        assert_eq!(importer.poll_once().await, ImportStatus::Error);
    }

    assert_eq!(importer.tasks().len(), 3);
    assert_eq!(importer.consecutive_errors(), 5);
    {
        let notices = notifier.notices.lock().unwrap();
        assert_eq!(notices.len(), 3);
        assert!(notices.iter().all(|notice| notice.class == ErrorClass::Format));
    }

    std::fs::write(paths.tasks_file(), TASKS).unwrap();
    assert_eq!(importer.poll_once().await, ImportStatus::Ready);
    assert_eq!(importer.consecutive_errors(), 0);

    std::fs::write(paths.tasks_file(), "[").unwrap();
    importer.poll_once().await;
    assert_eq!(notifier.notices.lock().unwrap().len(), 4);
}

/// Source that reports a busy file a fixed number of times.
struct BusySource {
    busy_reads: AtomicU32,
    reads: AtomicU32,
}

impl TaskSource for BusySource {
    fn read(&self) -> ExchangeResult<Option<String>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let busy = self
            .busy_reads
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if busy {
            return Err(ExchangeError::from_io(std::io::Error::other("file is locked")));
        }
        Ok(Some(TASKS.to_string()))
    }
}

#[tokio::test(start_paused = true)]
async fn transient_reads_are_retried_within_one_poll() {
    let source = Arc::new(BusySource {
        busy_reads: AtomicU32::new(2),
        reads: AtomicU32::new(0),
    });
    let notifier = Arc::new(RecordingNotifier::default());
    let importer = ExternalTaskImporter::new(
        source.clone(),
        Arc::new(MetaTaskCache::new(share(open_db_in_memory().unwrap()))),
        notifier.clone(),
        ImporterConfig::default(),
    );

    assert_eq!(importer.poll_once().await, ImportStatus::Ready);
    assert_eq!(source.reads.load(Ordering::SeqCst), 3);
    assert!(notifier.notices.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn exhausted_transient_reads_surface_as_error() {
    let source = Arc::new(BusySource {
        busy_reads: AtomicU32::new(u32::MAX),
        reads: AtomicU32::new(0),
    });
    let notifier = Arc::new(RecordingNotifier::default());
    let importer = ExternalTaskImporter::new(
        source.clone(),
        Arc::new(MetaTaskCache::new(share(open_db_in_memory().unwrap()))),
        notifier.clone(),
        ImporterConfig::default(),
    );

    assert_eq!(importer.poll_once().await, ImportStatus::Error);
    assert_eq!(source.reads.load(Ordering::SeqCst), 3);
    assert_eq!(
        notifier.notices.lock().unwrap()[0].class,
        ErrorClass::TransientIo
    );
}

#[tokio::test(start_paused = true)]
async fn background_polling_picks_up_new_file() {
    let dir = tempfile::tempdir().unwrap();
    let paths = ExchangePaths::new(dir.path());
    let importer = importer_for(
        &paths.tasks_file(),
        share(open_db_in_memory().unwrap()),
        Arc::new(RecordingNotifier::default()),
    );
    let mut status = importer.subscribe_status();

    importer.start();
    std::fs::write(paths.tasks_file(), TASKS).unwrap();
    tokio::time::timeout(
        Duration::from_secs(10),
        status.wait_for(|status| *status == ImportStatus::Ready),
    )
    .await
    .unwrap()
    .unwrap();
    importer.stop();

    assert_eq!(importer.tasks().len(), 3);
}

#[tokio::test]
async fn zero_poll_interval_still_polls() {
    let dir = tempfile::tempdir().unwrap();
    let paths = ExchangePaths::new(dir.path());
    std::fs::write(paths.tasks_file(), TASKS).unwrap();
    let importer = ExternalTaskImporter::new(
        Arc::new(JsonFileTaskSource::new(paths.tasks_file())),
        Arc::new(MetaTaskCache::new(share(open_db_in_memory().unwrap()))),
        Arc::new(RecordingNotifier::default()),
        ImporterConfig {
            poll_interval_ms: 0,
            ..ImporterConfig::default()
        },
    );
    let mut status = importer.subscribe_status();

    importer.start();
    tokio::time::timeout(
        Duration::from_secs(5),
        status.wait_for(|status| *status == ImportStatus::Ready),
    )
    .await
    .unwrap()
    .unwrap();
    importer.stop();

    assert_eq!(importer.tasks().len(), 3);
}
