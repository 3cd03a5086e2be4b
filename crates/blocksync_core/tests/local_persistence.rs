use blocksync_core::db::{lock_conn, open_db, share};
use blocksync_core::sync::LocalPersistence;
use blocksync_core::{BlockDraft, BlockMeta, DocumentStore};
use chrono::NaiveDate;
use std::sync::Arc;

fn draft() -> BlockDraft {
    BlockDraft {
        date: NaiveDate::from_ymd_opt(2026, 3, 2).unwrap(),
        started_at: 60_000,
        task_id: None,
        meta: BlockMeta::default(),
        notes: Some("deep work".to_string()),
    }
}

#[tokio::test]
async fn reopened_database_replays_every_mutation_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("blocksync.db");

    let block_id = {
        let conn = share(open_db(&path).unwrap());
        let store = DocumentStore::new();
        let persistence = LocalPersistence::new(conn, store.clone());
        persistence.load().await;
        assert!(store.is_loaded());

        let task = store.create_task("Write report").unwrap();
        store.add_subtask(&task.id, "outline").unwrap();
        let block = store.create_block(draft()).unwrap();
        store.complete_block(&block.id, 120_000).unwrap();
        store.set_task_note("Write report", "due friday").unwrap();
        persistence.settled().await;

        let stats = persistence.stats();
        assert_eq!(stats.written, 5);
        assert_eq!(stats.failed, 0);
        block.id
    };

    let conn = share(open_db(&path).unwrap());
    let store = DocumentStore::new();
    assert!(!store.is_loaded());
    let persistence = LocalPersistence::new(conn, store.clone());
    let report = persistence.load().await;

    assert_eq!(report.applied, 5);
    assert!(store.is_loaded());
    let task = &store.tasks()[0];
    assert_eq!(task.subtasks.len(), 1);
    assert_eq!(store.get_block(&block_id).unwrap().completed_at, Some(120_000));
    assert_eq!(store.task_note("Write report").as_deref(), Some("due friday"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn compaction_racing_writes_loses_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("blocksync.db");
    let conn = share(open_db(&path).unwrap());
    let store = DocumentStore::new();
    let persistence = LocalPersistence::new(Arc::clone(&conn), store.clone());
    persistence.load().await;

    let writer_store = store.clone();
    let writer = std::thread::spawn(move || {
        for index in 0..200 {
            writer_store.create_task(format!("task {index}")).unwrap();
        }
    });
    while !writer.is_finished() {
        persistence.compact().await.unwrap();
        tokio::task::yield_now().await;
    }
    writer.join().unwrap();
    persistence.compact().await.unwrap();
    persistence.settled().await;
    drop(persistence);

    let reloaded = DocumentStore::new();
    LocalPersistence::new(conn, reloaded.clone()).load().await;
    assert_eq!(reloaded.tasks().len(), 200);
}

#[tokio::test]
async fn compaction_keeps_state_and_shrinks_log() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("blocksync.db");
    let conn = share(open_db(&path).unwrap());
    let store = DocumentStore::new();
    let persistence = LocalPersistence::new(Arc::clone(&conn), store.clone());
    persistence.load().await;

    for index in 0..10 {
        store.create_task(format!("task {index}")).unwrap();
    }
    let before = persistence.compact().await.unwrap();
    assert_eq!(before, 10);
    assert_eq!(persistence.log_len().unwrap(), 1);

    store.create_task("after compaction").unwrap();
    persistence.settled().await;
    assert_eq!(persistence.log_len().unwrap(), 2);
    drop(persistence);

    let reloaded = DocumentStore::new();
    LocalPersistence::new(conn, reloaded.clone()).load().await;
    assert_eq!(reloaded.tasks().len(), 11);
}

#[tokio::test]
async fn write_failures_are_counted_not_raised() {
    let dir = tempfile::tempdir().unwrap();
    let conn = share(open_db(dir.path().join("blocksync.db")).unwrap());
    let store = DocumentStore::new();
    let persistence = LocalPersistence::new(Arc::clone(&conn), store.clone());
    persistence.load().await;

    lock_conn(&conn)
        .execute_batch("DROP TABLE doc_updates;")
        .unwrap();
    store.create_task("lost on disk, kept in memory").unwrap();
    persistence.settled().await;

    let stats = persistence.stats();
    assert_eq!(stats.captured, 1);
    assert_eq!(stats.failed, 1);
    assert_eq!(store.tasks().len(), 1);
}

#[tokio::test]
async fn unreadable_log_loads_empty_document() {
    let dir = tempfile::tempdir().unwrap();
    let conn = share(open_db(dir.path().join("blocksync.db")).unwrap());
    lock_conn(&conn)
        .execute_batch("DROP TABLE doc_updates;")
        .unwrap();

    let store = DocumentStore::new();
    let report = LocalPersistence::new(conn, store.clone()).load().await;

    assert_eq!(report.applied, 0);
    assert!(store.is_loaded());
    assert!(store.tasks().is_empty());
}
