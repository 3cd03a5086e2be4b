//! Append-only document update log.
//!
//! # Invariants
//! - Entries replay in `seq` order, which is append order.
//! - Compaction swaps the whole log for one snapshot atomically.

use super::{RepoError, RepoResult};
use rusqlite::{params, Connection};

/// Fixed name of the replicated document inside the log.
pub const DOCUMENT_NAME: &str = "blocksync-document";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogEntryKind {
    Update,
    Snapshot,
}

impl LogEntryKind {
    fn as_db(self) -> &'static str {
        match self {
            Self::Update => "update",
            Self::Snapshot => "snapshot",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value {
            "update" => Some(Self::Update),
            "snapshot" => Some(Self::Snapshot),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub seq: i64,
    pub kind: LogEntryKind,
    pub payload: Vec<u8>,
}

pub trait UpdateLogRepository {
    fn append(&self, doc_name: &str, kind: LogEntryKind, payload: &[u8]) -> RepoResult<i64>;
    fn entries(&self, doc_name: &str) -> RepoResult<Vec<LogEntry>>;
    fn replace_with_snapshot(&self, doc_name: &str, snapshot: &[u8]) -> RepoResult<()>;
    fn count(&self, doc_name: &str) -> RepoResult<u64>;
}

pub struct SqliteUpdateLog<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteUpdateLog<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }
}

impl UpdateLogRepository for SqliteUpdateLog<'_> {
    fn append(&self, doc_name: &str, kind: LogEntryKind, payload: &[u8]) -> RepoResult<i64> {
        self.conn.execute(
            "INSERT INTO doc_updates (doc_name, kind, payload) VALUES (?1, ?2, ?3);",
            params![doc_name, kind.as_db(), payload],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn entries(&self, doc_name: &str) -> RepoResult<Vec<LogEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT seq, kind, payload
             FROM doc_updates
             WHERE doc_name = ?1
             ORDER BY seq ASC;",
        )?;
        let mut rows = stmt.query([doc_name])?;
        let mut entries = Vec::new();
        while let Some(row) = rows.next()? {
            let kind_text: String = row.get("kind")?;
            let kind = LogEntryKind::parse(&kind_text).ok_or_else(|| {
                RepoError::InvalidData(format!("invalid kind `{kind_text}` in doc_updates.kind"))
            })?;
            entries.push(LogEntry {
                seq: row.get("seq")?,
                kind,
                payload: row.get("payload")?,
            });
        }
        Ok(entries)
    }

    fn replace_with_snapshot(&self, doc_name: &str, snapshot: &[u8]) -> RepoResult<()> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute("DELETE FROM doc_updates WHERE doc_name = ?1;", [doc_name])?;
        tx.execute(
            "INSERT INTO doc_updates (doc_name, kind, payload) VALUES (?1, ?2, ?3);",
            params![doc_name, LogEntryKind::Snapshot.as_db(), snapshot],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn count(&self, doc_name: &str) -> RepoResult<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM doc_updates WHERE doc_name = ?1;",
            [doc_name],
            |row| row.get(0),
        )?;
        u64::try_from(count)
            .map_err(|_| RepoError::InvalidData(format!("negative row count {count}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_db_in_memory;

    #[test]
    fn entries_replay_in_append_order_per_document() {
        let conn = open_db_in_memory().unwrap();
        let log = SqliteUpdateLog::new(&conn);

        log.append(DOCUMENT_NAME, LogEntryKind::Update, b"one").unwrap();
        log.append("other", LogEntryKind::Update, b"foreign").unwrap();
        log.append(DOCUMENT_NAME, LogEntryKind::Update, b"two").unwrap();

        let payloads: Vec<_> = log
            .entries(DOCUMENT_NAME)
            .unwrap()
            .into_iter()
            .map(|entry| entry.payload)
            .collect();
        assert_eq!(payloads, vec![b"one".to_vec(), b"two".to_vec()]);
    }

    #[test]
    fn compaction_leaves_single_snapshot() {
        let conn = open_db_in_memory().unwrap();
        let log = SqliteUpdateLog::new(&conn);
        log.append(DOCUMENT_NAME, LogEntryKind::Update, b"one").unwrap();
        log.append(DOCUMENT_NAME, LogEntryKind::Update, b"two").unwrap();

        log.replace_with_snapshot(DOCUMENT_NAME, b"all").unwrap();

        let entries = log.entries(DOCUMENT_NAME).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].kind, LogEntryKind::Snapshot);
        assert_eq!(entries[0].payload, b"all".to_vec());
        assert_eq!(log.count(DOCUMENT_NAME).unwrap(), 1);
    }
}
