//! Local key-value metadata (client id, importer cache).

use super::RepoResult;
use rusqlite::{params, Connection, OptionalExtension};

pub const CLIENT_ID_KEY: &str = "client_id";
pub const EXTERNAL_TASKS_CACHE_KEY: &str = "external_tasks_cache";

pub trait MetaRepository {
    fn get(&self, key: &str) -> RepoResult<Option<String>>;
    fn set(&self, key: &str, value: &str) -> RepoResult<()>;
}

pub struct SqliteMetaRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteMetaRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }
}

impl MetaRepository for SqliteMetaRepository<'_> {
    fn get(&self, key: &str) -> RepoResult<Option<String>> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM local_meta WHERE key = ?1;",
                [key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set(&self, key: &str, value: &str) -> RepoResult<()> {
        self.conn.execute(
            "INSERT INTO local_meta (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = (CAST(strftime('%s', 'now') AS INTEGER) * 1000);",
            params![key, value],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_db_in_memory;

    #[test]
    fn set_overwrites_existing_value() {
        let conn = open_db_in_memory().unwrap();
        let repo = SqliteMetaRepository::new(&conn);

        assert_eq!(repo.get(CLIENT_ID_KEY).unwrap(), None);
        repo.set(CLIENT_ID_KEY, "a").unwrap();
        repo.set(CLIENT_ID_KEY, "b").unwrap();
        assert_eq!(repo.get(CLIENT_ID_KEY).unwrap().as_deref(), Some("b"));
    }
}
