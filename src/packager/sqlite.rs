use anyhow::{Context, Result};
use rusqlite::{Connection, Params};
use std::path::{Path, PathBuf};

/// Number of inserts grouped into one transaction.
const COMMIT_EVERY: usize = 256;

/// A SQLite database receiving a stream of inserts.
///
/// Inserts are batched into transactions of [`COMMIT_EVERY`] rows. Whatever
/// is still pending is committed by [`commit`](Self::commit) or, as a last
/// resort, when the store is dropped.
pub(crate) struct SqliteStore {
    conn: Connection,
    path: PathBuf,
    pending: usize,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed opening database {}", path.display()))?;

        Ok(Self {
            conn,
            path: path.to_owned(),
            pending: 0,
        })
    }

    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        self.conn
            .execute_batch(sql)
            .with_context(|| format!("failed updating schema of {}", self.path.display()))
    }

    /// Runs `sql` inside the current batch, returning the number of changed rows.
    pub fn insert<P: Params>(&mut self, sql: &str, params: P) -> Result<usize> {
        // a failed statement may have rolled the whole batch back
        if self.conn.is_autocommit() {
            self.conn
                .execute_batch("BEGIN")
                .context("failed starting transaction")?;
            self.pending = 0;
        }

        let changed = self
            .conn
            .prepare_cached(sql)
            .and_then(|mut stmt| stmt.execute(params))
            .with_context(|| format!("failed writing to {}", self.path.display()))?;

        self.pending += 1;
        if self.pending >= COMMIT_EVERY {
            self.commit()?;
        }

        Ok(changed)
    }

    /// Commits the current batch, if any.
    ///
    /// The transaction is committed even if every insert in it failed, so the
    /// connection is back in autocommit mode afterwards.
    pub fn commit(&mut self) -> Result<()> {
        if !self.conn.is_autocommit() {
            self.conn
                .execute_batch("COMMIT")
                .with_context(|| format!("failed committing to {}", self.path.display()))?;
            log::trace!("committed {} rows to {}", self.pending, self.path.display());
            self.pending = 0;
        }

        Ok(())
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }
}

impl Drop for SqliteStore {
    fn drop(&mut self) {
        if let Err(e) = self.commit() {
            log::error!("{:#}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::params;

    fn count(path: &Path) -> i64 {
        Connection::open(path)
            .unwrap()
            .query_row("SELECT COUNT(*) FROM t", [], |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn commits_in_batches() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("batch.db");
        let mut store = SqliteStore::open(&path).unwrap();
        store.execute_batch("CREATE TABLE t (v int)").unwrap();

        for v in 0..COMMIT_EVERY + 3 {
            store.insert("INSERT INTO t (v) VALUES (?1)", params![v as i64]).unwrap();
        }

        // a full batch is visible to other connections, the rest is pending
        assert_eq!(count(&path), COMMIT_EVERY as i64);
        store.commit().unwrap();
        assert_eq!(count(&path), COMMIT_EVERY as i64 + 3);
    }

    #[test]
    fn recovers_from_failed_inserts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("check.db");
        let mut store = SqliteStore::open(&path).unwrap();
        store.execute_batch("CREATE TABLE t (v int CHECK (v >= 0))").unwrap();

        let sql = "INSERT INTO t (v) VALUES (?1)";
        assert!(store.insert(sql, params![-1]).is_err());
        store.insert(sql, params![1]).unwrap();
        store.commit().unwrap();
        assert!(store.conn().is_autocommit());

        store.execute_batch("CREATE TABLE meta (k text)").unwrap();
        store.conn().execute("INSERT INTO meta (k) VALUES ('x')", []).unwrap();
        drop(store);

        assert_eq!(count(&path), 1);
        let meta: i64 = Connection::open(&path)
            .unwrap()
            .query_row("SELECT COUNT(*) FROM meta", [], |row| row.get(0))
            .unwrap();
        assert_eq!(meta, 1);
    }

    #[test]
    fn failed_first_insert_still_commits() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("first.db");
        let mut store = SqliteStore::open(&path).unwrap();
        store.execute_batch("CREATE TABLE t (v int CHECK (v >= 0))").unwrap();

        assert!(store.insert("INSERT INTO t (v) VALUES (?1)", params![-1]).is_err());
        store.commit().unwrap();

        assert!(store.conn().is_autocommit());
        assert_eq!(count(&path), 0);
    }

    #[test]
    fn commits_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("drop.db");

        {
            let mut store = SqliteStore::open(&path).unwrap();
            store.execute_batch("CREATE TABLE t (v int)").unwrap();
            store.insert("INSERT INTO t (v) VALUES (?1)", params![1]).unwrap();
        }

        assert_eq!(count(&path), 1);
    }
}
