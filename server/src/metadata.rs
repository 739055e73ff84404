//! SQLite record of which filenames are currently uploaded.

use std::path::Path;

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, Row};
use serde::Serialize;
use thiserror::Error;
use tracing::info;

/// Longest filename the table accepts.
pub const MAX_FILENAME_LEN: usize = 128;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("metadata store: {0}")]
    Sql(#[from] rusqlite::Error),
    #[error("metadata store: cannot create {path}: {source}")]
    CreateDir {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// One row of the `uploaded_file` table.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct UploadedFile {
    pub id: i64,
    pub filename: String,
    pub upload_date: DateTime<Utc>,
}

impl UploadedFile {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let raw: String = row.get(2)?;
        let naive = NaiveDateTime::parse_from_str(&raw, TIMESTAMP_FORMAT)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(2, Type::Text, Box::new(e)))?;
        Ok(UploadedFile {
            id: row.get(0)?,
            filename: row.get(1)?,
            upload_date: Utc.from_utc_datetime(&naive),
        })
    }
}

pub struct MetadataStore {
    conn: Connection,
}

impl MetadataStore {
    /// Open (or create) the database file and make sure the table exists.
    pub fn open(path: &Path) -> Result<Self, MetadataError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| MetadataError::CreateDir {
                path: parent.display().to_string(),
                source,
            })?;
        }
        let conn = Connection::open(path)?;
        info!("metadata store opened path={}", path.display());
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, MetadataError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, MetadataError> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS uploaded_file (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                filename    VARCHAR(128) NOT NULL UNIQUE,
                upload_date DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        )?;
        Ok(Self { conn })
    }

    /// Replace every row with one row per name in `filenames`.
    ///
    /// Delete and inserts share one transaction; repeated names collapse to a
    /// single row.
    pub fn replace_all<S: AsRef<str>>(
        &mut self,
        filenames: &[S],
    ) -> Result<Vec<UploadedFile>, MetadataError> {
        let tx = self.conn.transaction()?;
        let cleared = tx.execute("DELETE FROM uploaded_file", [])?;
        {
            let mut insert =
                tx.prepare("INSERT OR IGNORE INTO uploaded_file (filename) VALUES (?1)")?;
            for name in filenames {
                insert.execute(params![name.as_ref()])?;
            }
        }
        tx.commit()?;
        info!(
            "metadata replaced cleared={} inserted={}",
            cleared,
            filenames.len()
        );
        self.list_all()
    }

    /// Delete the row for `filename`. Returns how many rows went away.
    pub fn remove_one(&self, filename: &str) -> Result<usize, MetadataError> {
        let removed = self
            .conn
            .execute("DELETE FROM uploaded_file WHERE filename = ?1", params![filename])?;
        Ok(removed)
    }

    pub fn list_all(&self) -> Result<Vec<UploadedFile>, MetadataError> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, filename, upload_date FROM uploaded_file ORDER BY id")?;
        let rows = stmt.query_map([], UploadedFile::from_row)?;
        let mut files = Vec::new();
        for file in rows {
            files.push(file?);
        }
        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(store: &MetadataStore) -> Vec<String> {
        store
            .list_all()
            .unwrap()
            .into_iter()
            .map(|f| f.filename)
            .collect()
    }

    #[test]
    fn test_replace_all_supersedes_previous_batch() {
        let mut store = MetadataStore::open_in_memory().unwrap();
        store.replace_all(&["old1.dcm", "old2.dcm", "old3.dcm"]).unwrap();
        let rows = store.replace_all(&["a.dcm", "b.dcm"]).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(names(&store), vec!["a.dcm", "b.dcm"]);
        let age = Utc::now() - rows[0].upload_date;
        assert!(age.num_seconds().abs() < 60);
    }

    #[test]
    fn test_replace_all_collapses_duplicates() {
        let mut store = MetadataStore::open_in_memory().unwrap();
        store.replace_all(&["a.dcm", "a.dcm", "b.dcm"]).unwrap();
        assert_eq!(names(&store), vec!["a.dcm", "b.dcm"]);
    }

    #[test]
    fn test_replace_all_with_empty_batch_clears() {
        let mut store = MetadataStore::open_in_memory().unwrap();
        store.replace_all(&["a.dcm"]).unwrap();
        store.replace_all::<&str>(&[]).unwrap();
        assert!(store.list_all().unwrap().is_empty());
    }

    #[test]
    fn test_remove_one() {
        let mut store = MetadataStore::open_in_memory().unwrap();
        store.replace_all(&["a.dcm", "b.dcm"]).unwrap();
        assert_eq!(store.remove_one("a.dcm").unwrap(), 1);
        assert_eq!(store.remove_one("missing.dcm").unwrap(), 0);
        assert_eq!(names(&store), vec!["b.dcm"]);
    }

    #[test]
    fn test_open_persists_between_handles() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("uploads.db");
        {
            let mut store = MetadataStore::open(&path).unwrap();
            store.replace_all(&["a.dcm"]).unwrap();
        }
        let store = MetadataStore::open(&path).unwrap();
        assert_eq!(names(&store), vec!["a.dcm"]);
    }
}
