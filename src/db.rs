use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Metadata recorded for a file written through the shell
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: i64,
    /// Name as the user typed it
    pub filename: String,
    /// RFC 3339 creation timestamp
    pub created_at: String,
    pub size: u64,
    /// Resolved absolute location inside the sandbox
    pub location: String,
    /// SHA-256 of the content, hex encoded
    pub hash: String,
    pub owner: String,
}

/// Fields supplied by the caller when recording a new file
#[derive(Debug, Clone)]
pub struct NewFileRecord<'a> {
    pub filename: &'a str,
    pub location: &'a str,
    pub owner: &'a str,
    pub content: &'a [u8],
}

pub struct MetadataDb {
    conn: Connection,
}

impl MetadataDb {
    /// Create a new in-memory database
    pub fn new_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .context("Failed to create in-memory database")?;
        let db = Self { conn };
        db.init_schema()?;
        Ok(db)
    }

    /// Open or create a database file
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)
            .context(format!("Failed to open database at {}", path))?;
        let db = Self { conn };
        db.init_schema()?;
        Ok(db)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn
            .execute_batch(
                r#"
            CREATE TABLE IF NOT EXISTS files (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                filename TEXT NOT NULL,
                created_at TEXT NOT NULL,
                size INTEGER NOT NULL,
                location TEXT NOT NULL,
                hash TEXT NOT NULL,
                owner TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_files_owner ON files(owner);
            "#,
            )
            .context("Failed to initialize database schema")?;
        Ok(())
    }

    /// Insert a file record and return its id.
    /// All values are bound as parameters, never spliced into the SQL.
    pub fn record_file(&self, file: &NewFileRecord<'_>) -> Result<i64> {
        self.conn
            .execute(
                "INSERT INTO files (filename, created_at, size, location, hash, owner) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    file.filename,
                    Utc::now().to_rfc3339(),
                    file.content.len() as i64,
                    file.location,
                    content_hash(file.content),
                    file.owner
                ],
            )
            .context(format!("Failed to record file: {}", file.filename))?;
        Ok(self.conn.last_insert_rowid())
    }

    /// All records owned by `owner`, oldest first
    pub fn files_by_owner(&self, owner: &str) -> Result<Vec<FileRecord>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, filename, created_at, size, location, hash, owner FROM files WHERE owner = ?1 ORDER BY id")
            .context("Failed to prepare statement")?;

        let files = stmt
            .query_map(params![owner], row_to_record)
            .context("Failed to query files")?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to collect files")?;

        Ok(files)
    }

    /// Point records for a moved file at its new location and name
    pub fn relocate(&self, from: &str, to: &str, filename: &str) -> Result<usize> {
        self.conn
            .execute(
                "UPDATE files SET location = ?1, filename = ?2 WHERE location = ?3",
                params![to, filename, from],
            )
            .context(format!("Failed to relocate records for {}", from))
    }

    /// Drop every record for a deleted file; returns how many were removed
    pub fn forget_location(&self, location: &str) -> Result<usize> {
        self.conn
            .execute("DELETE FROM files WHERE location = ?1", params![location])
            .context(format!("Failed to delete records for {}", location))
    }
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<FileRecord> {
    let size: i64 = row.get(3)?;
    Ok(FileRecord {
        id: row.get(0)?,
        filename: row.get(1)?,
        created_at: row.get(2)?,
        size: size as u64,
        location: row.get(4)?,
        hash: row.get(5)?,
        owner: row.get(6)?,
    })
}

/// SHA-256 of `content`, lowercase hex
pub fn content_hash(content: &[u8]) -> String {
    hex::encode(Sha256::digest(content))
}
