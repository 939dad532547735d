use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use oulipo_core::{
    DocumentHash, DocumentStore, Error, Identifier, SnapshotStore, StreamElement, StreamSnapshot,
};

fn storage<E: std::fmt::Display>(e: E) -> Error {
    Error::Storage(e.to_string())
}

/// Compiled document files keyed by their content hash.
pub struct SqliteDocumentStore {
    conn: Connection,
}

impl SqliteDocumentStore {
    pub fn new_in_memory() -> oulipo_core::Result<Self> {
        let conn = Connection::open_in_memory().map_err(storage)?;
        Self::with_connection(conn)
    }

    pub fn new(path: &str) -> oulipo_core::Result<Self> {
        let conn = Connection::open(path).map_err(storage)?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> oulipo_core::Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS documents (
                hash TEXT PRIMARY KEY,
                compiled TEXT NOT NULL
            );",
        )
        .map_err(storage)?;
        Ok(Self { conn })
    }
}

impl DocumentStore for SqliteDocumentStore {
    fn put(&mut self, compiled: &str) -> oulipo_core::Result<DocumentHash> {
        let hash = DocumentHash::of(compiled);
        self.conn
            .execute(
                "INSERT OR IGNORE INTO documents (hash, compiled) VALUES (?1, ?2)",
                params![hash.as_str(), compiled],
            )
            .map_err(storage)?;
        debug!(%hash, "stored document block");
        Ok(hash)
    }

    fn get(&self, hash: &DocumentHash) -> oulipo_core::Result<Option<String>> {
        self.conn
            .query_row(
                "SELECT compiled FROM documents WHERE hash = ?1",
                params![hash.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(storage)
    }
}

/// Stream snapshots as JSON element lists, one row per home document.
pub struct SqliteSnapshotStore {
    conn: Connection,
}

impl SqliteSnapshotStore {
    pub fn new_in_memory() -> oulipo_core::Result<Self> {
        let conn = Connection::open_in_memory().map_err(storage)?;
        Self::with_connection(conn)
    }

    pub fn new(path: &str) -> oulipo_core::Result<Self> {
        let conn = Connection::open(path).map_err(storage)?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> oulipo_core::Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS snapshots (
                home TEXT PRIMARY KEY,
                invariants TEXT NOT NULL,
                overlays TEXT NOT NULL
            );",
        )
        .map_err(storage)?;
        Ok(Self { conn })
    }
}

impl SnapshotStore for SqliteSnapshotStore {
    fn save(&mut self, home: &Identifier, snapshot: &StreamSnapshot) -> oulipo_core::Result<()> {
        let invariants = serde_json::to_string(&snapshot.variant).map_err(storage)?;
        let overlays = serde_json::to_string(&snapshot.overlay).map_err(storage)?;
        self.conn
            .execute(
                "INSERT INTO snapshots (home, invariants, overlays) VALUES (?1, ?2, ?3)
                 ON CONFLICT(home) DO UPDATE SET
                    invariants = excluded.invariants,
                    overlays = excluded.overlays",
                params![home.as_str(), invariants, overlays],
            )
            .map_err(storage)?;
        debug!(%home, "saved stream snapshot");
        Ok(())
    }

    fn load(&self, home: &Identifier) -> oulipo_core::Result<Option<StreamSnapshot>> {
        let row: Option<(String, String)> = self
            .conn
            .query_row(
                "SELECT invariants, overlays FROM snapshots WHERE home = ?1",
                params![home.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(storage)?;
        let Some((invariants, overlays)) = row else {
            return Ok(None);
        };
        let variant: Vec<StreamElement> = serde_json::from_str(&invariants).map_err(storage)?;
        let overlay: Vec<StreamElement> = serde_json::from_str(&overlays).map_err(storage)?;
        Ok(Some(StreamSnapshot { variant, overlay }))
    }
}
