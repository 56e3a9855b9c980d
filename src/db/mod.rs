mod schema;
pub mod albums;
pub mod faces;
pub mod images;
pub mod shares;
pub mod tags;
pub mod users;

use anyhow::{anyhow, Result};
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

pub use albums::Album;
pub use faces::{BoundingBox, FaceRecord, NewFaceRecord};
pub use images::ImageRecord;
pub use schema::SCHEMA;
pub use shares::Share;
pub use users::User;

/// SQLite-backed metadata store.
///
/// A single connection guarded by a mutex; every operation locks once and,
/// where multiple rows must land together, runs inside one transaction.
/// That gives the per-image write serialization the face store needs
/// without further coordination.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (and create if missing) the database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory database, used by tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn initialize(&self) -> Result<()> {
        self.lock()?.execute_batch(SCHEMA)?;
        Ok(())
    }

    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("database lock poisoned"))
    }
}
