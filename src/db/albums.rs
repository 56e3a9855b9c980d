//! Album records.

use anyhow::Result;
use rusqlite::params;

use super::Database;

/// A named collection of photos
#[derive(Debug, Clone)]
pub struct Album {
    pub id: i64,
    pub name: String,
    pub created_at: String,
}

impl Database {
    pub fn create_album(&self, user_id: i64, name: &str) -> Result<i64> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO albums (user_id, name) VALUES (?, ?)",
            params![user_id, name],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn list_albums(&self, user_id: i64) -> Result<Vec<Album>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, name, created_at FROM albums WHERE user_id = ? ORDER BY created_at, id",
        )?;
        let albums = stmt
            .query_map([user_id], |row| {
                Ok(Album {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    created_at: row.get(2)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(albums)
    }
}
