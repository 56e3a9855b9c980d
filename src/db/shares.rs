//! Gallery sharing between users.

use anyhow::Result;
use rusqlite::params;

use super::Database;

/// A gallery shared with the caller
#[derive(Debug, Clone)]
pub struct Share {
    pub owner_id: i64,
    pub owner_email: String,
    pub owner_name: String,
}

impl Database {
    /// Make the owner's gallery visible to another user. Sharing twice
    /// is a no-op.
    pub fn create_share(&self, owner_id: i64, shared_with_id: i64) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR IGNORE INTO shares (owner_id, shared_with_id) VALUES (?, ?)",
            params![owner_id, shared_with_id],
        )?;
        Ok(())
    }

    /// Galleries that have been shared with this user.
    pub fn shares_for_user(&self, user_id: i64) -> Result<Vec<Share>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT s.owner_id, u.email, u.name
            FROM shares s
            JOIN users u ON u.id = s.owner_id
            WHERE s.shared_with_id = ?
            ORDER BY u.email
            "#,
        )?;
        let shares = stmt
            .query_map([user_id], |row| {
                Ok(Share {
                    owner_id: row.get(0)?,
                    owner_email: row.get(1)?,
                    owner_name: row.get(2)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(shares)
    }

    /// Whether the viewer may read the owner's gallery. A user always
    /// has access to their own.
    pub fn can_view_gallery(&self, owner_id: i64, viewer_id: i64) -> Result<bool> {
        if owner_id == viewer_id {
            return Ok(true);
        }
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM shares WHERE owner_id = ? AND shared_with_id = ?",
            params![owner_id, viewer_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// All storage keys of a user's images, for shared-gallery listings.
    pub fn all_image_keys(&self, user_id: i64) -> Result<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT storage_key FROM images WHERE user_id = ? ORDER BY uploaded_at, id",
        )?;
        let keys = stmt
            .query_map([user_id], |row| row.get(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn share_grants_visibility_one_way() {
        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();
        let alice = db.create_user("alice@example.com", "Alice", "h", "s").unwrap();
        let bob = db.create_user("bob@example.com", "Bob", "h", "s").unwrap();

        assert!(!db.can_view_gallery(alice, bob).unwrap());
        db.create_share(alice, bob).unwrap();
        db.create_share(alice, bob).unwrap(); // idempotent

        assert!(db.can_view_gallery(alice, bob).unwrap());
        assert!(!db.can_view_gallery(bob, alice).unwrap());
        assert!(db.can_view_gallery(alice, alice).unwrap());

        let shares = db.shares_for_user(bob).unwrap();
        assert_eq!(shares.len(), 1);
        assert_eq!(shares[0].owner_email, "alice@example.com");
    }
}
