//! User accounts and bearer-token sessions.

use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::params;

use super::Database;

/// A registered account
#[derive(Debug, Clone)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub name: String,
    pub password_hash: String,
    pub password_salt: String,
}

impl Database {
    /// Create a new user. Fails if the email is already registered.
    pub fn create_user(
        &self,
        email: &str,
        name: &str,
        password_hash: &str,
        password_salt: &str,
    ) -> Result<i64> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO users (email, name, password_hash, password_salt) VALUES (?, ?, ?, ?)",
            params![email, name, password_hash, password_salt],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn email_exists(&self, email: &str) -> Result<bool> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM users WHERE email = ?",
            [email],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let conn = self.lock()?;
        let result = conn.query_row(
            "SELECT id, email, name, password_hash, password_salt FROM users WHERE email = ?",
            [email],
            |row| {
                Ok(User {
                    id: row.get(0)?,
                    email: row.get(1)?,
                    name: row.get(2)?,
                    password_hash: row.get(3)?,
                    password_salt: row.get(4)?,
                })
            },
        );

        match result {
            Ok(user) => Ok(Some(user)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn get_user(&self, user_id: i64) -> Result<Option<User>> {
        let conn = self.lock()?;
        let result = conn.query_row(
            "SELECT id, email, name, password_hash, password_salt FROM users WHERE id = ?",
            [user_id],
            |row| {
                Ok(User {
                    id: row.get(0)?,
                    email: row.get(1)?,
                    name: row.get(2)?,
                    password_hash: row.get(3)?,
                    password_salt: row.get(4)?,
                })
            },
        );

        match result {
            Ok(user) => Ok(Some(user)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    // ========================================================================
    // Sessions
    // ========================================================================

    pub fn create_session(
        &self,
        token_hash: &str,
        user_id: i64,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO sessions (token_hash, user_id, expires_at) VALUES (?, ?, ?)",
            params![token_hash, user_id, expires_at.to_rfc3339()],
        )?;
        Ok(())
    }

    /// Resolve a token digest to its user, if the session is still valid.
    /// Expired sessions are removed as a side effect.
    pub fn session_user(&self, token_hash: &str, now: DateTime<Utc>) -> Result<Option<i64>> {
        let conn = self.lock()?;
        let result = conn.query_row(
            "SELECT user_id, expires_at FROM sessions WHERE token_hash = ?",
            [token_hash],
            |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)),
        );

        let (user_id, expires_at) = match result {
            Ok(pair) => pair,
            Err(rusqlite::Error::QueryReturnedNoRows) => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let expires_at = DateTime::parse_from_rfc3339(&expires_at)?.with_timezone(&Utc);
        if expires_at <= now {
            conn.execute("DELETE FROM sessions WHERE token_hash = ?", [token_hash])?;
            return Ok(None);
        }

        Ok(Some(user_id))
    }

    pub fn delete_expired_sessions(&self, now: DateTime<Utc>) -> Result<usize> {
        let conn = self.lock()?;
        let deleted = conn.execute(
            "DELETE FROM sessions WHERE expires_at <= ?",
            [now.to_rfc3339()],
        )?;
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn test_db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();
        db
    }

    #[test]
    fn duplicate_email_rejected() {
        let db = test_db();
        db.create_user("a@example.com", "A", "h", "s").unwrap();
        assert!(db.email_exists("a@example.com").unwrap());
        assert!(db.create_user("a@example.com", "B", "h", "s").is_err());
        // Email uniqueness is case-insensitive
        assert!(db.create_user("A@Example.com", "B", "h", "s").is_err());
    }

    #[test]
    fn session_expiry() {
        let db = test_db();
        let uid = db.create_user("a@example.com", "A", "h", "s").unwrap();
        let now = Utc::now();

        db.create_session("tok", uid, now + Duration::minutes(60)).unwrap();
        assert_eq!(db.session_user("tok", now).unwrap(), Some(uid));

        // Past its expiry, the session resolves to nothing and is removed
        let later = now + Duration::minutes(61);
        assert_eq!(db.session_user("tok", later).unwrap(), None);
        assert_eq!(db.session_user("tok", now).unwrap(), None);
    }

    #[test]
    fn unknown_token_is_none() {
        let db = test_db();
        assert_eq!(db.session_user("nope", Utc::now()).unwrap(), None);
    }
}
