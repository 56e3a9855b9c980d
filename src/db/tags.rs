//! Per-user tag queries. Tag lifecycle (creation and garbage collection)
//! is handled inside the image transactions in `images.rs`.

use anyhow::Result;

use super::Database;

impl Database {
    pub fn tags_for_user(&self, user_id: i64) -> Result<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT name FROM tags WHERE user_id = ? ORDER BY name")?;
        let tags = stmt
            .query_map([user_id], |row| row.get(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(tags)
    }

    /// The user's own tags combined with tags of everyone who shared
    /// their gallery with them, deduplicated.
    pub fn visible_tags(&self, user_id: i64) -> Result<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT DISTINCT name FROM tags
            WHERE user_id = ?1
               OR user_id IN (SELECT owner_id FROM shares WHERE shared_with_id = ?1)
            ORDER BY name
            "#,
        )?;
        let tags = stmt
            .query_map([user_id], |row| row.get(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(tags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn visible_tags_include_sharers() {
        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();
        let alice = db.create_user("alice@example.com", "Alice", "h", "s").unwrap();
        let bob = db.create_user("bob@example.com", "Bob", "h", "s").unwrap();

        db.insert_image_with_faces(alice, "1-a.jpg", "a", &["dogs".into()], &[])
            .unwrap();
        db.insert_image_with_faces(bob, "2-b.jpg", "b", &["cats".into()], &[])
            .unwrap();

        // Before sharing, bob only sees his own tags
        assert_eq!(db.visible_tags(bob).unwrap(), vec!["cats".to_string()]);

        db.create_share(alice, bob).unwrap();
        assert_eq!(
            db.visible_tags(bob).unwrap(),
            vec!["cats".to_string(), "dogs".to_string()]
        );
    }
}
