//! Image metadata CRUD.
//!
//! Image creation is the `append` side of the face store contract: the
//! image row, its tag rows and all of its face records commit as one
//! transaction, so a failed write never leaves orphaned descriptors or a
//! partial face set behind.

use anyhow::Result;
use rusqlite::{params, Connection};

use super::faces::{insert_face_rows, NewFaceRecord};
use super::Database;

/// Metadata for one uploaded image
#[derive(Debug, Clone)]
pub struct ImageRecord {
    pub id: i64,
    pub user_id: i64,
    pub storage_key: String,
    pub title: String,
    pub uploaded_at: String,
    pub uploader_email: String,
}

impl Database {
    /// Insert an image together with its tags and complete face set.
    ///
    /// Zero faces is a normal outcome (nothing face-related is written,
    /// the image row still lands).
    pub fn insert_image_with_faces(
        &self,
        user_id: i64,
        storage_key: &str,
        title: &str,
        tags: &[String],
        faces: &[NewFaceRecord],
    ) -> Result<i64> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO images (user_id, storage_key, title) VALUES (?, ?, ?)",
            params![user_id, storage_key, title],
        )?;
        let image_id = tx.last_insert_rowid();

        for tag in normalized_tags(tags) {
            tx.execute(
                "INSERT OR IGNORE INTO image_tags (image_id, tag) VALUES (?, ?)",
                params![image_id, tag],
            )?;
            tx.execute(
                "INSERT OR IGNORE INTO tags (user_id, name) VALUES (?, ?)",
                params![user_id, tag],
            )?;
        }

        insert_face_rows(&tx, user_id, image_id, faces)?;

        tx.commit()?;
        Ok(image_id)
    }

    /// Look up an image by its blob store key, regardless of owner.
    pub fn get_image_by_key(&self, storage_key: &str) -> Result<Option<ImageRecord>> {
        let conn = self.lock()?;
        let result = conn.query_row(
            r#"
            SELECT i.id, i.user_id, i.storage_key, i.title, i.uploaded_at, u.email
            FROM images i
            JOIN users u ON u.id = i.user_id
            WHERE i.storage_key = ?
            "#,
            [storage_key],
            |row| {
                Ok(ImageRecord {
                    id: row.get(0)?,
                    user_id: row.get(1)?,
                    storage_key: row.get(2)?,
                    title: row.get(3)?,
                    uploaded_at: row.get(4)?,
                    uploader_email: row.get(5)?,
                })
            },
        );

        match result {
            Ok(image) => Ok(Some(image)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Paginated storage keys of a user's images, oldest first.
    /// Returns one page plus a flag for whether more pages follow.
    pub fn list_images(
        &self,
        user_id: i64,
        page: usize,
        limit: usize,
    ) -> Result<(Vec<String>, bool)> {
        let offset = page.saturating_sub(1) * limit;
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT storage_key FROM images
            WHERE user_id = ?
            ORDER BY uploaded_at, id
            LIMIT ? OFFSET ?
            "#,
        )?;

        // Fetch one extra row to detect a following page
        let mut keys: Vec<String> = stmt
            .query_map(params![user_id, (limit + 1) as i64, offset as i64], |row| {
                row.get(0)
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let has_more = keys.len() > limit;
        keys.truncate(limit);
        Ok((keys, has_more))
    }

    /// Tags attached to one image.
    pub fn image_tags(&self, image_id: i64) -> Result<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare("SELECT tag FROM image_tags WHERE image_id = ? ORDER BY tag")?;
        let tags = stmt
            .query_map([image_id], |row| row.get(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(tags)
    }

    /// Update title and replace the tag set, reference-counting the
    /// user's tags: tags dropped from their last image disappear.
    pub fn update_image(
        &self,
        user_id: i64,
        image_id: i64,
        title: &str,
        tags: &[String],
    ) -> Result<()> {
        let new_tags = normalized_tags(tags);

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        tx.execute(
            "UPDATE images SET title = ? WHERE id = ? AND user_id = ?",
            params![title, image_id, user_id],
        )?;

        let existing: Vec<String> = {
            let mut stmt = tx.prepare("SELECT tag FROM image_tags WHERE image_id = ?")?;
            let rows = stmt
                .query_map([image_id], |row| row.get(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows
        };

        let removed: Vec<&String> = existing.iter().filter(|t| !new_tags.contains(t)).collect();
        let added: Vec<&String> = new_tags.iter().filter(|t| !existing.contains(t)).collect();

        for tag in &removed {
            tx.execute(
                "DELETE FROM image_tags WHERE image_id = ? AND tag = ?",
                params![image_id, tag],
            )?;
            gc_tag(&tx, user_id, tag)?;
        }

        for tag in &added {
            tx.execute(
                "INSERT OR IGNORE INTO image_tags (image_id, tag) VALUES (?, ?)",
                params![image_id, tag],
            )?;
            tx.execute(
                "INSERT OR IGNORE INTO tags (user_id, name) VALUES (?, ?)",
                params![user_id, tag],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    /// Delete an image with its tags and face records, garbage collecting
    /// tags the user no longer references anywhere.
    pub fn delete_image(&self, user_id: i64, image_id: i64) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let tags: Vec<String> = {
            let mut stmt = tx.prepare("SELECT tag FROM image_tags WHERE image_id = ?")?;
            let rows = stmt
                .query_map([image_id], |row| row.get(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows
        };

        tx.execute(
            "DELETE FROM faces WHERE user_id = ? AND image_id = ?",
            params![user_id, image_id],
        )?;
        tx.execute("DELETE FROM image_tags WHERE image_id = ?", [image_id])?;
        tx.execute(
            "DELETE FROM images WHERE id = ? AND user_id = ?",
            params![image_id, user_id],
        )?;

        for tag in &tags {
            gc_tag(&tx, user_id, tag)?;
        }

        tx.commit()?;
        Ok(())
    }

    /// Copy an image's metadata, tags and face records under a new
    /// storage key. The caller copies the blob itself.
    pub fn duplicate_image(&self, image_id: i64, new_storage_key: &str) -> Result<i64> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        tx.execute(
            r#"
            INSERT INTO images (user_id, storage_key, title)
            SELECT user_id, ?, title FROM images WHERE id = ?
            "#,
            params![new_storage_key, image_id],
        )?;
        let new_id = tx.last_insert_rowid();

        tx.execute(
            r#"
            INSERT INTO image_tags (image_id, tag)
            SELECT ?, tag FROM image_tags WHERE image_id = ?
            "#,
            params![new_id, image_id],
        )?;

        // The duplicate holds the same bytes, so its face set is the same
        tx.execute(
            r#"
            INSERT INTO faces
                (user_id, image_id, face_index, bbox_x, bbox_y, bbox_w, bbox_h,
                 descriptor, descriptor_dim, thumbnail)
            SELECT user_id, ?, face_index, bbox_x, bbox_y, bbox_w, bbox_h,
                   descriptor, descriptor_dim, thumbnail
            FROM faces WHERE image_id = ?
            "#,
            params![new_id, image_id],
        )?;

        tx.commit()?;
        Ok(new_id)
    }

    /// Storage keys of a user's images whose titles contain every one of
    /// the given lowercase terms.
    pub fn search_by_title(&self, user_id: i64, terms: &[String]) -> Result<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare("SELECT storage_key, title FROM images WHERE user_id = ?")?;
        let rows = stmt
            .query_map([user_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let keys = rows
            .into_iter()
            .filter(|(_, title)| {
                let title = title.to_lowercase();
                terms.iter().all(|term| title.contains(term.as_str()))
            })
            .map(|(key, _)| key)
            .collect();

        Ok(keys)
    }

    /// Storage keys for a set of image ids, oldest first. Ids that no
    /// longer exist are silently absent.
    pub fn storage_keys_for_ids(&self, image_ids: &[i64]) -> Result<Vec<String>> {
        if image_ids.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; image_ids.len()].join(", ");
        let sql = format!(
            "SELECT storage_key FROM images WHERE id IN ({placeholders}) ORDER BY uploaded_at, id",
        );

        let conn = self.lock()?;
        let mut stmt = conn.prepare(&sql)?;
        let params: Vec<&dyn rusqlite::ToSql> =
            image_ids.iter().map(|id| id as &dyn rusqlite::ToSql).collect();
        let keys = stmt
            .query_map(&params[..], |row| row.get(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(keys)
    }

    /// Storage keys of a user's images carrying any of the given tags.
    pub fn images_by_tags(&self, user_id: i64, tags: &[String]) -> Result<Vec<String>> {
        if tags.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; tags.len()].join(", ");
        let sql = format!(
            r#"
            SELECT DISTINCT i.storage_key
            FROM images i
            JOIN image_tags it ON it.image_id = i.id
            WHERE i.user_id = ? AND it.tag IN ({placeholders})
            "#,
        );

        let conn = self.lock()?;
        let mut stmt = conn.prepare(&sql)?;
        let mut params: Vec<&dyn rusqlite::ToSql> = vec![&user_id];
        for tag in tags {
            params.push(tag);
        }
        let keys = stmt
            .query_map(&params[..], |row| row.get(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(keys)
    }
}

/// Drop a user's tag when no remaining image of theirs references it.
fn gc_tag(conn: &Connection, user_id: i64, tag: &str) -> Result<()> {
    conn.execute(
        r#"
        DELETE FROM tags
        WHERE user_id = ?1 AND name = ?2
          AND NOT EXISTS (
              SELECT 1 FROM image_tags it
              JOIN images i ON i.id = it.image_id
              WHERE i.user_id = ?1 AND it.tag = ?2
          )
        "#,
        params![user_id, tag],
    )?;
    Ok(())
}

fn normalized_tags(tags: &[String]) -> Vec<String> {
    let mut out = Vec::new();
    for tag in tags {
        let tag = tag.trim();
        if !tag.is_empty() && !out.iter().any(|t| t == tag) {
            out.push(tag.to_string());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::faces::NewFaceRecord;
    use crate::db::BoundingBox;

    fn test_db() -> (Database, i64) {
        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();
        let uid = db.create_user("a@example.com", "A", "h", "s").unwrap();
        (db, uid)
    }

    fn face(seed: f32) -> NewFaceRecord {
        NewFaceRecord {
            bbox: BoundingBox { x: 0, y: 0, width: 8, height: 8 },
            descriptor: vec![seed; 128],
            thumbnail: vec![0xFF, 0xD8, 0xFF],
        }
    }

    #[test]
    fn image_with_no_faces_is_not_an_error() {
        let (db, uid) = test_db();
        let id = db
            .insert_image_with_faces(uid, "1-blank.png", "blank", &[], &[])
            .unwrap();
        assert!(db.faces_for_image(id).unwrap().is_empty());
        // The image itself is still retrievable
        assert!(db.get_image_by_key("1-blank.png").unwrap().is_some());
    }

    #[test]
    fn deleting_image_removes_its_faces() {
        let (db, uid) = test_db();
        let id = db
            .insert_image_with_faces(
                uid,
                "1-two.jpg",
                "two",
                &[],
                &[face(0.1), face(0.9)],
            )
            .unwrap();
        assert_eq!(db.list_faces_for_user(uid).unwrap().len(), 2);

        db.delete_image(uid, id).unwrap();
        assert!(db
            .list_faces_for_user(uid)
            .unwrap()
            .iter()
            .all(|f| f.image_id != id));
        assert!(db.get_image_by_key("1-two.jpg").unwrap().is_none());
    }

    #[test]
    fn face_order_and_count_match_detections() {
        let (db, uid) = test_db();
        let id = db
            .insert_image_with_faces(
                uid,
                "1-a.jpg",
                "a",
                &[],
                &[face(0.1), face(0.2), face(0.3)],
            )
            .unwrap();
        let faces = db.faces_for_image(id).unwrap();
        assert_eq!(faces.len(), 3);
        let indexes: Vec<i64> = faces.iter().map(|f| f.face_index).collect();
        assert_eq!(indexes, vec![0, 1, 2]);
    }

    #[test]
    fn tags_are_reference_counted() {
        let (db, uid) = test_db();
        let tags = |v: &[&str]| v.iter().map(|s| s.to_string()).collect::<Vec<_>>();

        let a = db
            .insert_image_with_faces(uid, "1-a.jpg", "a", &tags(&["sea", "sun"]), &[])
            .unwrap();
        let _b = db
            .insert_image_with_faces(uid, "2-b.jpg", "b", &tags(&["sea"]), &[])
            .unwrap();

        // "sun" was only on image a, "sea" survives via image b
        db.delete_image(uid, a).unwrap();
        assert_eq!(db.tags_for_user(uid).unwrap(), vec!["sea".to_string()]);
    }

    #[test]
    fn update_diffs_tags() {
        let (db, uid) = test_db();
        let tags = |v: &[&str]| v.iter().map(|s| s.to_string()).collect::<Vec<_>>();

        let id = db
            .insert_image_with_faces(uid, "1-a.jpg", "a", &tags(&["old", "keep"]), &[])
            .unwrap();
        db.update_image(uid, id, "renamed", &tags(&["keep", "new"]))
            .unwrap();

        assert_eq!(db.image_tags(id).unwrap(), tags(&["keep", "new"]));
        assert_eq!(db.tags_for_user(uid).unwrap(), tags(&["keep", "new"]));
        let image = db.get_image_by_key("1-a.jpg").unwrap().unwrap();
        assert_eq!(image.title, "renamed");
    }

    #[test]
    fn pagination_reports_more_pages() {
        let (db, uid) = test_db();
        for i in 0..5 {
            db.insert_image_with_faces(uid, &format!("{i}-x.jpg"), "x", &[], &[])
                .unwrap();
        }
        let (page1, more) = db.list_images(uid, 1, 3).unwrap();
        assert_eq!(page1.len(), 3);
        assert!(more);
        let (page2, more) = db.list_images(uid, 2, 3).unwrap();
        assert_eq!(page2.len(), 2);
        assert!(!more);
    }

    #[test]
    fn title_search_requires_all_terms() {
        let (db, uid) = test_db();
        db.insert_image_with_faces(uid, "1-a.jpg", "Sunset at the Beach", &[], &[])
            .unwrap();
        db.insert_image_with_faces(uid, "2-b.jpg", "Beach volleyball", &[], &[])
            .unwrap();

        let terms = vec!["sunset".to_string(), "beach".to_string()];
        assert_eq!(
            db.search_by_title(uid, &terms).unwrap(),
            vec!["1-a.jpg".to_string()]
        );
    }

    #[test]
    fn duplicate_copies_tags_and_faces() {
        let (db, uid) = test_db();
        let tags = vec!["trip".to_string()];
        let id = db
            .insert_image_with_faces(uid, "1-a.jpg", "a", &tags, &[face(0.4)])
            .unwrap();

        let copy = db.duplicate_image(id, "2-a.jpg").unwrap();
        assert_eq!(db.image_tags(copy).unwrap(), tags);
        assert_eq!(db.faces_for_image(copy).unwrap().len(), 1);
        assert_eq!(
            db.faces_for_image(copy).unwrap()[0].descriptor,
            vec![0.4; 128]
        );
    }
}
