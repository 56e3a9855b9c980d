//! The face descriptor store.
//!
//! Face records live in their own table keyed by (user, image, face index).
//! They are written together with the owning image row in one transaction
//! (see `images.rs`), so an image either lands with its complete face set
//! or not at all; removal is idempotent.

use anyhow::Result;
use rusqlite::{params, Connection};

use super::Database;

/// Bounding box for a detected face, in source image pixel coordinates
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundingBox {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

/// A stored face record
#[derive(Debug, Clone)]
pub struct FaceRecord {
    pub id: i64,
    pub image_id: i64,
    pub face_index: i64,
    pub bbox: BoundingBox,
    pub descriptor: Vec<f32>,
    pub thumbnail: Vec<u8>,
}

/// A face ready to be persisted, produced by the extraction pipeline
#[derive(Debug, Clone)]
pub struct NewFaceRecord {
    pub bbox: BoundingBox,
    pub descriptor: Vec<f32>,
    pub thumbnail: Vec<u8>,
}

impl Database {
    /// All face records of a user, across all of their images. Used for
    /// display and as the candidate pool for matching.
    pub fn list_faces_for_user(&self, user_id: i64) -> Result<Vec<FaceRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT id, image_id, face_index, bbox_x, bbox_y, bbox_w, bbox_h, descriptor, thumbnail
            FROM faces
            WHERE user_id = ?
            ORDER BY image_id, face_index
            "#,
        )?;

        let faces = stmt
            .query_map([user_id], face_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(faces)
    }

    /// Face records of one image, in detection order.
    pub fn faces_for_image(&self, image_id: i64) -> Result<Vec<FaceRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT id, image_id, face_index, bbox_x, bbox_y, bbox_w, bbox_h, descriptor, thumbnail
            FROM faces
            WHERE image_id = ?
            ORDER BY face_index
            "#,
        )?;

        let faces = stmt
            .query_map([image_id], face_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(faces)
    }

    /// Descriptors only, paired with their image id. Lighter than
    /// `list_faces_for_user` for the match path, which never needs
    /// thumbnails.
    pub fn descriptors_for_user(&self, user_id: i64) -> Result<Vec<(i64, Vec<f32>)>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT image_id, descriptor FROM faces WHERE user_id = ?",
        )?;

        let results = stmt
            .query_map([user_id], |row| {
                let bytes: Vec<u8> = row.get(1)?;
                Ok((row.get(0)?, descriptor_from_bytes(&bytes)))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(results)
    }

    /// Delete every face record of an image. A no-op when none exist,
    /// so repeated removal converges to the same state.
    pub fn remove_faces_for_image(&self, user_id: i64, image_id: i64) -> Result<usize> {
        let conn = self.lock()?;
        let deleted = conn.execute(
            "DELETE FROM faces WHERE user_id = ? AND image_id = ?",
            params![user_id, image_id],
        )?;
        Ok(deleted)
    }
}

/// Insert the complete face set of one image. Runs on the caller's
/// transaction so the rows commit atomically with the image itself.
pub(crate) fn insert_face_rows(
    conn: &Connection,
    user_id: i64,
    image_id: i64,
    faces: &[NewFaceRecord],
) -> Result<()> {
    let mut stmt = conn.prepare(
        r#"
        INSERT INTO faces
            (user_id, image_id, face_index, bbox_x, bbox_y, bbox_w, bbox_h,
             descriptor, descriptor_dim, thumbnail)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )?;

    for (index, face) in faces.iter().enumerate() {
        stmt.execute(params![
            user_id,
            image_id,
            index as i64,
            face.bbox.x,
            face.bbox.y,
            face.bbox.width,
            face.bbox.height,
            descriptor_to_bytes(&face.descriptor),
            face.descriptor.len() as i64,
            face.thumbnail,
        ])?;
    }

    Ok(())
}

fn face_from_row(row: &rusqlite::Row<'_>) -> std::result::Result<FaceRecord, rusqlite::Error> {
    let descriptor_bytes: Vec<u8> = row.get(7)?;
    Ok(FaceRecord {
        id: row.get(0)?,
        image_id: row.get(1)?,
        face_index: row.get(2)?,
        bbox: BoundingBox {
            x: row.get(3)?,
            y: row.get(4)?,
            width: row.get(5)?,
            height: row.get(6)?,
        },
        descriptor: descriptor_from_bytes(&descriptor_bytes),
        thumbnail: row.get(8)?,
    })
}

/// Convert f32 slice to bytes for storage
pub(crate) fn descriptor_to_bytes(descriptor: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(descriptor.len() * 4);
    for &val in descriptor {
        bytes.extend_from_slice(&val.to_le_bytes());
    }
    bytes
}

/// Convert bytes back to f32 vector
pub(crate) fn descriptor_from_bytes(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| {
            let arr: [u8; 4] = chunk.try_into().unwrap();
            f32::from_le_bytes(arr)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_bytes_roundtrip() {
        let descriptor: Vec<f32> = (0..128).map(|i| i as f32 * 0.25 - 16.0).collect();
        let bytes = descriptor_to_bytes(&descriptor);
        assert_eq!(bytes.len(), 128 * 4);
        assert_eq!(descriptor_from_bytes(&bytes), descriptor);
    }

    #[test]
    fn remove_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();
        let uid = db.create_user("a@example.com", "A", "h", "s").unwrap();

        let faces = vec![NewFaceRecord {
            bbox: BoundingBox { x: 1, y: 2, width: 3, height: 4 },
            descriptor: vec![0.5; 128],
            thumbnail: vec![0xFF, 0xD8],
        }];
        let image_id = db
            .insert_image_with_faces(uid, "1-a.jpg", "a", &[], &faces)
            .unwrap();

        assert_eq!(db.remove_faces_for_image(uid, image_id).unwrap(), 1);
        assert_eq!(db.remove_faces_for_image(uid, image_id).unwrap(), 0);
        assert!(db.list_faces_for_user(uid).unwrap().is_empty());
    }
}
