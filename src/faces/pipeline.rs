//! Upload-time face extraction.
//!
//! Decodes the uploaded bytes once, runs detection, and turns every
//! detected face into a storable record with its descriptor and preview
//! thumbnail. The caller owns persistence.

use crate::config::FacesConfig;
use crate::db::NewFaceRecord;

use super::{detector, thumbnail, FaceError};

/// Extract all faces from an uploaded image.
///
/// An image with no detectable faces produces an empty vector, not an
/// error. Undecodable bytes fail with [`FaceError::Decode`]; calls made
/// before the models are loaded fail with [`FaceError::NotReady`].
pub fn extract_faces(bytes: &[u8], config: &FacesConfig) -> Result<Vec<NewFaceRecord>, FaceError> {
    let img = detector::decode(bytes)?;

    let mut records = Vec::new();
    for detection in detector::detect(&img, config.descriptor_len)? {
        let detection = detection?;
        let thumb = thumbnail::crop(&img, &detection.bbox, config.thumbnail_size)?;
        records.push(NewFaceRecord {
            bbox: detection.bbox,
            descriptor: detection.descriptor,
            thumbnail: thumb,
        });
    }

    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> FacesConfig {
        FacesConfig {
            models_dir: std::path::PathBuf::from("/nonexistent"),
            detector_model_url: String::new(),
            recognizer_model_url: String::new(),
            descriptor_len: 128,
            match_threshold: 0.6,
            thumbnail_size: 160,
        }
    }

    #[test]
    fn garbage_bytes_are_a_decode_error() {
        let err = extract_faces(b"definitely not a jpeg", &test_config()).unwrap_err();
        assert!(matches!(err, FaceError::Decode(_)));
    }

    #[test]
    fn valid_image_without_loaded_models_is_not_ready() {
        let img = image::DynamicImage::new_rgb8(16, 16);
        let mut bytes = Vec::new();
        img.write_to(
            &mut std::io::Cursor::new(&mut bytes),
            image::ImageFormat::Png,
        )
        .unwrap();

        let err = extract_faces(&bytes, &test_config()).unwrap_err();
        assert!(matches!(err, FaceError::NotReady));
    }
}
