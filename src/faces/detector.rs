//! Face detection and descriptor extraction.
//!
//! Two ONNX models run through `ort`: UltraFace locates face bounding
//! boxes, a recognition model turns each face crop into a fixed-length
//! descriptor. Both sessions are process-wide and must be loaded through
//! [`init`] before any detection call; calls made earlier fail with
//! [`FaceError::NotReady`] rather than triggering an implicit load on the
//! request path. After loading the sessions are treated as read-only
//! model state; the mutexes only serialize access to the ort API.

use anyhow::{anyhow, Result};
use image::{DynamicImage, GenericImageView};
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Tensor;
use std::path::PathBuf;
use std::sync::{Mutex, OnceLock};

use crate::config::FacesConfig;
use crate::db::BoundingBox;

use super::FaceError;

/// One detected face with its identity descriptor
#[derive(Debug, Clone)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub descriptor: Vec<f32>,
    pub confidence: f32,
}

/// Face detection model (UltraFace 320x240)
static DETECTOR: OnceLock<Mutex<Session>> = OnceLock::new();
/// Face recognition model (128-d descriptors by default)
static RECOGNIZER: OnceLock<Mutex<Session>> = OnceLock::new();

/// Download a model file if it isn't cached yet
fn ensure_model(models_dir: &PathBuf, filename: &str, url: &str) -> Result<PathBuf> {
    std::fs::create_dir_all(models_dir)?;
    let model_path = models_dir.join(filename);

    if !model_path.exists() {
        tracing::info!(model = %filename, "Downloading model...");
        let response = ureq::get(url)
            .call()
            .map_err(|e| anyhow!("Failed to download model: {}", e))?;

        let mut file = std::fs::File::create(&model_path)?;
        std::io::copy(&mut response.into_reader(), &mut file)?;
        tracing::info!(model = %filename, path = ?model_path, "Model downloaded");
    }

    Ok(model_path)
}

fn build_session(model_path: &PathBuf) -> Result<Session> {
    let session = Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .with_intra_threads(4)?
        .commit_from_file(model_path)?;
    Ok(session)
}

/// Load both models. One-time, process-wide; the server calls this before
/// it starts listening, which is what guarantees no detection runs before
/// load completion.
pub fn init(config: &FacesConfig) -> Result<()> {
    if is_ready() {
        return Ok(());
    }

    let detector_path = ensure_model(
        &config.models_dir,
        "face-detector.onnx",
        &config.detector_model_url,
    )?;
    let _ = DETECTOR.set(Mutex::new(build_session(&detector_path)?));

    let recognizer_path = ensure_model(
        &config.models_dir,
        "face-recognizer.onnx",
        &config.recognizer_model_url,
    )?;
    let _ = RECOGNIZER.set(Mutex::new(build_session(&recognizer_path)?));

    Ok(())
}

/// Whether both models are loaded
pub fn is_ready() -> bool {
    DETECTOR.get().is_some() && RECOGNIZER.get().is_some()
}

/// Decode raw upload bytes into an image
pub fn decode(bytes: &[u8]) -> Result<DynamicImage, FaceError> {
    Ok(image::load_from_memory(bytes)?)
}

/// Detect faces in a decoded image.
///
/// The detector pass runs eagerly and yields the bounding boxes; the
/// returned sequence computes descriptors lazily as it is advanced, one
/// recognition-model pass per face. It is finite and non-restartable.
/// Zero detections is a normal, empty sequence.
pub fn detect(img: &DynamicImage, descriptor_len: usize) -> Result<Detections<'_>, FaceError> {
    if !is_ready() {
        return Err(FaceError::NotReady);
    }

    let boxes = detect_boxes(img)?;
    Ok(Detections {
        img,
        boxes: boxes.into_iter(),
        descriptor_len,
    })
}

/// Lazy sequence of detections for one image
pub struct Detections<'a> {
    img: &'a DynamicImage,
    boxes: std::vec::IntoIter<(BoundingBox, f32)>,
    descriptor_len: usize,
}

impl Iterator for Detections<'_> {
    type Item = Result<Detection, FaceError>;

    fn next(&mut self) -> Option<Self::Item> {
        let (bbox, confidence) = self.boxes.next()?;
        let descriptor = match compute_descriptor(self.img, &bbox, self.descriptor_len) {
            Ok(d) => d,
            Err(e) => return Some(Err(e)),
        };
        Some(Ok(Detection {
            bbox,
            descriptor,
            confidence,
        }))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.boxes.size_hint()
    }
}

/// Run the detection model and return confident, de-overlapped boxes
fn detect_boxes(img: &DynamicImage) -> Result<Vec<(BoundingBox, f32)>, FaceError> {
    const INPUT_WIDTH: u32 = 320;
    const INPUT_HEIGHT: u32 = 240;
    const CONFIDENCE_THRESHOLD: f32 = 0.7;
    const NMS_THRESHOLD: f32 = 0.3;

    let mut session = DETECTOR
        .get()
        .ok_or(FaceError::NotReady)?
        .lock()
        .map_err(|_| FaceError::Inference(anyhow!("detector session lock poisoned")))?;

    let (orig_width, orig_height) = img.dimensions();

    // Resize to model input size; bilinear is plenty for detection
    let resized = img.resize_exact(
        INPUT_WIDTH,
        INPUT_HEIGHT,
        image::imageops::FilterType::Triangle,
    );
    let rgb = resized.to_rgb8();

    // NCHW, normalized the way UltraFace expects
    let plane = (INPUT_HEIGHT * INPUT_WIDTH) as usize;
    let mut input_data = vec![0.0f32; 3 * plane];
    for y in 0..INPUT_HEIGHT as usize {
        for x in 0..INPUT_WIDTH as usize {
            let pixel = rgb.get_pixel(x as u32, y as u32);
            let idx = y * INPUT_WIDTH as usize + x;
            input_data[idx] = (pixel[0] as f32 - 127.0) / 128.0;
            input_data[plane + idx] = (pixel[1] as f32 - 127.0) / 128.0;
            input_data[2 * plane + idx] = (pixel[2] as f32 - 127.0) / 128.0;
        }
    }

    let input_tensor = Tensor::from_array((
        [1usize, 3, INPUT_HEIGHT as usize, INPUT_WIDTH as usize],
        input_data.into_boxed_slice(),
    ))?;

    let outputs = session.run(ort::inputs!["input" => input_tensor])?;

    let scores_value = outputs
        .get("scores")
        .ok_or_else(|| anyhow!("detector produced no scores output"))?;
    let boxes_value = outputs
        .get("boxes")
        .ok_or_else(|| anyhow!("detector produced no boxes output"))?;

    let (scores_shape, scores_data) = scores_value.try_extract_tensor::<f32>()?;
    let (_boxes_shape, boxes_data) = boxes_value.try_extract_tensor::<f32>()?;

    // scores: [1, num_anchors, 2] (background, face)
    // boxes:  [1, num_anchors, 4] (x1, y1, x2, y2 normalized)
    let num_anchors = scores_shape[1] as usize;
    let mut face_boxes = Vec::new();

    for i in 0..num_anchors {
        let confidence = scores_data[i * 2 + 1];
        if confidence <= CONFIDENCE_THRESHOLD {
            continue;
        }

        let x1 = (boxes_data[i * 4] * orig_width as f32) as i32;
        let y1 = (boxes_data[i * 4 + 1] * orig_height as f32) as i32;
        let x2 = (boxes_data[i * 4 + 2] * orig_width as f32) as i32;
        let y2 = (boxes_data[i * 4 + 3] * orig_height as f32) as i32;

        let bbox = BoundingBox {
            x: x1.max(0),
            y: y1.max(0),
            width: (x2 - x1).max(1),
            height: (y2 - y1).max(1),
        };
        face_boxes.push((bbox, confidence));
    }

    Ok(nms(face_boxes, NMS_THRESHOLD))
}

/// Non-maximum suppression to remove overlapping detections
fn nms(mut boxes: Vec<(BoundingBox, f32)>, threshold: f32) -> Vec<(BoundingBox, f32)> {
    boxes.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    let mut keep = Vec::new();
    let mut suppressed = vec![false; boxes.len()];

    for i in 0..boxes.len() {
        if suppressed[i] {
            continue;
        }
        keep.push(boxes[i].clone());

        for j in (i + 1)..boxes.len() {
            if !suppressed[j] && iou(&boxes[i].0, &boxes[j].0) > threshold {
                suppressed[j] = true;
            }
        }
    }

    keep
}

/// Intersection over union of two boxes
fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let x1 = a.x.max(b.x);
    let y1 = a.y.max(b.y);
    let x2 = (a.x + a.width).min(b.x + b.width);
    let y2 = (a.y + a.height).min(b.y + b.height);

    let intersection = ((x2 - x1).max(0) * (y2 - y1).max(0)) as f32;
    let union = (a.width * a.height + b.width * b.height) as f32 - intersection;

    if union > 0.0 {
        intersection / union
    } else {
        0.0
    }
}

/// Crop the face region with padding for the recognition model.
/// The detection model can report boxes past the image's right or
/// bottom edge (normalized coordinates above 1.0), so both corners are
/// clamped to the image extents before the subtraction.
fn padded_crop(img: &DynamicImage, bbox: &BoundingBox) -> DynamicImage {
    let (img_width, img_height) = img.dimensions();

    // 20% padding gives the recognizer some context around the face
    let padding_x = (bbox.width as f32 * 0.2) as i32;
    let padding_y = (bbox.height as f32 * 0.2) as i32;

    let x = (bbox.x - padding_x).clamp(0, img_width as i32 - 1) as u32;
    let y = (bbox.y - padding_y).clamp(0, img_height as i32 - 1) as u32;
    let w = ((bbox.width + padding_x * 2).max(1) as u32).min(img_width - x);
    let h = ((bbox.height + padding_y * 2).max(1) as u32).min(img_height - y);

    img.crop_imm(x, y, w.max(1), h.max(1))
}

/// Run the recognition model on one face region
fn compute_descriptor(
    img: &DynamicImage,
    bbox: &BoundingBox,
    descriptor_len: usize,
) -> Result<Vec<f32>, FaceError> {
    const INPUT_SIZE: u32 = 112;

    let mut session = RECOGNIZER
        .get()
        .ok_or(FaceError::NotReady)?
        .lock()
        .map_err(|_| FaceError::Inference(anyhow!("recognizer session lock poisoned")))?;

    let face = padded_crop(img, bbox);
    let resized = face.resize_exact(
        INPUT_SIZE,
        INPUT_SIZE,
        image::imageops::FilterType::Triangle,
    );
    let rgb = resized.to_rgb8();

    let plane = (INPUT_SIZE * INPUT_SIZE) as usize;
    let mut input_data = vec![0.0f32; 3 * plane];
    for y in 0..INPUT_SIZE as usize {
        for x in 0..INPUT_SIZE as usize {
            let pixel = rgb.get_pixel(x as u32, y as u32);
            let idx = y * INPUT_SIZE as usize + x;
            input_data[idx] = (pixel[0] as f32 - 127.5) / 127.5;
            input_data[plane + idx] = (pixel[1] as f32 - 127.5) / 127.5;
            input_data[2 * plane + idx] = (pixel[2] as f32 - 127.5) / 127.5;
        }
    }

    let input_tensor = Tensor::from_array((
        [1usize, 3, INPUT_SIZE as usize, INPUT_SIZE as usize],
        input_data.into_boxed_slice(),
    ))?;

    let outputs = session.run(ort::inputs!["data" => input_tensor])?;

    let output = outputs
        .iter()
        .next()
        .ok_or_else(|| anyhow!("recognizer produced no output"))?;
    let (_shape, data) = output.1.try_extract_tensor::<f32>()?;

    if data.len() != descriptor_len {
        return Err(FaceError::Validation {
            expected: descriptor_len,
            actual: data.len(),
        });
    }

    // L2-normalize so descriptor distances live on a stable scale
    let descriptor: Vec<f32> = data.to_vec();
    let norm: f32 = descriptor.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        Ok(descriptor.iter().map(|x| x / norm).collect())
    } else {
        Ok(descriptor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iou_of_identical_and_disjoint_boxes() {
        let a = BoundingBox { x: 0, y: 0, width: 10, height: 10 };
        let b = BoundingBox { x: 0, y: 0, width: 10, height: 10 };
        assert!((iou(&a, &b) - 1.0).abs() < 0.001);

        let c = BoundingBox { x: 20, y: 20, width: 10, height: 10 };
        assert!((iou(&a, &c) - 0.0).abs() < 0.001);
    }

    #[test]
    fn nms_drops_overlapping_lower_confidence_boxes() {
        let boxes = vec![
            (BoundingBox { x: 0, y: 0, width: 10, height: 10 }, 0.9),
            (BoundingBox { x: 1, y: 1, width: 10, height: 10 }, 0.8),
            (BoundingBox { x: 50, y: 50, width: 10, height: 10 }, 0.7),
        ];
        let kept = nms(boxes, 0.3);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].1, 0.9);
        assert_eq!(kept[1].1, 0.7);
    }

    #[test]
    fn padded_crop_clamps_boxes_past_the_far_edges() {
        let img = DynamicImage::new_rgb8(100, 100);

        // Entirely past the right edge
        let right = BoundingBox { x: 120, y: 10, width: 30, height: 30 };
        let crop = padded_crop(&img, &right);
        assert!(crop.width() >= 1 && crop.height() >= 1);
        assert!(crop.width() <= 100 && crop.height() <= 100);

        // Past the bottom edge, overlapping the corner
        let corner = BoundingBox { x: 90, y: 110, width: 50, height: 50 };
        let crop = padded_crop(&img, &corner);
        assert!(crop.width() >= 1 && crop.height() >= 1);

        // Ordinary interior box keeps its padded size
        let inner = BoundingBox { x: 40, y: 40, width: 20, height: 20 };
        let crop = padded_crop(&img, &inner);
        assert_eq!((crop.width(), crop.height()), (28, 28));
    }

    #[test]
    fn detect_before_init_is_not_ready() {
        // Models are never loaded in unit tests
        let img = DynamicImage::new_rgb8(32, 32);
        match detect(&img, 128) {
            Err(FaceError::NotReady) => {}
            other => panic!("expected NotReady, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn malformed_bytes_fail_to_decode() {
        assert!(matches!(
            decode(b"not an image"),
            Err(FaceError::Decode(_))
        ));
    }
}
