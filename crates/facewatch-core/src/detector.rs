//! YOLO face detector via ONNX Runtime.
//!
//! Runs a single-class YOLOv8 face model: letterbox preprocessing, anchor-free
//! output decoding, confidence filtering and NMS post-processing.

use crate::capability::{DetectorError, FaceDetector};
use crate::frame::{ChannelOrder, Frame};
use crate::session::{self, ModelOptions};
use crate::types::BoundingBox;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;

const YOLO_DEFAULT_INPUT_SIZE: usize = 640;
const YOLO_PAD_VALUE: f32 = 114.0;
const YOLO_SCALE: f32 = 255.0;
const YOLO_NMS_THRESHOLD: f32 = 0.45;
/// Box (cx, cy, w, h) followed by the face score.
const YOLO_MIN_FEATURES: usize = 5;

pub const DEFAULT_CONFIDENCE: f32 = 0.25;

/// Metadata for coordinate de-mapping after letterbox resize.
struct LetterboxInfo {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

/// Detection in original frame coordinates before integer conversion.
#[derive(Debug, Clone)]
struct RawDetection {
    x1: f32,
    y1: f32,
    x2: f32,
    y2: f32,
    confidence: f32,
}

/// YOLO-based face detector.
pub struct YoloFaceDetector {
    session: Session,
    input_size: usize,
    confidence: f32,
}

impl YoloFaceDetector {
    /// Load the YOLO face ONNX model from the given path.
    ///
    /// The input resolution is read from the model's NCHW input shape and
    /// falls back to 640 when the shape is dynamic.
    pub fn load(model_path: &Path, options: &ModelOptions, confidence: f32) -> Result<Self, DetectorError> {
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(model_path.display().to_string()));
        }

        let session = session::build_session(model_path, options)?;

        let input_size = session
            .inputs()
            .first()
            .and_then(|input| match input.dtype() {
                ort::value::ValueType::Tensor { shape, .. } if shape.len() >= 4 && shape[2] > 0 => {
                    Some(shape[2] as usize)
                }
                _ => None,
            })
            .unwrap_or(YOLO_DEFAULT_INPUT_SIZE);

        tracing::info!(
            path = %model_path.display(),
            input_size,
            confidence,
            backend = ?options.backend,
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded YOLO face model"
        );

        Ok(Self {
            session,
            input_size,
            confidence,
        })
    }

    /// Preprocess a colour frame into a NCHW RGB float tensor with letterbox padding.
    fn preprocess(&self, frame: &Frame) -> (Array4<f32>, LetterboxInfo) {
        letterbox(frame, self.input_size)
    }
}

impl FaceDetector for YoloFaceDetector {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<BoundingBox>, DetectorError> {
        if frame.width() == 0 || frame.height() == 0 {
            return Err(DetectorError::InferenceFailed("empty frame".into()));
        }

        let (input, letterbox) = self.preprocess(frame);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectorError::InferenceFailed(format!("detections: {e}")))?;
        let dims: Vec<usize> = shape.iter().map(|&d| d.max(0) as usize).collect();

        let raw = decode_output(data, &dims, &letterbox, self.confidence)?;
        let kept = nms(raw, YOLO_NMS_THRESHOLD);

        let boxes: Vec<BoundingBox> = kept.iter().filter_map(to_pixel_box).collect();
        tracing::trace!(faces = boxes.len(), "detected faces");
        Ok(boxes)
    }
}

/// Letterbox-resize a frame to `target` x `target` using bilinear interpolation.
fn letterbox(frame: &Frame, target: usize) -> (Array4<f32>, LetterboxInfo) {
    let width = frame.width() as usize;
    let height = frame.height() as usize;

    let scale = (target as f32 / width as f32).min(target as f32 / height as f32);
    let new_w = ((width as f32 * scale).round() as usize).clamp(1, target);
    let new_h = ((height as f32 * scale).round() as usize).clamp(1, target);
    let pad_x = (target - new_w) as f32 / 2.0;
    let pad_y = (target - new_h) as f32 / 2.0;
    let pad_x_start = pad_x.floor() as usize;
    let pad_y_start = pad_y.floor() as usize;

    let channel_src = match frame.order() {
        ChannelOrder::Rgb => [0, 1, 2],
        ChannelOrder::Bgr => [2, 1, 0],
    };

    let mut tensor = Array4::<f32>::from_elem((1, 3, target, target), YOLO_PAD_VALUE / YOLO_SCALE);
    let src = frame.data();
    let inv_scale = 1.0 / scale;

    for y in 0..new_h {
        let src_y = (y as f32 + 0.5) * inv_scale - 0.5;
        let y0 = (src_y.floor() as i32).clamp(0, height as i32 - 1) as usize;
        let y1 = (y0 + 1).min(height - 1);
        let fy = (src_y - src_y.floor()).clamp(0.0, 1.0);

        for x in 0..new_w {
            let src_x = (x as f32 + 0.5) * inv_scale - 0.5;
            let x0 = (src_x.floor() as i32).clamp(0, width as i32 - 1) as usize;
            let x1 = (x0 + 1).min(width - 1);
            let fx = (src_x - src_x.floor()).clamp(0.0, 1.0);

            for (c, &sc) in channel_src.iter().enumerate() {
                let at = |px: usize, py: usize| src[(py * width + px) * 3 + sc] as f32;
                let val = at(x0, y0) * (1.0 - fx) * (1.0 - fy)
                    + at(x1, y0) * fx * (1.0 - fy)
                    + at(x0, y1) * (1.0 - fx) * fy
                    + at(x1, y1) * fx * fy;
                tensor[[0, c, pad_y_start + y, pad_x_start + x]] = val / YOLO_SCALE;
            }
        }
    }

    (tensor, LetterboxInfo { scale, pad_x, pad_y })
}

/// Decode a `[1, F, N]` (transposed, YOLOv8 default) or `[1, N, F]` output.
///
/// Each detection row is `[cx, cy, w, h, score, ...]`; trailing keypoint
/// values are ignored.
fn decode_output(
    data: &[f32],
    dims: &[usize],
    letterbox: &LetterboxInfo,
    threshold: f32,
) -> Result<Vec<RawDetection>, DetectorError> {
    let (num_dets, num_feats, transposed) = match dims {
        [1, a, b] if a < b => (*b, *a, true),
        [1, a, b] => (*a, *b, false),
        _ => {
            return Err(DetectorError::InferenceFailed(format!(
                "unexpected YOLO output shape: {dims:?}"
            )))
        }
    };

    if num_feats < YOLO_MIN_FEATURES {
        return Err(DetectorError::InferenceFailed(format!(
            "YOLO output needs at least {YOLO_MIN_FEATURES} features per detection, got {num_feats}"
        )));
    }
    if data.len() < num_dets * num_feats {
        return Err(DetectorError::InferenceFailed(format!(
            "YOLO output too short: expected {}, got {}",
            num_dets * num_feats,
            data.len()
        )));
    }

    let feature = |det: usize, f: usize| {
        if transposed {
            data[f * num_dets + det]
        } else {
            data[det * num_feats + f]
        }
    };

    let mut detections = Vec::new();
    for i in 0..num_dets {
        let score = feature(i, 4);
        if score < threshold {
            continue;
        }

        let (cx, cy, w, h) = (feature(i, 0), feature(i, 1), feature(i, 2), feature(i, 3));

        // Map from letterboxed space to original frame space
        detections.push(RawDetection {
            x1: (cx - w / 2.0 - letterbox.pad_x) / letterbox.scale,
            y1: (cy - h / 2.0 - letterbox.pad_y) / letterbox.scale,
            x2: (cx + w / 2.0 - letterbox.pad_x) / letterbox.scale,
            y2: (cy + h / 2.0 - letterbox.pad_y) / letterbox.scale,
            confidence: score,
        });
    }

    Ok(detections)
}

/// Truncate to integer pixel coordinates; drops boxes that collapse.
fn to_pixel_box(det: &RawDetection) -> Option<BoundingBox> {
    let bbox = BoundingBox {
        x1: det.x1 as i32,
        y1: det.y1 as i32,
        x2: det.x2 as i32,
        y2: det.y2 as i32,
        confidence: det.confidence,
    };
    (bbox.x1 < bbox.x2 && bbox.y1 < bbox.y2).then_some(bbox)
}

/// Non-Maximum Suppression: remove overlapping detections.
///
/// Output is sorted by confidence, highest first.
fn nms(mut detections: Vec<RawDetection>, iou_threshold: f32) -> Vec<RawDetection> {
    detections.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep = Vec::new();
    let mut suppressed = vec![false; detections.len()];

    for i in 0..detections.len() {
        if suppressed[i] {
            continue;
        }
        keep.push(detections[i].clone());

        for j in (i + 1)..detections.len() {
            if !suppressed[j] && iou(&detections[i], &detections[j]) > iou_threshold {
                suppressed[j] = true;
            }
        }
    }

    keep
}

/// Compute Intersection-over-Union between two detections.
fn iou(a: &RawDetection, b: &RawDetection) -> f32 {
    let inter_w = (a.x2.min(b.x2) - a.x1.max(b.x1)).max(0.0);
    let inter_h = (a.y2.min(b.y2) - a.y1.max(b.y1)).max(0.0);
    let inter_area = inter_w * inter_h;

    let area_a = (a.x2 - a.x1) * (a.y2 - a.y1);
    let area_b = (b.x2 - b.x1) * (b.y2 - b.y1);
    let union_area = area_a + area_b - inter_area;

    if union_area > 0.0 {
        inter_area / union_area
    } else {
        0.0
    }
}
