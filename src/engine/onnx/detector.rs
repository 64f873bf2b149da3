use crate::common::{BridgeError, Result, Config};
use ort::{Environment, Session, SessionBuilder, Value, GraphOptimizationLevel};
use serde::{Serialize, Deserialize};
use std::sync::Arc;
use image::{DynamicImage, imageops::FilterType};
use ndarray::{Array4, CowArray};

const NMS_IOU_THRESHOLD: f32 = 0.45;
const MAX_DETECTIONS: usize = 5;
const MIN_BOX_SIZE: f32 = 10.0;

/// Detector box in original image coordinates. Serialized with bincode into the
/// face's opaque detection blob.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub confidence: f32,
}

impl Detection {
    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    pub fn iou(&self, other: &Detection) -> f32 {
        let x1 = self.x1.max(other.x1);
        let y1 = self.y1.max(other.y1);
        let x2 = self.x2.min(other.x2);
        let y2 = self.y2.min(other.y2);

        let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
        let union = self.width() * self.height() + other.width() * other.height() - intersection;

        if union > 0.0 {
            intersection / union
        } else {
            0.0
        }
    }
}

pub struct FaceDetector {
    session: Session,
    _environment: Arc<Environment>,
    input_width: u32,
    input_height: u32,
    confidence: f32,
}

impl FaceDetector {
    pub fn new(config: &Config) -> Result<Self> {
        let environment = Arc::new(
            Environment::builder()
                .with_name("face_detector")
                .build()
                .map_err(|e| BridgeError::EnvironmentLoad(format!("Failed to create environment: {}", e)))?
        );

        let model_path = &config.models.detector_path;
        if !model_path.exists() {
            return Err(BridgeError::EnvironmentLoad(
                format!("Detector model not found at: {:?}", model_path)
            ));
        }

        let session = SessionBuilder::new(&environment)?
            .with_optimization_level(optimization_level(config.performance.optimization_level))?
            .with_model_from_file(model_path)?;

        Ok(Self {
            session,
            _environment: environment,
            input_width: config.detector.input_width,
            input_height: config.detector.input_height,
            confidence: config.detector.detection_confidence,
        })
    }

    /// Returns detections above the confidence threshold, best first, in
    /// original image coordinates.
    pub fn detect(&self, image: &DynamicImage) -> Result<Vec<Detection>> {
        let orig_width = image.width() as f32;
        let orig_height = image.height() as f32;

        let img_array = if image.width() == self.input_width && image.height() == self.input_height {
            self.image_to_array(image)
        } else {
            let resized = image.resize_exact(self.input_width, self.input_height, FilterType::Nearest);
            self.image_to_array(&resized)
        };

        let cow_array = CowArray::from(img_array.into_dyn());
        let input_tensor = Value::from_array(self.session.allocator(), &cow_array)?;
        let outputs = self.session.run(vec![input_tensor])?;

        let mut faces = self.parse_detections(&outputs)?;

        let scale_x = orig_width / self.input_width as f32;
        let scale_y = orig_height / self.input_height as f32;
        for face in &mut faces {
            face.x1 *= scale_x;
            face.x2 *= scale_x;
            face.y1 *= scale_y;
            face.y2 *= scale_y;
        }

        Ok(faces)
    }

    fn image_to_array(&self, img: &DynamicImage) -> Array4<f32> {
        let gray = img.to_luma8();
        let width = gray.width() as usize;
        let height = gray.height() as usize;
        let raw = gray.as_raw();
        let mut array = Array4::<f32>::zeros((1, 3, height, width));

        let norm_factor = 1.0 / 255.0;
        for y in 0..height {
            let row_offset = y * width;
            for x in 0..width {
                let pixel_value = raw[row_offset + x] as f32 * norm_factor;
                array[[0, 0, y, x]] = pixel_value;
                array[[0, 1, y, x]] = pixel_value;
                array[[0, 2, y, x]] = pixel_value;
            }
        }

        array
    }

    fn parse_detections(&self, outputs: &[Value]) -> Result<Vec<Detection>> {
        let Some(first) = outputs.first() else {
            return Ok(Vec::new());
        };
        let output = first.try_extract::<f32>()?.view().to_owned();
        let shape = output.shape().to_vec();
        let values = output
            .as_slice()
            .ok_or_else(|| BridgeError::Engine("Detector output is not contiguous".into()))?;

        // YOLO-style output: [1, N, 5+] or transposed [1, 5+, N]
        let (num_predictions, prediction_length, transposed) = match shape.as_slice() {
            [_, a, b] if b > a && *a <= 10 => (*b, *a, true),
            [_, a, b] => (*a, *b, false),
            [a, b] => (*a, *b, false),
            other => {
                tracing::warn!("Unexpected detector output shape: {:?}", other);
                return Ok(Vec::new());
            }
        };
        if prediction_length < 5 {
            return Ok(Vec::new());
        }

        let at = |i: usize, k: usize| {
            if transposed {
                values[k * num_predictions + i]
            } else {
                values[i * prediction_length + k]
            }
        };

        let mut faces = Vec::new();
        for i in 0..num_predictions {
            let (cx, cy, w, h, confidence) = (at(i, 0), at(i, 1), at(i, 2), at(i, 3), at(i, 4));
            if confidence <= 0.001 {
                continue;
            }

            // Normalized coordinates are scaled to the model input
            let scale = if cx > 1.0 || cy > 1.0 || w > 1.0 || h > 1.0 {
                1.0
            } else {
                self.input_width as f32
            };
            let (cx, cy, w, h) = (cx * scale, cy * scale, w * scale, h * scale);

            let detection = Detection {
                x1: (cx - w / 2.0).max(0.0),
                y1: (cy - h / 2.0).max(0.0),
                x2: (cx + w / 2.0).min(self.input_width as f32),
                y2: (cy + h / 2.0).min(self.input_height as f32),
                confidence,
            };
            if detection.width() > MIN_BOX_SIZE && detection.height() > MIN_BOX_SIZE {
                faces.push(detection);
            }
        }

        let mut faces = apply_nms(faces, NMS_IOU_THRESHOLD);
        faces.retain(|face| face.confidence >= self.confidence);
        faces.truncate(MAX_DETECTIONS);
        Ok(faces)
    }
}

pub(crate) fn optimization_level(level: u32) -> GraphOptimizationLevel {
    match level {
        0 => GraphOptimizationLevel::Disable,
        1 => GraphOptimizationLevel::Level1,
        2 => GraphOptimizationLevel::Level2,
        _ => GraphOptimizationLevel::Level3,
    }
}

/// Greedy non-maximum suppression; output is sorted by confidence.
pub fn apply_nms(mut boxes: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    boxes.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut keep: Vec<Detection> = Vec::new();
    for candidate in boxes {
        if keep.iter().all(|kept| kept.iou(&candidate) < iou_threshold) {
            keep.push(candidate);
        }
    }
    keep
}
