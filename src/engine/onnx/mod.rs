//! Face engine built on ONNX Runtime models and a bincode user store.

pub mod capture;
pub mod detector;
pub mod frames;
pub mod recognizer;

use image::DynamicImage;
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use crate::common::{BridgeError, Config, Result};
use crate::core::{Face, FaceBounds, FaceTemplate, HeadAngle, Point, SessionSettings};
use crate::engine::{CaptureControl, CaptureObserver, EngineFactory, FaceEngine, ScoreRange};
use crate::storage::UserStore;
use capture::{CaptureFlag, CaptureJob};
use detector::{Detection, FaceDetector};
use frames::{DirectoryFrameSource, FrameSource};
use recognizer::{cosine_similarity, embedding_from_bytes, embedding_to_bytes, FaceRecognizer};

// Eye positions relative to the detection box
const EYE_LINE: f64 = 0.38;
const LEFT_EYE_X: f64 = 0.3;
const RIGHT_EYE_X: f64 = 0.7;

/// Shared by the engine and its capture threads.
pub(crate) struct EngineCore {
    detector: Mutex<FaceDetector>,
    recognizer: Mutex<FaceRecognizer>,
    pub(crate) store: UserStore,
    pub(crate) template_version: i32,
    pub(crate) score_range: ScoreRange,
}

impl EngineCore {
    pub(crate) fn detect_faces(&self, image: &DynamicImage, limit: usize) -> Result<Vec<Face>> {
        let detections = {
            let detector = self
                .detector
                .lock()
                .map_err(|_| BridgeError::Engine("Detector lock poisoned".into()))?;
            detector.detect(image)?
        };

        detections
            .iter()
            .take(limit)
            .map(face_from_detection)
            .collect()
    }

    pub(crate) fn extract_template(&self, image: &DynamicImage, face: &Face) -> Result<FaceTemplate> {
        let region = face_region(image, &face.bounds).ok_or_else(|| {
            BridgeError::TemplateExtraction("Face lies outside the image".into())
        })?;

        let embedding = {
            let recognizer = self
                .recognizer
                .lock()
                .map_err(|_| BridgeError::Engine("Recognizer lock poisoned".into()))?;
            recognizer.get_embedding(image, region)?
        };

        Ok(FaceTemplate {
            data: embedding_to_bytes(&embedding),
            version: self.template_version,
        })
    }
}

pub struct OnnxFaceEngine {
    core: Arc<EngineCore>,
    frames_dir: std::path::PathBuf,
    frame_interval: Duration,
    testing: AtomicBool,
}

impl OnnxFaceEngine {
    pub fn new(config: &Config) -> Result<Self> {
        tracing::info!("Loading face engine models");
        let detector = FaceDetector::new(config)?;
        let recognizer = FaceRecognizer::new(config)?;
        let store = UserStore::new(config.storage.users_dir.clone())
            .map_err(|e| BridgeError::EnvironmentLoad(format!("User store unavailable: {}", e)))?;

        Ok(Self {
            core: Arc::new(EngineCore {
                detector: Mutex::new(detector),
                recognizer: Mutex::new(recognizer),
                store,
                template_version: config.recognizer.template_version,
                score_range: ScoreRange {
                    authentication_threshold: config.matching.authentication_threshold,
                    max: config.matching.max_score,
                },
            }),
            frames_dir: config.capture.frames_dir.clone(),
            frame_interval: Duration::from_millis(config.capture.frame_interval_ms),
            testing: AtomicBool::new(false),
        })
    }
}

impl FaceEngine for OnnxFaceEngine {
    fn detect_faces(&self, image: &DynamicImage, limit: usize) -> Result<Vec<Face>> {
        self.core.detect_faces(image, limit)
    }

    fn extract_template(&self, image: &DynamicImage, face: &Face) -> Result<FaceTemplate> {
        self.core.extract_template(image, face)
    }

    fn compare(&self, first: &FaceTemplate, second: &FaceTemplate) -> Result<f64> {
        for template in [first, second] {
            if template.version != self.core.template_version {
                return Err(BridgeError::Engine(format!(
                    "Template version {} is not supported, expected {}",
                    template.version, self.core.template_version
                )));
            }
        }
        compare_templates(first, second, self.core.score_range.max)
    }

    fn score_range(&self) -> ScoreRange {
        self.core.score_range
    }

    fn registered_users(&self) -> Result<Vec<String>> {
        self.core.store.list_users()
    }

    fn delete_user(&self, user_id: &str) -> Result<()> {
        self.core.store.delete_user(user_id)
    }

    fn start_capture(
        &self,
        settings: SessionSettings,
        observer: Box<dyn CaptureObserver>,
    ) -> Result<Box<dyn CaptureControl>> {
        let frames: Box<dyn FrameSource> = Box::new(DirectoryFrameSource::open(&self.frames_dir)?);
        let cancelled = Arc::new(AtomicBool::new(false));
        let interval = if self.testing.load(Ordering::SeqCst) {
            Duration::ZERO
        } else {
            self.frame_interval
        };

        let job = CaptureJob {
            core: Arc::clone(&self.core),
            settings,
            frames,
            cancelled: Arc::clone(&cancelled),
            interval,
        };

        std::thread::Builder::new()
            .name("face-capture".into())
            .spawn(move || job.run(observer))?;

        Ok(Box::new(CaptureFlag(cancelled)))
    }

    fn set_testing_mode(&self, enabled: bool) {
        tracing::info!("Engine testing mode {}", if enabled { "enabled" } else { "disabled" });
        self.testing.store(enabled, Ordering::SeqCst);
    }

    fn unload(&self) {
        tracing::info!("Unloading face engine");
    }
}

/// Builds [`OnnxFaceEngine`]s, checking the caller's credential first.
pub struct OnnxEngineFactory {
    config: Config,
}

impl OnnxEngineFactory {
    pub fn new(config: Config) -> Self {
        Self { config }
    }
}

impl EngineFactory for OnnxEngineFactory {
    fn create(&self, credential: Option<&str>) -> Result<Arc<dyn FaceEngine>> {
        verify_credential(self.config.license.credential_sha256.as_deref(), credential)?;
        Ok(Arc::new(OnnxFaceEngine::new(&self.config)?))
    }
}

fn verify_credential(expected_sha256: Option<&str>, credential: Option<&str>) -> Result<()> {
    let Some(expected) = expected_sha256 else {
        return Ok(());
    };
    let credential = credential
        .ok_or_else(|| BridgeError::EnvironmentLoad("A credential is required".into()))?;

    let digest = format!("{:x}", Sha256::digest(credential.as_bytes()));
    if digest.eq_ignore_ascii_case(expected) {
        Ok(())
    } else {
        Err(BridgeError::EnvironmentLoad("Credential rejected".into()))
    }
}

/// Cosine similarity of two templates, floored at zero and capped at `max`.
pub fn compare_templates(first: &FaceTemplate, second: &FaceTemplate, max: f64) -> Result<f64> {
    if first.version != second.version {
        return Err(BridgeError::Engine(format!(
            "Cannot compare template versions {} and {}",
            first.version, second.version
        )));
    }

    let a = embedding_from_bytes(&first.data)?;
    let b = embedding_from_bytes(&second.data)?;
    if a.len() != b.len() {
        return Err(BridgeError::Engine(format!(
            "Template sizes differ: {} and {}",
            a.len(),
            b.len()
        )));
    }

    let similarity = cosine_similarity(&a, &b) as f64;
    Ok((similarity * max).clamp(0.0, max))
}

fn face_from_detection(detection: &Detection) -> Result<Face> {
    let x = detection.x1 as f64;
    let y = detection.y1 as f64;
    let width = detection.width() as f64;
    let height = detection.height() as f64;

    let data = bincode::serialize(detection)
        .map_err(|e| BridgeError::Engine(format!("Failed to serialize detection: {}", e)))?;

    Ok(Face {
        bounds: FaceBounds { x, y, width, height },
        left_eye: Point { x: x + width * LEFT_EYE_X, y: y + height * EYE_LINE },
        right_eye: Point { x: x + width * RIGHT_EYE_X, y: y + height * EYE_LINE },
        angle: HeadAngle::default(),
        quality: detection.confidence as f64,
        data,
    })
}

/// Clamps `bounds` to the image. `None` when nothing of the face remains.
fn face_region(image: &DynamicImage, bounds: &FaceBounds) -> Option<(u32, u32, u32, u32)> {
    let max_x = image.width() as f64;
    let max_y = image.height() as f64;

    let x1 = bounds.x.clamp(0.0, max_x);
    let y1 = bounds.y.clamp(0.0, max_y);
    let x2 = (bounds.x + bounds.width).clamp(0.0, max_x);
    let y2 = (bounds.y + bounds.height).clamp(0.0, max_y);

    let width = (x2 - x1).floor() as u32;
    let height = (y2 - y1).floor() as u32;
    if width == 0 || height == 0 {
        return None;
    }
    Some((x1 as u32, y1 as u32, width, height))
}
