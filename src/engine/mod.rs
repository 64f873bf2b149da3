//! The seam between the bridge and a face detection/recognition engine.

pub mod onnx;

use image::DynamicImage;
use std::sync::Arc;
use crate::common::Result;
use crate::core::{Face, FaceTemplate, SessionResult, SessionSettings};

pub use onnx::{OnnxEngineFactory, OnnxFaceEngine};

/// Score bounds reported alongside every comparison. Engines may change them
/// between versions, so callers never hard-code them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreRange {
    pub authentication_threshold: f64,
    pub max: f64,
}

/// How a capture flow ended.
#[derive(Debug)]
pub enum CaptureOutcome {
    /// The flow ran to completion. The result may still be an error result.
    Finished(SessionResult),
    /// The user or the bridge aborted the flow.
    Canceled,
}

/// Receives the single outcome of a capture flow.
pub trait CaptureObserver: Send {
    fn complete(self: Box<Self>, outcome: CaptureOutcome);
}

/// Handle on a running capture flow.
pub trait CaptureControl: Send {
    fn cancel(&self);
}

/// A constructed engine. Calls may arrive concurrently from several requests;
/// implementations that are not reentrant serialize internally.
pub trait FaceEngine: Send + Sync {
    /// Detects up to `limit` faces, best first.
    fn detect_faces(&self, image: &DynamicImage, limit: usize) -> Result<Vec<Face>>;

    fn extract_template(&self, image: &DynamicImage, face: &Face) -> Result<FaceTemplate>;

    fn compare(&self, first: &FaceTemplate, second: &FaceTemplate) -> Result<f64>;

    fn score_range(&self) -> ScoreRange;

    fn registered_users(&self) -> Result<Vec<String>>;

    fn delete_user(&self, user_id: &str) -> Result<()>;

    /// Starts a capture flow. `observer` is completed exactly once, possibly
    /// from another thread, unless starting fails.
    fn start_capture(
        &self,
        settings: SessionSettings,
        observer: Box<dyn CaptureObserver>,
    ) -> Result<Box<dyn CaptureControl>>;

    fn set_testing_mode(&self, _enabled: bool) {}

    /// Releases engine resources before the bridge drops its reference.
    fn unload(&self) {}
}

/// Builds engines. Construction may be slow and always runs on a worker thread.
pub trait EngineFactory: Send + Sync {
    fn create(&self, credential: Option<&str>) -> Result<Arc<dyn FaceEngine>>;
}
