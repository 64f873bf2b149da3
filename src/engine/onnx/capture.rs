use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use crate::common::{BridgeError, Result};
use crate::core::{Attachment, FrameImage, SessionResult, SessionSettings};
use crate::engine::onnx::frames::FrameSource;
use crate::engine::onnx::recognizer::{cosine_similarity, embedding_from_bytes, Embedding};
use crate::engine::onnx::EngineCore;
use crate::engine::{CaptureControl, CaptureObserver, CaptureOutcome, ScoreRange};
use crate::storage::UserStore;

/// Cancels a running capture by flag; the capture thread checks it per frame.
pub struct CaptureFlag(pub(crate) Arc<AtomicBool>);

impl CaptureControl for CaptureFlag {
    fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

pub(crate) struct CaptureJob {
    pub core: Arc<EngineCore>,
    pub settings: SessionSettings,
    pub frames: Box<dyn FrameSource>,
    pub cancelled: Arc<AtomicBool>,
    pub interval: Duration,
}

impl CaptureJob {
    pub fn run(mut self, observer: Box<dyn CaptureObserver>) {
        let kind = self.settings.kind();
        let outcome = match self.collect() {
            Ok(None) => CaptureOutcome::Canceled,
            Ok(Some(attachments)) => CaptureOutcome::Finished(self.finish(attachments)),
            Err(e) => {
                tracing::warn!("Capture for {} session failed: {}", kind, e);
                CaptureOutcome::Finished(SessionResult::failed(e.to_string()))
            }
        };
        observer.complete(outcome);
    }

    /// `Ok(None)` when canceled.
    fn collect(&mut self) -> Result<Option<Vec<Attachment>>> {
        let deadline = Instant::now()
            .checked_add(self.settings.expiry())
            .ok_or_else(|| BridgeError::Engine("Session expiry is out of range".into()))?;
        let wanted = self.settings.results_to_collect() as usize;
        let wants_templates = self.settings.wants_templates();
        let mut attachments = Vec::new();

        while attachments.len() < wanted {
            if self.cancelled.load(Ordering::SeqCst) {
                return Ok(None);
            }
            if Instant::now() >= deadline {
                return Err(BridgeError::Engine(
                    "Session expired before enough faces were captured".into(),
                ));
            }

            let Some(frame) = self.frames.next_frame()? else {
                return Err(BridgeError::Engine(
                    "Frame source ran out before enough faces were captured".into(),
                ));
            };

            let Some(face) = self.core.detect_faces(&frame.image, 1)?.into_iter().next() else {
                std::thread::sleep(self.interval);
                continue;
            };

            let template = if wants_templates {
                Some(self.core.extract_template(&frame.image, &face)?)
            } else {
                None
            };

            let bearing = self.settings.bearing_for_step(attachments.len());
            tracing::debug!("Captured face {} of {} ({})", attachments.len() + 1, wanted, bearing);
            attachments.push(Attachment {
                face,
                template,
                bearing,
                image: Some(FrameImage::from_bytes(frame.encoded)),
            });

            std::thread::sleep(self.interval);
        }

        Ok(Some(attachments))
    }

    fn finish(&self, attachments: Vec<Attachment>) -> SessionResult {
        let outcome = apply_to_store(
            &self.core.store,
            self.core.score_range,
            self.core.template_version,
            &self.settings,
            &attachments,
        );
        match outcome {
            Ok(()) => SessionResult::completed(attachments),
            Err(message) => SessionResult::failed(message),
        }
    }
}

/// Registers the captured templates or matches them against the stored ones.
/// `Err` carries the message of the error result.
pub(crate) fn apply_to_store(
    store: &UserStore,
    score_range: ScoreRange,
    template_version: i32,
    settings: &SessionSettings,
    attachments: &[Attachment],
) -> std::result::Result<(), String> {
    let embeddings = attachments
        .iter()
        .filter_map(|attachment| attachment.template.as_ref())
        .map(|template| embedding_from_bytes(&template.data))
        .collect::<Result<Vec<Embedding>>>()
        .map_err(|e| e.to_string())?;

    match settings {
        SessionSettings::Registration(settings) => {
            let count = store
                .add_templates(
                    &settings.user_id,
                    template_version,
                    embeddings,
                    settings.append_if_user_exists,
                )
                .map_err(|e| e.to_string())?;
            tracing::info!("Registered {} with {} templates", settings.user_id, count);
            Ok(())
        }
        SessionSettings::Authentication(settings) => {
            let record = store
                .get_user(&settings.user_id)
                .map_err(|e| e.to_string())?
                .ok_or_else(|| format!("User {} is not registered", settings.user_id))?;
            if record.template_version != template_version {
                return Err(format!(
                    "User {} has templates of version {}, expected {}",
                    settings.user_id, record.template_version, template_version
                ));
            }

            // Same scale as `compare`
            let max = score_range.max;
            let best = embeddings
                .iter()
                .flat_map(|captured| {
                    record.templates.iter().map(move |stored| {
                        (cosine_similarity(captured, stored) as f64 * max).clamp(0.0, max)
                    })
                })
                .fold(None, |best: Option<f64>, score| Some(best.map_or(score, |b| b.max(score))));

            let Some(best) = best else {
                return Err(format!("No templates to authenticate {} with", settings.user_id));
            };
            tracing::info!("Authentication of {}: best score {:.3}", settings.user_id, best);
            if best < score_range.authentication_threshold {
                Err(format!("Authentication of {} failed", settings.user_id))
            } else {
                Ok(())
            }
        }
        SessionSettings::LivenessDetection(_) => Ok(()),
    }
}
