pub mod scratch;
pub mod settings;
pub mod types;

pub use scratch::ImageScratch;
pub use settings::{
    AuthenticationSettings, LivenessDetectionSettings, RegistrationSettings, SessionKind,
    SessionSettings, MAX_EXPIRY_SECONDS, MAX_RESULTS_TO_COLLECT,
};
pub use types::{
    Attachment, Bearing, Face, FaceBounds, FaceTemplate, FrameImage, HeadAngle, Point,
    SessionResult,
};
