// Core modules
pub mod common;
pub mod core;
pub mod codec;
pub mod engine;
pub mod storage;
pub mod bridge;
pub mod service;

// Re-export commonly used types
pub use common::{BridgeError, Config, DevMode, Result};
pub use crate::core::{
    Attachment, Bearing, Face, FaceTemplate, FrameImage, ImageScratch, SessionKind, SessionResult,
    SessionSettings,
};
pub use codec::{DataUri, ImageEncoding};
pub use engine::{EngineFactory, FaceEngine, OnnxEngineFactory, ScoreRange};
pub use bridge::{BridgeContext, CallerHandle, CommandResponse, CommandRouter, SessionPhase};
