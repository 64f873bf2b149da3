use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use tempfile::TempPath;
use crate::common::{BridgeError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct FaceBounds {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// Head pose in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct HeadAngle {
    pub yaw: f64,
    pub pitch: f64,
    pub roll: f64,
}

/// A detected face as produced by the engine. `data` is the engine's opaque
/// detection blob and is carried through the bridge untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct Face {
    pub bounds: FaceBounds,
    pub left_eye: Point,
    pub right_eye: Point,
    pub angle: HeadAngle,
    pub quality: f64,
    pub data: Vec<u8>,
}

/// Opaque recognition data. Only templates with compatible versions can be
/// compared, and only the engine knows which versions are compatible.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaceTemplate {
    pub data: Vec<u8>,
    pub version: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Bearing {
    Straight,
    Left,
    Right,
    Up,
    Down,
    LeftUp,
    RightUp,
    LeftDown,
    RightDown,
}

impl Bearing {
    pub const ALL: [Bearing; 9] = [
        Bearing::Straight,
        Bearing::Left,
        Bearing::Right,
        Bearing::Up,
        Bearing::Down,
        Bearing::LeftUp,
        Bearing::RightUp,
        Bearing::LeftDown,
        Bearing::RightDown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Bearing::Straight => "STRAIGHT",
            Bearing::Left => "LEFT",
            Bearing::Right => "RIGHT",
            Bearing::Up => "UP",
            Bearing::Down => "DOWN",
            Bearing::LeftUp => "LEFT_UP",
            Bearing::RightUp => "RIGHT_UP",
            Bearing::LeftDown => "LEFT_DOWN",
            Bearing::RightDown => "RIGHT_DOWN",
        }
    }
}

impl fmt::Display for Bearing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Bearing {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self> {
        Bearing::ALL
            .iter()
            .copied()
            .find(|bearing| bearing.as_str() == s)
            .ok_or_else(|| BridgeError::Schema(format!("unknown bearing `{}`", s)))
    }
}

/// A captured frame. Either held in memory or backed by a file in an
/// `ImageScratch` directory; the file goes away with the last clone.
#[derive(Debug, Clone)]
pub struct FrameImage {
    data: FrameData,
}

#[derive(Debug, Clone)]
enum FrameData {
    Memory(Arc<[u8]>),
    Scratch(Arc<TempPath>),
}

impl FrameImage {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { data: FrameData::Memory(bytes.into()) }
    }

    pub(crate) fn from_scratch(path: TempPath) -> Self {
        Self { data: FrameData::Scratch(Arc::new(path)) }
    }

    /// Location on disk for scratch-backed frames.
    pub fn path(&self) -> Option<&Path> {
        match &self.data {
            FrameData::Memory(_) => None,
            FrameData::Scratch(path) => {
                let path: &Path = path;
                Some(path)
            }
        }
    }

    pub fn bytes(&self) -> Result<Cow<'_, [u8]>> {
        match &self.data {
            FrameData::Memory(bytes) => Ok(Cow::Borrowed(bytes.as_ref())),
            FrameData::Scratch(path) => {
                let path: &Path = path;
                Ok(Cow::Owned(std::fs::read(path)?))
            }
        }
    }
}

/// One capture step's outcome.
#[derive(Debug, Clone)]
pub struct Attachment {
    pub face: Face,
    pub template: Option<FaceTemplate>,
    pub bearing: Bearing,
    pub image: Option<FrameImage>,
}

#[derive(Debug, Clone)]
pub enum SessionResult {
    /// Never empty.
    Attachments(Vec<Attachment>),
    Error(String),
}

impl SessionResult {
    /// Wraps collected attachments; a capture that collected nothing is an error result.
    pub fn completed(attachments: Vec<Attachment>) -> Self {
        if attachments.is_empty() {
            SessionResult::Error("Session finished without collecting a face".into())
        } else {
            SessionResult::Attachments(attachments)
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        SessionResult::Error(message.into())
    }

    pub fn attachments(&self) -> &[Attachment] {
        match self {
            SessionResult::Attachments(attachments) => attachments,
            SessionResult::Error(_) => &[],
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            SessionResult::Error(message) => Some(message),
            SessionResult::Attachments(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bearing_labels_round_trip() {
        for bearing in Bearing::ALL {
            assert_eq!(bearing.as_str().parse::<Bearing>().unwrap(), bearing);
        }
    }

    #[test]
    fn test_unknown_bearing_is_schema_error() {
        let err = "SIDEWAYS".parse::<Bearing>().unwrap_err();
        assert!(matches!(err, BridgeError::Schema(_)));
        assert!("straight".parse::<Bearing>().is_err());
    }

    #[test]
    fn test_bearing_serde_matches_wire_labels() {
        let json = serde_json::to_string(&Bearing::RightDown).unwrap();
        assert_eq!(json, "\"RIGHT_DOWN\"");
    }

    #[test]
    fn test_empty_completion_becomes_error() {
        let result = SessionResult::completed(vec![]);
        assert!(result.error().is_some());
        assert!(result.attachments().is_empty());
    }

    #[test]
    fn test_memory_frame_has_no_path() {
        let frame = FrameImage::from_bytes(vec![1, 2, 3]);
        assert!(frame.path().is_none());
        assert_eq!(frame.bytes().unwrap().to_vec(), vec![1u8, 2, 3]);
    }
}
