use image::DynamicImage;
use std::fs;
use std::path::{Path, PathBuf};
use crate::common::{BridgeError, Result};

const FRAME_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// A decoded frame plus the bytes it was decoded from.
pub struct Frame {
    pub image: DynamicImage,
    pub encoded: Vec<u8>,
}

/// Supplies frames to a capture flow.
pub trait FrameSource: Send {
    /// `None` once the source is exhausted.
    fn next_frame(&mut self) -> Result<Option<Frame>>;
}

/// Plays back the still images of a directory in file-name order.
pub struct DirectoryFrameSource {
    files: std::vec::IntoIter<PathBuf>,
}

impl DirectoryFrameSource {
    pub fn open(dir: &Path) -> Result<Self> {
        if !dir.is_dir() {
            return Err(BridgeError::Engine(format!("Frames directory not found: {:?}", dir)));
        }

        let mut files = Vec::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            let is_frame = path
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| FRAME_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
                .unwrap_or(false);
            if is_frame {
                files.push(path);
            }
        }
        files.sort();
        tracing::debug!("Frame source {:?} holds {} frames", dir, files.len());

        Ok(Self { files: files.into_iter() })
    }
}

impl FrameSource for DirectoryFrameSource {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let Some(path) = self.files.next() else {
            return Ok(None);
        };
        let encoded = fs::read(&path)?;
        let image = image::load_from_memory(&encoded)?;
        Ok(Some(Frame { image, encoded }))
    }
}
