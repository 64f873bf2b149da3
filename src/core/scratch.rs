use std::fs;
use std::io::Write;
use std::path::Path;
use tempfile::TempDir;
use crate::common::Result;
use crate::core::types::FrameImage;

/// Scoped directory that receives image bytes decoded from session results.
///
/// Every stored file is owned by the returned `FrameImage` and deleted when the
/// last clone of it is dropped; the directory itself is removed when the
/// scratch space is dropped. Frames must not be read after that.
#[derive(Debug)]
pub struct ImageScratch {
    dir: TempDir,
}

impl ImageScratch {
    pub fn new() -> Result<Self> {
        let dir = tempfile::Builder::new().prefix("face-bridge-").tempdir()?;
        Ok(Self { dir })
    }

    pub fn new_in(parent: &Path) -> Result<Self> {
        fs::create_dir_all(parent)?;
        let dir = tempfile::Builder::new().prefix("face-bridge-").tempdir_in(parent)?;
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn store(&self, bytes: &[u8], extension: &str) -> Result<FrameImage> {
        let suffix = format!(".{}", extension);
        let mut file = tempfile::Builder::new()
            .prefix("frame-")
            .suffix(&suffix)
            .tempfile_in(self.dir.path())?;
        file.write_all(bytes)?;
        file.flush()?;
        Ok(FrameImage::from_scratch(file.into_temp_path()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file_count(dir: &Path) -> usize {
        fs::read_dir(dir).unwrap().count()
    }

    #[test]
    fn test_store_writes_file_and_reads_back() {
        let scratch = ImageScratch::new().unwrap();
        let frame = scratch.store(b"jpeg bytes", "jpg").unwrap();

        let path = frame.path().unwrap().to_path_buf();
        assert!(path.exists());
        assert_eq!(path.extension().unwrap(), "jpg");
        assert_eq!(frame.bytes().unwrap().to_vec(), b"jpeg bytes".to_vec());
    }

    #[test]
    fn test_file_removed_when_last_clone_dropped() {
        let scratch = ImageScratch::new().unwrap();
        let frame = scratch.store(b"abc", "png").unwrap();
        let clone = frame.clone();
        let path = frame.path().unwrap().to_path_buf();

        drop(frame);
        assert!(path.exists());
        drop(clone);
        assert!(!path.exists());
        assert_eq!(file_count(scratch.path()), 0);
    }

    #[test]
    fn test_new_in_creates_parent() {
        let parent = tempfile::tempdir().unwrap();
        let nested = parent.path().join("a").join("b");
        let scratch = ImageScratch::new_in(&nested).unwrap();
        assert!(scratch.path().starts_with(&nested));
    }
}
