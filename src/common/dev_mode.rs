use std::path::{Path, PathBuf};
use std::fs;
use crate::common::config::Config;
use crate::common::error::Result;

/// Local data layout for `--dev` runs. Everything lands under one base directory
/// instead of the system locations.
#[derive(Debug, Clone)]
pub struct DevMode {
    enabled: bool,
    base_dir: PathBuf,
}

impl DevMode {
    pub fn new(enabled: bool) -> Result<Self> {
        Self::with_base_dir(enabled, PathBuf::from("./dev_data"))
    }

    pub fn with_base_dir(enabled: bool, base_dir: PathBuf) -> Result<Self> {
        if enabled {
            fs::create_dir_all(base_dir.join("users"))?;
            fs::create_dir_all(base_dir.join("frames"))?;
            fs::create_dir_all(base_dir.join("scratch"))?;
            fs::create_dir_all(base_dir.join("config"))?;

            tracing::info!("Development mode enabled - data will be saved to: {}",
                     base_dir.display());
        }

        Ok(Self { enabled, base_dir })
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn config_file(&self) -> PathBuf {
        self.base_dir.join("config").join("face-bridge.toml")
    }

    /// Points the user store, the capture frames and the image scratch space at
    /// the dev directories. No-op when disabled.
    pub fn apply(&self, config: &mut Config) {
        if !self.enabled {
            return;
        }
        config.storage.users_dir = self.base_dir.join("users");
        config.capture.frames_dir = self.base_dir.join("frames");
        config.images.scratch_dir = Some(self.base_dir.join("scratch"));
        tracing::debug!("Dev mode paths applied under {:?}", self.base_dir);
    }
}
