use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use crate::common::error::{BridgeError, Result};
use crate::common::paths;

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub images: ImageConfig,
    #[serde(default)]
    pub models: ModelConfig,
    #[serde(default)]
    pub detector: DetectorConfig,
    #[serde(default)]
    pub recognizer: RecognizerConfig,
    #[serde(default)]
    pub matching: MatchingConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub license: LicenseConfig,
    #[serde(default)]
    pub performance: PerformanceConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DispatchConfig {
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,
    /// Unset means sessions never time out.
    #[serde(default)]
    pub session_timeout_seconds: Option<u64>,
}

fn default_worker_threads() -> usize { 4 }

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            worker_threads: default_worker_threads(),
            session_timeout_seconds: None,
        }
    }
}

impl DispatchConfig {
    pub fn session_timeout(&self) -> Option<Duration> {
        self.session_timeout_seconds.map(Duration::from_secs)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ImageConfig {
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: f32,
    /// Parent directory for decoded session-result images. System temp dir when unset.
    #[serde(default)]
    pub scratch_dir: Option<PathBuf>,
}

fn default_jpeg_quality() -> f32 { 0.8 }

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            jpeg_quality: default_jpeg_quality(),
            scratch_dir: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ModelConfig {
    pub detector_path: PathBuf,
    pub recognizer_path: PathBuf,
}

impl Default for ModelConfig {
    fn default() -> Self {
        let models = paths::system_models_dir();
        Self {
            detector_path: models.join("face_detector.onnx"),
            recognizer_path: models.join("face_recognizer.onnx"),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DetectorConfig {
    #[serde(default = "default_detector_input")]
    pub input_width: u32,
    #[serde(default = "default_detector_input")]
    pub input_height: u32,
    #[serde(default = "default_detection_confidence")]
    pub detection_confidence: f32,
}

fn default_detector_input() -> u32 { 640 }
fn default_detection_confidence() -> f32 { 0.5 }

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            input_width: default_detector_input(),
            input_height: default_detector_input(),
            detection_confidence: default_detection_confidence(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RecognizerConfig {
    #[serde(default = "default_recognizer_input")]
    pub input_size: u32,
    #[serde(default = "default_normalization")]
    pub normalization_value: f32,
    #[serde(default = "default_template_version")]
    pub template_version: i32,
}

fn default_recognizer_input() -> u32 { 112 }
fn default_normalization() -> f32 { 127.5 }
fn default_template_version() -> i32 { 1 }

impl Default for RecognizerConfig {
    fn default() -> Self {
        Self {
            input_size: default_recognizer_input(),
            normalization_value: default_normalization(),
            template_version: default_template_version(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MatchingConfig {
    #[serde(default = "default_auth_threshold")]
    pub authentication_threshold: f64,
    #[serde(default = "default_max_score")]
    pub max_score: f64,
}

fn default_auth_threshold() -> f64 { 0.6 }
fn default_max_score() -> f64 { 1.0 }

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            authentication_threshold: default_auth_threshold(),
            max_score: default_max_score(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StorageConfig {
    pub users_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { users_dir: paths::system_user_data_dir() }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CaptureConfig {
    pub frames_dir: PathBuf,
    #[serde(default = "default_frame_interval")]
    pub frame_interval_ms: u64,
}

fn default_frame_interval() -> u64 { 100 }

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            frames_dir: paths::system_frames_dir(),
            frame_interval_ms: default_frame_interval(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct LicenseConfig {
    /// Hex SHA-256 of the accepted `apiSecret`. No check when unset.
    #[serde(default)]
    pub credential_sha256: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PerformanceConfig {
    #[serde(default = "default_optimization_level")]
    pub optimization_level: u32,
}

fn default_optimization_level() -> u32 { 3 }

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self { optimization_level: default_optimization_level() }
    }
}

/// Project-local config read by [`Config::load`].
pub const LOCAL_CONFIG: &str = "configs/face-bridge.toml";

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from_path(std::path::Path::new(LOCAL_CONFIG))
    }

    pub fn load_from_path(path: &std::path::Path) -> Result<Self> {
        if !path.exists() {
            return Err(BridgeError::Config(format!(
                "Config file not found: {}", path.display()
            )));
        }

        tracing::info!("Loading config from: {}", path.display());
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)
            .map_err(|e| BridgeError::Config(format!("Config parse error: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.dispatch.worker_threads == 0 || self.dispatch.worker_threads > 64 {
            return Err(BridgeError::Config(format!(
                "Worker threads must be between 1 and 64, got {}", self.dispatch.worker_threads
            )));
        }
        if self.dispatch.session_timeout_seconds == Some(0) {
            return Err(BridgeError::Config(
                "Session timeout must be at least 1 second when set".into()
            ));
        }

        if !(self.images.jpeg_quality > 0.0 && self.images.jpeg_quality <= 1.0) {
            return Err(BridgeError::Config(format!(
                "JPEG quality must be in (0.0, 1.0], got {}", self.images.jpeg_quality
            )));
        }

        if self.detector.detection_confidence < 0.0 || self.detector.detection_confidence > 1.0 {
            return Err(BridgeError::Config(format!(
                "Detection confidence must be between 0.0 and 1.0, got {}",
                self.detector.detection_confidence
            )));
        }
        if self.detector.input_width == 0 || self.detector.input_width > 4096 {
            return Err(BridgeError::Config(format!(
                "Detector input width must be between 1 and 4096, got {}",
                self.detector.input_width
            )));
        }
        if self.detector.input_height == 0 || self.detector.input_height > 4096 {
            return Err(BridgeError::Config(format!(
                "Detector input height must be between 1 and 4096, got {}",
                self.detector.input_height
            )));
        }

        if self.recognizer.input_size == 0 || self.recognizer.input_size > 1024 {
            return Err(BridgeError::Config(format!(
                "Recognizer input size must be between 1 and 1024, got {}",
                self.recognizer.input_size
            )));
        }

        if self.matching.max_score <= 0.0
            || self.matching.authentication_threshold < 0.0
            || self.matching.authentication_threshold > self.matching.max_score
        {
            return Err(BridgeError::Config(format!(
                "Authentication threshold must be between 0.0 and max score {}, got {}",
                self.matching.max_score, self.matching.authentication_threshold
            )));
        }

        if let Some(ref digest) = self.license.credential_sha256 {
            if digest.len() != 64 || !digest.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(BridgeError::Config(
                    "credential_sha256 must be 64 hex characters".into()
                ));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_toml_uses_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.dispatch.worker_threads, 4);
        assert!(config.dispatch.session_timeout().is_none());
        assert!((config.images.jpeg_quality - 0.8).abs() < f32::EPSILON);
        assert_eq!(config.recognizer.template_version, 1);
    }

    #[test]
    fn test_sections_override_defaults() {
        let config = Config::from_toml(
            r#"
            [dispatch]
            worker_threads = 2
            session_timeout_seconds = 45

            [matching]
            authentication_threshold = 4.0
            max_score = 10.0
            "#,
        )
        .unwrap();
        assert_eq!(config.dispatch.worker_threads, 2);
        assert_eq!(config.dispatch.session_timeout(), Some(Duration::from_secs(45)));
        assert_eq!(config.matching.max_score, 10.0);
    }

    #[test]
    fn test_rejects_zero_workers() {
        let err = Config::from_toml("[dispatch]\nworker_threads = 0\n").unwrap_err();
        assert!(matches!(err, BridgeError::Config(_)));
    }

    #[test]
    fn test_rejects_threshold_above_max() {
        let err = Config::from_toml(
            "[matching]\nauthentication_threshold = 2.0\nmax_score = 1.0\n",
        )
        .unwrap_err();
        assert!(matches!(err, BridgeError::Config(_)));
    }

    #[test]
    fn test_rejects_malformed_credential_digest() {
        let err = Config::from_toml("[license]\ncredential_sha256 = \"abc\"\n").unwrap_err();
        assert!(matches!(err, BridgeError::Config(_)));
    }

    #[test]
    fn test_shipped_config_parses() {
        let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join(LOCAL_CONFIG);
        let config = Config::load_from_path(&path).unwrap();
        assert_eq!(config.capture.frame_interval_ms, 100);
        assert!(config.license.credential_sha256.is_none());
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let err = Config::load_from_path(std::path::Path::new("/nonexistent/face-bridge.toml"))
            .unwrap_err();
        assert!(matches!(err, BridgeError::Config(_)));
    }
}
