use directories::ProjectDirs;
use std::path::PathBuf;

// System locations used when no --dev data dir is given

pub fn system_user_data_dir() -> PathBuf {
    PathBuf::from("/var/lib/face-bridge/users")
}

pub fn system_frames_dir() -> PathBuf {
    PathBuf::from("/var/lib/face-bridge/frames")
}

pub fn system_config_file() -> PathBuf {
    PathBuf::from("/etc/face-bridge/face-bridge.toml")
}

pub fn system_models_dir() -> PathBuf {
    PathBuf::from("/usr/share/face-bridge/models")
}

/// Per-user config, e.g. `~/.config/face-bridge/face-bridge.toml` on Linux.
pub fn user_config_file() -> Option<PathBuf> {
    ProjectDirs::from("org", "face-bridge", "face-bridge")
        .map(|dirs| dirs.config_dir().join("face-bridge.toml"))
}
