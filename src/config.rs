//! Configuration
//!
//! Loaded from a camelCase JSON file; every field has a default so an empty
//! object is a valid configuration.

use crate::recorder::FfmpegSettings;
use crate::utils::error::{CameraError, CameraResult};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CameraConfig {
    /// Preferred device id; the first enumerated device otherwise
    pub device_id: Option<String>,

    /// Directory for timestamped recordings and snapshots
    pub output_dir: PathBuf,

    /// Recording file extension (`frames` for a PNG sequence)
    pub container: String,

    pub ffmpeg: FfmpegSettings,

    /// Synthetic source settings
    pub synthetic_fps: u32,
    pub synthetic_width: u32,
    pub synthetic_height: u32,

    /// How long the command-line runner captures for
    pub capture_seconds: u64,

    /// Start recording as soon as capture starts (command-line runner)
    pub record_on_start: bool,

    /// Save a snapshot before stopping (command-line runner)
    pub snapshot_on_exit: bool,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device_id: None,
            output_dir: std::env::temp_dir().join("motioncam"),
            container: "mp4".to_string(),
            ffmpeg: FfmpegSettings::default(),
            synthetic_fps: 15,
            synthetic_width: 320,
            synthetic_height: 240,
            capture_seconds: 5,
            record_on_start: false,
            snapshot_on_exit: false,
        }
    }
}

impl CameraConfig {
    /// Read a configuration file
    pub fn load(path: &Path) -> CameraResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| CameraError::Config(format!("cannot read {:?}: {}", path, e)))?;
        let config: CameraConfig = serde_json::from_str(&content)
            .map_err(|e| CameraError::Config(format!("invalid {:?}: {}", path, e)))?;

        tracing::debug!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Read `path` if given, defaults otherwise
    pub fn load_or_default(path: Option<&Path>) -> CameraResult<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    /// `recording-YYYYMMDD-HHMMSS.<container>` inside the output directory
    pub fn recording_path(&self, at: DateTime<Local>) -> PathBuf {
        self.output_dir.join(format!(
            "recording-{}.{}",
            at.format("%Y%m%d-%H%M%S"),
            self.container
        ))
    }

    /// `snapshot-YYYYMMDD-HHMMSS.png` inside the output directory
    pub fn snapshot_path(&self, at: DateTime<Local>) -> PathBuf {
        self.output_dir
            .join(format!("snapshot-{}.png", at.format("%Y%m%d-%H%M%S")))
    }
}
