//! PNG sequence writer
//!
//! Writes each frame as `frame-NNNNNN.png` inside a directory and records the
//! per-frame timestamps in `manifest.json` when the writer is closed. Readable
//! with nothing but a PNG decoder.

use super::writer::{check_dimensions, VideoWriter};
use crate::frame::Frame;
use crate::snapshot::save_png;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Extension that selects this writer
pub const SEQUENCE_EXTENSION: &str = "frames";

const MANIFEST_FILE: &str = "manifest.json";

/// One written frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SequenceEntry {
    pub file: String,
    pub timestamp_ms: f64,
}

/// Contents of `manifest.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SequenceManifest {
    pub width: u32,
    pub height: u32,
    pub frames: Vec<SequenceEntry>,
}

/// Read the manifest of a closed sequence
pub fn read_manifest(path: &Path) -> io::Result<SequenceManifest> {
    let content = fs::read_to_string(path.join(MANIFEST_FILE))?;
    serde_json::from_str(&content).map_err(io::Error::from)
}

pub struct PngSequenceWriter {
    dir: PathBuf,
    manifest: SequenceManifest,
    closed: bool,
}

impl PngSequenceWriter {
    pub fn create(dir: &Path, width: u32, height: u32) -> io::Result<Self> {
        fs::create_dir_all(dir)?;
        tracing::info!("Writing PNG sequence {}x{} to {:?}", width, height, dir);

        Ok(Self {
            dir: dir.to_path_buf(),
            manifest: SequenceManifest {
                width,
                height,
                frames: Vec::new(),
            },
            closed: false,
        })
    }
}

impl VideoWriter for PngSequenceWriter {
    fn write_frame_at(&mut self, frame: &Frame, timestamp: Duration) -> io::Result<()> {
        if self.closed {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "writer is closed"));
        }
        check_dimensions(frame, self.manifest.width, self.manifest.height)?;

        let file = format!("frame-{:06}.png", self.manifest.frames.len());
        save_png(frame, &self.dir.join(&file))?;
        self.manifest.frames.push(SequenceEntry {
            file,
            timestamp_ms: timestamp.as_secs_f64() * 1000.0,
        });
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let content = serde_json::to_string_pretty(&self.manifest)?;
        fs::write(self.dir.join(MANIFEST_FILE), content)?;
        tracing::info!(
            "PNG sequence finished: {} frames in {:?}",
            self.manifest.frames.len(),
            self.dir
        );
        Ok(())
    }
}

impl Drop for PngSequenceWriter {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!("Failed to close PNG sequence {:?}: {}", self.dir, e);
        }
    }
}
