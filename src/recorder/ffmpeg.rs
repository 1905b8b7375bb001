//! FFmpeg video writer
//!
//! Pipes raw RGBA frames into an `ffmpeg` child process. FFmpeg's rawvideo
//! input has no per-frame timestamps, so frames are placed onto the constant
//! output frame grid: gaps are filled by repeating the previous frame and a
//! frame that lands on an already written slot is dropped.

use super::writer::{check_dimensions, VideoWriter};
use crate::frame::Frame;
use serde::{Deserialize, Serialize};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::time::Duration;

/// Encoder settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FfmpegSettings {
    /// Path or name of the ffmpeg binary
    pub binary: String,
    /// Output frame rate
    pub fps: u32,
    /// H.264 / VP9 constant rate factor
    pub crf: u8,
}

impl Default for FfmpegSettings {
    fn default() -> Self {
        Self {
            binary: "ffmpeg".to_string(),
            fps: 30,
            crf: 18,
        }
    }
}

/// Codec arguments for an output extension
fn codec_args(extension: &str, crf: u8) -> Vec<String> {
    let args: Vec<&str> = match extension {
        "webm" => vec!["-c:v", "libvpx-vp9", "-b:v", "0", "-crf"],
        "avi" => vec!["-c:v", "mjpeg", "-q:v", "3"],
        "mp4" | "mov" | "m4v" => vec![
            "-c:v", "libx264", "-preset", "veryfast", "-pix_fmt", "yuv420p", "-movflags",
            "+faststart", "-crf",
        ],
        _ => vec!["-c:v", "libx264", "-preset", "veryfast", "-pix_fmt", "yuv420p", "-crf"],
    };

    let mut args: Vec<String> = args.into_iter().map(String::from).collect();
    if args.last().map(String::as_str) == Some("-crf") {
        args.push(crf.to_string());
    }
    args
}

/// What to do with a frame given the slots already written
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotPlan {
    /// The frame's slot is already filled
    Drop,
    /// Repeat the previous frame `repeat_previous` times, then write this one
    Write { repeat_previous: u64 },
}

fn plan_slot(slots_written: u64, timestamp: Duration, fps: u32) -> SlotPlan {
    let slot = (timestamp.as_secs_f64() * fps as f64).round() as u64;
    if slot < slots_written {
        SlotPlan::Drop
    } else {
        SlotPlan::Write {
            repeat_previous: slot - slots_written,
        }
    }
}

pub struct FfmpegWriter {
    process: Option<Child>,
    stdin: Option<BufWriter<ChildStdin>>,
    path: PathBuf,
    width: u32,
    height: u32,
    fps: u32,
    slots_written: u64,
    previous: Vec<u8>,
}

impl FfmpegWriter {
    /// Start an ffmpeg process encoding `width`x`height` RGBA into `path`
    pub fn spawn(settings: &FfmpegSettings, path: &Path, width: u32, height: u32) -> io::Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let fps = settings.fps.max(1);
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();

        let mut args = vec![
            "-y".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            "-f".to_string(),
            "rawvideo".to_string(),
            "-pix_fmt".to_string(),
            "rgba".to_string(),
            "-s".to_string(),
            format!("{}x{}", width, height),
            "-r".to_string(),
            fps.to_string(),
            "-i".to_string(),
            "-".to_string(),
            // yuv420p needs even dimensions
            "-vf".to_string(),
            "pad=ceil(iw/2)*2:ceil(ih/2)*2".to_string(),
        ];
        args.extend(codec_args(&extension, settings.crf));
        args.push(path.to_string_lossy().to_string());

        tracing::info!("Starting FFmpeg writer: {} {:?}", settings.binary, args);

        let mut process = Command::new(&settings.binary)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()?;

        let stdin = process
            .stdin
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "failed to capture FFmpeg stdin"))?;

        Ok(Self {
            process: Some(process),
            stdin: Some(BufWriter::new(stdin)),
            path: path.to_path_buf(),
            width,
            height,
            fps,
            slots_written: 0,
            previous: Vec::new(),
        })
    }
}

impl VideoWriter for FfmpegWriter {
    fn write_frame_at(&mut self, frame: &Frame, timestamp: Duration) -> io::Result<()> {
        check_dimensions(frame, self.width, self.height)?;
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "writer is closed"))?;

        let rgba = frame.to_rgba();
        match plan_slot(self.slots_written, timestamp, self.fps) {
            SlotPlan::Drop => {}
            SlotPlan::Write { repeat_previous } => {
                if !self.previous.is_empty() {
                    for _ in 0..repeat_previous {
                        stdin.write_all(&self.previous)?;
                    }
                    self.slots_written += repeat_previous;
                }
                stdin.write_all(&rgba)?;
                self.slots_written += 1;
            }
        }

        self.previous = rgba;
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        // Dropping stdin signals EOF to FFmpeg
        if let Some(mut stdin) = self.stdin.take() {
            stdin.flush()?;
        }

        let Some(process) = self.process.take() else {
            return Ok(());
        };

        let output = process.wait_with_output()?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(io::Error::new(
                io::ErrorKind::Other,
                format!("FFmpeg exited with {}: {}", output.status, stderr.trim()),
            ));
        }

        tracing::info!(
            "FFmpeg writer finished: {} frames at {}fps into {:?}",
            self.slots_written,
            self.fps,
            self.path
        );
        Ok(())
    }
}

impl Drop for FfmpegWriter {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!("Failed to finalise {:?}: {}", self.path, e);
        }
    }
}
