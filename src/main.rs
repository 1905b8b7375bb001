//! Command-line runner
//!
//! `motioncam [config.json]` captures from the configured device for
//! `captureSeconds`, logging every change of the detection text, and
//! optionally records and snapshots along the way.

use anyhow::Context;
use motioncam::capture::CaptureBackend;
use motioncam::{init_tracing, CameraConfig, CameraController};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[cfg(feature = "webcam")]
fn backend(_config: &CameraConfig) -> Arc<dyn CaptureBackend> {
    Arc::new(motioncam::capture::WebcamBackend::new())
}

#[cfg(not(feature = "webcam"))]
fn backend(config: &CameraConfig) -> Arc<dyn CaptureBackend> {
    Arc::new(motioncam::capture::SyntheticBackend::new(
        config.synthetic_width,
        config.synthetic_height,
        config.synthetic_fps,
    ))
}

fn main() -> anyhow::Result<()> {
    init_tracing();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = CameraConfig::load_or_default(config_path.as_deref())
        .context("failed to load configuration")?;
    let capture_for = Duration::from_secs(config.capture_seconds);
    let record_on_start = config.record_on_start;
    let snapshot_on_exit = config.snapshot_on_exit;

    tracing::info!("Starting motioncam v{}", env!("CARGO_PKG_VERSION"));

    let controller = CameraController::builder(backend(&config))
        .config(config)
        .display_sink(motioncam::display::NullSink)
        .build()?;

    for device in controller.devices() {
        tracing::info!("Found device '{}' ({})", device.name, device.id);
    }

    controller.start_capture().context("failed to start capture")?;
    if record_on_start {
        // Recording needs the frame size, which the first frame provides
        let deadline = Instant::now() + Duration::from_secs(2);
        while controller.detection_status().frames == 0 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        let session = controller.start_recording_timestamped()?;
        tracing::info!("Recording to {:?}", session.path);
    }

    let mut detection = controller.watch_detection();
    let deadline = Instant::now() + capture_for;
    let mut last_text = "";
    while Instant::now() < deadline && controller.is_running() {
        if detection.has_changed().unwrap_or(false) {
            let text = detection.borrow_and_update().text;
            if text != last_text {
                tracing::info!("{}", text);
                last_text = text;
            }
        }
        std::thread::sleep(Duration::from_millis(50));
    }

    if snapshot_on_exit {
        match controller.save_snapshot_timestamped() {
            Ok(path) => tracing::info!("Snapshot saved to {:?}", path),
            Err(e) => tracing::warn!("Snapshot failed: {}", e),
        }
    }

    controller.stop_capture()?;
    if let Some(error) = controller.last_error() {
        tracing::warn!("Last error: [{}] {}", error.code, error.message);
    }
    Ok(())
}
