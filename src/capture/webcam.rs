//! Webcam capture using nokhwa
//!
//! The camera is opened on its own producer thread (nokhwa cameras are not
//! `Send` on every platform) and each frame is decoded to RGB before it is
//! handed to the callback.

use super::catalog::DeviceLeases;
use super::traits::{
    join_producer, CaptureBackend, CaptureStream, Device, Resolution, StopHandle, StreamCallback,
    StreamEvent,
};
use crate::frame::{Frame, PixelFormat};
use crate::utils::error::{CameraError, CameraResult};
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{ApiBackend, CameraIndex, RequestedFormat, RequestedFormatType};
use nokhwa::Camera;
use parking_lot::Mutex;
use std::sync::{Arc, OnceLock};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;

/// Native webcam backend
#[derive(Default)]
pub struct WebcamBackend;

impl WebcamBackend {
    pub fn new() -> Self {
        Self
    }
}

/// Consecutive capture or decode errors tolerated before the stream gives up
const MAX_CONSECUTIVE_FAILURES: u32 = 30;

/// Pause between retries after a failed read
const RETRY_DELAY: Duration = Duration::from_millis(10);

/// Counts consecutive read failures; any good frame resets it
#[derive(Debug, Default)]
struct FailureBudget {
    consecutive: u32,
}

impl FailureBudget {
    /// Record a failure; `true` once the budget is spent
    fn fail(&mut self) -> bool {
        self.consecutive += 1;
        self.consecutive >= MAX_CONSECUTIVE_FAILURES
    }

    fn succeed(&mut self) {
        self.consecutive = 0;
    }
}

fn camera_index(id: &str) -> CameraIndex {
    match id.parse::<u32>() {
        Ok(idx) => CameraIndex::Index(idx),
        Err(_) => CameraIndex::String(id.to_string()),
    }
}

impl CaptureBackend for WebcamBackend {
    fn name(&self) -> &str {
        "webcam"
    }

    fn enumerate(&self) -> CameraResult<Vec<Device>> {
        match nokhwa::query(ApiBackend::Auto) {
            Ok(cameras) => Ok(cameras
                .into_iter()
                .map(|info| {
                    let id = match info.index() {
                        CameraIndex::Index(i) => i.to_string(),
                        CameraIndex::String(s) => s.to_string(),
                    };
                    Device::new(id, info.human_name())
                })
                .collect()),
            Err(e) => {
                tracing::warn!("Failed to enumerate cameras: {:?}", e);
                Ok(Vec::new())
            }
        }
    }

    fn leases(&self) -> &DeviceLeases {
        // Physical cameras are process-wide, whichever backend value opens them
        static LEASES: OnceLock<DeviceLeases> = OnceLock::new();
        LEASES.get_or_init(DeviceLeases::new)
    }

    fn open(&self, device: &Device) -> CameraResult<Box<dyn CaptureStream>> {
        let known = self.enumerate()?;
        if !known.iter().any(|d| d.id == device.id) {
            return Err(CameraError::DeviceUnavailable(format!(
                "camera '{}' is not connected",
                device.name
            )));
        }

        Ok(Box::new(WebcamStream {
            index: camera_index(&device.id),
            resolution: Arc::new(Mutex::new(None)),
            stop: None,
            worker: None,
        }))
    }
}

struct WebcamStream {
    index: CameraIndex,
    resolution: Arc<Mutex<Option<Resolution>>>,
    stop: Option<StopHandle>,
    worker: Option<JoinHandle<()>>,
}

impl CaptureStream for WebcamStream {
    fn start(&mut self, callback: StreamCallback, stop: StopHandle) -> CameraResult<()> {
        self.stop();

        let index = self.index.clone();
        let resolution = self.resolution.clone();
        let thread_stop = stop.clone();
        let (opened_tx, opened_rx) = oneshot::channel::<CameraResult<()>>();

        let handle = std::thread::Builder::new()
            .name("webcam-capture".to_string())
            .spawn(move || {
                let format =
                    RequestedFormat::new::<RgbFormat>(RequestedFormatType::AbsoluteHighestFrameRate);

                let mut camera = match Camera::new(index.clone(), format) {
                    Ok(c) => c,
                    Err(e) => {
                        let _ = opened_tx.send(Err(CameraError::DeviceUnavailable(format!(
                            "failed to open camera {:?}: {}",
                            index, e
                        ))));
                        return;
                    }
                };

                if let Err(e) = camera.open_stream() {
                    let _ = opened_tx.send(Err(CameraError::DeviceUnavailable(format!(
                        "failed to open camera stream: {}",
                        e
                    ))));
                    return;
                }

                let camera_format = camera.camera_format();
                *resolution.lock() = Some(Resolution {
                    width: camera_format.resolution().width(),
                    height: camera_format.resolution().height(),
                });
                tracing::info!(
                    "Webcam opened: {}x{} @ {}fps, format={:?}",
                    camera_format.resolution().width(),
                    camera_format.resolution().height(),
                    camera_format.frame_rate(),
                    camera_format.format()
                );
                let _ = opened_tx.send(Ok(()));

                let mut frame_count: u64 = 0;
                let mut failures = FailureBudget::default();
                let mut last_error = String::new();
                while !thread_stop.is_signalled() {
                    // Blocks until the camera delivers the next frame
                    let decoded = camera
                        .frame()
                        .map_err(|e| format!("capture failed: {}", e))
                        .and_then(|buffer| {
                            let captured_at = Instant::now();
                            buffer
                                .decode_image::<RgbFormat>()
                                .map(|image| (image, captured_at))
                                .map_err(|e| format!("decode failed: {}", e))
                        })
                        .and_then(|(image, captured_at)| {
                            let (width, height) = (image.width(), image.height());
                            Frame::new(width, height, PixelFormat::Rgb, image.into_raw(), captured_at)
                                .map_err(|e| e.to_string())
                        });

                    match decoded {
                        Ok(frame) => {
                            failures.succeed();
                            if thread_stop.is_signalled() {
                                break;
                            }
                            callback(StreamEvent::Frame(&frame));
                            frame_count += 1;
                        }
                        Err(e) => {
                            tracing::debug!("Webcam read failed: {}", e);
                            last_error = e;
                            if failures.fail() {
                                break;
                            }
                            std::thread::sleep(RETRY_DELAY);
                        }
                    }
                }

                if !thread_stop.is_signalled() {
                    tracing::error!(
                        "Webcam gave up after {} consecutive failures: {}",
                        MAX_CONSECUTIVE_FAILURES,
                        last_error
                    );
                    callback(StreamEvent::Fault(CameraError::DeviceUnavailable(format!(
                        "camera stopped delivering frames: {}",
                        last_error
                    ))));
                }

                if let Err(e) = camera.stop_stream() {
                    tracing::warn!("Error stopping camera stream: {:?}", e);
                }
                tracing::info!("Webcam capture thread stopped after {} frames", frame_count);
            })?;

        self.stop = Some(stop);
        self.worker = Some(handle);

        match opened_rx.blocking_recv() {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                self.stop();
                Err(e)
            }
            Err(_) => {
                self.stop();
                Err(CameraError::DeviceUnavailable(
                    "camera thread exited before opening".to_string(),
                ))
            }
        }
    }

    fn stop(&mut self) {
        if let Some(stop) = self.stop.take() {
            stop.signal();
        }
        if let Some(handle) = self.worker.take() {
            join_producer(handle);
        }
    }

    fn is_producing(&self) -> bool {
        self.worker.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    fn resolution(&self) -> Option<Resolution> {
        *self.resolution.lock()
    }
}

impl Drop for WebcamStream {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_budget_resets_on_success() {
        let mut budget = FailureBudget::default();
        for _ in 0..MAX_CONSECUTIVE_FAILURES - 1 {
            assert!(!budget.fail());
        }
        budget.succeed();
        assert!(!budget.fail());

        for _ in 0..MAX_CONSECUTIVE_FAILURES - 2 {
            budget.fail();
        }
        assert!(budget.fail());
    }

    #[test]
    fn test_camera_index_parsing() {
        assert_eq!(camera_index("2"), CameraIndex::Index(2));
        assert_eq!(
            camera_index("/dev/video0"),
            CameraIndex::String("/dev/video0".to_string())
        );
    }
}
