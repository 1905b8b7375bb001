//! Synthetic test-pattern source
//!
//! Generates frames on a dedicated producer thread at a fixed rate. The
//! pattern alternates between one second of a moving block and one second of
//! a still scene, so motion detection flips on a predictable rhythm.

use super::catalog::DeviceLeases;
use super::traits::{
    join_producer, CaptureBackend, CaptureStream, Device, Resolution, StopHandle, StreamCallback,
    StreamEvent,
};
use crate::frame::{Frame, PixelFormat};
use crate::utils::error::{CameraError, CameraResult};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Device id exposed by [`SyntheticBackend`]
pub const SYNTHETIC_DEVICE_ID: &str = "synthetic:0";

/// Backend exposing a single generated "Test Pattern" device
pub struct SyntheticBackend {
    resolution: Resolution,
    fps: u32,
    leases: DeviceLeases,
}

impl SyntheticBackend {
    pub fn new(width: u32, height: u32, fps: u32) -> Self {
        Self {
            resolution: Resolution { width, height },
            fps: fps.max(1),
            leases: DeviceLeases::new(),
        }
    }
}

impl CaptureBackend for SyntheticBackend {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn enumerate(&self) -> CameraResult<Vec<Device>> {
        Ok(vec![Device::new(SYNTHETIC_DEVICE_ID, "Test Pattern")])
    }

    fn leases(&self) -> &DeviceLeases {
        &self.leases
    }

    fn open(&self, device: &Device) -> CameraResult<Box<dyn CaptureStream>> {
        if device.id != SYNTHETIC_DEVICE_ID {
            return Err(CameraError::DeviceUnavailable(format!(
                "unknown device '{}'",
                device.id
            )));
        }

        Ok(Box::new(SyntheticStream {
            resolution: self.resolution,
            fps: self.fps,
            stop: None,
            worker: None,
        }))
    }
}

struct SyntheticStream {
    resolution: Resolution,
    fps: u32,
    stop: Option<StopHandle>,
    worker: Option<JoinHandle<()>>,
}

impl CaptureStream for SyntheticStream {
    fn start(&mut self, callback: StreamCallback, stop: StopHandle) -> CameraResult<()> {
        // Reap a previous producer that halted itself.
        self.stop();

        let resolution = self.resolution;
        let fps = self.fps;
        let interval = Duration::from_secs_f64(1.0 / fps as f64);
        let thread_stop = stop.clone();

        let handle = std::thread::Builder::new()
            .name("synthetic-capture".to_string())
            .spawn(move || {
                let mut index: u64 = 0;
                let started = Instant::now();
                tracing::debug!(
                    "Synthetic capture started: {}x{} @ {}fps",
                    resolution.width,
                    resolution.height,
                    fps
                );

                while !thread_stop.is_signalled() {
                    let tick = Instant::now();
                    let frame = render_pattern(resolution, fps, index, tick);
                    callback(StreamEvent::Frame(&frame));
                    index += 1;

                    let elapsed = tick.elapsed();
                    if elapsed < interval {
                        std::thread::sleep(interval - elapsed);
                    }
                }

                tracing::debug!(
                    "Synthetic capture produced {} frames in {:.2}s",
                    index,
                    started.elapsed().as_secs_f64()
                );
            })?;

        self.stop = Some(stop);
        self.worker = Some(handle);
        Ok(())
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
        Some(self.resolution)
    }
}

impl Drop for SyntheticStream {
    fn drop(&mut self) {
        self.stop();
    }
}

const BLOCK: u32 = 16;

/// Grey field with a white block that moves during even seconds
fn render_pattern(resolution: Resolution, fps: u32, index: u64, at: Instant) -> Frame {
    let Resolution { width, height } = resolution;
    let second = index / fps as u64;
    let moving = second % 2 == 0;
    let anchor = if moving { index } else { second * fps as u64 };

    let span_x = width.saturating_sub(BLOCK).max(1) as u64;
    let block_x = ((anchor * 4) % span_x) as u32;
    let block_y = height.saturating_sub(BLOCK) / 2;

    let mut data = Vec::with_capacity(width as usize * height as usize * 3);
    for y in 0..height {
        for x in 0..width {
            let inside = x >= block_x && x < block_x + BLOCK && y >= block_y && y < block_y + BLOCK;
            let v = if inside { 255 } else { 96 };
            data.extend_from_slice(&[v, v, v]);
        }
    }

    Frame::new(width, height, PixelFormat::Rgb, data, at)
        .unwrap_or_else(|_| Frame::filled(width, height, [96, 96, 96], at))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_pattern_moves_then_holds() {
        let resolution = Resolution { width: 64, height: 32 };
        let now = Instant::now();

        let a = render_pattern(resolution, 10, 0, now);
        let b = render_pattern(resolution, 10, 1, now);
        assert_ne!(a.data(), b.data());

        let c = render_pattern(resolution, 10, 11, now);
        let d = render_pattern(resolution, 10, 12, now);
        assert_eq!(c.data(), d.data());
    }

    #[test]
    fn test_no_frames_after_stop() {
        let backend = SyntheticBackend::new(32, 24, 100);
        let device = backend.enumerate().unwrap().remove(0);
        let mut stream = backend.open(&device).unwrap();

        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        stream
            .start(
                Arc::new(move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
                StopHandle::new(),
            )
            .unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while count.load(Ordering::SeqCst) < 3 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        stream.stop();

        let after_stop = count.load(Ordering::SeqCst);
        assert!(after_stop >= 3);
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(count.load(Ordering::SeqCst), after_stop);
    }

    #[test]
    fn test_rejects_foreign_device() {
        let backend = SyntheticBackend::new(8, 8, 5);
        let result = backend.open(&Device::new("video0", "Other"));
        assert!(matches!(result, Err(CameraError::DeviceUnavailable(_))));
    }
}
