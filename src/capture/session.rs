//! Capture session
//!
//! Owns the bound device and its stream, and is the only thing that starts or
//! stops frame delivery.

use super::catalog::{DeviceCatalog, DeviceLease};
use super::traits::{CaptureStream, Device, Resolution, StopHandle, StreamCallback};
use crate::utils::error::{CameraError, CameraResult};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Whether the session is delivering frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureState {
    Stopped,
    Running,
}

impl Default for CaptureState {
    fn default() -> Self {
        Self::Stopped
    }
}

/// Lock-free way to take a running session down from any thread
///
/// Clears the running flag, so the frame gate closes immediately, and tells
/// the producer to stop. Joining the producer is left to the next
/// [`CaptureSession::stop`].
#[derive(Debug, Clone)]
pub struct SessionHalt {
    running: Arc<AtomicBool>,
    stop: StopHandle,
}

impl SessionHalt {
    pub fn halt(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.stop.signal();
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

struct BoundDevice {
    stream: Box<dyn CaptureStream>,
    // Dropped after the stream so the device is released last.
    lease: DeviceLease,
}

/// The active binding to a capture device
pub struct CaptureSession {
    catalog: DeviceCatalog,
    bound: Option<BoundDevice>,
    halt: Option<SessionHalt>,
}

impl CaptureSession {
    pub fn new(catalog: DeviceCatalog) -> Self {
        Self {
            catalog,
            bound: None,
            halt: None,
        }
    }

    /// Bind to `device`, releasing any previously bound device first
    pub fn open(&mut self, device: &Device) -> CameraResult<()> {
        if self.device() == Some(device) {
            return Ok(());
        }

        self.close();
        let (lease, stream) = self.catalog.acquire(device)?;
        tracing::info!("Opened capture device '{}' ({})", device.name, device.id);
        self.bound = Some(BoundDevice { stream, lease });
        Ok(())
    }

    /// Start delivering frames to `callback`
    ///
    /// Starting a running session is a no-op that returns the current halt
    /// handle. A session that was halted, or whose producer died, is stopped
    /// first so the old producer is reaped before a new one starts.
    pub fn start(&mut self, callback: StreamCallback) -> CameraResult<SessionHalt> {
        let running = self.state() == CaptureState::Running;
        let Some(bound) = self.bound.as_mut() else {
            return Err(CameraError::NoDeviceSelected);
        };

        if let Some(halt) = self.halt.take() {
            if running {
                self.halt = Some(halt.clone());
                return Ok(halt);
            }
            halt.halt();
            bound.stream.stop();
        }

        let halt = SessionHalt {
            running: Arc::new(AtomicBool::new(true)),
            stop: StopHandle::new(),
        };

        let gate = halt.running.clone();
        let gated: StreamCallback = Arc::new(move |event| {
            if gate.load(Ordering::SeqCst) {
                callback(event);
            }
        });

        if let Err(e) = bound.stream.start(gated, halt.stop.clone()) {
            halt.halt();
            tracing::error!("Failed to start capture on '{}': {}", bound.lease.device().name, e);
            return Err(e);
        }

        tracing::info!("Capture started on '{}'", bound.lease.device().name);
        self.halt = Some(halt.clone());
        Ok(halt)
    }

    /// Stop delivering frames
    ///
    /// Idempotent. After this returns no new frame callback begins.
    pub fn stop(&mut self) {
        let was_running = self.state() == CaptureState::Running;

        if let Some(halt) = self.halt.take() {
            halt.halt();
        }
        if let Some(bound) = self.bound.as_mut() {
            bound.stream.stop();
            if was_running {
                tracing::info!("Capture stopped on '{}'", bound.lease.device().name);
            }
        }
    }

    /// Stop and release the device
    pub fn close(&mut self) {
        self.stop();
        if let Some(bound) = self.bound.take() {
            tracing::debug!("Closing capture device '{}'", bound.lease.device().name);
        }
    }

    /// `Running` only while the session is started and its producer is alive
    pub fn state(&self) -> CaptureState {
        let producing = self.bound.as_ref().is_some_and(|b| b.stream.is_producing());
        match &self.halt {
            Some(halt) if halt.is_running() && producing => CaptureState::Running,
            _ => CaptureState::Stopped,
        }
    }

    pub fn device(&self) -> Option<&Device> {
        self.bound.as_ref().map(|b| b.lease.device())
    }

    pub fn resolution(&self) -> Option<Resolution> {
        self.bound.as_ref().and_then(|b| b.stream.resolution())
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::catalog::DeviceLeases;
    use crate::capture::manual::ManualBackend;
    use crate::frame::Frame;
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    fn manual_session() -> (CaptureSession, crate::capture::manual::ManualFeed, Device) {
        let backend = ManualBackend::new();
        let feed = backend.add_device("cam0", "Cam0", Resolution { width: 2, height: 2 });
        let catalog = DeviceCatalog::new(Arc::new(backend));
        let device = catalog.enumerate().unwrap().remove(0);
        (CaptureSession::new(catalog), feed, device)
    }

    #[test]
    fn test_start_without_device() {
        let (mut session, _, _) = manual_session();
        let result = session.start(Arc::new(|_| {}));
        assert!(matches!(result, Err(CameraError::NoDeviceSelected)));
        assert_eq!(session.state(), CaptureState::Stopped);
    }

    #[test]
    fn test_lifecycle() {
        let (mut session, feed, device) = manual_session();
        session.open(&device).unwrap();
        assert_eq!(session.resolution(), Some(Resolution { width: 2, height: 2 }));

        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        session
            .start(Arc::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
        assert_eq!(session.state(), CaptureState::Running);

        let frame = Frame::filled(2, 2, [0, 0, 0], Instant::now());
        feed.push(&frame);
        session.stop();
        feed.push(&frame);

        assert_eq!(session.state(), CaptureState::Stopped);
        assert_eq!(count.load(Ordering::SeqCst), 1);

        // stop twice is harmless
        session.stop();
    }

    #[test]
    fn test_halt_closes_gate_immediately() {
        let (mut session, feed, device) = manual_session();
        session.open(&device).unwrap();

        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        let halt = session
            .start(Arc::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();

        halt.halt();
        assert_eq!(session.state(), CaptureState::Stopped);
        feed.push(&Frame::filled(2, 2, [0, 0, 0], Instant::now()));
        assert_eq!(count.load(Ordering::SeqCst), 0);

        // Restart after a halt
        session.start(Arc::new(|_| {})).unwrap();
        assert_eq!(session.state(), CaptureState::Running);
    }

    /// Stream that only counts lifecycle calls
    struct CountingStream {
        starts: Arc<AtomicUsize>,
        stops: Arc<AtomicUsize>,
    }

    impl CaptureStream for CountingStream {
        fn start(&mut self, _callback: StreamCallback, _stop: StopHandle) -> CameraResult<()> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn stop(&mut self) {
            self.stops.fetch_add(1, Ordering::SeqCst);
        }

        fn is_producing(&self) -> bool {
            true
        }

        fn resolution(&self) -> Option<Resolution> {
            None
        }
    }

    #[derive(Default)]
    struct CountingBackend {
        starts: Arc<AtomicUsize>,
        stops: Arc<AtomicUsize>,
        leases: DeviceLeases,
    }

    impl crate::capture::CaptureBackend for CountingBackend {
        fn name(&self) -> &str {
            "counting"
        }

        fn enumerate(&self) -> CameraResult<Vec<Device>> {
            Ok(vec![Device::new("c0", "Counter")])
        }

        fn leases(&self) -> &DeviceLeases {
            &self.leases
        }

        fn open(&self, _device: &Device) -> CameraResult<Box<dyn CaptureStream>> {
            Ok(Box::new(CountingStream {
                starts: self.starts.clone(),
                stops: self.stops.clone(),
            }))
        }
    }

    #[test]
    fn test_restart_after_halt_stops_old_producer() {
        let backend = Arc::new(CountingBackend::default());
        let (starts, stops) = (backend.starts.clone(), backend.stops.clone());
        let mut session = CaptureSession::new(DeviceCatalog::new(backend));
        session.open(&Device::new("c0", "Counter")).unwrap();

        let halt = session.start(Arc::new(|_| {})).unwrap();
        // Starting a running session does nothing
        session.start(Arc::new(|_| {})).unwrap();
        assert_eq!(starts.load(Ordering::SeqCst), 1);
        assert_eq!(stops.load(Ordering::SeqCst), 0);

        halt.halt();
        session.start(Arc::new(|_| {})).unwrap();
        assert_eq!(stops.load(Ordering::SeqCst), 1);
        assert_eq!(starts.load(Ordering::SeqCst), 2);
        assert_eq!(session.state(), CaptureState::Running);
    }

    #[test]
    fn test_state_follows_producer_exit() {
        let (mut session, feed, device) = manual_session();
        session.open(&device).unwrap();
        let halt = session.start(Arc::new(|_| {})).unwrap();
        assert_eq!(session.state(), CaptureState::Running);

        feed.disconnect();
        assert_eq!(session.state(), CaptureState::Stopped);
        // The halt flag alone still reads as running; the session does not
        assert!(halt.is_running());

        session.start(Arc::new(|_| {})).unwrap();
        assert_eq!(session.state(), CaptureState::Running);
        assert!(!halt.is_running());
    }

    #[test]
    fn test_close_releases_device() {
        let (mut session, _, device) = manual_session();
        session.open(&device).unwrap();
        assert!(session.catalog.is_in_use(&device));
        session.close();
        assert!(!session.catalog.is_in_use(&device));
        assert!(session.device().is_none());
    }
}
