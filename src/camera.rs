//! Camera controller
//!
//! The public face of the crate: device selection, capture start/stop,
//! recording start/stop, snapshots, and the observable detection and error
//! state. Wires the capture session to the frame pipeline.

use crate::capture::{
    CaptureBackend, CaptureSession, CaptureState, Device, DeviceCatalog, StreamCallback,
    StreamEvent,
};
use crate::config::CameraConfig;
use crate::display::{display_channel, DisplayHandle, DisplayQueue, DisplaySink, DisplayThread};
use crate::frame::Frame;
use crate::motion::{BackgroundModelDetector, MotionClassifier};
use crate::pipeline::{DetectionStatus, FramePipeline};
use crate::recorder::{
    DefaultWriterFactory, RecordingController, RecordingSession, RecordingState,
    RecordingSummary, WriterFactory,
};
use crate::snapshot;
use crate::utils::error::{CameraError, CameraResult, ErrorResponse};
use chrono::Local;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use tokio::sync::{broadcast, watch};

/// Events emitted by the controller
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum CameraEvent {
    CaptureStarted { device: Device },
    CaptureStopped,
    RecordingStarted { path: PathBuf },
    RecordingStopped { summary: RecordingSummary },
    Error { error: ErrorResponse },
}

struct Inner {
    catalog: DeviceCatalog,
    config: CameraConfig,
    devices: RwLock<Vec<Device>>,
    selected: RwLock<Option<Device>>,
    // Lock order: session before pipeline.
    session: Mutex<CaptureSession>,
    pipeline: Mutex<FramePipeline>,
    display: DisplayHandle,
    detection: watch::Receiver<DetectionStatus>,
    events: broadcast::Sender<CameraEvent>,
    last_error: RwLock<Option<ErrorResponse>>,
}

impl Inner {
    fn emit(&self, event: CameraEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn report(&self, error: &CameraError) {
        let response = ErrorResponse::from(error);
        *self.last_error.write() = Some(response.clone());
        self.emit(CameraEvent::Error { error: response });
    }

    fn surface<T>(&self, result: CameraResult<T>) -> CameraResult<T> {
        if let Err(e) = &result {
            tracing::warn!("{}", e);
            self.report(e);
        }
        result
    }

    /// Producer-thread entry point
    fn on_frame(&self, frame: &Frame) {
        let mut pipeline = self.pipeline.lock();
        if !pipeline.is_active() {
            return;
        }

        if let Err(e) = pipeline.process_guarded(frame) {
            tracing::error!("Error on new frame, stopping capture: {}", e);
            let summary = pipeline.abort();
            drop(pipeline);

            self.report(&e);
            if let Some(summary) = summary {
                self.emit(CameraEvent::RecordingStopped { summary });
            }
            self.emit(CameraEvent::CaptureStopped);
        }
    }

    /// The device stopped producing
    fn on_fault(&self, error: CameraError) {
        let mut pipeline = self.pipeline.lock();
        if !pipeline.is_active() {
            return;
        }

        tracing::error!("Capture device failed, stopping capture: {}", error);
        let summary = pipeline.abort();
        drop(pipeline);

        self.report(&error);
        if let Some(summary) = summary {
            self.emit(CameraEvent::RecordingStopped { summary });
        }
        self.emit(CameraEvent::CaptureStopped);
    }
}

fn stream_callback(inner: Weak<Inner>) -> StreamCallback {
    Arc::new(move |event| {
        let Some(inner) = inner.upgrade() else {
            return;
        };
        match event {
            StreamEvent::Frame(frame) => inner.on_frame(frame),
            StreamEvent::Fault(error) => inner.on_fault(error),
        }
    })
}

/// Builder for [`CameraController`]
pub struct CameraControllerBuilder {
    backend: Arc<dyn CaptureBackend>,
    config: CameraConfig,
    classifier: Option<Box<dyn MotionClassifier>>,
    writers: Option<Arc<dyn WriterFactory>>,
    sink: Option<Box<dyn DisplaySink>>,
}

impl CameraControllerBuilder {
    pub fn config(mut self, config: CameraConfig) -> Self {
        self.config = config;
        self
    }

    /// Motion classifier (background-model detector by default)
    pub fn classifier(mut self, classifier: impl MotionClassifier + 'static) -> Self {
        self.classifier = Some(Box::new(classifier));
        self
    }

    /// Writer factory (chosen from the file extension by default)
    pub fn writers(mut self, writers: Arc<dyn WriterFactory>) -> Self {
        self.writers = Some(writers);
        self
    }

    /// Present frames on a dedicated display thread
    ///
    /// Without a sink the host drains [`CameraController::take_display_queue`]
    /// from its own UI loop.
    pub fn display_sink(mut self, sink: impl DisplaySink) -> Self {
        self.sink = Some(Box::new(sink));
        self
    }

    pub fn build(self) -> CameraResult<CameraController> {
        let writers: Arc<dyn WriterFactory> = match self.writers {
            Some(writers) => writers,
            None => Arc::new(DefaultWriterFactory::new(self.config.ffmpeg.clone())),
        };
        let classifier: Box<dyn MotionClassifier> = match self.classifier {
            Some(classifier) => classifier,
            None => Box::new(BackgroundModelDetector::new()),
        };

        let (display, queue) = display_channel();
        let (display_thread, display_queue) = match self.sink {
            Some(sink) => (Some(queue.spawn(sink)?), None),
            None => (None, Some(queue)),
        };

        let (pipeline, detection) =
            FramePipeline::new(classifier, RecordingController::new(writers), display.clone());
        let (events, _) = broadcast::channel(64);
        let catalog = DeviceCatalog::new(self.backend);

        tracing::info!("Camera controller using backend '{}'", catalog.backend_name());

        let controller = CameraController {
            inner: Arc::new(Inner {
                session: Mutex::new(CaptureSession::new(catalog.clone())),
                catalog,
                config: self.config,
                devices: RwLock::new(Vec::new()),
                selected: RwLock::new(None),
                pipeline: Mutex::new(pipeline),
                display,
                detection,
                events,
                last_error: RwLock::new(None),
            }),
            display_queue,
            display_thread,
        };

        // An empty catalog is reported, not fatal
        let _ = controller.refresh_devices();
        Ok(controller)
    }
}

/// Camera preview, motion detection and recording
pub struct CameraController {
    inner: Arc<Inner>,
    display_queue: Option<DisplayQueue>,
    display_thread: Option<DisplayThread>,
}

impl CameraController {
    pub fn builder(backend: Arc<dyn CaptureBackend>) -> CameraControllerBuilder {
        CameraControllerBuilder {
            backend,
            config: CameraConfig::default(),
            classifier: None,
            writers: None,
            sink: None,
        }
    }

    pub fn config(&self) -> &CameraConfig {
        &self.inner.config
    }

    /// Re-enumerate devices
    ///
    /// Keeps the current selection if it is still present, otherwise selects
    /// the configured device or the first one.
    pub fn refresh_devices(&self) -> CameraResult<Vec<Device>> {
        let devices = match self.inner.catalog.enumerate() {
            Ok(devices) => devices,
            Err(e) => {
                self.inner.devices.write().clear();
                *self.inner.selected.write() = None;
                return self.inner.surface(Err(e));
            }
        };

        {
            let mut selected = self.inner.selected.write();
            let preferred = self.inner.config.device_id.as_deref();
            *selected = selected
                .take()
                .filter(|current| devices.contains(current))
                .or_else(|| {
                    preferred.and_then(|id| devices.iter().find(|d| d.id == id).cloned())
                })
                .or_else(|| devices.first().cloned());

            if let Some(device) = selected.as_ref() {
                tracing::debug!("Selected device '{}'", device.name);
            }
        }

        *self.inner.devices.write() = devices.clone();
        Ok(devices)
    }

    pub fn devices(&self) -> Vec<Device> {
        self.inner.devices.read().clone()
    }

    pub fn selected_device(&self) -> Option<Device> {
        self.inner.selected.read().clone()
    }

    /// Choose the device used by the next `start_capture`
    pub fn select_device(&self, id: &str) -> CameraResult<Device> {
        let found = self.inner.devices.read().iter().find(|d| d.id == id).cloned();
        let device = self.inner.surface(
            found.ok_or_else(|| CameraError::DeviceUnavailable(format!("unknown device '{}'", id))),
        )?;

        *self.inner.selected.write() = Some(device.clone());
        Ok(device)
    }

    /// Select and bind a device, stopping capture on a different one first
    pub fn open_device(&self, id: &str) -> CameraResult<()> {
        let device = self.select_device(id)?;

        let switching = {
            let session = self.inner.session.lock();
            session.state() == CaptureState::Running && session.device() != Some(&device)
        };
        if switching {
            self.stop_capture()?;
        }

        let result = self.inner.session.lock().open(&device);
        self.inner.surface(result)
    }

    /// Start the frame feed from the selected device
    pub fn start_capture(&self) -> CameraResult<()> {
        let selected = self.inner.selected.read().clone();
        let mut session = self.inner.session.lock();
        if session.state() == CaptureState::Running {
            return Ok(());
        }

        let device = match (selected, session.device().cloned()) {
            (Some(device), _) => device,
            (None, Some(open)) => open,
            (None, None) => return self.inner.surface(Err(CameraError::NoDeviceSelected)),
        };
        // Reap a producer that halted itself or died
        session.stop();
        self.inner.surface(session.open(&device))?;

        // Hold the pipeline until it is attached so the first frame sees it
        let mut pipeline = self.inner.pipeline.lock();
        let halt = self
            .inner
            .surface(session.start(stream_callback(Arc::downgrade(&self.inner))))?;
        pipeline.attach(halt);
        drop(pipeline);
        drop(session);

        self.inner.emit(CameraEvent::CaptureStarted { device });
        Ok(())
    }

    /// Stop the frame feed
    ///
    /// Waits for an in-flight frame, closes any recording, and clears the
    /// display. Stopping a stopped controller is a no-op.
    pub fn stop_capture(&self) -> CameraResult<()> {
        let mut session = self.inner.session.lock();
        let was_running = session.state() == CaptureState::Running;
        session.stop();

        let mut pipeline = self.inner.pipeline.lock();
        pipeline.detach();
        let stopped = pipeline.recorder_mut().stop();
        pipeline.display().clear();
        drop(pipeline);
        drop(session);

        let summary = self.inner.surface(stopped)?;
        if let Some(summary) = summary {
            self.inner.emit(CameraEvent::RecordingStopped { summary });
        }
        if was_running {
            self.inner.emit(CameraEvent::CaptureStopped);
        }
        Ok(())
    }

    pub fn capture_state(&self) -> CaptureState {
        self.inner.session.lock().state()
    }

    pub fn is_running(&self) -> bool {
        self.capture_state() == CaptureState::Running
    }

    /// Start recording to `path`
    ///
    /// Needs a running capture with a known frame size.
    pub fn start_recording(&self, path: impl AsRef<Path>) -> CameraResult<RecordingSession> {
        let path = path.as_ref();
        let session = self.inner.session.lock();
        let running = session.state() == CaptureState::Running;
        let negotiated = session.resolution().map(|r| (r.width, r.height));

        let mut pipeline = self.inner.pipeline.lock();
        drop(session);

        let dimensions = if running {
            pipeline.last_dimensions().or(negotiated)
        } else {
            None
        };
        let started = pipeline
            .recorder_mut()
            .start(path, dimensions)
            .map(|session| session.clone());
        drop(pipeline);

        let started = self.inner.surface(started)?;
        self.inner.emit(CameraEvent::RecordingStarted {
            path: started.path.clone(),
        });
        Ok(started)
    }

    /// Start recording to a timestamped file in the output directory
    pub fn start_recording_timestamped(&self) -> CameraResult<RecordingSession> {
        let path = self.inner.config.recording_path(Local::now());
        self.start_recording(path)
    }

    /// Stop recording; a no-op returning `None` when idle
    pub fn stop_recording(&self) -> CameraResult<Option<RecordingSummary>> {
        let stopped = self.inner.pipeline.lock().recorder_mut().stop();
        let summary = self.inner.surface(stopped)?;
        if let Some(summary) = &summary {
            self.inner.emit(CameraEvent::RecordingStopped {
                summary: summary.clone(),
            });
        }
        Ok(summary)
    }

    pub fn recording_state(&self) -> RecordingState {
        self.inner.pipeline.lock().recorder().state()
    }

    /// Save the frame currently on display as PNG
    pub fn save_snapshot(&self, path: impl AsRef<Path>) -> CameraResult<()> {
        let result = self
            .inner
            .display
            .latest()
            .ok_or(CameraError::NoFrameAvailable)
            .and_then(|frame| Ok(snapshot::save_png(&frame, path.as_ref())?));
        self.inner.surface(result)
    }

    /// Save a snapshot to a timestamped file in the output directory
    pub fn save_snapshot_timestamped(&self) -> CameraResult<PathBuf> {
        let path = self.inner.config.snapshot_path(Local::now());
        self.save_snapshot(&path)?;
        Ok(path)
    }

    pub fn detection_status(&self) -> DetectionStatus {
        self.inner.detection.borrow().clone()
    }

    /// "Movement detected" / "nothing detected"
    pub fn detection_text(&self) -> &'static str {
        self.inner.detection.borrow().text
    }

    /// Change notifications for the detection status
    pub fn watch_detection(&self) -> watch::Receiver<DetectionStatus> {
        self.inner.detection.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CameraEvent> {
        self.inner.events.subscribe()
    }

    /// Most recent user-facing error
    pub fn last_error(&self) -> Option<ErrorResponse> {
        self.inner.last_error.read().clone()
    }

    /// Consumer end of the display queue, when no sink was configured
    pub fn take_display_queue(&mut self) -> Option<DisplayQueue> {
        self.display_queue.take()
    }

    /// Block until every frame dispatched so far has been presented
    ///
    /// With a host-drained queue this only returns once the host drains it.
    pub fn flush_display(&self) {
        self.inner.display.flush();
    }
}

impl Drop for CameraController {
    fn drop(&mut self) {
        if let Err(e) = self.stop_capture() {
            tracing::warn!("Error stopping capture on shutdown: {}", e);
        }
        self.inner.session.lock().close();
        // The display thread exits once the last display handle is gone
        self.display_thread.take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{ManualBackend, ManualFeed, Resolution, SyntheticBackend};
    use crate::frame::DisplayFrame;
    use crate::recorder::controller::tests::MemoryWriters;
    use crate::recorder::read_manifest;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, Instant};
    use tempfile::tempdir;

    /// Collects the red channel of every presented frame
    #[derive(Clone, Default)]
    struct CollectSink(Arc<Mutex<Vec<u8>>>);

    impl DisplaySink for CollectSink {
        fn present(&mut self, frame: DisplayFrame) {
            self.0.lock().push(frame.data()[2]);
        }
    }

    /// Score is the red channel of the first pixel in hundredths
    fn red_score(frame: &Frame) -> f64 {
        frame.data()[0] as f64 / 100.0
    }

    fn manual() -> (Arc<ManualBackend>, ManualFeed) {
        let backend = Arc::new(ManualBackend::new());
        let feed = backend.add_device("cam0", "Cam0", Resolution { width: 2, height: 2 });
        (backend, feed)
    }

    fn frame(red: u8, at: Instant) -> Frame {
        Frame::filled(2, 2, [red, 0, 0], at)
    }

    #[test]
    fn test_preview_scenario() {
        let (backend, feed) = manual();
        let writers = MemoryWriters::default();
        let sink = CollectSink::default();
        let controller = CameraController::builder(backend)
            .classifier(red_score)
            .writers(Arc::new(writers.clone()))
            .display_sink(sink.clone())
            .build()
            .unwrap();

        assert_eq!(controller.devices(), vec![Device::new("cam0", "Cam0")]);
        assert_eq!(controller.detection_text(), "not/Detected");

        controller.open_device("cam0").unwrap();
        controller.start_capture().unwrap();
        assert!(controller.is_running());

        let t0 = Instant::now();
        let mut texts = Vec::new();
        assert!(feed.push(&frame(1, t0)));
        texts.push(controller.detection_text());
        assert!(feed.push(&frame(5, t0 + Duration::from_millis(40))));
        texts.push(controller.detection_text());

        controller.flush_display();
        assert_eq!(*sink.0.lock(), vec![1, 5]);
        assert_eq!(texts, vec!["nothing detected", "Movement detected"]);
        assert!(writers.log.lock().opened.is_empty());

        controller.stop_capture().unwrap();
        assert!(!controller.is_running());
    }

    #[test]
    fn test_recording_scenario() {
        let (backend, feed) = manual();
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.frames");
        let controller = CameraController::builder(backend)
            .classifier(red_score)
            .display_sink(CollectSink::default())
            .build()
            .unwrap();

        controller.open_device("cam0").unwrap();
        controller.start_capture().unwrap();
        controller.start_recording(&path).unwrap();
        assert_eq!(controller.recording_state(), RecordingState::Recording);

        let t0 = Instant::now();
        feed.push(&frame(1, t0));
        feed.push(&frame(5, t0 + Duration::from_millis(40)));

        let mut events = controller.subscribe();
        controller.stop_capture().unwrap();
        assert_eq!(controller.recording_state(), RecordingState::Idle);

        let manifest = read_manifest(&path).unwrap();
        assert_eq!(manifest.frames.len(), 2);
        assert_eq!(manifest.frames[0].timestamp_ms, 0.0);
        assert!((manifest.frames[1].timestamp_ms - 40.0).abs() < 1e-6);
        for entry in &manifest.frames {
            assert!(path.join(&entry.file).exists());
        }

        match events.try_recv().unwrap() {
            CameraEvent::RecordingStopped { summary } => assert_eq!(summary.frame_count, 2),
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(matches!(events.try_recv().unwrap(), CameraEvent::CaptureStopped));
    }

    #[test]
    fn test_empty_catalog() {
        let controller = CameraController::builder(Arc::new(ManualBackend::new()))
            .display_sink(CollectSink::default())
            .build()
            .unwrap();

        assert!(matches!(controller.refresh_devices(), Err(CameraError::EmptyCatalog)));
        assert!(matches!(
            controller.start_capture(),
            Err(CameraError::NoDeviceSelected)
        ));
        assert_eq!(
            controller.last_error().map(|e| e.code),
            Some("NO_DEVICE_SELECTED".to_string())
        );
        assert!(!controller.is_running());
    }

    #[test]
    fn test_recording_requires_running_capture() {
        let (backend, _feed) = manual();
        let controller = CameraController::builder(backend)
            .writers(Arc::new(MemoryWriters::default()))
            .display_sink(CollectSink::default())
            .build()
            .unwrap();

        assert!(matches!(
            controller.start_recording("out.vid"),
            Err(CameraError::NoFrameAvailable)
        ));
        assert_eq!(controller.stop_recording().unwrap(), None);
    }

    #[test]
    fn test_second_start_recording_is_rejected() {
        let (backend, feed) = manual();
        let writers = MemoryWriters::default();
        let controller = CameraController::builder(backend)
            .classifier(red_score)
            .writers(Arc::new(writers.clone()))
            .display_sink(CollectSink::default())
            .build()
            .unwrap();

        controller.start_capture().unwrap();
        let first = controller.start_recording("a.vid").unwrap();
        assert!(matches!(
            controller.start_recording("b.vid"),
            Err(CameraError::AlreadyRecording)
        ));

        feed.push(&frame(0, Instant::now()));
        let summary = controller.stop_recording().unwrap().unwrap();
        assert_eq!(summary.id, first.id);
        assert_eq!(summary.path, PathBuf::from("a.vid"));
        assert_eq!(summary.frame_count, 1);
        assert_eq!(writers.log.lock().opened.len(), 1);
    }

    #[test]
    fn test_frame_failure_tears_down_session() {
        let (backend, feed) = manual();
        let writers = MemoryWriters::default();
        let controller = CameraController::builder(backend)
            .classifier(|frame: &Frame| {
                if frame.data()[0] == 99 {
                    panic!("classifier crashed");
                }
                0.0
            })
            .writers(Arc::new(writers.clone()))
            .display_sink(CollectSink::default())
            .build()
            .unwrap();
        let mut events = controller.subscribe();

        controller.start_capture().unwrap();
        controller.start_recording("out.vid").unwrap();
        let t0 = Instant::now();
        feed.push(&frame(1, t0));
        feed.push(&frame(99, t0 + Duration::from_millis(40)));

        // Never "running" without frames
        assert!(!controller.is_running());
        assert!(!feed.push(&frame(1, t0 + Duration::from_millis(80))));
        assert_eq!(controller.recording_state(), RecordingState::Idle);
        assert_eq!(writers.log.lock().closed, 1);
        // The crashing frame was written before classification
        assert_eq!(writers.log.lock().frames.len(), 2);
        assert_eq!(
            controller.last_error().map(|e| e.code),
            Some("PIPELINE_FAILURE".to_string())
        );

        let mut saw_error = false;
        while let Ok(event) = events.try_recv() {
            if let CameraEvent::Error { error } = event {
                assert!(error.message.contains("classifier crashed"));
                saw_error = true;
            }
        }
        assert!(saw_error);

        // A new capture can be started afterwards
        controller.start_capture().unwrap();
        assert!(feed.push(&frame(1, t0 + Duration::from_millis(120))));
        assert!(controller.is_running());
    }

    #[test]
    fn test_write_failure_stops_recording_and_capture() {
        let (backend, feed) = manual();
        let writers = MemoryWriters::default();
        writers.log.lock().fail_writes_after = Some(1);
        let controller = CameraController::builder(backend)
            .classifier(red_score)
            .writers(Arc::new(writers.clone()))
            .display_sink(CollectSink::default())
            .build()
            .unwrap();

        controller.start_capture().unwrap();
        controller.start_recording("out.vid").unwrap();
        let t0 = Instant::now();
        feed.push(&frame(0, t0));
        feed.push(&frame(0, t0 + Duration::from_millis(40)));

        assert_eq!(controller.recording_state(), RecordingState::Idle);
        assert!(!controller.is_running());
        assert_eq!(controller.last_error().map(|e| e.code), Some("IO_ERROR".to_string()));
    }

    #[test]
    fn test_stop_waits_for_frame_in_flight() {
        let (backend, feed) = manual();
        let entered = Arc::new(AtomicUsize::new(0));
        let finished = Arc::new(AtomicUsize::new(0));
        let (e, f) = (entered.clone(), finished.clone());
        let writers = MemoryWriters::default();

        let controller = CameraController::builder(backend)
            .classifier(move |_: &Frame| {
                e.fetch_add(1, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(100));
                f.fetch_add(1, Ordering::SeqCst);
                0.0
            })
            .writers(Arc::new(writers.clone()))
            .display_sink(CollectSink::default())
            .build()
            .unwrap();

        controller.start_capture().unwrap();
        controller.start_recording("out.vid").unwrap();

        let producer = std::thread::spawn(move || {
            feed.push(&frame(0, Instant::now()));
            feed
        });
        let deadline = Instant::now() + Duration::from_secs(5);
        while entered.load(Ordering::SeqCst) == 0 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(1));
        }

        controller.stop_capture().unwrap();
        assert_eq!(finished.load(Ordering::SeqCst), 1);
        assert_eq!(writers.log.lock().frames.len(), 1);
        assert_eq!(writers.log.lock().closed, 1);

        let feed = producer.join().unwrap();
        assert!(!feed.push(&frame(0, Instant::now())));
        assert_eq!(entered.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_device_fault_tears_down_session() {
        let (backend, feed) = manual();
        let writers = MemoryWriters::default();
        let controller = CameraController::builder(backend)
            .classifier(red_score)
            .writers(Arc::new(writers.clone()))
            .display_sink(CollectSink::default())
            .build()
            .unwrap();
        let mut events = controller.subscribe();

        controller.start_capture().unwrap();
        controller.start_recording("out.vid").unwrap();
        assert!(feed.push(&frame(1, Instant::now())));

        assert!(feed.fail(CameraError::DeviceUnavailable("unplugged".to_string())));
        assert!(!controller.is_running());
        assert_eq!(controller.recording_state(), RecordingState::Idle);
        assert_eq!(writers.log.lock().closed, 1);
        assert_eq!(
            controller.last_error().map(|e| e.code),
            Some("DEVICE_UNAVAILABLE".to_string())
        );

        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            seen.push(event);
        }
        assert!(matches!(seen.last(), Some(CameraEvent::CaptureStopped)));
        assert!(seen
            .iter()
            .any(|e| matches!(e, CameraEvent::RecordingStopped { summary } if summary.frame_count == 1)));

        // The device can be started again once it is back
        controller.start_capture().unwrap();
        assert!(controller.is_running());
        assert!(feed.push(&frame(1, Instant::now())));
    }

    #[test]
    fn test_silent_producer_exit_is_not_running() {
        let (backend, feed) = manual();
        let controller = CameraController::builder(backend)
            .classifier(red_score)
            .display_sink(CollectSink::default())
            .build()
            .unwrap();

        controller.start_capture().unwrap();
        feed.disconnect();
        assert!(!controller.is_running());
        assert!(!feed.push(&frame(1, Instant::now())));

        controller.start_capture().unwrap();
        assert!(controller.is_running());
        assert!(feed.push(&frame(1, Instant::now())));
        assert_eq!(controller.detection_status().frames, 1);
    }

    #[test]
    fn test_second_controller_cannot_take_busy_device() {
        let (backend, feed) = manual();
        let controller_on = |backend: Arc<ManualBackend>| {
            CameraController::builder(backend)
                .classifier(red_score)
                .display_sink(CollectSink::default())
                .build()
                .unwrap()
        };
        let first = controller_on(backend.clone());
        let second = controller_on(backend);

        first.start_capture().unwrap();
        assert!(matches!(
            second.start_capture(),
            Err(CameraError::DeviceUnavailable(_))
        ));
        assert!(!second.is_running());

        for _ in 0..5 {
            assert!(feed.push(&frame(1, Instant::now())));
        }
        assert!(first.is_running());
        assert_eq!(first.detection_status().frames, 5);
        assert_eq!(second.detection_status().frames, 0);

        // Released when the first controller goes away
        drop(first);
        second.start_capture().unwrap();
        assert!(feed.push(&frame(1, Instant::now())));
        assert_eq!(second.detection_status().frames, 1);
    }

    #[test]
    fn test_snapshot_of_displayed_frame() {
        let (backend, feed) = manual();
        let dir = tempdir().unwrap();
        let controller = CameraController::builder(backend)
            .classifier(red_score)
            .display_sink(CollectSink::default())
            .build()
            .unwrap();

        let path = dir.path().join("shot.png");
        assert!(matches!(
            controller.save_snapshot(&path),
            Err(CameraError::NoFrameAvailable)
        ));

        controller.start_capture().unwrap();
        feed.push(&frame(7, Instant::now()));
        controller.save_snapshot(&path).unwrap();
        assert!(path.exists());

        // The display is cleared on stop
        controller.stop_capture().unwrap();
        assert!(matches!(
            controller.save_snapshot(&path),
            Err(CameraError::NoFrameAvailable)
        ));
    }

    #[test]
    fn test_host_drained_display_queue() {
        let (backend, feed) = manual();
        let mut controller = CameraController::builder(backend)
            .classifier(red_score)
            .build()
            .unwrap();
        let mut queue = controller.take_display_queue().unwrap();
        assert!(controller.take_display_queue().is_none());

        controller.start_capture().unwrap();
        let t0 = Instant::now();
        for red in [3, 4, 5] {
            feed.push(&frame(red, t0));
        }

        let mut sink = CollectSink::default();
        assert_eq!(queue.drain_into(&mut sink), 3);
        assert_eq!(*sink.0.lock(), vec![3, 4, 5]);
    }

    #[test]
    fn test_select_unknown_device() {
        let (backend, _feed) = manual();
        let controller = CameraController::builder(backend)
            .display_sink(CollectSink::default())
            .build()
            .unwrap();
        assert!(matches!(
            controller.select_device("cam9"),
            Err(CameraError::DeviceUnavailable(_))
        ));
        assert_eq!(controller.selected_device().map(|d| d.id), Some("cam0".to_string()));
    }

    #[test]
    fn test_synthetic_capture_end_to_end() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("clip.frames");
        let backend = Arc::new(SyntheticBackend::new(32, 24, 100));
        let controller = CameraController::builder(backend)
            .display_sink(CollectSink::default())
            .build()
            .unwrap();

        controller.start_capture().unwrap();
        let wait_for = |frames: u64| {
            let deadline = Instant::now() + Duration::from_secs(5);
            while controller.detection_status().frames < frames && Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(5));
            }
        };

        wait_for(3);
        controller.start_recording(&path).unwrap();
        let seen = controller.detection_status().frames;
        wait_for(seen + 5);
        controller.stop_capture().unwrap();

        let after_stop = controller.detection_status().frames;
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(controller.detection_status().frames, after_stop);

        let manifest = read_manifest(&path).unwrap();
        assert!(!manifest.frames.is_empty());
        assert_eq!(manifest.frames[0].timestamp_ms, 0.0);
        assert!(manifest
            .frames
            .windows(2)
            .all(|w| w[0].timestamp_ms <= w[1].timestamp_ms));
    }
}
