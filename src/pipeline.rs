//! Frame pipeline
//!
//! Runs on the producer thread for every delivered frame: copy the source
//! buffer, write it to the recording (if any), classify it, and queue a
//! display copy. Everything except the display hand-off completes before
//! the producer's callback returns, so recorded frames and detection updates
//! keep arrival order.

use crate::capture::session::SessionHalt;
use crate::display::DisplayHandle;
use crate::frame::Frame;
use crate::motion::{DetectionResult, MotionClassifier, IDLE_TEXT};
use crate::recorder::{RecordingController, RecordingSummary};
use crate::utils::error::{CameraError, CameraResult};
use serde::Serialize;
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use tokio::sync::watch;

/// Detection state exposed to the UI
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionStatus {
    pub text: &'static str,
    pub result: Option<DetectionResult>,
    /// Number of frames classified so far
    pub frames: u64,
}

impl Default for DetectionStatus {
    fn default() -> Self {
        Self {
            text: IDLE_TEXT,
            result: None,
            frames: 0,
        }
    }
}

pub struct FramePipeline {
    classifier: Box<dyn MotionClassifier>,
    recorder: RecordingController,
    display: DisplayHandle,
    detection: watch::Sender<DetectionStatus>,
    halt: Option<SessionHalt>,
    last_dimensions: Option<(u32, u32)>,
}

impl FramePipeline {
    pub fn new(
        classifier: Box<dyn MotionClassifier>,
        recorder: RecordingController,
        display: DisplayHandle,
    ) -> (Self, watch::Receiver<DetectionStatus>) {
        let (detection, detection_rx) = watch::channel(DetectionStatus::default());
        let pipeline = Self {
            classifier,
            recorder,
            display,
            detection,
            halt: None,
            last_dimensions: None,
        };
        (pipeline, detection_rx)
    }

    /// Bind the pipeline to a running capture session
    pub fn attach(&mut self, halt: SessionHalt) {
        self.halt = Some(halt);
        self.last_dimensions = None;
    }

    /// Forget the capture session
    pub fn detach(&mut self) {
        self.halt = None;
    }

    /// Whether frames should still be processed
    pub fn is_active(&self) -> bool {
        self.halt.as_ref().is_some_and(SessionHalt::is_running)
    }

    pub fn recorder(&self) -> &RecordingController {
        &self.recorder
    }

    pub fn recorder_mut(&mut self) -> &mut RecordingController {
        &mut self.recorder
    }

    pub fn display(&self) -> &DisplayHandle {
        &self.display
    }

    /// Size of the last frame seen
    pub fn last_dimensions(&self) -> Option<(u32, u32)> {
        self.last_dimensions
    }

    /// Process one frame
    pub fn process(&mut self, source: &Frame) -> CameraResult<DetectionResult> {
        // The producer may reuse its buffer as soon as we return.
        let frame = source.clone();
        self.last_dimensions = Some(frame.dimensions());

        if self.recorder.is_recording() {
            self.recorder.write_frame(&frame)?;
        }

        let result = DetectionResult::classify(self.classifier.score(&frame));
        self.detection.send_modify(|status| {
            status.text = result.label.text();
            status.result = Some(result);
            status.frames += 1;
        });

        self.display.present(frame.to_display())?;
        Ok(result)
    }

    /// [`process`](Self::process), with panics turned into `PipelineFailure`
    pub fn process_guarded(&mut self, source: &Frame) -> CameraResult<DetectionResult> {
        match catch_unwind(AssertUnwindSafe(|| self.process(source))) {
            Ok(result) => result,
            Err(payload) => Err(CameraError::Pipeline(panic_message(payload.as_ref()))),
        }
    }

    /// Tear down after a failed frame
    ///
    /// Halts the capture session, closes any recording (keeping the file)
    /// and clears the display. Returns the summary of the recording that was
    /// closed, if any.
    pub fn abort(&mut self) -> Option<RecordingSummary> {
        if let Some(halt) = self.halt.take() {
            halt.halt();
        }

        let summary = match self.recorder.stop() {
            Ok(summary) => summary,
            Err(e) => {
                tracing::error!("Failed to close recording during abort: {}", e);
                None
            }
        };

        self.display.clear();
        summary
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panic: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panic: {}", s)
    } else {
        "panic during frame processing".to_string()
    }
}
