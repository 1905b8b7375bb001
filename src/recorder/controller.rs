//! Recording controller
//!
//! Idle/Recording state machine that decides whether frames reach a video
//! writer and stamps each one with its offset from the first written frame.

use super::state::{RecordingSession, RecordingState, RecordingSummary};
use super::writer::{VideoWriter, WriterFactory};
use crate::frame::Frame;
use crate::utils::error::{CameraError, CameraResult};
use chrono::Utc;
use std::path::Path;
use std::sync::Arc;

struct ActiveRecording {
    writer: Box<dyn VideoWriter>,
    session: RecordingSession,
}

/// Drives the video writer for the recording in progress
pub struct RecordingController {
    writers: Arc<dyn WriterFactory>,
    active: Option<ActiveRecording>,
}

impl RecordingController {
    pub fn new(writers: Arc<dyn WriterFactory>) -> Self {
        Self {
            writers,
            active: None,
        }
    }

    pub fn state(&self) -> RecordingState {
        if self.active.is_some() {
            RecordingState::Recording
        } else {
            RecordingState::Idle
        }
    }

    pub fn is_recording(&self) -> bool {
        self.active.is_some()
    }

    /// The session in progress, if any
    pub fn session(&self) -> Option<&RecordingSession> {
        self.active.as_ref().map(|a| &a.session)
    }

    /// Idle -> Recording
    ///
    /// `dimensions` are those of the frames about to be written; `None` means
    /// no frame size is known yet.
    pub fn start(&mut self, path: &Path, dimensions: Option<(u32, u32)>) -> CameraResult<&RecordingSession> {
        if self.active.is_some() {
            return Err(CameraError::AlreadyRecording);
        }
        let (width, height) = dimensions.ok_or(CameraError::NoFrameAvailable)?;

        let writer = self.writers.open(path, width, height).map_err(|e| {
            tracing::error!("Failed to open writer for {:?}: {}", path, e);
            CameraError::Io(e)
        })?;

        let session = RecordingSession::new(path.to_path_buf(), width, height);
        tracing::info!(
            "Recording {} started: {}x{} -> {:?}",
            session.id,
            width,
            height,
            path
        );

        let active = self.active.insert(ActiveRecording { writer, session });
        Ok(&active.session)
    }

    /// Write a frame if recording
    ///
    /// A write failure ends the recording (the file is closed and kept) and
    /// is returned as `Io`.
    pub fn write_frame(&mut self, frame: &Frame) -> CameraResult<()> {
        let Some(active) = self.active.as_mut() else {
            return Ok(());
        };

        let session = &mut active.session;
        let result = match session.first_frame_at {
            None => active.writer.write_frame(frame).map(|()| {
                session.first_frame_at = Some(frame.captured_at());
                session.started_at = Some(Utc::now());
            }),
            Some(_) => {
                let offset = session.offset_of(frame.captured_at());
                active
                    .writer
                    .write_frame_at(frame, offset)
                    .map(|()| session.last_offset = offset)
            }
        };

        match result {
            Ok(()) => {
                session.frame_count += 1;
                Ok(())
            }
            Err(e) => {
                tracing::error!("Recording write failed, stopping recording: {}", e);
                if let Err(close_err) = self.stop() {
                    tracing::warn!("Closing the failed recording also failed: {}", close_err);
                }
                Err(CameraError::Io(e))
            }
        }
    }

    /// Recording -> Idle
    ///
    /// Flushes and closes the writer. Stopping while idle is a no-op that
    /// returns `Ok(None)`.
    pub fn stop(&mut self) -> CameraResult<Option<RecordingSummary>> {
        let Some(mut active) = self.active.take() else {
            return Ok(None);
        };

        let summary = active.session.summary();
        active.writer.close()?;

        tracing::info!(
            "Recording {} stopped: {} frames, {:.0}ms -> {:?}",
            summary.id,
            summary.frame_count,
            summary.duration_ms,
            summary.path
        );
        Ok(Some(summary))
    }
}

impl Drop for RecordingController {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            tracing::warn!("Failed to close recording on shutdown: {}", e);
        }
    }
}
