//! Recording state management
//!
//! Defines the recording state machine states and session tracking.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Current state of the recording controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordingState {
    /// No recording in progress
    Idle,
    /// Incoming frames are written to the output file
    Recording,
}

impl Default for RecordingState {
    fn default() -> Self {
        Self::Idle
    }
}

/// Information about the recording in progress
///
/// Exists only while the controller is in [`RecordingState::Recording`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingSession {
    pub id: Uuid,

    /// Output file
    pub path: PathBuf,

    pub width: u32,
    pub height: u32,

    /// Wall-clock time the first frame was written
    pub started_at: Option<DateTime<Utc>>,

    /// Capture instant of the first written frame (time zero)
    #[serde(skip)]
    pub first_frame_at: Option<Instant>,

    /// Offset of the most recently written frame
    #[serde(skip)]
    pub last_offset: Duration,

    pub frame_count: u64,
}

impl RecordingSession {
    pub fn new(path: PathBuf, width: u32, height: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            path,
            width,
            height,
            started_at: None,
            first_frame_at: None,
            last_offset: Duration::ZERO,
            frame_count: 0,
        }
    }

    /// Offset of a frame captured at `captured_at` relative to time zero
    ///
    /// Never goes backwards, even if the capture clock does.
    pub fn offset_of(&self, captured_at: Instant) -> Duration {
        match self.first_frame_at {
            Some(zero) => captured_at.saturating_duration_since(zero).max(self.last_offset),
            None => Duration::ZERO,
        }
    }

    /// Build the summary reported when the session ends
    pub fn summary(&self) -> RecordingSummary {
        RecordingSummary {
            id: self.id,
            path: self.path.clone(),
            frame_count: self.frame_count,
            duration_ms: self.last_offset.as_secs_f64() * 1000.0,
            started_at: self.started_at,
        }
    }
}

/// Result of a completed recording
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingSummary {
    pub id: Uuid,

    /// Path to the written file
    pub path: PathBuf,

    pub frame_count: u64,

    /// Timestamp of the last frame in milliseconds
    pub duration_ms: f64,

    pub started_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offset_never_decreases() {
        let mut session = RecordingSession::new(PathBuf::from("out.mp4"), 2, 2);
        let zero = Instant::now();
        assert_eq!(session.offset_of(zero), Duration::ZERO);

        session.first_frame_at = Some(zero);
        session.last_offset = Duration::from_millis(80);

        let earlier = zero + Duration::from_millis(40);
        assert_eq!(session.offset_of(earlier), Duration::from_millis(80));

        let later = zero + Duration::from_millis(120);
        assert_eq!(session.offset_of(later), Duration::from_millis(120));
    }

    #[test]
    fn test_state_serialization() {
        let json = serde_json::to_string(&RecordingState::Recording).unwrap();
        assert_eq!(json, "\"recording\"");
        assert_eq!(RecordingState::default(), RecordingState::Idle);
    }
}
