//! Motion classification
//!
//! The detector itself is opaque to the pipeline: anything that turns a frame
//! into a non-negative score implements [`MotionClassifier`]. The threshold
//! policy lives here and nowhere else.

use crate::frame::Frame;
use serde::{Deserialize, Serialize};

/// Scores strictly above this value are classified as motion
pub const MOTION_THRESHOLD: f64 = 0.02;

/// Detection text before the first frame is classified
pub const IDLE_TEXT: &str = "not/Detected";

/// Classification label of a single frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MotionLabel {
    Motion,
    NoMotion,
}

impl MotionLabel {
    /// Status text shown to the user
    pub fn text(&self) -> &'static str {
        match self {
            MotionLabel::Motion => "Movement detected",
            MotionLabel::NoMotion => "nothing detected",
        }
    }
}

/// Per-frame detection outcome
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionResult {
    pub score: f64,
    pub label: MotionLabel,
}

impl DetectionResult {
    /// Apply the fixed threshold to a score
    ///
    /// Negative and NaN scores are treated as zero.
    pub fn classify(score: f64) -> Self {
        let score = if score.is_nan() { 0.0 } else { score.max(0.0) };
        let label = if score > MOTION_THRESHOLD {
            MotionLabel::Motion
        } else {
            MotionLabel::NoMotion
        };
        Self { score, label }
    }
}

/// Produces a continuous motion score in `[0, inf)` for a frame
///
/// Called once per frame on the producer thread; implementations must not
/// accumulate per-frame history.
pub trait MotionClassifier: Send {
    fn score(&mut self, frame: &Frame) -> f64;
}

impl<F> MotionClassifier for F
where
    F: FnMut(&Frame) -> f64 + Send,
{
    fn score(&mut self, frame: &Frame) -> f64 {
        self(frame)
    }
}

/// Background-modelling detector
///
/// Keeps a single luma background image that drifts one intensity level
/// towards the live image every `frames_per_update` frames. The score is the
/// fraction of pixels that differ from the background by more than
/// `difference_threshold`.
pub struct BackgroundModelDetector {
    difference_threshold: u8,
    frames_per_update: u32,
    background: Vec<u8>,
    current: Vec<u8>,
    dimensions: (u32, u32),
    frames_since_update: u32,
}

impl BackgroundModelDetector {
    pub fn new() -> Self {
        Self::with_settings(15, 2)
    }

    pub fn with_settings(difference_threshold: u8, frames_per_update: u32) -> Self {
        Self {
            difference_threshold,
            frames_per_update: frames_per_update.max(1),
            background: Vec::new(),
            current: Vec::new(),
            dimensions: (0, 0),
            frames_since_update: 0,
        }
    }

    /// Forget the background model
    pub fn reset(&mut self) {
        self.background.clear();
        self.dimensions = (0, 0);
        self.frames_since_update = 0;
    }

    fn adapt_background(&mut self) {
        self.frames_since_update += 1;
        if self.frames_since_update < self.frames_per_update {
            return;
        }
        self.frames_since_update = 0;

        for (bg, &cur) in self.background.iter_mut().zip(self.current.iter()) {
            if cur > *bg {
                *bg += 1;
            } else if cur < *bg {
                *bg -= 1;
            }
        }
    }
}

impl Default for BackgroundModelDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl MotionClassifier for BackgroundModelDetector {
    fn score(&mut self, frame: &Frame) -> f64 {
        self.current.clear();
        self.current.extend(frame.luma());

        if self.current.is_empty() {
            return 0.0;
        }

        if self.dimensions != frame.dimensions() || self.background.len() != self.current.len() {
            tracing::debug!(
                "Background model (re)initialised at {}x{}",
                frame.width(),
                frame.height()
            );
            self.background.clear();
            self.background.extend_from_slice(&self.current);
            self.dimensions = frame.dimensions();
            self.frames_since_update = 0;
            return 0.0;
        }

        let threshold = self.difference_threshold;
        let changed = self
            .background
            .iter()
            .zip(self.current.iter())
            .filter(|&(&bg, &cur)| bg.abs_diff(cur) > threshold)
            .count();
        let score = changed as f64 / self.current.len() as f64;

        self.adapt_background();
        score
    }
}
