//! Recording system module
//!
//! - RecordingController: Idle/Recording state machine fed by the pipeline
//! - VideoWriter / WriterFactory: where recorded frames go
//! - FFmpeg and PNG-sequence writers

pub mod controller;
pub mod ffmpeg;
pub mod sequence;
pub mod state;
pub mod writer;

pub use controller::RecordingController;
pub use ffmpeg::{FfmpegSettings, FfmpegWriter};
pub use sequence::{read_manifest, PngSequenceWriter, SequenceManifest, SEQUENCE_EXTENSION};
pub use state::{RecordingSession, RecordingState, RecordingSummary};
pub use writer::{DefaultWriterFactory, VideoWriter, WriterFactory};
